#![no_std]

//! Firmware update engine.
//!
//! An [`UpdateSession`] consumes a combined update image (envelope header, executable image,
//! filesystem image) in arbitrarily sized chunks and drives it into the inactive storage regions.
//! The storage itself is reached only through the traits in [`target`] and [`migrate`] so the
//! engine can run against real flash, a host file or a test double.

#[cfg(feature = "std")]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod aligned;
pub mod config;
mod digest;
pub mod envelope;
pub mod migrate;
mod outcome;
pub mod region;
pub mod session;
pub mod target;
pub mod validate;

pub use aligned::{AlignedWriter, BlockSink};
pub use config::UpdateConfig;
pub use digest::*;
pub use envelope::UpdateEnvelope;
pub use outcome::*;
pub use region::{RegionDescriptor, RegionMap, RegionRole, RegionSlot};
pub use session::{SessionClosed, UpdateFeed, UpdateProgress, UpdateSession, UpdateState, UpdateTargets};
