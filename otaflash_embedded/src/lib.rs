//! Flash storage for the update engine.
//!
//! Everything here works against an [`embedded_storage`] NOR flash behind a `RefCell` so the
//! same code drives the device flash and the in-memory [`MemFlash`] used on the host.
#![no_std]
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

mod ab_write;
pub use ab_write::*;
mod boot_select;
pub use boot_select::*;
mod mem_flash;
pub use mem_flash::*;
mod partition;
pub use partition::*;
mod regions;
pub use regions::*;
