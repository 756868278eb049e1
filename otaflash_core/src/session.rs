//! The update state machine.
//!
//! Transport adapters push chunks of the update image into [`UpdateSession::feed`] in order.
//! Chunk boundaries never line up with phase boundaries so a single `feed` call may finish the
//! envelope, the executable image and start the filesystem image in one go. The last chunk runs
//! validation, migration and the boot switch inline before `feed` returns.
use crate::{
    aligned::AlignedWriter,
    config::UpdateConfig,
    envelope::{parse_envelope, EnvelopeError, UpdateEnvelope},
    migrate::Migrator,
    target::{BootSwitch, ExecutableTarget, FilesystemTarget},
    validate::{validate_filesystem, ValidateError},
    UpdateResult,
};
use alloc::vec::Vec;
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Init,
    ParsingHeader,
    WritingExecutable,
    ErasingFilesystemRegion,
    WritingFilesystem,
    Validating,
    Done,
    Error,
}

/// Everything a session writes to.
#[derive(Debug, Clone)]
pub struct UpdateTargets<E, F, M, B> {
    pub executable: E,
    pub filesystem: F,
    pub migrator: M,
    pub boot: B,
}

/// Returned by `feed` once the session has finished. Call `reset` to start over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClosed {
    pub result: UpdateResult,
}

impl core::fmt::Display for SessionClosed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "update session already finished ({}), reset it first",
            self.result
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SessionClosed {}

/// The narrow interface every transport adapter drives.
pub trait UpdateFeed {
    /// Push the next chunk of the update image. `total_len` is the length of the whole stream
    /// as announced by the transport.
    fn feed(&mut self, chunk: &[u8], total_len: usize) -> Result<(), SessionClosed>;

    fn is_done(&self) -> bool;

    fn result(&self) -> UpdateResult;

    /// Record a failure that happened outside the session, e.g. in the transport. Ignored once
    /// the session has finished.
    fn fail(&mut self, result: UpdateResult);

    fn result_message(&self) -> &'static str {
        self.result().message()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateProgress {
    pub state: UpdateState,
    pub executable_written: u32,
    pub executable_len: u32,
    pub filesystem_written: u32,
    pub filesystem_len: u32,
}

#[derive(Debug)]
pub struct UpdateSession<E, F, M, B> {
    config: UpdateConfig,
    targets: UpdateTargets<E, F, M, B>,
    state: UpdateState,
    result: UpdateResult,
    total_len: usize,
    received: usize,
    header: Vec<u8>,
    envelope: Option<UpdateEnvelope>,
    executable: Option<AlignedWriter>,
    filesystem_remaining: u32,
    filesystem_cursor: u32,
}

impl<E, F, M, B> UpdateSession<E, F, M, B>
where
    E: ExecutableTarget,
    F: FilesystemTarget,
    M: Migrator,
    B: BootSwitch,
{
    pub fn new(config: UpdateConfig, targets: UpdateTargets<E, F, M, B>) -> Self {
        Self {
            config,
            targets,
            state: UpdateState::Init,
            result: UpdateResult::Ok,
            total_len: 0,
            received: 0,
            header: Vec::new(),
            envelope: None,
            executable: None,
            filesystem_remaining: 0,
            filesystem_cursor: 0,
        }
    }

    /// Throw away all progress so the same targets can take a fresh attempt.
    pub fn reset(&mut self) {
        self.state = UpdateState::Init;
        self.result = UpdateResult::Ok;
        self.total_len = 0;
        self.received = 0;
        self.header = Vec::new();
        self.envelope = None;
        self.executable = None;
        self.filesystem_remaining = 0;
        self.filesystem_cursor = 0;
    }

    pub fn feed(&mut self, chunk: &[u8], total_len: usize) -> Result<(), SessionClosed> {
        if self.is_done() {
            event!(
                Level::WARN,
                "update session fed after it finished, reset it first"
            );
            return Err(SessionClosed {
                result: self.result,
            });
        }
        if chunk.is_empty() {
            return Ok(());
        }

        if self.state == UpdateState::Init {
            self.start(total_len);
            if self.is_done() {
                return Ok(());
            }
        }
        self.received = self.received.saturating_add(chunk.len());

        if self.state == UpdateState::ParsingHeader {
            let mut header = core::mem::take(&mut self.header);
            header.extend_from_slice(chunk);
            match self.parse_header(&header) {
                Some(payload_offset) => self.route(&header[payload_offset..]),
                None => self.header = header,
            }
        } else {
            self.route(chunk);
        }
        Ok(())
    }

    fn start(&mut self, total_len: usize) {
        self.total_len = total_len;
        if self.targets.executable.block_size() == 0 {
            event!(Level::ERROR, "executable region reports a zero block size");
            self.fail(UpdateResult::InitializeError);
            return;
        }
        if let Err(e) = self.targets.executable.begin() {
            event!(Level::ERROR, error = ?e, "could not open the executable region");
            self.fail(UpdateResult::InitializeError);
            return;
        }
        event!(Level::INFO, total_len, "update started");
        self.state = UpdateState::ParsingHeader;
    }

    /// Returns where the image starts in `buf` once the envelope is complete and accepted.
    fn parse_header(&mut self, buf: &[u8]) -> Option<usize> {
        let parsed = match parse_envelope(
            buf,
            &self.config.module_identity,
            self.config.strip_multipart,
        ) {
            Ok(parsed) => parsed,
            Err(EnvelopeError::Incomplete) => {
                if buf.len() >= self.config.max_header_len || self.received >= self.total_len {
                    event!(
                        Level::ERROR,
                        buffered = buf.len(),
                        "no update envelope found"
                    );
                    self.fail(UpdateResult::UpdateFileCorrupted);
                }
                return None;
            }
            Err(e @ EnvelopeError::WrongModule { .. }) => {
                event!(Level::ERROR, "{}", e);
                self.fail(UpdateResult::WrongFirmware);
                return None;
            }
            Err(e) => {
                event!(Level::ERROR, "{}", e);
                self.fail(UpdateResult::UpdateFileCorrupted);
                return None;
            }
        };

        let envelope = parsed.envelope;
        if envelope.executable_len == 0 {
            event!(Level::ERROR, "update carries no executable image");
            self.fail(UpdateResult::UpdateFileCorrupted);
            return None;
        }
        let available = self.total_len.saturating_sub(parsed.payload_offset) as u64;
        if envelope.image_len() > available {
            event!(
                Level::ERROR,
                declared = envelope.image_len(),
                available,
                "envelope declares more bytes than the stream carries"
            );
            self.fail(UpdateResult::UpdateFileCorrupted);
            return None;
        }
        if envelope.executable_len > self.targets.executable.size()
            || envelope.filesystem_len > self.targets.filesystem.size()
        {
            event!(
                Level::ERROR,
                executable_len = envelope.executable_len,
                executable_region = self.targets.executable.size(),
                filesystem_len = envelope.filesystem_len,
                filesystem_region = self.targets.filesystem.size(),
                "images don't fit the update regions"
            );
            self.fail(UpdateResult::UpdateFileCorrupted);
            return None;
        }

        event!(
            Level::INFO,
            module = envelope.module_identity.as_str(),
            executable_len = envelope.executable_len,
            filesystem_len = envelope.filesystem_len,
            filesystem_hash = %envelope.filesystem_hash,
            "update envelope accepted"
        );
        self.executable = Some(AlignedWriter::new(
            self.targets.executable.block_size(),
            envelope.executable_len,
        ));
        self.filesystem_remaining = envelope.filesystem_len;
        self.filesystem_cursor = 0;
        self.envelope = Some(envelope);
        self.state = UpdateState::WritingExecutable;
        Some(parsed.payload_offset)
    }

    /// Push image bytes through whichever phases they belong to.
    fn route(&mut self, mut input: &[u8]) {
        if self.state == UpdateState::WritingExecutable {
            let Some(writer) = self.executable.as_mut() else {
                return;
            };
            match writer.write(&mut self.targets.executable, input) {
                Ok(taken) => input = &input[taken..],
                Err(e) => {
                    event!(Level::ERROR, error = ?e, "write to executable region failed");
                    self.fail(UpdateResult::WriteAppFailed);
                    return;
                }
            }
            event!(
                Level::DEBUG,
                remaining = writer.remaining(),
                committed = writer.committed(),
                "writing executable image"
            );
            if writer.is_complete() {
                self.state = UpdateState::ErasingFilesystemRegion;
            }
        }

        if self.state == UpdateState::ErasingFilesystemRegion {
            event!(
                Level::INFO,
                size = self.targets.filesystem.size(),
                "erasing filesystem region, this takes a few seconds"
            );
            if let Err(e) = self.targets.filesystem.erase_all() {
                event!(Level::ERROR, error = ?e, "erasing filesystem region failed");
                self.fail(UpdateResult::WriteDataFailed);
                return;
            }
            self.state = UpdateState::WritingFilesystem;
        }

        if self.state == UpdateState::WritingFilesystem {
            let n = input.len().min(self.filesystem_remaining as usize);
            if n > 0 {
                if let Err(e) = self
                    .targets
                    .filesystem
                    .write_at(self.filesystem_cursor, &input[..n])
                {
                    event!(
                        Level::ERROR,
                        error = ?e,
                        offset = self.filesystem_cursor,
                        "write to filesystem region failed"
                    );
                    self.fail(UpdateResult::WriteDataFailed);
                    return;
                }
                self.filesystem_cursor += n as u32;
                self.filesystem_remaining -= n as u32;
            }
            event!(
                Level::DEBUG,
                written = self.filesystem_cursor,
                remaining = self.filesystem_remaining,
                "writing filesystem image"
            );
            if self.filesystem_remaining == 0 {
                self.state = UpdateState::Validating;
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        let Some(envelope) = self.envelope.as_ref() else {
            return;
        };
        let executable_len = envelope.executable_len;
        let filesystem_len = envelope.filesystem_len;
        let expected = envelope.filesystem_hash;

        match validate_filesystem(
            &mut self.targets.filesystem,
            filesystem_len,
            &expected,
            self.config.hash_window,
        ) {
            Ok(()) => event!(Level::INFO, "filesystem image validated"),
            Err(ValidateError::Mismatch { expected, actual }) => {
                event!(Level::ERROR, %expected, %actual, "filesystem hash mismatch");
                self.fail(UpdateResult::ValidationFailed);
                return;
            }
            Err(ValidateError::Read(e)) => {
                event!(Level::ERROR, error = ?e, "reading back the filesystem region failed");
                self.fail(UpdateResult::ValidationFailed);
                return;
            }
        }

        if let Err(e) = self.targets.migrator.migrate() {
            event!(Level::ERROR, error = ?e, "carrying over preserved files failed");
            self.fail(UpdateResult::WriteDataFailed);
            return;
        }

        match self.targets.boot.target_matches_running(executable_len) {
            Ok(false) => {}
            Ok(true) => {
                self.fail(UpdateResult::SameFirmware);
                return;
            }
            Err(e) => {
                event!(Level::ERROR, error = ?e, "comparing executable regions failed");
                self.fail(UpdateResult::ValidationFailed);
                return;
            }
        }

        if let Err(e) = self.targets.boot.select_target() {
            event!(Level::ERROR, error = ?e, "could not switch the boot target");
            self.fail(UpdateResult::ValidationFailed);
            return;
        }

        self.state = UpdateState::Done;
        self.result = UpdateResult::Ok;
        event!(Level::INFO, "update succeeded, restart to boot the new firmware");
    }

    pub fn fail(&mut self, result: UpdateResult) {
        if self.is_done() || result.is_ok() {
            return;
        }
        event!(Level::ERROR, code = result.code(), "update failed: {}", result);
        self.result = result;
        self.state = UpdateState::Error;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, UpdateState::Done | UpdateState::Error)
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn result(&self) -> UpdateResult {
        self.result
    }

    pub fn envelope(&self) -> Option<&UpdateEnvelope> {
        self.envelope.as_ref()
    }

    /// Next offset to be written in the filesystem region.
    pub fn filesystem_cursor(&self) -> u32 {
        self.filesystem_cursor
    }

    pub fn progress(&self) -> UpdateProgress {
        let (executable_len, filesystem_len) = self
            .envelope
            .as_ref()
            .map(|envelope| (envelope.executable_len, envelope.filesystem_len))
            .unwrap_or_default();
        let executable_written = self
            .executable
            .as_ref()
            .map(|writer| executable_len - writer.remaining())
            .unwrap_or(0);
        UpdateProgress {
            state: self.state,
            executable_written,
            executable_len,
            filesystem_written: self.filesystem_cursor,
            filesystem_len,
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn targets(&self) -> &UpdateTargets<E, F, M, B> {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut UpdateTargets<E, F, M, B> {
        &mut self.targets
    }

    pub fn into_targets(self) -> UpdateTargets<E, F, M, B> {
        self.targets
    }
}

impl<E, F, M, B> UpdateFeed for UpdateSession<E, F, M, B>
where
    E: ExecutableTarget,
    F: FilesystemTarget,
    M: Migrator,
    B: BootSwitch,
{
    fn feed(&mut self, chunk: &[u8], total_len: usize) -> Result<(), SessionClosed> {
        UpdateSession::feed(self, chunk, total_len)
    }

    fn is_done(&self) -> bool {
        UpdateSession::is_done(self)
    }

    fn result(&self) -> UpdateResult {
        UpdateSession::result(self)
    }

    fn fail(&mut self, result: UpdateResult) {
        UpdateSession::fail(self, result)
    }
}
