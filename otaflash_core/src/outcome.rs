/// Outcome of an update attempt. Only the first failure of a session is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum UpdateResult {
    #[default]
    Ok = 0,
    /// The download could not even be started.
    FileNotReachable = 1,
    /// The download broke off before the image was complete.
    HttpGetError = 2,
    /// The executable region could not be opened for writing.
    InitializeError = 3,
    /// Envelope missing or malformed, or the declared lengths don't fit the stream.
    UpdateFileCorrupted = 4,
    WriteAppFailed = 5,
    /// Erase, write or migration on the filesystem region failed.
    WriteDataFailed = 6,
    ValidationFailed = 7,
    /// The new executable image is identical to the running one. Nothing was switched.
    SameFirmware = 8,
    WrongFirmware = 9,
}

impl UpdateResult {
    pub fn is_ok(self) -> bool {
        self == UpdateResult::Ok
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => UpdateResult::Ok,
            1 => UpdateResult::FileNotReachable,
            2 => UpdateResult::HttpGetError,
            3 => UpdateResult::InitializeError,
            4 => UpdateResult::UpdateFileCorrupted,
            5 => UpdateResult::WriteAppFailed,
            6 => UpdateResult::WriteDataFailed,
            7 => UpdateResult::ValidationFailed,
            8 => UpdateResult::SameFirmware,
            9 => UpdateResult::WrongFirmware,
            _ => return None,
        })
    }

    /// The text shown to whoever triggered the update.
    pub fn message(self) -> &'static str {
        match self {
            UpdateResult::Ok => "OK",
            UpdateResult::FileNotReachable => "The update file is not reachable, check the link!",
            UpdateResult::HttpGetError => "Error while downloading the update file!",
            UpdateResult::InitializeError => "The update can't be initialized!",
            UpdateResult::UpdateFileCorrupted => "The update file is corrupted!",
            UpdateResult::WriteAppFailed => "Writing to the app partition failed!",
            UpdateResult::WriteDataFailed => "Writing to the data partition failed!",
            UpdateResult::ValidationFailed => "Validating the written firmware failed!",
            UpdateResult::SameFirmware => "This is the same firmware as before.",
            UpdateResult::WrongFirmware => "The firmware is not made for this hardware!",
        }
    }
}

impl core::fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_are_stable() {
        for code in 0..=9u8 {
            let result = UpdateResult::from_code(code).unwrap();
            assert_eq!(result.code(), code);
        }
        assert_eq!(UpdateResult::from_code(10), None);
        assert_eq!(UpdateResult::default(), UpdateResult::Ok);
        assert_eq!(format!("{}", UpdateResult::Ok), "OK");
    }
}
