use serde::Deserialize;

pub const ADQ_TRANSFER_MODE_NORMAL: u8 = 0;
pub const ADQ_ALL_CHANNELS_MASK: u8 = 0xFF;
pub const ADQ_LEVEL_TRIGGER_ALL_CHANNELS: u32 = 15;
pub const GETDATA_MAX_NOF_CHANNELS: usize = 8;

#[cfg(target_os = "windows")]
pub const DEFAULT_LIBRARY: &str = "ADQAPI.dll";
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_LIBRARY: &str = "libadq.so";

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// Internal clock, internal reference
    IntIntref,
    /// Internal clock, external 10 MHz reference
    IntExtref,
    Ext,
    IntPxiref,
}

impl ClockSource {
    pub fn code(self) -> i32 {
        match self {
            Self::IntIntref => 0,
            Self::IntExtref => 1,
            Self::Ext => 2,
            Self::IntPxiref => 3,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Software,
    External,
    Level,
    Internal,
    ExternalSync,
}

impl TriggerMode {
    pub fn code(self) -> i32 {
        match self {
            Self::Software => 1,
            Self::External => 2,
            Self::Level => 3,
            Self::Internal => 4,
            Self::ExternalSync => 9,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEdge {
    Falling,
    Rising,
}

impl TriggerEdge {
    pub fn code(self) -> i32 {
        match self {
            Self::Falling => 0,
            Self::Rising => 1,
        }
    }
}

/// Which trigger events reset the timestamp counter once sync is armed.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSyncMode {
    FirstTrigger,
    AllTriggers,
}

impl TimestampSyncMode {
    pub fn code(self) -> u32 {
        match self {
            Self::FirstTrigger => 0,
            Self::AllTriggers => 1,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Error,
    Warning,
    Info,
}

impl TraceLevel {
    pub fn code(self) -> u32 {
        match self {
            Self::Error => 1,
            Self::Warning => 2,
            Self::Info => 3,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    None,
    Asc,
    Hdf5,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_codes_match_sdk() {
        assert_eq!(TriggerMode::Software.code(), 1);
        assert_eq!(TriggerMode::ExternalSync.code(), 9);
        assert_eq!(TriggerMode::Internal.code(), 4);
    }

    #[test]
    fn clock_codes_match_sdk() {
        assert_eq!(ClockSource::IntIntref.code(), 0);
        assert_eq!(ClockSource::IntExtref.code(), 1);
        assert_eq!(ClockSource::IntPxiref.code(), 3);
    }
}
