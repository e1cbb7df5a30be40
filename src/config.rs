use crate::{
    ClockSource, OutputFormat, TimestampSyncMode, TraceLevel, TriggerEdge, TriggerMode,
    ADQ_LEVEL_TRIGGER_ALL_CHANNELS, DEFAULT_LIBRARY,
};
use confique::Config;
use std::{path::Path, time::Duration};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    #[config(nested)]
    pub unit_settings: UnitSettings,
    #[config(nested)]
    pub sync_settings: SyncSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    /// Path of the ADQAPI shared library. Defaults to the platform name.
    pub library: Option<String>,
    #[config(default = "info")]
    pub trace_level: TraceLevel,
    #[config(default = ".")]
    pub trace_dir: String,
    /// Number of units the run needs.
    #[config(default = 1)]
    pub units: u32,
    #[config(default = ".")]
    pub output_dir: String,
    #[config(default = 0)]
    pub campaign_num: usize,
    #[config(default = "asc")]
    pub output_format: OutputFormat,
    #[config(default = true)]
    pub plot: bool,
    #[config(default = 1000)]
    pub plot_length: usize,
    #[config(default = 0)]
    pub plot_channel: usize,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    #[config(default = 4)]
    pub records: u32,
    #[config(default = 1000)]
    pub samples_per_record: u32,
    #[config(default = 255)]
    pub channel_mask: u8,
    #[config(default = 0)]
    pub transfer_mode: u8,
    #[config(default = false)]
    pub with_timestamps: bool,
    #[config(default = 10)]
    pub poll_interval_ms: u64,
    /// Give up waiting for records after this many seconds. 0 waits forever.
    #[config(default = 0)]
    pub acquire_timeout_s: u64,
    #[config(default = 1)]
    pub snapshots: u32,
}

#[derive(Config, Debug, Clone)]
pub struct UnitSettings {
    #[config(default = "software")]
    pub trigger_mode: TriggerMode,
    #[config(default = 10)]
    pub level_trigger_level: i32,
    #[config(default = "rising")]
    pub level_trigger_edge: TriggerEdge,
    /// Channel mask for the level trigger. All channels when unset.
    pub level_trigger_channels: Option<u32>,
    #[config(default = 1000)]
    pub internal_trigger_period: u32,
    pub test_pattern_mode: Option<i32>,
    pub sample_skip: Option<u32>,
}

#[derive(Config, Debug, Clone)]
pub struct SyncSettings {
    #[config(default = "int_intref")]
    pub primary_clock_source: ClockSource,
    #[config(default = "int_intref")]
    pub secondary_clock_source: ClockSource,
    #[config(default = false)]
    pub primary_clock_ref_out: bool,
    #[config(default = false)]
    pub timestamp_sync: bool,
    #[config(default = "all_triggers")]
    pub timestamp_sync_mode: TimestampSyncMode,
    #[config(default = "external")]
    pub timestamp_sync_source: TriggerMode,
}

impl UnitSettings {
    pub fn level_trigger_mask(&self) -> u32 {
        self.level_trigger_channels.unwrap_or(ADQ_LEVEL_TRIGGER_ALL_CHANNELS)
    }
}

impl Conf {
    /// Load from a TOML file, falling back to defaults for anything missing.
    pub fn from_path(path: Option<&Path>) -> Result<Self, confique::Error> {
        match path {
            Some(path) => Conf::builder().file(path).load(),
            None => Conf::builder().load(),
        }
    }

    pub fn library_path(&self) -> &str {
        self.run_settings.library.as_deref().unwrap_or(DEFAULT_LIBRARY)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.poll_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.acquisition.acquire_timeout_s {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_need_no_file() {
        let conf = Conf::from_path(None).unwrap();
        assert_eq!(conf.acquisition.records, 4);
        assert_eq!(conf.acquisition.samples_per_record, 1000);
        assert_eq!(conf.unit_settings.trigger_mode, TriggerMode::Software);
        assert_eq!(conf.library_path(), DEFAULT_LIBRARY);
        assert_eq!(conf.acquire_timeout(), None);
        assert_eq!(
            conf.unit_settings.level_trigger_mask(),
            ADQ_LEVEL_TRIGGER_ALL_CHANNELS
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
[run_settings]
library = "/opt/spd/libadq.so"
units = 2
output_format = "hdf5"

[acquisition]
records = 1
samples_per_record = 5000
acquire_timeout_s = 3

[unit_settings]
trigger_mode = "external"
level_trigger_channels = 3

[sync_settings]
primary_clock_source = "int_extref"
secondary_clock_source = "int_extref"
timestamp_sync = true
timestamp_sync_mode = "first_trigger"
"#
        )
        .unwrap();

        let conf = Conf::from_path(Some(file.path())).unwrap();
        assert_eq!(conf.library_path(), "/opt/spd/libadq.so");
        assert_eq!(conf.run_settings.units, 2);
        assert_eq!(conf.run_settings.output_format, OutputFormat::Hdf5);
        assert_eq!(conf.acquisition.samples_per_record, 5000);
        assert_eq!(conf.acquire_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(conf.unit_settings.trigger_mode, TriggerMode::External);
        assert_eq!(conf.unit_settings.level_trigger_mask(), 3);
        assert_eq!(
            conf.sync_settings.primary_clock_source,
            ClockSource::IntExtref
        );
        assert!(conf.sync_settings.timestamp_sync);
        assert_eq!(
            conf.sync_settings.timestamp_sync_mode,
            TimestampSyncMode::FirstTrigger
        );
        assert_eq!(
            conf.sync_settings.timestamp_sync_source,
            TriggerMode::External
        );
    }
}
