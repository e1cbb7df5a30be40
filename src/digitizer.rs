use crate::{
    AdqError, ClockSource, TargetBuffers, TimestampSyncMode, TraceLevel, TriggerEdge, TriggerMode,
};

/// Firmware revision as reported by `ADQ_GetRevision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub firmware: i32,
    pub local_copy: bool,
    pub mixed: bool,
}

impl Revision {
    pub fn from_raw(raw: [i32; 3]) -> Self {
        Self {
            firmware: raw[0],
            local_copy: raw[1] != 0,
            mixed: raw[2] != 0,
        }
    }

    pub fn describe(&self) -> &'static str {
        if self.local_copy {
            "Local copy"
        } else if self.mixed {
            "SVN Managed, Mixed Revision"
        } else {
            "SVN Managed, SVN Updated"
        }
    }
}

/// Which part of the acquired records to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub start_record: u32,
    pub records: u32,
    pub start_sample: u32,
    pub samples: u32,
    pub channel_mask: u8,
    pub transfer_mode: u8,
}

/// Host-side manager of one or more digitizer units. Units are numbered
/// from 1.
pub trait ControlUnit {
    fn api_revision(&self) -> i32;
    fn enable_error_trace(&mut self, level: TraceLevel, dir: &str) -> Result<(), AdqError>;
    /// Scan for devices, returning how many were found.
    fn find_devices(&mut self) -> u32;
    fn nof_units(&self) -> u32;
    fn failed_device_count(&self) -> u32;

    fn revision(&self, unit: u32) -> Result<Revision, AdqError>;
    fn serial_number(&self, unit: u32) -> Result<String, AdqError>;
    fn product_name(&self, unit: u32) -> Result<String, AdqError>;
    fn nof_channels(&self, unit: u32) -> Result<u32, AdqError>;
    fn bytes_per_sample(&self, unit: u32) -> Result<u32, AdqError>;

    fn set_clock_source(&mut self, unit: u32, source: ClockSource) -> Result<(), AdqError>;
    fn enable_clock_ref_out(&mut self, unit: u32, enable: bool) -> Result<(), AdqError>;
    fn set_trigger_mode(&mut self, unit: u32, mode: TriggerMode) -> Result<(), AdqError>;
    fn set_level_trigger_level(&mut self, unit: u32, level: i32) -> Result<(), AdqError>;
    fn set_level_trigger_edge(&mut self, unit: u32, edge: TriggerEdge) -> Result<(), AdqError>;
    fn set_level_trigger_channel(&mut self, unit: u32, mask: u32) -> Result<(), AdqError>;
    fn set_internal_trigger_period(&mut self, unit: u32, period: u32) -> Result<(), AdqError>;
    fn set_test_pattern_mode(&mut self, unit: u32, mode: i32) -> Result<(), AdqError>;
    fn set_sample_skip(&mut self, unit: u32, skip: u32) -> Result<(), AdqError>;

    fn multi_record_setup(&mut self, unit: u32, records: u32, samples: u32)
        -> Result<(), AdqError>;
    fn multi_record_close(&mut self, unit: u32) -> Result<(), AdqError>;

    fn arm_trigger(&mut self, unit: u32) -> Result<(), AdqError>;
    fn disarm_trigger(&mut self, unit: u32) -> Result<(), AdqError>;
    fn sw_trigger(&mut self, unit: u32) -> Result<(), AdqError>;
    fn acquired_all(&mut self, unit: u32) -> Result<bool, AdqError>;

    /// Transfer acquired records into `buffers`. Timestamps are collected
    /// when the buffers were created with them.
    fn get_data(
        &mut self,
        unit: u32,
        buffers: &mut TargetBuffers,
        request: &TransferRequest,
    ) -> Result<(), AdqError>;

    fn disarm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError>;
    fn setup_timestamp_sync(
        &mut self,
        unit: u32,
        mode: TimestampSyncMode,
        source: TriggerMode,
    ) -> Result<(), AdqError>;
    fn arm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError>;
}
