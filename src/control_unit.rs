use crate::adqapi::{AdqApi, CuHandle};
use crate::digitizer::{ControlUnit, Revision, TransferRequest};
use crate::{
    check, AdqError, ClockSource, TargetBuffers, TimestampSyncMode, TraceLevel, TriggerEdge,
    TriggerMode,
};
use libc::{c_char, c_int, c_uint};
use log::{debug, warn};
use std::{
    ffi::{CStr, CString},
    sync::Arc,
};

/// An ADQAPI control unit. Deleted when dropped.
pub struct AdqControlUnit {
    api: Arc<AdqApi>,
    handle: CuHandle,
    nof_units: u32,
}

impl AdqControlUnit {
    pub fn create(api: Arc<AdqApi>) -> Result<Self, AdqError> {
        let handle = unsafe { (api.create_control_unit)() };
        if handle.is_null() {
            return Err(AdqError::ControlUnitCreate);
        }
        debug!("Created ADQ control unit using {}", api.path);
        Ok(Self {
            api,
            handle,
            nof_units: 0,
        })
    }

    fn unit(&self, unit: u32) -> Result<c_int, AdqError> {
        if unit == 0 || unit > self.nof_units {
            Err(AdqError::InvalidUnit(unit))
        } else {
            Ok(unit as c_int)
        }
    }

    fn call(
        &self,
        unit: u32,
        name: &'static str,
        f: impl FnOnce(CuHandle, c_int) -> c_int,
    ) -> Result<(), AdqError> {
        let num = self.unit(unit)?;
        check(f(self.handle, num), name, unit)
    }

    fn board_string(
        &self,
        unit: u32,
        name: &'static str,
        f: unsafe extern "C" fn(CuHandle, c_int) -> *mut c_char,
    ) -> Result<String, AdqError> {
        let num = self.unit(unit)?;
        let ptr = unsafe { f(self.handle, num) };
        if ptr.is_null() {
            return Err(AdqError::CallFailed { call: name, unit });
        }
        let value = unsafe { CStr::from_ptr(ptr) };
        Ok(value.to_string_lossy().trim().to_string())
    }
}

fn trace_dir(dir: &str) -> Result<CString, AdqError> {
    CString::new(dir).map_err(|_| AdqError::InvalidTraceDir(dir.to_string()))
}

impl Drop for AdqControlUnit {
    fn drop(&mut self) {
        unsafe { (self.api.delete_control_unit)(self.handle) };
        debug!("Deleted ADQ control unit");
    }
}

impl ControlUnit for AdqControlUnit {
    fn api_revision(&self) -> i32 {
        self.api.revision()
    }

    fn enable_error_trace(&mut self, level: TraceLevel, dir: &str) -> Result<(), AdqError> {
        let dir = trace_dir(dir)?;
        let ret =
            unsafe { (self.api.cu_enable_error_trace)(self.handle, level.code(), dir.as_ptr()) };
        check(ret, "ADQControlUnit_EnableErrorTrace", 0)
    }

    fn find_devices(&mut self) -> u32 {
        let ret = unsafe { (self.api.cu_find_devices)(self.handle) };
        if ret == 0 {
            warn!("ADQControlUnit_FindDevices reported no devices or failed");
        }
        let found = unsafe { (self.api.cu_nof_adq)(self.handle) };
        self.nof_units = found.max(0) as u32;
        self.nof_units
    }

    fn nof_units(&self) -> u32 {
        self.nof_units
    }

    fn failed_device_count(&self) -> u32 {
        let failed = unsafe { (self.api.cu_failed_device_count)(self.handle) };
        failed.max(0) as u32
    }

    fn revision(&self, unit: u32) -> Result<Revision, AdqError> {
        let num = self.unit(unit)?;
        let ptr = unsafe { (self.api.get_revision)(self.handle, num) };
        if ptr.is_null() {
            return Err(AdqError::CallFailed {
                call: "ADQ_GetRevision",
                unit,
            });
        }
        let raw = unsafe { std::slice::from_raw_parts(ptr, 3) };
        Ok(Revision::from_raw([raw[0], raw[1], raw[2]]))
    }

    fn serial_number(&self, unit: u32) -> Result<String, AdqError> {
        self.board_string(
            unit,
            "ADQ_GetBoardSerialNumber",
            self.api.get_board_serial_number,
        )
    }

    fn product_name(&self, unit: u32) -> Result<String, AdqError> {
        self.board_string(
            unit,
            "ADQ_GetBoardProductName",
            self.api.get_board_product_name,
        )
    }

    fn nof_channels(&self, unit: u32) -> Result<u32, AdqError> {
        let num = self.unit(unit)?;
        Ok(unsafe { (self.api.get_nof_channels)(self.handle, num) })
    }

    fn bytes_per_sample(&self, unit: u32) -> Result<u32, AdqError> {
        let num = self.unit(unit)?;
        let mut bytes: c_uint = 0;
        let ret = unsafe { (self.api.get_nof_bytes_per_sample)(self.handle, num, &mut bytes) };
        check(ret, "ADQ_GetNofBytesPerSample", unit)?;
        Ok(bytes)
    }

    fn set_clock_source(&mut self, unit: u32, source: ClockSource) -> Result<(), AdqError> {
        let f = self.api.set_clock_source;
        self.call(unit, "ADQ_SetClockSource", |cu, n| unsafe {
            f(cu, n, source.code())
        })
    }

    fn enable_clock_ref_out(&mut self, unit: u32, enable: bool) -> Result<(), AdqError> {
        let f = self.api.enable_clock_ref_out;
        self.call(unit, "ADQ_EnableClockRefOut", |cu, n| unsafe {
            f(cu, n, enable as u8)
        })
    }

    fn set_trigger_mode(&mut self, unit: u32, mode: TriggerMode) -> Result<(), AdqError> {
        let f = self.api.set_trigger_mode;
        self.call(unit, "ADQ_SetTriggerMode", |cu, n| unsafe {
            f(cu, n, mode.code())
        })
    }

    fn set_level_trigger_level(&mut self, unit: u32, level: i32) -> Result<(), AdqError> {
        let f = self.api.set_lvl_trig_level;
        self.call(unit, "ADQ_SetLvlTrigLevel", |cu, n| unsafe { f(cu, n, level) })
    }

    fn set_level_trigger_edge(&mut self, unit: u32, edge: TriggerEdge) -> Result<(), AdqError> {
        let f = self.api.set_lvl_trig_edge;
        self.call(unit, "ADQ_SetLvlTrigEdge", |cu, n| unsafe {
            f(cu, n, edge.code())
        })
    }

    fn set_level_trigger_channel(&mut self, unit: u32, mask: u32) -> Result<(), AdqError> {
        let f = self.api.set_lvl_trig_channel;
        self.call(unit, "ADQ_SetLvlTrigChannel", |cu, n| unsafe {
            f(cu, n, mask as c_int)
        })
    }

    fn set_internal_trigger_period(&mut self, unit: u32, period: u32) -> Result<(), AdqError> {
        let f = self.api.set_internal_trigger_period;
        self.call(unit, "ADQ_SetInternalTriggerPeriod", |cu, n| unsafe {
            f(cu, n, period)
        })
    }

    fn set_test_pattern_mode(&mut self, unit: u32, mode: i32) -> Result<(), AdqError> {
        let f = self.api.set_test_pattern_mode;
        self.call(unit, "ADQ_SetTestPatternMode", |cu, n| unsafe {
            f(cu, n, mode)
        })
    }

    fn set_sample_skip(&mut self, unit: u32, skip: u32) -> Result<(), AdqError> {
        let f = self.api.set_sample_skip;
        self.call(unit, "ADQ_SetSampleSkip", |cu, n| unsafe { f(cu, n, skip) })
    }

    fn multi_record_setup(
        &mut self,
        unit: u32,
        records: u32,
        samples: u32,
    ) -> Result<(), AdqError> {
        let f = self.api.multi_record_setup;
        self.call(unit, "ADQ_MultiRecordSetup", |cu, n| unsafe {
            f(cu, n, records, samples)
        })
    }

    fn multi_record_close(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.multi_record_close;
        self.call(unit, "ADQ_MultiRecordClose", |cu, n| unsafe { f(cu, n) })
    }

    fn arm_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.arm_trigger;
        self.call(unit, "ADQ_ArmTrigger", |cu, n| unsafe { f(cu, n) })
    }

    fn disarm_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.disarm_trigger;
        self.call(unit, "ADQ_DisarmTrigger", |cu, n| unsafe { f(cu, n) })
    }

    fn sw_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.sw_trig;
        self.call(unit, "ADQ_SWTrig", |cu, n| unsafe { f(cu, n) })
    }

    fn acquired_all(&mut self, unit: u32) -> Result<bool, AdqError> {
        let num = self.unit(unit)?;
        Ok(unsafe { (self.api.get_acquired_all)(self.handle, num) } != 0)
    }

    fn get_data(
        &mut self,
        unit: u32,
        buffers: &mut TargetBuffers,
        request: &TransferRequest,
    ) -> Result<(), AdqError> {
        let num = self.unit(unit)?;
        let bytes_per_sample = buffers.bytes_per_sample() as u8;
        let buffer_size = buffers.target_buffer_size();
        let table = buffers.pointer_table();

        let ret = if buffers.has_timestamps() {
            let timestamps = buffers.timestamp_ptr();
            unsafe {
                (self.api.get_data_whts)(
                    self.handle,
                    num,
                    table,
                    std::ptr::null_mut(),
                    timestamps,
                    buffer_size,
                    bytes_per_sample,
                    request.start_record,
                    request.records,
                    request.channel_mask,
                    request.start_sample,
                    request.samples,
                    request.transfer_mode,
                )
            }
        } else {
            unsafe {
                (self.api.get_data)(
                    self.handle,
                    num,
                    table,
                    buffer_size,
                    bytes_per_sample,
                    request.start_record,
                    request.records,
                    request.channel_mask,
                    request.start_sample,
                    request.samples,
                    request.transfer_mode,
                )
            }
        };

        let call = if buffers.has_timestamps() {
            "ADQ_GetDataWHTS"
        } else {
            "ADQ_GetData"
        };
        check(ret, call, unit)
    }

    fn disarm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.disarm_timestamp_sync;
        self.call(unit, "ADQ_DisarmTimestampSync", |cu, n| unsafe { f(cu, n) })
    }

    fn setup_timestamp_sync(
        &mut self,
        unit: u32,
        mode: TimestampSyncMode,
        source: TriggerMode,
    ) -> Result<(), AdqError> {
        let f = self.api.setup_timestamp_sync;
        self.call(unit, "ADQ_SetupTimestampSync", |cu, n| unsafe {
            f(cu, n, mode.code(), source.code() as c_uint)
        })
    }

    fn arm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError> {
        let f = self.api.arm_timestamp_sync;
        self.call(unit, "ADQ_ArmTimestampSync", |cu, n| unsafe { f(cu, n) })
    }
}
