//! Runtime binding to the vendor ADQAPI shared library.
//!
//! The library is opened with `libloading` and every entry point is resolved
//! up front, so a missing symbol is reported when the library is loaded rather
//! than in the middle of an acquisition.

use crate::AdqError;
use libc::{c_char, c_int, c_uchar, c_uint, c_void};
use libloading::Library;

pub type CuHandle = *mut c_void;

type FnApiRevision = unsafe extern "C" fn() -> c_int;
type FnCreateCu = unsafe extern "C" fn() -> CuHandle;
type FnDeleteCu = unsafe extern "C" fn(CuHandle);
type FnEnableTrace = unsafe extern "C" fn(CuHandle, c_uint, *const c_char) -> c_int;
type FnCuQuery = unsafe extern "C" fn(CuHandle) -> c_int;
type FnUnit = unsafe extern "C" fn(CuHandle, c_int) -> c_int;
type FnUnitInt = unsafe extern "C" fn(CuHandle, c_int, c_int) -> c_int;
type FnUnitUint = unsafe extern "C" fn(CuHandle, c_int, c_uint) -> c_int;
type FnUnitUchar = unsafe extern "C" fn(CuHandle, c_int, c_uchar) -> c_int;
type FnUnitUintUint = unsafe extern "C" fn(CuHandle, c_int, c_uint, c_uint) -> c_int;
type FnUnitRevision = unsafe extern "C" fn(CuHandle, c_int) -> *mut c_int;
type FnUnitString = unsafe extern "C" fn(CuHandle, c_int) -> *mut c_char;
type FnUnitNofChannels = unsafe extern "C" fn(CuHandle, c_int) -> c_uint;
type FnUnitBytesPerSample = unsafe extern "C" fn(CuHandle, c_int, *mut c_uint) -> c_int;
type FnGetData = unsafe extern "C" fn(
    CuHandle,
    c_int,
    *mut *mut c_void,
    c_uint,
    c_uchar,
    c_uint,
    c_uint,
    c_uchar,
    c_uint,
    c_uint,
    c_uchar,
) -> c_int;
type FnGetDataWhts = unsafe extern "C" fn(
    CuHandle,
    c_int,
    *mut *mut c_void,
    *mut c_void,
    *mut c_void,
    c_uint,
    c_uchar,
    c_uint,
    c_uint,
    c_uchar,
    c_uint,
    c_uint,
    c_uchar,
) -> c_int;

/// Resolved ADQAPI entry points. The function pointers stay valid for as long
/// as `_lib` is alive, which is the lifetime of this struct.
pub struct AdqApi {
    pub path: String,
    pub api_get_revision: FnApiRevision,
    pub create_control_unit: FnCreateCu,
    pub delete_control_unit: FnDeleteCu,
    pub cu_enable_error_trace: FnEnableTrace,
    pub cu_find_devices: FnCuQuery,
    pub cu_nof_adq: FnCuQuery,
    pub cu_failed_device_count: FnCuQuery,
    pub get_revision: FnUnitRevision,
    pub get_board_serial_number: FnUnitString,
    pub get_board_product_name: FnUnitString,
    pub set_clock_source: FnUnitInt,
    pub enable_clock_ref_out: FnUnitUchar,
    pub set_trigger_mode: FnUnitInt,
    pub set_lvl_trig_level: FnUnitInt,
    pub set_lvl_trig_edge: FnUnitInt,
    pub set_lvl_trig_channel: FnUnitInt,
    pub set_internal_trigger_period: FnUnitUint,
    pub set_test_pattern_mode: FnUnitInt,
    pub set_sample_skip: FnUnitUint,
    pub multi_record_setup: FnUnitUintUint,
    pub multi_record_close: FnUnit,
    pub disarm_trigger: FnUnit,
    pub arm_trigger: FnUnit,
    pub get_acquired_all: FnUnit,
    pub sw_trig: FnUnit,
    pub get_nof_channels: FnUnitNofChannels,
    pub get_nof_bytes_per_sample: FnUnitBytesPerSample,
    pub get_data: FnGetData,
    pub get_data_whts: FnGetDataWhts,
    pub disarm_timestamp_sync: FnUnit,
    pub setup_timestamp_sync: FnUnitUintUint,
    pub arm_timestamp_sync: FnUnit,
    _lib: Library,
}

fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, AdqError> {
    unsafe {
        lib.get::<T>(name.as_bytes())
            .map(|sym| *sym)
            .map_err(|_| AdqError::MissingSymbol(name))
    }
}

impl AdqApi {
    pub fn load(path: &str) -> Result<Self, AdqError> {
        let lib = unsafe { Library::new(path) }.map_err(|e| AdqError::LibraryLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            path: path.to_string(),
            api_get_revision: symbol(&lib, "ADQAPI_GetRevision")?,
            create_control_unit: symbol(&lib, "CreateADQControlUnit")?,
            delete_control_unit: symbol(&lib, "DeleteADQControlUnit")?,
            cu_enable_error_trace: symbol(&lib, "ADQControlUnit_EnableErrorTrace")?,
            cu_find_devices: symbol(&lib, "ADQControlUnit_FindDevices")?,
            cu_nof_adq: symbol(&lib, "ADQControlUnit_NofADQ")?,
            cu_failed_device_count: symbol(&lib, "ADQControlUnit_GetFailedDeviceCount")?,
            get_revision: symbol(&lib, "ADQ_GetRevision")?,
            get_board_serial_number: symbol(&lib, "ADQ_GetBoardSerialNumber")?,
            get_board_product_name: symbol(&lib, "ADQ_GetBoardProductName")?,
            set_clock_source: symbol(&lib, "ADQ_SetClockSource")?,
            enable_clock_ref_out: symbol(&lib, "ADQ_EnableClockRefOut")?,
            set_trigger_mode: symbol(&lib, "ADQ_SetTriggerMode")?,
            set_lvl_trig_level: symbol(&lib, "ADQ_SetLvlTrigLevel")?,
            set_lvl_trig_edge: symbol(&lib, "ADQ_SetLvlTrigEdge")?,
            set_lvl_trig_channel: symbol(&lib, "ADQ_SetLvlTrigChannel")?,
            set_internal_trigger_period: symbol(&lib, "ADQ_SetInternalTriggerPeriod")?,
            set_test_pattern_mode: symbol(&lib, "ADQ_SetTestPatternMode")?,
            set_sample_skip: symbol(&lib, "ADQ_SetSampleSkip")?,
            multi_record_setup: symbol(&lib, "ADQ_MultiRecordSetup")?,
            multi_record_close: symbol(&lib, "ADQ_MultiRecordClose")?,
            disarm_trigger: symbol(&lib, "ADQ_DisarmTrigger")?,
            arm_trigger: symbol(&lib, "ADQ_ArmTrigger")?,
            get_acquired_all: symbol(&lib, "ADQ_GetAcquiredAll")?,
            sw_trig: symbol(&lib, "ADQ_SWTrig")?,
            get_nof_channels: symbol(&lib, "ADQ_GetNofChannels")?,
            get_nof_bytes_per_sample: symbol(&lib, "ADQ_GetNofBytesPerSample")?,
            get_data: symbol(&lib, "ADQ_GetData")?,
            get_data_whts: symbol(&lib, "ADQ_GetDataWHTS")?,
            disarm_timestamp_sync: symbol(&lib, "ADQ_DisarmTimestampSync")?,
            setup_timestamp_sync: symbol(&lib, "ADQ_SetupTimestampSync")?,
            arm_timestamp_sync: symbol(&lib, "ADQ_ArmTimestampSync")?,
            _lib: lib,
        })
    }

    pub fn revision(&self) -> i32 {
        unsafe { (self.api_get_revision)() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_names_path() {
        let res = AdqApi::load("/nonexistent/libadq-does-not-exist.so");
        match res {
            Err(AdqError::LibraryLoad { path, .. }) => {
                assert_eq!(path, "/nonexistent/libadq-does-not-exist.so")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("library should not load"),
        }
    }
}
