pub mod acquisition;
pub mod adqapi;
pub mod config;
pub mod control_unit;
pub mod digitizer;
pub mod params;
pub mod plot;
pub mod records;
pub mod simulated;
pub mod unit_info;
pub mod writer;

pub use acquisition::*;
pub use adqapi::AdqApi;
pub use config::*;
pub use control_unit::AdqControlUnit;
pub use digitizer::{ControlUnit, Revision};
pub use params::*;
pub use records::*;
pub use simulated::SimulatedControlUnit;
pub use unit_info::UnitInfo;
pub use writer::*;

use std::{fmt, time::Duration};

#[derive(Clone, PartialEq, Debug)]
pub enum AdqError {
    LibraryLoad { path: String, reason: String },
    MissingSymbol(&'static str),
    ControlUnitCreate,
    CallFailed { call: &'static str, unit: u32 },
    InvalidUnit(u32),
    NotEnoughDevices { found: u32, required: u32 },
    UnsupportedSampleWidth(u32),
    BufferTooLarge { records: usize, samples: usize },
    InvalidTraceDir(String),
    AcquisitionTimeout { unit: u32, waited: Duration },
}

impl fmt::Display for AdqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LibraryLoad { path, reason } => {
                write!(f, "could not load ADQAPI library {path}: {reason}")
            }
            Self::MissingSymbol(name) => write!(f, "ADQAPI library has no symbol {name}"),
            Self::ControlUnitCreate => write!(f, "failed to create ADQ control unit"),
            Self::CallFailed { call, unit } => write!(f, "{call} failed on ADQ #{unit}"),
            Self::InvalidUnit(unit) => write!(f, "no ADQ unit with number {unit}"),
            Self::NotEnoughDevices { found, required } => {
                write!(f, "found {found} ADQ devices, {required} required")
            }
            Self::UnsupportedSampleWidth(bytes) => {
                write!(f, "unsupported sample width of {bytes} bytes")
            }
            Self::BufferTooLarge { records, samples } => write!(
                f,
                "{records} records of {samples} samples do not fit an ADQ transfer buffer"
            ),
            Self::InvalidTraceDir(dir) => {
                write!(f, "trace directory {dir:?} contains a NUL byte")
            }
            Self::AcquisitionTimeout { unit, waited } => write!(
                f,
                "ADQ #{unit} did not acquire all records within {:.1} s",
                waited.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for AdqError {}

/// ADQ calls report success with a non-zero return value.
pub(crate) fn check(ret: libc::c_int, call: &'static str, unit: u32) -> Result<(), AdqError> {
    if ret == 0 {
        Err(AdqError::CallFailed { call, unit })
    } else {
        Ok(())
    }
}
