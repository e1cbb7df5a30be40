//! A software control unit producing synthetic waveforms, for running the
//! drivers without hardware.

use crate::digitizer::{ControlUnit, Revision, TransferRequest};
use crate::{
    AdqError, ClockSource, TargetBuffers, TimestampSyncMode, TraceLevel, TriggerEdge, TriggerMode,
};
use log::trace;
use rand::Rng;

const SIM_FIRMWARE_REVISION: i32 = 31000;
const SIM_SIGNAL_PERIOD: f64 = 250.0;
/// Clock ticks between consecutive triggers.
const SIM_TRIGGER_SPACING: u64 = 100_000;

#[derive(Debug, Clone, Default)]
struct SimUnit {
    trigger_mode: Option<TriggerMode>,
    records: u32,
    samples: u32,
    multi_record: bool,
    armed: bool,
    record_stamps: Vec<u64>,
    clock: u64,
    sync_armed: bool,
    sync_mode: Option<TimestampSyncMode>,
}

#[derive(Debug)]
pub struct SimulatedControlUnit {
    units: Vec<SimUnit>,
    found: u32,
    n_channels: u32,
    bytes_per_sample: u32,
    /// Calls made so far, as `(call, unit)`.
    pub calls: Vec<(&'static str, u32)>,
    /// Make every call with this name fail.
    pub fail_on: Option<&'static str>,
}

impl SimulatedControlUnit {
    pub fn new(n_units: u32, n_channels: u32, bytes_per_sample: u32) -> Self {
        let mut rng = rand::rng();
        let units = (0..n_units)
            .map(|_| SimUnit {
                // units power up at unrelated counter values
                clock: rng.random_range(0..1_000_000_000),
                ..Default::default()
            })
            .collect();
        Self {
            units,
            found: 0,
            n_channels,
            bytes_per_sample,
            calls: Vec::new(),
            fail_on: None,
        }
    }

    /// Calls made to one unit, in order.
    pub fn calls_for(&self, unit: u32) -> Vec<&'static str> {
        self.calls
            .iter()
            .filter(|(_, u)| *u == unit)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn position(&self, call: &'static str, unit: u32) -> Option<usize> {
        self.calls.iter().position(|&(c, u)| c == call && u == unit)
    }

    fn enter(&mut self, call: &'static str, unit: u32) -> Result<&mut SimUnit, AdqError> {
        trace!("sim: {call} on ADQ #{unit}");
        self.calls.push((call, unit));
        if unit == 0 || unit > self.found {
            return Err(AdqError::InvalidUnit(unit));
        }
        if self.fail_on == Some(call) {
            return Err(AdqError::CallFailed { call, unit });
        }
        Ok(&mut self.units[unit as usize - 1])
    }

    fn unit(&self, unit: u32) -> Result<&SimUnit, AdqError> {
        if unit == 0 || unit > self.found {
            return Err(AdqError::InvalidUnit(unit));
        }
        Ok(&self.units[unit as usize - 1])
    }
}

impl SimUnit {
    fn trigger(&mut self) {
        if !self.armed || self.record_stamps.len() >= self.records as usize {
            return;
        }
        self.clock += SIM_TRIGGER_SPACING;
        if self.sync_armed {
            self.clock = 0;
            if self.sync_mode == Some(TimestampSyncMode::FirstTrigger) {
                self.sync_armed = false;
            }
        }
        self.record_stamps.push(self.clock);
    }

    fn complete(&self) -> bool {
        self.armed && self.record_stamps.len() >= self.records as usize
    }
}

fn synth(timestamp: u64, sample: usize, channel: usize, amplitude: f64, rng: &mut impl Rng) -> f64 {
    let phase = (timestamp as f64 + sample as f64) / SIM_SIGNAL_PERIOD * std::f64::consts::TAU;
    let noise: f64 = rng.random_range(-0.02..0.02);
    amplitude * ((phase + channel as f64 * 0.5).sin() + noise)
}

impl ControlUnit for SimulatedControlUnit {
    fn api_revision(&self) -> i32 {
        SIM_FIRMWARE_REVISION
    }

    fn enable_error_trace(&mut self, _level: TraceLevel, _dir: &str) -> Result<(), AdqError> {
        self.calls.push(("ADQControlUnit_EnableErrorTrace", 0));
        Ok(())
    }

    fn find_devices(&mut self) -> u32 {
        self.calls.push(("ADQControlUnit_FindDevices", 0));
        self.found = self.units.len() as u32;
        self.found
    }

    fn nof_units(&self) -> u32 {
        self.found
    }

    fn failed_device_count(&self) -> u32 {
        0
    }

    fn revision(&self, unit: u32) -> Result<Revision, AdqError> {
        self.unit(unit)?;
        Ok(Revision::from_raw([SIM_FIRMWARE_REVISION, 0, 0]))
    }

    fn serial_number(&self, unit: u32) -> Result<String, AdqError> {
        self.unit(unit)?;
        Ok(format!("SIM{:05}", unit))
    }

    fn product_name(&self, unit: u32) -> Result<String, AdqError> {
        self.unit(unit)?;
        Ok("ADQ-SIM".to_string())
    }

    fn nof_channels(&self, unit: u32) -> Result<u32, AdqError> {
        self.unit(unit)?;
        Ok(self.n_channels)
    }

    fn bytes_per_sample(&self, unit: u32) -> Result<u32, AdqError> {
        self.unit(unit)?;
        Ok(self.bytes_per_sample)
    }

    fn set_clock_source(&mut self, unit: u32, _source: ClockSource) -> Result<(), AdqError> {
        self.enter("ADQ_SetClockSource", unit).map(|_| ())
    }

    fn enable_clock_ref_out(&mut self, unit: u32, _enable: bool) -> Result<(), AdqError> {
        self.enter("ADQ_EnableClockRefOut", unit).map(|_| ())
    }

    fn set_trigger_mode(&mut self, unit: u32, mode: TriggerMode) -> Result<(), AdqError> {
        self.enter("ADQ_SetTriggerMode", unit)?.trigger_mode = Some(mode);
        Ok(())
    }

    fn set_level_trigger_level(&mut self, unit: u32, _level: i32) -> Result<(), AdqError> {
        self.enter("ADQ_SetLvlTrigLevel", unit).map(|_| ())
    }

    fn set_level_trigger_edge(&mut self, unit: u32, _edge: TriggerEdge) -> Result<(), AdqError> {
        self.enter("ADQ_SetLvlTrigEdge", unit).map(|_| ())
    }

    fn set_level_trigger_channel(&mut self, unit: u32, _mask: u32) -> Result<(), AdqError> {
        self.enter("ADQ_SetLvlTrigChannel", unit).map(|_| ())
    }

    fn set_internal_trigger_period(&mut self, unit: u32, _period: u32) -> Result<(), AdqError> {
        self.enter("ADQ_SetInternalTriggerPeriod", unit).map(|_| ())
    }

    fn set_test_pattern_mode(&mut self, unit: u32, _mode: i32) -> Result<(), AdqError> {
        self.enter("ADQ_SetTestPatternMode", unit).map(|_| ())
    }

    fn set_sample_skip(&mut self, unit: u32, _skip: u32) -> Result<(), AdqError> {
        self.enter("ADQ_SetSampleSkip", unit).map(|_| ())
    }

    fn multi_record_setup(
        &mut self,
        unit: u32,
        records: u32,
        samples: u32,
    ) -> Result<(), AdqError> {
        let sim = self.enter("ADQ_MultiRecordSetup", unit)?;
        sim.records = records;
        sim.samples = samples;
        sim.multi_record = true;
        Ok(())
    }

    fn multi_record_close(&mut self, unit: u32) -> Result<(), AdqError> {
        let sim = self.enter("ADQ_MultiRecordClose", unit)?;
        sim.multi_record = false;
        sim.armed = false;
        Ok(())
    }

    fn arm_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        let sim = self.enter("ADQ_ArmTrigger", unit)?;
        if !sim.multi_record {
            return Err(AdqError::CallFailed {
                call: "ADQ_ArmTrigger",
                unit,
            });
        }
        sim.armed = true;
        sim.record_stamps.clear();
        Ok(())
    }

    fn disarm_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        self.enter("ADQ_DisarmTrigger", unit)?.armed = false;
        Ok(())
    }

    fn sw_trigger(&mut self, unit: u32) -> Result<(), AdqError> {
        let sim = self.enter("ADQ_SWTrig", unit)?;
        if sim.trigger_mode == Some(TriggerMode::Software) {
            sim.trigger();
        }
        Ok(())
    }

    fn acquired_all(&mut self, unit: u32) -> Result<bool, AdqError> {
        let sim = self.enter("ADQ_GetAcquiredAll", unit)?;
        // hardware trigger sources fire on their own
        if sim.trigger_mode.is_some() && sim.trigger_mode != Some(TriggerMode::Software) {
            sim.trigger();
        }
        Ok(sim.complete())
    }

    fn get_data(
        &mut self,
        unit: u32,
        buffers: &mut TargetBuffers,
        request: &TransferRequest,
    ) -> Result<(), AdqError> {
        let call = if buffers.has_timestamps() {
            "ADQ_GetDataWHTS"
        } else {
            "ADQ_GetData"
        };
        let bytes_per_sample = self.bytes_per_sample;
        let sim = self.enter(call, unit)?.clone();

        let last_record = request.start_record + request.records;
        let last_sample = request.start_sample + request.samples;
        if !sim.complete()
            || last_record > sim.records
            || last_sample > sim.samples
            || request.records as usize > buffers.records()
            || request.samples as usize > buffers.samples()
            || buffers.bytes_per_sample() != bytes_per_sample
        {
            return Err(AdqError::CallFailed { call, unit });
        }

        let amplitude = if bytes_per_sample == 2 { 8000.0 } else { 100.0 };
        let samples = request.samples as usize;
        let mut rng = rand::rng();
        for ch in 0..buffers.n_channels() {
            if request.channel_mask & (1 << ch) == 0 {
                continue;
            }
            let Some(bytes) = buffers.channel_bytes_mut(ch) else {
                continue;
            };
            for r in 0..request.records as usize {
                let stamp = sim.record_stamps[request.start_record as usize + r];
                for s in 0..samples {
                    let sample = request.start_sample as usize + s;
                    let v = synth(stamp, sample, ch, amplitude, &mut rng);
                    let idx = r * samples + s;
                    if bytes_per_sample == 2 {
                        let at = idx * 2;
                        bytes[at..at + 2].copy_from_slice(&(v as i16).to_ne_bytes());
                    } else {
                        bytes[idx] = v as i8 as u8;
                    }
                }
            }
        }

        if let Some(ts) = buffers.timestamps_mut() {
            for (r, slot) in ts.iter_mut().take(request.records as usize).enumerate() {
                *slot = sim.record_stamps[request.start_record as usize + r];
            }
        }

        Ok(())
    }

    fn disarm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError> {
        self.enter("ADQ_DisarmTimestampSync", unit)?.sync_armed = false;
        Ok(())
    }

    fn setup_timestamp_sync(
        &mut self,
        unit: u32,
        mode: TimestampSyncMode,
        _source: TriggerMode,
    ) -> Result<(), AdqError> {
        self.enter("ADQ_SetupTimestampSync", unit)?.sync_mode = Some(mode);
        Ok(())
    }

    fn arm_timestamp_sync(&mut self, unit: u32) -> Result<(), AdqError> {
        let sim = self.enter("ADQ_ArmTimestampSync", unit)?;
        if sim.sync_mode.is_none() {
            return Err(AdqError::CallFailed {
                call: "ADQ_ArmTimestampSync",
                unit,
            });
        }
        sim.sync_armed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ADQ_ALL_CHANNELS_MASK, ADQ_TRANSFER_MODE_NORMAL};

    fn request(records: u32, samples: u32) -> TransferRequest {
        TransferRequest {
            start_record: 0,
            records,
            start_sample: 0,
            samples,
            channel_mask: ADQ_ALL_CHANNELS_MASK,
            transfer_mode: ADQ_TRANSFER_MODE_NORMAL,
        }
    }

    #[test]
    fn units_must_be_found_first() {
        let mut cu = SimulatedControlUnit::new(2, 2, 2);
        assert_eq!(
            cu.set_clock_source(1, ClockSource::IntIntref),
            Err(AdqError::InvalidUnit(1))
        );
        assert_eq!(cu.find_devices(), 2);
        assert!(cu.set_clock_source(2, ClockSource::IntIntref).is_ok());
        assert_eq!(
            cu.set_clock_source(0, ClockSource::IntIntref),
            Err(AdqError::InvalidUnit(0))
        );
        assert_eq!(
            cu.set_clock_source(3, ClockSource::IntIntref),
            Err(AdqError::InvalidUnit(3))
        );
    }

    #[test]
    fn software_trigger_completes_records() {
        let mut cu = SimulatedControlUnit::new(1, 2, 2);
        cu.find_devices();
        cu.set_trigger_mode(1, TriggerMode::Software).unwrap();
        cu.multi_record_setup(1, 2, 16).unwrap();
        cu.arm_trigger(1).unwrap();
        assert!(!cu.acquired_all(1).unwrap());
        cu.sw_trigger(1).unwrap();
        assert!(!cu.acquired_all(1).unwrap());
        cu.sw_trigger(1).unwrap();
        assert!(cu.acquired_all(1).unwrap());

        let mut bufs = TargetBuffers::new(2, 2, 16, 2).unwrap();
        cu.get_data(1, &mut bufs, &request(2, 16)).unwrap();
        let set = bufs.into_record_set();
        assert!(set.channel_stream(0).iter().any(|&v| v != 0));
    }

    #[test]
    fn transfer_before_acquisition_fails() {
        let mut cu = SimulatedControlUnit::new(1, 1, 2);
        cu.find_devices();
        cu.set_trigger_mode(1, TriggerMode::Software).unwrap();
        cu.multi_record_setup(1, 1, 8).unwrap();
        cu.arm_trigger(1).unwrap();
        let mut bufs = TargetBuffers::new(1, 1, 8, 2).unwrap();
        assert_eq!(
            cu.get_data(1, &mut bufs, &request(1, 8)),
            Err(AdqError::CallFailed {
                call: "ADQ_GetData",
                unit: 1
            })
        );
    }

    #[test]
    fn arming_requires_multirecord_setup() {
        let mut cu = SimulatedControlUnit::new(1, 1, 2);
        cu.find_devices();
        assert!(cu.arm_trigger(1).is_err());
    }

    #[test]
    fn timestamp_sync_resets_counter() {
        let mut cu = SimulatedControlUnit::new(1, 1, 2);
        cu.find_devices();
        cu.set_trigger_mode(1, TriggerMode::External).unwrap();
        cu.setup_timestamp_sync(1, TimestampSyncMode::FirstTrigger, TriggerMode::External)
            .unwrap();
        cu.arm_timestamp_sync(1).unwrap();
        cu.multi_record_setup(1, 2, 4).unwrap();
        cu.arm_trigger(1).unwrap();
        while !cu.acquired_all(1).unwrap() {}

        let mut bufs = TargetBuffers::new(1, 2, 4, 2).unwrap().with_timestamps();
        cu.get_data(1, &mut bufs, &request(2, 4)).unwrap();
        let set = bufs.into_record_set();
        assert_eq!(set.timestamps, vec![0, SIM_TRIGGER_SPACING]);
    }

    #[test]
    fn injected_failure_is_reported() {
        let mut cu = SimulatedControlUnit::new(1, 1, 2);
        cu.find_devices();
        cu.fail_on = Some("ADQ_SetTriggerMode");
        assert_eq!(
            cu.set_trigger_mode(1, TriggerMode::Software),
            Err(AdqError::CallFailed {
                call: "ADQ_SetTriggerMode",
                unit: 1
            })
        );
    }
}
