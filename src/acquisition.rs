use crate::digitizer::TransferRequest;
use crate::{AdqError, Conf, ControlUnit, RecordSet, TargetBuffers, TriggerMode};
use log::{debug, info, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

/// Records transferred from one unit.
#[derive(Debug, Clone)]
pub struct UnitCapture {
    pub unit: u32,
    pub snapshot: u32,
    pub records: RecordSet,
}

/// Running totals of transferred data.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub total_size: usize,
    pub n_records: usize,
    pub n_transfers: usize,
    pub t_begin: Instant,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self {
            total_size: 0,
            n_records: 0,
            n_transfers: 0,
            t_begin: Instant::now(),
        }
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment(&mut self, size: usize, records: usize) {
        self.total_size += size;
        self.n_records += records;
        self.n_transfers += 1;
    }

    /// Average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }
}

/// Enable the SDK trace log and enumerate devices. Fails unless at least
/// the configured number of units is present.
pub fn open_units<C: ControlUnit + ?Sized>(cu: &mut C, config: &Conf) -> Result<u32, AdqError> {
    cu.enable_error_trace(
        config.run_settings.trace_level,
        &config.run_settings.trace_dir,
    )?;
    let found = cu.find_devices();
    info!("Number of ADQ devices found: {found}");
    let failed = cu.failed_device_count();
    if failed > 0 {
        warn!("Number of failed ADQ devices: {failed}");
    }

    let required = config.run_settings.units;
    if found < required {
        return Err(AdqError::NotEnoughDevices { found, required });
    }
    Ok(required)
}

pub fn configure_unit<C: ControlUnit + ?Sized>(
    cu: &mut C,
    unit: u32,
    config: &Conf,
) -> Result<(), AdqError> {
    let primary = unit == 1;
    let sync = &config.sync_settings;
    let settings = &config.unit_settings;

    let clock_source = if primary {
        sync.primary_clock_source
    } else {
        sync.secondary_clock_source
    };
    cu.set_clock_source(unit, clock_source)?;
    if primary && sync.primary_clock_ref_out {
        cu.enable_clock_ref_out(unit, true)?;
    }

    cu.set_trigger_mode(unit, settings.trigger_mode)?;
    match settings.trigger_mode {
        TriggerMode::Level => {
            cu.set_level_trigger_level(unit, settings.level_trigger_level)?;
            cu.set_level_trigger_edge(unit, settings.level_trigger_edge)?;
            cu.set_level_trigger_channel(unit, settings.level_trigger_mask())?;
        }
        TriggerMode::Internal => {
            cu.set_internal_trigger_period(unit, settings.internal_trigger_period)?;
        }
        _ => (),
    }

    if let Some(mode) = settings.test_pattern_mode {
        cu.set_test_pattern_mode(unit, mode)?;
    }
    if let Some(skip) = settings.sample_skip {
        cu.set_sample_skip(unit, skip)?;
    }

    debug!(
        "ADQ #{unit}: clock {:?}, trigger {:?}",
        clock_source, settings.trigger_mode
    );
    Ok(())
}

/// Reset the unit's timestamp counter on the configured trigger event.
/// Sync is disarmed before it is set up and armed again.
pub fn configure_timestamp_sync<C: ControlUnit + ?Sized>(
    cu: &mut C,
    unit: u32,
    config: &Conf,
) -> Result<(), AdqError> {
    let sync = &config.sync_settings;
    if !sync.timestamp_sync {
        return Ok(());
    }
    cu.disarm_timestamp_sync(unit)?;
    cu.setup_timestamp_sync(unit, sync.timestamp_sync_mode, sync.timestamp_sync_source)?;
    cu.arm_timestamp_sync(unit)?;
    debug!(
        "ADQ #{unit}: timestamp sync {:?} on {:?}",
        sync.timestamp_sync_mode, sync.timestamp_sync_source
    );
    Ok(())
}

/// Configure every unit and set up multi-record collection on it.
pub fn setup_units<C: ControlUnit + ?Sized>(
    cu: &mut C,
    units: u32,
    config: &Conf,
) -> Result<(), AdqError> {
    for unit in 1..=units {
        configure_unit(cu, unit, config)?;
        configure_timestamp_sync(cu, unit, config)?;
        cu.multi_record_setup(
            unit,
            config.acquisition.records,
            config.acquisition.samples_per_record,
        )?;
    }
    Ok(())
}

/// Disarm then arm every unit. No unit is polled before all are armed.
pub fn arm_all<C: ControlUnit + ?Sized>(cu: &mut C, units: u32) -> Result<(), AdqError> {
    for unit in 1..=units {
        cu.disarm_trigger(unit)?;
        cu.arm_trigger(unit)?;
    }
    info!("Armed {units} unit(s)");
    Ok(())
}

/// Poll until the unit has acquired all records, sending a software trigger
/// each round when the unit triggers on software.
pub fn wait_acquired_all<C: ControlUnit + ?Sized>(
    cu: &mut C,
    unit: u32,
    config: &Conf,
) -> Result<(), AdqError> {
    let software = config.unit_settings.trigger_mode == TriggerMode::Software;
    let poll_interval = config.poll_interval();
    let timeout = config.acquire_timeout();
    let t_begin = Instant::now();

    info!("ADQ #{unit} waiting for trigger");
    while !cu.acquired_all(unit)? {
        if software {
            cu.sw_trigger(unit)?;
        }
        if let Some(limit) = timeout {
            let waited = t_begin.elapsed();
            if waited >= limit {
                return Err(AdqError::AcquisitionTimeout { unit, waited });
            }
        }
        if poll_interval > Duration::ZERO {
            thread::sleep(poll_interval);
        }
    }
    debug!(
        "ADQ #{unit} acquired all records after {:.3} s",
        t_begin.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Allocate target buffers sized from the unit and transfer every record.
pub fn transfer<C: ControlUnit + ?Sized>(
    cu: &mut C,
    unit: u32,
    config: &Conf,
) -> Result<(RecordSet, usize), AdqError> {
    let acq = &config.acquisition;
    let n_channels = cu.nof_channels(unit)?;
    let bytes_per_sample = cu.bytes_per_sample(unit)?;

    let mut buffers = TargetBuffers::new(
        n_channels as usize,
        acq.records as usize,
        acq.samples_per_record as usize,
        bytes_per_sample,
    )?;
    if acq.with_timestamps {
        buffers = buffers.with_timestamps();
    }

    let request = TransferRequest {
        start_record: 0,
        records: acq.records,
        start_sample: 0,
        samples: acq.samples_per_record,
        channel_mask: acq.channel_mask,
        transfer_mode: acq.transfer_mode,
    };
    info!("ADQ #{unit} reading data...");
    cu.get_data(unit, &mut buffers, &request)?;
    let size = buffers.size_bytes();

    Ok((buffers.into_record_set(), size))
}

/// Disarm and close multi-record on every unit. Runs all units even when one
/// fails, returning the first failure.
pub fn finish_all<C: ControlUnit + ?Sized>(cu: &mut C, units: u32) -> Result<(), AdqError> {
    let mut first_err = None;
    for unit in 1..=units {
        for res in [cu.disarm_trigger(unit), cu.multi_record_close(unit)] {
            if let Err(e) = res {
                warn!("{e}");
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// One multi-record capture across all units.
pub fn run_acquisition<C: ControlUnit + ?Sized>(
    cu: &mut C,
    units: u32,
    config: &Conf,
) -> Result<Vec<UnitCapture>, AdqError> {
    let mut stats = TransferStats::new();
    let res = setup_units(cu, units, config)
        .and_then(|_| arm_all(cu, units))
        .and_then(|_| {
            let mut captures = Vec::with_capacity(units as usize);
            for unit in 1..=units {
                wait_acquired_all(cu, unit, config)?;
                let (records, size) = transfer(cu, unit, config)?;
                stats.increment(size, records.records());
                captures.push(UnitCapture {
                    unit,
                    snapshot: 0,
                    records,
                });
            }
            Ok(captures)
        });
    let finished = finish_all(cu, units);

    let captures = res?;
    finished?;
    info!(
        "Transferred {} records ({} bytes) at {:.2} MB/s",
        stats.n_records,
        stats.total_size,
        stats.average_rate()
    );
    Ok(captures)
}

/// Arm once and collect `snapshots` captures per unit. All units are re-armed
/// together once every unit has transferred the current snapshot. Each capture is handed to `sink`
/// and dropped before the next one is taken.
pub fn run_snapshots<C, F>(
    cu: &mut C,
    units: u32,
    config: &Conf,
    mut sink: F,
) -> anyhow::Result<TransferStats>
where
    C: ControlUnit + ?Sized,
    F: FnMut(UnitCapture) -> anyhow::Result<()>,
{
    let mut stats = TransferStats::new();
    let snapshots = config.acquisition.snapshots;

    let res = setup_units(cu, units, config)
        .and_then(|_| arm_all(cu, units))
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            for snapshot in 0..snapshots {
                info!("Snapshot #{snapshot} starts ...");
                for unit in 1..=units {
                    wait_acquired_all(cu, unit, config)?;
                    let (records, size) = transfer(cu, unit, config)?;
                    stats.increment(size, records.records());
                    sink(UnitCapture {
                        unit,
                        snapshot,
                        records,
                    })?;
                }
                // every unit holds this snapshot before any is armed for the next
                if snapshot + 1 < snapshots {
                    arm_all(cu, units)?;
                }
            }
            Ok(())
        });
    let finished = finish_all(cu, units);

    res?;
    finished?;
    info!(
        "{} snapshot(s), {} records ({} bytes) at {:.2} MB/s",
        snapshots,
        stats.n_records,
        stats.total_size,
        stats.average_rate()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClockSource, SimulatedControlUnit, TimestampSyncMode};

    fn conf(units: u32) -> Conf {
        let mut conf = Conf::from_path(None).unwrap();
        conf.run_settings.units = units;
        conf.acquisition.records = 2;
        conf.acquisition.samples_per_record = 64;
        conf.acquisition.poll_interval_ms = 0;
        conf
    }

    fn open(n_units: u32, conf: &Conf) -> (SimulatedControlUnit, u32) {
        let mut cu = SimulatedControlUnit::new(n_units, 2, 2);
        let units = open_units(&mut cu, conf).unwrap();
        (cu, units)
    }

    #[test]
    fn too_few_devices() {
        let conf = conf(2);
        let mut cu = SimulatedControlUnit::new(1, 2, 2);
        assert_eq!(
            open_units(&mut cu, &conf),
            Err(AdqError::NotEnoughDevices {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn single_unit_software_trigger() {
        let conf = conf(1);
        let (mut cu, units) = open(1, &conf);
        let captures = run_acquisition(&mut cu, units, &conf).unwrap();
        assert_eq!(captures.len(), 1);
        let records = &captures[0].records;
        assert_eq!(records.n_channels(), 2);
        assert_eq!(records.records(), 2);
        assert_eq!(records.samples(), 64);
        assert!(cu.position("ADQ_SWTrig", 1).is_some());
        assert_eq!(
            cu.calls_for(1).last().copied(),
            Some("ADQ_MultiRecordClose")
        );
    }

    #[test]
    fn every_unit_armed_before_polling() {
        let mut conf = conf(2);
        conf.unit_settings.trigger_mode = TriggerMode::External;
        let (mut cu, units) = open(2, &conf);
        run_acquisition(&mut cu, units, &conf).unwrap();

        let last_arm = cu.position("ADQ_ArmTrigger", 2).unwrap();
        let first_poll = cu.position("ADQ_GetAcquiredAll", 1).unwrap();
        assert!(last_arm < first_poll);
        assert!(cu.position("ADQ_DisarmTrigger", 2).unwrap() < last_arm);
        // hardware triggers never need a software kick
        assert!(cu.position("ADQ_SWTrig", 1).is_none());
    }

    #[test]
    fn configuration_order_per_unit() {
        let mut conf = conf(1);
        conf.unit_settings.trigger_mode = TriggerMode::Level;
        conf.sync_settings.timestamp_sync = true;
        conf.sync_settings.primary_clock_ref_out = true;
        conf.unit_settings.test_pattern_mode = Some(2);
        conf.unit_settings.sample_skip = Some(4);
        let (mut cu, units) = open(1, &conf);
        setup_units(&mut cu, units, &conf).unwrap();
        assert_eq!(
            cu.calls_for(1),
            vec![
                "ADQ_SetClockSource",
                "ADQ_EnableClockRefOut",
                "ADQ_SetTriggerMode",
                "ADQ_SetLvlTrigLevel",
                "ADQ_SetLvlTrigEdge",
                "ADQ_SetLvlTrigChannel",
                "ADQ_SetTestPatternMode",
                "ADQ_SetSampleSkip",
                "ADQ_DisarmTimestampSync",
                "ADQ_SetupTimestampSync",
                "ADQ_ArmTimestampSync",
                "ADQ_MultiRecordSetup",
            ]
        );
    }

    #[test]
    fn secondary_units_skip_clock_ref_out() {
        let mut conf = conf(2);
        conf.unit_settings.trigger_mode = TriggerMode::Internal;
        conf.sync_settings.primary_clock_ref_out = true;
        conf.sync_settings.secondary_clock_source = ClockSource::IntExtref;
        let (mut cu, units) = open(2, &conf);
        setup_units(&mut cu, units, &conf).unwrap();
        assert_eq!(
            cu.calls_for(2),
            vec![
                "ADQ_SetClockSource",
                "ADQ_SetTriggerMode",
                "ADQ_SetInternalTriggerPeriod",
                "ADQ_MultiRecordSetup",
            ]
        );
    }

    #[test]
    fn synced_units_share_timestamps() {
        let mut conf = conf(2);
        conf.unit_settings.trigger_mode = TriggerMode::External;
        conf.acquisition.with_timestamps = true;
        conf.sync_settings.timestamp_sync = true;
        conf.sync_settings.timestamp_sync_mode = TimestampSyncMode::FirstTrigger;
        let (mut cu, units) = open(2, &conf);
        let captures = run_acquisition(&mut cu, units, &conf).unwrap();
        assert_eq!(captures[0].records.timestamps, captures[1].records.timestamps);
        assert_eq!(captures[0].records.timestamp(0), Some(0));
    }

    #[test]
    fn failure_still_closes_units() {
        let conf = conf(1);
        let (mut cu, units) = open(1, &conf);
        cu.fail_on = Some("ADQ_GetData");
        let res = run_acquisition(&mut cu, units, &conf);
        assert_eq!(
            res.unwrap_err(),
            AdqError::CallFailed {
                call: "ADQ_GetData",
                unit: 1
            }
        );
        assert!(cu.position("ADQ_MultiRecordClose", 1).is_some());
    }

    #[test]
    fn never_triggered_unit_times_out() {
        let mut conf = conf(1);
        conf.acquisition.acquire_timeout_s = 1;
        conf.acquisition.poll_interval_ms = 50;
        let (mut cu, units) = open(1, &conf);
        setup_units(&mut cu, units, &conf).unwrap();
        arm_all(&mut cu, units).unwrap();
        // the unit waits for software triggers that are never sent
        conf.unit_settings.trigger_mode = TriggerMode::External;
        match wait_acquired_all(&mut cu, 1, &conf) {
            Err(AdqError::AcquisitionTimeout { unit: 1, waited }) => {
                assert!(waited >= Duration::from_secs(1))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn snapshots_rearm_between_captures() {
        let mut conf = conf(2);
        conf.unit_settings.trigger_mode = TriggerMode::External;
        conf.acquisition.snapshots = 3;
        let (mut cu, units) = open(2, &conf);
        let mut seen = Vec::new();
        let stats = run_snapshots(&mut cu, units, &conf, |capture| {
            seen.push((capture.snapshot, capture.unit));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(0, 1), (0, 2), (1, 1), (1, 2), (2, 1), (2, 2)]);
        assert_eq!(stats.n_transfers, 6);
        assert_eq!(stats.n_records, 12);
        let arms = cu
            .calls_for(1)
            .into_iter()
            .filter(|c| *c == "ADQ_ArmTrigger")
            .count();
        assert_eq!(arms, 3);
    }

    #[test]
    fn snapshot_transfers_finish_before_rearm() {
        let mut conf = conf(2);
        conf.unit_settings.trigger_mode = TriggerMode::External;
        conf.acquisition.snapshots = 2;
        let (mut cu, units) = open(2, &conf);
        run_snapshots(&mut cu, units, &conf, |_| Ok(())).unwrap();

        let at = |call: &str| -> Vec<usize> {
            cu.calls
                .iter()
                .enumerate()
                .filter(|(_, (c, _))| *c == call)
                .map(|(i, _)| i)
                .collect()
        };
        let arms = at("ADQ_ArmTrigger");
        let reads = at("ADQ_GetData");
        assert_eq!(arms.len(), 4);
        assert_eq!(reads.len(), 4);
        // snapshot 0 is read from both units before either is re-armed
        assert!(reads[..2].iter().all(|&r| r < arms[2]));
        // and both units are re-armed before snapshot 1 is read
        assert!(arms[3] < reads[2]);
    }

    #[test]
    fn eight_bit_units_acquire() {
        let conf = conf(1);
        let mut cu = SimulatedControlUnit::new(1, 2, 1);
        let units = open_units(&mut cu, &conf).unwrap();
        let captures = run_acquisition(&mut cu, units, &conf).unwrap();
        let records = &captures[0].records;
        assert_eq!(records.bytes_per_sample, 1);
        assert_eq!(records.data.dim(), (2, 2, 64));
        let stream = records.channel_stream(0);
        assert!(stream.iter().any(|&v| v != 0));
        assert!(stream.iter().all(|&v| (-128..=127).contains(&v)));
    }

    #[test]
    fn sink_error_stops_snapshots() {
        let mut conf = conf(1);
        conf.acquisition.snapshots = 5;
        let (mut cu, units) = open(1, &conf);
        let mut calls = 0;
        let res = run_snapshots(&mut cu, units, &conf, |_| {
            calls += 1;
            anyhow::bail!("disk full")
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
        assert!(cu.position("ADQ_MultiRecordClose", 1).is_some());
    }
}
