use crate::{Conf, OutputFormat, UnitCapture, UnitInfo};
use anyhow::{anyhow, Context, Result};
use hdf5::{Dataset, File, Group};
use log::info;
use ndarray::{s, Array2, Array3};
use std::{
    collections::BTreeMap,
    fs::DirEntry,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// HDF5Writer creates one group per unit and routes records accordingly.
pub struct HDF5Writer {
    pub file: File,
    pub units: BTreeMap<u32, UnitData>,
}

impl HDF5Writer {
    pub fn new(
        filename: &Path,
        units: &[UnitInfo],
        n_samples: usize,
        max_records: usize,
        buffer_capacity: usize,
    ) -> Result<Self> {
        let file = File::create(filename)
            .with_context(|| format!("creating {}", filename.display()))?;

        let mut data = BTreeMap::new();
        for unit in units {
            let group = file.create_group(&format!("unit{}", unit.unit))?;
            let unit_data = UnitData::new(
                &group,
                unit.n_channels as usize,
                n_samples,
                max_records,
                buffer_capacity,
            )?;
            data.insert(unit.unit, unit_data);
        }

        Ok(Self { file, units: data })
    }

    /// Append every record of a capture to its unit's datasets.
    pub fn append_capture(&mut self, capture: &UnitCapture) -> Result<()> {
        let unit = self
            .units
            .get_mut(&capture.unit)
            .ok_or_else(|| anyhow!("No datasets for ADQ #{}", capture.unit))?;
        for record in 0..capture.records.records() {
            let timestamp = capture.records.timestamp(record).unwrap_or(0);
            unit.append_record(timestamp, &capture.records.record_frame(record))?;
        }
        Ok(())
    }

    /// Flush any remaining buffered records for every unit.
    pub fn flush_all(&mut self) -> Result<()> {
        for unit in self.units.values_mut() {
            unit.flush()?;
        }
        Ok(())
    }
}

/// Holds HDF5 datasets and buffering for one unit. The datasets grow with
/// each flush, so they only ever hold records that were written.
pub struct UnitData {
    current_record: usize,
    max_records: usize,
    timestamps: Dataset,
    waveforms: Dataset,
    buffer_capacity: usize,
    buffer_count: usize,
    ts_buffer: Array2<u64>,
    wf_buffer: Array3<i16>,
    n_channels: usize,
    n_samples: usize,
}

impl UnitData {
    pub fn new(
        group: &Group,
        n_channels: usize,
        n_samples: usize,
        max_records: usize,
        buffer_capacity: usize,
    ) -> Result<Self> {
        let buffer_capacity = buffer_capacity.clamp(1, max_records.max(1));

        // Timestamps are stored as (record, 1) so a 2D slice can be written.
        let timestamps = group
            .new_dataset::<u64>()
            .shape((0.., 1))
            .chunk((buffer_capacity, 1))
            .create("timestamps")?;

        let waveforms = group
            .new_dataset::<i16>()
            .shape((0.., n_channels, n_samples))
            .chunk((buffer_capacity, n_channels, n_samples))
            .create("waveforms")?;

        let ts_buffer = Array2::<u64>::zeros((buffer_capacity, 1));
        let wf_buffer = Array3::<i16>::zeros((buffer_capacity, n_channels, n_samples));

        Ok(Self {
            current_record: 0,
            max_records,
            timestamps,
            waveforms,
            buffer_capacity,
            buffer_count: 0,
            ts_buffer,
            wf_buffer,
            n_channels,
            n_samples,
        })
    }

    /// Records written to the file so far.
    pub fn written(&self) -> usize {
        self.current_record
    }

    /// Append a record, shaped (channel, sample). Flushes when the buffer fills.
    pub fn append_record(&mut self, timestamp: u64, record: &Array2<i16>) -> Result<()> {
        let (channels, samples) = record.dim();
        if channels != self.n_channels || samples != self.n_samples {
            return Err(anyhow!("Record dimensions do not match dataset dimensions"));
        }
        if self.current_record + self.buffer_count >= self.max_records {
            return Err(anyhow!("Maximum number of records reached"));
        }

        self.ts_buffer[[self.buffer_count, 0]] = timestamp;
        self.wf_buffer
            .slice_mut(s![self.buffer_count, .., ..])
            .assign(record);
        self.buffer_count += 1;

        if self.buffer_count == self.buffer_capacity {
            self.flush()?;
        }

        Ok(())
    }

    /// Grow the datasets by the buffered records and write them.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer_count == 0 {
            return Ok(());
        }
        let end = self.current_record + self.buffer_count;
        let rows = self.current_record..end;
        self.timestamps.resize((end, 1))?;
        self.waveforms.resize((end, self.n_channels, self.n_samples))?;

        let ts_to_write = self
            .ts_buffer
            .slice(s![0..self.buffer_count, ..])
            .to_owned();
        self.timestamps.write_slice(&ts_to_write, (rows.clone(), ..))?;

        let wf_to_write = self
            .wf_buffer
            .slice(s![0..self.buffer_count, .., ..])
            .to_owned();
        self.waveforms.write_slice(&wf_to_write, (rows, .., ..))?;

        self.current_record = end;
        self.buffer_count = 0;
        Ok(())
    }
}

/// Routes captures to the configured output format.
pub enum CaptureSink {
    Discard,
    Asc { dir: PathBuf, snapshots: bool },
    Hdf5(HDF5Writer),
}

impl CaptureSink {
    /// Open the output for `captures` captures per unit, each holding the
    /// configured number of records.
    pub fn new(infos: &[UnitInfo], config: &Conf, captures: u32) -> Result<Self> {
        let acq = &config.acquisition;
        let run = &config.run_settings;
        match run.output_format {
            OutputFormat::None => Ok(Self::Discard),
            OutputFormat::Asc => Ok(Self::Asc {
                dir: create_camp_dir(&run.output_dir, run.campaign_num)?,
                snapshots: captures > 1,
            }),
            OutputFormat::Hdf5 => {
                let max_records = acq
                    .records
                    .checked_mul(captures.max(1))
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        anyhow!("{} captures of {} records overflow", captures, acq.records)
                    })?;
                let (path, run_num) = create_run_file(&run.output_dir, run.campaign_num)?;
                info!("Writing run {} to {}", run_num, path.display());
                let writer = HDF5Writer::new(
                    &path,
                    infos,
                    acq.samples_per_record as usize,
                    max_records,
                    acq.records as usize,
                )?;
                Ok(Self::Hdf5(writer))
            }
        }
    }

    pub fn write(&mut self, capture: &UnitCapture) -> Result<()> {
        match self {
            Self::Discard => Ok(()),
            Self::Asc { dir, snapshots } => {
                let snapshot = snapshots.then_some(capture.snapshot);
                write_asc(dir, capture, snapshot).map(|_| ())
            }
            Self::Hdf5(writer) => writer.append_capture(capture),
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        match self {
            Self::Hdf5(writer) => writer.flush_all(),
            _ => Ok(()),
        }
    }
}

pub fn asc_file_name(unit: u32, snapshot: Option<u32>, record: usize) -> String {
    match snapshot {
        Some(snap) => format!("data_unit{unit}_snap{snap}_record{record}.asc"),
        None => format!("data_unit{unit}_record{record}.asc"),
    }
}

/// Write one tab-separated text file per record: one line per sample, one
/// column per channel.
pub fn write_asc(dir: &Path, capture: &UnitCapture, snapshot: Option<u32>) -> Result<Vec<PathBuf>> {
    let records = &capture.records;
    let mut written = Vec::with_capacity(records.records());

    for record in 0..records.records() {
        let path = dir.join(asc_file_name(capture.unit, snapshot, record));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let frame = records.record_frame(record);
        for sample in frame.columns() {
            for value in sample.iter() {
                write!(out, "{value}\t")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        written.push(path);
    }

    info!(
        "Saved {} record(s) of ADQ #{} to {}",
        written.len(),
        capture.unit,
        dir.display()
    );
    Ok(written)
}

pub fn create_camp_dir(output_dir: &str, campaign_num: usize) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{output_dir}/camp{campaign_num}"));
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        info!("Created campaign directory {}", path.display());
    }
    Ok(path)
}

/// Next free `run{N}_0.h5` in the campaign directory, with its run number.
pub fn create_run_file(output_dir: &str, campaign_num: usize) -> Result<(PathBuf, usize)> {
    let camp_dir = create_camp_dir(output_dir, campaign_num)?;
    let runs: Vec<DirEntry> = std::fs::read_dir(&camp_dir)?
        .filter_map(|e| e.ok())
        .collect();
    let max_run = runs
        .iter()
        .filter_map(|entry| {
            entry.file_name().to_str().and_then(|filename| {
                let stripped = filename.strip_prefix("run")?;
                stripped.split('_').next()?.parse::<usize>().ok()
            })
        })
        .max();

    let run_num = max_run.map_or(0, |max| max + 1);
    Ok((camp_dir.join(format!("run{run_num}_0.h5")), run_num))
}
