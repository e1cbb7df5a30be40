use crate::{AdqError, GETDATA_MAX_NOF_CHANNELS};
use libc::c_void;
use ndarray::{s, Array2, Array3, ArrayView1};

/// Per-channel sample buffers handed to the SDK for a data transfer.
///
/// The SDK receives a table of raw pointers into `channels`. The table is
/// rebuilt from the owned buffers every time it is requested, so it can never
/// outlive or dangle from the memory it points into.
#[derive(Debug)]
pub struct TargetBuffers {
    channels: Vec<Vec<u8>>,
    pointers: Vec<*mut c_void>,
    timestamps: Option<Vec<u64>>,
    records: usize,
    samples: usize,
    target_size: u32,
    bytes_per_sample: u32,
}

impl TargetBuffers {
    /// Allocate zeroed buffers for `records` records of `samples` samples on
    /// each of `n_channels` channels.
    pub fn new(
        n_channels: usize,
        records: usize,
        samples: usize,
        bytes_per_sample: u32,
    ) -> Result<Self, AdqError> {
        if bytes_per_sample != 1 && bytes_per_sample != 2 {
            return Err(AdqError::UnsupportedSampleWidth(bytes_per_sample));
        }
        // the SDK takes the per-channel size in samples as a u32
        let too_large = AdqError::BufferTooLarge { records, samples };
        let target_size = records
            .checked_mul(samples)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| too_large.clone())?;
        let len = (target_size as usize)
            .checked_mul(bytes_per_sample as usize)
            .ok_or(too_large)?;
        let channels = (0..n_channels).map(|_| vec![0u8; len]).collect();

        Ok(Self {
            channels,
            pointers: Vec::new(),
            timestamps: None,
            records,
            samples,
            target_size,
            bytes_per_sample,
        })
    }

    /// Also collect one timestamp per record.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = Some(vec![0u64; self.records]);
        self
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn bytes_per_sample(&self) -> u32 {
        self.bytes_per_sample
    }

    pub fn has_timestamps(&self) -> bool {
        self.timestamps.is_some()
    }

    /// Size of each channel buffer in samples.
    pub fn target_buffer_size(&self) -> u32 {
        self.target_size
    }

    pub fn size_bytes(&self) -> usize {
        self.channels.iter().map(Vec::len).sum()
    }

    /// Pointer table for `ADQ_GetData`. Padded with nulls up to the maximum
    /// channel count the SDK may index.
    pub fn pointer_table(&mut self) -> *mut *mut c_void {
        self.pointers.clear();
        for buffer in self.channels.iter_mut() {
            self.pointers.push(buffer.as_mut_ptr() as *mut c_void);
        }
        while self.pointers.len() < GETDATA_MAX_NOF_CHANNELS {
            self.pointers.push(std::ptr::null_mut());
        }
        self.pointers.as_mut_ptr()
    }

    /// Timestamp target for `ADQ_GetDataWHTS`, null when timestamps were not
    /// requested.
    pub fn timestamp_ptr(&mut self) -> *mut c_void {
        match self.timestamps {
            Some(ref mut ts) => ts.as_mut_ptr() as *mut c_void,
            None => std::ptr::null_mut(),
        }
    }

    pub fn channel_bytes_mut(&mut self, channel: usize) -> Option<&mut [u8]> {
        self.channels.get_mut(channel).map(Vec::as_mut_slice)
    }

    pub fn timestamps_mut(&mut self) -> Option<&mut [u64]> {
        self.timestamps.as_deref_mut()
    }

    /// Reinterpret the raw bytes as signed samples.
    pub fn into_record_set(self) -> RecordSet {
        let n_channels = self.channels.len();
        let mut data = Array3::<i16>::zeros((n_channels, self.records, self.samples));

        for (ch, buffer) in self.channels.iter().enumerate() {
            let mut lane = data.slice_mut(s![ch, .., ..]);
            let values: Box<dyn Iterator<Item = i16> + '_> = match self.bytes_per_sample {
                2 => Box::new(
                    buffer
                        .chunks_exact(2)
                        .map(|b| i16::from_ne_bytes([b[0], b[1]])),
                ),
                _ => Box::new(buffer.iter().map(|&b| b as i8 as i16)),
            };
            for (dst, v) in lane.iter_mut().zip(values) {
                *dst = v;
            }
        }

        RecordSet {
            data,
            timestamps: self.timestamps.unwrap_or_default(),
            bytes_per_sample: self.bytes_per_sample,
        }
    }
}

/// Samples of one multi-record transfer, shaped (channel, record, sample).
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub data: Array3<i16>,
    pub timestamps: Vec<u64>,
    pub bytes_per_sample: u32,
}

impl RecordSet {
    pub fn n_channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn records(&self) -> usize {
        self.data.dim().1
    }

    pub fn samples(&self) -> usize {
        self.data.dim().2
    }

    pub fn record(&self, channel: usize, record: usize) -> ArrayView1<'_, i16> {
        self.data.slice(s![channel, record, ..])
    }

    /// All records of a channel, back to back.
    pub fn channel_stream(&self, channel: usize) -> Vec<i16> {
        self.data.slice(s![channel, .., ..]).iter().copied().collect()
    }

    /// One record across all channels, shaped (channel, sample).
    pub fn record_frame(&self, record: usize) -> Array2<i16> {
        self.data.slice(s![.., record, ..]).to_owned()
    }

    pub fn timestamp(&self, record: usize) -> Option<u64> {
        self.timestamps.get(record).copied()
    }
}
