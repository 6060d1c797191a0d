//! Audio buffers shared between the stream bridge, the engine and units

/// Stereo audio frame carried from the input stream to the output callback
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: f32,
    pub right: f32,
}

impl StereoSample {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn mono(value: f32) -> Self {
        Self { left: value, right: value }
    }

    pub fn silence() -> Self {
        Self::default()
    }
}

/// Non-interleaved scratch buffer handed to a processing unit
///
/// Storage is allocated once, when the unit is prepared. On the audio thread
/// only [`set_frames`](Self::set_frames) and the channel accessors are used,
/// none of which allocate.
#[derive(Debug, Clone)]
pub struct UnitBuffer {
    channels: Vec<Vec<f32>>,
    capacity: usize,
    frames: usize,
}

impl UnitBuffer {
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; num_channels],
            capacity,
            frames: capacity,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Maximum frames per block
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames in the current block
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Set the length of the current block. Returns false if it exceeds capacity.
    #[inline]
    pub fn set_frames(&mut self, frames: usize) -> bool {
        if frames > self.capacity {
            return false;
        }
        self.frames = frames;
        true
    }

    /// Zero the current block on every channel
    #[inline]
    pub fn clear(&mut self) {
        let frames = self.frames;
        for channel in &mut self.channels {
            channel[..frames].fill(0.0);
        }
    }

    /// Copy `source` into the start of `channel`, truncated to the current block
    #[inline]
    pub fn copy_from(&mut self, channel: usize, source: &[f32]) {
        let n = source.len().min(self.frames);
        if let Some(dest) = self.channels.get_mut(channel) {
            dest[..n].copy_from_slice(&source[..n]);
        }
    }

    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.channels[channel][..self.frames]
    }

    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.channels[channel][..frames]
    }

    /// All channels of the current block, mutably
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let frames = self.frames;
        self.channels.iter_mut().map(move |c| &mut c[..frames])
    }
}
