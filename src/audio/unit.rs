//! Processing unit interface
//!
//! A processing unit is an externally supplied signal processor (a CLAP
//! plugin in practice). Providers locate and instantiate units; the
//! lifecycle prepares and activates them; the engine only ever calls
//! [`ProcessingUnit::process`].

use super::buffer::UnitBuffer;
use crate::error::{UnitError, UnitResult};

/// Channel counts negotiated with a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub inputs: u32,
    pub outputs: u32,
}

impl ChannelLayout {
    pub const STEREO: Self = Self { inputs: 2, outputs: 2 };

    pub fn new(inputs: u32, outputs: u32) -> Self {
        Self { inputs, outputs }
    }

    /// Whether the layout can be driven as stereo in / stereo out
    pub fn is_stereo(&self) -> bool {
        self.inputs == 2 && self.outputs == 2
    }

    /// Channels needed in the scratch buffer
    pub fn buffer_channels(&self) -> usize {
        self.inputs.max(self.outputs) as usize
    }
}

/// Outcome of one `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    Failed,
}

/// A dynamically supplied signal processor
///
/// `prepare` and `release` are called from the control domain only;
/// `process` is called from the audio thread only and must not allocate,
/// block or panic.
pub trait ProcessingUnit: Send {
    fn name(&self) -> &str;

    /// Allocate internal resources and report the channel layout the unit
    /// will run with. Stereo is requested; a unit that cannot do stereo
    /// returns its best layout and is rejected by the lifecycle.
    fn prepare(&mut self, sample_rate: f64, block_size: usize) -> UnitResult<ChannelLayout>;

    /// Process the current block of `buffer` in place with no control events
    fn process(&mut self, buffer: &mut UnitBuffer) -> ProcessStatus;

    /// Free internal resources. Must tolerate being called without `prepare`
    /// and being called more than once.
    fn release(&mut self);
}

/// Result of the scan workflow, consumed exactly once by the lifecycle
pub enum ScanResult {
    NotFound { searched: usize },
    InstantiationFailed(UnitError),
    Ready(Box<dyn ProcessingUnit>),
}

impl ScanResult {
    pub fn describe(&self) -> String {
        match self {
            Self::NotFound { searched } => format!("not found ({} location(s) searched)", searched),
            Self::InstantiationFailed(err) => format!("instantiation failed: {}", err),
            Self::Ready(unit) => format!("ready: {}", unit.name()),
        }
    }
}

impl std::fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScanResult({})", self.describe())
    }
}

/// Locates and instantiates a processing unit (control domain, may block)
pub trait UnitProvider: Send + Sync {
    fn scan(&self, sample_rate: f64, block_size: usize) -> ScanResult;
}
