//! Session context
//!
//! Owns everything the control domain manages: configuration, the audio
//! streams, the unit lifecycle and the meters. There is exactly one per
//! running application, passed around explicitly.

use std::sync::Arc;

use crate::audio::engine::{AudioEngine, AudioEngineHandle};
use crate::audio::level::MIN_DB;
use crate::audio::lifecycle::{LifecycleObserver, LifecycleState, UnitLifecycle, UnitSlot};
use crate::audio::meter::{LevelMeter, MeterStyle};
use crate::audio::scan::{begin_scan, PendingScan, ScanRequest};
use crate::audio::stream::DuplexStream;
use crate::audio::unit::{ScanResult, UnitProvider};
use crate::config::SessionConfig;
use crate::error::{AudioResult, UnitResult};

/// One meter tick's worth of display values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    /// Loudest level since the previous tick, dB
    pub level: f32,
    pub vertical: f32,
    pub horizontal: f32,
}

pub struct Session {
    config: SessionConfig,
    slot: Arc<UnitSlot>,
    /// Handle of the most recently created engine
    engine: Option<AudioEngineHandle>,
    lifecycle: UnitLifecycle,
    stream: Option<DuplexStream>,
    provider: Arc<dyn UnitProvider>,
    vertical: LevelMeter,
    horizontal: LevelMeter,
    sample_rate: f64,
    block_size: usize,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn UnitProvider>,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Self {
        let slot = Arc::new(UnitSlot::new());
        let lifecycle = UnitLifecycle::new(Arc::clone(&slot), observer);

        Self {
            sample_rate: config.sample_rate as f64,
            block_size: config.block_size,
            config,
            slot,
            engine: None,
            lifecycle,
            stream: None,
            provider,
            vertical: LevelMeter::new(MeterStyle::Vertical),
            horizontal: LevelMeter::new(MeterStyle::Horizontal),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> Option<&AudioEngineHandle> {
        self.engine.as_ref()
    }

    pub fn unit_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.lifecycle.unit_name()
    }

    pub fn is_audio_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Format units are prepared with: the running stream's, else the config's
    pub fn format(&self) -> (f64, usize) {
        (self.sample_rate, self.block_size)
    }

    pub fn meters(&self) -> (&LevelMeter, &LevelMeter) {
        (&self.vertical, &self.horizontal)
    }

    /// Open the configured devices and start processing
    pub fn start_audio(&mut self) -> AudioResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (engine, handle) = AudioEngine::new(Arc::clone(&self.slot));
        let stream = DuplexStream::open(engine, &self.config)?;
        self.sample_rate = stream.sample_rate() as f64;
        self.block_size = stream.block_size();
        self.engine = Some(handle);
        self.stream = Some(stream);
        Ok(())
    }

    /// Create an engine driven by the caller instead of a device stream
    ///
    /// The engine is started at the given format and shares this session's
    /// unit slot, level channel and diagnostics.
    pub fn detached_engine(&mut self, sample_rate: f64, block_size: usize) -> AudioEngine {
        let (mut engine, handle) = AudioEngine::new(Arc::clone(&self.slot));
        engine.about_to_start(sample_rate, block_size);
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.engine = Some(handle);
        engine
    }

    /// Stop the streams, then release the unit
    pub fn stop_audio(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.lifecycle.teardown();
    }

    /// Start a background scan at the current format
    pub fn begin_scan(&self) -> PendingScan {
        begin_scan(
            Arc::clone(&self.provider),
            ScanRequest {
                sample_rate: self.sample_rate,
                block_size: self.block_size,
                delay: self.config.scan_delay(),
            },
        )
    }

    /// Install a scanned unit, replacing any active one
    ///
    /// Failures are reported to the observer; audio keeps passing through.
    pub fn apply_scan_result(&mut self, result: ScanResult) -> UnitResult<()> {
        if self.lifecycle.state() != LifecycleState::Absent {
            self.lifecycle.teardown();
        }
        self.lifecycle
            .apply_scan_result(result, self.sample_rate, self.block_size)
    }

    /// Feed both meters the loudest level since the last tick and start a
    /// new window
    pub fn meter_tick(&mut self) -> MeterReading {
        let level = self.engine.as_ref().map_or(MIN_DB, |engine| engine.take_level());
        MeterReading {
            level,
            vertical: self.vertical.set_level(level),
            horizontal: self.horizontal.set_level(level),
        }
    }

    /// Log anomalies queued by the audio thread
    pub fn drain_diagnostics(&self) -> usize {
        self.engine.as_ref().map_or(0, |engine| {
            engine.drain_diagnostics(|anomaly| log::warn!("Audio callback: {}", anomaly))
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_audio();
    }
}
