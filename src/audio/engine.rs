//! Real-time audio callback engine
//!
//! [`AudioEngine`] is owned by the audio thread and invoked once per hardware
//! block. Each invocation routes the first input channel either straight to
//! the first two outputs or through the active processing unit, then feeds
//! the level channel. Nothing here allocates, locks or logs; problems are
//! pushed to a pre-allocated diagnostics queue that [`AudioEngineHandle`]
//! drains from the control domain.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::level::{detect_level, MIN_DB};
use super::level_channel::LevelChannel;
use super::lifecycle::UnitSlot;
use super::unit::ProcessStatus;

/// Capacity of the audio-thread diagnostics queue
const DIAGNOSTICS_CAPACITY: usize = 64;

/// A per-block problem that was absorbed by degrading the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAnomaly {
    /// Fewer than 1 input or 2 output channels; outputs left untouched
    TooFewChannels { inputs: usize, outputs: usize },
    /// Zero-length block
    EmptyBlock,
    /// A channel slice shorter than the block; outputs left untouched
    ShortBuffer { frames: usize },
    /// Block longer than the unit's scratch buffer; passed through instead
    BlockTooLarge { frames: usize, capacity: usize },
    /// The unit reported a processing error; block output is silence
    UnitFailed,
}

impl std::fmt::Display for BlockAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewChannels { inputs, outputs } => write!(
                f,
                "need at least 1 input and 2 outputs, got {} in / {} out",
                inputs, outputs
            ),
            Self::EmptyBlock => write!(f, "empty block"),
            Self::ShortBuffer { frames } => {
                write!(f, "channel buffer shorter than block of {} frames", frames)
            }
            Self::BlockTooLarge { frames, capacity } => write!(
                f,
                "block of {} frames exceeds unit buffer of {}, passing through",
                frames, capacity
            ),
            Self::UnitFailed => write!(f, "processing unit failed, block silenced"),
        }
    }
}

/// State shared between the audio thread and the control domain
struct EngineShared {
    slot: Arc<UnitSlot>,
    levels: LevelChannel,
    running: AtomicBool,
    blocks: AtomicU64,
}

/// Audio-thread side of the engine
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    diagnostics: ringbuf::HeapProd<BlockAnomaly>,
    last_anomaly: Option<BlockAnomaly>,
    sample_rate: f64,
    block_size: usize,
}

impl AudioEngine {
    /// Create the engine and its control handle around a unit slot
    pub fn new(slot: Arc<UnitSlot>) -> (Self, AudioEngineHandle) {
        let shared = Arc::new(EngineShared {
            slot,
            levels: LevelChannel::new(),
            running: AtomicBool::new(false),
            blocks: AtomicU64::new(0),
        });
        let (producer, consumer) = HeapRb::new(DIAGNOSTICS_CAPACITY).split();

        let engine = Self {
            shared: Arc::clone(&shared),
            diagnostics: producer,
            last_anomaly: None,
            sample_rate: 0.0,
            block_size: 0,
        };
        let handle = AudioEngineHandle {
            shared,
            diagnostics: Arc::new(Mutex::new(consumer)),
        };
        (engine, handle)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Called by the stream before the first block. Restarts the level window.
    pub fn about_to_start(&mut self, sample_rate: f64, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.last_anomaly = None;
        self.shared.levels.publish(MIN_DB);
        self.shared.running.store(true, Ordering::Release);
    }

    /// Called by the stream once no further blocks will arrive
    pub fn stopped(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.levels.publish(MIN_DB);
    }

    /// Process one hardware block
    ///
    /// `inputs` and `outputs` hold one slice per channel; each should be at
    /// least `num_frames` long. Invalid blocks leave the outputs as they were.
    pub fn io_callback(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], num_frames: usize) {
        self.shared.blocks.fetch_add(1, Ordering::Relaxed);

        let anomaly = self.route(inputs, outputs, num_frames);
        self.report(anomaly);

        let fresh = match inputs.first() {
            Some(channel) if num_frames > 0 && channel.len() >= num_frames => {
                detect_level(&channel[..num_frames])
            }
            _ => MIN_DB,
        };
        self.update_level(fresh);
    }

    fn route(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        num_frames: usize,
    ) -> Option<BlockAnomaly> {
        if inputs.is_empty() || outputs.len() < 2 {
            return Some(BlockAnomaly::TooFewChannels {
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }
        if num_frames == 0 {
            return Some(BlockAnomaly::EmptyBlock);
        }
        if inputs[0].len() < num_frames || outputs[..2].iter().any(|o| o.len() < num_frames) {
            return Some(BlockAnomaly::ShortBuffer { frames: num_frames });
        }

        let input = &inputs[0][..num_frames];

        // One snapshot of the lifecycle for the whole block
        let Some(mut guard) = self.shared.slot.acquire() else {
            passthrough(input, outputs);
            return None;
        };
        let prepared = &mut *guard;

        let capacity = prepared.buffer.capacity();
        if !prepared.buffer.set_frames(num_frames) {
            passthrough(input, outputs);
            return Some(BlockAnomaly::BlockTooLarge {
                frames: num_frames,
                capacity,
            });
        }

        for output in outputs.iter_mut() {
            let n = output.len().min(num_frames);
            output[..n].fill(0.0);
        }

        prepared.buffer.clear();
        prepared.buffer.copy_from(0, input);
        prepared.buffer.copy_from(1, input);

        match prepared.unit.process(&mut prepared.buffer) {
            ProcessStatus::Continue => {
                outputs[0][..num_frames].copy_from_slice(prepared.buffer.channel(0));
                outputs[1][..num_frames].copy_from_slice(prepared.buffer.channel(1));
                None
            }
            ProcessStatus::Failed => Some(BlockAnomaly::UnitFailed),
        }
    }

    /// Keep the loudest reading since the consumer last asked for a reset
    #[inline]
    fn update_level(&mut self, fresh: f32) {
        self.shared.levels.accumulate(fresh);
    }

    /// Queue an anomaly once per change of condition
    #[inline]
    fn report(&mut self, anomaly: Option<BlockAnomaly>) {
        if anomaly != self.last_anomaly {
            if let Some(a) = anomaly {
                // Dropped if the control domain is not draining; never blocks
                let _ = self.diagnostics.try_push(a);
            }
            self.last_anomaly = anomaly;
        }
    }
}

/// Mono-to-stereo copy of the reference input
#[inline]
fn passthrough(input: &[f32], outputs: &mut [&mut [f32]]) {
    let n = input.len();
    outputs[0][..n].copy_from_slice(input);
    outputs[1][..n].copy_from_slice(input);
}

/// Control-domain side of the engine
#[derive(Clone)]
pub struct AudioEngineHandle {
    shared: Arc<EngineShared>,
    diagnostics: Arc<Mutex<ringbuf::HeapCons<BlockAnomaly>>>,
}

impl AudioEngineHandle {
    /// Latest published peak in dB
    pub fn current_level(&self) -> f32 {
        self.shared.levels.consume_latest()
    }

    /// Loudest level since the previous take; starts a new window
    pub fn take_level(&self) -> f32 {
        self.shared.levels.take_window()
    }

    /// Start a new peak window on the next block
    pub fn request_level_reset(&self) {
        self.shared.levels.request_reset();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Blocks processed since the engine was created
    pub fn blocks_processed(&self) -> u64 {
        self.shared.blocks.load(Ordering::Relaxed)
    }

    /// Hand every queued anomaly to `f`, returning how many there were
    pub fn drain_diagnostics<F: FnMut(BlockAnomaly)>(&self, mut f: F) -> usize {
        let mut consumer = self.diagnostics.lock();
        let mut count = 0;
        while let Some(anomaly) = consumer.try_pop() {
            f(anomaly);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::lifecycle::{LogObserver, UnitLifecycle};
    use crate::audio::unit::test_units::GainUnit;
    use rand::Rng;

    const FRAMES: usize = 256;

    fn engine() -> (AudioEngine, AudioEngineHandle, UnitLifecycle) {
        let slot = Arc::new(UnitSlot::new());
        let (mut engine, handle) = AudioEngine::new(Arc::clone(&slot));
        engine.about_to_start(44100.0, FRAMES);
        let lifecycle = UnitLifecycle::new(slot, Arc::new(LogObserver));
        (engine, handle, lifecycle)
    }

    fn random_block(rng: &mut impl Rng, frames: usize) -> Vec<f32> {
        (0..frames).map(|_| rng.gen_range(-1.0f32..=1.0)).collect()
    }

    fn drain(handle: &AudioEngineHandle) -> Vec<BlockAnomaly> {
        let mut anomalies = Vec::new();
        handle.drain_diagnostics(|a| anomalies.push(a));
        anomalies
    }

    #[test]
    fn test_passthrough_identity() {
        let (mut engine, handle, _lifecycle) = engine();
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let input = random_block(&mut rng, FRAMES);
            let mut left = vec![0.0f32; FRAMES];
            let mut right = vec![0.0f32; FRAMES];
            {
                let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
                engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
            }
            assert_eq!(left, input);
            assert_eq!(right, input);
        }
        assert!(drain(&handle).is_empty());
    }

    #[test]
    fn test_active_unit_processes_both_sides() {
        let (mut engine, handle, mut lifecycle) = engine();
        lifecycle.prepare(Box::new(GainUnit::new(0.5)), 44100.0, FRAMES).unwrap();
        lifecycle.activate().unwrap();

        let input: Vec<f32> = (0..FRAMES).map(|i| (i as f32 / FRAMES as f32) - 0.5).collect();
        let mut left = vec![1.0f32; FRAMES];
        let mut right = vec![1.0f32; FRAMES];
        let mut extra = vec![1.0f32; FRAMES];
        {
            let mut outputs: [&mut [f32]; 3] = [&mut left[..], &mut right[..], &mut extra[..]];
            engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
        }

        for i in 0..FRAMES {
            assert_eq!(left[i], input[i] * 0.5);
            assert_eq!(right[i], input[i] * 0.5);
        }
        // Outputs the unit does not feed are cleared
        assert!(extra.iter().all(|&s| s == 0.0));
        assert!(drain(&handle).is_empty());

        // Back to passthrough once torn down
        lifecycle.teardown();
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
        }
        assert_eq!(left, input);
    }

    #[test]
    fn test_graceful_degradation() {
        let (mut engine, handle, _lifecycle) = engine();
        let input = vec![0.5f32; FRAMES];
        let mut left = vec![0.25f32; FRAMES];
        let mut right = vec![0.25f32; FRAMES];

        // No input channels
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[], &mut outputs, FRAMES);
        }
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.25));

        // Only one output
        {
            let mut outputs: [&mut [f32]; 1] = [&mut left[..]];
            engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
        }
        assert!(left.iter().all(|&s| s == 0.25));

        // Zero frames
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..]], &mut outputs, 0);
        }
        assert!(left.iter().all(|&s| s == 0.25));

        // Input shorter than the block
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..10]], &mut outputs, FRAMES);
        }
        assert!(left.iter().all(|&s| s == 0.25));

        assert_eq!(
            drain(&handle),
            vec![
                BlockAnomaly::TooFewChannels { inputs: 0, outputs: 2 },
                BlockAnomaly::TooFewChannels { inputs: 1, outputs: 1 },
                BlockAnomaly::EmptyBlock,
                BlockAnomaly::ShortBuffer { frames: FRAMES },
            ]
        );
        // Metering still reads the input when routing is refused
        assert!((handle.current_level() - (-6.02)).abs() < 0.01);
    }

    #[test]
    fn test_persistent_anomaly_reported_once() {
        let (mut engine, handle, _lifecycle) = engine();
        let mut left = vec![0.0f32; FRAMES];
        for _ in 0..10 {
            let mut outputs: [&mut [f32]; 1] = [&mut left[..]];
            engine.io_callback(&[], &mut outputs, FRAMES);
        }
        assert_eq!(drain(&handle).len(), 1);
    }

    #[test]
    fn test_block_larger_than_unit_buffer() {
        let (mut engine, handle, mut lifecycle) = engine();
        lifecycle.prepare(Box::new(GainUnit::new(0.0)), 44100.0, 64).unwrap();
        lifecycle.activate().unwrap();

        let input = vec![0.3f32; 128];
        let mut left = vec![0.0f32; 128];
        let mut right = vec![0.0f32; 128];
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..]], &mut outputs, 128);
        }
        assert_eq!(left, input);
        assert_eq!(
            drain(&handle),
            vec![BlockAnomaly::BlockTooLarge { frames: 128, capacity: 64 }]
        );
    }

    #[test]
    fn test_level_window() {
        let (mut engine, handle, _lifecycle) = engine();
        let mut left = vec![0.0f32; FRAMES];
        let mut right = vec![0.0f32; FRAMES];
        let mut run = |engine: &mut AudioEngine, amplitude: f32| {
            let input = vec![amplitude; FRAMES];
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
        };

        run(&mut engine, 0.5);
        let loud = handle.current_level();
        assert!((loud - (-6.02)).abs() < 0.01);

        // A quieter block does not lower the window maximum
        run(&mut engine, 0.1);
        assert_eq!(handle.current_level(), loud);

        // After a reset the window restarts from the fresh reading
        handle.request_level_reset();
        run(&mut engine, 0.1);
        assert!((handle.current_level() - (-20.0)).abs() < 0.01);

        handle.request_level_reset();
        run(&mut engine, 0.0);
        assert_eq!(handle.current_level(), MIN_DB);

        // Taking the level arms the reset in the same step
        run(&mut engine, 0.1);
        assert!((handle.take_level() - (-20.0)).abs() < 0.01);
        run(&mut engine, 0.9);
        run(&mut engine, 0.0);
        assert!((handle.take_level() - (-0.92)).abs() < 0.01);
    }

    #[test]
    fn test_restart_resets_level_window() {
        let (mut engine, handle, _lifecycle) = engine();
        let input = vec![0.9f32; FRAMES];
        let mut left = vec![0.0f32; FRAMES];
        let mut right = vec![0.0f32; FRAMES];
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
            engine.io_callback(&[&input[..]], &mut outputs, FRAMES);
        }
        assert!(handle.current_level() > -1.0);
        assert!(handle.is_running());

        engine.stopped();
        assert!(!handle.is_running());
        engine.about_to_start(48000.0, 128);
        assert_eq!(handle.current_level(), MIN_DB);
        assert_eq!(engine.block_size(), 128);

        let quiet = vec![0.01f32; 128];
        {
            let mut outputs: [&mut [f32]; 2] = [&mut left[..128], &mut right[..128]];
            engine.io_callback(&[&quiet[..]], &mut outputs, 128);
        }
        assert!((handle.current_level() - (-40.0)).abs() < 0.01);
    }

    #[test]
    fn test_callbacks_during_lifecycle_cycles() {
        const BLOCK: usize = 64;
        let slot = Arc::new(UnitSlot::new());
        let (mut engine, handle) = AudioEngine::new(Arc::clone(&slot));
        engine.about_to_start(44100.0, BLOCK);
        let done = Arc::new(AtomicBool::new(false));

        let audio_done = Arc::clone(&done);
        let audio = std::thread::spawn(move || {
            let input = vec![0.8f32; BLOCK];
            let mut left = vec![0.0f32; BLOCK];
            let mut right = vec![0.0f32; BLOCK];
            while !audio_done.load(Ordering::SeqCst) {
                let mut outputs: [&mut [f32]; 2] = [&mut left[..], &mut right[..]];
                engine.io_callback(&[&input[..]], &mut outputs, BLOCK);
                // Either passthrough (0.8) or the gain unit (0.4), never anything else
                assert!(left.iter().all(|&s| s == 0.8 || s == 0.4));
                assert_eq!(left, right);
            }
        });

        let mut lifecycle = UnitLifecycle::new(slot, Arc::new(LogObserver));
        for _ in 0..300 {
            lifecycle.prepare(Box::new(GainUnit::new(0.5)), 44100.0, BLOCK).unwrap();
            lifecycle.activate().unwrap();
            std::thread::yield_now();
            lifecycle.teardown();
        }
        done.store(true, Ordering::SeqCst);
        audio.join().expect("audio thread panicked");

        assert!(handle.blocks_processed() > 0);
        assert!(drain(&handle).is_empty());
    }
}
