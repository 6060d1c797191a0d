//! cpal duplex bridge
//!
//! cpal opens input and output as separate streams. The input callback
//! pushes frames into a lock-free ring buffer; the output callback owns the
//! [`AudioEngine`], pulls input frames, and drives `io_callback` in
//! de-interleaved blocks of at most `block_size` frames.

use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

use super::buffer::StereoSample;
use super::device::{get_device, stream_config, Direction};
use super::engine::AudioEngine;
use crate::config::SessionConfig;
use crate::error::{AudioError, AudioResult};

/// Blocks of input the ring buffer can hold before frames are dropped
const INPUT_BUFFER_BLOCKS: usize = 8;

/// Output-callback state: owns the engine and its pre-allocated scratch
pub struct BlockBridge {
    engine: AudioEngine,
    input: HeapCons<StereoSample>,
    in_left: Vec<f32>,
    in_right: Vec<f32>,
    out_left: Vec<f32>,
    out_right: Vec<f32>,
    block_size: usize,
}

impl BlockBridge {
    pub fn new(engine: AudioEngine, input: HeapCons<StereoSample>, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            engine,
            input,
            in_left: vec![0.0; block_size],
            in_right: vec![0.0; block_size],
            out_left: vec![0.0; block_size],
            out_right: vec![0.0; block_size],
            block_size,
        }
    }

    /// Fill one interleaved hardware buffer
    ///
    /// Missing input frames are treated as silence. Output channels beyond
    /// the second are zeroed.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let total_frames = data.len() / channels;
        let mut offset = 0;

        while offset < total_frames {
            let n = (total_frames - offset).min(self.block_size);

            for i in 0..n {
                let frame = self.input.try_pop().unwrap_or_default();
                self.in_left[i] = frame.left;
                self.in_right[i] = frame.right;
            }
            self.out_left[..n].fill(0.0);
            self.out_right[..n].fill(0.0);

            {
                let inputs: [&[f32]; 2] = [&self.in_left[..n], &self.in_right[..n]];
                let mut outputs: [&mut [f32]; 2] =
                    [&mut self.out_left[..n], &mut self.out_right[..n]];
                self.engine.io_callback(&inputs, &mut outputs, n);
            }

            let block = &mut data[offset * channels..(offset + n) * channels];
            for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
                frame[0] = self.out_left[i];
                if channels > 1 {
                    frame[1] = self.out_right[i];
                }
                for extra in frame.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }

            offset += n;
        }
    }
}

/// Push one interleaved input buffer as stereo frames
///
/// Mono input is duplicated to both sides; channels past the second are
/// ignored. Frames are dropped if the output side has stalled.
fn push_input_frames(producer: &mut HeapProd<StereoSample>, data: &[f32], channels: usize) {
    if channels == 0 {
        return;
    }
    for chunk in data.chunks_exact(channels) {
        let frame = if channels == 1 {
            StereoSample::mono(chunk[0])
        } else {
            StereoSample::new(chunk[0], chunk[1])
        };
        let _ = producer.try_push(frame);
    }
}

impl Drop for BlockBridge {
    fn drop(&mut self) {
        // Dropped with the output stream; no further blocks will arrive
        self.engine.stopped();
    }
}

/// Running input and output streams
pub struct DuplexStream {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    input_device: String,
    output_device: String,
    sample_rate: u32,
    block_size: usize,
}

impl DuplexStream {
    /// Open both devices named in `config` and start processing
    pub fn open(mut engine: AudioEngine, config: &SessionConfig) -> AudioResult<Self> {
        let input_device = get_device(Direction::Input, config.input_device.as_deref())?;
        let output_device = get_device(Direction::Output, config.output_device.as_deref())?;
        let input_name = input_device.name().unwrap_or_else(|_| "Unknown".to_string());
        let output_name = output_device.name().unwrap_or_else(|_| "Unknown".to_string());

        let output_config = stream_config(
            &output_device,
            Direction::Output,
            config.sample_rate,
            config.block_size,
        )?;
        let input_config = stream_config(
            &input_device,
            Direction::Input,
            output_config.sample_rate.0,
            config.block_size,
        )?;

        if input_config.sample_rate != output_config.sample_rate {
            log::warn!(
                "Input runs at {} Hz but output at {} Hz; input will drift",
                input_config.sample_rate.0,
                output_config.sample_rate.0
            );
        }

        let sample_rate = output_config.sample_rate.0;
        let block_size = match output_config.buffer_size {
            cpal::BufferSize::Fixed(frames) => frames as usize,
            cpal::BufferSize::Default => config.block_size,
        };

        log::info!(
            "Opening duplex stream: '{}' ({} ch) -> '{}' ({} ch) at {} Hz, {} frames",
            input_name,
            input_config.channels,
            output_name,
            output_config.channels,
            sample_rate,
            block_size
        );

        let (mut producer, consumer) =
            HeapRb::<StereoSample>::new(block_size * INPUT_BUFFER_BLOCKS).split();

        let input_channels = input_config.channels as usize;
        let input_stream = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_input_frames(&mut producer, data, input_channels);
                },
                |err| log::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuild {
                direction: "input",
                reason: e.to_string(),
            })?;

        engine.about_to_start(sample_rate as f64, block_size);
        let mut bridge = BlockBridge::new(engine, consumer, block_size);
        let output_channels = output_config.channels as usize;

        let output_stream = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    bridge.render(data, output_channels);
                },
                |err| log::error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuild {
                direction: "output",
                reason: e.to_string(),
            })?;

        input_stream.play().map_err(|e| AudioError::StreamPlay {
            direction: "input",
            reason: e.to_string(),
        })?;
        output_stream.play().map_err(|e| AudioError::StreamPlay {
            direction: "output",
            reason: e.to_string(),
        })?;

        log::info!("Audio streams started");

        Ok(Self {
            input: Some(input_stream),
            output: Some(output_stream),
            input_device: input_name,
            output_device: output_name,
            sample_rate,
            block_size,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Stop both streams. Returns once the output callback can no longer run.
    pub fn stop(&mut self) {
        // Output first: dropping it drops the engine, marking it stopped
        if let Some(output) = self.output.take() {
            let _ = output.pause();
            drop(output);
            log::info!("Output stream stopped: {}", self.output_device);
        }
        if let Some(input) = self.input.take() {
            let _ = input.pause();
            drop(input);
            log::info!("Input stream stopped: {}", self.input_device);
        }
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::AudioEngineHandle;
    use crate::audio::lifecycle::UnitSlot;
    use std::sync::Arc;

    fn bridge(block_size: usize) -> (BlockBridge, HeapProd<StereoSample>, AudioEngineHandle) {
        let (mut engine, handle) = AudioEngine::new(Arc::new(UnitSlot::new()));
        engine.about_to_start(44100.0, block_size);
        let (producer, consumer) = HeapRb::<StereoSample>::new(1024).split();
        (BlockBridge::new(engine, consumer, block_size), producer, handle)
    }

    #[test]
    fn test_render_chunks_to_block_size() {
        let (mut bridge, mut producer, handle) = bridge(4);
        for i in 0..10 {
            let _ = producer.try_push(StereoSample::new(i as f32 * 0.1, 0.0));
        }

        let mut data = vec![9.0f32; 10 * 2];
        bridge.render(&mut data, 2);

        // Left input is routed to both outputs
        for i in 0..10 {
            let expected = i as f32 * 0.1;
            assert_eq!(data[i * 2], expected);
            assert_eq!(data[i * 2 + 1], expected);
        }
        // 4 + 4 + 2
        assert_eq!(handle.blocks_processed(), 3);
    }

    #[test]
    fn test_underrun_is_silence() {
        let (mut bridge, mut producer, _handle) = bridge(8);
        let _ = producer.try_push(StereoSample::mono(0.5));

        let mut data = vec![1.0f32; 4 * 2];
        bridge.render(&mut data, 2);
        assert_eq!(&data[..2], &[0.5, 0.5]);
        assert!(data[2..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_extra_output_channels_zeroed() {
        let (mut bridge, mut producer, _handle) = bridge(8);
        for _ in 0..4 {
            let _ = producer.try_push(StereoSample::mono(0.25));
        }

        let mut data = vec![1.0f32; 4 * 4];
        bridge.render(&mut data, 4);
        for frame in data.chunks(4) {
            assert_eq!(frame, &[0.25, 0.25, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_dropping_bridge_stops_engine() {
        let (bridge, _producer, handle) = bridge(8);
        assert!(handle.is_running());
        drop(bridge);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_push_input_frames() {
        let (mut producer, mut consumer) = HeapRb::<StereoSample>::new(16).split();

        // Mono is duplicated
        push_input_frames(&mut producer, &[0.1, 0.2], 1);
        assert_eq!(consumer.try_pop(), Some(StereoSample::mono(0.1)));
        assert_eq!(consumer.try_pop(), Some(StereoSample::mono(0.2)));

        // Only the first two of four channels are kept; a partial frame is ignored
        push_input_frames(&mut producer, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 4);
        assert_eq!(consumer.try_pop(), Some(StereoSample::new(0.1, 0.2)));
        assert_eq!(consumer.try_pop(), None);

        // A device reporting no channels yields nothing
        push_input_frames(&mut producer, &[0.1, 0.2], 0);
        assert_eq!(consumer.try_pop(), None);
    }
}
