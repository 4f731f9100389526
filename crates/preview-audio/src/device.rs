//! cpal output device sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use tracing::{error, info, instrument};

use crate::chunk::{AudioChunk, PcmFormat};
use crate::error::AudioError;
use crate::{AudioResult, AudioSink};

const I16_TO_F32: f32 = 1.0 / 32768.0;

/// Device buffer length, in milliseconds of audio.
const BUFFER_MS: usize = 200;

/// How long `play` waits for room before declaring the device stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Samples shared between `play` and the device callback.
struct SampleBuffer {
    samples: Mutex<VecDeque<f32>>,
    drained: Condvar,
    failure: Mutex<Option<String>>,
}

impl SampleBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            drained: Condvar::new(),
            failure: Mutex::new(None),
        }
    }

    /// Fill `output` from the buffer, padding with silence on underrun.
    fn read_into(&self, output: &mut [f32]) {
        let mut samples = self.samples.lock();
        let available = samples.len().min(output.len());
        for (slot, sample) in output.iter_mut().zip(samples.drain(..available)) {
            *slot = sample;
        }
        output[available..].fill(0.0);
        drop(samples);
        self.drained.notify_all();
    }
}

/// Plays PCM on the default output device.
///
/// Samples are converted to f32 and appended to a buffer that the device
/// callback drains. `play` blocks while the buffer has no room for the
/// chunk.
pub struct CpalSink {
    buffer: Arc<SampleBuffer>,
    capacity: usize,
    _stream: cpal::Stream,
}

impl CpalSink {
    /// Open the default output device with `format`.
    #[instrument(name = "cpal_sink_open", skip_all, fields(rate = format.sample_rate, channels = format.channels))]
    pub fn open(format: &PcmFormat) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = (format.sample_rate as usize * format.channels as usize * BUFFER_MS / 1000)
            .max(format.channels as usize);
        let buffer = Arc::new(SampleBuffer::new(capacity));
        let callback_buffer = Arc::clone(&buffer);
        let error_buffer = Arc::clone(&buffer);

        let stream = device.build_output_stream(
            &config,
            move |output: &mut [f32], _| callback_buffer.read_into(output),
            move |err| {
                error!("Audio output error: {}", err);
                *error_buffer.failure.lock() = Some(err.to_string());
                error_buffer.drained.notify_all();
            },
            None,
        )?;
        stream.play()?;

        info!(capacity, "Audio output stream started");

        Ok(Self {
            buffer,
            capacity,
            _stream: stream,
        })
    }

    /// Boxed opener usable as a sink factory.
    pub fn open_boxed(format: &PcmFormat) -> AudioResult<Box<dyn AudioSink>> {
        Ok(Box::new(Self::open(format)?))
    }
}

impl AudioSink for CpalSink {
    fn play(&mut self, chunk: &AudioChunk) -> AudioResult<()> {
        let converted: Vec<f32> = chunk.samples().map(|s| s as f32 * I16_TO_F32).collect();
        // A chunk larger than the buffer waits for it to empty.
        let needed = converted.len().min(self.capacity);
        let deadline = Instant::now() + STALL_TIMEOUT;

        let mut samples = self.buffer.samples.lock();
        while samples.len() + needed > self.capacity {
            if let Some(message) = self.buffer.failure.lock().clone() {
                return Err(AudioError::Device(message));
            }
            if self
                .buffer
                .drained
                .wait_until(&mut samples, deadline)
                .timed_out()
            {
                return Err(AudioError::Stalled(STALL_TIMEOUT.as_millis() as u64));
            }
        }
        samples.extend(converted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underrun_pads_with_silence() {
        let buffer = SampleBuffer::new(8);
        buffer.samples.lock().extend([0.5f32, -0.5, 0.25]);

        let mut output = [1.0f32; 5];
        buffer.read_into(&mut output);

        assert_eq!(output, [0.5, -0.5, 0.25, 0.0, 0.0]);
        assert!(buffer.samples.lock().is_empty());
    }

    #[test]
    fn test_read_keeps_remaining_samples_in_order() {
        let buffer = SampleBuffer::new(8);
        buffer.samples.lock().extend([1.0f32, 2.0, 3.0, 4.0]);

        let mut output = [0.0f32; 2];
        buffer.read_into(&mut output);

        assert_eq!(output, [1.0, 2.0]);
        assert_eq!(buffer.samples.lock().iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0]);
    }
}
