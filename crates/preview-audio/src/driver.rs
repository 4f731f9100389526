//! Audio sink driver thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use preview_ipc::{Dequeue, QueueConsumer};

use crate::chunk::{AudioChunk, PcmFormat};
use crate::error::AudioError;
use crate::{AudioResult, SinkFactory};

/// Owns the thread that feeds queued chunks to an audio sink.
///
/// The sink is opened on the driver thread and dropped there when the
/// thread ends, which releases the device.
pub struct SinkDriver {
    handle: Option<JoinHandle<AudioResult<u64>>>,
    played: Arc<AtomicU64>,
}

impl SinkDriver {
    /// Start the driver.
    ///
    /// Chunks are taken from `consumer` with a wait of `poll` and played
    /// strictly in queue order. The thread ends when `stop` is raised or
    /// the queue is closed and drained.
    #[instrument(name = "sink_driver_start", skip_all)]
    pub fn spawn(
        consumer: QueueConsumer<AudioChunk>,
        format: PcmFormat,
        factory: SinkFactory,
        poll: Duration,
        stop: Arc<AtomicBool>,
    ) -> AudioResult<Self> {
        let played = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&played);

        let handle = thread::Builder::new()
            .name("audio-sink".to_string())
            .spawn(move || {
                let result = drive(consumer, format, factory, poll, &stop, &counter);
                if let Err(e) = &result {
                    error!("Audio sink driver failed: {}", e);
                }
                result
            })?;

        Ok(Self {
            handle: Some(handle),
            played,
        })
    }

    /// Chunks handed to the sink so far.
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    /// Shared played counter, for metrics.
    pub fn played_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.played)
    }

    /// Check if the driver thread has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the driver thread and return its outcome. Later calls
    /// return the played count without waiting.
    pub fn join(&mut self) -> AudioResult<u64> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| AudioError::DriverPanicked)?,
            None => Ok(self.played()),
        }
    }
}

fn drive(
    consumer: QueueConsumer<AudioChunk>,
    format: PcmFormat,
    factory: SinkFactory,
    poll: Duration,
    stop: &AtomicBool,
    played: &AtomicU64,
) -> AudioResult<u64> {
    let mut sink = factory(&format)?;
    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        "Audio output opened"
    );

    while !stop.load(Ordering::Relaxed) {
        match consumer.pop_timeout(poll) {
            Dequeue::Item(chunk) => {
                if !chunk.is_valid(&format) {
                    return Err(AudioError::InvalidChunk {
                        len: chunk.data.len(),
                        frame_bytes: format.frame_bytes(),
                    });
                }
                sink.play(&chunk)?;
                played.fetch_add(1, Ordering::Relaxed);
            }
            Dequeue::Empty => {}
            Dequeue::Closed => {
                debug!("Audio queue closed and drained");
                break;
            }
        }
    }

    let total = played.load(Ordering::Relaxed);
    info!(played = total, "Audio sink driver stopped");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use preview_ipc::bounded_queue;

    use crate::AudioSink;

    struct RecordingSink {
        played: Arc<Mutex<Vec<u64>>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, chunk: &AudioChunk) -> AudioResult<()> {
            self.played.lock().push(chunk.sequence);
            Ok(())
        }
    }

    fn format() -> PcmFormat {
        PcmFormat {
            sample_rate: 44_100,
            channels: 2,
            sample_width: 2,
        }
    }

    fn chunk(sequence: u64) -> AudioChunk {
        AudioChunk::new(Bytes::from(vec![0u8; 16]), sequence)
    }

    fn recording_factory(played: &Arc<Mutex<Vec<u64>>>) -> SinkFactory {
        let played = Arc::clone(played);
        Box::new(move |_format: &PcmFormat| -> AudioResult<Box<dyn AudioSink>> {
            Ok(Box::new(RecordingSink { played }))
        })
    }

    #[test]
    fn test_plays_in_order_then_stops_on_close() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (producer, consumer) = bounded_queue(20);
        for seq in [1, 2, 3] {
            producer.push(chunk(seq));
        }
        drop(producer);

        let mut driver = SinkDriver::spawn(
            consumer,
            format(),
            recording_factory(&played),
            Duration::from_millis(10),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert_eq!(driver.join().unwrap(), 3);
        assert_eq!(*played.lock(), vec![1, 2, 3]);
        assert!(driver.is_finished());
        assert_eq!(driver.join().unwrap(), 3);
    }

    #[test]
    fn test_staggered_arrivals_play_in_order() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (producer, consumer) = bounded_queue(20);

        let mut driver = SinkDriver::spawn(
            consumer,
            format(),
            recording_factory(&played),
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        let feeder = thread::spawn(move || {
            for seq in [1, 2, 3] {
                thread::sleep(Duration::from_millis(25));
                producer.push(chunk(seq));
            }
        });
        feeder.join().unwrap();

        assert_eq!(driver.join().unwrap(), 3);
        assert_eq!(*played.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stop_flag_ends_idle_driver() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (producer, consumer) = bounded_queue::<AudioChunk>(4);
        let stop = Arc::new(AtomicBool::new(false));

        let mut driver = SinkDriver::spawn(
            consumer,
            format(),
            recording_factory(&played),
            Duration::from_millis(5),
            Arc::clone(&stop),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);

        assert_eq!(driver.join().unwrap(), 0);
        assert!(played.lock().is_empty());
        drop(producer);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let (_producer, consumer) = bounded_queue::<AudioChunk>(4);
        let factory: SinkFactory =
            Box::new(|_: &PcmFormat| -> AudioResult<Box<dyn AudioSink>> {
                Err(AudioError::NoOutputDevice)
            });

        let mut driver = SinkDriver::spawn(
            consumer,
            format(),
            factory,
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert!(matches!(driver.join(), Err(AudioError::NoOutputDevice)));
    }

    #[test]
    fn test_partial_frame_chunk_fails() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let (producer, consumer) = bounded_queue(4);
        producer.push(AudioChunk::new(Bytes::from(vec![0u8; 6]), 1));

        let mut driver = SinkDriver::spawn(
            consumer,
            format(),
            recording_factory(&played),
            Duration::from_millis(5),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();

        assert!(matches!(
            driver.join(),
            Err(AudioError::InvalidChunk { len: 6, frame_bytes: 4 })
        ));
        assert!(played.lock().is_empty());
        drop(producer);
    }
}
