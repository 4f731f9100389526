//! Frame reader thread.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use preview_ipc::{QueueProducer, VideoSettings};
use preview_source::{pump_records, FixedSizeReader, ReaderSummary, SourceChannel};

use crate::frame::VideoFrame;
use crate::VideoResult;

/// Start a thread that reads whole frames from `channel` into `producer`.
///
/// Only complete `width * height * 3` byte frames are ever queued. A full
/// queue drops the new frame. The thread ends at end of stream, when `stop`
/// is raised, or when the consumer goes away, and returns what it did.
pub fn spawn_frame_reader(
    channel: SourceChannel,
    settings: &VideoSettings,
    producer: QueueProducer<VideoFrame>,
    stop: Arc<AtomicBool>,
) -> VideoResult<JoinHandle<ReaderSummary>> {
    let (width, height) = (settings.width, settings.height);
    let reader = FixedSizeReader::new(channel, settings.frame_size());

    info!(width, height, frame_size = reader.record_size(), "Starting frame reader");

    let handle = thread::Builder::new()
        .name("frame-reader".to_string())
        .spawn(move || {
            pump_records("video", reader, producer, stop, |data, sequence| {
                VideoFrame::new(data, width, height, sequence)
            })
        })?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use preview_ipc::{bounded_queue, Dequeue};
    use preview_source::ReaderExit;

    fn settings(width: u32, height: u32) -> VideoSettings {
        VideoSettings {
            width,
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_full_frames_are_queued() {
        let settings = settings(4, 2);
        let frame_size = settings.frame_size();
        let mut data: Vec<u8> = (0..3 * frame_size).map(|i| (i / frame_size) as u8).collect();
        data.extend_from_slice(&[0xff; 5]);

        let channel = SourceChannel::new(Cursor::new(data));
        channel.closed.mark();
        let (producer, consumer) = bounded_queue(10);

        let handle = spawn_frame_reader(
            channel,
            &settings,
            producer,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let summary = handle.join().unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.exit, ReaderExit::EndOfStream);

        for expected in 0..3u8 {
            match consumer.try_pop() {
                Dequeue::Item(frame) => {
                    assert!(frame.is_valid());
                    assert_eq!(frame.sequence, expected as u64 + 1);
                    assert!(frame.data.iter().all(|&b| b == expected));
                }
                other => panic!("expected frame, got {other:?}"),
            }
        }
        assert_eq!(consumer.try_pop(), Dequeue::Closed);
    }

    #[test]
    fn test_stalled_consumer_keeps_first_ten() {
        let settings = settings(2, 2);
        let frame_size = settings.frame_size();
        let data: Vec<u8> = (0..15 * frame_size)
            .map(|i| (i / frame_size + 1) as u8)
            .collect();

        let channel = SourceChannel::new(Cursor::new(data));
        channel.closed.mark();
        let (producer, consumer) = bounded_queue(10);

        let summary = spawn_frame_reader(
            channel,
            &settings,
            producer,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
        .join()
        .unwrap();

        assert_eq!(summary.records, 15);
        assert_eq!(summary.dropped, 5);

        let kept: Vec<u64> = std::iter::from_fn(|| match consumer.try_pop() {
            Dequeue::Item(frame) => Some(frame.sequence),
            _ => None,
        })
        .collect();
        assert_eq!(kept, (1..=10).collect::<Vec<_>>());
    }
}
