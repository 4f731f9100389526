//! Sample reader thread.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::info;

use preview_ipc::{AudioSettings, QueueProducer};
use preview_source::{pump_records, FixedSizeReader, ReaderSummary, SourceChannel};

use crate::chunk::AudioChunk;
use crate::AudioResult;

/// Start a thread that reads whole PCM chunks from `channel` into
/// `producer`, dropping new chunks while the queue is full.
pub fn spawn_sample_reader(
    channel: SourceChannel,
    settings: &AudioSettings,
    producer: QueueProducer<AudioChunk>,
    stop: Arc<AtomicBool>,
) -> AudioResult<JoinHandle<ReaderSummary>> {
    let reader = FixedSizeReader::new(channel, settings.chunk_size());

    info!(
        sample_rate = settings.sample_rate,
        channels = settings.channels,
        chunk_size = reader.record_size(),
        "Starting sample reader"
    );

    let handle = thread::Builder::new()
        .name("sample-reader".to_string())
        .spawn(move || pump_records("audio", reader, producer, stop, AudioChunk::new))?;

    Ok(handle)
}
