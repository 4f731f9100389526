//! Record pump shared by the frame and sample readers.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use preview_ipc::{Enqueue, QueueProducer};

use crate::framing::{FixedSizeReader, ReadOutcome};

/// Why a reader stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The channel closed.
    EndOfStream,

    /// The stop signal was raised.
    Cancelled,

    /// The consumer end of the queue was dropped.
    ConsumerGone,

    /// Reading the channel failed.
    Failed(String),
}

/// What a reader did over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSummary {
    /// Complete records read.
    pub records: u64,

    /// Records discarded because the queue was full.
    pub dropped: u64,

    /// Reads that returned no bytes while the channel was open.
    pub empty_reads: u64,

    /// Why the reader stopped.
    pub exit: ReaderExit,
}

/// Read records until end of stream, cancellation or failure, offering each
/// to `producer` without blocking. `wrap` turns a record and its sequence
/// number (starting at 1) into a queue item.
pub fn pump_records<T>(
    label: &'static str,
    mut reader: FixedSizeReader,
    producer: QueueProducer<T>,
    stop: Arc<AtomicBool>,
    mut wrap: impl FnMut(Bytes, u64) -> T,
) -> ReaderSummary {
    let mut records = 0u64;
    let mut dropped = 0u64;

    let exit = loop {
        match reader.next_record(&stop) {
            Ok(ReadOutcome::Record(bytes)) => {
                records += 1;
                match producer.push(wrap(bytes, records)) {
                    Enqueue::Accepted => {}
                    Enqueue::Dropped => {
                        dropped += 1;
                        trace!(reader = label, sequence = records, "Queue full, dropping");
                    }
                    Enqueue::Closed => break ReaderExit::ConsumerGone,
                }
            }
            Ok(ReadOutcome::Cancelled) => break ReaderExit::Cancelled,
            Ok(ReadOutcome::EndOfStream) => break ReaderExit::EndOfStream,
            Err(e) => {
                warn!(reader = label, "Read failed: {}", e);
                break ReaderExit::Failed(e.to_string());
            }
        }
    };

    let summary = ReaderSummary {
        records,
        dropped,
        empty_reads: reader.empty_reads(),
        exit,
    };
    debug!(reader = label, ?summary, "Reader finished");
    summary
}
