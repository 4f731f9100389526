//! Fixed-size record framing over a raw byte stream.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::channel::{ClosedFlag, SourceChannel};
use crate::{SourceResult, EMPTY_READ_BACKOFF_MS};

/// Result of asking for the next record.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete record of exactly the configured size.
    Record(Bytes),

    /// The stop signal was raised.
    Cancelled,

    /// The channel is closed and no complete record remains.
    EndOfStream,
}

/// Reads exactly `record_size` bytes at a time from a source channel.
///
/// Short reads are accumulated until a record is complete. A read of zero
/// bytes only ends the stream once the channel's closed flag is raised;
/// before that the reader backs off briefly and tries again. A trailing
/// partial record at end of stream is discarded.
pub struct FixedSizeReader {
    reader: Box<dyn Read + Send>,
    closed: ClosedFlag,
    record_size: usize,
    buffer: BytesMut,
    filled: usize,
    empty_reads: u64,
    backoff: Duration,
}

impl FixedSizeReader {
    /// Frame `channel` into records of `record_size` bytes.
    pub fn new(channel: SourceChannel, record_size: usize) -> Self {
        Self {
            reader: channel.reader,
            closed: channel.closed,
            record_size,
            buffer: BytesMut::zeroed(record_size),
            filled: 0,
            empty_reads: 0,
            backoff: Duration::from_millis(EMPTY_READ_BACKOFF_MS),
        }
    }

    /// Record size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Reads that returned no bytes while the channel was still open.
    pub fn empty_reads(&self) -> u64 {
        self.empty_reads
    }

    /// Read the next complete record.
    ///
    /// `stop` is checked before every read. A read that is already blocked
    /// is only interrupted by the producer closing its end.
    pub fn next_record(&mut self, stop: &Arc<AtomicBool>) -> SourceResult<ReadOutcome> {
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(ReadOutcome::Cancelled);
            }

            match self.reader.read(&mut self.buffer[self.filled..]) {
                Ok(0) => {
                    if self.closed.is_set() {
                        if self.filled > 0 {
                            trace!(
                                partial = self.filled,
                                record_size = self.record_size,
                                "Discarding partial record at end of stream"
                            );
                        }
                        return Ok(ReadOutcome::EndOfStream);
                    }
                    self.empty_reads += 1;
                    thread::sleep(self.backoff);
                }
                Ok(n) => {
                    self.filled += n;
                    if self.filled == self.record_size {
                        self.filled = 0;
                        let record = self.buffer.split().freeze();
                        self.buffer.resize(self.record_size, 0);
                        return Ok(ReadOutcome::Record(record));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Hands out one scripted read result per call.
    struct ScriptedReader {
        script: VecDeque<Vec<u8>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.script.pop_front() {
                Some(step) => {
                    let n = step.len().min(buf.len());
                    buf[..n].copy_from_slice(&step[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    fn closed_channel(data: Vec<u8>) -> SourceChannel {
        let channel = SourceChannel::new(Cursor::new(data));
        channel.closed.mark();
        channel
    }

    fn no_stop() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_exact_records_then_end_of_stream() {
        let data: Vec<u8> = (0..12).collect();
        let mut reader = FixedSizeReader::new(closed_channel(data), 4);
        let stop = no_stop();

        for start in [0u8, 4, 8] {
            let expected: Vec<u8> = (start..start + 4).collect();
            assert_eq!(
                reader.next_record(&stop).unwrap(),
                ReadOutcome::Record(Bytes::from(expected))
            );
        }
        assert_eq!(reader.next_record(&stop).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_partial_trailing_record_is_discarded() {
        let mut reader = FixedSizeReader::new(closed_channel(vec![1; 10]), 4);
        let stop = no_stop();

        assert!(matches!(reader.next_record(&stop).unwrap(), ReadOutcome::Record(_)));
        assert!(matches!(reader.next_record(&stop).unwrap(), ReadOutcome::Record(_)));
        assert_eq!(reader.next_record(&stop).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_short_and_empty_reads_accumulate() {
        let closed = ClosedFlag::new();
        let script = ScriptedReader {
            script: VecDeque::from(vec![vec![1, 2], vec![], vec![3], vec![], vec![4, 5, 6]]),
        };
        let mut reader = FixedSizeReader::new(SourceChannel::with_flag(script, closed.clone()), 3);
        let stop = no_stop();

        assert_eq!(
            reader.next_record(&stop).unwrap(),
            ReadOutcome::Record(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(
            reader.next_record(&stop).unwrap(),
            ReadOutcome::Record(Bytes::from_static(&[4, 5, 6]))
        );
        assert_eq!(reader.empty_reads(), 2);

        closed.mark();
        assert_eq!(reader.next_record(&stop).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_open_channel_waits_for_close() {
        let closed = ClosedFlag::new();
        let channel = SourceChannel::with_flag(std::io::empty(), closed.clone());
        let mut reader = FixedSizeReader::new(channel, 8);

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            closed.mark();
        });

        assert_eq!(reader.next_record(&no_stop()).unwrap(), ReadOutcome::EndOfStream);
        assert!(reader.empty_reads() > 0);
        closer.join().unwrap();
    }

    #[test]
    fn test_stop_cancels() {
        let channel = SourceChannel::new(std::io::repeat(0));
        let mut reader = FixedSizeReader::new(channel, 16);
        let stop = Arc::new(AtomicBool::new(true));

        assert_eq!(reader.next_record(&stop).unwrap(), ReadOutcome::Cancelled);
    }

    #[test]
    fn test_records_do_not_alias() {
        let mut data = vec![7u8; 4];
        data.extend_from_slice(&[9u8; 4]);
        let mut reader = FixedSizeReader::new(closed_channel(data), 4);
        let stop = no_stop();

        let first = match reader.next_record(&stop).unwrap() {
            ReadOutcome::Record(bytes) => bytes,
            other => panic!("unexpected {other:?}"),
        };
        let second = match reader.next_record(&stop).unwrap() {
            ReadOutcome::Record(bytes) => bytes,
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(&first[..], &[7, 7, 7, 7]);
        assert_eq!(&second[..], &[9, 9, 9, 9]);
    }
}
