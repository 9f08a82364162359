//! Buffered I/O over runs of fixed-stride binary records.
//!
//! Both cursors own a single scratch buffer for the whole pass, sized to
//! hold several records, so walking a table costs one allocation no matter
//! how many records it holds.

use crate::{Error, Result};
use std::io::{self, Read, Write};

/// Default number of bytes moved per underlying read or write call.
pub const BATCH_BYTES: usize = 4096;

/// How many whole records of `stride` bytes to buffer at once.
fn records_per_batch(stride: usize, count: usize, capacity: usize) -> usize {
    (capacity / stride).max(1).min(count.max(1))
}

/// Reads `count` records from a stream.
///
/// Each record may be followed by surplus bytes that are consumed but never
/// handed out. When a whole stride fits in the batch capacity the surplus is
/// buffered along with the record; otherwise records are pulled one at a
/// time and the surplus is discarded without being buffered.
pub struct BatchReader<'s, R: Read> {
    stream: &'s mut R,
    /// Bytes handed out per record.
    record: usize,
    /// Bytes after each record that are skipped in the stream, not buffered.
    surplus: u64,
    /// Distance between consecutive records in `buffer`.
    step: usize,
    /// Records still in the stream, not yet pulled into `buffer`.
    unfetched: usize,
    buffer: Vec<u8>,
    /// Offset of the next record in `buffer`.
    start: usize,
    /// Number of valid bytes in `buffer`.
    end: usize,
}

impl<'s, R: Read> BatchReader<'s, R> {
    pub fn new(stream: &'s mut R, stride: usize, count: usize) -> Self {
        Self::with_capacity(stream, stride, count, BATCH_BYTES)
    }

    /// Like [`BatchReader::new`], but buffers roughly `capacity` bytes per
    /// read instead of [`BATCH_BYTES`]. At least one record is always
    /// buffered.
    pub fn with_capacity(stream: &'s mut R, stride: usize, count: usize, capacity: usize) -> Self {
        Self::skipping(stream, stride, 0, count, capacity)
    }

    /// Reads records of `record + surplus` bytes each, handing out only the
    /// leading `record` bytes of every one.
    pub fn skipping(
        stream: &'s mut R,
        record: usize,
        surplus: u64,
        count: usize,
        capacity: usize,
    ) -> Self {
        assert!(record > 0, "record size must be non-zero");

        let stride = (record as u64).saturating_add(surplus);
        let (step, surplus, len) = if count == 0 {
            (record, surplus, 0)
        } else if stride <= capacity as u64 {
            let stride = stride as usize;
            (stride, 0, records_per_batch(stride, count, capacity) * stride)
        } else {
            (record, surplus, record)
        };

        Self {
            stream,
            record,
            surplus,
            step,
            unfetched: count,
            buffer: vec![0; len],
            start: 0,
            end: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.start < self.end || self.unfetched > 0
    }

    /// Returns a view of the next record. The view borrows the reader, so it
    /// is gone by the time `read_next` is called again and its bytes may be
    /// overwritten.
    ///
    /// # Panics
    ///
    /// Panics if called when [`BatchReader::has_next`] is `false`.
    pub fn read_next(&mut self) -> Result<&mut [u8]> {
        assert!(self.has_next(), "read past the last declared record");

        if self.start >= self.end {
            self.refill()?;
        }

        let start = self.start;
        self.start += self.step;
        Ok(&mut self.buffer[start..start + self.record])
    }

    fn refill(&mut self) -> Result<()> {
        let records = self.unfetched.min(self.buffer.len() / self.step);
        let wanted = records * self.step;
        let got = read_full(self.stream, &mut self.buffer[..wanted])?;

        let mut skipped = 0;
        if got == wanted && self.surplus > 0 {
            let mut surplus = (&mut *self.stream).take(self.surplus);
            skipped = io::copy(&mut surplus, &mut io::sink())?;
        }

        log::trace!("batch refill: {} records, {} bytes", records, got);
        if got < wanted || skipped < self.surplus {
            self.unfetched = 0;
            self.start = 0;
            self.end = 0;
            return Err(Error::Truncated {
                expected: (wanted as u64).saturating_add(self.surplus),
                actual: got as u64 + skipped,
            });
        }

        self.unfetched -= records;
        self.start = 0;
        self.end = wanted;
        Ok(())
    }
}

/// Fills as much of `buf` as the stream allows, stopping only at end of
/// stream. Returns the number of bytes read.
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes records of `stride` bytes each to a stream.
///
/// Buffered bytes are flushed when the writer is dropped, whichever way the
/// enclosing scope is left. Call [`BatchWriter::finish`] to observe flush
/// errors; a failed flush during drop can only be logged.
pub struct BatchWriter<'s, W: Write> {
    stream: &'s mut W,
    stride: usize,
    buffer: Vec<u8>,
    /// Number of pending bytes in `buffer`.
    len: usize,
}

impl<'s, W: Write> BatchWriter<'s, W> {
    pub fn new(stream: &'s mut W, stride: usize, count: usize) -> Self {
        Self::with_capacity(stream, stride, count, BATCH_BYTES)
    }

    pub fn with_capacity(stream: &'s mut W, stride: usize, count: usize, capacity: usize) -> Self {
        assert!(stride > 0, "record stride must be non-zero");

        let per_batch = records_per_batch(stride, count, capacity);
        Self {
            stream,
            stride,
            buffer: vec![0; per_batch * stride],
            len: 0,
        }
    }

    /// Reserves the next record and returns it zeroed, ready to be encoded
    /// in place.
    pub fn next_record(&mut self) -> Result<&mut [u8]> {
        if self.len + self.stride > self.buffer.len() {
            self.flush_buffer()?;
        }

        let start = self.len;
        self.len += self.stride;
        let slot = &mut self.buffer[start..start + self.stride];
        for b in slot.iter_mut() {
            *b = 0;
        }
        Ok(slot)
    }

    /// Appends an already-encoded record.
    ///
    /// # Panics
    ///
    /// Panics if `record` is not exactly one stride long.
    pub fn write_next(&mut self, record: &[u8]) -> Result<()> {
        assert_eq!(record.len(), self.stride, "record does not match stride");
        self.next_record()?.copy_from_slice(record);
        Ok(())
    }

    /// Flushes everything buffered so far, including the underlying stream.
    pub fn finish(mut self) -> Result<()> {
        self.flush_buffer()?;
        self.stream.flush()?;
        Ok(())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        // Pending bytes are handed off exactly once, even if the write fails.
        let pending = std::mem::replace(&mut self.len, 0);
        if pending > 0 {
            log::trace!("batch flush: {} bytes", pending);
            self.stream.write_all(&self.buffer[..pending])?;
        }
        Ok(())
    }
}

impl<'s, W: Write> Drop for BatchWriter<'s, W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            log::error!("failed to flush batched records: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn records(count: u8, stride: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| std::iter::repeat(i).take(stride))
            .collect()
    }

    #[test]
    fn reads_across_batches() {
        let mut stream = Cursor::new(records(5, 4));
        // Two records per refill, so five records take three reads.
        let mut batch = BatchReader::with_capacity(&mut stream, 4, 5, 8);

        let mut seen = Vec::new();
        while batch.has_next() {
            let record = batch.read_next().unwrap();
            seen.push(record[0]);
            assert!(record.iter().all(|&b| b == record[0]));
        }
        assert_eq!(seen, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn view_is_mutable_scratch() {
        let mut stream = Cursor::new(records(2, 2));
        let mut batch = BatchReader::new(&mut stream, 2, 2);

        let first = batch.read_next().unwrap();
        first[0] = 0xaa;
        assert_eq!(first, &[0xaa, 0]);
        assert_eq!(batch.read_next().unwrap(), &[1, 1]);
        assert!(!batch.has_next());
    }

    #[test]
    fn stops_at_declared_count() {
        let mut stream = Cursor::new(records(4, 4));
        let mut batch = BatchReader::new(&mut stream, 4, 2);

        batch.read_next().unwrap();
        batch.read_next().unwrap();
        assert!(!batch.has_next());
        assert_eq!(stream.position(), 8);
    }

    #[test]
    fn zero_records() {
        let mut stream = Cursor::new(Vec::new());
        let batch = BatchReader::new(&mut stream, 16, 0);
        assert!(!batch.has_next());
    }

    #[test]
    fn partial_trailing_record_is_an_error() {
        let mut bytes = records(2, 8);
        bytes.truncate(12);
        let mut stream = Cursor::new(bytes);
        let mut batch = BatchReader::with_capacity(&mut stream, 8, 2, 8);

        assert!(batch.read_next().is_ok());
        match batch.read_next() {
            Err(Error::Truncated { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 4);
            }
            other => panic!("expected truncation error, got {:?}", other.map(|r| r.to_vec())),
        }
        assert!(!batch.has_next());
    }

    #[test]
    fn surplus_is_skipped_without_buffering() {
        let mut bytes = Vec::new();
        for i in 0..3u8 {
            bytes.extend_from_slice(&[i, i]);
            bytes.extend_from_slice(&[0xee; 6]);
        }
        let mut stream = Cursor::new(bytes);
        // An 8-byte stride does not fit in 4 bytes, so only the record is kept.
        let mut batch = BatchReader::skipping(&mut stream, 2, 6, 3, 4);
        assert_eq!(batch.buffer.len(), 2);

        let mut seen = Vec::new();
        while batch.has_next() {
            seen.push(batch.read_next().unwrap().to_vec());
        }
        assert_eq!(seen, [[0, 0], [1, 1], [2, 2]]);
        assert_eq!(stream.position(), 24);
    }

    #[test]
    fn buffered_surplus_is_hidden() {
        let mut stream = Cursor::new(vec![1, 1, 9, 2, 2, 9]);
        let mut batch = BatchReader::skipping(&mut stream, 2, 1, 2, BATCH_BYTES);

        assert_eq!(batch.read_next().unwrap(), &[1, 1]);
        assert_eq!(batch.read_next().unwrap(), &[2, 2]);
        assert!(!batch.has_next());
    }

    #[test]
    fn huge_surplus_with_no_records_allocates_nothing() {
        let mut stream = Cursor::new(Vec::new());
        let batch = BatchReader::skipping(&mut stream, 16, 1 << 62, 0, BATCH_BYTES);
        assert!(batch.buffer.is_empty());
        assert!(!batch.has_next());
    }

    #[test]
    fn short_surplus_is_an_error() {
        let mut stream = Cursor::new(vec![1, 1, 9, 9, 9]);
        let mut batch = BatchReader::skipping(&mut stream, 2, 6, 1, 4);

        match batch.read_next() {
            Err(Error::Truncated { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 5);
            }
            other => panic!("expected truncation error, got {:?}", other.map(|r| r.to_vec())),
        }
    }

    #[test]
    #[should_panic(expected = "read past the last declared record")]
    fn reading_past_the_end_panics() {
        let mut stream = Cursor::new(records(1, 4));
        let mut batch = BatchReader::new(&mut stream, 4, 1);
        batch.read_next().unwrap();
        let _ = batch.read_next();
    }

    #[test]
    fn writer_flushes_on_finish() {
        let mut out = Vec::new();
        let mut batch = BatchWriter::with_capacity(&mut out, 2, 3, 4);
        batch.write_next(&[1, 1]).unwrap();
        batch.next_record().unwrap().copy_from_slice(&[2, 2]);
        batch.write_next(&[3, 3]).unwrap();
        batch.finish().unwrap();

        assert_eq!(out, [1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn writer_flushes_on_early_exit() {
        fn write_then_bail(out: &mut Vec<u8>) -> Result<()> {
            let mut batch = BatchWriter::new(out, 4, 8);
            batch.write_next(&[9, 9, 9, 9])?;
            Err(Error::Truncated {
                expected: 4,
                actual: 0,
            })
        }

        let mut out = Vec::new();
        assert!(write_then_bail(&mut out).is_err());
        assert_eq!(out, [9, 9, 9, 9]);
    }

    #[test]
    fn next_record_is_zeroed() {
        let mut out = Vec::new();
        {
            let mut batch = BatchWriter::with_capacity(&mut out, 2, 2, 2);
            batch.next_record().unwrap().copy_from_slice(&[7, 7]);
            batch.next_record().unwrap()[0] = 1;
        }
        assert_eq!(out, [7, 7, 1, 0]);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn finish_reports_flush_failure() {
        let mut out = Broken;
        let mut batch = BatchWriter::new(&mut out, 4, 1);
        batch.write_next(&[0; 4]).unwrap();
        assert!(matches!(batch.finish(), Err(Error::Io(_))));
    }
}
