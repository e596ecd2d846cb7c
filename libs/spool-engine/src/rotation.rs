use std::fs::{File, OpenOptions};
use std::io::Write;

use crate::error::EngineError;
use crate::storage::StorageDir;

/// Buffered writer over the working file with size-triggered rotation.
///
/// Records are buffered in memory and written out once the buffer exceeds
/// `flush_threshold`. When flushed + buffered bytes exceed `cut_size`, the
/// remainder is flushed, the working file is closed and published as a
/// completed file, and a fresh working file is opened.
pub struct RotatingWriter {
    storage: StorageDir,
    file: Option<File>,
    buffer: Vec<u8>,
    written: u64,
    flush_threshold: usize,
    cut_size: u64,
    disambiguator_start: u32,
}

impl std::fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("working", &self.storage.working_path())
            .field("written", &self.written)
            .field("buffered", &self.buffer.len())
            .field("cut_size", &self.cut_size)
            .finish()
    }
}

impl RotatingWriter {
    /// Open (or resume) the working file.
    ///
    /// A working file left behind by a previous grabber is appended to; the
    /// bytes already in it count toward the cut size.
    pub fn open(
        storage: StorageDir,
        flush_threshold: usize,
        cut_size: u64,
        disambiguator_start: u32,
    ) -> Result<Self, EngineError> {
        storage.ensure()?;
        let file = open_working(&storage)?;
        let written = file
            .metadata()
            .map_err(|e| EngineError::storage("stat working file", e))?
            .len();
        if written > 0 {
            tracing::info!(bytes = written, "resuming existing working file");
        }
        Ok(Self {
            storage,
            file: Some(file),
            buffer: Vec::with_capacity(flush_threshold.min(8 * 1024 * 1024)),
            written,
            flush_threshold,
            cut_size,
            disambiguator_start,
        })
    }

    /// Bytes of the current working file, on disk and in memory.
    pub fn pending_bytes(&self) -> u64 {
        self.written + self.buffer.len() as u64
    }

    pub fn written_bytes(&self) -> u64 {
        self.written
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Append one record (a newline is added). Returns the completed file
    /// name if this record triggered a rotation.
    pub fn append(&mut self, record: &[u8]) -> Result<Option<String>, EngineError> {
        self.append_at(record, spool_api::unix_now_secs())
    }

    /// [`append`](Self::append) with an explicit rotation timestamp.
    pub fn append_at(&mut self, record: &[u8], timestamp: u64) -> Result<Option<String>, EngineError> {
        self.buffer.extend_from_slice(record);
        self.buffer.push(b'\n');

        if self.buffer.len() > self.flush_threshold {
            tracing::debug!(bytes = self.buffer.len(), "write buffer full, flushing");
            self.flush()?;
        }

        if self.pending_bytes() > self.cut_size {
            return self.rotate_at(timestamp).map(Some);
        }
        Ok(None)
    }

    /// Write the in-memory buffer to the working file.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(|| {
            EngineError::storage("flush", std::io::Error::other("working file is closed"))
        })?;
        file.write_all(&self.buffer)
            .map_err(|e| EngineError::storage("write working file", e))?;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flush, close, publish and reopen. Returns the completed file name.
    pub fn rotate_at(&mut self, timestamp: u64) -> Result<String, EngineError> {
        self.flush()?;
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| EngineError::storage("sync working file", e))?;
        }

        let name = self.storage.publish_working(timestamp, self.disambiguator_start)?;
        tracing::info!(file = %name, bytes = self.written, "working file rotated");

        self.written = 0;
        self.file = Some(create_working(&self.storage)?);
        Ok(name)
    }

    /// Flush whatever is buffered; used on shutdown and stream end.
    pub fn finish(&mut self) -> Result<(), EngineError> {
        self.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .map_err(|e| EngineError::storage("flush working file", e))?;
        }
        Ok(())
    }
}

fn open_working(storage: &StorageDir) -> Result<File, EngineError> {
    let path = storage.working_path();
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| EngineError::storage(format!("open {}", path.display()), e))
}

fn create_working(storage: &StorageDir) -> Result<File, EngineError> {
    let path = storage.working_path();
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| EngineError::storage(format!("create {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 1_700_000_000;

    /// JSON record that takes exactly `len` bytes on disk (newline included).
    fn record(n: usize, len: usize) -> Vec<u8> {
        let head = format!("{{\"n\":{n},\"pad\":\"");
        let tail = "\"}";
        let pad = len - 1 - head.len() - tail.len();
        format!("{head}{}{tail}", "x".repeat(pad)).into_bytes()
    }

    fn open(dir: &tempfile::TempDir, flush: usize, cut: u64) -> (StorageDir, RotatingWriter) {
        let s = StorageDir::new(dir.path(), "working.tmp", "stream-");
        let w = RotatingWriter::open(s.clone(), flush, cut, 0).unwrap();
        (s, w)
    }

    #[test]
    fn three_forty_byte_records_rotate_at_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 1024 * 1024, 100);

        let records: Vec<_> = (1..=3).map(|n| record(n, 40)).collect();
        assert_eq!(w.append_at(&records[0], TS).unwrap(), None);
        assert_eq!(w.append_at(&records[1], TS).unwrap(), None);
        let rotated = w.append_at(&records[2], TS).unwrap().expect("third record rotates");

        let content = std::fs::read(s.path_of(&rotated)).unwrap();
        assert_eq!(content.len(), 120);
        let lines: Vec<_> = content.split(|b| *b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, records.iter().map(|r| r.as_slice()).collect::<Vec<_>>());

        assert_eq!(w.pending_bytes(), 0);
        assert_eq!(std::fs::metadata(s.working_path()).unwrap().len(), 0);
    }

    #[test]
    fn completed_files_are_at_least_cut_size() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 64, 300);

        let mut rotated = Vec::new();
        for n in 0..100 {
            if let Some(name) = w.append_at(&record(n, 37 + n % 11), TS).unwrap() {
                rotated.push(name);
            }
        }
        assert!(!rotated.is_empty());
        for name in &rotated {
            let len = std::fs::metadata(s.path_of(name)).unwrap().len();
            assert!(len >= 300, "{name} has {len} bytes");
        }
    }

    #[test]
    fn rotations_within_one_second_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 1024, 10);

        let mut names = Vec::new();
        for n in 0..25 {
            names.push(w.append_at(&record(n, 20), TS).unwrap().unwrap());
        }
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 25);
        // production order equals lexicographic order
        assert_eq!(sorted, names);
        assert_eq!(s.list_completed(true).unwrap().len(), 25);
    }

    #[test]
    fn flush_threshold_decouples_disk_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 100, 10_000);

        w.append_at(&record(0, 40), TS).unwrap();
        w.append_at(&record(1, 40), TS).unwrap();
        assert_eq!(w.written_bytes(), 0);
        assert_eq!(std::fs::metadata(s.working_path()).unwrap().len(), 0);

        w.append_at(&record(2, 40), TS).unwrap();
        assert_eq!(w.written_bytes(), 120);
        assert_eq!(w.buffered_bytes(), 0);
    }

    #[test]
    fn resumes_previous_working_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = StorageDir::new(dir.path(), "working.tmp", "stream-");
        s.ensure().unwrap();
        let previous = record(0, 60);
        let mut content = previous.clone();
        content.push(b'\n');
        std::fs::write(s.working_path(), &content).unwrap();

        let mut w = RotatingWriter::open(s.clone(), 1024, 100, 0).unwrap();
        assert_eq!(w.pending_bytes(), 60);
        let name = w.append_at(&record(1, 50), TS).unwrap().unwrap();

        let text = std::fs::read_to_string(s.path_of(&name)).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(std::str::from_utf8(&previous).unwrap()));
    }

    #[test]
    fn consumer_never_sees_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 16, 200);
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let consumer = {
            let s = s.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut seen = 0usize;
                loop {
                    let finished = done.load(std::sync::atomic::Ordering::SeqCst);
                    for name in s.list_completed(true).unwrap() {
                        let bytes = std::fs::read(s.path_of(&name)).unwrap();
                        assert!(bytes.len() > 200, "{name} read with {} bytes", bytes.len());
                        assert_eq!(bytes.last(), Some(&b'\n'));
                        s.remove(&name).unwrap();
                        seen += 1;
                    }
                    if finished {
                        return seen;
                    }
                }
            })
        };

        let mut produced = 0usize;
        for n in 0..2_000 {
            if w.append_at(&record(n, 30), TS + (n / 100) as u64).unwrap().is_some() {
                produced += 1;
            }
        }
        done.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(consumer.join().unwrap(), produced);
    }

    #[test]
    fn finish_flushes_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (s, mut w) = open(&dir, 1024, 10_000);
        w.append_at(b"{\"a\":1}", TS).unwrap();
        w.finish().unwrap();
        assert_eq!(std::fs::read_to_string(s.working_path()).unwrap(), "{\"a\":1}\n");
    }
}
