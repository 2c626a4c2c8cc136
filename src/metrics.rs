//! Reader for the monitor's named pipe.
//!
//! The producer writes newline-terminated metric lines followed by a
//! [`SENTINEL`] line. Everything before the sentinel is one snapshot.

use crate::prompt::CLEAR_SCREEN;
use crate::state::RealtimeFlag;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SENTINEL: &str = "<END_OF_METRICS>";

const CHUNK_SIZE: usize = 4096;

const FOOTER: &str =
    "\n------------------------------------------------------------------\n press ctrl-c to close";

/// Splits a byte stream into sentinel-terminated snapshots.
pub struct SnapshotReader<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Swaps in a new source, keeping bytes already read.
    pub fn reset(&mut self, reader: R) {
        self.reader = reader;
    }

    /// Reads until a full snapshot is buffered. Returns `None` at end of input
    /// and keeps whatever followed the sentinel line for the next call.
    ///
    /// `ErrorKind::Interrupted` is passed to the caller, not retried.
    pub fn next_snapshot(&mut self) -> io::Result<Option<String>> {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if let Some(snapshot) = self.take_snapshot() {
                return Ok(Some(snapshot));
            }
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn take_snapshot(&mut self) -> Option<String> {
        let sentinel = SENTINEL.as_bytes();
        let at = self
            .pending
            .windows(sentinel.len())
            .position(|window| window == sentinel)?;
        let snapshot = String::from_utf8_lossy(&self.pending[..at]).into_owned();

        let mut consumed = at + sentinel.len();
        if self.pending.get(consumed) == Some(&b'\n') {
            consumed += 1;
        }
        self.pending.drain(..consumed);
        Some(snapshot)
    }
}

pub struct MetricsPipe {
    path: PathBuf,
}

impl MetricsPipe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until a writer opens the pipe.
    fn open(&self) -> Result<File> {
        File::open(&self.path)
            .with_context(|| format!("cannot open metrics pipe {}", self.path.display()))
    }

    /// Reads a single snapshot.
    pub fn read_once(&self) -> Result<String> {
        let mut reader = SnapshotReader::new(self.open()?);
        loop {
            let next = reader
                .next_snapshot()
                .with_context(|| format!("cannot read metrics pipe {}", self.path.display()))?;
            match next {
                Some(snapshot) => return Ok(snapshot),
                None => {
                    debug!("metrics pipe closed by writer, reopening");
                    reader.reset(self.open()?);
                }
            }
        }
    }

    /// Redraws every snapshot until `flag` is cleared. The flag is set on
    /// entry and cleared on exit.
    pub fn read_realtime(&self, flag: &RealtimeFlag, out: &mut dyn Write) -> Result<()> {
        flag.set();
        let result = self.stream(flag, out);
        flag.clear();
        result
    }

    fn stream(&self, flag: &RealtimeFlag, out: &mut dyn Write) -> Result<()> {
        let mut reader = SnapshotReader::new(self.open()?);
        while flag.is_set() {
            match reader.next_snapshot() {
                Ok(Some(snapshot)) => {
                    write!(out, "{CLEAR_SCREEN}\n{snapshot}\n{FOOTER}")?;
                    out.flush()?;
                }
                Ok(None) => reader.reset(self.open()?),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let path = self.path.display();
                    return Err(e).with_context(|| format!("cannot read metrics pipe {path}"));
                }
            }
        }
        writeln!(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;

    /// Hands out at most `size` bytes per read.
    struct Chunked {
        data: Cursor<Vec<u8>>,
        size: usize,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = buf.len().min(self.size);
            self.data.read(&mut buf[..limit])
        }
    }

    fn chunked(text: &str, size: usize) -> SnapshotReader<Chunked> {
        SnapshotReader::new(Chunked {
            data: Cursor::new(text.as_bytes().to_vec()),
            size,
        })
    }

    #[test]
    fn sentinel_split_across_reads() {
        let mut reader = chunked("cpu_usage 12.5\nmemory_usage 40\n<END_OF_METRICS>\n", 3);
        assert_eq!(
            reader.next_snapshot().unwrap().as_deref(),
            Some("cpu_usage 12.5\nmemory_usage 40\n")
        );
        assert_eq!(reader.next_snapshot().unwrap(), None);
    }

    #[test]
    fn bytes_after_sentinel_start_next_snapshot() {
        let mut reader = chunked("a 1\n<END_OF_METRICS>\nb 2\n<END_OF_METRICS>\nc", 64);
        assert_eq!(reader.next_snapshot().unwrap().as_deref(), Some("a 1\n"));
        assert_eq!(reader.next_snapshot().unwrap().as_deref(), Some("b 2\n"));
        assert_eq!(reader.next_snapshot().unwrap(), None);

        reader.reset(Chunked {
            data: Cursor::new(b" 3\n<END_OF_METRICS>\n".to_vec()),
            size: 64,
        });
        assert_eq!(reader.next_snapshot().unwrap().as_deref(), Some("c 3\n"));
    }

    #[test]
    fn read_once_returns_first_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics_pipe");
        fs::write(&path, "cpu_usage 3\n<END_OF_METRICS>\ncpu_usage 4\n<END_OF_METRICS>\n").unwrap();

        let snapshot = MetricsPipe::new(&path).read_once().unwrap();
        assert_eq!(snapshot, "cpu_usage 3\n");
    }

    #[test]
    fn read_once_reports_missing_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetricsPipe::new(dir.path().join("absent")).read_once().unwrap_err();
        assert!(err.to_string().starts_with("cannot open metrics pipe"));
    }

    /// Clears the realtime flag once a full frame has been drawn.
    struct StopAfterFrame<'a> {
        flag: &'a RealtimeFlag,
        written: Vec<u8>,
    }

    impl Write for StopAfterFrame<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            if String::from_utf8_lossy(&self.written).contains("press ctrl-c to close") {
                self.flag.clear();
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn realtime_redraws_until_flag_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics_pipe");
        let frames = "disk_usage 7\n<END_OF_METRICS>\ndisk_usage 8\n<END_OF_METRICS>\n";
        fs::write(&path, frames).unwrap();
        let flag = RealtimeFlag::new();
        let mut out = StopAfterFrame {
            flag: &flag,
            written: Vec::new(),
        };

        MetricsPipe::new(&path).read_realtime(&flag, &mut out).unwrap();

        let shown = String::from_utf8(out.written).unwrap();
        assert!(shown.starts_with(CLEAR_SCREEN));
        assert!(shown.contains("\ndisk_usage 7\n"));
        assert!(!shown.contains("disk_usage 8"));
        assert!(!flag.is_set());
    }
}
