//! Append-only JSONL file sink.
//!
//! Every write is flushed immediately, so concurrent `outboxctl` processes
//! appending to the same file interleave whole lines rather than partial
//! buffers.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to an open log file.
#[derive(Clone)]
pub struct FileSink {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl FileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// `MakeWriter` adapter handing out clones of one [`FileSink`].
#[derive(Clone)]
pub struct FileSinkFactory {
    sink: FileSink,
}

impl FileSinkFactory {
    pub fn new(sink: FileSink) -> Self {
        Self { sink }
    }
}

impl<'a> MakeWriter<'a> for FileSinkFactory {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.sink.clone()
    }
}
