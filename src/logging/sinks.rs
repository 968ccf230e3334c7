use std::{
    fs::File,
    io::{LineWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use super::{error::DeliveryError, LogSink};

/// Append-only file sink. The parent directory must already exist.
pub struct FileSink {
    file: Mutex<Option<LineWriter<File>>>,
    file_path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(Some(LineWriter::new(file))),
            file_path: path.to_path_buf(),
        })
    }
}

impl LogSink for FileSink {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(DeliveryError::Closed)?;

        writeln!(file, "{payload}")?;
        file.flush()?;
        Ok(())
    }

    fn flush(&self) {
        if let Some(file) = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            let _ = file.flush();
        }
    }

    fn close(&self) {
        let taken = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut file) = taken {
            if let Err(err) = file.flush() {
                tracing::warn!(path = %self.file_path.display(), "failed flushing log file on close: {err}");
            }
        }
    }

    fn describe(&self) -> String {
        format!("file {}", self.file_path.display())
    }
}

/// Writes payloads to stderr.
pub struct ConsoleSink {
    handle: std::io::Stderr,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            handle: std::io::stderr(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for ConsoleSink {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        let mut writer = self.handle.lock();

        writeln!(writer, "{payload}")?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) {
        let _ = self.handle.lock().flush();
    }

    fn close(&self) {
        self.flush()
    }

    fn describe(&self) -> String {
        "console".to_string()
    }
}

/// Keeps payloads in memory. Useful for embedding and assertions.
#[derive(Default)]
pub struct MemorySink {
    payloads: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for MemorySink {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
