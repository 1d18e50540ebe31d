use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone)]
pub(crate) struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Self { file })
    }
}

pub(crate) struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

fn lock(file: &Mutex<File>) -> MutexGuard<'_, File> {
    match file.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = &self.file {
            lock(file).write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &self.file {
            lock(file).flush()?;
        }
        Ok(())
    }
}

/// Keeps the first steps of a run and a rolling tail, printed when a check fails.
pub(crate) struct EventLog {
    first: Vec<String>,
    tail: VecDeque<String>,
    first_cap: usize,
    tail_cap: usize,
    dropped: u64,
}

impl EventLog {
    pub(crate) fn new(first_cap: usize, tail_cap: usize) -> Self {
        Self {
            first: Vec::with_capacity(first_cap),
            tail: VecDeque::with_capacity(tail_cap),
            first_cap,
            tail_cap,
            dropped: 0,
        }
    }

    pub(crate) fn record(&mut self, event: String) {
        if self.first.len() < self.first_cap {
            self.first.push(event);
            return;
        }
        if self.tail.len() == self.tail_cap {
            self.tail.pop_front();
            self.dropped += 1;
        }
        if self.tail_cap > 0 {
            self.tail.push_back(event);
        }
    }

    pub(crate) fn dump_failure(&self, reason: &str) {
        tracing::error!("FAILURE: {reason}");
        for event in &self.first {
            tracing::error!("  {event}");
        }
        if self.dropped > 0 {
            tracing::error!("  ... {} steps omitted ...", self.dropped);
        }
        for event in &self.tail {
            tracing::error!("  {event}");
        }
    }
}
