use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// With a `file`, log lines are appended there without colours; otherwise
/// they go to stdout.
pub fn init(filter: &str, file: Option<&Path>) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(filter).with_context(|| format!("invalid log filter {filter:?}"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(FileWriter(Mutex::new(file)))
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))
        }
        None => builder.try_init().map_err(|e| anyhow::anyhow!(e)),
    }
}

struct FileWriter(Mutex<File>);

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileGuard(self.0.lock())
    }
}

struct FileGuard<'a>(parking_lot::MutexGuard<'a, File>);

impl Write for FileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_filter() {
        assert!(init("eventhub=notalevel", None).is_err());
    }
}
