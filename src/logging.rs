//! Log backend setup
//!
//! Every record goes to stderr and is appended to a log file in the user
//! data directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `<data dir>/MoodBoard/logs/moodboard.log`
pub fn log_file_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("MoodBoard")
        .join("logs")
        .join("moodboard.log")
}

/// Writes each record to stderr and, if it could be opened, the log file
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = &mut self.file {
            // Losing the file copy must not lose the stderr copy
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = &mut self.file {
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", path, e);
            None
        }
    }
}

/// Install the logger. Defaults to `info`, overridable with `RUST_LOG`.
/// Later calls are no-ops.
pub fn init_logging() {
    let path = log_file_path();
    let writer = TeeWriter {
        file: open_log_file(&path),
    };

    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or("moodboard"),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .try_init();

    if result.is_ok() {
        log::info!("MoodBoard {} started, logging to {:?}", env!("CARGO_PKG_VERSION"), path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        let path = log_file_path();
        assert!(path.ends_with("MoodBoard/logs/moodboard.log"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging();
        init_logging();
        log::debug!("still alive");
    }
}
