//! Tracing setup: every event goes to stdout and, when a log dir is set, to a
//! file named after the listen port so hubs sharing a log dir stay separate.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

pub struct LoggingOptions<'a> {
    pub debug: bool,
    pub log_dir: &'a str,
    pub addr: &'a str,
}

/// Installs the global subscriber. A log file that cannot be opened is
/// reported once and logging continues on stdout.
pub fn init(options: &LoggingOptions<'_>) {
    let level = filter_level(options.debug, std::env::var("LAB_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (sink, open_error) = match LogSink::open(options.log_dir, options.addr) {
        Ok(sink) => (sink, None),
        Err(err) => (LogSink::stdout_only(), Some(err)),
    };
    let log_path = sink.path.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(sink)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return;
    }
    if let Some(err) = open_error {
        warn!(event = "log_file_error", log_dir = options.log_dir, error = %err);
    } else if let Some(path) = log_path {
        debug!(event = "log_file_open", path = %path.display());
    }
}

fn filter_level(debug: bool, env_level: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    env_level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// `lab-hub-<port>.log`, or `lab-hub.log` when the address does not parse.
fn log_file_name(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(addr) => format!("lab-hub-{}.log", addr.port()),
        Err(_) => "lab-hub.log".to_string(),
    }
}

struct LogSink {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl LogSink {
    fn stdout_only() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    fn open(log_dir: &str, addr: &str) -> io::Result<Self> {
        if log_dir.trim().is_empty() {
            return Ok(Self::stdout_only());
        }
        let dir = Path::new(log_dir);
        fs::create_dir_all(dir)?;
        let path = dir.join(log_file_name(addr));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = TeeWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            stdout: io::stdout().lock(),
            file: self.file.as_ref().and_then(|file| file.lock().ok()),
        }
    }
}

/// Holds both outputs for the duration of one event so lines never interleave.
struct TeeWriter<'a> {
    stdout: io::StdoutLock<'static>,
    file: Option<MutexGuard<'a, File>>,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
