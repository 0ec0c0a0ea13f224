use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

use crate::config::LoggingConfig;

pub struct FileLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl FileLogger {
    pub fn open(path: &Path, level: LevelFilter) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Ok(FileLogger {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self.file.lock();
        // Nowhere to report a failed log write.
        let _ = writeln!(
            file,
            "{} {} {} - {}",
            timestamp,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = self.file.lock().flush();
    }
}

/// Installs the process logger. Returns the log file path when logging to a
/// file, `None` when logging to the console.
pub fn init(config: &LoggingConfig) -> Result<Option<PathBuf>> {
    let level = LevelFilter::from_str(&config.level).unwrap_or(LevelFilter::Info);

    if config.console || std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .context("Failed to install console logger")?;
        return Ok(None);
    }

    let log_file_path = get_log_file_path()?;
    let logger = FileLogger::open(&log_file_path, level)?;

    log::set_boxed_logger(Box::new(logger)).context("Failed to install file logger")?;
    log::set_max_level(level);

    Ok(Some(log_file_path))
}

pub fn get_log_file_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "input-tally", "input-tally")
        .context("Failed to get project directories")?;

    Ok(proj_dirs.data_dir().join("input-tally.log"))
}

fn viewer_command(path: &Path) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg("start").arg("").arg(path);
        cmd
    } else if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

/// Opens the log file in the platform's default viewer without waiting for it.
pub fn open_log_file(path: &Path) -> Result<()> {
    viewer_command(path)
        .spawn()
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok(())
}
