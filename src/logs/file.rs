// ABOUTME: Append-only per-day log file under a container's .meta/logs directory.
// ABOUTME: Reopens itself when the local calendar day changes.

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::LogLine;

pub(crate) struct LogFile {
    dir: PathBuf,
    date: NaiveDate,
    file: File,
}

impl LogFile {
    /// Create `dir` if needed and open today's file in append mode.
    pub(crate) fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let date = Local::now().date_naive();
        let file = Self::open_for(dir, date)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            date,
            file,
        })
    }

    fn open_for(dir: &Path, date: NaiveDate) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path(dir, date))
    }

    pub(crate) fn path(&self) -> PathBuf {
        file_path(&self.dir, self.date)
    }

    /// Switch to the file for `date` if it differs from the open one.
    pub(crate) fn rotate_to(&mut self, date: NaiveDate) -> io::Result<()> {
        if date == self.date {
            return Ok(());
        }
        self.file = Self::open_for(&self.dir, date)?;
        self.date = date;
        tracing::debug!(path = %self.path().display(), "Rotated log file");
        Ok(())
    }

    pub(crate) fn write_line(&mut self, line: &LogLine) -> io::Result<()> {
        let now = Local::now();
        self.rotate_to(now.date_naive())?;
        writeln!(
            self.file,
            "{} [{}] {}",
            now.format("%H:%M:%S"),
            line.kind.as_str(),
            line.message.render()
        )
    }
}

pub(crate) fn file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("logs_{}.txt", date.format("%Y-%m-%d")))
}

/// Time left until the next local midnight after `now`.
pub(crate) fn until_midnight(now: DateTime<Local>) -> Duration {
    let fallback = Duration::from_secs(3600);
    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return fallback;
    };
    let Some(midnight) = tomorrow
        .and_hms_opt(0, 0, 0)
        .and_then(|t| t.and_local_timezone(Local).earliest())
    else {
        return fallback;
    };
    (midnight - now)
        .max(ChronoDuration::zero())
        .to_std()
        .unwrap_or(fallback)
}
