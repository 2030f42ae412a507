use super::LogRecord;
use crate::http::GatewayError;
use crate::telegram::{Destination, TelegramGateway};
use chrono::{DateTime, NaiveDate, Utc};
use log::{Level, LevelFilter, Log, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const WARNING_SIGN: &str = "\u{26A0}\u{FE0F}";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Records emitted while delivering to Telegram would loop back into the
// Telegram sink.
const TELEGRAM_FEEDBACK_TARGETS: [&str; 2] = ["mips_relay::http", "mips_relay::telegram"];

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("telegram: {0}")]
    Telegram(#[from] GatewayError),
}

/// `2024-01-31 23:59:59 - INFO - mips_relay::runner - message`
pub fn format_line(record: &LogRecord) -> String {
    format!(
        "{} - {} - {} - {}",
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.level,
        record.target,
        record.message
    )
}

/// Writes to stderr through `env_logger`'s formatter.
pub struct ConsoleSink {
    logger: env_logger::Logger,
}

impl ConsoleSink {
    pub fn new(level: LevelFilter) -> Self {
        let logger = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(level.as_str()),
        )
        .build();
        Self { logger }
    }

    pub fn emit(&self, record: &LogRecord) {
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", record.message))
                .level(record.level)
                .target(&record.target)
                .module_path(record.module_path.as_deref())
                .file(record.file.as_deref())
                .line(record.line)
                .build(),
        );
    }
}

/// Appends to `<folder>/<file>` and rotates at UTC midnight, renaming the
/// finished day to `<file>.<YYYY-MM-DD>`.
pub struct FileSink {
    folder: PathBuf,
    file_name: String,
    current: Option<(NaiveDate, File)>,
}

fn file_day(path: &Path) -> io::Result<Option<NaiveDate>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified: DateTime<Utc> = meta.modified()?.into();
            Ok(Some(modified.date_naive()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl FileSink {
    /// Creates the folder if needed. The file itself is opened lazily.
    pub fn open(folder: impl Into<PathBuf>, file_name: &str) -> io::Result<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder)?;
        Ok(Self {
            folder,
            file_name: file_name.to_string(),
            current: None,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.folder.join(&self.file_name)
    }

    pub fn rotated_path(&self, day: NaiveDate) -> PathBuf {
        self.folder
            .join(format!("{}.{}", self.file_name, day.format("%Y-%m-%d")))
    }

    /// Moves the active file to its dated name. An existing file of that
    /// name is appended to, never replaced.
    fn archive(&self, active: &Path, day: NaiveDate) -> io::Result<()> {
        let rotated = self.rotated_path(day);
        if !rotated.exists() {
            return fs::rename(active, rotated);
        }
        let mut dst = OpenOptions::new().append(true).open(&rotated)?;
        io::copy(&mut File::open(active)?, &mut dst)?;
        fs::remove_file(active)
    }

    /// Opens the active file for `day`, archiving the previous day first.
    /// The open day never moves backwards.
    fn rotate_to(&mut self, day: NaiveDate) -> io::Result<()> {
        let active = self.active_path();
        let previous = match self.current.take() {
            Some((d, _)) => Some(d),
            None => file_day(&active)?,
        };
        let open_day = match previous {
            Some(prev) if prev < day => {
                if active.exists() {
                    self.archive(&active, prev)?;
                }
                day
            }
            Some(prev) => prev,
            None => day,
        };
        let file = OpenOptions::new().create(true).append(true).open(&active)?;
        self.current = Some((open_day, file));
        Ok(())
    }

    /// Appends `record`. Rotation only moves forward: a record stamped
    /// before the open day (queued just before midnight) goes to the
    /// current file.
    pub fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        let day = record.timestamp.date_naive();
        let needs_rotation = match &self.current {
            Some((open_day, _)) => day > *open_day,
            None => true,
        };
        if needs_rotation {
            self.rotate_to(day)?;
        }
        if let Some((_, file)) = self.current.as_mut() {
            writeln!(file, "{}", format_line(record))?;
            file.flush()?;
        }
        Ok(())
    }
}

/// Forwards records to the Telegram log chat.
pub struct TelegramSink {
    gateway: Arc<TelegramGateway>,
    user_to_tag_on_error: Option<i64>,
}

impl TelegramSink {
    pub fn new(gateway: Arc<TelegramGateway>, user_to_tag_on_error: Option<i64>) -> Self {
        Self {
            gateway,
            user_to_tag_on_error,
        }
    }

    pub fn accepts(record: &LogRecord) -> bool {
        !TELEGRAM_FEEDBACK_TARGETS
            .iter()
            .any(|t| record.target.starts_with(t))
    }

    pub fn prepare_message(record: &LogRecord) -> String {
        let line = format!("{} - {} - {}", record.level, record.target, record.message);
        if record.level <= Level::Warn {
            format!("{WARNING_SIGN} {line}")
        } else {
            line
        }
    }

    pub async fn emit(&self, record: &LogRecord) -> Result<(), GatewayError> {
        let tag = if record.level <= Level::Warn {
            self.user_to_tag_on_error
        } else {
            None
        };
        self.gateway
            .send_message(&Self::prepare_message(record), Destination::Logs, tag)
            .await
    }
}

/// The sink kinds a pipeline can be built from.
pub enum Sink {
    Console(ConsoleSink),
    File(FileSink),
    Telegram(TelegramSink),
}

impl Sink {
    pub fn accepts(&self, record: &LogRecord) -> bool {
        match self {
            Sink::Telegram(_) => TelegramSink::accepts(record),
            _ => true,
        }
    }

    pub async fn emit(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        match self {
            Sink::Console(s) => {
                s.emit(record);
                Ok(())
            }
            Sink::File(s) => Ok(s.write(record)?),
            Sink::Telegram(s) => Ok(s.emit(record).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record_at(ts: DateTime<Utc>, msg: &str) -> LogRecord {
        let mut r = LogRecord::new(Level::Info, "mips_relay::runner", msg);
        r.timestamp = ts;
        r
    }

    #[test]
    fn line_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        assert_eq!(
            format_line(&record_at(ts, "done")),
            "2024-01-31 23:59:59 - INFO - mips_relay::runner - done"
        );
    }

    #[test]
    fn file_sink_rotates_at_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::open(dir.path().join("logs"), "app.log").unwrap();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 1).unwrap();
        sink.write(&record_at(day1, "first")).unwrap();
        sink.write(&record_at(day1, "second")).unwrap();
        sink.write(&record_at(day2, "third")).unwrap();

        let rotated = fs::read_to_string(
            sink.rotated_path(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
        )
        .unwrap();
        assert!(rotated.contains("first"));
        assert!(rotated.contains("second"));
        assert!(!rotated.contains("third"));
        let active = fs::read_to_string(sink.active_path()).unwrap();
        assert_eq!(active.lines().count(), 1);
        assert!(active.contains("third"));
        assert!(dir
            .path()
            .join("logs")
            .join("app.log.2024-03-01")
            .exists());
    }

    #[test]
    fn late_records_never_rotate_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::open(dir.path(), "app.log").unwrap();
        let at = |d, h, m| Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap();
        sink.write(&record_at(at(1, 8, 0), "day1-morning")).unwrap();
        sink.write(&record_at(at(1, 20, 0), "day1-evening")).unwrap();
        sink.write(&record_at(at(2, 0, 0), "day2-first")).unwrap();
        sink.write(&record_at(at(1, 23, 59), "day1-late")).unwrap();
        sink.write(&record_at(at(2, 0, 1), "day2-second")).unwrap();

        let read_lines = |p: PathBuf| -> Vec<String> {
            fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(|l| l.rsplit(" - ").next().unwrap().to_string())
                .collect()
        };
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(read_lines(sink.rotated_path(day1)), ["day1-morning", "day1-evening"]);
        assert_eq!(
            read_lines(sink.active_path()),
            ["day2-first", "day1-late", "day2-second"]
        );
        assert!(!sink.rotated_path(day2).exists());
    }

    #[test]
    fn archiving_appends_to_an_existing_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::open(dir.path(), "app.log").unwrap();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        fs::write(sink.rotated_path(day1), "earlier\n").unwrap();
        sink.write(&record_at(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(), "later"))
            .unwrap();
        sink.write(&record_at(Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(), "next"))
            .unwrap();

        let rotated = fs::read_to_string(sink.rotated_path(day1)).unwrap();
        assert!(rotated.starts_with("earlier\n"));
        assert!(rotated.contains("later"));
        assert!(fs::read_to_string(sink.active_path()).unwrap().contains("next"));
    }

    #[test]
    fn warnings_get_a_warning_sign() {
        let mut r = LogRecord::new(Level::Error, "mips_relay::runner", "boom");
        assert!(TelegramSink::prepare_message(&r).starts_with(WARNING_SIGN));
        r.level = Level::Info;
        assert_eq!(
            TelegramSink::prepare_message(&r),
            "INFO - mips_relay::runner - boom"
        );
    }

    #[test]
    fn telegram_sink_skips_its_own_delivery_logs() {
        assert!(!TelegramSink::accepts(&LogRecord::new(Level::Warn, "mips_relay::http", "retry")));
        assert!(!TelegramSink::accepts(&LogRecord::new(Level::Debug, "mips_relay::telegram", "x")));
        assert!(TelegramSink::accepts(&LogRecord::new(Level::Info, "mips_relay::runner", "x")));
    }
}
