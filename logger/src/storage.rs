use crate::errors::Result;
use crate::model::Reading;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const CSV_HEADER: &str = "timestamp,temperature,humidity,gas_level";

/// Append-only record of every reading
pub trait ReadingLog {
    fn append(&mut self, reading: &Reading) -> impl Future<Output = Result<()>>;
}

/// CSV file on local disk, one reading per line.
///
/// The file is reopened on every append so that a file removed while the
/// logger is running gets recreated, header included, on the next tick.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    /// Points at `path` without touching the disk; the header is written on
    /// the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the file with a header if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let log = Self::new(path);
        if log.ensure_header().await? {
            info!("Created local log {}", log.path.display());
        } else {
            info!("Appending to existing local log {}", log.path.display());
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true when the file had to be created.
    async fn ensure_header(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(record(CSV_HEADER).as_bytes()).await?;
                file.sync_data().await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl ReadingLog for CsvLog {
    async fn append(&mut self, reading: &Reading) -> Result<()> {
        self.ensure_header().await?;

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(record(&reading.to_csv_line()).as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// A full line, terminator included, so it goes out in a single write.
fn record(line: &str) -> String {
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(gas: f64) -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        Reading::new(ts, 21.5, 60.0, gas)
    }

    #[tokio::test]
    async fn test_open_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air.csv");

        CsvLog::open(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", CSV_HEADER));
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air.csv");

        let mut log = CsvLog::open(&path).await.unwrap();
        log.append(&reading(0.42)).await.unwrap();
        log.append(&reading(0.81)).await.unwrap();

        // a second run must not write another header
        let mut reopened = CsvLog::open(&path).await.unwrap();
        reopened.append(&reading(1.0)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                CSV_HEADER,
                "2024-03-09 08:00:00,21.5,60,0.420",
                "2024-03-09 08:00:00,21.5,60,0.810",
                "2024-03-09 08:00:00,21.5,60,1.000",
            ]
        );
    }

    #[tokio::test]
    async fn test_removed_file_is_recreated_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air.csv");

        let mut log = CsvLog::open(&path).await.unwrap();
        log.append(&reading(0.42)).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        log.append(&reading(0.5)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            format!("{}\n2024-03-09 08:00:00,21.5,60,0.500\n", CSV_HEADER)
        );
    }

    #[tokio::test]
    async fn test_append_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = CsvLog::new(dir.path().join("missing").join("air.csv"));

        assert!(log.append(&reading(0.42)).await.is_err());
    }

    #[test]
    fn test_record_is_newline_terminated() {
        assert_eq!(record("a,b,c"), "a,b,c\n");
    }

    #[tokio::test]
    async fn test_each_append_ends_on_a_line_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("air.csv");

        let mut log = CsvLog::open(&path).await.unwrap();
        for gas in [0.42, 0.81] {
            log.append(&reading(gas)).await.unwrap();
            let content = std::fs::read(&path).unwrap();
            assert_eq!(content.last(), Some(&b'\n'));
        }
    }
}
