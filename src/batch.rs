use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::{ERROR_LOG, ID_COLUMN, RETRY_BACKOFF};
use crate::download::{download_record, output_path, Downloaded};
use crate::error::EkwError;
use crate::fetcher::RecordFetcher;
use crate::identifier::RecordIdentifier;

const TABULAR_EXTENSIONS: [&str; 2] = ["csv", "tsv"];

pub struct BatchOptions {
    pub out_dir: PathBuf,
    pub error_log: PathBuf,
    /// Extra attempts per row for retryable errors; 0 means none.
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            error_log: PathBuf::from(ERROR_LOG),
            retries: 0,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

/// Batch stats returned after completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// One data row of the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRow {
    Identifier { line: usize, raw: String },
    Unreadable { line: usize, reason: String },
}

/// True when `target` names a file batch mode knows how to read.
pub fn is_tabular(target: &str) -> bool {
    Path::new(target)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TABULAR_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
}

/// Read the identifier column of a CSV/TSV file.
///
/// A missing `KW` header is fatal; a row that cannot be decoded is kept as
/// [`BatchRow::Unreadable`] so the run can log it and carry on.
pub fn read_rows(path: &Path) -> Result<Vec<BatchRow>, EkwError> {
    let data = fs::read(path).map_err(|e| EkwError::Input(format!("{}: {}", path.display(), e)))?;
    let is_tsv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(if is_tsv { b'\t' } else { b',' })
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_slice());

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').trim() == ID_COLUMN)
        .ok_or_else(|| EkwError::MissingColumn {
            column: ID_COLUMN.to_string(),
            path: path.display().to_string(),
        })?;

    let mut lines = LineCounter::new(&data);
    let rows = reader
        .records()
        .enumerate()
        .map(|(idx, record)| {
            let pos = match &record {
                Ok(record) => record.position(),
                Err(e) => e.position(),
            };
            // header is line 1
            let line = pos.map_or(idx + 2, |p| lines.record_start(p));
            match record {
                Ok(record) => BatchRow::Identifier {
                    line,
                    raw: record.get(column).unwrap_or("").to_string(),
                },
                Err(e) => BatchRow::Unreadable {
                    line,
                    reason: e.to_string(),
                },
            }
        })
        .collect();
    Ok(rows)
}

/// Maps reader positions to 1-based line numbers.
///
/// The reader stamps a record with the offset it started scanning from,
/// which is before any blank lines it then skipped.
struct LineCounter<'a> {
    data: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            line: 1,
        }
    }

    /// Positions must be fed in file order.
    fn record_start(&mut self, pos: &csv::Position) -> usize {
        let from = usize::try_from(pos.byte()).unwrap_or(usize::MAX).min(self.data.len());
        let start = from
            + self.data[from..]
                .iter()
                .take_while(|b| matches!(b, b'\r' | b'\n'))
                .count();
        if start > self.offset {
            self.line += self.data[self.offset..start].iter().filter(|&&b| b == b'\n').count();
            self.offset = start;
        }
        self.line
    }
}

/// Process every row of `input` in order.
///
/// Only an uninterpretable input file fails the run. Any per-row failure is
/// appended to the error log, echoed to stderr and skipped.
pub async fn run_batch<F: RecordFetcher>(
    fetcher: &mut F,
    input: &Path,
    opts: &BatchOptions,
) -> Result<BatchStats, EkwError> {
    let rows = read_rows(input)?;
    let total = rows.len();
    info!("Batch: {} rows from {}", total, input.display());

    let log = ErrorLog::new(&opts.error_log);
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);

    let mut ok = 0usize;
    let mut errors = 0usize;

    for row in rows {
        let (label, outcome) = match row {
            BatchRow::Identifier { line, raw } => {
                debug!("line {}: {}", line, raw);
                let outcome = process_row(fetcher, &raw, opts)
                    .await
                    .map_err(|e| e.to_string());
                (raw, outcome)
            }
            BatchRow::Unreadable { line, reason } => (format!("line {}", line), Err(reason)),
        };

        match outcome {
            Ok(done) => {
                ok += 1;
                pb.suspend(|| println!("{}", done.path.display()));
            }
            Err(reason) => {
                errors += 1;
                let entry = ErrorLogEntry::new(label, reason);
                pb.suspend(|| eprintln!("{}", entry));
                if let Err(e) = log.append(&entry) {
                    warn!("cannot write {}: {}", log.path.display(), e);
                }
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Batch finished: {} rows ({} ok, {} errors)", total, ok, errors);
    Ok(BatchStats { total, ok, errors })
}

async fn process_row<F: RecordFetcher>(
    fetcher: &mut F,
    raw: &str,
    opts: &BatchOptions,
) -> Result<Downloaded, EkwError> {
    let id = RecordIdentifier::parse(raw)?;
    let path = output_path(&id, &opts.out_dir);

    let mut attempt = 0u32;
    loop {
        match download_record(fetcher, &id, &path).await {
            Err(e) if e.is_retryable() && attempt < opts.retries => {
                let backoff = opts.retry_backoff * 2u32.saturating_pow(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:.1}s",
                    id,
                    attempt + 1,
                    opts.retries + 1,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

/// One failed row, as written to the error log.
#[derive(Debug, Clone)]
pub struct ErrorLogEntry {
    pub identifier: String,
    pub reason: String,
    pub timestamp: DateTime<Local>,
}

impl ErrorLogEntry {
    pub fn new(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            reason: reason.into(),
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for ErrorLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // one entry per line
        let reason = self.reason.replace(['\n', '\r'], " ");
        write!(
            f,
            "{}\t{}\t{}",
            self.timestamp.to_rfc3339(),
            self.identifier,
            reason
        )
    }
}

/// Append-only log of failed rows. The file is created on the first failure.
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn append(&self, entry: &ErrorLogEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    use crate::download::tests::FakeFetcher;

    fn options(dir: &Path) -> BatchOptions {
        BatchOptions {
            out_dir: dir.to_path_buf(),
            error_log: dir.join(ERROR_LOG),
            retries: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn pdfs_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".pdf"))
            .collect();
        names.sort();
        names
    }

    fn log_lines(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join(ERROR_LOG))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn tabular_detection() {
        assert!(is_tabular("rows.csv"));
        assert!(is_tabular("dir/ROWS.CSV"));
        assert!(is_tabular("rows.tsv"));
        assert!(!is_tabular("KR1P/00012345/4"));
        assert!(!is_tabular("rows.xlsx"));
        assert!(!is_tabular("csv"));
    }

    #[tokio::test]
    async fn failed_row_is_logged_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(
            &input,
            "KW,Owner\nKR1P/00000001/1,a\nKR1P/00000002/2,b\nKR1P/00000003/3,c\n",
        )
        .unwrap();

        let mut fetcher = FakeFetcher::with_missing(&["KR1P/00000002/2"]);
        let stats = run_batch(&mut fetcher, &input, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats, BatchStats { total: 3, ok: 2, errors: 1 });
        assert_eq!(
            pdfs_in(dir.path()),
            ["KR1P_00000001_1.pdf", "KR1P_00000003_3.pdf"]
        );
        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("KR1P/00000002/2"));
        assert!(lines[0].contains("not found"));
    }

    #[tokio::test]
    async fn missing_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "Number,Owner\nKR1P/00000001/1,a\n").unwrap();

        let mut fetcher = FakeFetcher::default();
        let err = run_batch(&mut fetcher, &input, &options(dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(err, EkwError::MissingColumn { .. }));
        assert!(fetcher.calls.is_empty());
        assert!(pdfs_in(dir.path()).is_empty());
        assert!(!dir.path().join(ERROR_LOG).exists());
    }

    #[tokio::test]
    async fn unreadable_input_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = FakeFetcher::default();
        let err = run_batch(&mut fetcher, &dir.path().join("absent.csv"), &options(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_fatal_for_batch());
    }

    #[tokio::test]
    async fn malformed_and_empty_cells_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "KW\nBADFORMAT\n\"\"\nKR1P/00000003/3\n").unwrap();

        let mut fetcher = FakeFetcher::default();
        let stats = run_batch(&mut fetcher, &input, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats, BatchStats { total: 3, ok: 1, errors: 2 });
        assert_eq!(fetcher.calls, ["KR1P/00000003/3"]);
        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("BADFORMAT"));
    }

    #[test]
    fn header_with_bom_and_padding_matches() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "\u{feff} KW ,x\n KR1P/00000001/1 ,y\nshort\n").unwrap();
        let rows = read_rows(&input).unwrap();
        assert_eq!(
            rows,
            [
                BatchRow::Identifier { line: 2, raw: "KR1P/00000001/1".into() },
                BatchRow::Identifier { line: 3, raw: "short".into() },
            ]
        );
    }

    #[test]
    fn tsv_uses_tabs_and_other_columns_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.tsv");
        fs::write(&input, "Owner\tKW\nJan, Kowalski\tWA2M/00436586/7\n").unwrap();
        let rows = read_rows(&input).unwrap();
        assert_eq!(
            rows,
            [BatchRow::Identifier { line: 2, raw: "WA2M/00436586/7".into() }]
        );
    }

    #[test]
    fn line_numbers_survive_blank_lines_and_multiline_fields() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(
            &input,
            "KW,Note\r\n\r\nA/1/1,x\r\n\"B/2/2\",\"two\nlines\"\n\n\nC/3/3,y",
        )
        .unwrap();
        let rows = read_rows(&input).unwrap();
        assert_eq!(
            rows,
            [
                BatchRow::Identifier { line: 3, raw: "A/1/1".into() },
                BatchRow::Identifier { line: 4, raw: "B/2/2".into() },
                BatchRow::Identifier { line: 8, raw: "C/3/3".into() },
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_row_is_logged_by_line_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        let mut data = b"KW,Note\nKR1P/00000001/1,a\n\nKR1P/00000002/2,".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"\nKR1P/00000003/3,c\n");
        fs::write(&input, data).unwrap();

        let rows = read_rows(&input).unwrap();
        assert!(matches!(rows[1], BatchRow::Unreadable { line: 4, .. }));

        let mut fetcher = FakeFetcher::default();
        let stats = run_batch(&mut fetcher, &input, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats, BatchStats { total: 3, ok: 2, errors: 1 });
        assert_eq!(fetcher.calls, ["KR1P/00000001/1", "KR1P/00000003/3"]);
        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].split('\t').nth(1), Some("line 4"));
    }

    #[tokio::test]
    async fn transient_failures_retried_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "KW\nKR1P/00000001/1\n").unwrap();

        let mut fetcher = FakeFetcher::default();
        fetcher.flaky.insert("KR1P/00000001/1".into(), 1);
        let opts = BatchOptions { retries: 2, ..options(dir.path()) };
        let stats = run_batch(&mut fetcher, &input, &opts).await.unwrap();

        assert_eq!(stats.ok, 1);
        assert_eq!(fetcher.calls.len(), 2);
        assert!(log_lines(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "KW\nKR1P/00000001/1\n").unwrap();

        let mut fetcher = FakeFetcher::default();
        fetcher.flaky.insert("KR1P/00000001/1".into(), 1);
        let stats = run_batch(&mut fetcher, &input, &options(dir.path()))
            .await
            .unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(fetcher.calls.len(), 1);
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rows.csv");
        fs::write(&input, "KW\nKR1P/00000002/2\n").unwrap();

        let mut fetcher = FakeFetcher::with_missing(&["KR1P/00000002/2"]);
        let opts = BatchOptions { retries: 3, ..options(dir.path()) };
        let stats = run_batch(&mut fetcher, &input, &opts).await.unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(fetcher.calls.len(), 1);
    }

    #[test]
    fn log_entry_is_one_tab_separated_line() {
        let entry = ErrorLogEntry::new("WA1M/1/1", "navigation failed:\nboom");
        let line = entry.to_string();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert!(DateTime::parse_from_rfc3339(fields[0]).is_ok());
        assert_eq!(fields[1], "WA1M/1/1");
        assert_eq!(fields[2], "navigation failed: boom");
    }

    #[test]
    fn log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(&dir.path().join(ERROR_LOG));
        log.append(&ErrorLogEntry::new("A/1/1", "x")).unwrap();
        log.append(&ErrorLogEntry::new("B/2/2", "y")).unwrap();
        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("B/2/2"));
    }
}
