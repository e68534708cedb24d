use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::EkwError;
use crate::fetcher::RecordFetcher;
use crate::identifier::RecordIdentifier;
use crate::merger::merge;

/// A record written to disk.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub page_count: usize,
}

/// Default output location: `<out_dir>/<CODE>_<NUMBER>_<DIGIT>.pdf`.
pub fn output_path(id: &RecordIdentifier, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}.pdf", id.file_stem()))
}

/// Single-record mode: parse, fetch, merge, write.
///
/// The identifier is parsed before the fetcher is touched, so a malformed
/// one never starts a browser.
pub async fn run_single<F: RecordFetcher>(
    fetcher: &mut F,
    raw: &str,
    out_dir: &Path,
    output: Option<&Path>,
) -> Result<Downloaded, EkwError> {
    let id = RecordIdentifier::parse(raw.trim())?;
    let path = match output {
        Some(p) => p.to_path_buf(),
        None => output_path(&id, out_dir),
    };
    download_record(fetcher, &id, &path).await
}

/// Fetch one record and write the merged PDF to `path`.
pub async fn download_record<F: RecordFetcher>(
    fetcher: &mut F,
    id: &RecordIdentifier,
    path: &Path,
) -> Result<Downloaded, EkwError> {
    info!("Starting download for entry: {}", id);
    let sections = fetcher.fetch(id).await?;
    let merged = merge(&sections)?;
    write_atomically(path, &merged.bytes)?;
    info!("PDF saved: {} ({} pages)", path.display(), merged.page_count);
    Ok(Downloaded {
        path: path.to_path_buf(),
        page_count: merged.page_count,
    })
}

/// Write through a sibling `.part` file so a crash never leaves a truncated PDF.
/// The `.part` file is removed again if the write or the rename fails.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), EkwError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    let written = fs::write(&part, bytes).and_then(|()| fs::rename(&part, path));
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&part) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("cannot remove {}: {}", part.display(), cleanup);
            }
        }
        return Err(e.into());
    }
    Ok(())
}

// ── Tests ──
