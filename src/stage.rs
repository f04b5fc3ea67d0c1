//! Document staging.
//!
//! Copies the user's chosen files into the working documents folder,
//! replacing whatever was there before. The index builder only ever reads
//! from this folder.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::StageReport;

/// Replace the contents of `staging_dir` with copies of `sources`.
///
/// Sources that do not exist (or are not regular files) are skipped and
/// counted. Files land under their base filename, so two sources with the
/// same name collapse into the last one copied.
pub fn stage_documents(staging_dir: &Path, sources: &[PathBuf]) -> Result<StageReport> {
    fs::create_dir_all(staging_dir).with_context(|| {
        format!(
            "Failed to create documents folder: {}",
            staging_dir.display()
        )
    })?;

    clear_files(staging_dir)?;

    let mut report = StageReport::default();
    for src in sources {
        let file_name = match (src.is_file(), src.file_name()) {
            (true, Some(name)) => name,
            _ => {
                tracing::debug!(path = %src.display(), "skipping missing source file");
                report.skipped += 1;
                continue;
            }
        };

        let dest = staging_dir.join(file_name);
        fs::copy(src, &dest).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dest.display())
        })?;
        report.copied += 1;
    }

    tracing::info!(
        copied = report.copied,
        skipped = report.skipped,
        dir = %staging_dir.display(),
        "staged documents"
    );
    Ok(report)
}

/// List staged PDFs (case-insensitive `.pdf` extension), sorted by name.
pub fn list_pdfs(staging_dir: &Path) -> Result<Vec<PathBuf>> {
    if !staging_dir.exists() {
        return Ok(Vec::new());
    }

    let mut pdfs = Vec::new();
    for entry in fs::read_dir(staging_dir)
        .with_context(|| format!("Failed to read {}", staging_dir.display()))?
    {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    Ok(pdfs)
}

fn clear_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}
