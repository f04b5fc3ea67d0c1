//! Native file-selection dialog.
//!
//! The backend has no window of its own; [`SystemFilePicker`] opens the
//! platform dialog through `rfd` (the XDG desktop portal on Linux, the
//! native panels on macOS and Windows). Cancelling the dialog yields an
//! empty list.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

const DIALOG_TITLE: &str = "Select one or more PDF files";

/// Something that can ask the user to choose PDF files.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn pick_pdfs(&self) -> Result<Vec<PathBuf>>;
}

/// Multi-select PDF dialog of the host platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFilePicker;

#[async_trait]
impl FilePicker for SystemFilePicker {
    async fn pick_pdfs(&self) -> Result<Vec<PathBuf>> {
        tracing::info!("opening file selection dialog");

        let picked = rfd::AsyncFileDialog::new()
            .set_title(DIALOG_TITLE)
            .add_filter("PDF", &["pdf", "PDF"])
            .pick_files()
            .await;

        let paths: Vec<PathBuf> = picked
            .unwrap_or_default()
            .iter()
            .map(|f| f.path().to_path_buf())
            .collect();

        tracing::info!(selected = paths.len(), "file dialog closed");
        Ok(paths)
    }
}

/// A picker that always returns the same paths. Useful for headless runs.
#[derive(Debug, Clone, Default)]
pub struct FixedFilePicker(pub Vec<PathBuf>);

#[async_trait]
impl FilePicker for FixedFilePicker {
    async fn pick_pdfs(&self) -> Result<Vec<PathBuf>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_picker() {
        let picker = FixedFilePicker(vec![PathBuf::from("/tmp/x.pdf"), PathBuf::from("/tmp/y.pdf")]);
        let picked = picker.pick_pdfs().await.unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picker.pick_pdfs().await.unwrap(), picked);
    }

    #[tokio::test]
    async fn test_fixed_picker_empty_means_cancelled() {
        let picker = FixedFilePicker::default();
        assert!(picker.pick_pdfs().await.unwrap().is_empty());
    }
}
