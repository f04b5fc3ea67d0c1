//! API credential validation and persistence.
//!
//! A key is checked syntactically first (non-empty, `sk-` prefix) so
//! obviously bad input never reaches the network. A well-formed key is
//! then probed with a single one-message completion against the
//! validation model.
//!
//! Keys are stored in a dotenv-style file:
//!
//! ```text
//! OPENAI_API_KEY="sk-..."
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::LibraryError;
use crate::llm::{ChatBackend, ChatMessage};

/// Variable name used in the credential file and the environment.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Message reported for a key the API accepted.
pub const VALID_MESSAGE: &str = "API key is valid.";

const KEY_PREFIX: &str = "sk-";

/// Syntactic check. Returns the trimmed key.
pub fn check_format(key: &str) -> Result<&str, LibraryError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(LibraryError::MissingCredential);
    }
    if !key.starts_with(KEY_PREFIX) {
        return Err(LibraryError::MalformedCredential);
    }
    Ok(key)
}

/// Validate `key` against the completion API.
///
/// Authentication failures map to [`LibraryError::CredentialRejected`];
/// anything else (network, quota, server) to
/// [`LibraryError::CredentialCheckFailed`] with the detail.
pub async fn check_api_key(backend: &dyn ChatBackend, key: &str) -> Result<(), LibraryError> {
    let key = check_format(key)?;

    let model = backend.validation_model(key);
    match model.complete(&[ChatMessage::user("test")], &[]).await {
        Ok(_) => {
            tracing::info!("API key accepted");
            Ok(())
        }
        Err(e) if e.is_authentication() => {
            tracing::warn!("API key rejected");
            Err(LibraryError::CredentialRejected)
        }
        Err(e) => {
            tracing::warn!(error = %e, "API key check failed");
            Err(LibraryError::CredentialCheckFailed(e.to_string()))
        }
    }
}

/// Write `key` to the credential file, replacing any previous contents.
pub fn save_credential(path: &Path, key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, format!("{}=\"{}\"\n", API_KEY_VAR, key.trim()))
        .with_context(|| format!("Failed to write credential file: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "credential saved");
    Ok(())
}

/// Read the stored key, falling back to the `OPENAI_API_KEY` environment
/// variable. Returns `None` when neither is set.
pub fn load_credential(path: &Path) -> Result<Option<String>> {
    if path.is_file() {
        if let Some(key) = read_credential_file(path)? {
            return Ok(Some(key));
        }
    }

    Ok(std::env::var(API_KEY_VAR)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// The key stored in a dotenv file, if it holds a non-empty one.
fn read_credential_file(path: &Path) -> Result<Option<String>> {
    let entries = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to read credential file: {}", path.display()))?;

    for entry in entries {
        let (name, value) = entry
            .with_context(|| format!("Failed to parse credential file: {}", path.display()))?;
        if name == API_KEY_VAR {
            let value = value.trim();
            return Ok(Some(value.to_string()).filter(|v| !v.is_empty()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rejections() {
        assert!(matches!(
            check_format(""),
            Err(LibraryError::MissingCredential)
        ));
        assert!(matches!(
            check_format("   "),
            Err(LibraryError::MissingCredential)
        ));
        assert!(matches!(
            check_format("foo"),
            Err(LibraryError::MalformedCredential)
        ));
        assert_eq!(check_format("  sk-abc \n").unwrap(), "sk-abc");
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/.env");

        save_credential(&path, " sk-test-123 ").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "OPENAI_API_KEY=\"sk-test-123\"\n"
        );
        assert_eq!(load_credential(&path).unwrap().as_deref(), Some("sk-test-123"));
    }

    fn read_str(content: &str) -> Option<String> {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        fs::write(&path, content).unwrap();
        read_credential_file(&path).unwrap()
    }

    #[test]
    fn test_file_variants() {
        assert_eq!(
            read_str("# comment\nOTHER=1\nOPENAI_API_KEY=sk-plain\n").as_deref(),
            Some("sk-plain")
        );
        assert_eq!(
            read_str("export OPENAI_API_KEY='sk-single'\n").as_deref(),
            Some("sk-single")
        );
        assert_eq!(read_str("OPENAI_API_KEY=\"\"\n"), None);
        assert_eq!(read_str("NOTHING_HERE=1\n"), None);
    }
}
