//! Error taxonomy surfaced to the front end.
//!
//! Internal plumbing uses `anyhow`; whatever reaches a session operation's
//! caller is one of these variants. The `Display` strings are the
//! human-readable messages relayed in response payloads.

use thiserror::Error;

/// Broad class of a [`LibraryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation was attempted in the wrong state or without input.
    Precondition,
    /// The API credential is missing, malformed, or rejected.
    Credential,
    /// Loading, parsing, embedding, or indexing documents failed.
    Pipeline,
    /// The agent could not complete a question.
    Agent,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("The agent is not ready. Please load documents first.")]
    NotReady,

    #[error("No file paths were provided.")]
    NoFilePaths,

    #[error("None of the selected files could be found.")]
    NoDocuments,

    #[error("No PDF files found in the documents folder.")]
    NoPdfsFound,

    #[error("API key not provided or in an invalid format.")]
    MissingCredential,

    #[error("Invalid key format. It must start with 'sk-'.")]
    MalformedCredential,

    #[error("Invalid or expired OpenAI API key.")]
    CredentialRejected,

    #[error("Error validating the key: {0}")]
    CredentialCheckFailed(String),

    #[error("{0:#}")]
    Pipeline(anyhow::Error),

    /// The completion API rejected the credential mid-conversation.
    #[error("Invalid or expired OpenAI API key.")]
    Authentication,

    #[error("An error occurred while processing your question.")]
    Processing(#[source] anyhow::Error),
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LibraryError::NotReady
            | LibraryError::NoFilePaths
            | LibraryError::NoDocuments
            | LibraryError::NoPdfsFound => ErrorKind::Precondition,
            LibraryError::MissingCredential
            | LibraryError::MalformedCredential
            | LibraryError::CredentialRejected
            | LibraryError::CredentialCheckFailed(_) => ErrorKind::Credential,
            LibraryError::Pipeline(_) => ErrorKind::Pipeline,
            LibraryError::Authentication | LibraryError::Processing(_) => ErrorKind::Agent,
        }
    }

    /// Expected validation failures, as opposed to wrapped library or
    /// provider errors.
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            LibraryError::CredentialCheckFailed(_)
                | LibraryError::Pipeline(_)
                | LibraryError::Processing(_)
        )
    }
}
