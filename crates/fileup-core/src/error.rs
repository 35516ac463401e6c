use std::io;

use thiserror::Error;

use crate::repository::TransferState;

/// API error code reported when the repository refuses all uploads.
pub const UPLOADS_DISABLED: &str = "uploaddisabled";

/// Invalid request combinations, rejected before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no source files or URLs were given")]
    NoSources,
    #[error("unattended uploads require ignore or abort warning rules")]
    UnattendedWithoutWarningRules,
    #[error("unattended uploads require a description")]
    UnattendedWithoutDescription,
    #[error("unattended uploads cannot prompt for a filename; keep the original filename")]
    UnattendedFilenamePrompt,
    #[error("unattended uploads cannot verify the description interactively")]
    UnattendedDescriptionReview,
}

/// Typed protocol-level rejection raised by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
    /// Progress of an interrupted chunked transfer, when the repository kept it.
    pub checkpoint: Option<TransferState>,
}

impl ApiError {
    pub fn new<C: Into<String>, I: Into<String>>(code: C, info: I) -> Self {
        Self {
            code: code.into(),
            info: info.into(),
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: TransferState) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn is_uploads_disabled(&self) -> bool {
        self.code == UPLOADS_DISABLED
    }
}

/// Failures while downloading a remote source into the staging area.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("gave up on {url} after {attempts} attempts ({received} of {expected} bytes)")]
    Exhausted {
        url: String,
        attempts: u32,
        received: u64,
        expected: u64,
    },
}

/// The decision provider could not answer.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("IO error while prompting: {0}")]
    Io(#[from] io::Error),
    #[error("input stream closed")]
    Closed,
    #[error("interactive input requested during an unattended run: {0}")]
    Unattended(String),
    #[error("editor failed: {0}")]
    Editor(String),
}

/// File-scoped failure while negotiating or transferring one source.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Interaction(#[from] InteractionError),
    #[error("{0}")]
    Message(String),
}

impl UploadError {
    pub fn message<T: Into<String>>(message: T) -> Self {
        UploadError::Message(message.into())
    }

    /// Conditions that end the whole run rather than a single file.
    pub fn halts_run(&self) -> bool {
        match self {
            UploadError::Api(err) => err.is_uploads_disabled(),
            UploadError::Interaction(_) => true,
            _ => false,
        }
    }

    pub fn checkpoint(&self) -> Option<&TransferState> {
        match self {
            UploadError::Api(err) => err.checkpoint.as_ref(),
            _ => None,
        }
    }
}

/// Run-fatal conditions detected before any file is attempted.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("uploads are disabled on {0}")]
    UploadsDisabled(String),
    #[error("user '{user}' does not have upload rights on {repository}")]
    MissingUploadRights { user: String, repository: String },
    #[error("repository lookup failed: {0}")]
    Repository(#[from] ApiError),
}
