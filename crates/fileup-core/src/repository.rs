//! The interface the pipeline needs from a content repository.
//!
//! Implementations own the wire protocol (or, for [`crate::directory`], the
//! filesystem layout); the pipeline only asks questions about the namespace and
//! hands over a fully described [`UploadCall`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, UploadError};

/// Right a user needs before any upload is attempted.
pub const UPLOAD_RIGHT: &str = "upload";

/// Warning code raised when the target name is already taken.
pub const EXISTS_WARNING: &str = "exists";

/// A warning reported by the repository during one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadWarning {
    pub code: String,
    pub info: String,
}

impl UploadWarning {
    pub fn new<C: Into<String>, I: Into<String>>(code: C, info: I) -> Self {
        Self {
            code: code.into(),
            info: info.into(),
        }
    }
}

impl fmt::Display for UploadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.info)
    }
}

/// What the repository knows about a target name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStatus {
    pub exists: bool,
    pub editable: bool,
    /// The asset is served from a shared repository rather than this one.
    pub shared_elsewhere: bool,
}

/// Progress of a chunked transfer that can be continued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub resume_key: String,
    pub bytes_transferred: u64,
    pub chunk_size: u64,
}

/// Target name and page text for the uploaded asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub filename: String,
    pub description: String,
}

/// Where the repository should read the content from.
#[derive(Debug, Clone, Copy)]
pub enum UploadSource<'a> {
    /// The repository downloads the URL itself.
    Url(&'a str),
    File(&'a Path),
}

/// How warnings raised mid-upload are answered.
pub enum WarningHandling<'a> {
    AlwaysIgnore,
    /// Called once per attempt with every warning; `false` abandons the attempt.
    Policy(&'a mut dyn FnMut(&[UploadWarning]) -> bool),
}

impl fmt::Debug for WarningHandling<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningHandling::AlwaysIgnore => f.write_str("AlwaysIgnore"),
            WarningHandling::Policy(_) => f.write_str("Policy(..)"),
        }
    }
}

impl WarningHandling<'_> {
    /// Returns whether the attempt may go ahead despite `warnings`.
    pub fn proceed(&mut self, warnings: &[UploadWarning]) -> bool {
        if warnings.is_empty() {
            return true;
        }
        match self {
            WarningHandling::AlwaysIgnore => true,
            WarningHandling::Policy(handler) => (*handler)(warnings),
        }
    }
}

#[derive(Debug)]
pub struct UploadCall<'a> {
    pub target: &'a AssetHandle,
    pub source: UploadSource<'a>,
    pub warnings: WarningHandling<'a>,
    /// Zero uploads the file in one piece.
    pub chunk_size: u64,
    pub resume: Option<&'a TransferState>,
    pub comment: Option<&'a str>,
}

pub trait Repository {
    /// Human-readable name used in messages.
    fn name(&self) -> String;

    /// The identity uploads are made as.
    fn user(&self) -> String;

    fn uploads_disabled(&self) -> Result<bool, ApiError>;

    fn user_rights(&self) -> Result<Vec<String>, ApiError>;

    /// `None` when the repository does not restrict file extensions.
    fn allowed_extensions(&self) -> Result<Option<Vec<String>>, ApiError>;

    fn page_status(&self, filename: &str) -> Result<PageStatus, ApiError>;

    /// Returns `Ok(false)` when warnings were declined.
    fn upload(&mut self, call: UploadCall<'_>) -> Result<bool, UploadError>;
}
