use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::repository::TransferState;

/// A set of warning codes, or every code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WarningSet {
    #[default]
    Empty,
    All,
    Codes(BTreeSet<String>),
}

impl WarningSet {
    /// Collects `codes`; an empty iterator yields [`WarningSet::Empty`].
    pub fn codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: BTreeSet<String> = codes
            .into_iter()
            .map(|code| {
                let code: String = code.into();
                code.trim().to_string()
            })
            .filter(|code| !code.is_empty())
            .collect();
        if codes.is_empty() {
            WarningSet::Empty
        } else {
            WarningSet::Codes(codes)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, WarningSet::All)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WarningSet::Empty => true,
            WarningSet::All => false,
            WarningSet::Codes(codes) => codes.is_empty(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        match self {
            WarningSet::Empty => false,
            WarningSet::All => true,
            WarningSet::Codes(codes) => codes.contains(code),
        }
    }
}

/// Serialized form used by configuration files: `true`, `false` or a list of codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WarningSpec {
    Flag(bool),
    Codes(Vec<String>),
}

impl Default for WarningSpec {
    fn default() -> Self {
        WarningSpec::Flag(false)
    }
}

impl From<&WarningSpec> for WarningSet {
    fn from(spec: &WarningSpec) -> Self {
        match spec {
            WarningSpec::Flag(true) => WarningSet::All,
            WarningSpec::Flag(false) => WarningSet::Empty,
            WarningSpec::Codes(codes) => WarningSet::codes(codes.iter().cloned()),
        }
    }
}

/// The abort and ignore rules applied to upload warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningDecisionSet {
    pub abort_on: WarningSet,
    pub ignore_on: WarningSet,
}

/// Where a source file comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLocator {
    Url(String),
    Path(PathBuf),
}

impl SourceLocator {
    /// Anything containing `://` is treated as a URL; paths get `~` expanded.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.contains("://") {
            SourceLocator::Url(trimmed.to_string())
        } else {
            SourceLocator::Path(PathBuf::from(shellexpand::tilde(trimmed).to_string()))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocator::Url(_))
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            SourceLocator::Url(url) => Some(url),
            SourceLocator::Path(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            SourceLocator::Url(_) => None,
            SourceLocator::Path(path) => Some(path),
        }
    }

    /// Last segment of the URL path or the local file name.
    pub fn base_name(&self) -> String {
        match self {
            SourceLocator::Url(raw) => url_base_name(raw),
            SourceLocator::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Url(url) => f.write_str(url),
            SourceLocator::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

fn url_base_name(raw: &str) -> String {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
            let without_query = without_scheme
                .split(['?', '#'])
                .next()
                .unwrap_or(without_scheme);
            without_query
                .split_once('/')
                .map(|(_, path)| format!("/{path}"))
                .unwrap_or_default()
        }
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Validated description of one upload run.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    sources: Vec<SourceLocator>,
    filename: Option<String>,
    description: String,
    keep_filename: bool,
    verify_description: bool,
    warnings: WarningDecisionSet,
    chunk_size: u64,
    upload_by_url: bool,
    unattended: bool,
    retry_failed: bool,
    comment: Option<String>,
    resume_points: HashMap<SourceLocator, TransferState>,
}

impl UploadRequest {
    pub fn builder<I>(sources: I) -> UploadRequestBuilder
    where
        I: IntoIterator<Item = SourceLocator>,
    {
        UploadRequestBuilder::new(sources)
    }

    pub fn sources(&self) -> &[SourceLocator] {
        &self.sources
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn keep_filename(&self) -> bool {
        self.keep_filename
    }

    pub fn verify_description(&self) -> bool {
        self.verify_description
    }

    pub fn warnings(&self) -> &WarningDecisionSet {
        &self.warnings
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn upload_by_url(&self) -> bool {
        self.upload_by_url
    }

    pub fn unattended(&self) -> bool {
        self.unattended
    }

    pub fn retry_failed(&self) -> bool {
        self.retry_failed
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn resume_point(&self, source: &SourceLocator) -> Option<&TransferState> {
        self.resume_points.get(source)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequestBuilder {
    sources: Vec<SourceLocator>,
    filename: Option<String>,
    description: String,
    keep_filename: bool,
    verify_description: bool,
    warnings: WarningDecisionSet,
    chunk_size: u64,
    upload_by_url: bool,
    unattended: bool,
    retry_failed: bool,
    comment: Option<String>,
    resume_points: HashMap<SourceLocator, TransferState>,
}

impl UploadRequestBuilder {
    fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = SourceLocator>,
    {
        Self {
            sources: sources.into_iter().collect(),
            filename: None,
            description: String::new(),
            keep_filename: false,
            verify_description: true,
            warnings: WarningDecisionSet::default(),
            chunk_size: 0,
            upload_by_url: false,
            unattended: false,
            retry_failed: false,
            comment: None,
            resume_points: HashMap::new(),
        }
    }

    /// Explicit target name; blank values are ignored.
    pub fn filename<S: Into<String>>(mut self, filename: Option<S>) -> Self {
        self.filename = filename
            .map(Into::<String>::into)
            .filter(|name| !name.trim().is_empty());
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn keep_filename(mut self, keep: bool) -> Self {
        self.keep_filename = keep;
        self
    }

    pub fn verify_description(mut self, verify: bool) -> Self {
        self.verify_description = verify;
        self
    }

    pub fn ignore_on(mut self, set: WarningSet) -> Self {
        self.warnings.ignore_on = set;
        self
    }

    pub fn abort_on(mut self, set: WarningSet) -> Self {
        self.warnings.abort_on = set;
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn upload_by_url(mut self, by_url: bool) -> Self {
        self.upload_by_url = by_url;
        self
    }

    pub fn unattended(mut self, unattended: bool) -> Self {
        self.unattended = unattended;
        self
    }

    pub fn retry_failed(mut self, retry: bool) -> Self {
        self.retry_failed = retry;
        self
    }

    pub fn comment<S: Into<String>>(mut self, comment: Option<S>) -> Self {
        self.comment = comment
            .map(Into::<String>::into)
            .filter(|text| !text.is_empty());
        self
    }

    /// Continue a chunked transfer observed in an earlier run.
    pub fn resume_point(mut self, source: SourceLocator, state: TransferState) -> Self {
        self.resume_points.insert(source, state);
        self
    }

    pub fn build(self) -> Result<UploadRequest, ConfigurationError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::NoSources);
        }
        if self.unattended {
            if self.warnings.ignore_on.is_empty() && self.warnings.abort_on.is_empty() {
                return Err(ConfigurationError::UnattendedWithoutWarningRules);
            }
            if self.description.trim().is_empty() {
                return Err(ConfigurationError::UnattendedWithoutDescription);
            }
            if !self.keep_filename {
                return Err(ConfigurationError::UnattendedFilenamePrompt);
            }
            if self.verify_description {
                return Err(ConfigurationError::UnattendedDescriptionReview);
            }
        }

        Ok(UploadRequest {
            sources: self.sources,
            filename: self.filename,
            description: self.description,
            keep_filename: self.keep_filename,
            verify_description: self.verify_description,
            warnings: self.warnings,
            chunk_size: self.chunk_size,
            upload_by_url: self.upload_by_url,
            unattended: self.unattended,
            retry_failed: self.retry_failed,
            comment: self.comment,
            resume_points: self.resume_points,
        })
    }
}
