//! Scripted collaborators for exercising the pipeline without a console,
//! a network or a real repository.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::{ApiError, FetchError, InteractionError, UploadError};
use crate::fetch::{Transport, TransportResponse};
use crate::interaction::Interaction;
use crate::repository::{
    PageStatus, Repository, TransferState, UPLOAD_RIGHT, UploadCall, UploadSource, UploadWarning,
    WarningHandling,
};

/// One pre-recorded answer for [`ScriptedInteraction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    YesNo(bool),
    /// Accept the default of the next yes/no question.
    Default,
    Text(String),
    Edit(Option<String>),
    EditFailure(String),
}

/// A question that was asked, with the answer given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    YesNo {
        question: String,
        default: bool,
        answer: bool,
    },
    Text {
        question: String,
        answer: String,
    },
    Edit {
        current: String,
    },
}

/// Answers prompts from a queue. Running out of answers, or meeting an answer
/// of the wrong kind, behaves like closed input.
#[derive(Debug, Default)]
pub struct ScriptedInteraction {
    answers: VecDeque<Answer>,
    transcript: Vec<Exchange>,
    notifications: Vec<String>,
}

impl ScriptedInteraction {
    pub fn new<I: IntoIterator<Item = Answer>>(answers: I) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            transcript: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }

    /// Yes/no and text prompts asked so far.
    pub fn prompt_count(&self) -> usize {
        self.transcript
            .iter()
            .filter(|exchange| !matches!(exchange, Exchange::Edit { .. }))
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Interaction for ScriptedInteraction {
    fn prompt_yes_no(&mut self, question: &str, default: bool) -> Result<bool, InteractionError> {
        let answer = match self.answers.pop_front() {
            Some(Answer::YesNo(answer)) => answer,
            Some(Answer::Default) => default,
            _ => return Err(InteractionError::Closed),
        };
        self.transcript.push(Exchange::YesNo {
            question: question.to_string(),
            default,
            answer,
        });
        Ok(answer)
    }

    fn prompt_text(&mut self, question: &str) -> Result<String, InteractionError> {
        let Some(Answer::Text(answer)) = self.answers.pop_front() else {
            return Err(InteractionError::Closed);
        };
        self.transcript.push(Exchange::Text {
            question: question.to_string(),
            answer: answer.clone(),
        });
        Ok(answer)
    }

    fn notify(&mut self, message: &str) {
        self.notifications.push(message.to_string());
    }

    fn edit_description(&mut self, current: &str) -> Result<Option<String>, InteractionError> {
        self.transcript.push(Exchange::Edit {
            current: current.to_string(),
        });
        match self.answers.pop_front() {
            Some(Answer::Edit(result)) => Ok(result),
            Some(Answer::EditFailure(message)) => Err(InteractionError::Editor(message)),
            _ => Err(InteractionError::Closed),
        }
    }
}

/// Where a recorded upload read its content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedSource {
    Url(String),
    File { path: PathBuf, contents: Vec<u8> },
}

/// One call made to [`MemoryRepository::upload`].
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub filename: String,
    pub description: String,
    pub source: RecordedSource,
    pub ignored_wholesale: bool,
    pub chunk_size: u64,
    pub resume: Option<TransferState>,
    pub comment: Option<String>,
    pub accepted: bool,
}

/// In-memory repository with scripted namespace answers, warnings and errors.
#[derive(Debug)]
pub struct MemoryRepository {
    pub name: String,
    pub user: String,
    pub rights: Vec<String>,
    pub uploads_disabled: bool,
    pub allowed_extensions: Option<Vec<String>>,
    pub pages: HashMap<String, PageStatus>,
    /// Warnings raised when uploading to a given filename.
    pub warnings: HashMap<String, Vec<UploadWarning>>,
    /// Errors returned, one per attempt, when uploading to a given filename.
    pub failures: HashMap<String, VecDeque<ApiError>>,
    pub uploads: Vec<RecordedUpload>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryRepository {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            user: "tester".to_string(),
            rights: vec![UPLOAD_RIGHT.to_string()],
            uploads_disabled: false,
            allowed_extensions: None,
            pages: HashMap::new(),
            warnings: HashMap::new(),
            failures: HashMap::new(),
            uploads: Vec::new(),
        }
    }

    pub fn with_page<S: Into<String>>(mut self, filename: S, status: PageStatus) -> Self {
        self.pages.insert(filename.into(), status);
        self
    }

    pub fn with_warnings<S: Into<String>>(mut self, filename: S, warnings: Vec<UploadWarning>) -> Self {
        self.warnings.insert(filename.into(), warnings);
        self
    }

    pub fn with_failure<S: Into<String>>(mut self, filename: S, error: ApiError) -> Self {
        self.failures
            .entry(filename.into())
            .or_default()
            .push_back(error);
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = Some(extensions.iter().map(|ext| ext.to_string()).collect());
        self
    }
}

impl Repository for MemoryRepository {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn user(&self) -> String {
        self.user.clone()
    }

    fn uploads_disabled(&self) -> Result<bool, ApiError> {
        Ok(self.uploads_disabled)
    }

    fn user_rights(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.rights.clone())
    }

    fn allowed_extensions(&self) -> Result<Option<Vec<String>>, ApiError> {
        Ok(self.allowed_extensions.clone())
    }

    fn page_status(&self, filename: &str) -> Result<PageStatus, ApiError> {
        Ok(self.pages.get(filename).copied().unwrap_or_default())
    }

    fn upload(&mut self, mut call: UploadCall<'_>) -> Result<bool, UploadError> {
        let filename = call.target.filename.clone();
        let source = match call.source {
            UploadSource::Url(url) => RecordedSource::Url(url.to_string()),
            UploadSource::File(path) => RecordedSource::File {
                path: path.to_path_buf(),
                contents: fs::read(path)?,
            },
        };
        let mut record = RecordedUpload {
            filename: filename.clone(),
            description: call.target.description.clone(),
            source,
            ignored_wholesale: matches!(call.warnings, WarningHandling::AlwaysIgnore),
            chunk_size: call.chunk_size,
            resume: call.resume.cloned(),
            comment: call.comment.map(str::to_string),
            accepted: false,
        };

        if let Some(error) = self
            .failures
            .get_mut(&filename)
            .and_then(|queue| queue.pop_front())
        {
            self.uploads.push(record);
            return Err(error.into());
        }

        let warnings = self.warnings.get(&filename).cloned().unwrap_or_default();
        if !call.warnings.proceed(&warnings) {
            self.uploads.push(record);
            return Ok(false);
        }

        record.accepted = true;
        self.uploads.push(record);
        self.pages.insert(
            filename,
            PageStatus {
                exists: true,
                editable: true,
                shared_elsewhere: false,
            },
        );
        Ok(true)
    }
}

/// A canned HTTP response for [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub content_range: Option<String>,
    pub body: Vec<u8>,
    /// Break the connection after this many body bytes.
    pub fail_after: Option<usize>,
}

impl ScriptedResponse {
    /// `200` whose declared length matches the body.
    pub fn ok(body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type: Some("application/octet-stream".to_string()),
            content_length: Some(body.len() as u64),
            accept_ranges: false,
            content_range: None,
            body: body.to_vec(),
            fail_after: None,
        }
    }

    /// `206` carrying `body` from `start` of a `total`-byte resource.
    pub fn partial(body: &[u8], start: u64, total: u64) -> Self {
        let end = (start + body.len() as u64).saturating_sub(1);
        Self {
            status: 206,
            content_type: Some("application/octet-stream".to_string()),
            content_length: Some(body.len() as u64),
            accept_ranges: true,
            content_range: Some(format!("bytes {start}-{end}/{total}")),
            body: body.to_vec(),
            fail_after: None,
        }
    }

    pub fn declared_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn accept_ranges(mut self) -> Self {
        self.accept_ranges = true;
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }
}

#[derive(Debug, Default)]
struct TransportScript {
    responses: VecDeque<ScriptedResponse>,
    requests: Vec<(String, u64)>,
}

/// Transport that plays back [`ScriptedResponse`]s and records each request
/// as `(url, range offset)`. Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Rc<RefCell<TransportScript>>,
}

impl ScriptedTransport {
    pub fn new<I: IntoIterator<Item = ScriptedResponse>>(responses: I) -> Self {
        Self {
            script: Rc::new(RefCell::new(TransportScript {
                responses: responses.into_iter().collect(),
                requests: Vec::new(),
            })),
        }
    }

    pub fn requests(&self) -> Vec<(String, u64)> {
        self.script.borrow().requests.clone()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str, offset: u64) -> Result<TransportResponse, FetchError> {
        let mut script = self.script.borrow_mut();
        script.requests.push((url.to_string(), offset));
        let response = script.responses.pop_front().ok_or_else(|| {
            FetchError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no scripted response left",
            ))
        })?;

        Ok(TransportResponse {
            status: response.status,
            content_type: response.content_type,
            content_length: response.content_length,
            accept_ranges: response.accept_ranges.then(|| "bytes".to_string()),
            content_range: response.content_range,
            body: Box::new(BrokenBody {
                data: response.body,
                position: 0,
                fail_after: response.fail_after,
            }),
        })
    }
}

struct BrokenBody {
    data: Vec<u8>,
    position: usize,
    fail_after: Option<usize>,
}

impl Read for BrokenBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.fail_after.unwrap_or(self.data.len()).min(self.data.len());
        if self.position >= limit {
            if self.fail_after.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            }
            return Ok(0);
        }
        let count = buf.len().min(limit - self.position);
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}
