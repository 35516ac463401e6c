//! Drives a run: preconditions, then negotiate, transfer and report for each
//! source in turn.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{InteractionError, RunError, UploadError};
use crate::fetch::{FetchOutcome, Fetcher, HttpTransport, StagedFile, Transport};
use crate::interaction::Interaction;
use crate::negotiate::{DescriptionState, NameNegotiator, Negotiation};
use crate::policy::WarningPolicy;
use crate::repository::{
    AssetHandle, Repository, TransferState, UPLOAD_RIGHT, UploadCall, UploadSource, UploadWarning,
    WarningHandling,
};
use crate::request::{SourceLocator, UploadRequest};

/// Lifecycle of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    NameNegotiated,
    Transferring,
    Succeeded,
    Skipped,
    Failed,
}

impl FileState {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            FileState::Succeeded | FileState::Skipped | FileState::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub source: String,
    pub filename: Option<String>,
    pub state: FileState,
    pub error: Option<String>,
    /// Where an interrupted chunked transfer can be picked up again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferState>,
}

impl FileOutcome {
    fn new(source: &SourceLocator) -> Self {
        Self {
            source: source.to_string(),
            filename: None,
            state: FileState::Pending,
            error: None,
            transfer: None,
        }
    }

    fn finish(mut self, state: FileState) -> Self {
        self.state = state;
        self
    }

    fn fail(mut self, err: &UploadError) -> Self {
        self.state = FileState::Failed;
        self.error = Some(err.to_string());
        self
    }
}

/// A transfer that a later run can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub source: String,
    pub state: TransferState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Sources left untouched because the run halted.
    pub not_attempted: Vec<String>,
    pub outcomes: Vec<FileOutcome>,
    pub halted: Option<String>,
    pub resumable: Vec<ResumePoint>,
}

impl RunReport {
    fn record(&mut self, outcome: FileOutcome) {
        let source = outcome.source.clone();
        match outcome.state {
            FileState::Succeeded => self.succeeded.push(source),
            FileState::Skipped => self.skipped.push(source),
            _ => {
                if let Some(state) = outcome.transfer.clone() {
                    self.resumable.push(ResumePoint {
                        source: source.clone(),
                        state,
                    });
                }
                self.failed.push(source);
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.halted.is_none()
    }
}

enum Transferred {
    Uploaded,
    Declined,
    NotFound,
}

pub struct UploadOrchestrator<R, I, T = HttpTransport> {
    repository: R,
    interaction: I,
    fetcher: Fetcher<T>,
}

impl<R: Repository, I: Interaction, T: Transport> UploadOrchestrator<R, I, T> {
    pub fn new(repository: R, interaction: I, fetcher: Fetcher<T>) -> Self {
        Self {
            repository,
            interaction,
            fetcher,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Uploads every source of `request` in order.
    ///
    /// Fails only when the preconditions do; per-file problems end up in the
    /// returned report.
    pub fn run(&mut self, request: &UploadRequest) -> Result<RunReport, RunError> {
        self.check_preconditions()?;

        let allowed_extensions = match self.repository.allowed_extensions() {
            Ok(extensions) => extensions,
            Err(err) => {
                warn!(error = %err, "Could not look up allowed file extensions; not restricting");
                None
            }
        };
        let policy = WarningPolicy::from_request(request);
        let mut description = DescriptionState::from_request(request);
        let mut report = RunReport::default();

        let sources = request.sources();
        for (index, source) in sources.iter().enumerate() {
            let (outcome, halt) = self.process_source(
                request,
                &policy,
                allowed_extensions.as_deref(),
                source,
                &mut description,
            );
            report.record(outcome);

            if let Some(reason) = halt {
                error!(reason = %reason, "Halting run");
                report.not_attempted = sources[index + 1..]
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                report.halted = Some(reason);
                break;
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted.len(),
            "Run finished"
        );
        Ok(report)
    }

    fn check_preconditions(&self) -> Result<(), RunError> {
        let name = self.repository.name();
        if self.repository.uploads_disabled()? {
            error!(repository = %name, "Local file uploads are disabled");
            return Err(RunError::UploadsDisabled(name));
        }

        let rights = self.repository.user_rights()?;
        if !rights.iter().any(|right| right == UPLOAD_RIGHT) {
            let user = self.repository.user();
            error!(user = %user, repository = %name, "User does not have upload rights");
            return Err(RunError::MissingUploadRights {
                user,
                repository: name,
            });
        }
        Ok(())
    }

    /// Returns the final outcome and, when the run must stop, the reason.
    fn process_source(
        &mut self,
        request: &UploadRequest,
        policy: &WarningPolicy,
        allowed_extensions: Option<&[String]>,
        source: &SourceLocator,
        description: &mut DescriptionState,
    ) -> (FileOutcome, Option<String>) {
        let mut outcome = FileOutcome::new(source);

        let negotiator = NameNegotiator::new(&self.repository, policy, request, allowed_extensions);
        let target = match negotiator.negotiate(source, description, &mut self.interaction) {
            Ok(Negotiation::Accepted {
                filename,
                description,
            }) => AssetHandle {
                filename,
                description,
            },
            Ok(Negotiation::Skip) => return (outcome.finish(FileState::Skipped), None),
            Err(err) => return self.failure(outcome, err),
        };
        outcome.filename = Some(target.filename.clone());
        outcome.state = FileState::NameNegotiated;

        let mut transfer = request.resume_point(source).cloned();
        loop {
            outcome.state = FileState::Transferring;
            let err = match self.transfer(request, policy, source, &target, transfer.as_ref()) {
                Ok(Transferred::Uploaded) => {
                    info!(filename = %target.filename, "Upload successful");
                    self.interaction
                        .notify(&format!("Upload of {} successful.", target.filename));
                    outcome.transfer = None;
                    return (outcome.finish(FileState::Succeeded), None);
                }
                Ok(Transferred::Declined) => {
                    info!(filename = %target.filename, "Upload aborted");
                    self.interaction.notify("Upload aborted.");
                    return (outcome.finish(FileState::Skipped), None);
                }
                Ok(Transferred::NotFound) => {
                    self.interaction.notify(&format!(
                        "Couldn't download {source}: the requested URL was not found on server."
                    ));
                    return (outcome.finish(FileState::Skipped), None);
                }
                Err(err) => err,
            };

            if let Some(checkpoint) = err.checkpoint() {
                transfer = Some(checkpoint.clone());
            }
            outcome.transfer = transfer.clone();

            if err.halts_run() || !request.retry_failed() || request.unattended() {
                return self.failure(outcome, err);
            }

            error!(source = %outcome.source, error = %err, "Upload error");
            self.interaction.notify(&format!("Upload error: {err}"));
            match self.interaction.prompt_yes_no("Upload failed. Retry?", false) {
                Ok(true) => {
                    info!(filename = %target.filename, "Retrying upload");
                    continue;
                }
                Ok(false) => return (outcome.fail(&err), None),
                Err(prompt_err) => {
                    let reason = prompt_err.to_string();
                    return (outcome.fail(&err), Some(reason));
                }
            }
        }
    }

    fn failure(&mut self, outcome: FileOutcome, err: UploadError) -> (FileOutcome, Option<String>) {
        let halt = if err.halts_run() {
            match &err {
                UploadError::Api(api) if api.is_uploads_disabled() => Some(format!(
                    "Local file uploads are disabled on {}.",
                    self.repository.name()
                )),
                other => Some(other.to_string()),
            }
        } else {
            None
        };

        error!(source = %outcome.source, error = %err, "Upload error");
        if !matches!(err, UploadError::Interaction(_)) {
            self.interaction.notify(&format!("Upload error: {err}"));
        }
        (outcome.fail(&err), halt)
    }

    fn transfer(
        &mut self,
        request: &UploadRequest,
        policy: &WarningPolicy,
        source: &SourceLocator,
        target: &AssetHandle,
        resume: Option<&TransferState>,
    ) -> Result<Transferred, UploadError> {
        let staged: StagedFile;
        let upload_source = match source {
            SourceLocator::Url(url) if request.upload_by_url() => UploadSource::Url(url),
            SourceLocator::Url(url) => match self.fetcher.fetch(url)? {
                FetchOutcome::Staged(file) => {
                    staged = file;
                    UploadSource::File(staged.path())
                }
                FetchOutcome::NotFound => return Ok(Transferred::NotFound),
            },
            SourceLocator::Path(path) => UploadSource::File(path),
        };

        self.interaction.notify(&format!(
            "Uploading file to {}...",
            self.repository.name()
        ));
        info!(filename = %target.filename, source = %source, "Uploading");

        let mut interaction_error: Option<InteractionError> = None;
        let result = {
            let interaction = &mut self.interaction;
            let mut handler = |warnings: &[UploadWarning]| -> bool {
                match policy.resolve_all(warnings, &mut *interaction) {
                    Ok(proceed) => proceed,
                    Err(err) => {
                        interaction_error = Some(err);
                        false
                    }
                }
            };
            let warnings = if policy.ignores_everything() {
                WarningHandling::AlwaysIgnore
            } else {
                WarningHandling::Policy(&mut handler)
            };
            self.repository.upload(UploadCall {
                target,
                source: upload_source,
                warnings,
                chunk_size: request.chunk_size(),
                resume,
                comment: request.comment(),
            })
        };

        if let Some(err) = interaction_error {
            return Err(err.into());
        }
        match result? {
            true => Ok(Transferred::Uploaded),
            false => Ok(Transferred::Declined),
        }
    }
}
