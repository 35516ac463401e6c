use tracing::{debug, info};

use crate::error::InteractionError;
use crate::interaction::Interaction;
use crate::repository::UploadWarning;
use crate::request::{UploadRequest, WarningDecisionSet};

/// Outcome of applying the rules to a single warning code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Abort,
    Ignore,
    AskUser,
}

#[derive(Debug, Clone)]
pub struct WarningPolicy {
    decisions: WarningDecisionSet,
    unattended: bool,
}

impl WarningPolicy {
    pub fn new(decisions: WarningDecisionSet, unattended: bool) -> Self {
        Self {
            decisions,
            unattended,
        }
    }

    pub fn from_request(request: &UploadRequest) -> Self {
        Self::new(request.warnings().clone(), request.unattended())
    }

    /// Abort rules win over ignore rules; anything left over is asked, or
    /// aborted when nobody is there to ask.
    pub fn resolve(&self, code: &str) -> Resolution {
        let WarningDecisionSet {
            abort_on,
            ignore_on,
        } = &self.decisions;

        if abort_on.contains(code) {
            return Resolution::Abort;
        }
        if ignore_on.contains(code) {
            return Resolution::Ignore;
        }
        if abort_on.is_all() || self.unattended {
            Resolution::Abort
        } else {
            Resolution::AskUser
        }
    }

    /// True only when every warning is ignored and nothing aborts.
    pub fn ignores_everything(&self) -> bool {
        self.decisions.ignore_on.is_all() && self.decisions.abort_on.is_empty()
    }

    /// Decides whether an upload attempt may continue despite `warnings`.
    pub fn resolve_all(
        &self,
        warnings: &[UploadWarning],
        interaction: &mut dyn Interaction,
    ) -> Result<bool, InteractionError> {
        if warnings.is_empty() {
            return Ok(true);
        }

        let mut sorted: Vec<&UploadWarning> = warnings.iter().collect();
        sorted.sort_by(|a, b| a.code.cmp(&b.code));
        let listing = sorted
            .iter()
            .map(|warning| warning.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if sorted.len() > 1 {
            interaction.notify(&format!("We got the following warnings:\n{listing}"));
        } else {
            interaction.notify(&format!("We got the following warning: {listing}"));
        }

        let mut needs_answer = false;
        for warning in &sorted {
            match self.resolve(&warning.code) {
                Resolution::Abort => {
                    info!(code = %warning.code, "Warning aborts the upload");
                    return Ok(false);
                }
                Resolution::AskUser => needs_answer = true,
                Resolution::Ignore => debug!(code = %warning.code, "Ignoring warning"),
            }
        }

        if needs_answer {
            interaction.prompt_yes_no("Do you want to ignore?", false)
        } else {
            Ok(true)
        }
    }
}
