//! Decision providers: whoever answers the pipeline's questions.

use tracing::info;

use crate::error::InteractionError;

/// Questions the pipeline may ask while negotiating and uploading.
///
/// Console front ends block on the user; automated providers answer from a
/// fixed policy. Every prompt returns an error instead of guessing when it
/// cannot be answered.
pub trait Interaction {
    fn prompt_yes_no(&mut self, question: &str, default: bool) -> Result<bool, InteractionError>;

    /// Free-text answer; an empty string means "keep the default".
    fn prompt_text(&mut self, question: &str) -> Result<String, InteractionError>;

    fn notify(&mut self, message: &str);

    /// Opens `current` for editing. `None` means the edit was cancelled or left
    /// the text unchanged.
    fn edit_description(&mut self, current: &str) -> Result<Option<String>, InteractionError>;
}

impl<T: Interaction + ?Sized> Interaction for &mut T {
    fn prompt_yes_no(&mut self, question: &str, default: bool) -> Result<bool, InteractionError> {
        (**self).prompt_yes_no(question, default)
    }

    fn prompt_text(&mut self, question: &str) -> Result<String, InteractionError> {
        (**self).prompt_text(question)
    }

    fn notify(&mut self, message: &str) {
        (**self).notify(message)
    }

    fn edit_description(&mut self, current: &str) -> Result<Option<String>, InteractionError> {
        (**self).edit_description(current)
    }
}

/// Provider for unattended runs: messages go to the log and every question is
/// refused, so a code path that still wants to ask surfaces as an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Interaction for Unattended {
    fn prompt_yes_no(&mut self, question: &str, _default: bool) -> Result<bool, InteractionError> {
        Err(InteractionError::Unattended(question.to_string()))
    }

    fn prompt_text(&mut self, question: &str) -> Result<String, InteractionError> {
        Err(InteractionError::Unattended(question.to_string()))
    }

    fn notify(&mut self, message: &str) {
        info!(target: "fileup::notify", "{message}");
    }

    fn edit_description(&mut self, _current: &str) -> Result<Option<String>, InteractionError> {
        Err(InteractionError::Unattended(
            "edit the description".to_string(),
        ))
    }
}
