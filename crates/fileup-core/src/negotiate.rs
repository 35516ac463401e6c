use tracing::{debug, info};

use crate::error::{InteractionError, UploadError};
use crate::interaction::Interaction;
use crate::policy::{Resolution, WarningPolicy};
use crate::repository::{EXISTS_WARNING, Repository};
use crate::request::{SourceLocator, UploadRequest};

/// Characters the repository namespace does not accept in a filename.
pub const FORBIDDEN_CHARACTERS: [char; 5] = [':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    Accepted { filename: String, description: String },
    Skip,
}

/// Description text plus whether it still has to be reviewed. One value lives
/// for the whole run, so an edit or review made for one file carries over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionState {
    pub text: String,
    pub verify: bool,
}

impl DescriptionState {
    pub fn from_request(request: &UploadRequest) -> Self {
        Self {
            text: request.description().to_string(),
            verify: request.verify_description(),
        }
    }
}

enum Verdict {
    Accept,
    Retry,
    Skip,
}

/// Works out the target filename and description for one source.
pub struct NameNegotiator<'a, R: Repository + ?Sized> {
    repository: &'a R,
    policy: &'a WarningPolicy,
    request: &'a UploadRequest,
    allowed_extensions: Option<&'a [String]>,
}

impl<'a, R: Repository + ?Sized> NameNegotiator<'a, R> {
    pub fn new(
        repository: &'a R,
        policy: &'a WarningPolicy,
        request: &'a UploadRequest,
        allowed_extensions: Option<&'a [String]>,
    ) -> Self {
        Self {
            repository,
            policy,
            request,
            allowed_extensions: allowed_extensions.filter(|extensions| !extensions.is_empty()),
        }
    }

    pub fn negotiate(
        &self,
        locator: &SourceLocator,
        description: &mut DescriptionState,
        interaction: &mut dyn Interaction,
    ) -> Result<Negotiation, UploadError> {
        let Some(filename) = self.choose_filename(locator, interaction)? else {
            info!(source = %locator, "No usable filename; skipping");
            return Ok(Negotiation::Skip);
        };
        self.review_description(description, interaction)?;

        Ok(Negotiation::Accepted {
            filename,
            description: description.text.clone(),
        })
    }

    fn choose_filename(
        &self,
        locator: &SourceLocator,
        interaction: &mut dyn Interaction,
    ) -> Result<Option<String>, UploadError> {
        let mut candidate = match self.request.filename() {
            Some(name) => name.to_string(),
            None => locator.base_name(),
        };

        if !self.request.keep_filename() {
            if self.request.unattended() {
                return Err(InteractionError::Unattended("choose a target filename".to_string()).into());
            }
            interaction.notify(&format!(
                "The filename on the target will default to: {candidate}"
            ));
            let answer = interaction.prompt_text("Enter a better name, or press enter to accept:")?;
            let answer = answer.trim();
            if !answer.is_empty() {
                candidate = answer.to_string();
            }
        }

        let mut first_check = true;
        loop {
            if !first_check {
                if self.request.unattended() {
                    return Ok(None);
                }
                let answer =
                    interaction.prompt_text("Enter a better name, or press enter to skip the file:")?;
                let answer = answer.trim();
                if answer.is_empty() {
                    return Ok(None);
                }
                candidate = answer.to_string();
            }
            first_check = false;

            match self.check_candidate(&candidate, interaction)? {
                Verdict::Accept => {
                    debug!(filename = %candidate, "Filename accepted");
                    return Ok(Some(candidate));
                }
                Verdict::Skip => return Ok(None),
                Verdict::Retry => continue,
            }
        }
    }

    fn check_candidate(
        &self,
        candidate: &str,
        interaction: &mut dyn Interaction,
    ) -> Result<Verdict, UploadError> {
        if candidate.is_empty() {
            interaction.notify("The filename is empty. Please try again");
            return Ok(Verdict::Retry);
        }

        let invalid: String = FORBIDDEN_CHARACTERS
            .iter()
            .filter(|c| candidate.contains(**c))
            .collect();
        if !invalid.is_empty() {
            interaction.notify(&format!("Invalid character(s): {invalid}. Please try again"));
            return Ok(Verdict::Retry);
        }

        if let Some(allowed) = self.allowed_extensions {
            let ext = extension(candidate);
            if !allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
                let formats = allowed.join(" ");
                if self.request.unattended() {
                    interaction.notify(&format!("File format is not one of [{formats}]"));
                    return Ok(Verdict::Retry);
                }
                let question = format!("File format is not one of [{formats}], but {ext}. Continue?");
                if !interaction.prompt_yes_no(&question, false)? {
                    return Ok(Verdict::Retry);
                }
            }
        }

        let status = self.repository.page_status(candidate)?;
        if status.exists {
            return match self.policy.resolve(EXISTS_WARNING) {
                Resolution::Abort => {
                    interaction.notify("File exists and you asked to abort. Skipping.");
                    Ok(Verdict::Skip)
                }
                _ if !status.editable => {
                    interaction.notify(&format!(
                        "File with name {candidate} already exists and cannot be overwritten."
                    ));
                    Ok(Verdict::Retry)
                }
                Resolution::Ignore => Ok(Verdict::Accept),
                Resolution::AskUser => {
                    let question = format!(
                        "File with name {candidate} already exists. Would you like to change the name? (Otherwise file will be overwritten.)"
                    );
                    if interaction.prompt_yes_no(&question, true)? {
                        Ok(Verdict::Retry)
                    } else {
                        Ok(Verdict::Accept)
                    }
                }
            };
        }

        if status.shared_elsewhere {
            interaction.notify(&format!(
                "File with name {candidate} already exists in shared repository and cannot be overwritten."
            ));
            return Ok(Verdict::Retry);
        }

        Ok(Verdict::Accept)
    }

    fn review_description(
        &self,
        state: &mut DescriptionState,
        interaction: &mut dyn Interaction,
    ) -> Result<(), UploadError> {
        interaction.notify(&format!("The suggested description is:\n{}", state.text));

        if state.text.trim().is_empty() {
            state.verify = true;
        }
        if !state.verify {
            return Ok(());
        }
        if self.request.unattended() {
            return Err(InteractionError::Unattended("review the description".to_string()).into());
        }

        loop {
            let empty = state.text.trim().is_empty();
            if empty {
                interaction.notify("It is not possible to upload a file without a description.");
            }
            if interaction.prompt_yes_no("Do you want to change this description?", empty)? {
                match interaction.edit_description(&state.text) {
                    Ok(Some(edited)) if !edited.trim().is_empty() => state.text = edited,
                    Ok(_) => debug!("Description edit cancelled"),
                    Err(InteractionError::Editor(message)) => {
                        interaction.notify(&format!("Could not edit the description: {message}"));
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
                break;
            }
            if !empty {
                break;
            }
        }

        state.verify = false;
        Ok(())
    }
}

/// Lowercase extension without the dot; empty when there is none.
fn extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PageStatus;
    use crate::request::{UploadRequestBuilder, WarningSet};
    use crate::testing::{Answer, Exchange, MemoryRepository, ScriptedInteraction};

    fn builder() -> UploadRequestBuilder {
        UploadRequest::builder([SourceLocator::parse("/srv/incoming/photo.jpg")])
            .description("Sunset over the harbour")
            .keep_filename(true)
            .verify_description(false)
    }

    fn run(
        repository: &MemoryRepository,
        request: &UploadRequest,
        interaction: &mut ScriptedInteraction,
    ) -> Result<Negotiation, UploadError> {
        let policy = WarningPolicy::from_request(request);
        let allowed = repository.allowed_extensions.clone();
        let negotiator = NameNegotiator::new(repository, &policy, request, allowed.as_deref());
        let mut description = DescriptionState::from_request(request);
        negotiator.negotiate(&request.sources()[0], &mut description, interaction)
    }

    fn accepted(filename: &str) -> Negotiation {
        Negotiation::Accepted {
            filename: filename.to_string(),
            description: "Sunset over the harbour".to_string(),
        }
    }

    #[test]
    fn valid_name_is_accepted_without_prompts_every_time() {
        let repository = MemoryRepository::new("test");
        let request = builder().build().expect("request");

        for _ in 0..2 {
            let mut interaction = ScriptedInteraction::new([]);
            let outcome = run(&repository, &request, &mut interaction).expect("negotiated");
            assert_eq!(outcome, accepted("photo.jpg"));
            assert_eq!(interaction.prompt_count(), 0);
        }
    }

    #[test]
    fn forbidden_characters_force_a_new_name() {
        let repository = MemoryRepository::new("test");
        let request = builder().filename(Some("a:b.jpg")).build().expect("request");
        let mut interaction = ScriptedInteraction::new([Answer::Text("a-b.jpg".into())]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, accepted("a-b.jpg"));
        assert!(interaction.notifications()[0].contains("Invalid character(s): :"));
    }

    #[test]
    fn empty_answer_on_retry_skips_the_file() {
        let repository = MemoryRepository::new("test");
        let request = builder().filename(Some("what?.jpg")).build().expect("request");
        let mut interaction = ScriptedInteraction::new([Answer::Text(String::new())]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");
        assert_eq!(outcome, Negotiation::Skip);
    }

    #[test]
    fn replacement_name_is_offered_when_not_keeping() {
        let repository = MemoryRepository::new("test");
        let request = builder().keep_filename(false).build().expect("request");
        let mut interaction = ScriptedInteraction::new([Answer::Text("harbour.jpg".into())]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");
        assert_eq!(outcome, accepted("harbour.jpg"));
    }

    #[test]
    fn disallowed_extension_asks_and_defaults_to_no() {
        let repository = MemoryRepository::new("test").with_allowed_extensions(&["png", "svg"]);
        let request = builder().build().expect("request");
        let mut interaction = ScriptedInteraction::new([
            Answer::Default,
            Answer::Text("photo.png".into()),
        ]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, accepted("photo.png"));
        assert!(matches!(
            &interaction.transcript()[0],
            Exchange::YesNo { question, default: false, answer: false }
                if question == "File format is not one of [png svg], but jpg. Continue?"
        ));
    }

    #[test]
    fn disallowed_extension_is_skipped_when_unattended() {
        let repository = MemoryRepository::new("test").with_allowed_extensions(&["png"]);
        let request = builder()
            .unattended(true)
            .ignore_on(WarningSet::All)
            .build()
            .expect("request");
        let mut interaction = ScriptedInteraction::new([]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, Negotiation::Skip);
        assert_eq!(interaction.prompt_count(), 0);
    }

    #[test]
    fn existing_page_with_abort_rule_is_skipped_without_prompting() {
        let repository = MemoryRepository::new("test").with_page(
            "photo.jpg",
            PageStatus {
                exists: true,
                editable: true,
                shared_elsewhere: false,
            },
        );
        let request = builder()
            .abort_on(WarningSet::codes(["exists"]))
            .build()
            .expect("request");
        let mut interaction = ScriptedInteraction::new([]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, Negotiation::Skip);
        assert_eq!(interaction.prompt_count(), 0);
    }

    #[test]
    fn existing_editable_page_asks_to_rename() {
        let repository = MemoryRepository::new("test").with_page(
            "photo.jpg",
            PageStatus {
                exists: true,
                editable: true,
                shared_elsewhere: false,
            },
        );
        let request = builder().build().expect("request");

        let mut overwrite = ScriptedInteraction::new([Answer::YesNo(false)]);
        assert_eq!(
            run(&repository, &request, &mut overwrite).expect("negotiated"),
            accepted("photo.jpg")
        );

        let mut rename = ScriptedInteraction::new([Answer::Default, Answer::Text("photo-2.jpg".into())]);
        assert_eq!(
            run(&repository, &request, &mut rename).expect("negotiated"),
            accepted("photo-2.jpg")
        );
    }

    #[test]
    fn existing_page_with_ignore_rule_is_overwritten() {
        let repository = MemoryRepository::new("test").with_page(
            "photo.jpg",
            PageStatus {
                exists: true,
                editable: true,
                shared_elsewhere: false,
            },
        );
        let request = builder().ignore_on(WarningSet::All).build().expect("request");
        let mut interaction = ScriptedInteraction::new([]);

        assert_eq!(
            run(&repository, &request, &mut interaction).expect("negotiated"),
            accepted("photo.jpg")
        );
    }

    #[test]
    fn protected_or_shared_names_are_rejected() {
        let repository = MemoryRepository::new("test")
            .with_page(
                "photo.jpg",
                PageStatus {
                    exists: true,
                    editable: false,
                    shared_elsewhere: false,
                },
            )
            .with_page(
                "shared.jpg",
                PageStatus {
                    exists: false,
                    editable: false,
                    shared_elsewhere: true,
                },
            );
        let request = builder().ignore_on(WarningSet::All).build().expect("request");
        let mut interaction = ScriptedInteraction::new([
            Answer::Text("shared.jpg".into()),
            Answer::Text("fresh.jpg".into()),
        ]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, accepted("fresh.jpg"));
        assert!(interaction.notifications()[0].contains("cannot be overwritten"));
        assert!(interaction.notifications()[1].contains("shared repository"));
    }

    #[test]
    fn empty_description_opens_editor_by_default() {
        let repository = MemoryRepository::new("test");
        let request = builder().description("").build().expect("request");
        let mut interaction = ScriptedInteraction::new([
            Answer::Default,
            Answer::Edit(Some("Written in the editor".into())),
        ]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(
            outcome,
            Negotiation::Accepted {
                filename: "photo.jpg".into(),
                description: "Written in the editor".into(),
            }
        );
        assert!(matches!(
            &interaction.transcript()[0],
            Exchange::YesNo { default: true, answer: true, .. }
        ));
    }

    #[test]
    fn cancelled_edit_ends_review_even_when_still_empty() {
        let repository = MemoryRepository::new("test");
        let request = builder().description("").build().expect("request");
        let mut interaction = ScriptedInteraction::new([Answer::YesNo(true), Answer::Edit(None)]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(
            outcome,
            Negotiation::Accepted {
                filename: "photo.jpg".into(),
                description: String::new(),
            }
        );
        assert_eq!(interaction.remaining(), 0);
    }

    #[test]
    fn declining_with_empty_description_asks_again() {
        let repository = MemoryRepository::new("test");
        let request = builder().description("").build().expect("request");
        let mut interaction = ScriptedInteraction::new([
            Answer::YesNo(false),
            Answer::YesNo(true),
            Answer::Edit(Some("Second try".into())),
        ]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert!(matches!(outcome, Negotiation::Accepted { description, .. } if description == "Second try"));
    }

    #[test]
    fn editor_failure_is_reported_and_asked_again() {
        let repository = MemoryRepository::new("test");
        let request = builder().verify_description(true).build().expect("request");
        let mut interaction = ScriptedInteraction::new([
            Answer::YesNo(true),
            Answer::EditFailure("vi exited with status 1".into()),
            Answer::Default,
        ]);

        let outcome = run(&repository, &request, &mut interaction).expect("negotiated");

        assert_eq!(outcome, accepted("photo.jpg"));
        assert!(
            interaction
                .notifications()
                .iter()
                .any(|note| note.contains("vi exited with status 1"))
        );
    }

    #[test]
    fn review_is_done_once_per_run() {
        let repository = MemoryRepository::new("test");
        let request = builder().verify_description(true).build().expect("request");
        let policy = WarningPolicy::from_request(&request);
        let negotiator = NameNegotiator::new(&repository, &policy, &request, None);
        let mut description = DescriptionState::from_request(&request);
        let mut interaction = ScriptedInteraction::new([Answer::YesNo(false)]);

        for _ in 0..2 {
            negotiator
                .negotiate(&request.sources()[0], &mut description, &mut interaction)
                .expect("negotiated");
        }

        assert_eq!(interaction.prompt_count(), 1);
        assert!(!description.verify);
    }

    #[test]
    fn closed_input_is_an_error() {
        let repository = MemoryRepository::new("test");
        let request = builder().keep_filename(false).build().expect("request");
        let mut interaction = ScriptedInteraction::new([]);

        let err = run(&repository, &request, &mut interaction).unwrap_err();
        assert!(matches!(err, UploadError::Interaction(InteractionError::Closed)));
    }

    #[test]
    fn extension_is_lowercase_without_dot() {
        assert_eq!(extension("Photo.JPG"), "jpg");
        assert_eq!(extension("archive.tar.gz"), "gz");
        assert_eq!(extension(".hidden"), "");
        assert_eq!(extension("README"), "");
    }
}
