use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process::Command;

use fileup_core::{Interaction, InteractionError};
use tempfile::Builder;
use tracing::{debug, warn};

/// Prompts on a terminal and edits descriptions in an external editor.
pub struct ConsoleInteraction<R, W> {
    input: R,
    output: W,
    editor: String,
}

impl ConsoleInteraction<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout(), editor_command())
    }
}

impl<R: BufRead, W: Write> ConsoleInteraction<R, W> {
    pub fn new(input: R, output: W, editor: String) -> Self {
        Self {
            input,
            output,
            editor,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> Result<String, InteractionError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(InteractionError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn run_editor(&mut self, current: &str) -> Result<String, InteractionError> {
        let file = Builder::new()
            .prefix("fileup-description-")
            .suffix(".txt")
            .tempfile()?;
        fs::write(file.path(), current)?;

        let mut parts = self.editor.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| InteractionError::Editor("no editor configured".to_string()))?;
        debug!(editor = %self.editor, path = %file.path().display(), "Launching editor");
        let status = Command::new(program)
            .args(parts)
            .arg(file.path())
            .status()
            .map_err(|err| InteractionError::Editor(format!("could not start {program}: {err}")))?;
        if !status.success() {
            return Err(InteractionError::Editor(format!("{program} exited with {status}")));
        }

        Ok(fs::read_to_string(file.path())?)
    }
}

impl<R: BufRead, W: Write> Interaction for ConsoleInteraction<R, W> {
    fn prompt_yes_no(&mut self, question: &str, default: bool) -> Result<bool, InteractionError> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            write!(self.output, "{question} {hint} ")?;
            self.output.flush()?;
            let answer = self.read_line()?;
            match answer.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer yes or no.")?,
            }
        }
    }

    fn prompt_text(&mut self, question: &str) -> Result<String, InteractionError> {
        write!(self.output, "{question} ")?;
        self.output.flush()?;
        Ok(self.read_line()?.trim().to_string())
    }

    fn notify(&mut self, message: &str) {
        if let Err(err) = writeln!(self.output, "{message}") {
            warn!(error = %err, "Could not write to the console");
        }
    }

    fn edit_description(&mut self, current: &str) -> Result<Option<String>, InteractionError> {
        let edited = self.run_editor(current)?;
        let edited = edited.trim_end().to_string();
        if edited == current.trim_end() {
            return Ok(None);
        }

        writeln!(self.output, "Description changes:")?;
        let theme = termdiff::SignsColorTheme {};
        termdiff::diff(&mut self.output, current, &edited, &theme)?;
        self.output.flush()?;
        Ok(Some(edited))
    }
}

/// `$VISUAL`, then `$EDITOR`, then `vi`.
pub fn editor_command() -> String {
    ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn console(input: &str, editor: &str) -> ConsoleInteraction<Cursor<Vec<u8>>, Vec<u8>> {
        ConsoleInteraction::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), editor.to_string())
    }

    #[test]
    fn test_yes_no_uses_default_on_empty_line() {
        let mut console = console("\n", "true");
        assert!(console.prompt_yes_no("Continue?", true).expect("answer"));
        let output = String::from_utf8(console.into_output()).expect("utf8");
        assert_eq!(output, "Continue? [Y/n] ");
    }

    #[test]
    fn test_yes_no_repeats_until_understood() {
        let mut console = console("maybe\nn\n", "true");
        assert!(!console.prompt_yes_no("Ignore?", true).expect("answer"));
        let output = String::from_utf8(console.into_output()).expect("utf8");
        assert!(output.contains("Please answer yes or no."));
    }

    #[test]
    fn test_closed_input_is_reported() {
        let mut console = console("", "true");
        assert!(matches!(
            console.prompt_text("Name:"),
            Err(InteractionError::Closed)
        ));
    }

    #[test]
    fn test_prompt_text_trims() {
        let mut console = console("  harbour.jpg \r\n", "true");
        assert_eq!(console.prompt_text("Name:").expect("answer"), "harbour.jpg");
    }

    #[cfg(unix)]
    #[test]
    fn test_unchanged_edit_counts_as_cancelled() {
        let mut console = console("", "true");
        assert_eq!(console.edit_description("Same text").expect("edit"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_editor_is_an_editor_error() {
        let mut console = console("", "false");
        assert!(matches!(
            console.edit_description("text"),
            Err(InteractionError::Editor(_))
        ));
    }
}
