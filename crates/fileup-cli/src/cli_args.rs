use clap::{ArgAction, Parser, ValueHint};
use fileup_core::config::{FileConfig, RepositoryPreferences};
use fileup_core::{
    ConfigurationError, ResumePoint, SourceLocator, UploadRequest, WarningSet, WarningSpec,
};

/// Upload files or URLs to a repository, negotiating names and warnings.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fileup", version, about, long_about = None)]
pub struct Cli {
    /// Local files or http(s) URLs to upload.
    #[arg(value_name = "SOURCE", required = true, value_hint = ValueHint::AnyPath)]
    pub sources: Vec<String>,

    /// Target filename (applies to every source).
    #[arg(long, value_name = "NAME")]
    pub filename: Option<String>,

    /// Description stored with the upload.
    #[arg(short, long, value_name = "TEXT")]
    pub description: Option<String>,

    /// Use the source's filename without asking for a better one.
    #[arg(long, action = ArgAction::SetTrue)]
    pub keep_filename: bool,

    /// Skip the description review.
    #[arg(long = "no-verify", action = ArgAction::SetTrue)]
    pub no_verify: bool,

    /// Ignore these warning codes; without codes, ignore every warning.
    #[arg(
        long = "ignore-warnings",
        value_name = "CODES",
        num_args = 0..=1,
        require_equals = true,
        value_delimiter = ','
    )]
    pub ignore_warnings: Option<Vec<String>>,

    /// Abort on these warning codes; without codes, abort on every warning.
    #[arg(
        long = "abort-on",
        value_name = "CODES",
        num_args = 0..=1,
        require_equals = true,
        value_delimiter = ','
    )]
    pub abort_on: Option<Vec<String>>,

    /// Upload in chunks of this many bytes (0 uploads in one piece).
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<u64>,

    /// Let the repository fetch URL sources itself.
    #[arg(long = "by-url", action = ArgAction::SetTrue)]
    pub by_url: bool,

    /// Never prompt; requires warning rules, a description, --keep-filename and --no-verify.
    #[arg(long, action = ArgAction::SetTrue)]
    pub unattended: bool,

    /// Shorthand for --unattended --keep-filename --no-verify.
    #[arg(long, action = ArgAction::SetTrue)]
    pub always: bool,

    /// Upload comment recorded in the repository log.
    #[arg(long = "summary", value_name = "TEXT")]
    pub comment: Option<String>,

    /// Repository directory (overrides config).
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub target: Option<String>,

    /// Shared repository directory consulted for name clashes.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub shared: Option<String>,

    /// Comma separated list of accepted file extensions.
    #[arg(long = "allowed-ext", value_name = "EXTS", value_delimiter = ',')]
    pub allowed_ext: Vec<String>,

    /// Offer to retry after a failed upload.
    #[arg(long, action = ArgAction::SetTrue)]
    pub retry: bool,

    /// Give up on a download after this many attempts.
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Continue interrupted transfers listed in a JSON report from an earlier run.
    #[arg(long = "resume-from", value_name = "REPORT", value_hint = ValueHint::FilePath)]
    pub resume_from: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,
}

impl Cli {
    pub fn is_unattended(&self) -> bool {
        self.unattended || self.always
    }

    /// Builds the request from the flags, falling back to `config` for
    /// anything not given on the command line.
    pub fn to_request(
        &self,
        config: &FileConfig,
        resume_points: &[ResumePoint],
    ) -> Result<UploadRequest, ConfigurationError> {
        let upload = &config.upload;
        let sources: Vec<SourceLocator> = self
            .sources
            .iter()
            .map(|raw| SourceLocator::parse(raw))
            .collect();

        let mut builder = UploadRequest::builder(sources.clone())
            .filename(self.filename.clone())
            .description(self.description.clone().unwrap_or_default())
            .keep_filename(self.keep_filename || self.always || upload.keep_filename)
            .verify_description(!(self.no_verify || self.always) && upload.verify_description)
            .ignore_on(warning_set(self.ignore_warnings.as_deref(), &upload.ignore_warnings))
            .abort_on(warning_set(self.abort_on.as_deref(), &upload.abort_on))
            .chunk_size(self.chunk_size.unwrap_or(upload.chunk_size))
            .upload_by_url(self.by_url)
            .unattended(self.is_unattended())
            .retry_failed(self.retry)
            .comment(self.comment.clone().or_else(|| upload.comment.clone()));

        for point in resume_points {
            let locator = SourceLocator::parse(&point.source);
            if sources.contains(&locator) {
                builder = builder.resume_point(locator, point.state.clone());
            }
        }

        builder.build()
    }

    /// Applies repository flags on top of the configured preferences.
    pub fn apply_repository_overrides(&self, preferences: &mut RepositoryPreferences) {
        if let Some(target) = self.target.as_ref() {
            preferences.root = Some(target.clone());
        }
        if let Some(shared) = self.shared.as_ref() {
            preferences.shared = Some(shared.clone());
        }
        let extensions: Vec<String> = self
            .allowed_ext
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if !extensions.is_empty() {
            preferences.allowed_extensions = Some(extensions);
        }
    }
}

/// `--flag` alone means every code, `--flag=a,b` those codes, absent defers to config.
fn warning_set(flag: Option<&[String]>, configured: &WarningSpec) -> WarningSet {
    match flag {
        None => WarningSet::from(configured),
        Some(codes) => match WarningSet::codes(codes.iter().cloned()) {
            WarningSet::Empty => WarningSet::All,
            set => set,
        },
    }
}
