//! Core library for resumable, interactively supervised file uploads.

pub mod config;
pub mod directory;
pub mod error;
pub mod fetch;
pub mod interaction;
pub mod logging;
pub mod negotiate;
pub mod orchestrator;
pub mod policy;
pub mod repository;
pub mod request;
pub mod testing;

pub use config::{
    ConfigError, ConfigLoadResult, ConfigSource, DEFAULT_USER_AGENT, FetchPreferences, FileConfig,
    RepositoryPreferences, UploadPreferences, config_directory, config_path, load_config,
    parse_config, save_config,
};
pub use directory::DirectoryRepository;
pub use error::{
    ApiError, ConfigurationError, FetchError, InteractionError, RunError, UploadError,
};
pub use fetch::{Backoff, FetchOutcome, Fetcher, HttpTransport, StagedFile, Transport};
pub use interaction::{Interaction, Unattended};
pub use logging::{LoggingDestination, LoggingError, init_logging};
pub use negotiate::{DescriptionState, NameNegotiator, Negotiation};
pub use orchestrator::{FileOutcome, FileState, ResumePoint, RunReport, UploadOrchestrator};
pub use policy::{Resolution, WarningPolicy};
pub use repository::{
    AssetHandle, PageStatus, Repository, TransferState, UploadCall, UploadSource, UploadWarning,
    WarningHandling,
};
pub use request::{
    SourceLocator, UploadRequest, UploadRequestBuilder, WarningDecisionSet, WarningSet,
    WarningSpec,
};
