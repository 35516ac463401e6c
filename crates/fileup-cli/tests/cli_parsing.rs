use clap::Parser;
use fileup_cli::cli_args::Cli;
use fileup_core::config::{FileConfig, RepositoryPreferences};
use fileup_core::{ConfigurationError, ResumePoint, SourceLocator, TransferState, WarningSet, WarningSpec};

// Integration tests for turning command-line flags plus config.toml defaults
// into a validated upload request.

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["fileup"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("arguments parse")
}

#[test]
fn test_sources_are_required() {
    assert!(Cli::try_parse_from(["fileup"]).is_err());
}

#[test]
fn test_defaults_come_from_config() {
    let mut config = FileConfig::default();
    config.upload.chunk_size = 4096;
    config.upload.abort_on = WarningSpec::Codes(vec!["duplicate".into()]);
    config.upload.comment = Some("from config".into());

    let request = parse(&["photo.jpg"])
        .to_request(&config, &[])
        .expect("request");

    assert_eq!(request.chunk_size(), 4096);
    assert!(request.warnings().abort_on.contains("duplicate"));
    assert!(request.warnings().ignore_on.is_empty());
    assert_eq!(request.comment(), Some("from config"));
    assert!(request.verify_description());
    assert!(!request.keep_filename());
}

#[test]
fn test_bare_warning_flag_means_every_code() {
    let cli = parse(&["--ignore-warnings", "photo.jpg"]);
    assert_eq!(cli.sources, vec!["photo.jpg".to_string()]);

    let request = cli
        .to_request(&FileConfig::default(), &[])
        .expect("request");
    assert_eq!(request.warnings().ignore_on, WarningSet::All);
}

#[test]
fn test_warning_codes_are_split_on_commas() {
    let request = parse(&["--abort-on=exists,duplicate", "photo.jpg"])
        .to_request(&FileConfig::default(), &[])
        .expect("request");

    let abort_on = &request.warnings().abort_on;
    assert!(abort_on.contains("exists"));
    assert!(abort_on.contains("duplicate"));
    assert!(!abort_on.is_all());
}

#[test]
fn test_always_expands_to_unattended_flags() {
    let request = parse(&[
        "--always",
        "--ignore-warnings",
        "-d",
        "Scanned letter",
        "letter.pdf",
    ])
    .to_request(&FileConfig::default(), &[])
    .expect("request");

    assert!(request.unattended());
    assert!(request.keep_filename());
    assert!(!request.verify_description());
}

#[test]
fn test_unattended_without_rules_is_rejected() {
    let err = parse(&[
        "--unattended",
        "--keep-filename",
        "--no-verify",
        "-d",
        "text",
        "a.png",
    ])
    .to_request(&FileConfig::default(), &[])
    .unwrap_err();

    assert_eq!(err, ConfigurationError::UnattendedWithoutWarningRules);
}

#[test]
fn test_url_sources_are_recognised() {
    let request = parse(&["--by-url", "https://example.org/a.png", "local.png"])
        .to_request(&FileConfig::default(), &[])
        .expect("request");

    assert!(request.upload_by_url());
    assert!(request.sources()[0].is_remote());
    assert!(!request.sources()[1].is_remote());
}

#[test]
fn test_resume_points_match_sources() {
    let state = TransferState {
        resume_key: "abc".into(),
        bytes_transferred: 1024,
        chunk_size: 512,
    };
    let points = vec![
        ResumePoint {
            source: "/data/big.iso".into(),
            state: state.clone(),
        },
        ResumePoint {
            source: "/data/other.iso".into(),
            state: state.clone(),
        },
    ];

    let request = parse(&["/data/big.iso"])
        .to_request(&FileConfig::default(), &points)
        .expect("request");

    assert_eq!(
        request.resume_point(&SourceLocator::parse("/data/big.iso")),
        Some(&state)
    );
    assert_eq!(request.resume_point(&SourceLocator::parse("/data/other.iso")), None);
}

#[test]
fn test_repository_overrides() {
    let cli = parse(&[
        "--target",
        "/srv/repo",
        "--shared",
        "/srv/common",
        "--allowed-ext",
        ".PNG,jpg",
        "a.png",
    ]);
    let mut preferences = RepositoryPreferences::default();
    cli.apply_repository_overrides(&mut preferences);

    assert_eq!(preferences.root.as_deref(), Some("/srv/repo"));
    assert_eq!(preferences.shared.as_deref(), Some("/srv/common"));
    assert_eq!(
        preferences.allowed_extensions,
        Some(vec!["png".to_string(), "jpg".to_string()])
    );
}
