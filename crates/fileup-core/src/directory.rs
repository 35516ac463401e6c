//! A [`Repository`] backed by a plain directory.
//!
//! Assets are stored directly under the root. Bookkeeping lives under
//! `.fileup/`: one description file per asset, an append-only upload log and a
//! stash for chunked transfers in progress.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::RepositoryPreferences;
use crate::error::{ApiError, UPLOADS_DISABLED, UploadError};
use crate::repository::{
    EXISTS_WARNING, PageStatus, Repository, TransferState, UploadCall, UploadSource,
    UploadWarning,
};

/// Returned for by-URL uploads, which a directory cannot perform.
pub const URL_UPLOADS_DISABLED: &str = "copyuploaddisabled";
/// The stash for a resumed transfer is missing or does not match.
pub const STASH_FAILED: &str = "stashfailed";
/// A chunked transfer stopped before the last chunk.
pub const UPLOAD_INTERRUPTED: &str = "uploadinterrupted";

pub const DUPLICATE_WARNING: &str = "duplicate";
pub const EMPTY_FILE_WARNING: &str = "empty-file";

const META_DIR: &str = ".fileup";
const DESCRIPTIONS_DIR: &str = "descriptions";
const STASH_DIR: &str = "stash";
const UPLOAD_LOG: &str = "uploads.log";

#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
    shared: Option<PathBuf>,
    user: String,
    rights: Vec<String>,
    uploads_disabled: bool,
    allowed_extensions: Option<Vec<String>>,
    chunks_per_call: Option<u64>,
}

impl DirectoryRepository {
    /// Opens (creating when needed) the repository at `root`.
    pub fn open<P: Into<PathBuf>>(root: P, user: String, rights: Vec<String>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(META_DIR).join(DESCRIPTIONS_DIR))?;
        fs::create_dir_all(root.join(META_DIR).join(STASH_DIR))?;
        Ok(Self {
            root,
            shared: None,
            user,
            rights,
            uploads_disabled: false,
            allowed_extensions: None,
            chunks_per_call: None,
        })
    }

    pub fn from_preferences(preferences: &RepositoryPreferences) -> io::Result<Self> {
        let mut repository = Self::open(
            preferences.resolved_root(),
            preferences.user.clone(),
            preferences.rights.clone(),
        )?;
        repository.shared = preferences.resolved_shared();
        repository.uploads_disabled = preferences.uploads_disabled;
        repository.allowed_extensions = preferences.allowed_extensions.clone();
        Ok(repository)
    }

    pub fn with_shared<P: Into<PathBuf>>(mut self, shared: P) -> Self {
        self.shared = Some(shared.into());
        self
    }

    pub fn with_allowed_extensions(mut self, extensions: Option<Vec<String>>) -> Self {
        self.allowed_extensions = extensions;
        self
    }

    pub fn with_uploads_disabled(mut self, disabled: bool) -> Self {
        self.uploads_disabled = disabled;
        self
    }

    /// Stop each chunked call after this many chunks, leaving a checkpoint.
    pub fn with_chunks_per_call(mut self, chunks: Option<u64>) -> Self {
        self.chunks_per_call = chunks.filter(|chunks| *chunks > 0);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn description_path(&self, filename: &str) -> PathBuf {
        self.root
            .join(META_DIR)
            .join(DESCRIPTIONS_DIR)
            .join(format!("{filename}.txt"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(META_DIR).join(UPLOAD_LOG)
    }

    fn stash_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(STASH_DIR).join(key)
    }

    fn collect_warnings(&self, target: &Path, source: &Path) -> Result<Vec<UploadWarning>, UploadError> {
        let mut warnings = Vec::new();
        let filename = file_name(target);

        if target.is_file() {
            warnings.push(UploadWarning::new(
                EXISTS_WARNING,
                format!("A file named {filename} already exists"),
            ));
        }

        let len = fs::metadata(source)?.len();
        if len == 0 {
            warnings.push(UploadWarning::new(EMPTY_FILE_WARNING, "The file is empty"));
        }

        let digest = sha256_file(source)?;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || path == target {
                continue;
            }
            if sha256_file(&path)? == digest {
                warnings.push(UploadWarning::new(
                    DUPLICATE_WARNING,
                    format!("Identical to {}", file_name(&path)),
                ));
            }
        }

        Ok(warnings)
    }

    fn store_whole(&self, source: &Path, target: &Path) -> Result<(), UploadError> {
        let key = new_stash_key();
        let staging = self.stash_path(&key);
        fs::copy(source, &staging)?;
        fs::rename(&staging, target)?;
        Ok(())
    }

    fn store_chunked(
        &self,
        source: &Path,
        target: &Path,
        chunk_size: u64,
        resume: Option<&TransferState>,
    ) -> Result<(), UploadError> {
        let (key, offset) = match resume {
            Some(state) => {
                let stash = self.stash_path(&state.resume_key);
                let stashed = fs::metadata(&stash).map(|meta| meta.len()).ok();
                if stashed != Some(state.bytes_transferred) {
                    return Err(ApiError::new(
                        STASH_FAILED,
                        format!("No stash of {} bytes under {}", state.bytes_transferred, state.resume_key),
                    )
                    .into());
                }
                info!(key = %state.resume_key, offset = state.bytes_transferred, "Resuming chunked upload");
                (state.resume_key.clone(), state.bytes_transferred)
            }
            None => (new_stash_key(), 0),
        };

        let stash_path = self.stash_path(&key);
        let mut stash = OpenOptions::new().create(true).append(true).open(&stash_path)?;
        let mut input = File::open(source)?;
        let total = input.metadata()?.len();
        input.seek(SeekFrom::Start(offset))?;

        let mut transferred = offset;
        let mut chunks = 0u64;
        let mut buffer = vec![0u8; buffer_len(chunk_size, total.saturating_sub(offset))];
        while transferred < total {
            if self.chunks_per_call.is_some_and(|limit| chunks >= limit) {
                warn!(key = %key, transferred, total, "Chunked upload interrupted");
                return Err(ApiError::new(
                    UPLOAD_INTERRUPTED,
                    format!("Stopped after {transferred} of {total} bytes"),
                )
                .with_checkpoint(TransferState {
                    resume_key: key,
                    bytes_transferred: transferred,
                    chunk_size,
                })
                .into());
            }

            let want = buffer.len().min(usize::try_from(total - transferred).unwrap_or(usize::MAX));
            input.read_exact(&mut buffer[..want])?;
            stash.write_all(&buffer[..want])?;
            transferred += want as u64;
            chunks += 1;
            debug!(key = %key, transferred, total, "Stored chunk");
        }
        stash.flush()?;
        drop(stash);

        fs::rename(&stash_path, target)?;
        Ok(())
    }

    fn record(&self, call: &UploadCall<'_>) -> Result<(), UploadError> {
        fs::write(self.description_path(&call.target.filename), &call.target.description)?;

        let timestamp = Utc::now().to_rfc3339();
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(
            log,
            "{timestamp}\t{}\t{}\t{}",
            self.user,
            call.target.filename,
            call.comment.unwrap_or_default()
        )?;
        Ok(())
    }
}

impl Repository for DirectoryRepository {
    fn name(&self) -> String {
        self.root.display().to_string()
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
        let path = self.root.join(filename);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(PageStatus {
                exists: true,
                editable: !meta.permissions().readonly(),
                shared_elsewhere: false,
            }),
            _ => Ok(PageStatus {
                exists: false,
                editable: true,
                shared_elsewhere: self
                    .shared
                    .as_ref()
                    .is_some_and(|shared| shared.join(filename).is_file()),
            }),
        }
    }

    fn upload(&mut self, mut call: UploadCall<'_>) -> Result<bool, UploadError> {
        if self.uploads_disabled {
            return Err(ApiError::new(UPLOADS_DISABLED, "Uploads are not enabled on this repository").into());
        }
        let source = match call.source {
            UploadSource::Url(_) => {
                return Err(ApiError::new(URL_UPLOADS_DISABLED, "Uploads by URL are not allowed").into());
            }
            UploadSource::File(path) => path,
        };
        let target = self.root.join(&call.target.filename);

        if call.resume.is_none() {
            let warnings = self.collect_warnings(&target, source)?;
            if !call.warnings.proceed(&warnings) {
                info!(filename = %call.target.filename, "Upload declined after warnings");
                return Ok(false);
            }
        }

        let len = fs::metadata(source)?.len();
        if call.chunk_size > 0 && (call.resume.is_some() || len > call.chunk_size) {
            self.store_chunked(source, &target, call.chunk_size, call.resume)?;
        } else {
            self.store_whole(source, &target)?;
        }

        self.record(&call)?;
        info!(filename = %call.target.filename, bytes = len, "Stored upload");
        Ok(true)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn new_stash_key() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// One chunk, or less when fewer bytes remain.
fn buffer_len(chunk_size: u64, remaining: u64) -> usize {
    usize::try_from(chunk_size.min(remaining)).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::repository::{AssetHandle, WarningHandling};

    fn repository(dir: &TempDir) -> DirectoryRepository {
        DirectoryRepository::open(dir.path().join("repo"), "tester".into(), vec!["upload".into()])
            .expect("open repository")
    }

    fn source(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write source");
        path
    }

    fn handle(filename: &str) -> AssetHandle {
        AssetHandle {
            filename: filename.to_string(),
            description: format!("Description of {filename}"),
        }
    }

    fn call<'a>(
        target: &'a AssetHandle,
        path: &'a Path,
        chunk_size: u64,
        resume: Option<&'a TransferState>,
    ) -> UploadCall<'a> {
        UploadCall {
            target,
            source: UploadSource::File(path),
            warnings: WarningHandling::AlwaysIgnore,
            chunk_size,
            resume,
            comment: Some("test run"),
        }
    }

    #[test]
    fn upload_stores_file_description_and_log() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir);
        let path = source(&dir, "in.txt", b"hello");
        let target = handle("hello.txt");

        assert!(repo.upload(call(&target, &path, 0, None)).expect("upload"));

        assert_eq!(fs::read(repo.root().join("hello.txt")).expect("stored"), b"hello");
        assert_eq!(
            fs::read_to_string(repo.description_path("hello.txt")).expect("description"),
            "Description of hello.txt"
        );
        let log = fs::read_to_string(repo.log_path()).expect("log");
        assert!(log.contains("tester\thello.txt\ttest run"));
        let stamp = log.split('\t').next().expect("timestamp");
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
        assert!(repo.page_status("hello.txt").expect("status").exists);
    }

    #[test]
    fn page_status_reports_read_only_and_shared_files() {
        let dir = tempdir().expect("tempdir");
        let shared = dir.path().join("shared");
        fs::create_dir_all(&shared).expect("shared dir");
        fs::write(shared.join("common.png"), b"x").expect("shared file");
        let repo = repository(&dir).with_shared(&shared);

        let locked = repo.root().join("locked.png");
        fs::write(&locked, b"x").expect("locked file");
        let mut permissions = fs::metadata(&locked).expect("meta").permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&locked, permissions).expect("set read-only");

        let status = repo.page_status("locked.png").expect("status");
        assert!(status.exists && !status.editable);

        let status = repo.page_status("common.png").expect("status");
        assert!(!status.exists && status.shared_elsewhere);

        assert!(!repo.page_status("new.png").expect("status").exists);
    }

    #[test]
    fn warnings_are_offered_before_storing() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir);
        fs::write(repo.root().join("original.bin"), b"same").expect("existing");
        fs::write(repo.root().join("taken.bin"), b"other").expect("existing");
        let path = source(&dir, "copy.bin", b"same");
        let target = handle("taken.bin");

        let mut seen = Vec::new();
        let mut handler = |warnings: &[UploadWarning]| {
            seen.extend(warnings.iter().map(|w| w.code.clone()));
            false
        };
        let mut upload = call(&target, &path, 0, None);
        upload.warnings = WarningHandling::Policy(&mut handler);

        assert!(!repo.upload(upload).expect("upload"));
        seen.sort();
        assert_eq!(seen, vec!["duplicate".to_string(), "exists".to_string()]);
        assert_eq!(fs::read(repo.root().join("taken.bin")).expect("untouched"), b"other");
    }

    #[test]
    fn empty_file_raises_a_warning() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir);
        let path = source(&dir, "empty.txt", b"");
        let target = handle("empty.txt");

        let mut codes = Vec::new();
        let mut handler = |warnings: &[UploadWarning]| {
            codes.extend(warnings.iter().map(|w| w.code.clone()));
            true
        };
        let mut upload = call(&target, &path, 0, None);
        upload.warnings = WarningHandling::Policy(&mut handler);

        assert!(repo.upload(upload).expect("upload"));
        assert_eq!(codes, vec!["empty-file".to_string()]);
    }

    #[test]
    fn url_uploads_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir);
        let target = handle("remote.png");
        let upload = UploadCall {
            target: &target,
            source: UploadSource::Url("https://example.org/remote.png"),
            warnings: WarningHandling::AlwaysIgnore,
            chunk_size: 0,
            resume: None,
            comment: None,
        };

        let err = repo.upload(upload).unwrap_err();
        assert!(matches!(err, UploadError::Api(api) if api.code == URL_UPLOADS_DISABLED));
    }

    #[test]
    fn interrupted_chunked_upload_resumes_from_checkpoint() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir).with_chunks_per_call(Some(1));
        let path = source(&dir, "big.bin", b"0123456789");
        let target = handle("big.bin");

        let err = repo.upload(call(&target, &path, 4, None)).unwrap_err();
        let first = err.checkpoint().cloned().expect("checkpoint");
        assert_eq!(first.bytes_transferred, 4);
        assert!(!repo.page_status("big.bin").expect("status").exists);

        let err = repo.upload(call(&target, &path, 4, Some(&first))).unwrap_err();
        let second = err.checkpoint().cloned().expect("checkpoint");
        assert_eq!(second.resume_key, first.resume_key);
        assert_eq!(second.bytes_transferred, 8);

        assert!(repo.upload(call(&target, &path, 4, Some(&second))).expect("upload"));
        assert_eq!(fs::read(repo.root().join("big.bin")).expect("stored"), b"0123456789");
    }

    #[test]
    fn mismatched_stash_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir);
        let path = source(&dir, "big.bin", b"0123456789");
        let target = handle("big.bin");
        let bogus = TransferState {
            resume_key: "missing".into(),
            bytes_transferred: 4,
            chunk_size: 4,
        };

        let err = repo.upload(call(&target, &path, 4, Some(&bogus))).unwrap_err();
        assert!(matches!(err, UploadError::Api(api) if api.code == STASH_FAILED));
    }

    #[test]
    fn disabled_repository_refuses_uploads() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir).with_uploads_disabled(true);
        let path = source(&dir, "a.txt", b"a");
        let target = handle("a.txt");

        let err = repo.upload(call(&target, &path, 0, None)).unwrap_err();
        assert!(err.halts_run());
    }

    #[test]
    fn resumed_upload_with_huge_chunk_size_reads_only_the_rest() {
        let dir = tempdir().expect("tempdir");
        let mut repo = repository(&dir).with_chunks_per_call(Some(1));
        let path = source(&dir, "small.bin", b"abcdef");
        let target = handle("small.bin");

        let err = repo.upload(call(&target, &path, 4, None)).unwrap_err();
        let checkpoint = err.checkpoint().cloned().expect("checkpoint");

        assert!(
            repo.upload(call(&target, &path, u64::MAX, Some(&checkpoint)))
                .expect("upload")
        );
        assert_eq!(fs::read(repo.root().join("small.bin")).expect("stored"), b"abcdef");
    }

    #[test]
    fn chunk_buffer_is_capped_by_remaining_bytes() {
        assert_eq!(buffer_len(1 << 40, 10), 10);
        assert_eq!(buffer_len(4, 10), 4);
        assert_eq!(buffer_len(4, 0), 0);
    }

    #[test]
    fn stash_keys_are_file_name_safe() {
        let key = new_stash_key();
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(key, new_stash_key());
    }
}
