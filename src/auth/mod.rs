pub mod remote;

use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, time::Duration};

pub use remote::{
    InMemoryRemoteStore,
    RemoteBucket,
    RemoteStore,
    RemoteStoreConfig,
    RemoteStoreError,
    S3RemoteStore,
};

/// File the protocol library writes its core credentials to. Its presence
/// marks a session as resumable without a fresh QR pairing.
const CREDS_FILE: &str = "creds.json";

/// Presigned media URLs stay valid for one hour.
const MEDIA_URL_TTL: Duration = Duration::from_secs(3600);

/// Errors from auth-state persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Remote(#[from] RemoteStoreError),
    #[error("remote object store is not configured")]
    RemoteDisabled,
}

/// Handle to one session's auth directory, consumed by the protocol library.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    pub session_id: String,
    pub dir: PathBuf,
}

/// Aggregated result of a best-effort purge.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    pub local_removed: bool,
    pub remote_removed: usize,
    pub errors: Vec<String>,
}

impl PurgeOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Persists per-session credentials to the local filesystem and mirrors them
/// to the remote object store on connect and graceful shutdown.
pub struct AuthStateStore {
    root: PathBuf,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl AuthStateStore {
    pub fn new(root: PathBuf, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self { root, remote }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Local directory holding a session's auth material.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Trailing separator included: listings are raw string-prefix matches,
    /// and `s1` must never match `s10`'s objects.
    fn remote_prefix(session_id: &str) -> String {
        format!("sessions/{session_id}/")
    }

    /// Creates the session directory if missing and returns its path.
    pub async fn ensure_local(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Returns the auth handle for a session, creating the directory first.
    pub async fn load(&self, session_id: &str) -> Result<AuthHandle, StoreError> {
        let dir = self.ensure_local(session_id).await?;
        Ok(AuthHandle {
            session_id: session_id.to_owned(),
            dir,
        })
    }

    /// Whether the session has stored credentials and can resume without QR.
    pub async fn has_creds(&self, session_id: &str) -> bool {
        fs::try_exists(self.session_dir(session_id).join(CREDS_FILE))
            .await
            .unwrap_or(false)
    }

    async fn local_files(&self, session_id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.session_dir(session_id);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    /// Copies every local auth file to `sessions/<sessionId>/<file>` in the
    /// remote store. Returns the number of uploaded files.
    pub async fn snapshot(&self, session_id: &str) -> Result<usize, StoreError> {
        let remote = self.remote.as_ref().ok_or(StoreError::RemoteDisabled)?;
        let prefix = Self::remote_prefix(session_id);

        let mut uploaded = 0;
        for path in self.local_files(session_id).await? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let bytes = fs::read(&path).await?;
            remote
                .put(
                    RemoteBucket::Sessions,
                    &format!("{prefix}{name}"),
                    Bytes::from(bytes),
                )
                .await?;
            uploaded += 1;
        }

        tracing::debug!(session_id, uploaded, "auth snapshot uploaded");
        Ok(uploaded)
    }

    /// Downloads remote auth material when the local directory is empty.
    /// Idempotent: existing local files short-circuit the download.
    pub async fn restore(&self, session_id: &str) -> Result<usize, StoreError> {
        if !self.local_files(session_id).await?.is_empty() {
            tracing::debug!(session_id, "local auth present, skipping restore");
            return Ok(0);
        }

        let remote = self.remote.as_ref().ok_or(StoreError::RemoteDisabled)?;
        let prefix = Self::remote_prefix(session_id);
        let keys = remote.list(RemoteBucket::Sessions, &prefix).await?;

        let dir = self.ensure_local(session_id).await?;
        let mut downloaded = 0;
        for key in keys {
            let Some(name) = key.rsplit('/').next() else {
                continue;
            };
            let bytes = remote.get(RemoteBucket::Sessions, &key).await?;
            fs::write(dir.join(name), &bytes).await?;
            downloaded += 1;
        }

        tracing::info!(session_id, downloaded, "auth restored from remote store");
        Ok(downloaded)
    }

    /// Deletes local files then remote objects. Both halves are best-effort;
    /// failures are collected rather than returned early.
    pub async fn purge(&self, session_id: &str) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        let dir = self.session_dir(session_id);

        if fs::try_exists(&dir).await.unwrap_or(false) {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => outcome.local_removed = true,
                Err(error) => outcome.errors.push(format!("local: {error}")),
            }
        }

        let Some(remote) = self.remote.as_ref() else {
            return outcome;
        };

        let prefix = Self::remote_prefix(session_id);
        match remote.list(RemoteBucket::Sessions, &prefix).await {
            Ok(keys) => {
                for key in keys {
                    match remote.delete(RemoteBucket::Sessions, &key).await {
                        Ok(()) => outcome.remote_removed += 1,
                        Err(error) => outcome.errors.push(format!("remote {key}: {error}")),
                    }
                }
            }
            Err(error) => outcome.errors.push(format!("remote list: {error}")),
        }

        if !outcome.is_clean() {
            tracing::warn!(session_id, errors = ?outcome.errors, "auth purge incomplete");
        }
        outcome
    }

    /// Uploads a media attachment and returns a presigned GET URL valid for
    /// one hour.
    pub async fn upload_media(
        &self,
        session_id: &str,
        filename: &str,
        bytes: Bytes,
    ) -> Result<String, StoreError> {
        let remote = self.remote.as_ref().ok_or(StoreError::RemoteDisabled)?;
        let key = format!(
            "media/{session_id}/{}-{filename}",
            chrono::Utc::now().timestamp_millis()
        );

        remote.put(RemoteBucket::Media, &key, bytes).await?;
        let url = remote
            .presign_get(RemoteBucket::Media, &key, MEDIA_URL_TTL)
            .await?;
        Ok(url)
    }
}
