//! Content-addressed artifact store: opaque files under `outputs_dir` plus a
//! metadata row per file and signed, short-lived download tokens.
//!
//! The store exclusively owns the bytes on disk. API responses and events only
//! ever carry `file_id`s; retrieval goes through `resolve_for_download` with a
//! token bound to `(file_id, team_id)`. Registration is atomic: if the row
//! insert fails the freshly written file is unlinked again.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::Hmac;
use hmac::Mac;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;
use tracing::debug;
use tracing::warn;

use crate::config::Config;
use crate::error::CoreErr;
use crate::error::Result;
use crate::store::FileRecord;
use crate::store::Store;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random portion of a `file_id`; base62, so 22 chars carry
/// well over 64 bits of entropy.
const FILE_ID_LEN: usize = 22;

#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    secret: Vec<u8>,
    store: Store,
    public_base_url: Option<String>,
    token_ttl: Duration,
}

#[derive(Debug)]
pub enum ArtifactSource {
    Bytes(Vec<u8>),
    /// An existing file that will be *copied* into the artifact root.
    File(PathBuf),
}

#[derive(Debug)]
pub struct NewArtifact {
    /// `image`, `file` or `generated`.
    pub kind: String,
    pub filename: String,
    pub source: ArtifactSource,
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub session_id: Option<String>,
}

impl ArtifactStore {
    pub fn new(config: &Config, secret: Vec<u8>, store: Store) -> Self {
        Self {
            root: config.outputs_dir.clone(),
            secret,
            store,
            public_base_url: config.public_base_url.clone(),
            token_ttl: config.download_token_ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a new artifact. Two registrations of identical bytes yield
    /// two distinct file ids; artifacts are deliberately not deduplicated.
    pub async fn register(&self, new: NewArtifact) -> Result<FileRecord> {
        tokio::fs::create_dir_all(&self.root).await?;
        let file_id = file_id_for(&new.filename);
        let path = self.root.join(&file_id);

        let size_bytes = match &new.source {
            ArtifactSource::Bytes(bytes) => {
                tokio::fs::write(&path, bytes).await?;
                bytes.len() as i64
            }
            ArtifactSource::File(src) => {
                tokio::fs::copy(src, &path).await? as i64
            }
        };

        let record = FileRecord {
            file_id: file_id.clone(),
            kind: new.kind,
            filename: new.filename.clone(),
            content_type: content_type_for(&new.filename),
            size_bytes,
            team_id: new.team_id,
            project_id: new.project_id,
            session_id: new.session_id,
            created_at: Utc::now(),
            source_path: None,
        };

        if let Err(err) = self.store.insert_file(record.clone()).await {
            // Roll the filesystem side back so no unreferenced object leaks.
            if let Err(unlink_err) = tokio::fs::remove_file(&path).await {
                warn!("failed to unlink {} after insert error: {unlink_err}", path.display());
            }
            return Err(err);
        }
        debug!(file_id, size_bytes, "registered artifact");
        Ok(record)
    }

    pub fn issue_download_token(&self, file_id: &str, team_id: i64) -> String {
        self.issue_download_token_with_ttl(file_id, team_id, self.token_ttl)
    }

    pub fn issue_download_token_with_ttl(
        &self,
        file_id: &str,
        team_id: i64,
        ttl: Duration,
    ) -> String {
        let exp = Utc::now().timestamp() + ttl.as_secs() as i64;
        self.sign(file_id, team_id, exp)
    }

    fn sign(&self, file_id: &str, team_id: i64, exp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(format!("{file_id}|{team_id}|{exp}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{exp}.{sig}")
    }

    pub fn verify_token(&self, file_id: &str, team_id: i64, token: &str) -> bool {
        let Some((exp_str, sig)) = token.split_once('.') else {
            return false;
        };
        let Ok(exp) = exp_str.parse::<i64>() else {
            return false;
        };
        if exp < Utc::now().timestamp() {
            return false;
        }
        let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(sig) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(format!("{file_id}|{team_id}|{exp}").as_bytes());
        mac.verify_slice(&sig_bytes).is_ok()
    }

    /// Token-gated download resolution: returns the absolute path plus the
    /// content type and filename for the response headers. A token minted for
    /// a different team fails closed.
    pub async fn resolve_for_download(
        &self,
        file_id: &str,
        token: &str,
    ) -> Result<(PathBuf, String, String)> {
        let record = self
            .store
            .get_file(file_id)
            .await?
            .ok_or_else(|| CoreErr::NotFound(file_id.to_string()))?;
        if !self.verify_token(file_id, record.team_id, token) {
            return Err(CoreErr::Auth);
        }
        let path = self.root.join(&record.file_id);
        if !path.exists() {
            return Err(CoreErr::NotFound(file_id.to_string()));
        }
        Ok((path, record.content_type, record.filename))
    }

    /// Download URL embedding a fresh token; absolute when `public_base_url`
    /// is configured.
    pub fn download_url(&self, record: &FileRecord) -> String {
        let token = self.issue_download_token(&record.file_id, record.team_id);
        let path = format!("/files/{}?token={token}", record.file_id);
        match &self.public_base_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => path,
        }
    }

    pub fn preview_url(&self, record: &FileRecord) -> String {
        let token = self.issue_download_token(&record.file_id, record.team_id);
        let path = format!("/files/preview/{}?token={token}", record.file_id);
        match &self.public_base_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => path,
        }
    }

    /// Background sweep. Deletes (a) rows past `outputs_ttl` that no live
    /// message references, row first and file second, and (b) stray files in
    /// the artifact root that have no row at all. Live rows are never touched.
    pub async fn sweep(&self, outputs_ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(outputs_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365));
        let mut removed = 0usize;

        for record in self.store.expired_unreferenced_files(cutoff).await? {
            if self.store.delete_file(&record.file_id).await? {
                let path = self.root.join(&record.file_id);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => removed += 1,
                    Err(e) => warn!("sweep failed to unlink {}: {e}", path.display()),
                }
            }
        }

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.store.get_file(&name).await?.is_some() {
                continue;
            }
            let old_enough = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age >= outputs_ttl);
            if old_enough {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!("sweep failed to unlink stray {}: {e}", name);
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// URL-safe random identifier preserving the original extension, e.g.
/// `aB3xK9...Qp.pptx`.
pub fn file_id_for(filename: &str) -> String {
    let id = random_token(FILE_ID_LEN);
    match Path::new(filename).extension() {
        Some(ext) => format!("{id}.{}", ext.to_string_lossy()),
        None => id,
    }
}

pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_owned())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
