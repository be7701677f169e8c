use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::error::GwError;
use crate::journal::{ConversationKey, Journal};

const CHUNK_SIZE: usize = 8 * 1024;
const BASE64_CHUNK_SIZE: usize = 1024 * 1024;
const RETRY_BASE: Duration = Duration::from_secs(2);
const RETRY_CAP: Duration = Duration::from_secs(10);
const DEFAULT_ATTEMPTS: u32 = 3;
/// Delay before repairing a journaled segment's `local_path` after giving up
/// on it, so the optimistic-lock repair doesn't race ahead of the queued
/// journal write that first stamped the path.
const JOURNAL_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Downloads or decodes media referenced by a message segment to a local
/// file, with retry-with-backoff on transient failures and optimistic
/// repair of the journaled `local_path` when every attempt is exhausted.
pub struct MediaPipeline {
    http: reqwest::Client,
    media_root: PathBuf,
    journal: Journal,
}

impl MediaPipeline {
    pub fn new(http: reqwest::Client, media_root: impl Into<PathBuf>, journal: Journal) -> Self {
        Self {
            http,
            media_root: media_root.into(),
            journal,
        }
    }

    fn file_name(message_id: i64, index: usize, ext: &str) -> String {
        format!("{message_id}_{index}.{ext}")
    }

    fn ext_from_url(url: &str, default: &str) -> String {
        url.rsplit('.')
            .next()
            .filter(|s| s.len() <= 5 && s.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or(default)
            .to_string()
    }

    /// The path this pipeline will write `index`'s media to, computed
    /// without touching the network. Callers stamp this onto the segment's
    /// `local_path` before enqueueing the journal write, so the journal
    /// record always points at the file the in-flight download is building.
    pub fn expected_path(&self, message_id: i64, index: usize, url: &str, default_ext: &str) -> PathBuf {
        let ext = Self::ext_from_url(url, default_ext);
        self.media_root.join(Self::file_name(message_id, index, &ext))
    }

    /// Downloads one remote media URL to `media_root`, retrying with
    /// exponential backoff (base 2s, cap 10s) up to `attempts` times. On
    /// exhaustion the partial file is removed and the journaled segment's
    /// `local_path` is nulled via an optimistic-lock repair.
    pub async fn download_segment(
        &self,
        key: ConversationKey,
        message_id: i64,
        field: String,
        index: usize,
        url: &str,
        default_ext: &str,
    ) -> Result<PathBuf, GwError> {
        let ext = Self::ext_from_url(url, default_ext);
        let path = self.media_root.join(Self::file_name(message_id, index, &ext));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_download_once(url, &path).await {
                Ok(()) => return Ok(path),
                Err(e) if attempt >= DEFAULT_ATTEMPTS => {
                    warn!(url, attempt, error = %e, "media download exhausted retries");
                    let _ = tokio::fs::remove_file(&path).await;
                    tokio::time::sleep(JOURNAL_SETTLE_DELAY).await;
                    if let Err(repair_err) = self
                        .journal
                        .clear_segment_local_path(&key, &field, index)
                        .await
                    {
                        error!(error = %repair_err, "failed to repair journal after download exhaustion");
                    }
                    return Err(e);
                }
                Err(e) => {
                    let backoff = Self::backoff_for(attempt);
                    warn!(url, attempt, error = %e, backoff_secs = backoff.as_secs(), "retrying media download");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn backoff_for(attempt: u32) -> Duration {
        let scaled = RETRY_BASE.saturating_mul(1u32 << attempt.min(4));
        scaled.min(RETRY_CAP)
    }

    async fn try_download_once(&self, url: &str, dest: &Path) -> Result<(), GwError> {
        use futures_util::StreamExt;

        let response = self.http.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for part in chunk.chunks(CHUNK_SIZE) {
                file.write_all(part).await?;
            }
        }
        file.flush().await?;
        Ok(())
    }

    /// Decodes an inline base64 media blob (self-sent media) in 1 MiB
    /// chunks, repairing padding on the final chunk, then sniffs the
    /// format from the first bytes via `infer`, defaulting to `.bin`.
    pub async fn save_inline_base64(
        &self,
        key: ConversationKey,
        message_id: i64,
        field: String,
        index: usize,
        base64_blob: &str,
    ) -> Result<PathBuf, GwError> {
        let blob = base64_blob.to_string();
        let decode_result = tokio::task::spawn_blocking(move || decode_base64_chunked(&blob))
            .await
            .expect("base64 decode task panicked");

        let bytes = match decode_result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "inline media decode failed");
                tokio::time::sleep(JOURNAL_SETTLE_DELAY).await;
                if let Err(repair_err) = self
                    .journal
                    .clear_segment_local_path(&key, &field, index)
                    .await
                {
                    error!(error = %repair_err, "failed to repair journal after decode failure");
                }
                return Err(e);
            }
        };

        let ext = infer::get(&bytes)
            .map(|kind| kind.extension().to_string())
            .unwrap_or_else(|| "bin".to_string());
        let path = self.media_root.join(Self::file_name(message_id, index, &ext));

        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

fn decode_base64_chunked(blob: &str) -> Result<Vec<u8>, GwError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut out = Vec::with_capacity(blob.len());
    let bytes = blob.as_bytes();
    let mut offset = 0;

    while offset < bytes.len() {
        let end = (offset + BASE64_CHUNK_SIZE).min(bytes.len());
        let mut piece = bytes[offset..end].to_vec();
        // A chunk boundary that does not land on a multiple of 4 base64
        // characters needs its padding restored before decoding in isolation.
        while piece.len() % 4 != 0 {
            piece.push(b'=');
        }
        let decoded = engine
            .decode(&piece)
            .map_err(|e| GwError::UnexpectedResponseShape(format!("bad base64 chunk: {e}")))?;
        out.extend_from_slice(&decoded);
        offset = end;
    }

    Ok(out)
}
