//! Extraction error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Failure of one OCR extraction attempt.
///
/// Most variants are recoverable: the job processor logs them and leaves the
/// receipt pending. [`ExtractionError::Spawn`] is the exception - the
/// backend never ran, so the failure is classified as infrastructure and the
/// queue's retry/backoff machinery takes over.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Hard wall-clock timeout; the subprocess was forcibly killed or the
    /// in-flight request cancelled.
    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),

    /// The backend process could not be launched at all.
    #[error("Failed to launch OCR backend: {0}")]
    Spawn(#[source] std::io::Error),

    /// The backend ran but exited nonzero.
    #[error("OCR process exited with code {code}: {stderr}")]
    Backend { code: i32, stderr: String },

    /// The backend was killed by a signal.
    #[error("OCR process terminated by signal: {stderr}")]
    Signal { stderr: String },

    /// Output contained no parseable payload anywhere.
    #[error("OCR output not JSON: {0}")]
    Malformed(String),

    /// Remote backend answered with a non-success status.
    #[error("External OCR failed ({status}): {body}")]
    Http { status: u16, body: String },

    /// Remote transport failure (connect, TLS, ...).
    #[error("External OCR request failed: {0}")]
    Transport(reqwest::Error),

    /// Local file could not be read for the remote payload.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    /// Infrastructure failures are retried by the queue; everything else is
    /// caught at the job boundary and leaves the receipt pending.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Spawn(_))
    }
}
