use thiserror::Error;

#[derive(Error, Debug)]
pub enum VadsrtError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Subtitle format error at line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Cannot access {path}: {source}")]
    IrrecoverableIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Voice activity detection error: {0}")]
    Vad(String),

    #[error("Transcriber error: {0}")]
    Transcriber(String),

    #[error("Vocal separation error: {0}")]
    Separator(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Translation provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Translation request timed out after {0}s")]
    Timeout(u64),

    #[error("Translated line count mismatch: sent {expected}, received {actual}")]
    LineCountMismatch { expected: usize, actual: usize },

    #[error("Batch {batch_id} failed after {attempts} attempts: {reason}")]
    BatchTranslation {
        batch_id: usize,
        attempts: u32,
        reason: String,
    },

    #[error("Cue count mismatch after merge: expected {expected}, got {actual}")]
    CueCountMismatch { expected: usize, actual: usize },

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl VadsrtError {
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            line,
            message: message.into(),
        }
    }

    pub fn io_at(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::IrrecoverableIo {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Errors that say nothing about the request itself, only that the
    /// endpoint could not be reached in time.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::ProviderUnavailable(_) | Self::Timeout(_) => true,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, VadsrtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(VadsrtError::Timeout(5).is_connectivity());
        assert!(VadsrtError::ProviderUnavailable("refused".into()).is_connectivity());
        assert!(!VadsrtError::LineCountMismatch { expected: 2, actual: 1 }.is_connectivity());
        assert!(!VadsrtError::Translation("bad json".into()).is_connectivity());
    }

    #[test]
    fn test_format_error_message() {
        let err = VadsrtError::format(7, "bad timecode");
        assert_eq!(err.to_string(), "Subtitle format error at line 7: bad timecode");
    }
}
