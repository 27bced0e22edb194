use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No usable track exists for the requested media type.
    #[error("cannot resolve {video_id} at quality {quality}: {reason}")]
    Resolution {
        video_id: String,
        quality: u32,
        reason: String,
    },

    #[error("transport error during {stage}: {message}")]
    Transport { stage: String, message: String },

    #[error("no execution context became free within {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("session pool is closed")]
    PoolClosed,

    #[error("authentication unavailable for account '{account}': {reason}")]
    AuthenticationUnavailable { account: String, reason: String },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("platform API returned code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("rate limited on {key}, retry in {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid video id: {0}")]
    InvalidVideoId(String),
}

impl Error {
    pub fn transport(stage: impl Into<String>, message: impl ToString) -> Self {
        Error::Transport {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn resolution(video_id: &str, quality: u32, reason: impl Into<String>) -> Self {
        Error::Resolution {
            video_id: video_id.to_string(),
            quality,
            reason: reason.into(),
        }
    }

    /// Failures surfaced to the caller as-is. Everything else is expected to be
    /// absorbed by a fallback path or reported as an internal failure.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. }
                | Error::PoolExhausted { .. }
                | Error::AuthenticationUnavailable { .. }
                | Error::Filesystem { .. }
                | Error::Cancelled
                | Error::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let stage = if e.is_timeout() {
            "request timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_decode() {
            "response body"
        } else {
            "request"
        };
        Error::transport(stage, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_follows_taxonomy() {
        assert!(Error::resolution("BV1", 80, "no audio tracks").is_user_visible());
        assert!(Error::PoolExhausted {
            waited: Duration::from_secs(30)
        }
        .is_user_visible());
        assert!(!Error::transport("probe", "connection reset").is_user_visible());
        assert!(!Error::Decode("missing field".into()).is_user_visible());
        assert!(!Error::Api {
            code: -404,
            message: "not found".into()
        }
        .is_user_visible());
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::resolution("BV1xx", 32, "no video tracks");
        let msg = e.to_string();
        assert!(msg.contains("BV1xx"));
        assert!(msg.contains("32"));

        let e = Error::filesystem(
            "/out/a.m4a",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(e.to_string().contains("/out/a.m4a"));
    }
}
