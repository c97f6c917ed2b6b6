use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to the Q&A backend or the playground hosts.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: StatusCode },

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    pub fn status(endpoint: &str, status: StatusCode) -> Self {
        ClientError::Status {
            endpoint: endpoint.to_string(),
            status,
        }
    }

    /// Short reason suitable for inline display in the upload panel or chat.
    pub fn short_reason(&self) -> String {
        match self {
            ClientError::Http(err) if err.is_connect() => "Backend unreachable".to_string(),
            ClientError::Http(err) if err.is_timeout() => "Request timed out".to_string(),
            ClientError::Http(_) => "Network error".to_string(),
            ClientError::Status { status, .. } => format!("Upload failed ({})", status.as_u16()),
            ClientError::Io { path, .. } => format!(
                "Cannot read {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason_mentions_code() {
        let err = ClientError::status("/upload", StatusCode::BAD_REQUEST);
        assert_eq!(err.short_reason(), "Upload failed (400)");
        assert_eq!(err.to_string(), "/upload returned status 400 Bad Request");
    }

    #[test]
    fn test_io_reason_uses_file_name() {
        let err = ClientError::Io {
            path: PathBuf::from("/tmp/papers/attention.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.short_reason(), "Cannot read attention.pdf");
    }
}
