use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::ClientError;
use crate::fragments::{decode_fragments, FragmentStream};

/// Ingestion jobs run one at a time; a backend that never answers must
/// not hold the queue forever.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CLEAR_TIMEOUT: Duration = Duration::from_secs(30);

/// A document read from disk, ready to be sent to the ingestion endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// The three endpoints of the document Q&A backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /upload`; any 2xx counts as success.
    async fn upload(&self, file: UploadFile) -> Result<(), ClientError>;

    /// `POST /ask`; resolves once response headers arrive, the body follows as fragments.
    async fn ask(&self, question: &str) -> Result<FragmentStream, ClientError>;

    /// `POST /clear`.
    async fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_timeout: UPLOAD_TIMEOUT,
        }
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn upload(&self, file: UploadFile) -> Result<(), ClientError> {
        let size = file.bytes.len();
        let part = Part::bytes(file.bytes).file_name(file.name.clone());
        let form = Form::new().part("file", part);

        debug!(file = %file.name, size, "uploading document");
        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::status("/upload", response.status()));
        }
        Ok(())
    }

    async fn ask(&self, question: &str) -> Result<FragmentStream, ClientError> {
        let response = self
            .client
            .post(self.url("/ask"))
            .json(&AskRequest { question })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::status("/ask", response.status()));
        }
        Ok(decode_fragments(response.bytes_stream()))
    }

    async fn clear(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/clear"))
            .timeout(CLEAR_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::status("/clear", response.status()));
        }
        Ok(())
    }
}
