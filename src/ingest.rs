use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::{Backend, UploadFile};
use crate::error::ClientError;
use crate::session::SessionEvent;

/// Jobs that change what the backend has indexed.
#[derive(Debug)]
pub enum IngestJob {
    Upload { upload: u64, path: PathBuf },
    Clear,
}

/// Runs upload and clear requests one at a time, in the order they were
/// queued, so a clear never overtakes an earlier upload or vice versa.
pub struct IngestQueue {
    jobs: UnboundedSender<IngestJob>,
    worker: JoinHandle<()>,
}

impl IngestQueue {
    pub fn spawn(backend: Arc<dyn Backend>, events: UnboundedSender<SessionEvent>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<IngestJob>();

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    IngestJob::Upload { upload, path } => {
                        let result = upload_file(backend.as_ref(), path).await;
                        let result = result.map_err(|err| {
                            warn!(upload, error = %err, "ingestion failed");
                            err.short_reason()
                        });
                        if events.send(SessionEvent::UploadResponded { upload, result }).is_err() {
                            break;
                        }
                    }
                    IngestJob::Clear => {
                        let result = backend.clear().await.map_err(|err| err.to_string());
                        match &result {
                            Ok(()) => info!("backend index cleared"),
                            Err(err) => warn!(error = %err, "clear request failed"),
                        }
                        let _ = events.send(SessionEvent::ClearFinished { result });
                    }
                }
            }
        });

        Self { jobs, worker }
    }

    pub fn enqueue(&self, job: IngestJob) {
        if self.jobs.send(job).is_err() {
            warn!("ingestion worker has stopped, job dropped");
        }
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Read `path` and send it to the ingestion endpoint.
pub async fn upload_file(backend: &dyn Backend, path: PathBuf) -> Result<(), ClientError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| ClientError::Io {
            path: path.clone(),
            source,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    info!(file = %name, size = bytes.len(), "sending document for ingestion");
    backend.upload(UploadFile { name, bytes }).await
}
