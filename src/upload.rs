use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::trace;

use crate::session::SessionEvent;
use crate::state::UploadState;

/// Fixed timings of the upload panel.
#[derive(Debug, Clone, Copy)]
pub struct UploadTiming {
    /// Period of the cosmetic progress ticker.
    pub tick: Duration,
    /// Pause between the 100% display and the success state.
    pub success_delay: Duration,
    /// How long an ingestion error stays visible before the panel resets.
    pub error_delay: Duration,
}

impl Default for UploadTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1200),
            success_delay: Duration::from_millis(600),
            error_delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStep {
    pub percent: u8,
    pub label: String,
}

/// Simulated ingestion stages. Purely cosmetic: the backend reports nothing
/// but the final status.
pub fn progress_steps(file_name: &str) -> Vec<ProgressStep> {
    [
        (10, format!("Reading {}...", file_name)),
        (30, "Parsing PDF Layout...".to_string()),
        (50, "Chunking Text (Sliding Window)...".to_string()),
        (70, "Generating Embeddings (BGE-ONNX)...".to_string()),
        (85, "Building Private FAISS Index...".to_string()),
    ]
    .into_iter()
    .map(|(percent, label)| ProgressStep { percent, label })
    .collect()
}

const IDLE_LABEL: &str = "Initializing...";

/// Everything the upload panel displays.
#[derive(Debug, Clone)]
pub struct UploadPanel {
    pub state: UploadState,
    pub file_name: Option<String>,
    pub percent: u8,
    pub label: String,
    pub logs: Vec<String>,
    pub error: Option<String>,
    steps: Vec<ProgressStep>,
}

impl Default for UploadPanel {
    fn default() -> Self {
        Self {
            state: UploadState::Initial,
            file_name: None,
            percent: 0,
            label: IDLE_LABEL.to_string(),
            logs: Vec::new(),
            error: None,
            steps: Vec::new(),
        }
    }
}

impl UploadPanel {
    pub fn begin(&mut self, file_name: &str) {
        *self = Self {
            state: UploadState::InProgress,
            file_name: Some(file_name.to_string()),
            steps: progress_steps(file_name),
            ..Self::default()
        };
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Apply one simulated step. Ignored unless an upload is running.
    pub fn advance(&mut self, step: usize) -> bool {
        if self.state != UploadState::InProgress {
            return false;
        }
        let Some(step) = self.steps.get(step) else {
            return false;
        };
        self.percent = step.percent;
        self.label = step.label.clone();
        self.logs.push(format!("> {}", step.label));
        true
    }

    /// Backend accepted the document.
    pub fn complete(&mut self) {
        self.percent = 100;
        self.label = "Ingestion Complete".to_string();
        self.logs.push("> Done.".to_string());
    }

    pub fn succeed(&mut self) {
        self.state = UploadState::Success;
    }

    pub fn fail(&mut self, reason: &str) {
        self.state = UploadState::Error;
        self.error = Some(format!("Error: {}. Please try again.", reason));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Handle to the running cosmetic ticker of one upload attempt.
///
/// Dropping the handle aborts the timer task.
pub struct ProgressTicker {
    upload: u64,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    pub fn spawn(
        upload: u64,
        steps: usize,
        period: Duration,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        // First step lands one full period after the upload starts
        let first = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(first, period);
            for step in 0..steps {
                interval.tick().await;
                trace!(upload, step, "progress tick");
                if events.send(SessionEvent::ProgressTick { upload, step }).is_err() {
                    break;
                }
            }
        });
        Self { upload, handle }
    }

    pub fn upload(&self) -> u64 {
        self.upload
    }

    pub fn cancel(self) {
        // Drop does the abort
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_name_the_file() {
        let steps = progress_steps("paper.pdf");
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].label, "Reading paper.pdf...");
        let percents: Vec<u8> = steps.iter().map(|s| s.percent).collect();
        assert_eq!(percents, vec![10, 30, 50, 70, 85]);
    }

    #[test]
    fn test_advance_ignored_outside_progress() {
        let mut panel = UploadPanel::default();
        assert!(!panel.advance(0));
        assert_eq!(panel.percent, 0);

        panel.begin("paper.pdf");
        assert!(panel.advance(1));
        assert_eq!(panel.percent, 30);
        assert_eq!(panel.logs, vec!["> Parsing PDF Layout...".to_string()]);
        assert!(!panel.advance(9));
    }

    #[test]
    fn test_fail_then_reset() {
        let mut panel = UploadPanel::default();
        panel.begin("paper.pdf");
        panel.fail("Upload failed (500)");
        assert_eq!(panel.state, UploadState::Error);
        assert_eq!(
            panel.error.as_deref(),
            Some("Error: Upload failed (500). Please try again.")
        );

        panel.reset();
        assert_eq!(panel.state, UploadState::Initial);
        assert_eq!(panel.label, "Initializing...");
        assert!(panel.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_when_dropped() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ticker = ProgressTicker::spawn(7, 5, Duration::from_millis(1200), tx);

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::ProgressTick { upload: 7, step: 0 })
        ));

        ticker.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        // Sender dropped with the aborted task, nothing else queued
        assert!(rx.recv().await.is_none());
    }
}
