//! The streaming chat session.
//!
//! `ChatSession` owns the transcript, the answer/upload state and the handles
//! of every background task it starts. Background tasks never touch the state
//! directly: they post `SessionEvent`s, and the owner of the session feeds
//! them back through [`ChatSession::apply`] one at a time.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::ingest::{IngestJob, IngestQueue};
use crate::state::{ChatMessage, SessionState, Transcript, UploadState};
use crate::upload::{ProgressTicker, UploadPanel, UploadTiming};

/// Completion notifications from background work.
///
/// `request` and `upload` identify the attempt that produced the event;
/// events from a superseded attempt are dropped on arrival.
#[derive(Debug)]
pub enum SessionEvent {
    Fragment { request: u64, text: String },
    AnswerFinished { request: u64 },
    AnswerFailed { request: u64, error: String },
    ProgressTick { upload: u64, step: usize },
    UploadResponded { upload: u64, result: Result<(), String> },
    UploadSettled { upload: u64, succeeded: bool },
    ClearFinished { result: Result<(), String> },
}

/// The in-flight answer stream. Dropping it aborts the request.
struct AnswerTask {
    request: u64,
    message: usize,
    handle: JoinHandle<()>,
}

impl Drop for AnswerTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct ChatSession {
    backend: Arc<dyn Backend>,
    events: UnboundedSender<SessionEvent>,
    ingest: IngestQueue,
    timing: UploadTiming,
    use_markdown: bool,

    transcript: Transcript,
    state: SessionState,
    upload: UploadPanel,
    input_enabled: bool,

    answer: Option<AnswerTask>,
    ticker: Option<ProgressTicker>,
    next_request: u64,
    upload_attempt: u64,
}

impl ChatSession {
    /// Must be called from within a tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        events: UnboundedSender<SessionEvent>,
        timing: UploadTiming,
        use_markdown: bool,
    ) -> Self {
        let ingest = IngestQueue::spawn(Arc::clone(&backend), events.clone());
        Self {
            backend,
            events,
            ingest,
            timing,
            use_markdown,
            transcript: Transcript::default(),
            state: SessionState::Idle,
            upload: UploadPanel::default(),
            input_enabled: false,
            answer: None,
            ticker: None,
            next_request: 0,
            upload_attempt: 0,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn upload(&self) -> &UploadPanel {
        &self.upload
    }

    /// Questions are accepted only after a document has been ingested.
    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn is_awaiting_answer(&self) -> bool {
        self.state == SessionState::AwaitingAnswer
    }

    /// Transcript index of the answer that is still streaming.
    pub fn streaming_message(&self) -> Option<usize> {
        self.answer.as_ref().map(|a| a.message)
    }

    /// Ask the backend a question and stream the answer into the transcript.
    ///
    /// Returns false, without touching anything, for blank input, while
    /// submission is disabled, or while another answer is still streaming.
    pub fn submit_question(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if !self.input_enabled {
            debug!("question ignored: no document ingested");
            return false;
        }
        if self.state == SessionState::AwaitingAnswer {
            debug!("question ignored: answer still streaming");
            return false;
        }

        self.transcript.push(ChatMessage::user(text));
        let message = self.transcript.push(ChatMessage::streaming());
        self.state = SessionState::AwaitingAnswer;

        self.next_request += 1;
        let request = self.next_request;
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let question = text.to_string();

        info!(request, "asking question");
        let handle = tokio::spawn(async move {
            let outcome = match backend.ask(&question).await {
                Ok(mut fragments) => loop {
                    match fragments.next().await {
                        Some(Ok(text)) => {
                            if events.send(SessionEvent::Fragment { request, text }).is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            break SessionEvent::AnswerFailed {
                                request,
                                error: err.to_string(),
                            }
                        }
                        None => break SessionEvent::AnswerFinished { request },
                    }
                },
                Err(err) => SessionEvent::AnswerFailed {
                    request,
                    error: err.to_string(),
                },
            };
            let _ = events.send(outcome);
        });

        self.answer = Some(AnswerTask {
            request,
            message,
            handle,
        });
        true
    }

    /// Start ingesting a document. Only possible from the initial upload state.
    pub fn upload_document(&mut self, path: &Path) -> bool {
        if path.as_os_str().is_empty() {
            return false;
        }
        if self.upload.state != UploadState::Initial {
            debug!(state = ?self.upload.state, "upload ignored");
            return false;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.upload_attempt += 1;
        let upload = self.upload_attempt;
        self.upload.begin(&name);
        self.ticker = Some(ProgressTicker::spawn(
            upload,
            self.upload.step_count(),
            self.timing.tick,
            self.events.clone(),
        ));
        self.ingest.enqueue(IngestJob::Upload {
            upload,
            path: path.to_path_buf(),
        });

        info!(upload, file = %name, "upload started");
        true
    }

    /// Return a finished upload panel to its initial state so another
    /// document can be chosen. Questions stay enabled.
    pub fn reset_upload(&mut self) -> bool {
        if self.upload.state != UploadState::Success {
            return false;
        }
        self.upload.reset();
        true
    }

    /// Forget the conversation and the ingested document.
    ///
    /// Any answer still streaming is aborted and its late fragments are
    /// discarded. The local reset does not wait for the backend.
    pub fn clear(&mut self) {
        if let Some(answer) = self.answer.take() {
            debug!(request = answer.request, "aborting answer stream");
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        // Invalidate pending upload responses and settle timers
        self.upload_attempt += 1;

        self.transcript.clear();
        self.state = SessionState::Idle;
        self.input_enabled = false;
        self.upload.reset();

        self.ingest.enqueue(IngestJob::Clear);
        info!("session cleared");
    }

    /// Apply one event from a background task.
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Fragment { request, text } => {
                let Some(message) = self.live_answer(request) else {
                    return;
                };
                let use_markdown = self.use_markdown;
                if let Some(msg) = self.transcript.get_mut(message) {
                    msg.append_fragment(&text, use_markdown);
                }
            }
            SessionEvent::AnswerFinished { request } => {
                if self.live_answer(request).is_none() {
                    return;
                }
                self.answer = None;
                self.state = SessionState::Idle;
                debug!(request, "answer complete");
            }
            SessionEvent::AnswerFailed { request, error } => {
                let Some(message) = self.live_answer(request) else {
                    return;
                };
                warn!(request, %error, "answer stream failed");
                if let Some(msg) = self.transcript.get_mut(message) {
                    msg.fail();
                }
                self.answer = None;
                self.state = SessionState::Idle;
            }
            SessionEvent::ProgressTick { upload, step } => {
                let live = self.ticker.as_ref().map_or(false, |t| t.upload() == upload);
                if live {
                    self.upload.advance(step);
                }
            }
            SessionEvent::UploadResponded { upload, result } => {
                if upload != self.upload_attempt || self.upload.state != UploadState::InProgress {
                    return;
                }
                // The ticker must be gone before any terminal transition
                if let Some(ticker) = self.ticker.take() {
                    ticker.cancel();
                }
                match result {
                    Ok(()) => {
                        self.upload.complete();
                        self.settle_after(upload, true, self.timing.success_delay);
                    }
                    Err(reason) => {
                        self.upload.fail(&reason);
                        self.settle_after(upload, false, self.timing.error_delay);
                    }
                }
            }
            SessionEvent::UploadSettled { upload, succeeded } => {
                if upload != self.upload_attempt {
                    return;
                }
                if succeeded {
                    self.upload.succeed();
                    self.input_enabled = true;
                    let name = self.upload.file_name.clone().unwrap_or_default();
                    self.transcript.push(ChatMessage::notice(&format!(
                        "Document \"{}\" ingested successfully. Ready for queries.",
                        name
                    )));
                    info!(upload, file = %name, "document ready");
                } else if self.upload.state == UploadState::Error {
                    self.upload.reset();
                }
            }
            SessionEvent::ClearFinished { result } => {
                if let Err(error) = result {
                    debug!(%error, "backend clear failed; local state already reset");
                }
            }
        }
    }

    /// Transcript index of the answer `request` is filling, if it is still current.
    fn live_answer(&self, request: u64) -> Option<usize> {
        self.answer
            .as_ref()
            .filter(|a| a.request == request)
            .map(|a| a.message)
    }

    fn settle_after(&self, upload: u64, succeeded: bool, delay: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::UploadSettled { upload, succeeded });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use reqwest::StatusCode;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::timeout;

    use super::*;
    use crate::backend::UploadFile;
    use crate::error::ClientError;
    use crate::fragments::FragmentStream;
    use crate::state::{ChatRole, ERROR_MARKER};

    enum Script {
        Fragments(Vec<&'static str>),
        Channel(UnboundedReceiver<Result<String, ClientError>>),
        Refuse(StatusCode),
    }

    struct FakeBackend {
        answers: Mutex<VecDeque<Script>>,
        upload_status: Option<StatusCode>,
        upload_latency: Duration,
        asked: Mutex<Vec<String>>,
        clears: AtomicUsize,
    }

    impl FakeBackend {
        fn new(answers: Vec<Script>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                upload_status: None,
                upload_latency: Duration::from_millis(3000),
                asked: Mutex::new(Vec::new()),
                clears: AtomicUsize::new(0),
            }
        }

        fn failing_upload(status: StatusCode) -> Self {
            Self {
                upload_status: Some(status),
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn upload(&self, _file: UploadFile) -> Result<(), ClientError> {
            tokio::time::sleep(self.upload_latency).await;
            match self.upload_status {
                None => Ok(()),
                Some(status) => Err(ClientError::status("/upload", status)),
            }
        }

        async fn ask(&self, question: &str) -> Result<FragmentStream, ClientError> {
            self.asked.lock().unwrap().push(question.to_string());
            let script = self.answers.lock().unwrap().pop_front();
            match script {
                Some(Script::Fragments(parts)) => Ok(stream::iter(
                    parts.into_iter().map(|p| Ok(p.to_string())).collect::<Vec<_>>(),
                )
                .boxed()),
                Some(Script::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed()),
                Some(Script::Refuse(status)) => Err(ClientError::status("/ask", status)),
                None => Ok(stream::empty().boxed()),
            }
        }

        async fn clear(&self) -> Result<(), ClientError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session_with(backend: FakeBackend) -> (ChatSession, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(Arc::new(backend), tx, UploadTiming::default(), true);
        (session, rx)
    }

    /// Session that already has a document ingested.
    fn ready_session(answers: Vec<Script>) -> (ChatSession, UnboundedReceiver<SessionEvent>) {
        let (mut session, rx) = session_with(FakeBackend::new(answers));
        session.input_enabled = true;
        (session, rx)
    }

    async fn pump_until(
        session: &mut ChatSession,
        rx: &mut UnboundedReceiver<SessionEvent>,
        done: impl Fn(&ChatSession) -> bool,
    ) {
        let result = timeout(Duration::from_secs(120), async {
            while !done(session) {
                match rx.recv().await {
                    Some(event) => session.apply(event),
                    None => break,
                }
            }
        })
        .await;
        assert!(result.is_ok(), "session never reached the expected state");
    }

    fn drain(session: &mut ChatSession, rx: &mut UnboundedReceiver<SessionEvent>) {
        while let Ok(event) = rx.try_recv() {
            session.apply(event);
        }
    }

    fn temp_document() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.4 test document").unwrap();
        file
    }

    #[tokio::test]
    async fn test_single_fragment_answer() {
        let (mut session, mut rx) = ready_session(vec![Script::Fragments(vec!["Hello"])]);

        assert!(session.submit_question("What is this paper about?"));
        assert!(session.is_awaiting_answer());
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;

        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "What is this paper about?");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "Hello");
        assert!(messages[1].rendered_incrementally);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_fragments_concatenate_in_order() {
        let (mut session, mut rx) = ready_session(vec![Script::Fragments(vec!["He", "llo"])]);

        session.submit_question("greet me");
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;

        assert_eq!(session.transcript().messages()[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_second_question_rejected_while_streaming() {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let (mut session, mut rx) = ready_session(vec![
            Script::Channel(fragment_rx),
            Script::Fragments(vec!["should never be asked"]),
        ]);

        assert!(session.submit_question("first"));
        fragment_tx.send(Ok("Par".to_string())).unwrap();
        pump_until(&mut session, &mut rx, |s| {
            s.transcript().messages()[1].content == "Par"
        })
        .await;

        assert!(!session.submit_question("second"));
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().messages()[1].content, "Par");

        fragment_tx.send(Ok("tial".to_string())).unwrap();
        drop(fragment_tx);
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;

        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript().messages()[1].content, "Partial");
    }

    #[tokio::test]
    async fn test_streaming_message_tracks_only_the_live_answer() {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let (mut session, mut rx) = ready_session(vec![
            Script::Fragments(Vec::new()),
            Script::Channel(fragment_rx),
        ]);
        assert_eq!(session.streaming_message(), None);

        session.submit_question("first");
        assert_eq!(session.streaming_message(), Some(1));
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;
        assert_eq!(session.streaming_message(), None);
        assert!(session.transcript().messages()[1].content.is_empty());

        session.submit_question("second");
        assert_eq!(session.streaming_message(), Some(3));

        drop(fragment_tx);
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;
        assert_eq!(session.streaming_message(), None);
    }

    #[tokio::test]
    async fn test_blank_and_premature_questions_are_noops() {
        let (mut session, _rx) = session_with(FakeBackend::new(Vec::new()));
        assert!(!session.submit_question("before any upload"));

        session.input_enabled = true;
        assert!(!session.submit_question("   "));
        assert!(session.transcript().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stream_error_replaces_answer() {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let (mut session, mut rx) = ready_session(vec![Script::Channel(fragment_rx)]);

        session.submit_question("explain");
        fragment_tx.send(Ok("Half of it".to_string())).unwrap();
        fragment_tx
            .send(Err(ClientError::status("/ask", StatusCode::BAD_GATEWAY)))
            .unwrap();
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;

        let answer = &session.transcript().messages()[1];
        assert!(answer.failed);
        assert_eq!(answer.content, ERROR_MARKER);
        assert!(session.submit_question("retry"));
    }

    #[tokio::test]
    async fn test_refused_request_recovers() {
        let (mut session, mut rx) =
            ready_session(vec![Script::Refuse(StatusCode::BAD_REQUEST)]);

        session.submit_question("anything");
        pump_until(&mut session, &mut rx, |s| !s.is_awaiting_answer()).await;

        assert_eq!(session.transcript().messages()[1].content, ERROR_MARKER);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_clear_while_streaming_discards_late_fragments() {
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();
        let (mut session, mut rx) = ready_session(vec![Script::Channel(fragment_rx)]);

        session.submit_question("long answer please");
        fragment_tx.send(Ok("first part".to_string())).unwrap();
        // Let the fragment reach the queue without applying it
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.clear();
        drain(&mut session, &mut rx);

        assert!(session.transcript().is_empty());
        assert!(!session.input_enabled());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.upload().state, UploadState::Initial);

        // The aborted task has dropped its fragment stream
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fragment_tx.send(Ok("late".to_string())).is_err());
        drain(&mut session, &mut rx);
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_clear_reaches_backend() {
        let backend = Arc::new(FakeBackend::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = ChatSession::new(backend.clone(), tx, UploadTiming::default(), true);

        session.clear();
        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(matches!(event, Some(SessionEvent::ClearFinished { result: Ok(()) })));
        assert_eq!(backend.clears.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_upload_enables_questions() {
        let (mut session, mut rx) = session_with(FakeBackend::new(Vec::new()));
        let document = temp_document();

        assert!(session.upload_document(document.path()));
        assert_eq!(session.upload().state, UploadState::InProgress);
        // A second selection while running is ignored
        assert!(!session.upload_document(document.path()));

        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Success).await;

        assert!(session.input_enabled());
        assert_eq!(session.upload().percent, 100);
        assert_eq!(session.upload().logs.last().map(String::as_str), Some("> Done."));
        let notice = &session.transcript().messages()[0];
        assert_eq!(notice.role, ChatRole::Assistant);
        assert!(notice.content.ends_with("ingested successfully. Ready for queries."));

        assert!(session.reset_upload());
        assert_eq!(session.upload().state, UploadState::Initial);
        assert!(session.input_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_returns_to_initial() {
        let (mut session, mut rx) =
            session_with(FakeBackend::failing_upload(StatusCode::INTERNAL_SERVER_ERROR));
        let document = temp_document();

        session.upload_document(document.path());
        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Error).await;
        assert_eq!(
            session.upload().error.as_deref(),
            Some("Error: Upload failed (500). Please try again.")
        );

        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Initial).await;
        assert!(!session.input_enabled());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_file_fails_upload() {
        let (mut session, mut rx) = session_with(FakeBackend::new(Vec::new()));

        session.upload_document(Path::new("/nonexistent/dir/paper.pdf"));
        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Error).await;
        assert_eq!(
            session.upload().error.as_deref(),
            Some("Error: Cannot read paper.pdf. Please try again.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_success() {
        let (mut session, mut rx) = session_with(FakeBackend::new(Vec::new()));
        let document = temp_document();

        session.upload_document(document.path());
        // Latency of 3s leaves room for two ticks before the response
        pump_until(&mut session, &mut rx, |s| s.upload().percent == 30).await;
        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Success).await;

        let percent = session.upload().percent;
        let logs = session.upload().logs.len();
        assert_eq!(percent, 100);

        tokio::time::sleep(Duration::from_secs(10)).await;
        drain(&mut session, &mut rx);

        assert_eq!(session.upload().percent, percent);
        assert_eq!(session.upload().logs.len(), logs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_failure() {
        let (mut session, mut rx) =
            session_with(FakeBackend::failing_upload(StatusCode::SERVICE_UNAVAILABLE));
        let document = temp_document();

        session.upload_document(document.path());
        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Error).await;
        let percent = session.upload().percent;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        drain(&mut session, &mut rx);
        // Still showing the error, the ticker has not moved the bar
        assert_eq!(session.upload().state, UploadState::Error);
        assert_eq!(session.upload().percent, percent);

        pump_until(&mut session, &mut rx, |s| s.upload().state == UploadState::Initial).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        drain(&mut session, &mut rx);
        assert_eq!(session.upload().percent, 0);
        assert!(session.upload().logs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_upload_drops_pending_response() {
        let (mut session, mut rx) = session_with(FakeBackend::new(Vec::new()));
        let document = temp_document();

        session.upload_document(document.path());
        pump_until(&mut session, &mut rx, |s| s.upload().percent == 10).await;
        session.clear();

        tokio::time::sleep(Duration::from_secs(10)).await;
        drain(&mut session, &mut rx);

        assert_eq!(session.upload().state, UploadState::Initial);
        assert_eq!(session.upload().percent, 0);
        assert!(!session.input_enabled());
        assert!(session.transcript().is_empty());
    }
}
