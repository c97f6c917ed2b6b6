//! UI-agnostic session state types
//!
//! Everything the terminal front end draws is derived from these structures,
//! so the session can be driven and inspected without a display.

use crate::markdown::{self, MdLine};

/// Shown in place of an answer whose stream failed.
pub const ERROR_MARKER: &str = "[Error generating response]";

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// A chat message in the transcript
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// True for streamed answers, which grow fragment by fragment.
    pub rendered_incrementally: bool,
    pub failed: bool,
    rendered: Vec<MdLine>,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self {
            role: ChatRole::User,
            content: text.to_string(),
            rendered_incrementally: false,
            failed: false,
            rendered: markdown::plain(text),
        }
    }

    /// Empty assistant message that a streamed answer will fill.
    pub fn streaming() -> Self {
        Self {
            role: ChatRole::Assistant,
            content: String::new(),
            rendered_incrementally: true,
            failed: false,
            rendered: Vec::new(),
        }
    }

    /// Complete assistant message produced locally (confirmations).
    pub fn notice(text: &str) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: text.to_string(),
            rendered_incrementally: false,
            failed: false,
            rendered: markdown::plain(text),
        }
    }

    /// Append a fragment and re-render the whole accumulated content.
    pub fn append_fragment(&mut self, fragment: &str, use_markdown: bool) {
        self.content.push_str(fragment);
        self.rendered = if use_markdown {
            markdown::render(&self.content)
        } else {
            markdown::plain(&self.content)
        };
    }

    /// Replace whatever streamed so far with the error marker.
    pub fn fail(&mut self) {
        self.content = ERROR_MARKER.to_string();
        self.failed = true;
        self.rendered = markdown::plain(ERROR_MARKER);
    }

    pub fn rendered(&self) -> &[MdLine] {
        &self.rendered
    }
}

/// Ordered, append-only list of messages; only a full clear removes anything.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    /// Append a message and return its index.
    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChatMessage> {
        self.messages.get_mut(index)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Initial,
    InProgress,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::LineKind;

    #[test]
    fn test_streaming_message_rerenders_full_content() {
        let mut msg = ChatMessage::streaming();
        msg.append_fragment("Steps:\n1", true);
        assert_eq!(msg.rendered()[1].kind, LineKind::Text);

        msg.append_fragment(". chunk the text", true);
        assert_eq!(msg.content, "Steps:\n1. chunk the text");
        assert_eq!(msg.rendered()[1].kind, LineKind::Numbered("1".to_string()));
    }

    #[test]
    fn test_plain_rendering_when_markdown_disabled() {
        let mut msg = ChatMessage::streaming();
        msg.append_fragment("# not a heading", false);
        assert_eq!(msg.rendered()[0].kind, LineKind::Text);
        assert_eq!(msg.rendered()[0].text(), "# not a heading");
    }

    #[test]
    fn test_fail_replaces_content() {
        let mut msg = ChatMessage::streaming();
        msg.append_fragment("half an ans", true);
        msg.fail();
        assert!(msg.failed);
        assert_eq!(msg.content, ERROR_MARKER);
    }

    #[test]
    fn test_transcript_push_returns_index() {
        let mut transcript = Transcript::default();
        assert_eq!(transcript.push(ChatMessage::user("a")), 0);
        assert_eq!(transcript.push(ChatMessage::streaming()), 1);
        transcript.clear();
        assert!(transcript.is_empty());
    }
}
