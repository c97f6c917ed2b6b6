use std::path::PathBuf;

use ratatui::layout::Rect;

use crate::session::{ChatSession, SessionEvent};
use crate::state::UploadState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,  // Question input box
    FilePath, // Document path prompt
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub session: ChatSession,
    pub server_url: String,

    // Question input
    pub query_input: String,
    pub query_cursor: usize, // cursor position in query_input (chars)

    // Document path prompt
    pub path_input: String,
    pub path_cursor: usize,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Inner height of chat area for scroll calculations
    pub chat_width: u16,  // Inner width of chat area for wrap calculations
    pub follow_tail: bool,

    // Panel areas for mouse hit-testing (updated during render)
    pub chat_area: Option<Rect>,
    pub upload_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // One-line notice shown in the footer
    pub status: Option<String>,
}

impl App {
    pub fn new(session: ChatSession, server_url: String) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            session,
            server_url,

            query_input: String::new(),
            query_cursor: 0,

            path_input: String::new(),
            path_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,

            chat_area: None,
            upload_area: None,

            animation_frame: 0,
            status: None,
        }
    }

    /// Send the typed question. The input is kept when the session refuses it.
    pub fn submit_query(&mut self) {
        let question = self.query_input.trim().to_string();
        if question.is_empty() {
            return;
        }

        if self.session.submit_question(&question) {
            self.query_input.clear();
            self.query_cursor = 0;
            self.status = None;
            self.follow_tail = true;
            self.scroll_chat_to_bottom();
        } else if self.session.is_awaiting_answer() {
            self.status = Some("Please wait for the current answer.".to_string());
        }
    }

    pub fn begin_file_prompt(&mut self) {
        if self.session.upload().state == UploadState::Initial {
            self.path_input.clear();
            self.path_cursor = 0;
            self.input_mode = InputMode::FilePath;
        }
    }

    /// Upload the document named in the path prompt.
    pub fn start_upload(&mut self) {
        let path = expand_home(self.path_input.trim());
        if self.session.upload_document(&path) {
            self.path_input.clear();
            self.path_cursor = 0;
            self.status = None;
            self.input_mode = InputMode::Normal;
        }
    }

    pub fn reset_upload(&mut self) {
        if self.session.reset_upload() {
            self.status = None;
        }
    }

    pub fn clear_context(&mut self) {
        self.session.clear();
        self.query_input.clear();
        self.query_cursor = 0;
        self.chat_scroll = 0;
        self.follow_tail = true;
        self.input_mode = InputMode::Normal;
        self.status = Some("Context cleared.".to_string());
    }

    pub fn apply_session_event(&mut self, event: SessionEvent) {
        self.session.apply(event);
        // Leave editing once clear or a failed upload has disabled questions
        if self.input_mode == InputMode::Editing && !self.session.input_enabled() {
            self.input_mode = InputMode::Normal;
        }
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_awaiting_answer() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self) {
        let max = self.chat_line_count().saturating_sub(self.visible_height());
        self.chat_scroll = self.chat_scroll.saturating_add(1).min(max);
        self.follow_tail = self.chat_scroll >= max;
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
        self.follow_tail = false;
    }

    /// Scroll chat to bottom so the newest text is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.chat_line_count();
        let visible_height = self.visible_height();

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }

    fn visible_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    /// Estimated number of wrapped lines the transcript occupies.
    fn chat_line_count(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;

        let streaming = self.session.streaming_message();
        for (idx, msg) in self.session.transcript().messages().iter().enumerate() {
            total_lines += 1; // Role line ("You:" or "AI:")
            let rendered = msg.rendered();
            if rendered.is_empty() && streaming == Some(idx) {
                total_lines += 1; // "Thinking..." placeholder
            }
            for line in rendered {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.text().chars().count() + 2;
                total_lines += (char_count / wrap_width) + 1;
            }
            total_lines += 1; // Blank line after message
        }

        total_lines.min(u16::MAX as usize) as u16
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
