use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, InputMode};
use crate::markdown::{LineKind, MdLine, SpanStyle};
use crate::state::{ChatMessage, ChatRole, UploadState};

/// Convert a rendered Markdown line into styled spans
fn styled_line(line: &MdLine) -> Line<'static> {
    let base = match line.kind {
        LineKind::Heading(1) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        LineKind::Heading(_) => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        LineKind::Quote => Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        LineKind::Code => Style::default().fg(Color::Green),
        _ => Style::default(),
    };

    let mut spans: Vec<Span<'static>> = match &line.kind {
        LineKind::Bullet => vec![Span::styled("  • ", Style::default().fg(Color::Green))],
        LineKind::Numbered(n) => vec![Span::styled(format!("  {}. ", n), Style::default().fg(Color::Green))],
        LineKind::Quote => vec![Span::styled("│ ", Style::default().fg(Color::Blue))],
        LineKind::Code => vec![Span::styled("  ", base)],
        LineKind::Rule => return Line::from(Span::styled("─".repeat(24), Style::default().fg(Color::DarkGray))),
        _ => Vec::new(),
    };

    for span in &line.spans {
        let style = match span.style {
            SpanStyle::Plain => base,
            SpanStyle::Bold => base.add_modifier(Modifier::BOLD),
            SpanStyle::Italic => base.add_modifier(Modifier::ITALIC),
            SpanStyle::Code => Style::default().fg(Color::Yellow).bg(Color::Black),
        };
        spans.push(Span::styled(span.text.clone(), style));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    // Upload panel on the left, conversation on the right
    let [upload_area, chat_column] = Layout::horizontal([
        Constraint::Percentage(35),
        Constraint::Percentage(65),
    ])
    .areas(body_area);

    render_upload_panel(app, frame, upload_area);
    render_chat(app, frame, chat_column);
    render_footer(app, frame, footer_area);

    if app.input_mode == InputMode::FilePath {
        render_path_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Document Q&A ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.server_url.clone(), Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing | InputMode::FilePath => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " ASK ",
        InputMode::FilePath => " UPLOAD ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut hints = match app.input_mode {
        InputMode::Normal => {
            let mut hints = Vec::new();
            if app.session.input_enabled() {
                hints.extend(vec![
                    Span::styled(" i ", key_style),
                    Span::styled(" ask ", label_style),
                ]);
            }
            match app.session.upload().state {
                UploadState::Initial => hints.extend(vec![
                    Span::styled(" u ", key_style),
                    Span::styled(" upload ", label_style),
                ]),
                UploadState::Success => hints.extend(vec![
                    Span::styled(" r ", key_style),
                    Span::styled(" new upload ", label_style),
                ]),
                _ => {}
            }
            hints.extend(vec![
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
                Span::styled(" C ", key_style),
                Span::styled(" clear ", label_style),
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
            hints
        }
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        InputMode::FilePath => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" upload ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ],
    };

    if let Some(status) = &app.status {
        hints.push(Span::styled(
            format!("  {}", status),
            Style::default().bg(Color::Black).fg(Color::Yellow),
        ));
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_upload_panel(app: &mut App, frame: &mut Frame, area: Rect) {
    app.upload_area = Some(area);
    let panel = app.session.upload();

    let border_color = match panel.state {
        UploadState::Initial => Color::DarkGray,
        UploadState::InProgress => Color::Cyan,
        UploadState::Success => Color::Green,
        UploadState::Error => Color::Red,
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Document ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if panel.state == UploadState::Initial {
        let prompt = Text::from(vec![
            Line::default(),
            Line::from(Span::styled("No document indexed.", Style::default().fg(Color::White))),
            Line::from(Span::styled(
                "Press u and enter the path of a PDF to ingest it.",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
        frame.render_widget(Paragraph::new(prompt).wrap(Wrap { trim: true }), inner);
        return;
    }

    let [name_area, gauge_area, label_area, logs_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(2),
        Constraint::Min(0),
    ])
    .areas(inner);

    let name = panel.file_name.clone().unwrap_or_default();
    frame.render_widget(
        Paragraph::new(Span::styled(name, Style::default().fg(Color::White).bold())),
        name_area,
    );

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Black))
        .percent(u16::from(panel.percent.min(100)))
        .label(format!("{}%", panel.percent));
    frame.render_widget(gauge, gauge_area);

    let label = match (&panel.state, &panel.error) {
        (UploadState::Error, Some(error)) => {
            Span::styled(error.clone(), Style::default().fg(Color::Red))
        }
        (UploadState::Success, _) => Span::styled(
            "Ready for queries. Press r to upload another document.",
            Style::default().fg(Color::Green),
        ),
        _ => Span::styled(panel.label.clone(), Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(Paragraph::new(label).wrap(Wrap { trim: true }), label_area);

    // Newest log lines at the bottom
    let visible = logs_area.height as usize;
    let skip = panel.logs.len().saturating_sub(visible);
    let items: Vec<ListItem> = panel
        .logs
        .iter()
        .skip(skip)
        .map(|log| ListItem::new(Span::styled(log.clone(), Style::default().fg(Color::Cyan))))
        .collect();
    frame.render_widget(List::new(items), logs_area);
}

fn message_lines(msg: &ChatMessage, streaming: bool, frame_idx: u8, lines: &mut Vec<Line<'static>>) {
    match msg.role {
        ChatRole::User => {
            lines.push(Line::from(Span::styled(
                "You:",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )));
        }
        ChatRole::Assistant => {
            lines.push(Line::from(Span::styled(
                "AI:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
        }
    }

    if msg.failed {
        lines.push(Line::from(Span::styled(
            msg.content.clone(),
            Style::default().fg(Color::Red),
        )));
    } else if msg.rendered().is_empty() && streaming {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((frame_idx as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    } else {
        lines.extend(msg.rendered().iter().map(styled_line));
    }
    lines.push(Line::default());
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store areas for mouse hit-testing and scroll calculations
    app.chat_area = Some(chat_area);
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let messages = app.session.transcript().messages();
    let chat_text = if messages.is_empty() {
        Text::from(Span::styled(
            "Upload a document, then ask questions about it.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let streaming = app.session.streaming_message();
        let mut lines: Vec<Line> = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            message_lines(msg, streaming == Some(idx), app.animation_frame, &mut lines);
        }
        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    // Question input at the bottom
    let enabled = app.session.input_enabled();
    let editing = app.input_mode == InputMode::Editing;
    let input_border_color = if editing {
        Color::Yellow
    } else if enabled {
        Color::White
    } else {
        Color::DarkGray
    };
    let title = if !enabled {
        " Ask (upload a document first) "
    } else if app.session.is_awaiting_answer() {
        " Ask (answering...) "
    } else {
        " Ask (i to type) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible (inner width excludes borders)
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.query_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.query_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, input_area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

fn render_path_prompt(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 64.min(area.width.saturating_sub(4));
    let popup_height = 6;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload Document ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path of the PDF to ingest. Enter to upload, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    // Keep the end of long paths visible
    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let scroll_offset = if width > 0 && app.path_cursor >= width {
        app.path_cursor - width + 1
    } else {
        0
    };
    let visible: String = app.path_input.chars().skip(scroll_offset).take(width).collect();
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = (app.path_cursor - scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown;

    #[test]
    fn test_bullet_gets_marker() {
        let lines = markdown::render("- **key** point");
        let line = styled_line(&lines[0]);
        assert_eq!(line.spans[0].content, "  • ");
        assert_eq!(line.spans[1].content, "key");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_thinking_placeholder_for_empty_answer() {
        let mut lines = Vec::new();
        message_lines(&ChatMessage::streaming(), true, 2, &mut lines);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].spans[0].content, "Thinking...");
    }

    #[test]
    fn test_finished_empty_answer_has_no_placeholder() {
        let mut lines = Vec::new();
        message_lines(&ChatMessage::streaming(), false, 2, &mut lines);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.spans.iter().all(|s| !s.content.starts_with("Thinking"))));
    }

    #[test]
    fn test_failed_answer_is_red() {
        let mut msg = ChatMessage::streaming();
        msg.fail();
        let mut lines = Vec::new();
        message_lines(&msg, false, 0, &mut lines);
        assert_eq!(lines[1].spans[0].style.fg, Some(Color::Red));
    }
}
