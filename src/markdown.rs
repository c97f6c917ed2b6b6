//! Markdown to styled lines.
//!
//! Answers arrive piecemeal, and a later fragment can change how earlier text
//! reads (a closing code fence, a setext underline), so callers always render
//! the whole accumulated text rather than the newest fragment.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanStyle {
    #[default]
    Plain,
    Bold,
    Italic,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdSpan {
    pub text: String,
    pub style: SpanStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Text,
    Heading(u8),
    Bullet,
    Numbered(String),
    Quote,
    Code,
    Rule,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdLine {
    pub kind: LineKind,
    pub spans: Vec<MdSpan>,
}

impl MdLine {
    fn new(kind: LineKind, spans: Vec<MdSpan>) -> Self {
        Self { kind, spans }
    }

    fn raw(kind: LineKind, text: &str) -> Self {
        let spans = if text.is_empty() {
            Vec::new()
        } else {
            vec![MdSpan {
                text: text.to_string(),
                style: SpanStyle::Plain,
            }]
        };
        Self { kind, spans }
    }

    /// Concatenated text of all spans, without markup.
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Render Markdown text into lines.
pub fn render(text: &str) -> Vec<MdLine> {
    let mut lines: Vec<MdLine> = Vec::new();
    let mut in_code = false;

    for raw in text.lines() {
        let trimmed = raw.trim();

        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            lines.push(MdLine::raw(LineKind::Code, raw));
            continue;
        }

        // Setext underline turns the previous paragraph line into a heading
        let prev_is_text = matches!(lines.last(), Some(MdLine { kind: LineKind::Text, .. }));
        if prev_is_text && !trimmed.is_empty() && trimmed.chars().all(|c| c == '=') {
            if let Some(prev) = lines.last_mut() {
                prev.kind = LineKind::Heading(1);
            }
            continue;
        }
        if trimmed.len() >= 3 && trimmed.chars().all(|c| c == '-') {
            match lines.last_mut() {
                Some(prev) if prev.kind == LineKind::Text => prev.kind = LineKind::Heading(2),
                _ => lines.push(MdLine::new(LineKind::Rule, Vec::new())),
            }
            continue;
        }

        lines.push(block_line(raw));
    }

    lines
}

/// Raw text split into lines with no Markdown interpretation.
pub fn plain(text: &str) -> Vec<MdLine> {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                MdLine::raw(LineKind::Blank, "")
            } else {
                MdLine::raw(LineKind::Text, line)
            }
        })
        .collect()
}

fn block_line(raw: &str) -> MdLine {
    let trimmed = raw.trim_start();

    if trimmed.is_empty() {
        return MdLine::raw(LineKind::Blank, "");
    }

    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) {
        if let Some(rest) = trimmed[hashes..].strip_prefix(' ') {
            return MdLine::new(LineKind::Heading(hashes as u8), parse_inline(rest.trim()));
        }
    }

    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return MdLine::new(LineKind::Bullet, parse_inline(rest));
        }
    }

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..].strip_prefix(". ") {
            return MdLine::new(
                LineKind::Numbered(trimmed[..digits].to_string()),
                parse_inline(rest),
            );
        }
    }

    if let Some(rest) = trimmed.strip_prefix('>') {
        return MdLine::new(LineKind::Quote, parse_inline(rest.trim_start()));
    }

    MdLine::new(LineKind::Text, parse_inline(raw.trim_end()))
}

/// Parse `**bold**`, `*italic*`, `_italic_` and `` `code` `` spans.
/// Markers without a closing partner stay literal.
fn parse_inline(text: &str) -> Vec<MdSpan> {
    let chars: Vec<char> = text.chars().collect();
    let mut spans: Vec<MdSpan> = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };

        let opener: Option<(&[char], SpanStyle)> = match c {
            '`' => Some((&['`'][..], SpanStyle::Code)),
            '*' if next == Some('*') => Some((&['*', '*'][..], SpanStyle::Bold)),
            '*' if next.map_or(false, |n| !n.is_whitespace()) => Some((&['*'][..], SpanStyle::Italic)),
            '_' if !prev.map_or(false, |p| p.is_alphanumeric())
                && next.map_or(false, |n| !n.is_whitespace()) =>
            {
                Some((&['_'][..], SpanStyle::Italic))
            }
            _ => None,
        };

        let Some((marker, style)) = opener else {
            plain.push(c);
            i += 1;
            continue;
        };

        let start = i + marker.len();
        match find_marker(&chars, start, marker) {
            Some(end) if end > start => {
                if !plain.is_empty() {
                    spans.push(MdSpan {
                        text: std::mem::take(&mut plain),
                        style: SpanStyle::Plain,
                    });
                }
                spans.push(MdSpan {
                    text: chars[start..end].iter().collect(),
                    style,
                });
                i = end + marker.len();
            }
            _ => {
                plain.extend(marker.iter());
                i = start;
            }
        }
    }

    if !plain.is_empty() {
        spans.push(MdSpan {
            text: plain,
            style: SpanStyle::Plain,
        });
    }

    spans
}

fn find_marker(chars: &[char], from: usize, marker: &[char]) -> Option<usize> {
    if chars.len() < marker.len() {
        return None;
    }
    (from..=chars.len() - marker.len()).find(|&j| chars[j..j + marker.len()] == *marker)
}
