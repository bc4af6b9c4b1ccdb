//! Restricted markdown renderer
//!
//! Turns the markdown dialect the model writes (ATX headings, bold, italic,
//! strikethrough, fenced and inline code, flat lists) into HTML. Rendering is
//! total: malformed input degrades to escaped plain text and never fails.
//!
//! Code is lifted out of the text before any other rule runs and put back
//! at the very end, so code content is never read as markup. Everything else
//! is escaped before the inline rules add their own tags.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Sentinels wrapping stashed code. Private-use code points are stripped
/// from the input first, so they cannot collide with user text.
const BLOCK_OPEN: char = '\u{E000}';
const BLOCK_CLOSE: char = '\u{E001}';
const SPAN_OPEN: char = '\u{E002}';
const SPAN_CLOSE: char = '\u{E003}';

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(\w*)\n(.*?)\n```").expect("fenced code pattern is valid"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline code pattern is valid"));
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x{E000}(\d+)\x{E001}|\x{E002}(\d+)\x{E003}").expect("placeholder pattern is valid")
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.*)$").expect("heading pattern is valid"));
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*([-*+]|(\d+)\.)[ \t]+(.*)$").expect("list item pattern is valid"));
static STRONG_EM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\*(.+?)\*\*\*|___(.+?)___").expect("strong emphasis pattern is valid"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*|__(.*?)__").expect("bold pattern is valid"));
// `*x*` must hug its content so bullet markers and lone stars stay literal;
// `_x_` must not start inside a word so snake_case survives.
static ITALIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*([^*\s](?:[^*]*?[^*\s])?)\*|(^|[^\p{L}\p{N}_])_([^_\s](?:[^_]*?[^_\s])?)_")
        .expect("italic pattern is valid")
});
static STRIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~(.*?)~~").expect("strike pattern is valid"));

/// How contiguous runs of list items are wrapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListStyle {
    /// Bullet runs in `<ul>`, numbered runs in `<ol>`
    #[default]
    Semantic,
    /// Every run in `<ul>`, whatever its markers
    Unordered,
}

/// Renderer knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub list_style: ListStyle,
}

/// Render markdown with default options
pub fn render(markdown: &str) -> String {
    render_with(markdown, &RenderOptions::default())
}

/// Render markdown to HTML
pub fn render_with(markdown: &str, options: &RenderOptions) -> String {
    let cleaned: String = markdown
        .replace("\r\n", "\n")
        .chars()
        .filter(|c| !matches!(c, '\u{E000}'..='\u{E003}'))
        .collect();

    let mut stash = CodeStash::default();
    let text = stash.lift_blocks(&cleaned);
    let text = stash.lift_spans(&text);
    let text = escape_html(&text);

    let html = assemble(classify(&text), options);
    stash.restore(&html)
}

/// Escape the five HTML-significant characters
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

/// Rendered code kept aside while the rest of the text is processed
#[derive(Default)]
struct CodeStash {
    blocks: Vec<String>,
    spans: Vec<String>,
}

impl CodeStash {
    fn lift_blocks(&mut self, text: &str) -> String {
        FENCED_CODE
            .replace_all(text, |caps: &Captures| {
                let lang = &caps[1];
                let code = escape_html(&caps[2]);
                let html = if lang.is_empty() {
                    format!("<pre><code>{}</code></pre>", code.trim())
                } else {
                    format!("<pre><code class=\"language-{}\">{}</code></pre>", lang, code.trim())
                };
                self.blocks.push(html);
                format!("{}{}{}", BLOCK_OPEN, self.blocks.len() - 1, BLOCK_CLOSE)
            })
            .into_owned()
    }

    fn lift_spans(&mut self, text: &str) -> String {
        INLINE_CODE
            .replace_all(text, |caps: &Captures| {
                self.spans.push(format!("<code>{}</code>", escape_html(&caps[1])));
                format!("{}{}{}", SPAN_OPEN, self.spans.len() - 1, SPAN_CLOSE)
            })
            .into_owned()
    }

    fn restore(&self, html: &str) -> String {
        PLACEHOLDER
            .replace_all(html, |caps: &Captures| {
                let (pool, index) = match (caps.get(1), caps.get(2)) {
                    (Some(idx), _) => (&self.blocks, idx.as_str()),
                    (None, Some(idx)) => (&self.spans, idx.as_str()),
                    (None, None) => return String::new(),
                };
                index
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| pool.get(i))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn is_block_placeholder(line: &str) -> bool {
    let mut chars = line.chars();
    chars.next() == Some(BLOCK_OPEN)
        && line.ends_with(BLOCK_CLOSE)
        && line[BLOCK_OPEN.len_utf8()..line.len() - BLOCK_CLOSE.len_utf8()]
            .chars()
            .all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Numbered,
}

#[derive(Debug)]
struct ListItem {
    kind: ListKind,
    number: Option<u64>,
    content: String,
}

#[derive(Debug)]
enum Line {
    Blank,
    /// Finished structural element (heading or code block)
    Block(String),
    Item(ListItem),
    Text(String),
}

fn classify(text: &str) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();

    for raw in text.split('\n') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            lines.push(Line::Blank);
        } else if let Some(caps) = HEADING.captures(raw) {
            let level = caps[1].len();
            lines.push(Line::Block(format!(
                "<h{level}>{}</h{level}>",
                emphasize(caps[2].trim())
            )));
        } else if is_block_placeholder(trimmed) {
            lines.push(Line::Block(trimmed.to_string()));
        } else if let Some(caps) = LIST_ITEM.captures(raw) {
            let number = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok());
            let kind = if caps.get(2).is_some() {
                ListKind::Numbered
            } else {
                ListKind::Bullet
            };
            lines.push(Line::Item(ListItem {
                kind,
                number,
                content: emphasize(caps[3].trim()),
            }));
        } else if let Some(Line::Item(item)) = lines.last_mut() {
            // Continuation of the previous item
            item.content.push_str("<br>");
            item.content.push_str(&emphasize(trimmed));
        } else {
            lines.push(Line::Text(emphasize(trimmed)));
        }
    }

    lines
}

fn emphasize(text: &str) -> String {
    let text = STRONG_EM.replace_all(text, |caps: &Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("<strong><em>{}</em></strong>", inner)
    });
    let text = BOLD.replace_all(&text, |caps: &Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("<strong>{}</strong>", inner)
    });
    let text = ITALIC.replace_all(&text, |caps: &Captures| match caps.get(1) {
        Some(inner) => format!("<em>{}</em>", inner.as_str()),
        None => format!(
            "{}<em>{}</em>",
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(3).map_or("", |m| m.as_str())
        ),
    });
    STRIKE.replace_all(&text, "<del>$1</del>").into_owned()
}

fn assemble(lines: Vec<Line>, options: &RenderOptions) -> String {
    let mut out = String::new();
    let mut run: Vec<ListItem> = Vec::new();
    let mut last_was_text = false;
    let mut gap = 0usize;

    for (idx, line) in lines.into_iter().enumerate() {
        if idx > 0 {
            gap += 1;
        }
        if !matches!(line, Line::Item(_)) && !run.is_empty() {
            out.push_str(&list_html(&run, options.list_style));
            run.clear();
        }

        match line {
            Line::Blank => {}
            Line::Block(html) => {
                out.push_str(&html);
                last_was_text = false;
                gap = 0;
            }
            Line::Item(item) => {
                let splits_run = options.list_style == ListStyle::Semantic
                    && run.first().is_some_and(|first| first.kind != item.kind);
                if splits_run {
                    out.push_str(&list_html(&run, options.list_style));
                    run.clear();
                }
                run.push(item);
                last_was_text = false;
                gap = 0;
            }
            Line::Text(text) => {
                if last_was_text {
                    out.push_str(if gap >= 2 { "<br><br>" } else { "<br>" });
                }
                out.push_str(&text);
                last_was_text = true;
                gap = 0;
            }
        }
    }

    if !run.is_empty() {
        out.push_str(&list_html(&run, options.list_style));
    }
    out
}

fn list_html(items: &[ListItem], style: ListStyle) -> String {
    let ordered = style == ListStyle::Semantic && items.first().is_some_and(|i| i.kind == ListKind::Numbered);

    let mut out = if ordered {
        match items.first().and_then(|i| i.number) {
            Some(start) if start != 1 => format!("<ol start=\"{}\">", start),
            _ => "<ol>".to_string(),
        }
    } else {
        "<ul>".to_string()
    };
    for item in items {
        out.push_str("<li>");
        out.push_str(&item.content);
        out.push_str("</li>");
    }
    out.push_str(if ordered { "</ol>" } else { "</ul>" });
    out
}
