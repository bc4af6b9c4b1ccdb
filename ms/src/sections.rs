//! Plan documents and the section splitter
//!
//! A plan is a run of top-level numbered sections (`1. IDENTIFICACIÓN ...`,
//! `2. PROYECCIÓN ...`). The splitter cuts the text in front of every line
//! that opens such a section; each chunk keeps its number line as title.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// The fence must open the document and close it; inner code blocks never match
static WRAPPING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A```\w*[ \t]*\r?\n(.*?)\r?\n?```\s*\z").expect("wrapping fence pattern is valid")
});

/// One titled, numbered chunk of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// First line of the chunk, trimmed; empty for the unlabeled fallback
    pub title: String,
    /// Everything after the first newline, verbatim
    pub body: String,
}

impl Section {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// The unlabeled block produced when nothing in the text is numbered
    pub fn is_unlabeled(&self) -> bool {
        self.title.is_empty()
    }

    /// Leading section number, if the title carries one
    pub fn number(&self) -> Option<u32> {
        let digits: String = self.title.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    /// Canonical text of this section: title line, newline, trimmed body
    pub fn serialize(&self) -> String {
        join_section(&self.title, &self.body)
    }
}

/// Title and body joined the canonical way
pub(crate) fn join_section(title: &str, body: &str) -> String {
    if title.is_empty() {
        body.trim().to_string()
    } else {
        format!("{}\n{}", title, body.trim())
    }
}

/// An ordered sequence of sections; edits produce a new document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDocument {
    sections: Vec<Section>,
    /// Text before the first numbered section, shown but never serialized
    leftover: Option<String>,
}

impl PlanDocument {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            sections,
            leftover: None,
        }
    }

    /// Split markdown into a document
    pub fn parse(markdown: &str) -> Self {
        split(markdown)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn leftover(&self) -> Option<&str> {
        self.leftover.as_deref()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// True when the splitter fell back to a single unlabeled block
    pub fn is_unstructured(&self) -> bool {
        self.sections.len() == 1 && self.sections[0].is_unlabeled()
    }

    /// Canonical serialization: every section's text joined by a newline
    pub fn serialize(&self) -> String {
        self.sections
            .iter()
            .map(Section::serialize)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split a plan into ordered sections
///
/// A document wrapped in a code fence whose content starts with `1.` is
/// unwrapped first. When no chunk is numbered at all, the whole text comes
/// back as one unlabeled section.
pub fn split(document: &str) -> PlanDocument {
    let cleaned = unwrap_fence(document.trim());
    if cleaned.is_empty() {
        return PlanDocument::default();
    }

    let mut sections = Vec::new();
    let mut leftover = None;

    for chunk in chunks(&cleaned) {
        if chunk.trim().is_empty() {
            continue;
        }
        let (first_line, body) = match chunk.find('\n') {
            Some(pos) => (&chunk[..pos], &chunk[pos + 1..]),
            None => (chunk, ""),
        };
        let title = first_line.trim();
        if opens_section(title) {
            sections.push(Section::new(title, body));
        } else {
            // Only the first chunk can miss the numbering
            leftover = Some(chunk.trim().to_string());
        }
    }

    if sections.is_empty() {
        return PlanDocument {
            sections: vec![Section::new("", cleaned)],
            leftover: None,
        };
    }

    PlanDocument { sections, leftover }
}

fn unwrap_fence(text: &str) -> String {
    if let Some(caps) = WRAPPING_FENCE.captures(text)
        && let Some(inner) = caps.get(1)
        && inner.as_str().trim().starts_with("1.")
    {
        return inner.as_str().trim().to_string();
    }
    text.to_string()
}

/// Cut `text` in front of every line that opens a numbered section
///
/// Numbered lines inside a fenced code block belong to the block.
fn chunks(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_fence = is_fence(text);
    for (pos, _) in text.match_indices('\n') {
        let line = &text[pos + 1..];
        if !in_fence && opens_section(line) {
            out.push(&text[start..pos]);
            start = pos + 1;
        }
        if is_fence(line) {
            in_fence = !in_fence;
        }
    }
    out.push(&text[start..]);
    out
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Digits, a period, then whitespace or end of line
fn opens_section(line: &str) -> bool {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &line[digits..];
    match rest.strip_prefix('.') {
        Some(after) => after.is_empty() || after.starts_with(char::is_whitespace),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PLAN: &str = "1. IDENTIFICACIÓN DEL PROYECTO STEM+\n   - **Nombre de Actividad/Proyecto:** Huerta\n   - **Docente(s) Responsable(s):** A completar por el docente\n2. PROYECCIÓN DEL PROYECTO\n   - **Objetivo de Aprendizaje:** Medir\n3. ESTRATEGIA METODOLÓGICA\nTexto";

    #[test]
    fn test_split_two_sections() {
        let doc = split("1. A\nfoo\n2. B\nbar");
        assert_eq!(doc.sections(), &[Section::new("1. A", "foo"), Section::new("2. B", "bar")]);
        assert_eq!(doc.serialize(), "1. A\nfoo\n2. B\nbar");
    }

    #[test]
    fn test_split_keeps_internal_newlines() {
        let doc = split(PLAN);
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.sections()[0].title, "1. IDENTIFICACIÓN DEL PROYECTO STEM+");
        assert!(doc.sections()[0].body.contains("Huerta\n   - **Docente"));
        assert_eq!(doc.sections()[2].body, "Texto");
        // Serialization trims each body, which drops the first line's indent
        let expected = PLAN
            .replace("\n   - **Nombre", "\n- **Nombre")
            .replace("\n   - **Objetivo", "\n- **Objetivo");
        assert_eq!(doc.serialize(), expected);
    }

    #[test]
    fn test_split_unwraps_fenced_document() {
        let doc = split("```markdown\n1. A\nfoo\n2. B\nbar\n```");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.sections()[1], Section::new("2. B", "bar"));
        assert_eq!(doc.serialize(), "1. A\nfoo\n2. B\nbar");
    }

    #[test]
    fn test_split_leaves_fence_not_starting_with_one() {
        let doc = split("```\ncode\n```");
        assert!(doc.is_unstructured());
    }

    #[test]
    fn test_split_keeps_inner_code_block() {
        let text = "1. A\nIntro\n```\n1. paso uno\n2. paso dos\n```\n2. B\nbar";
        let doc = split(text);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.sections()[0].title, "1. A");
        assert_eq!(doc.sections()[0].body, "Intro\n```\n1. paso uno\n2. paso dos\n```");
        assert_eq!(doc.sections()[1], Section::new("2. B", "bar"));
        assert_eq!(doc.serialize(), text);
    }

    #[test]
    fn test_split_unwraps_only_whole_document_fence() {
        // Text after the closing fence means the document is not wrapped
        let doc = split("```\n1. paso uno\n```\n1. A\nfoo");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.sections()[0], Section::new("1. A", "foo"));
        assert_eq!(doc.leftover(), Some("```\n1. paso uno\n```"));

        let doc = split("  ```md\r\n1. A\r\nfoo\r\n```  ");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.sections()[0].title, "1. A");
    }

    #[test]
    fn test_split_without_numbering_is_unlabeled() {
        let doc = split("  Lo siento, no puedo.\nOtra línea  ");
        assert!(doc.is_unstructured());
        assert_eq!(doc.sections()[0].title, "");
        assert_eq!(doc.sections()[0].body, "Lo siento, no puedo.\nOtra línea");
        assert_eq!(doc.serialize(), "Lo siento, no puedo.\nOtra línea");
    }

    #[test]
    fn test_split_preamble_is_leftover() {
        let doc = split("Aquí está el plan:\n1. A\nfoo");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.leftover(), Some("Aquí está el plan:"));
        assert_eq!(doc.serialize(), "1. A\nfoo");
    }

    #[test]
    fn test_split_requires_space_after_period() {
        let doc = split("1. A\n2.5 litros de agua\n2. B\nbar");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.sections()[0].body, "2.5 litros de agua");
    }

    #[test]
    fn test_split_indented_numbers_stay_in_body() {
        let doc = split("1. A\n   1. sub\n2. B");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.sections()[0].body, "   1. sub");
        assert_eq!(doc.sections()[1], Section::new("2. B", ""));
    }

    #[test]
    fn test_split_empty() {
        assert!(split("   ").is_empty());
    }

    #[test]
    fn test_section_number() {
        assert_eq!(Section::new("12. Doce", "").number(), Some(12));
        assert_eq!(Section::new("", "x").number(), None);
    }

    #[test]
    fn test_opens_section() {
        assert!(opens_section("1. A"));
        assert!(opens_section("10.\tB"));
        assert!(opens_section("3."));
        assert!(!opens_section("3.5"));
        assert!(!opens_section(" 1. A"));
        assert!(!opens_section("A. b"));
    }

    proptest! {
        #[test]
        fn test_round_trip_well_formed(
            parts in prop::collection::vec(("[A-Z][A-Za-z ]{0,12}[A-Za-z]", "[a-z][a-z ]{0,20}[a-z]"), 1..8)
        ) {
            let text = parts
                .iter()
                .enumerate()
                .map(|(i, (title, body))| format!("{}. {}\n{}", i + 1, title, body))
                .collect::<Vec<_>>()
                .join("\n");
            prop_assert_eq!(split(&text).serialize(), text);
        }
    }
}
