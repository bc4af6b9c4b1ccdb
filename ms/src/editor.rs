//! Document editor
//!
//! Holds the plan being viewed, which sections are expanded, and, while
//! editing, the draft body of every section. Titles are never editable;
//! reassembly walks the original titles in order and pairs each with its
//! trimmed draft.

use thiserror::Error;
use tracing::debug;

use crate::markdown::{self, RenderOptions};
use crate::sections::{PlanDocument, Section, join_section, split};

/// Errors from editor operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    #[error("No section {index} (document has {len})")]
    NoSuchSection { index: usize, len: usize },

    #[error("The plan is not in edit mode")]
    NotEditing,
}

/// Whether the sections are shown rendered or as text inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EditorMode {
    #[default]
    ReadOnly,
    Editable,
}

/// A section as offered for editing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableSection {
    pub title: String,
    pub text: String,
}

/// A section rendered for reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSection {
    /// Empty for the unlabeled fallback block
    pub title: String,
    pub html: String,
    pub expanded: bool,
}

/// Editable form of every section: title plus trimmed body
pub fn render_editable(sections: &[Section]) -> Vec<EditableSection> {
    sections
        .iter()
        .map(|s| EditableSection {
            title: s.title.clone(),
            text: s.body.trim().to_string(),
        })
        .collect()
}

/// Canonical text from titles and edited bodies, in order
pub fn reassemble(sections: &[EditableSection]) -> String {
    sections
        .iter()
        .map(|s| join_section(&s.title, &s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Presentation state for one plan document
#[derive(Debug, Clone)]
pub struct DocumentEditor {
    document: PlanDocument,
    mode: EditorMode,
    expanded: Vec<bool>,
    drafts: Vec<EditableSection>,
    render_options: RenderOptions,
}

impl DocumentEditor {
    /// Read-only editor with only the first section expanded
    pub fn new(document: PlanDocument) -> Self {
        let expanded = initial_expansion(document.len());
        Self {
            document,
            mode: EditorMode::ReadOnly,
            expanded,
            drafts: Vec::new(),
            render_options: RenderOptions::default(),
        }
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    pub fn document(&self) -> &PlanDocument {
        &self.document
    }

    pub fn mode(&self) -> EditorMode {
        self.mode
    }

    pub fn is_editing(&self) -> bool {
        self.mode == EditorMode::Editable
    }

    /// Swap in a new canonical document; expansion resets, drafts are dropped
    pub fn replace_document(&mut self, document: PlanDocument) {
        debug!(sections = %document.len(), "replace_document: called");
        self.expanded = initial_expansion(document.len());
        self.document = document;
        self.mode = EditorMode::ReadOnly;
        self.drafts.clear();
    }

    /// Switch to edit mode with drafts seeded from the current bodies
    pub fn begin_editing(&mut self) {
        debug!("begin_editing: called");
        self.drafts = render_editable(self.document.sections());
        self.mode = EditorMode::Editable;
    }

    /// Leave edit mode, discarding drafts
    pub fn cancel_editing(&mut self) {
        debug!("cancel_editing: called");
        self.drafts.clear();
        self.mode = EditorMode::ReadOnly;
    }

    /// Current editable view: drafts while editing, bodies otherwise
    pub fn render_editable(&self) -> Vec<EditableSection> {
        if self.is_editing() {
            self.drafts.clone()
        } else {
            render_editable(self.document.sections())
        }
    }

    /// Rendered view of every section with its expansion state
    pub fn render_read_only(&self) -> Vec<RenderedSection> {
        self.document
            .sections()
            .iter()
            .zip(&self.expanded)
            .map(|(section, expanded)| RenderedSection {
                title: section.title.clone(),
                html: markdown::render_with(&section.body, &self.render_options),
                expanded: *expanded,
            })
            .collect()
    }

    /// Replace the draft body of one section
    pub fn set_body(&mut self, index: usize, text: impl Into<String>) -> Result<(), EditorError> {
        debug!(%index, "set_body: called");
        if !self.is_editing() {
            return Err(EditorError::NotEditing);
        }
        let len = self.drafts.len();
        let draft = self
            .drafts
            .get_mut(index)
            .ok_or(EditorError::NoSuchSection { index, len })?;
        draft.text = text.into();
        Ok(())
    }

    /// Canonical text from the drafts (or the document when not editing)
    pub fn reassemble(&self) -> String {
        reassemble(&self.render_editable())
    }

    /// Finish editing: reassemble, re-split, and return the new canonical text
    pub fn commit(&mut self) -> Result<String, EditorError> {
        debug!("commit: called");
        if !self.is_editing() {
            return Err(EditorError::NotEditing);
        }
        let text = self.reassemble();
        self.replace_document(split(&text));
        Ok(text)
    }

    /// Flip one section between expanded and collapsed, returning the new state
    pub fn toggle(&mut self, index: usize) -> Result<bool, EditorError> {
        let len = self.expanded.len();
        let state = self
            .expanded
            .get_mut(index)
            .ok_or(EditorError::NoSuchSection { index, len })?;
        *state = !*state;
        Ok(*state)
    }

    pub fn is_expanded(&self, index: usize) -> bool {
        self.expanded.get(index).copied().unwrap_or(false)
    }
}

fn initial_expansion(len: usize) -> Vec<bool> {
    (0..len).map(|i| i == 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seven_sections() -> String {
        (1..=7)
            .map(|n| format!("{}. SECCIÓN {}\n- **Campo {}:** valor {}\n  detalle", n, n, n, n))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_render_editable_trims_bodies() {
        let doc = split("1. A\n\n  foo  \n\n2. B\nbar");
        let editable = render_editable(doc.sections());
        assert_eq!(editable[0].title, "1. A");
        assert_eq!(editable[0].text, "foo");
        assert_eq!(editable[1].text, "bar");
    }

    #[test]
    fn test_reassemble_unchanged_round_trip() {
        let input = "1. A\nfoo\n2. B\nbar";
        let editor = DocumentEditor::new(split(input));
        assert_eq!(editor.reassemble(), input);
    }

    #[test]
    fn test_edit_one_section_leaves_others_identical() {
        let original = split(&seven_sections());
        let mut editor = DocumentEditor::new(original.clone());
        editor.begin_editing();
        editor.set_body(2, "  - **Campo 3:** nuevo valor\n").unwrap();

        let text = editor.commit().unwrap();
        let edited = split(&text);
        assert_eq!(edited.len(), 7);
        for (idx, (before, after)) in original.sections().iter().zip(edited.sections()).enumerate() {
            if idx == 2 {
                assert_eq!(after.serialize(), "3. SECCIÓN 3\n- **Campo 3:** nuevo valor");
            } else {
                assert_eq!(before.serialize(), after.serialize(), "section {} changed", idx + 1);
            }
        }
        assert!(!editor.is_editing());
    }

    #[test]
    fn test_titles_are_preserved_in_order() {
        let mut editor = DocumentEditor::new(split(&seven_sections()));
        editor.begin_editing();
        for idx in 0..7 {
            editor.set_body(idx, "x").unwrap();
        }
        let titles: Vec<String> = split(&editor.reassemble())
            .sections()
            .iter()
            .map(|s| s.title.clone())
            .collect();
        let expected: Vec<String> = (1..=7).map(|n| format!("{}. SECCIÓN {}", n, n)).collect();
        assert_eq!(titles, expected);
    }

    #[test]
    fn test_set_body_requires_edit_mode() {
        let mut editor = DocumentEditor::new(split("1. A\nfoo"));
        assert_eq!(editor.set_body(0, "bar"), Err(EditorError::NotEditing));
        assert_eq!(editor.commit(), Err(EditorError::NotEditing));
    }

    #[test]
    fn test_set_body_out_of_range() {
        let mut editor = DocumentEditor::new(split("1. A\nfoo"));
        editor.begin_editing();
        assert_eq!(
            editor.set_body(3, "bar"),
            Err(EditorError::NoSuchSection { index: 3, len: 1 })
        );
    }

    #[test]
    fn test_cancel_editing_discards_drafts() {
        let mut editor = DocumentEditor::new(split("1. A\nfoo"));
        editor.begin_editing();
        editor.set_body(0, "bar").unwrap();
        editor.cancel_editing();
        assert_eq!(editor.reassemble(), "1. A\nfoo");
    }

    #[test]
    fn test_first_section_starts_expanded() {
        let editor = DocumentEditor::new(split("1. A\nfoo\n2. B\nbar\n3. C\nbaz"));
        assert!(editor.is_expanded(0));
        assert!(!editor.is_expanded(1));
        assert!(!editor.is_expanded(2));
        assert!(!editor.is_expanded(9));
    }

    #[test]
    fn test_toggle_is_independent() {
        let mut editor = DocumentEditor::new(split("1. A\nfoo\n2. B\nbar"));
        assert_eq!(editor.toggle(1), Ok(true));
        assert!(editor.is_expanded(0));
        assert_eq!(editor.toggle(0), Ok(false));
        assert!(editor.is_expanded(1));
        assert!(editor.toggle(5).is_err());
    }

    #[test]
    fn test_render_read_only() {
        let editor = DocumentEditor::new(split("1. A\n**foo**\n2. B\n- bar"));
        let rendered = editor.render_read_only();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].html, "<strong>foo</strong>");
        assert!(rendered[0].expanded);
        assert_eq!(rendered[1].html, "<ul><li>bar</li></ul>");
        assert!(!rendered[1].expanded);
    }

    #[test]
    fn test_unlabeled_section_reassembles_without_title() {
        let mut editor = DocumentEditor::new(split("texto libre"));
        editor.begin_editing();
        editor.set_body(0, "otro texto").unwrap();
        assert_eq!(editor.reassemble(), "otro texto");
    }

    #[test]
    fn test_replace_document_resets_state() {
        let mut editor = DocumentEditor::new(split("1. A\nfoo\n2. B\nbar"));
        editor.toggle(1).unwrap();
        editor.begin_editing();
        editor.replace_document(split("1. X\ny"));
        assert!(!editor.is_editing());
        assert!(editor.is_expanded(0));
        assert_eq!(editor.document().len(), 1);
    }
}
