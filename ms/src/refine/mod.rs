//! Refinement reconciler
//!
//! A refinement turn either explains something (the plan stays as it is) or
//! returns the whole updated plan inside a ```` ```markdown ```` fence, which
//! replaces the canonical document wholesale.
//!
//! The swap is mechanical. That untouched sections come back identical is
//! something the model is asked to honour; nothing here can enforce it.
//! `compare` only reports what moved so the teacher can see it.

use std::sync::LazyLock;

use regex::Regex;

use crate::sections::{PlanDocument, split};

mod session;

pub use session::{ERROR_MESSAGE, GREETING, RefineError, RefinementSession, UPDATED_MESSAGE};

static PLAN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```markdown\r?\n(.*?)```").expect("plan fence pattern is valid"));

/// What a finished refinement turn means for the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementOutcome {
    /// ACTION A: text to show in the chat; the plan is unchanged
    Explanation(String),
    /// ACTION B: the new canonical plan
    Replacement { markdown: String, document: PlanDocument },
}

impl RefinementOutcome {
    pub fn is_replacement(&self) -> bool {
        matches!(self, Self::Replacement { .. })
    }

    /// What the assistant says in the chat for this turn
    pub fn chat_message(&self) -> &str {
        match self {
            Self::Explanation(text) => text,
            Self::Replacement { .. } => UPDATED_MESSAGE,
        }
    }
}

/// Decide the kind of a refinement turn from its full response text
pub fn classify(response: &str) -> RefinementOutcome {
    if let Some(caps) = PLAN_FENCE.captures(response)
        && let Some(inner) = caps.get(1)
    {
        let markdown = inner.as_str().trim();
        if !markdown.is_empty() {
            return RefinementOutcome::Replacement {
                markdown: markdown.to_string(),
                document: split(markdown),
            };
        }
    }
    RefinementOutcome::Explanation(response.to_string())
}

/// Positional difference between two versions of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionChange {
    Unchanged { index: usize, title: String },
    Modified { index: usize, title: String },
    Added { index: usize, title: String },
    Removed { index: usize, title: String },
}

impl SectionChange {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged { .. })
    }
}

/// Compare sections pairwise by position using their canonical text
pub fn compare(old: &PlanDocument, new: &PlanDocument) -> Vec<SectionChange> {
    let len = old.len().max(new.len());
    (0..len)
        .filter_map(|index| {
            let change = match (old.sections().get(index), new.sections().get(index)) {
                (Some(before), Some(after)) if before.serialize() == after.serialize() => SectionChange::Unchanged {
                    index,
                    title: after.title.clone(),
                },
                (Some(_), Some(after)) => SectionChange::Modified {
                    index,
                    title: after.title.clone(),
                },
                (None, Some(after)) => SectionChange::Added {
                    index,
                    title: after.title.clone(),
                },
                (Some(before), None) => SectionChange::Removed {
                    index,
                    title: before.title.clone(),
                },
                (None, None) => return None,
            };
            Some(change)
        })
        .collect()
}
