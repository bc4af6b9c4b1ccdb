//! Prompt Loader
//!
//! Loads prompt templates from files or falls back to embedded defaults.

use std::path::PathBuf;

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::{debug, info};

use super::embedded;
use crate::config::PromptsConfig;
use crate::form::ProjectForm;

#[derive(Debug, Serialize)]
struct ProposalRequestContext<'a> {
    grade: &'a str,
    topic: &'a str,
    tier: char,
    tier_label: &'a str,
    time: &'a str,
}

#[derive(Debug, Serialize)]
struct NameContext<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct MarkdownContext<'a> {
    markdown: &'a str,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory
    user_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader that prefers `.pmt` files from the configured directory
    pub fn from_config(config: &PromptsConfig) -> Self {
        let user_dir = config.override_dir().filter(|dir| {
            let exists = dir.is_dir();
            debug!(?dir, %exists, "PromptLoader::from_config: called");
            exists
        });
        Self {
            hbs: engine(),
            user_dir,
        }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: engine(),
            user_dir: None,
        }
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. User override: `{dir}/{name}.pmt`
    /// 2. Embedded fallback
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found in user override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read user prompt {}: {}", path.display(), e));
            }
            debug!(?path, "PromptLoader::load_template: not found in user override");
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!(%name, "PromptLoader::load_template: found in embedded");
            return Ok(content.to_string());
        }

        debug!(%name, "PromptLoader::load_template: not found anywhere");
        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render(&self, template_name: &str, context: &impl Serialize) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        info!("Rendering template '{}'", template_name);
        self.hbs
            .render_template(&template, context)
            .map(|rendered| rendered.trim_end().to_string())
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }

    /// System prompt for proposal and plan generation
    pub fn mentor_system(&self) -> Result<String> {
        self.load_template("mentor")
    }

    /// System prompt for the refinement chat
    pub fn refinement_system(&self) -> Result<String> {
        self.load_template("inspiratec")
    }

    /// Message carrying the form data that asks for three proposals
    pub fn proposal_request(&self, form: &ProjectForm) -> Result<String> {
        let context = ProposalRequestContext {
            grade: &form.grade,
            topic: &form.topic,
            tier: form.resources.letter(),
            tier_label: form.resources.label(),
            time: &form.time,
        };
        self.render("proposal-request", &context)
    }

    /// Message choosing one proposal by name
    pub fn proposal_selection(&self, name: &str) -> Result<String> {
        self.render("proposal-selection", &NameContext { name })
    }

    /// Opening message of a refinement chat
    pub fn refine_context(&self, markdown: &str) -> Result<String> {
        self.render("refine-context", &MarkdownContext { markdown })
    }

    /// One-shot request for a narration script
    pub fn podcast(&self, markdown: &str) -> Result<String> {
        self.render("podcast", &MarkdownContext { markdown })
    }
}

/// Handlebars configured for plain text: values are inserted verbatim
fn engine() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();
    hbs.register_escape_fn(handlebars::no_escape);
    hbs
}
