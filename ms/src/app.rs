//! Application controller
//!
//! `Assistant` owns the whole session state (form, proposals, the plan on
//! screen, the refinement chat) and the collaborators that act on it. Every
//! teacher action is one method; the terminal front-end only calls these.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::editor::{DocumentEditor, EditableSection, EditorError, RenderedSection};
use crate::export::{ExportDetails, ExportOptions, ExportSink, ImageFetcher, export_plan, prepare_document};
use crate::form::ProjectForm;
use crate::llm::{ChatSession, CompletionRequest, LlmClient, Message};
use crate::narration::{
    CommandEngine, NarrationPlayer, NarrationScript, SCRIPT_ERROR_MESSAGE, SpeechEngine, TranscriptEngine,
    select_best_voice,
};
use crate::prompts::PromptLoader;
use crate::proposals::{Proposal, ProposalOutcome};
use crate::refine::{GREETING, RefinementOutcome, RefinementSession, SectionChange, compare};
use crate::sections::{PlanDocument, split};
use crate::store::{ProjectStore, SavedProject};

/// Conditions under which an action is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssistantError {
    #[error("No hay un plan abierto.")]
    NoPlan,

    #[error("No existe la propuesta {index} (hay {len}).")]
    NoSuchProposal { index: usize, len: usize },

    #[error("Guarde los cambios primero.")]
    UnsavedEdits,

    #[error("Espera a que InspiraTEC termine de responder.")]
    RefinementInFlight,

    #[error("El asistente de refinamiento no está activo.")]
    RefinementInactive,

    #[error("Este plan no tiene datos de formulario para guardarlo.")]
    MissingForm,
}

/// Which screen the teacher is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Form,
    Loading,
    Proposals,
    Plan,
    History,
    Help,
}

/// The plan on screen
#[derive(Debug, Clone)]
pub struct CurrentPlan {
    pub proposal_name: String,
    /// Set once the plan is in the history
    pub saved_id: Option<i64>,
    /// Canonical text; what gets saved
    pub markdown: String,
    pub editor: DocumentEditor,
}

impl CurrentPlan {
    pub fn document(&self) -> &PlanDocument {
        self.editor.document()
    }
}

/// Result of one refinement turn as shown in the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineTurn {
    pub message: String,
    /// Empty unless the plan was replaced
    pub changes: Vec<SectionChange>,
}

pub struct Assistant {
    config: Config,
    prompts: PromptLoader,
    client: Arc<dyn LlmClient>,
    store: Arc<dyn ProjectStore>,
    chat: ChatSession,
    view: View,
    form: Option<ProjectForm>,
    proposals: Vec<Proposal>,
    plan: Option<CurrentPlan>,
    refinement: Option<RefinementSession>,
}

impl Assistant {
    pub fn new(config: Config, client: Arc<dyn LlmClient>, store: Arc<dyn ProjectStore>) -> Result<Self> {
        let prompts = PromptLoader::from_config(&config.prompts);
        Self::with_prompts(config, prompts, client, store)
    }

    pub fn with_prompts(
        config: Config,
        prompts: PromptLoader,
        client: Arc<dyn LlmClient>,
        store: Arc<dyn ProjectStore>,
    ) -> Result<Self> {
        let system = prompts.mentor_system()?;
        let chat = ChatSession::new(client.clone(), system, config.llm.max_tokens);
        Ok(Self {
            config,
            prompts,
            client,
            store,
            chat,
            view: View::Form,
            form: None,
            proposals: Vec::new(),
            plan: None,
            refinement: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    pub fn form(&self) -> Option<&ProjectForm> {
        self.form.as_ref()
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn plan(&self) -> Option<&CurrentPlan> {
        self.plan.as_ref()
    }

    pub fn is_refining(&self) -> bool {
        self.refinement.is_some()
    }

    /// Ask for three proposals for a validated form
    ///
    /// Starts a fresh conversation. On failure the previous view comes back.
    pub async fn generate_proposals(&mut self, form: ProjectForm) -> Result<ProposalOutcome> {
        debug!(topic = %form.topic, tier = %form.resources.letter(), "generate_proposals: called");
        let message = self.prompts.proposal_request(&form)?;
        let prior = self.view;
        self.view = View::Loading;
        self.chat.reset();

        let reply = match self.chat.send(message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "generate_proposals: request failed");
                self.view = prior;
                return Err(e).context("No se pudieron generar las propuestas");
            }
        };

        let outcome = ProposalOutcome::from_response(&reply);
        self.proposals = match &outcome {
            ProposalOutcome::Found(proposals) => proposals.clone(),
            ProposalOutcome::Unparsed(_) => Vec::new(),
        };
        info!(proposals = %self.proposals.len(), "Proposals generated");
        self.form = Some(form);
        self.close_refinement();
        self.plan = None;
        self.view = View::Proposals;
        Ok(outcome)
    }

    /// Choose a proposal (0-based) and stream its detailed plan
    pub async fn select_proposal<F>(&mut self, index: usize, on_fragment: F) -> Result<&CurrentPlan>
    where
        F: FnMut(&str),
    {
        let proposal = self
            .proposals
            .get(index)
            .cloned()
            .ok_or(AssistantError::NoSuchProposal {
                index: index + 1,
                len: self.proposals.len(),
            })?;
        debug!(name = %proposal.name, "select_proposal: called");
        let message = self.prompts.proposal_selection(&proposal.name)?;
        let prior = self.view;
        self.view = View::Loading;

        let reply = match self.chat.send_stream(message, on_fragment).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "select_proposal: request failed");
                self.view = prior;
                return Err(e).context("No se pudo generar el plan detallado");
            }
        };

        info!(name = %proposal.name, "Plan generated");
        self.close_refinement();
        self.view = View::Plan;
        Ok(self.show_plan(proposal.name, None, reply))
    }

    fn show_plan(&mut self, proposal_name: String, saved_id: Option<i64>, markdown: String) -> &CurrentPlan {
        let editor = DocumentEditor::new(split(&markdown)).with_render_options(self.config.render.options());
        self.plan.insert(CurrentPlan {
            proposal_name,
            saved_id,
            markdown,
            editor,
        })
    }

    fn plan_mut(&mut self) -> Result<&mut CurrentPlan, AssistantError> {
        self.plan.as_mut().ok_or(AssistantError::NoPlan)
    }

    /// The current plan, refusing while section edits are pending
    fn settled_plan(&self) -> Result<&CurrentPlan, AssistantError> {
        let plan = self.plan.as_ref().ok_or(AssistantError::NoPlan)?;
        if plan.editor.is_editing() {
            return Err(AssistantError::UnsavedEdits);
        }
        Ok(plan)
    }

    pub fn render_plan(&self) -> Result<Vec<RenderedSection>, AssistantError> {
        Ok(self.plan.as_ref().ok_or(AssistantError::NoPlan)?.editor.render_read_only())
    }

    pub fn toggle_section(&mut self, index: usize) -> Result<bool> {
        Ok(self.plan_mut()?.editor.toggle(index)?)
    }

    pub fn begin_editing(&mut self) -> Result<Vec<EditableSection>> {
        if self.refinement.as_ref().is_some_and(RefinementSession::is_busy) {
            return Err(AssistantError::RefinementInFlight.into());
        }
        let plan = self.plan_mut()?;
        plan.editor.begin_editing();
        Ok(plan.editor.render_editable())
    }

    /// Section drafts while editing
    pub fn drafts(&self) -> Result<Vec<EditableSection>> {
        let plan = self.plan.as_ref().ok_or(AssistantError::NoPlan)?;
        if !plan.editor.is_editing() {
            return Err(EditorError::NotEditing.into());
        }
        Ok(plan.editor.render_editable())
    }

    pub fn set_section(&mut self, index: usize, text: &str) -> Result<()> {
        Ok(self.plan_mut()?.editor.set_body(index, text)?)
    }

    pub fn cancel_editing(&mut self) -> Result<()> {
        self.plan_mut()?.editor.cancel_editing();
        Ok(())
    }

    /// Fold the section drafts into a new canonical plan
    ///
    /// A plan already in the history is updated there too.
    pub fn commit_edits(&mut self) -> Result<()> {
        let store = self.store.clone();
        let plan = self.plan_mut()?;
        let markdown = plan.editor.commit()?;
        plan.markdown = markdown;
        if let Some(id) = plan.saved_id {
            store.update_plan(id, &plan.markdown)?;
        }
        info!(sections = %plan.document().len(), "Edits committed");
        Ok(())
    }

    /// Put the current plan in the history, or update it when already there
    pub fn save(&mut self) -> Result<SavedProject> {
        if self.refinement.as_ref().is_some_and(RefinementSession::is_busy) {
            return Err(AssistantError::RefinementInFlight.into());
        }
        if self.plan.as_ref().is_some_and(|p| p.editor.is_editing()) {
            self.commit_edits()?;
        }
        let form = self.form.clone();
        let store = self.store.clone();
        let plan = self.plan_mut()?;

        let saved = match plan.saved_id {
            Some(id) => store.update_plan(id, &plan.markdown)?,
            None => {
                let form = form.ok_or(AssistantError::MissingForm)?;
                store.create(form, &plan.proposal_name, &plan.markdown)?
            }
        };
        plan.saved_id = Some(saved.id);
        Ok(saved)
    }

    pub fn history(&mut self) -> Result<Vec<SavedProject>> {
        let projects = self.store.list()?;
        self.view = View::History;
        Ok(projects)
    }

    /// Show a saved plan; it stays linked to its history entry
    pub fn open_saved(&mut self, id: i64) -> Result<&CurrentPlan> {
        let project = self.store.get(id)?;
        debug!(%id, name = %project.proposal_name, "open_saved: called");
        self.close_refinement();
        self.form = Some(project.form);
        self.view = View::Plan;
        Ok(self.show_plan(project.proposal_name, Some(project.id), project.plan_markdown))
    }

    pub fn delete_saved(&mut self, id: i64) -> Result<bool> {
        let deleted = self.store.delete(id)?;
        if let Some(plan) = self.plan.as_mut()
            && plan.saved_id == Some(id)
        {
            plan.saved_id = None;
        }
        Ok(deleted)
    }

    /// Open the refinement chat on the current plan; returns the greeting
    pub async fn activate_refinement(&mut self) -> Result<&'static str> {
        let markdown = self.settled_plan()?.markdown.clone();
        let system = self.prompts.refinement_system()?;
        let context = self.prompts.refine_context(&markdown)?;
        self.close_refinement();
        let session =
            RefinementSession::activate(self.client.clone(), system, context, self.config.llm.max_tokens).await?;
        self.refinement = Some(session);
        Ok(GREETING)
    }

    pub fn close_refinement(&mut self) {
        if self.refinement.take().is_some() {
            info!("Refinement session closed");
        }
    }

    /// One refinement turn; blank input yields `None`
    pub async fn refine<F>(&mut self, text: &str, on_fragment: F) -> Result<Option<RefineTurn>>
    where
        F: FnMut(&str),
    {
        self.settled_plan()?;
        let session = self.refinement.as_ref().ok_or(AssistantError::RefinementInactive)?;
        let Some(outcome) = session.submit(text, on_fragment).await? else {
            return Ok(None);
        };

        let message = outcome.chat_message().to_string();
        let changes = match outcome {
            RefinementOutcome::Explanation(_) => Vec::new(),
            RefinementOutcome::Replacement { markdown, document } => {
                let store = self.store.clone();
                let plan = self.plan_mut()?;
                let changes = compare(plan.document(), &document);
                plan.editor.replace_document(document);
                plan.markdown = markdown;
                if let Some(id) = plan.saved_id {
                    store.update_plan(id, &plan.markdown)?;
                }
                changes
            }
        };
        Ok(Some(RefineTurn { message, changes }))
    }

    /// Ask for a narration script of the current plan
    pub async fn podcast_script(&self) -> Result<NarrationScript> {
        let markdown = &self.settled_plan()?.markdown;
        let prompt = self.prompts.podcast(markdown)?;
        let request = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![Message::user(prompt)],
            max_tokens: self.config.llm.max_tokens,
        };
        let response = self.client.complete(request).await.map_err(|e| {
            error!(error = %e, "podcast_script: request failed");
            eyre::eyre!(SCRIPT_ERROR_MESSAGE)
        })?;
        Ok(NarrationScript::new(response.text_or_empty()))
    }

    /// Save a script where the configuration says
    pub fn save_script(&self, script: &NarrationScript) -> Result<PathBuf> {
        let narration = &self.config.narration;
        Ok(script.save(&narration.output_path(), &narration.script_filename)?)
    }

    pub fn narration_player(&self, script: &NarrationScript) -> NarrationPlayer {
        let narration = &self.config.narration;
        let voice = select_best_voice(&narration.voices).cloned();
        NarrationPlayer::new(script, voice, narration.fallback_lang.clone())
    }

    /// The configured speech program, or a transcript printer
    pub fn speech_engine(&self) -> Box<dyn SpeechEngine> {
        match &self.config.narration.command {
            Some(program) => Box::new(CommandEngine::new(program.clone(), self.config.narration.args.clone())),
            None => Box::new(TranscriptEngine::new(true)),
        }
    }

    /// Write a printable version of the current plan
    pub async fn export(
        &self,
        details: &ExportDetails,
        fetcher: Option<&dyn ImageFetcher>,
        sink: &dyn ExportSink,
    ) -> Result<PathBuf> {
        let plan = self.settled_plan()?;
        let export = &self.config.export;
        let mut document = prepare_document(
            export,
            &plan.proposal_name,
            plan.document(),
            &self.config.render.options(),
        )?;
        let options = ExportOptions::new(export, &plan.proposal_name);
        Ok(export_plan(&mut document, details, &options, fetcher, sink).await?)
    }
}
