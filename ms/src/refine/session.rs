//! Live refinement chat
//!
//! At most one turn runs at a time. A second submission while a reply is
//! still streaming is rejected instead of interleaving with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, error, info};

use super::{RefinementOutcome, classify};
use crate::llm::{ChatSession, LlmClient, LlmError};

/// First assistant message once the chat is ready
pub const GREETING: &str = "¡Hola! Soy InspiraTEC. Estoy aquí para ayudarte a refinar este plan. ¿Qué te gustaría cambiar o sobre qué necesitas más detalles?";

/// Assistant message after a full-plan replacement
pub const UPDATED_MESSAGE: &str = "¡Listo! He actualizado el plan con tus cambios. Puedes seguir pidiéndome ajustes.";

/// Assistant message after a failed turn
pub const ERROR_MESSAGE: &str = "Lo siento, ocurrió un error. Por favor, intenta de nuevo.";

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("InspiraTEC todavía está respondiendo. Espera a que termine.")]
    TurnInFlight,

    #[error("Lo siento, ocurrió un error. Por favor, intenta de nuevo.")]
    Completion(#[source] LlmError),
}

impl From<LlmError> for RefineError {
    fn from(err: LlmError) -> Self {
        Self::Completion(err)
    }
}

/// Single-slot guard for the pending turn
#[derive(Debug, Default)]
struct TurnGate {
    busy: AtomicBool,
}

impl TurnGate {
    fn try_acquire(&self) -> Option<TurnPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnPermit { gate: self })
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate when the turn ends, however it ends
struct TurnPermit<'a> {
    gate: &'a TurnGate,
}

impl Drop for TurnPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// One activation of the refinement assistant
pub struct RefinementSession {
    chat: ChatSession,
    gate: TurnGate,
}

impl RefinementSession {
    /// Open a chat and hand it the current plan before the teacher speaks
    ///
    /// The model's answer to the context message is not shown; the caller
    /// greets with [`GREETING`] instead.
    pub async fn activate(
        client: Arc<dyn LlmClient>,
        system_prompt: String,
        context_message: String,
        max_tokens: u32,
    ) -> Result<Self, RefineError> {
        debug!(context_chars = %context_message.len(), "RefinementSession::activate: called");
        let chat = ChatSession::new(client, system_prompt, max_tokens);
        if let Err(e) = chat.send(context_message).await {
            error!(error = %e, "RefinementSession::activate: context message failed");
            return Err(e.into());
        }
        info!("Refinement session active");
        Ok(Self {
            chat,
            gate: TurnGate::default(),
        })
    }

    /// True while a turn is waiting for its reply
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Run one refinement turn, streaming reply fragments to `on_fragment`
    ///
    /// Blank input is ignored and yields `Ok(None)`.
    pub async fn submit<F>(&self, text: &str, on_fragment: F) -> Result<Option<RefinementOutcome>, RefineError>
    where
        F: FnMut(&str),
    {
        let text = text.trim();
        if text.is_empty() {
            debug!("RefinementSession::submit: blank input ignored");
            return Ok(None);
        }
        let Some(_permit) = self.gate.try_acquire() else {
            debug!("RefinementSession::submit: turn already in flight");
            return Err(RefineError::TurnInFlight);
        };

        debug!(chars = %text.len(), "RefinementSession::submit: sending turn");
        let reply = self.chat.send_stream(text, on_fragment).await.map_err(|e| {
            error!(error = %e, "RefinementSession::submit: turn failed");
            RefineError::from(e)
        })?;

        let outcome = classify(&reply);
        info!(replacement = %outcome.is_replacement(), "Refinement turn complete");
        Ok(Some(outcome))
    }
}
