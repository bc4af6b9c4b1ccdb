//! MentorSTEM+ - STEM+ project plan assistant
//!
//! Helps teachers turn a short form (grade, topic, resources, time) into a
//! complete STEM+ project plan: three proposals first, then a detailed
//! numbered plan that can be edited section by section, refined in a chat,
//! narrated as a podcast script, and exported as a printable document.
//!
//! # Modules
//!
//! - [`markdown`] - Restricted markdown to HTML renderer
//! - [`sections`] - Plan documents and the numbered-section splitter
//! - [`editor`] - Section editing, reassembly and expansion state
//! - [`proposals`] - Proposal extraction and diagnostics
//! - [`refine`] - Refinement replies, plan comparison and the chat session
//! - [`llm`] - Text-completion client trait and Gemini implementation
//! - [`prompts`] - Prompt templates
//! - [`form`] - Project form validation
//! - [`store`] - Saved project history
//! - [`narration`] - Podcast scripts and playback
//! - [`export`] - Printable documents
//! - [`app`] - Application state and actions
//! - [`repl`] - Interactive terminal session
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod app;
pub mod cli;
pub mod config;
pub mod editor;
pub mod export;
pub mod form;
pub mod llm;
pub mod markdown;
pub mod narration;
pub mod prompts;
pub mod proposals;
pub mod refine;
pub mod repl;
pub mod sections;
pub mod store;

pub use app::{Assistant, AssistantError, View};
pub use config::Config;
pub use sections::{PlanDocument, Section, split};
