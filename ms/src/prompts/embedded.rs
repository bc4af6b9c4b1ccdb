//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

/// MentorSTEM+ system prompt: proposals first, then the detailed plan
pub const MENTOR: &str = include_str!("../../prompts/mentor.pmt");

/// InspiraTEC system prompt for the refinement chat
pub const INSPIRATEC: &str = include_str!("../../prompts/inspiratec.pmt");

/// First message of a generation: the teacher's form data
pub const PROPOSAL_REQUEST: &str = include_str!("../../prompts/proposal-request.pmt");

/// Second message of a generation: the chosen proposal
pub const PROPOSAL_SELECTION: &str = include_str!("../../prompts/proposal-selection.pmt");

/// Opening message of a refinement chat carrying the current plan
pub const REFINE_CONTEXT: &str = include_str!("../../prompts/refine-context.pmt");

/// One-shot narration script request
pub const PODCAST: &str = include_str!("../../prompts/podcast.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let found = match name {
        "mentor" => Some(MENTOR),
        "inspiratec" => Some(INSPIRATEC),
        "proposal-request" => Some(PROPOSAL_REQUEST),
        "proposal-selection" => Some(PROPOSAL_SELECTION),
        "refine-context" => Some(REFINE_CONTEXT),
        "podcast" => Some(PODCAST),
        _ => None,
    };
    if found.is_none() {
        debug!(%name, "get_embedded: no match found");
    }
    found
}
