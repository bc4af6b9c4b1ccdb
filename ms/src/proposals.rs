//! Proposal extraction
//!
//! The first model turn answers with three `PROPUESTA N:` blocks separated
//! by `---` lines. Each block yields a proposal when it names one; summary
//! and resource level fall back to placeholders.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder when a block has no `Resumen Clave:` line
pub const MISSING_SUMMARY: &str = "No se encontró resumen.";

/// Placeholder when a block has no `Nivel de Recursos:` line
pub const MISSING_LEVEL: &str = "No se especificó nivel.";

/// Responses longer than this (in characters) count as long when unparseable
pub const LONG_RESPONSE_THRESHOLD: usize = 500;

const PREVIEW_CHARS: usize = 100;

// Markers count only at the start of a line, optionally behind markdown emphasis or a heading
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t*#]*PROPUESTA[ \t]*\d*[ \t]*:\s*").expect("proposal marker pattern is valid")
});
static DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*---[ \t]*$").expect("delimiter pattern is valid"));
static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*Nombre:[ \t]*(.*)$").expect("name pattern is valid"));
static SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*Resumen Clave:[ \t]*(.*)$").expect("summary pattern is valid"));
static LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*Nivel de Recursos:[ \t]*(.*)$").expect("level pattern is valid"));

/// One candidate project pitch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub name: String,
    pub summary: String,
    pub resource_level: String,
}

/// Extract proposals in the order they appear
///
/// A block runs from its marker to the next `---` line, the next line that
/// opens with a marker, or the end of the text. Prose that merely mentions
/// "propuesta 2:" mid-line never ends a block. Blocks without a non-empty `Nombre:` are dropped.
pub fn extract(raw: &str) -> Vec<Proposal> {
    let markers: Vec<(usize, usize)> = MARKER.find_iter(raw).map(|m| (m.start(), m.end())).collect();

    markers
        .iter()
        .enumerate()
        .filter_map(|(idx, &(_, content_start))| {
            let next_marker = markers.get(idx + 1).map_or(raw.len(), |&(start, _)| start);
            let rest = &raw[content_start..next_marker];
            let block = match DELIMITER.find(rest) {
                Some(delim) => &rest[..delim.start()],
                None => rest,
            };
            parse_block(block)
        })
        .collect()
}

fn parse_block(block: &str) -> Option<Proposal> {
    let name = first_field(&NAME, block).filter(|n| !n.is_empty())?;
    Some(Proposal {
        name,
        summary: first_field(&SUMMARY, block).unwrap_or_else(|| MISSING_SUMMARY.to_string()),
        resource_level: first_field(&LEVEL, block).unwrap_or_else(|| MISSING_LEVEL.to_string()),
    })
}

fn first_field(pattern: &Regex, block: &str) -> Option<String> {
    pattern.captures(block).map(|caps| caps[1].trim().to_string())
}

/// Why a response produced no proposals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalDiagnostic {
    /// Nothing but whitespace came back
    Empty,
    /// A long answer whose structure could not be read
    LongUnparseable,
    /// A short answer whose structure could not be read
    ShortUnparseable { preview: String },
}

impl ProposalDiagnostic {
    /// Pick the diagnostic tier for an unparseable response
    pub fn classify(raw: &str) -> Self {
        if raw.chars().count() > LONG_RESPONSE_THRESHOLD {
            Self::LongUnparseable
        } else if raw.trim().is_empty() {
            Self::Empty
        } else {
            let preview: String = raw.chars().take(PREVIEW_CHARS).collect();
            Self::ShortUnparseable { preview }
        }
    }

    /// User-facing message
    pub fn message(&self) -> String {
        match self {
            Self::Empty => {
                "El asistente no generó propuestas. Intenta de nuevo o modifica los datos ingresados.".to_string()
            }
            Self::LongUnparseable => "El asistente respondió, pero no se pudieron extraer propuestas en el formato \
                 esperado. Intenta generar de nuevo."
                .to_string(),
            Self::ShortUnparseable { preview } => {
                format!("No se pudieron extraer propuestas. Respuesta recibida: \"{}...\"", preview)
            }
        }
    }
}

impl fmt::Display for ProposalDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Result of reading one proposal response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalOutcome {
    Found(Vec<Proposal>),
    Unparsed(ProposalDiagnostic),
}

impl ProposalOutcome {
    /// Extract proposals, falling back to a diagnostic when none are found
    pub fn from_response(raw: &str) -> Self {
        let proposals = extract(raw);
        if proposals.is_empty() {
            Self::Unparsed(ProposalDiagnostic::classify(raw))
        } else {
            Self::Found(proposals)
        }
    }
}
