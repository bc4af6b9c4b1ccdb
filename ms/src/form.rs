//! Project form
//!
//! The four inputs a teacher fills in before proposals are generated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message shown when any field is left blank
pub const INCOMPLETE_MESSAGE: &str = "Por favor, completa todos los campos del formulario.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Por favor, completa todos los campos del formulario.")]
    Incomplete,

    #[error("Opción de recursos desconocida: '{0}'. Usa una letra de la A a la F.")]
    UnknownTier(String),
}

/// Resource level available to the class, from most basic (A) to most advanced (F)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceTier {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl ResourceTier {
    pub const ALL: [ResourceTier; 6] = [Self::A, Self::B, Self::C, Self::D, Self::E, Self::F];

    pub fn letter(&self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::E => 'E',
            Self::F => 'F',
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "Aula Tradicional",
            Self::B => "Materiales Reciclables",
            Self::C => "Tecnología Básica",
            Self::D => "Aula con Computadores",
            Self::E => "Kits de Robótica y Sensores",
            Self::F => "Laboratorio STEM Avanzado",
        }
    }
}

impl fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opción {} ({})", self.letter(), self.label())
    }
}

impl FromStr for ResourceTier {
    type Err = FormError;

    /// Accepts the bare letter in either case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|tier| trimmed.len() == 1 && trimmed.eq_ignore_ascii_case(&tier.letter().to_string()))
            .ok_or_else(|| FormError::UnknownTier(trimmed.to_string()))
    }
}

/// Validated form data; every text field is non-blank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectForm {
    pub grade: String,
    pub topic: String,
    pub resources: ResourceTier,
    pub time: String,
}

impl ProjectForm {
    /// Validate raw field values; blank fields win over a bad tier
    pub fn new(grade: &str, topic: &str, resources: &str, time: &str) -> Result<Self, FormError> {
        let fields = [grade, topic, resources, time].map(str::trim);
        if fields.iter().any(|f| f.is_empty()) {
            return Err(FormError::Incomplete);
        }
        let [grade, topic, resources, time] = fields;
        Ok(Self {
            grade: grade.to_string(),
            topic: topic.to_string(),
            resources: resources.parse()?,
            time: time.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_trims_fields() {
        let form = ProjectForm::new(" 5to Grado ", "Agua", "a", " 4 semanas").unwrap();
        assert_eq!(form.grade, "5to Grado");
        assert_eq!(form.resources, ResourceTier::A);
        assert_eq!(form.time, "4 semanas");
    }

    #[test]
    fn test_form_rejects_blank_fields() {
        assert_eq!(ProjectForm::new("5to", "  ", "A", "1 semana"), Err(FormError::Incomplete));
        assert_eq!(ProjectForm::new("", "", "", ""), Err(FormError::Incomplete));
        assert_eq!(FormError::Incomplete.to_string(), INCOMPLETE_MESSAGE);
    }

    #[test]
    fn test_form_rejects_unknown_tier() {
        assert_eq!(
            ProjectForm::new("5to", "Agua", "G", "1 semana"),
            Err(FormError::UnknownTier("G".to_string()))
        );
        assert!("AB".parse::<ResourceTier>().is_err());
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(ResourceTier::A.to_string(), "Opción A (Aula Tradicional)");
        assert_eq!("f".parse::<ResourceTier>().unwrap(), ResourceTier::F);
    }

    #[test]
    fn test_form_serializes_tier_as_letter() {
        let form = ProjectForm::new("5to", "Agua", "C", "1 semana").unwrap();
        let json = serde_json::to_value(&form).unwrap();
        assert_eq!(json["resources"], "C");
    }
}
