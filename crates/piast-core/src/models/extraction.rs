//! Structured OCR extraction results.
//!
//! The gateway returns loosely shaped JSON; the invoker validates it into
//! [`ParsedExtraction`] at the boundary so the orchestrator never touches
//! untyped data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::document::DocumentCategory;

/// Document classification produced by the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    BirthCertificate,
    MarriageCertificate,
    DeathCertificate,
    Passport,
    MilitaryRecord,
    NaturalizationRecord,
    Unknown,
}

impl Display for DocumentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentKind::BirthCertificate => write!(f, "birth_certificate"),
            DocumentKind::MarriageCertificate => write!(f, "marriage_certificate"),
            DocumentKind::DeathCertificate => write!(f, "death_certificate"),
            DocumentKind::Passport => write!(f, "passport"),
            DocumentKind::MilitaryRecord => write!(f, "military_record"),
            DocumentKind::NaturalizationRecord => write!(f, "naturalization_record"),
            DocumentKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for DocumentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "birth_certificate" => Ok(DocumentKind::BirthCertificate),
            "marriage_certificate" => Ok(DocumentKind::MarriageCertificate),
            "death_certificate" => Ok(DocumentKind::DeathCertificate),
            "passport" => Ok(DocumentKind::Passport),
            "military_record" => Ok(DocumentKind::MilitaryRecord),
            "naturalization_record" => Ok(DocumentKind::NaturalizationRecord),
            "unknown" => Ok(DocumentKind::Unknown),
            _ => Err(anyhow::anyhow!("Invalid document kind: {}", s)),
        }
    }
}

impl DocumentKind {
    /// Expected kind for a declared category, if the category is specific
    /// enough to pin one down.
    pub fn expected_for(category: DocumentCategory) -> Option<DocumentKind> {
        match category {
            DocumentCategory::BirthCertificate => Some(DocumentKind::BirthCertificate),
            DocumentCategory::MarriageCertificate => Some(DocumentKind::MarriageCertificate),
            DocumentCategory::DeathCertificate => Some(DocumentKind::DeathCertificate),
            DocumentCategory::Passport => Some(DocumentKind::Passport),
            DocumentCategory::MilitaryRecord => Some(DocumentKind::MilitaryRecord),
            DocumentCategory::NaturalizationRecord => Some(DocumentKind::NaturalizationRecord),
            DocumentCategory::Other => None,
        }
    }
}

/// Type-specific extracted fields, tagged by record class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "record_class", rename_all = "snake_case")]
pub enum ExtractedFields {
    /// Modern civil registry record (post-1945 Polish registry offices).
    CivilRecord {
        person_name: Option<String>,
        event_date: Option<NaiveDate>,
        event_place: Option<String>,
        father_name: Option<String>,
        mother_name: Option<String>,
        registry_office: Option<String>,
        record_number: Option<String>,
    },
    /// Historical/archival record: Cyrillic or Gothic-script registries where
    /// dates often survive only as free text.
    HistoricalRecord {
        original_script_name: Option<String>,
        transliterated_name: Option<String>,
        event_date_text: Option<String>,
        event_place: Option<String>,
        language: Option<String>,
        era: Option<String>,
    },
    Passport {
        surname: Option<String>,
        given_names: Option<String>,
        passport_number: Option<String>,
        nationality: Option<String>,
        birth_date: Option<NaiveDate>,
        expiry_date: Option<NaiveDate>,
        issuing_authority: Option<String>,
    },
}

/// A validated OCR extraction, as produced by an invoker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedExtraction {
    pub document_kind: DocumentKind,
    /// Model's self-reported confidence in [0, 1].
    pub confidence: f64,
    /// Raw transcription of the visible text, when the model provides one.
    pub transcription: Option<String>,
    /// Non-fatal issues the model flagged (illegible sections, damaged pages).
    #[serde(default)]
    pub warnings: Vec<String>,
    pub fields: ExtractedFields,
    /// English translation of the extracted fields, when requested.
    pub translated_fields: Option<serde_json::Value>,
}

impl ParsedExtraction {
    /// Schema validation applied immediately after JSON parse, before the
    /// extraction crosses the invoker boundary.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) || self.confidence.is_nan() {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        let fields_match = matches!(
            (&self.document_kind, &self.fields),
            (DocumentKind::Passport, ExtractedFields::Passport { .. })
                | (
                    DocumentKind::BirthCertificate
                        | DocumentKind::MarriageCertificate
                        | DocumentKind::DeathCertificate
                        | DocumentKind::MilitaryRecord
                        | DocumentKind::NaturalizationRecord
                        | DocumentKind::Unknown,
                    ExtractedFields::CivilRecord { .. } | ExtractedFields::HistoricalRecord { .. }
                )
        );
        if !fields_match {
            return Err(format!(
                "extracted fields do not match document kind {}",
                self.document_kind
            ));
        }
        Ok(())
    }

    pub fn passport_expiry(&self) -> Option<NaiveDate> {
        match &self.fields {
            ExtractedFields::Passport { expiry_date, .. } => *expiry_date,
            _ => None,
        }
    }
}
