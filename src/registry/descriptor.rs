//! Monitor type descriptors: form fields, validation, display metadata

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;

use crate::checks::Checker;
use crate::core::Monitor;
use crate::utils::FieldIssue;

/// Input kind for UI form generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Url,
    Host,
    Port,
    Number,
    Select,
}

/// One form field of a monitor type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDescriptor {
    #[must_use]
    pub fn required(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            required: false,
        }
    }
}

/// Structured result of applying a type's validation schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    pub issues: Vec<FieldIssue>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            issues: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn fail(issues: Vec<FieldIssue>) -> Self {
        Self {
            success: false,
            issues,
            warnings: Vec::new(),
        }
    }

    /// Success iff the issue list is empty
    #[must_use]
    pub fn from_issues(issues: Vec<FieldIssue>) -> Self {
        Self {
            success: issues.is_empty(),
            issues,
            warnings: Vec::new(),
        }
    }
}

/// A registry entry for one monitor type
pub struct MonitorTypeDescriptor {
    pub type_name: String,
    pub display_name: String,
    pub description: String,
    pub version: semver::Version,
    /// Ordered for UI form generation
    pub fields: Vec<FieldDescriptor>,
    pub validator: Box<dyn Fn(&Monitor) -> ValidationResult + Send + Sync>,
    pub check_factory: Box<dyn Fn() -> Arc<dyn Checker> + Send + Sync>,
}

impl MonitorTypeDescriptor {
    /// The safe subset exposed through the host interface
    #[must_use]
    pub fn summary(&self) -> MonitorTypeSummary {
        MonitorTypeSummary {
            type_name: self.type_name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            version: self.version.to_string(),
            fields: self.fields.clone(),
        }
    }
}

impl std::fmt::Debug for MonitorTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorTypeDescriptor")
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Factory-free descriptor view for external consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTypeSummary {
    #[serde(rename = "type")]
    pub type_name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub fields: Vec<FieldDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_result_from_issues() {
        assert!(ValidationResult::from_issues(vec![]).success);
        let failed =
            ValidationResult::from_issues(vec![FieldIssue::new("url", "required")]);
        assert!(!failed.success);
        assert_eq!(failed.issues.len(), 1);
    }

    #[test]
    fn test_summary_serialization_uses_type_key() {
        let summary = MonitorTypeSummary {
            type_name: "http".into(),
            display_name: "HTTP".into(),
            description: "d".into(),
            version: "1.0.0".into(),
            fields: vec![FieldDescriptor::required("url", "URL", FieldKind::Url)],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "http");
        assert_eq!(json["fields"][0]["kind"], "url");
        assert_eq!(json["fields"][0]["required"], true);
    }
}
