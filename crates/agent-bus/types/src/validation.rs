//! Validation verdicts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome of one validation strategy evaluation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    is_valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    metadata: HashMap<String, serde_json::Value>,
    constitutional_hash: String,
}

impl ValidationResult {
    /// A passing verdict for the given hash.
    pub fn valid(constitutional_hash: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: HashMap::new(),
            constitutional_hash: constitutional_hash.into(),
        }
    }

    /// A failing verdict. An empty error list is replaced by a generic reason
    /// so a failure always explains itself.
    pub fn invalid(constitutional_hash: impl Into<String>, errors: Vec<String>) -> Self {
        let errors = if errors.is_empty() {
            vec!["validation failed".to_string()]
        } else {
            errors
        };
        Self {
            is_valid: false,
            errors,
            warnings: Vec::new(),
            metadata: HashMap::new(),
            constitutional_hash: constitutional_hash.into(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn constitutional_hash(&self) -> &str {
        &self.constitutional_hash
    }

    /// Fold several verdicts (in evaluation order) into one.
    ///
    /// Valid only if every part is valid. Errors and warnings keep their
    /// order; metadata from later parts wins on key collision.
    pub fn aggregate(constitutional_hash: impl Into<String>, parts: Vec<ValidationResult>) -> Self {
        let mut merged = Self::valid(constitutional_hash);
        for part in parts {
            merged.is_valid &= part.is_valid;
            merged.errors.extend(part.errors);
            merged.warnings.extend(part.warnings);
            merged.metadata.extend(part.metadata);
        }
        if !merged.is_valid && merged.errors.is_empty() {
            merged.errors.push("validation failed".to_string());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_always_has_an_error() {
        let result = ValidationResult::invalid("h", vec![]);
        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 1);
    }

    #[test]
    fn aggregate_preserves_order_and_validity() {
        let parts = vec![
            ValidationResult::valid("h").with_warning("slow registry"),
            ValidationResult::invalid("h", vec!["first".into()]),
            ValidationResult::invalid("h", vec!["second".into()]),
        ];
        let merged = ValidationResult::aggregate("h", parts);
        assert!(!merged.is_valid());
        assert_eq!(merged.errors(), &["first".to_string(), "second".to_string()]);
        assert_eq!(merged.warnings(), &["slow registry".to_string()]);
    }

    #[test]
    fn aggregate_of_nothing_is_valid() {
        assert!(ValidationResult::aggregate("h", vec![]).is_valid());
    }
}
