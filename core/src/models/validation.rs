//! Validation verdicts

use serde::{Deserialize, Serialize};

/// Outcome of validating one SQL statement
///
/// `valid` is true exactly when `errors` is empty. Warnings never block execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryValidation {
    /// Whether the statement may execute
    pub valid: bool,

    /// Reasons the statement was rejected, in check order
    pub errors: Vec<String>,

    /// Non-blocking advisories
    pub warnings: Vec<String>,
}

impl QueryValidation {
    /// A passing validation with no findings
    pub fn passed() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A failed validation with a single error
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }

    /// Record an error; the validation can no longer pass
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    /// Record a warning
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// All errors joined into one line
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_error_invalidates() {
        let mut validation = QueryValidation::passed();
        validation.add_warning("no limit");
        assert!(validation.valid);

        validation.add_error("bad table");
        validation.add_error("bad column");
        assert!(!validation.valid);
        assert_eq!(validation.error_summary(), "bad table; bad column");
        assert_eq!(validation.warnings, vec!["no limit".to_string()]);
    }

    #[test]
    fn test_failure() {
        let validation = QueryValidation::failure("Database 'x' not found");
        assert!(!validation.valid);
        assert_eq!(validation.errors.len(), 1);
        assert!(validation.warnings.is_empty());
    }
}
