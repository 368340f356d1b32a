//! Field-level configuration validation.
//!
//! Validators return a [`ValidationError`] for one field; [`ValidationContext`]
//! tracks the path of the field being checked and collects every error so a
//! config file is reported in one pass.

use thiserror::Error;

use crate::stages::{RampPolicy, Stage};

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation context for building error messages.
#[derive(Default)]
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a nested field context.
    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    /// Exit the current field context.
    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    /// Get the current field path as a string.
    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    /// Add a field error with automatic path.
    pub fn field_error(&mut self, message: String) {
        self.errors.push(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    /// Records `result` under the current path if it failed.
    pub fn check(&mut self, result: ValidationResult<()>) {
        if let Err(e) = result {
            self.field_error(e.to_string());
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the context and return a result.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
            Err(ValidationError::Multiple(messages.join("; ")))
        }
    }
}

/// Validator for URLs.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        let invalid = |message: String| ValidationError::InvalidFormat {
            field: "url".to_string(),
            message,
        };

        if url.is_empty() {
            return Err(invalid("URL cannot be empty".to_string()));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(invalid(format!(
                "URL must start with http:// or https://, got: {}",
                url
            )));
        }

        if url.contains(' ') {
            return Err(invalid("URL cannot contain spaces".to_string()));
        }

        Ok(())
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_f64(value: f64, min: f64, max: f64, field: &str) -> ValidationResult<()> {
        if !(min..=max).contains(&value) {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_probability(value: f64, field: &str) -> ValidationResult<()> {
        Self::validate_f64(value, 0.0, 1.0, field)
    }

    pub fn validate_usize(value: usize, min: usize, max: usize, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for stage lists.
pub struct StageValidator;

impl StageValidator {
    /// A linear stage needs time to ramp over; a step stage may be instantaneous.
    pub fn validate_stage(stage: &Stage) -> ValidationResult<()> {
        if stage.ramp == RampPolicy::Linear && stage.duration.is_zero() {
            return Err(ValidationError::FieldError {
                field: "duration".to_string(),
                message: format!(
                    "Linear stage to target {} must have a positive duration (use ramp: step for an instant jump)",
                    stage.target
                ),
            });
        }
        Ok(())
    }

    pub fn validate_plan(stages: &[Stage]) -> ValidationResult<()> {
        if stages.is_empty() {
            return Err(ValidationError::FieldError {
                field: "stages".to_string(),
                message: "At least one stage must be defined".to_string(),
            });
        }

        if stages.iter().all(|s| s.target == 0) {
            return Err(ValidationError::FieldError {
                field: "stages".to_string(),
                message: "At least one stage must have a target above 0".to_string(),
            });
        }

        Ok(())
    }
}
