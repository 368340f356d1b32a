//! Response checks for the shortener contract.
//!
//! Every operation is evaluated as a list of named checks. An operation
//! succeeds only if all of its checks pass; the first failing check becomes
//! the [`CheckFailure`] carried by the record.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::errors::FailureKind;
use crate::policy::{Operation, ReadExpectation};

pub const CREATE_STATUS: &str = "Create: status is 201";
pub const CREATE_SHORT_URL: &str = "Create: response contains shortUrl";
pub const RESOLVE_STATUS: &str = "Short: status is 200";
pub const RESOLVE_ORIGINAL_URL: &str = "Short: response contains originalUrl";
pub const RESOLVE_MISSING_STATUS: &str = "Short: status is 404";

/// Contract violations found in a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    #[error("Status code mismatch: expected {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Field '{0}' missing or empty in response")]
    MissingField(&'static str),

    #[error("Field '{field}' mismatch: expected '{expected}', got '{actual}'")]
    FieldMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
}

impl CheckFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            CheckFailure::StatusMismatch { .. } => FailureKind::UnexpectedStatus,
            _ => FailureKind::UnexpectedBody,
        }
    }
}

/// Result of one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
}

/// All checks run against one response.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub checks: Vec<CheckResult>,

    /// First failing check, if any
    pub failure: Option<CheckFailure>,

    /// Short code returned by a successful create
    pub short_code: Option<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    fn record(&mut self, name: &'static str, result: Result<(), CheckFailure>) {
        let passed = result.is_ok();
        if let Err(failure) = result {
            debug!(check = name, error = %failure, "Check failed");
            if self.failure.is_none() {
                self.failure = Some(failure);
            }
        }
        self.checks.push(CheckResult { name, passed });
    }
}

/// Runs the checks matching `operation` against a received response.
pub fn check_operation(operation: &Operation, status: u16, body: &str) -> CheckOutcome {
    match operation {
        Operation::Write(_) => check_create(status, body),
        Operation::Read(target) => match &target.expectation {
            ReadExpectation::Exists { original_url } => check_resolve(status, body, original_url),
            ReadExpectation::Missing => check_missing(status),
        },
    }
}

/// 201 and a non-empty `shortUrl`.
pub fn check_create(status: u16, body: &str) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    outcome.record(CREATE_STATUS, expect_status(201, status));

    let short_code = parse_json(body).and_then(|json| string_field(&json, "shortUrl"));
    match short_code {
        Ok(code) => {
            outcome.record(CREATE_SHORT_URL, Ok(()));
            if outcome.passed() {
                outcome.short_code = Some(code);
            }
        }
        Err(e) => outcome.record(CREATE_SHORT_URL, Err(e)),
    }

    outcome
}

/// 200 and `originalUrl` equal to `expected_url`.
pub fn check_resolve(status: u16, body: &str, expected_url: &str) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    outcome.record(RESOLVE_STATUS, expect_status(200, status));

    let original = parse_json(body).and_then(|json| string_field(&json, "originalUrl"));
    let result = match original {
        Ok(actual) if actual == expected_url => Ok(()),
        Ok(actual) => Err(CheckFailure::FieldMismatch {
            field: "originalUrl",
            expected: expected_url.to_string(),
            actual,
        }),
        Err(e) => Err(e),
    };
    outcome.record(RESOLVE_ORIGINAL_URL, result);

    outcome
}

/// Inverted expectation: 404 passes, anything else (including 200) fails.
pub fn check_missing(status: u16) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    outcome.record(RESOLVE_MISSING_STATUS, expect_status(404, status));
    outcome
}

fn expect_status(expected: u16, actual: u16) -> Result<(), CheckFailure> {
    if expected == actual {
        Ok(())
    } else {
        Err(CheckFailure::StatusMismatch { expected, actual })
    }
}

fn parse_json(body: &str) -> Result<Value, CheckFailure> {
    serde_json::from_str(body).map_err(|e| CheckFailure::InvalidJson(e.to_string()))
}

fn string_field(json: &Value, field: &'static str) -> Result<String, CheckFailure> {
    match json.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(CheckFailure::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pass() {
        let outcome = check_create(201, r#"{"shortUrl":"CCaICRin"}"#);
        assert!(outcome.passed());
        assert_eq!(outcome.short_code.as_deref(), Some("CCaICRin"));
        assert!(outcome.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn test_create_wrong_status() {
        let outcome = check_create(500, r#"{"shortUrl":"CCaICRin"}"#);
        assert_eq!(
            outcome.failure,
            Some(CheckFailure::StatusMismatch {
                expected: 201,
                actual: 500
            })
        );
        assert!(outcome.short_code.is_none());
        assert_eq!(outcome.checks.len(), 2);
        assert!(!outcome.checks[0].passed);
        assert!(outcome.checks[1].passed);
    }

    #[test]
    fn test_create_missing_or_empty_field() {
        let outcome = check_create(201, r#"{"shortUrl":""}"#);
        assert_eq!(outcome.failure, Some(CheckFailure::MissingField("shortUrl")));

        let outcome = check_create(201, r#"{"id":"x"}"#);
        assert_eq!(outcome.failure.unwrap().kind(), FailureKind::UnexpectedBody);
    }

    #[test]
    fn test_create_invalid_json() {
        let outcome = check_create(201, "<html>oops</html>");
        assert!(matches!(outcome.failure, Some(CheckFailure::InvalidJson(_))));
    }

    #[test]
    fn test_resolve_pass_and_mismatch() {
        let url = "https://kubernetes.io/docs/concepts/overview/components/";
        let body = format!(r#"{{"originalUrl":"{}"}}"#, url);
        assert!(check_resolve(200, &body, url).passed());

        let outcome = check_resolve(200, r#"{"originalUrl":"https://other"}"#, url);
        assert!(matches!(
            outcome.failure,
            Some(CheckFailure::FieldMismatch { field: "originalUrl", .. })
        ));
    }

    #[test]
    fn test_missing_is_inverted() {
        assert!(check_missing(404).passed());

        let outcome = check_missing(200);
        assert_eq!(
            outcome.failure,
            Some(CheckFailure::StatusMismatch {
                expected: 404,
                actual: 200
            })
        );
        assert_eq!(outcome.failure.unwrap().kind(), FailureKind::UnexpectedStatus);
    }
}
