use std::fmt;

/// The seven error kinds the runtime surfaces, per the propagation policy:
/// configuration/module-load errors abort the top-level operation,
/// lifecycle violations are programmer errors, runtime failures are caught
/// at the worker boundary, and validator failures are returned, not thrown.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("type mismatch: expected `{expected}`, got `{actual}`")]
    TypeMismatch { expected: String, actual: String },

    #[error("lifecycle violation: {0}")]
    LifecycleViolation(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("runtime failure: {0}")]
    RuntimeFailure(#[source] AnyError),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Type-erased error used at boundaries that only need `Display` + `Error`,
/// matching the teacher's `AnyError` convention for slot and update bodies.
pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

impl RuntimeError {
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn runtime_failure(err: impl Into<AnyError>) -> Self {
        Self::RuntimeFailure(err.into())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
