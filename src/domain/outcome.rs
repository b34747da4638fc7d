use serde::Serialize;

use crate::error::{ErrorKind, PairbotError, Result};

/// Reported status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    /// Checks passed, nothing submitted yet
    Valid,
    Success,
    Error,
}

/// Operation report: status, message, retryable flag and payload in one record
#[derive(Debug, Clone, Serialize)]
pub struct Outcome<T> {
    pub status: Status,
    pub message: Option<String>,
    pub retryable: bool,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
    pub payload: Option<T>,
}

impl<T> Outcome<T> {
    pub fn valid(payload: T) -> Self {
        Self {
            status: Status::Valid,
            message: None,
            retryable: false,
            error_kind: None,
            payload: Some(payload),
        }
    }

    pub fn success(payload: T) -> Self {
        Self {
            status: Status::Success,
            message: None,
            retryable: false,
            error_kind: None,
            payload: Some(payload),
        }
    }

    pub fn error(err: &PairbotError) -> Self {
        Self {
            status: Status::Error,
            message: Some(err.to_string()),
            retryable: err.is_retryable(),
            error_kind: Some(err.kind()),
            payload: None,
        }
    }

    /// Error report that still carries partial progress
    pub fn error_with_payload(err: &PairbotError, payload: T) -> Self {
        Self {
            payload: Some(payload),
            ..Self::error(err)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status != Status::Error
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(payload) => Outcome::success(payload),
            Err(e) => Outcome::error(&e),
        }
    }
}
