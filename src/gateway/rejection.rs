//! Per-request failures and their HTTP status codes.

use axum::http::StatusCode;
use thiserror::Error;

/// Body sent when a failure carries no text of its own.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Why a request was refused.
///
/// The display text is the exact response body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Base directory missing or not a directory
    #[error("can not change directory")]
    Directory,

    /// Method outside the configured set
    #[error("method is not allowed")]
    MethodNotAllowed,

    /// Path other than `/`
    #[error("access is denied")]
    AccessDenied,

    /// Empty query string
    #[error("query is invalid")]
    QueryInvalid,

    /// `e` missing or repeated
    #[error("one executable allowed")]
    OneExecutableAllowed,

    /// `e` not in the whitelist
    #[error("executable is not found")]
    ExecutableNotFound,

    /// `a` too short or with an unknown prefix
    #[error("arguments are invalid")]
    ArgumentsInvalid,

    /// Path argument does not exist
    #[error("target is not found")]
    TargetNotFound,

    /// `d_` argument is not a directory
    #[error("target is not a directory")]
    TargetNotDirectory,

    /// `f_` argument is a directory
    #[error("target is not a file")]
    TargetNotFile,

    /// `o_` argument not permitted for the executable
    #[error("option is not found")]
    OptionNotFound,

    /// `t_` argument not enclosed in single quotes
    #[error("text is invalid")]
    TextInvalid,

    /// Spawn failure or captured standard error of a failed command
    #[error("{0}")]
    Execution(String),
}

impl Rejection {
    /// Status code answered for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Response body: the display text, or [`UNKNOWN_ERROR`] when empty.
    #[must_use]
    pub fn message(&self) -> String {
        let text = self.to_string();
        if text.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Rejection::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(Rejection::AccessDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(Rejection::Directory.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Rejection::TextInvalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Rejection::Execution("boom".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn empty_execution_error_falls_back() {
        assert_eq!(Rejection::Execution(String::new()).message(), UNKNOWN_ERROR);
        assert_eq!(Rejection::Execution("\n".to_string()).message(), UNKNOWN_ERROR);
        assert_eq!(
            Rejection::Execution("ls: cannot access".to_string()).message(),
            "ls: cannot access"
        );
        assert_eq!(Rejection::OptionNotFound.message(), "option is not found");
    }
}
