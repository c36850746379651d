//! Template engine errors.
//!
//! A render error aborts the offending template for that event only; the
//! state machine keeps running.

use catcierge_core::TimeFormatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("variable \"{var}\" not terminated in output template line {line}")]
    Unterminated { var: String, line: usize },

    #[error("unknown template variable \"{0}\"")]
    UnknownVar(String),

    #[error("inner variable \"$...$\" not terminated inside of \"{0}\"")]
    InnerUnterminated(String),

    #[error("max output template recursion level reached ({0})")]
    RecursionLimit(usize),

    #[error("failed to parse {what} expression '{expr}' on line {line}")]
    BadExpr {
        what: &'static str,
        expr: String,
        line: usize,
    },

    #[error("missing closing '{end_tag}' for '{expr}' at line {line}")]
    MissingEnd {
        end_tag: &'static str,
        expr: String,
        line: usize,
    },

    #[error("reversed range not allowed {0} > {1}")]
    ReversedRange(i64, i64),

    #[error("failed to parse '{0}' as an integer")]
    NotAnInteger(String),

    #[error("unknown operator \"{0}\" in if expression")]
    UnknownOperator(String),

    #[error("variable '{0}' already defined")]
    DuplicateVar(String),

    #[error("unknown template setting: \"{0}\"")]
    UnknownSetting(String),

    #[error("empty topic specified in template")]
    EmptyTopic,

    #[error("missing required variable '{0}'. Define using: --uservar \"{0} <value>\"")]
    MissingRequiredVar(String),

    #[error("user variable command failed: {0}")]
    UserCommand(String),

    #[error(transparent)]
    Time(#[from] TimeFormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
