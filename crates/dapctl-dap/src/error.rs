//! DAP error types.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Message used when an adapter rejects a request without saying why.
pub const DEFAULT_ERROR_REASON: &str = "No error reason given";

/// Errors from DAP client and session operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// Adapter answered a request with `success: false`.
    #[error("{message}")]
    Protocol {
        /// Rendered error message.
        message: String,
        /// Whether the adapter asked for the message to be shown to the user.
        show_user: bool,
        /// Optional link with more information.
        url: Option<String>,
        /// Label for `url`.
        url_label: Option<String>,
    },

    /// Adapter process or connection could not be started.
    #[error("Unable to start adapter: {0}")]
    AdapterStart(String),

    /// Transport-level communication error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Adapter sent an invalid or unparseable response.
    #[error("adapter sent invalid response: {0}")]
    InvalidResponse(String),

    /// A request was made before the adapter connection existed.
    #[error("Debugging not started")]
    NotStarted,

    /// A request was made after the adapter connection was torn down.
    #[error("Debugging ended")]
    Ended,

    /// The client was disposed while the request was still pending.
    #[error("request abandoned: client disposed")]
    Disposed,

    /// A thread command was issued with no known threads.
    #[error("No threads to run command")]
    NoThreads,

    /// `evaluate` came back without a textual result.
    #[error("expression did not return a result")]
    NoResult,

    /// Adapter does not advertise the needed capability.
    #[error("This debugger does not support {0}")]
    Unsupported(&'static str),

    /// No adapter is installed for the configuration type.
    #[error("Debug adapter with type name \"{0}\" is not installed")]
    NotInstalled(String),

    /// Configuration `request` was neither `launch` nor `attach`.
    #[error("expected configuration to have request of either \"launch\" or \"attach\" found {0}")]
    InvalidRequest(String),

    /// Sessions can only be launched once.
    #[error("Sessions can only be launched once")]
    AlreadyLaunched,

    /// A pre or post debug task failed.
    #[error("task failed: {0}")]
    Task(String),

    /// A request needed an active session and there was none.
    #[error("no active debug session")]
    NoActiveSession,

    /// Anything else worth surfacing as text.
    #[error("{0}")]
    Other(String),
}

/// Structured error carried in `body.error` of a failed response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Unique identifier for the message.
    #[serde(default)]
    pub id: Option<i64>,
    /// Template with `{name}` placeholders.
    #[serde(default)]
    pub format: Option<String>,
    /// Values substituted into `format`.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Show the message to the user.
    #[serde(default)]
    pub show_user: Option<bool>,
    /// Link with more information.
    #[serde(default)]
    pub url: Option<String>,
    /// Label for `url`.
    #[serde(default)]
    pub url_label: Option<String>,
}

impl DapError {
    /// Build a protocol error from a plain message.
    pub fn protocol(message: impl Into<String>) -> Self {
        DapError::Protocol {
            message: message.into(),
            show_user: true,
            url: None,
            url_label: None,
        }
    }

    /// Build a protocol error from an adapter `ErrorMessage`.
    ///
    /// Placeholders without a matching variable are kept as written.
    pub fn from_message(error: &ErrorMessage) -> Self {
        let format = error.format.as_deref().unwrap_or(DEFAULT_ERROR_REASON);
        DapError::Protocol {
            message: format_error_message(format, &error.variables),
            show_user: error.show_user.unwrap_or(true),
            url: error.url.clone(),
            url_label: error.url_label.clone(),
        }
    }

    /// Build the error for a failed response from its `message` and `body`.
    pub fn from_response(message: Option<&str>, body: Option<&serde_json::Value>) -> Self {
        let structured = body
            .and_then(|b| b.get("error"))
            .and_then(|e| serde_json::from_value::<ErrorMessage>(e.clone()).ok());
        match structured {
            Some(error) => DapError::from_message(&error),
            None => DapError::protocol(message.unwrap_or(DEFAULT_ERROR_REASON)),
        }
    }

    /// Whether the error should be surfaced to the user.
    pub fn show_user(&self) -> bool {
        match self {
            DapError::Protocol { show_user, .. } => *show_user,
            _ => true,
        }
    }
}

/// Substitute `{name}` placeholders from `variables`.
///
/// `{{` and `}}` are escapes for literal braces. Unknown names and
/// unterminated placeholders render literally.
pub fn format_error_message(format: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail.find('}') {
                Some(end) => {
                    let key = &tail[1..end];
                    match variables.get(key) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&tail[..=end]),
                    }
                    rest = &tail[end + 1..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
