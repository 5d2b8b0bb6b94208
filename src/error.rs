//! Error model shared by every endpoint
//!
//! [`GiveError`] is the expected, named failure (unknown reference, table not
//! ready, ...). [`Fault`] is everything that can end a request: a domain
//! error, a database failure or any other internal error. Faults are turned
//! into HTTP replies by [`crate::boundary`].

use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    fmt,
    panic::Location,
};
use thiserror::Error;

use crate::database;

/// Reply body for domain errors hidden by the suppression policy.
pub const GENERIC_PARAMETER_MESSAGE: &str = "Error in GIVE parameters. If you believe your parameter is correct, please contact the admin of the server for details.";

/// Reply body for database faults hidden by the suppression policy.
pub const GENERIC_DATABASE_MESSAGE: &str =
    "Database error happened. Please contact the admin of the server for details.";

/// Reply body for every other fault hidden by the suppression policy.
pub const GENERIC_SERVER_MESSAGE: &str =
    "Server error happened. Please contact the admin of the server for details.";

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error codes sent to clients. The numeric values are part of the JSON
/// contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    // Server-wide
    ConnectionFailed = 1,
    RefNotReady = 2,

    // Reference-wide
    NoRefNamed = 10,
    TableNotReady = 100,
    LinkedTableNotReady = 101,
    NoGeneSymbolColumn = 102,
    TableFormatError = 103,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Server,
    Reference,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::ConnectionFailed,
        ErrorCode::RefNotReady,
        ErrorCode::NoRefNamed,
        ErrorCode::TableNotReady,
        ErrorCode::LinkedTableNotReady,
        ErrorCode::NoGeneSymbolColumn,
        ErrorCode::TableFormatError,
    ];

    pub const fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.value() == value)
    }

    pub const fn scope(self) -> ErrorScope {
        match self {
            ErrorCode::ConnectionFailed | ErrorCode::RefNotReady => ErrorScope::Server,
            _ => ErrorScope::Reference,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::RefNotReady => "REF_NOT_READY",
            ErrorCode::NoRefNamed => "NO_REF_NAMED",
            ErrorCode::TableNotReady => "TABLE_NOT_READY",
            ErrorCode::LinkedTableNotReady => "LINKED_TABLE_NOT_READY",
            ErrorCode::NoGeneSymbolColumn => "NO_GENE_SYMBOL_COLUMN",
            ErrorCode::TableFormatError => "TABLE_FORMAT_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.value())
    }
}

/// An expected application failure with a stable code.
///
/// `user_input_related` marks errors caused by the caller's parameters; only
/// those keep their details when server errors are suppressed. It is fixed at
/// construction.
#[derive(Debug, Error)]
#[error("[{code}]: {message}")]
pub struct GiveError {
    message: String,
    code: ErrorCode,
    user_input_related: bool,
    location: &'static Location<'static>,
    source: Option<BoxError>,
}

impl GiveError {
    /// An error about server-side data, hidden from clients under suppression.
    #[track_caller]
    pub fn new(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::build(message.into(), code, false)
    }

    /// An error caused by the request parameters, always shown to the client.
    #[track_caller]
    pub fn user_input(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::build(message.into(), code, true)
    }

    #[track_caller]
    fn build(message: String, code: ErrorCode, user_input_related: bool) -> Self {
        Self { message, code, user_input_related, location: Location::caller(), source: None }
    }

    /// Attach the error that caused this one.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn is_user_input_related(&self) -> bool {
        self.user_input_related
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Every attribute of the error.
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "message": self.message,
            "code": self.code,
            "userInputRelated": self.user_input_related,
            "file": self.location.file(),
            "line": self.location.line(),
        });
        if let Some(source) = &self.source {
            body["previous"] = Value::String(source.to_string());
        }
        body
    }

    /// What a client may see while server errors are suppressed: the full
    /// error when the caller's input caused it, a generic message otherwise.
    pub fn to_suppressed_json(&self) -> Value {
        if self.user_input_related {
            self.to_json()
        } else {
            json!({ "message": GENERIC_PARAMETER_MESSAGE })
        }
    }
}

/// Anything that ends a request with an error reply.
#[derive(Debug)]
pub enum Fault {
    Domain(GiveError),
    Database { source: database::Error, backtrace: Backtrace },
    Internal { report: color_eyre::Report, backtrace: Backtrace },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Domain(err) => fmt::Display::fmt(err, f),
            Fault::Database { source, .. } => fmt::Display::fmt(source, f),
            Fault::Internal { report, .. } => write!(f, "{report}"),
        }
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Fault::Domain(err) => std::error::Error::source(err),
            Fault::Database { source, .. } => Some(source),
            Fault::Internal { .. } => None,
        }
    }
}

impl Fault {
    /// An internal fault from a plain message.
    pub fn internal(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::from(color_eyre::Report::msg(message))
    }

    /// An internal fault from the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::internal(format!("Handler panicked: {detail}"))
    }

    /// Short label used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Fault::Domain(_) => "domain",
            Fault::Database { .. } => "database",
            Fault::Internal { .. } => "internal",
        }
    }

    /// Cause chain followed by the backtrace captured with the fault.
    ///
    /// Domain errors have no trace; they are reported through their fields.
    pub fn trace(&self) -> Vec<String> {
        let mut trace = Vec::new();
        let backtrace = match self {
            Fault::Domain(_) => return trace,
            Fault::Database { source, backtrace } => {
                let mut cause = std::error::Error::source(source);
                while let Some(err) = cause {
                    trace.push(err.to_string());
                    cause = std::error::Error::source(err);
                }
                backtrace
            },
            Fault::Internal { report, backtrace } => {
                trace.extend(report.chain().skip(1).map(ToString::to_string));
                backtrace
            },
        };

        if backtrace.status() == BacktraceStatus::Captured {
            trace.extend(
                backtrace
                    .to_string()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        trace
    }
}

impl From<GiveError> for Fault {
    fn from(err: GiveError) -> Self {
        Fault::Domain(err)
    }
}

impl From<database::Error> for Fault {
    fn from(source: database::Error) -> Self {
        Fault::Database { source, backtrace: Backtrace::force_capture() }
    }
}

impl From<sqlx::Error> for Fault {
    fn from(err: sqlx::Error) -> Self {
        Fault::from(database::Error::from(err))
    }
}

impl From<color_eyre::Report> for Fault {
    fn from(report: color_eyre::Report) -> Self {
        Fault::Internal { report, backtrace: Backtrace::force_capture() }
    }
}

/// Initialize error handling for the application
pub fn install_error_handlers() -> color_eyre::Result<()> {
    color_eyre::install()?;
    install_panic_hook();
    Ok(())
}

/// Records panics through tracing.
///
/// Panics raised while a request is being served are only handed to the
/// error boundary, which logs them together with the request.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let site = panic_info
            .location()
            .map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()));
        if crate::boundary::record_panic_site(site.as_deref().unwrap_or("unknown")) {
            return;
        }

        if let Some(location) = panic_info.location() {
            tracing::error!(
                message = %panic_info,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
                "Application panic"
            );
        } else {
            tracing::error!(message = %panic_info, "Application panic");
        }
    }));
}
