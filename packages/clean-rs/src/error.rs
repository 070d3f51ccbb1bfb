//! Configuration errors and typed transport failures.
//!
//! `CleanError` provides pattern-matchable wiring errors instead of panics.
//! `FailureResponse` is the typed failure value a handler produces.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` ever crosses the ExternalInterface boundary.**
//!
//! - `anyhow` is internal transport (ergonomic for handlers)
//! - `FailureResponse` is the only externalized failure (typed for gateways)
//! - `CleanError` is reserved for wiring mistakes and is never folded into
//!   an entity
//!
//! # Example
//!
//! ```ignore
//! use clean::CleanError;
//!
//! match use_case.get_output::<ProfileOutput>() {
//!     Ok(output) => render(output),
//!     Err(CleanError::MissingOutputFilter { output_type }) => {
//!         eprintln!("use case was built without a filter for {}", output_type);
//!     }
//!     Err(other) => eprintln!("{}", other),
//! }
//! ```

use std::fmt;

use thiserror::Error;

// =============================================================================
// Clean Error
// =============================================================================

/// Structured error type for wiring mistakes.
///
/// Every variant indicates that components were connected incorrectly.
/// These are surfaced immediately at the call site and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanError {
    /// `get_output` was called for a type with no output filter.
    #[error("no output filter registered for output type {output_type}")]
    MissingOutputFilter {
        /// Human-readable type name.
        output_type: &'static str,
    },

    /// `set_input` was called for a type with no input filter.
    #[error("no input filter registered for input type {input_type}")]
    MissingInputFilter {
        /// Human-readable type name.
        input_type: &'static str,
    },

    /// A filter was registered twice for the same message type.
    #[error("filter already registered for {type_name}")]
    FilterAlreadyRegistered {
        /// Human-readable type name of the output or input.
        type_name: &'static str,
    },

    /// A second subscription was registered for the same output type.
    #[error("subscription already registered for output type {output_type}")]
    SubscriptionAlreadyRegistered {
        /// Human-readable type name.
        output_type: &'static str,
    },

    /// `request` asked for a success input the subscriber does not produce.
    #[error(
        "subscription for output type {output_type} produces {registered}, but {requested} was requested"
    )]
    SuccessInputMismatch {
        /// Output type the subscription is keyed by.
        output_type: &'static str,
        /// Success input type of the subscriber.
        registered: &'static str,
        /// Success input type the caller expected.
        requested: &'static str,
    },

    /// A request was dispatched with no handler for its type.
    #[error("no handler registered for request type {request_type}")]
    NoHandlerRegistered {
        /// Human-readable type name.
        request_type: &'static str,
    },

    /// A handler is already registered for this request type.
    #[error("handler already registered for request type {request_type}")]
    HandlerAlreadyRegistered {
        /// Human-readable type name.
        request_type: &'static str,
    },

    /// The handler for a request type produces a different response type.
    #[error(
        "handler for request type {request_type} produces {registered}, but {requested} was requested"
    )]
    ResponseTypeMismatch {
        /// Request type the handler is keyed by.
        request_type: &'static str,
        /// Response type of the registered handler.
        registered: &'static str,
        /// Response type the caller expected.
        requested: &'static str,
    },

    /// The use case was torn down and no longer accepts state changes.
    #[error("use case for entity {entity_type} has been disposed")]
    UseCaseDisposed {
        /// Human-readable type name of the entity.
        entity_type: &'static str,
    },

    /// No provider is registered for the requested type.
    #[error("no provider registered for {type_name}")]
    MissingProvider {
        /// Human-readable type name.
        type_name: &'static str,
    },

    /// A provider is already registered for this type.
    #[error("provider already registered for {type_name}")]
    ProviderAlreadyRegistered {
        /// Human-readable type name.
        type_name: &'static str,
    },
}

// =============================================================================
// Failure Response
// =============================================================================

/// Category of a transport failure.
///
/// Gateways usually map the category, not the message, into a domain
/// failure input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// Uncategorized failure (the default `on_error` wrapper).
    Unknown,
    /// The remote resource does not exist.
    NotFound,
    /// Authentication or authorization failure.
    Unauthorized,
    /// The request was rejected as invalid.
    Validation,
    /// The external call did not finish in time.
    Timeout,
    /// The handler was cancelled before it produced a response.
    Cancelled,
    /// Connection-level failure, or the handler finished without a response.
    Transport,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::Unknown => write!(f, "unknown"),
            FailureCategory::NotFound => write!(f, "not_found"),
            FailureCategory::Unauthorized => write!(f, "unauthorized"),
            FailureCategory::Validation => write!(f, "validation_error"),
            FailureCategory::Timeout => write!(f, "timeout"),
            FailureCategory::Cancelled => write!(f, "cancelled"),
            FailureCategory::Transport => write!(f, "transport_error"),
        }
    }
}

/// A typed failure produced by an external interface.
///
/// This is the only failure shape a gateway ever sees. Raw handler errors
/// are converted by the interface's error handler before they leave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureResponse {
    /// What kind of failure occurred.
    pub category: FailureCategory,
    /// Human-readable description.
    pub message: String,
}

impl FailureResponse {
    /// Create a failure with an explicit category.
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// The default wrapper for errors nobody categorized.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Unknown, message)
    }

    /// Create a not-found failure.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            FailureCategory::NotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Create an unauthorized failure (generic message, no details).
    pub fn unauthorized() -> Self {
        Self::new(FailureCategory::Unauthorized, "access denied")
    }

    /// Create a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Validation, message)
    }

    /// Create a failure for a handler that was cancelled.
    pub fn cancelled() -> Self {
        Self::new(FailureCategory::Cancelled, "request cancelled")
    }

    /// Convert a handler error into a typed failure.
    ///
    /// Uses anyhow's downcasting to recognize well-known error types and
    /// falls back to [`FailureCategory::Unknown`] carrying the error text.
    pub fn from_error(error: &anyhow::Error) -> Self {
        if let Some(failure) = error.downcast_ref::<FailureResponse>() {
            return failure.clone();
        }

        if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Self::new(FailureCategory::Timeout, "operation timed out");
        }

        if let Some(io_err) = error.downcast_ref::<std::io::Error>() {
            let category = match io_err.kind() {
                std::io::ErrorKind::NotFound => FailureCategory::NotFound,
                std::io::ErrorKind::PermissionDenied => FailureCategory::Unauthorized,
                std::io::ErrorKind::TimedOut => FailureCategory::Timeout,
                std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                    FailureCategory::Validation
                }
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe => FailureCategory::Transport,
                _ => FailureCategory::Unknown,
            };
            return Self::new(category, io_err.to_string());
        }

        Self::unknown(error.to_string())
    }

    /// Returns true if this failure was produced by the default wrapper.
    pub fn is_unknown(&self) -> bool {
        self.category == FailureCategory::Unknown
    }
}

impl fmt::Display for FailureResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed ({}): {}", self.category, self.message)
    }
}

impl std::error::Error for FailureResponse {}
