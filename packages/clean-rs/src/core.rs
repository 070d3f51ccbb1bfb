//! Core message traits for the clean mediation architecture.
//!
//! # Overview
//!
//! Clean separates **state** from **messages**:
//! - [`Entity`] = State (an immutable snapshot owned by one use case)
//! - [`Output`] = Outbound messages (derived from state, or intent to fetch)
//! - [`Input`] = Inbound messages (transform the entity)
//! - [`Request`] / [`SuccessResponse`] = Transport-level messages, opaque to
//!   the use case
//!
//! All messages are plain values: equality is structural (`PartialEq`) and
//! routing happens by concrete type.
//!
//! # Example
//!
//! ```ignore
//! use clean::{Entity, Output, Input, SuccessInput};
//!
//! #[derive(Debug, Clone, PartialEq, Default)]
//! struct ProfileEntity { id: String, name: String }
//! impl Entity for ProfileEntity {}
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct FetchProfileOutput { id: String }
//! impl Output for FetchProfileOutput {}
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct ProfileInput { name: String }
//! impl Input for ProfileInput {}
//! impl SuccessInput for ProfileInput {}
//! ```

use std::fmt;

/// Immutable domain-state snapshot owned by a use case.
///
/// Entities are replaced wholesale on every change; there is no partial
/// mutation. Equality is structural, and an update that yields an equal
/// entity does not notify observers.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Outbound message derived from or describing a use case's state.
///
/// Outputs are routed by their concrete type, both to output filters and
/// to subscriptions.
pub trait Output: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Inbound message used to transform an entity.
pub trait Input: Clone + fmt::Debug + Send + Sync + 'static {}

/// Marker for inputs that describe a successful request.
pub trait SuccessInput: Input {}

/// Transport-level request built by a gateway.
pub trait Request: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Transport-level successful response.
///
/// Failures are never a `SuccessResponse`; they travel as the typed
/// [`FailureResponse`](crate::FailureResponse) value.
pub trait SuccessResponse: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Success input with no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmptySuccessInput;

impl Input for EmptySuccessInput {}
impl SuccessInput for EmptySuccessInput {}

/// Success response with no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmptySuccessResponse;

impl SuccessResponse for EmptySuccessResponse {}

/// Synthesized failure for an output nobody subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSubscriptionFailureInput {
    /// Type name of the output that had no subscription.
    pub output_type: &'static str,
}

impl fmt::Display for NoSubscriptionFailureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no subscription exists for {}", self.output_type)
    }
}

/// Input describing a failed request.
///
/// Failures are always folded into a valid entity by the caller of
/// `request`; they are values, never control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureInput {
    /// A failure reported by a subscriber, usually a gateway's `on_failure`.
    Message(String),
    /// No subscriber was registered for the requested output type.
    NoSubscription(NoSubscriptionFailureInput),
}

impl FailureInput {
    /// Create a failure carrying a message.
    pub fn new(message: impl Into<String>) -> Self {
        FailureInput::Message(message.into())
    }

    /// Create the synthesized failure for an output type with no subscriber.
    pub fn no_subscription<O: Output>() -> Self {
        FailureInput::NoSubscription(NoSubscriptionFailureInput {
            output_type: std::any::type_name::<O>(),
        })
    }

    /// The human-readable failure message.
    pub fn message(&self) -> String {
        match self {
            FailureInput::Message(message) => message.clone(),
            FailureInput::NoSubscription(missing) => missing.to_string(),
        }
    }

    /// Returns the no-subscription details if this failure was synthesized.
    pub fn as_no_subscription(&self) -> Option<&NoSubscriptionFailureInput> {
        match self {
            FailureInput::NoSubscription(missing) => Some(missing),
            FailureInput::Message(_) => None,
        }
    }
}

impl fmt::Display for FailureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl Input for FailureInput {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    #[allow(dead_code)]
    struct SearchOutput {
        query: String,
    }
    impl Output for SearchOutput {}

    #[test]
    fn test_no_subscription_names_output_type() {
        let failure = FailureInput::no_subscription::<SearchOutput>();
        let missing = failure.as_no_subscription().unwrap();
        assert!(missing.output_type.ends_with("SearchOutput"));
        assert!(failure.message().contains("no subscription exists for"));
        assert!(failure.message().contains("SearchOutput"));
    }

    #[test]
    fn test_message_failure_is_not_no_subscription() {
        let failure = FailureInput::new("backend unavailable");
        assert!(failure.as_no_subscription().is_none());
        assert_eq!(failure.to_string(), "backend unavailable");
    }

    #[test]
    fn test_failure_inputs_compare_structurally() {
        assert_eq!(FailureInput::new("a"), FailureInput::new("a"));
        assert_ne!(FailureInput::new("a"), FailureInput::new("b"));
        assert_ne!(
            FailureInput::new("a"),
            FailureInput::no_subscription::<SearchOutput>()
        );
    }
}
