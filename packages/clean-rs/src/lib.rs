//! # Clean
//!
//! A typed request/response mediation core where use cases own state,
//! gateways translate, and external interfaces perform IO.
//!
//! ## Core Concepts
//!
//! Clean separates **state** from **IO**:
//! - [`UseCase`] = State (one [`Entity`], replaced wholesale on every change)
//! - [`ExternalInterface`] = IO (handlers keyed by request type)
//! - [`Gateway`] / [`WatcherGateway`] = Translation between the two
//!
//! The key principle: **A use case never knows who serves its outputs.**
//! It sends an [`Output`] to whoever subscribed to that type and folds the
//! answer back into its entity.
//!
//! ## Architecture
//!
//! ```text
//! UseCase.request(output)
//!     │
//!     ▼ subscription lookup (by output type)
//! Gateway.build_request(output)
//!     │
//!     ▼ Transport.send(request)
//! ExternalInterface ──► handler task ──► ResponseSender
//!                                              │
//!     ┌────────────────────────────────────────┘
//!     ▼ Ok(response) / Err(FailureResponse)
//! Gateway.on_success / on_failure
//!     │
//!     ▼ SuccessInput / FailureInput
//! UseCase: on_success(entity, input) / on_failure(entity, failure)
//!     │
//!     ▼ entity replaced, observers notified
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Entities are values** - Never mutated in place, compared structurally
//! 2. **Failures are values** - Transport errors become `FailureInput`s, not `Err`
//! 3. **Wiring errors are loud** - Missing filters or handlers are `CleanError`s
//! 4. **One subscriber per output type** - Duplicates are rejected
//! 5. **Filters are pure** - No IO, no re-entry into the use case
//!
//! ## Example
//!
//! ```ignore
//! use clean::{attach_gateway, ExternalInterface, UseCase};
//!
//! let interface = ExternalInterface::builder()
//!     .on_fn(|request: ProfileRequest, responses| async move {
//!         responses.send(api.fetch_profile(&request.id).await?);
//!         Ok(())
//!     })?
//!     .build();
//!
//! let use_case = UseCase::builder(ProfileEntity::default())
//!     .with_output_filter(|e: &ProfileEntity| FetchProfileOutput { id: e.id.clone() })?
//!     .build();
//!
//! attach_gateway(&use_case, ProfileGateway, interface.transport()?)?;
//!
//! use_case
//!     .request(
//!         use_case.get_output::<FetchProfileOutput>()?,
//!         |e, i: ProfileInput| ProfileEntity { name: i.name, ..e.clone() },
//!         |e, failure| ProfileEntity { error: Some(failure.message()), ..e.clone() },
//!     )
//!     .await?;
//! ```

// Core modules
mod config;
mod core;
mod debounce;
mod error;
mod external;
mod gateway;
mod providers;
mod response;
mod use_case;
mod watcher;


// Re-export message types
pub use crate::core::{
    EmptySuccessInput, EmptySuccessResponse, Entity, FailureInput, Input,
    NoSubscriptionFailureInput, Output, Request, SuccessInput, SuccessResponse,
};

// Re-export error types
pub use crate::error::{CleanError, FailureCategory, FailureResponse};

// Re-export configuration
pub use config::{Config, DEFAULT_DEBOUNCE};

// Re-export use case types
pub use use_case::{UseCase, UseCaseBuilder, WeakUseCase};

// Re-export debouncer
pub use debounce::Debouncer;

// Re-export gateway types
pub use gateway::{
    attach_gateway, transport_fn, FnTransport, Gateway, GatewayConnection, Transport,
};

// Re-export watcher types
pub use watcher::{
    attach_watcher, stream_transport_fn, FnStreamTransport, StreamTransport, WatcherConnection,
    WatcherGateway,
};

// Re-export external interface types
pub use external::{
    ExternalInterface, ExternalInterfaceBuilder, FnHandler, InterfaceTransport, RequestHandler,
};

// Re-export response channel
pub use response::{response_channel, ResponseSender, ResponseStream};

// Re-export dependency container
pub use providers::Providers;

// Re-export commonly used external types
pub use async_trait::async_trait;
