//! Gateways translate between domain messages and transport messages.
//!
//! A gateway is the adapter layer:
//! 1. `build_request` turns an [`Output`] into a [`Request`]
//! 2. A [`Transport`] carries the request and returns a response or failure
//! 3. `on_success` / `on_failure` turn the answer back into an input
//!
//! Attaching a gateway registers it as the use case's subscriber for its
//! output type, so `UseCase::request` reaches it without knowing it exists.
//!
//! # Example
//!
//! ```ignore
//! struct ProfileGateway;
//!
//! impl Gateway for ProfileGateway {
//!     type Output = FetchProfileOutput;
//!     type Request = ProfileRequest;
//!     type Response = ProfileResponse;
//!     type Input = ProfileInput;
//!
//!     fn build_request(&self, output: &FetchProfileOutput) -> ProfileRequest {
//!         ProfileRequest { id: output.id.clone() }
//!     }
//!
//!     fn on_success(&self, response: ProfileResponse) -> ProfileInput {
//!         ProfileInput { name: response.name }
//!     }
//!
//!     fn on_failure(&self, failure: FailureResponse) -> FailureInput {
//!         FailureInput::new(failure.message)
//!     }
//! }
//!
//! let transport = interface.transport::<ProfileRequest, ProfileResponse>()?;
//! attach_gateway(&use_case, ProfileGateway, transport)?;
//! ```

use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::debug;

use crate::core::{Entity, FailureInput, Output, Request, SuccessInput, SuccessResponse};
use crate::error::{CleanError, FailureResponse};
use crate::use_case::{Resolution, SubscriptionFn, UseCase};

/// Carries a request to wherever it is served and returns one answer.
///
/// In production this is an external interface; in tests any closure can
/// stand in through [`transport_fn`].
#[async_trait]
pub trait Transport<R: Request, S: SuccessResponse>: Send + Sync + 'static {
    /// Perform the request.
    async fn send(&self, request: R) -> Result<S, FailureResponse>;
}

/// Closure-backed [`Transport`].
pub struct FnTransport<F, R, S> {
    f: F,
    _phantom: PhantomData<fn(R) -> S>,
}

/// Build a transport from an async closure.
///
/// ```ignore
/// let transport = transport_fn(|request: ProfileRequest| async move {
///     Ok(ProfileResponse { name: format!("user {}", request.id) })
/// });
/// ```
pub fn transport_fn<R, S, F, Fut>(f: F) -> FnTransport<F, R, S>
where
    R: Request,
    S: SuccessResponse,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, FailureResponse>> + Send + 'static,
{
    FnTransport {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<R, S, F, Fut> Transport<R, S> for FnTransport<F, R, S>
where
    R: Request,
    S: SuccessResponse,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, FailureResponse>> + Send + 'static,
{
    async fn send(&self, request: R) -> Result<S, FailureResponse> {
        (self.f)(request).await
    }
}

/// Single-shot translator between domain and transport messages.
///
/// `on_failure` has no default: every gateway decides how its transport
/// failures read in the domain.
pub trait Gateway: Send + Sync + 'static {
    /// The output this gateway serves.
    type Output: Output;
    /// The request it builds.
    type Request: Request;
    /// The successful response it expects.
    type Response: SuccessResponse;
    /// The success input it produces.
    type Input: SuccessInput;

    /// Translate an output into a request. Must be pure.
    fn build_request(&self, output: &Self::Output) -> Self::Request;

    /// Translate a successful response into an input.
    fn on_success(&self, response: Self::Response) -> Self::Input;

    /// Translate a failure into a failure input.
    fn on_failure(&self, failure: FailureResponse) -> FailureInput;
}

/// A gateway bound to the transport that serves it.
pub struct GatewayConnection<G, T> {
    gateway: Arc<G>,
    transport: Arc<T>,
}

impl<G, T> GatewayConnection<G, T>
where
    G: Gateway,
    T: Transport<G::Request, G::Response>,
{
    /// Bind `gateway` to `transport`.
    pub fn new(gateway: G, transport: T) -> Self {
        Self {
            gateway: Arc::new(gateway),
            transport: Arc::new(transport),
        }
    }

    /// Run one output through the gateway and its transport.
    pub async fn process(&self, output: G::Output) -> Result<G::Input, FailureInput> {
        process(&*self.gateway, &*self.transport, output).await
    }

    /// Register this connection as the use case's subscriber for
    /// `G::Output`.
    pub fn attach<E: Entity>(self, use_case: &UseCase<E>) -> Result<(), CleanError> {
        let gateway = self.gateway;
        let transport = self.transport;
        let callback: SubscriptionFn<G::Output, G::Input> = Arc::new(move |output| {
            let gateway = gateway.clone();
            let transport = transport.clone();
            async move { Resolution::done(process(&*gateway, &*transport, output).await) }
                .boxed()
        });
        use_case.install_subscription(callback)
    }
}

/// Attach `gateway`, served by `transport`, to `use_case`.
pub fn attach_gateway<E, G, T>(
    use_case: &UseCase<E>,
    gateway: G,
    transport: T,
) -> Result<(), CleanError>
where
    E: Entity,
    G: Gateway,
    T: Transport<G::Request, G::Response>,
{
    GatewayConnection::new(gateway, transport).attach(use_case)
}

async fn process<G, T>(
    gateway: &G,
    transport: &T,
    output: G::Output,
) -> Result<G::Input, FailureInput>
where
    G: Gateway,
    T: Transport<G::Request, G::Response>,
{
    let request = gateway.build_request(&output);
    debug!(
        gateway = type_name::<G>(),
        request = ?request,
        "dispatching request"
    );

    match transport.send(request).await {
        Ok(response) => Ok(gateway.on_success(response)),
        Err(failure) => {
            debug!(gateway = type_name::<G>(), %failure, "transport failed");
            Err(gateway.on_failure(failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Input;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Default)]
    struct ProfileEntity {
        name: String,
        error: Option<String>,
    }
    impl Entity for ProfileEntity {}

    #[derive(Debug, Clone, PartialEq)]
    struct FetchProfileOutput {
        id: String,
    }
    impl Output for FetchProfileOutput {}

    #[derive(Debug, Clone, PartialEq)]
    struct ProfileRequest {
        path: String,
    }
    impl Request for ProfileRequest {}

    #[derive(Debug, Clone, PartialEq)]
    struct ProfileResponse {
        name: String,
    }
    impl SuccessResponse for ProfileResponse {}

    #[derive(Debug, Clone, PartialEq)]
    struct ProfileInput {
        name: String,
    }
    impl Input for ProfileInput {}
    impl SuccessInput for ProfileInput {}

    struct ProfileGateway;

    impl Gateway for ProfileGateway {
        type Output = FetchProfileOutput;
        type Request = ProfileRequest;
        type Response = ProfileResponse;
        type Input = ProfileInput;

        fn build_request(&self, output: &FetchProfileOutput) -> ProfileRequest {
            ProfileRequest {
                path: format!("/profiles/{}", output.id),
            }
        }

        fn on_success(&self, response: ProfileResponse) -> ProfileInput {
            ProfileInput {
                name: response.name,
            }
        }

        fn on_failure(&self, failure: FailureResponse) -> FailureInput {
            FailureInput::new(format!("profile unavailable: {}", failure.category))
        }
    }

    fn on_success(e: &ProfileEntity, i: ProfileInput) -> ProfileEntity {
        ProfileEntity {
            name: i.name,
            ..e.clone()
        }
    }

    fn on_failure(e: &ProfileEntity, f: FailureInput) -> ProfileEntity {
        ProfileEntity {
            error: Some(f.message()),
            ..e.clone()
        }
    }

    #[test]
    fn test_build_request_is_pure() {
        let gateway = ProfileGateway;
        let output = FetchProfileOutput { id: "42".into() };
        assert_eq!(
            gateway.build_request(&output),
            gateway.build_request(&output.clone())
        );
    }

    #[tokio::test]
    async fn test_process_success() {
        let connection = GatewayConnection::new(
            ProfileGateway,
            transport_fn(|request: ProfileRequest| async move {
                Ok(ProfileResponse {
                    name: format!("user at {}", request.path),
                })
            }),
        );

        let input = connection
            .process(FetchProfileOutput { id: "7".into() })
            .await
            .unwrap();
        assert_eq!(input.name, "user at /profiles/7");
    }

    #[tokio::test]
    async fn test_process_failure_goes_through_on_failure() {
        let connection = GatewayConnection::new(
            ProfileGateway,
            transport_fn(|_: ProfileRequest| async {
                Err::<ProfileResponse, _>(FailureResponse::not_found("profile"))
            }),
        );

        let failure = connection
            .process(FetchProfileOutput { id: "7".into() })
            .await
            .unwrap_err();
        assert_eq!(failure.message(), "profile unavailable: not_found");
    }

    #[tokio::test]
    async fn test_attached_gateway_serves_requests() {
        let use_case = UseCase::new(ProfileEntity::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        attach_gateway(
            &use_case,
            ProfileGateway,
            transport_fn(move |_: ProfileRequest| {
                counted.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok(ProfileResponse {
                        name: "Ada".into(),
                    })
                }
            }),
        )
        .unwrap();

        use_case
            .request(
                FetchProfileOutput { id: "1".into() },
                on_success,
                on_failure,
            )
            .await
            .unwrap();

        assert_eq!(use_case.entity().name, "Ada");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attaching_twice_fails() {
        let use_case = UseCase::new(ProfileEntity::default());
        let transport = || {
            transport_fn(|_: ProfileRequest| async {
                Ok(ProfileResponse {
                    name: "Ada".into(),
                })
            })
        };

        attach_gateway(&use_case, ProfileGateway, transport()).unwrap();
        let err = attach_gateway(&use_case, ProfileGateway, transport()).unwrap_err();
        assert!(matches!(
            err,
            CleanError::SubscriptionAlreadyRegistered { .. }
        ));
    }
}
