//! Streaming gateways.
//!
//! A watcher gateway opens a response stream instead of awaiting a single
//! answer. The first response resolves the originating `request`; every
//! later response becomes an input applied through `UseCase::set_input`,
//! so the use case needs input filters for the gateway's input type and
//! for `FailureInput`. Both are checked when the watcher is attached.
//!
//! The stream lives until its producer stops or is cancelled by the
//! external interface. Emissions that arrive after the use case has been
//! disposed or dropped are discarded.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tracing::{debug, warn};

use crate::core::{Entity, FailureInput, Output, Request, SuccessInput, SuccessResponse};
use crate::error::{CleanError, FailureCategory, FailureResponse};
use crate::response::ResponseStream;
use crate::use_case::{Resolution, SubscriptionFn, UseCase, WeakUseCase};

/// Opens a stream of responses for one request.
pub trait StreamTransport<R: Request, S: SuccessResponse>: Send + Sync + 'static {
    /// Start serving `request`.
    fn open(&self, request: R) -> ResponseStream<S>;
}

/// Closure-backed [`StreamTransport`].
pub struct FnStreamTransport<F, R, S> {
    f: F,
    _phantom: PhantomData<fn(R) -> S>,
}

/// Build a stream transport from a closure.
pub fn stream_transport_fn<R, S, F>(f: F) -> FnStreamTransport<F, R, S>
where
    R: Request,
    S: SuccessResponse,
    F: Fn(R) -> ResponseStream<S> + Send + Sync + 'static,
{
    FnStreamTransport {
        f,
        _phantom: PhantomData,
    }
}

impl<R, S, F> StreamTransport<R, S> for FnStreamTransport<F, R, S>
where
    R: Request,
    S: SuccessResponse,
    F: Fn(R) -> ResponseStream<S> + Send + Sync + 'static,
{
    fn open(&self, request: R) -> ResponseStream<S> {
        (self.f)(request)
    }
}

/// Streaming translator between domain and transport messages.
pub trait WatcherGateway: Send + Sync + 'static {
    /// The output this gateway serves.
    type Output: Output;
    /// The request it builds.
    type Request: Request;
    /// The response type carried by the stream.
    type Response: SuccessResponse;
    /// The success input every response becomes.
    type Input: SuccessInput;

    /// Translate an output into a request. Must be pure.
    fn build_request(&self, output: &Self::Output) -> Self::Request;

    /// Translate one streamed response into an input.
    fn on_success(&self, response: Self::Response) -> Self::Input;

    /// Translate a failure to establish (or keep) the stream.
    fn on_failure(&self, failure: FailureResponse) -> FailureInput {
        debug!(gateway = type_name::<Self>(), %failure, "watcher failure");
        FailureInput::new("watcher gateway failure")
    }
}

/// A watcher gateway bound to the stream transport that serves it.
pub struct WatcherConnection<G, T> {
    gateway: Arc<G>,
    transport: Arc<T>,
}

impl<G, T> WatcherConnection<G, T>
where
    G: WatcherGateway,
    T: StreamTransport<G::Request, G::Response>,
{
    /// Bind `gateway` to `transport`.
    pub fn new(gateway: G, transport: T) -> Self {
        Self {
            gateway: Arc::new(gateway),
            transport: Arc::new(transport),
        }
    }

    /// Register this connection as the use case's subscriber for
    /// `G::Output`.
    ///
    /// Later emissions go through `set_input`, so the use case must have
    /// input filters for `G::Input` and [`FailureInput`]. A missing one is
    /// reported here as `CleanError::MissingInputFilter`.
    pub fn attach<E: Entity>(self, use_case: &UseCase<E>) -> Result<(), CleanError> {
        use_case.require_input_filter::<G::Input>()?;
        use_case.require_input_filter::<FailureInput>()?;

        let gateway = self.gateway;
        let transport = self.transport;
        let weak = use_case.downgrade();

        let callback: SubscriptionFn<G::Output, G::Input> = Arc::new(move |output| {
            let gateway = gateway.clone();
            let request = gateway.build_request(&output);
            debug!(
                gateway = type_name::<G>(),
                request = ?request,
                "opening watcher stream"
            );
            let mut stream = transport.open(request);
            let weak = weak.clone();

            async move {
                match stream.next().await {
                    None => Resolution::done(Err(gateway.on_failure(FailureResponse::new(
                        FailureCategory::Transport,
                        "stream closed before first response",
                    )))),
                    Some(Err(failure)) => Resolution::done(Err(gateway.on_failure(failure))),
                    Some(Ok(response)) => Resolution {
                        result: Ok(gateway.on_success(response)),
                        continuation: Some(forward_emissions(gateway, stream, weak).boxed()),
                    },
                }
            }
            .boxed()
        });

        use_case.install_subscription(callback)
    }
}

/// Attach the watcher `gateway`, served by `transport`, to `use_case`.
pub fn attach_watcher<E, G, T>(
    use_case: &UseCase<E>,
    gateway: G,
    transport: T,
) -> Result<(), CleanError>
where
    E: Entity,
    G: WatcherGateway,
    T: StreamTransport<G::Request, G::Response>,
{
    WatcherConnection::new(gateway, transport).attach(use_case)
}

/// Feed every later emission into the use case until the stream ends or
/// the use case goes away.
async fn forward_emissions<E, G>(
    gateway: Arc<G>,
    mut stream: ResponseStream<G::Response>,
    weak: WeakUseCase<E>,
) where
    E: Entity,
    G: WatcherGateway,
{
    while let Some(item) = stream.next().await {
        let Some(use_case) = weak.upgrade() else {
            debug!(gateway = type_name::<G>(), "use case dropped, closing watcher");
            return;
        };

        let applied = match item {
            Ok(response) => use_case.set_input(gateway.on_success(response)),
            Err(failure) => use_case.set_input(gateway.on_failure(failure)),
        };

        if let Err(error) = applied {
            warn!(
                gateway = type_name::<G>(),
                error = %error,
                "dropping watcher emission"
            );
            if matches!(error, CleanError::UseCaseDisposed { .. }) {
                return;
            }
        }
    }
    debug!(gateway = type_name::<G>(), "watcher stream ended");
}
