//! External interfaces: where IO happens.
//!
//! An `ExternalInterface` owns a table of request handlers keyed by request
//! type. Gateways reach it through [`InterfaceTransport`], which implements
//! both [`Transport`] (first response) and [`StreamTransport`] (every
//! response).
//!
//! # Error Boundary
//!
//! Handlers return `anyhow::Result<()>`. Errors and panics never leave the
//! interface as such: they are converted by the error handler into a
//! [`FailureResponse`] and delivered on the response stream like any other
//! answer.
//!
//! ```text
//! Gateway ──► InterfaceTransport ──► dispatch ──► spawned handler task
//!                                                      │
//!   ResponseStream ◄── Ok(response) / Err(FailureResponse) ◄─┘
//! ```
//!
//! Every dispatched handler is tracked by a subscription id. `cancel_all`
//! aborts whatever is still running, which is how watchers are stopped.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::core::{Request, SuccessResponse};
use crate::error::{CleanError, FailureCategory, FailureResponse};
use crate::gateway::Transport;
use crate::response::{response_channel, ResponseSender, ResponseStream};
use crate::watcher::StreamTransport;

/// Serves one request type.
///
/// Call `responses.send` once for a single-shot answer or repeatedly to
/// stream. Returning `Err` sends the converted failure after anything
/// already emitted.
#[async_trait]
pub trait RequestHandler<R: Request, S: SuccessResponse>: Send + Sync + 'static {
    /// Handle `request`, emitting answers on `responses`.
    async fn handle(&self, request: R, responses: ResponseSender<S>) -> anyhow::Result<()>;
}

/// Closure-backed [`RequestHandler`].
pub struct FnHandler<F, R, S> {
    f: F,
    _phantom: PhantomData<fn(R) -> S>,
}

#[async_trait]
impl<R, S, F, Fut> RequestHandler<R, S> for FnHandler<F, R, S>
where
    R: Request,
    S: SuccessResponse,
    F: Fn(R, ResponseSender<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, request: R, responses: ResponseSender<S>) -> anyhow::Result<()> {
        (self.f)(request, responses).await
    }
}

type ErrorHandlerFn = Arc<dyn Fn(&anyhow::Error) -> FailureResponse + Send + Sync>;
type HandlerFn<R, S> = Arc<dyn RequestHandler<R, S>>;

/// A type-erased handler keyed by request type.
struct HandlerEntry {
    handler: Box<dyn Any + Send + Sync>,
    response_type: &'static str,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for an [`ExternalInterface`].
pub struct ExternalInterfaceBuilder {
    handlers: HashMap<TypeId, HandlerEntry>,
    error_handler: ErrorHandlerFn,
    config: Config,
}

impl Default for ExternalInterfaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExternalInterfaceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalInterfaceBuilder")
            .field("handler_count", &self.handlers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExternalInterfaceBuilder {
    /// Start with no handlers and the default error handler.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            error_handler: Arc::new(FailureResponse::from_error),
            config: Config::default(),
        }
    }

    /// Register the handler serving requests of type `R`.
    ///
    /// Returns `CleanError::HandlerAlreadyRegistered` if `R` already has one.
    pub fn on<R, S, H>(mut self, handler: H) -> Result<Self, CleanError>
    where
        R: Request,
        S: SuccessResponse,
        H: RequestHandler<R, S>,
    {
        let type_id = TypeId::of::<R>();
        if self.handlers.contains_key(&type_id) {
            return Err(CleanError::HandlerAlreadyRegistered {
                request_type: type_name::<R>(),
            });
        }
        let handler: HandlerFn<R, S> = Arc::new(handler);
        self.handlers.insert(
            type_id,
            HandlerEntry {
                handler: Box::new(handler),
                response_type: type_name::<S>(),
            },
        );
        Ok(self)
    }

    /// Register an async closure as the handler for `R`.
    pub fn on_fn<R, S, F, Fut>(self, f: F) -> Result<Self, CleanError>
    where
        R: Request,
        S: SuccessResponse,
        F: Fn(R, ResponseSender<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on::<R, S, _>(FnHandler {
            f,
            _phantom: PhantomData,
        })
    }

    /// Replace the conversion from handler errors to failures.
    ///
    /// The default is [`FailureResponse::from_error`].
    pub fn with_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&anyhow::Error) -> FailureResponse + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(f);
        self
    }

    /// Use `config` instead of the defaults.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the interface.
    pub fn build(self) -> Arc<ExternalInterface> {
        Arc::new(ExternalInterface {
            handlers: self.handlers,
            error_handler: self.error_handler,
            active: Arc::new(DashMap::new()),
            config: self.config,
            disposed: AtomicBool::new(false),
        })
    }
}

// =============================================================================
// ExternalInterface
// =============================================================================

/// Request dispatcher holding no domain state.
pub struct ExternalInterface {
    handlers: HashMap<TypeId, HandlerEntry>,
    error_handler: ErrorHandlerFn,
    active: Arc<DashMap<Uuid, AbortHandle>>,
    config: Config,
    disposed: AtomicBool,
}

impl ExternalInterface {
    /// Create a new interface builder.
    pub fn builder() -> ExternalInterfaceBuilder {
        ExternalInterfaceBuilder::new()
    }

    /// Check if a handler is registered for `R`.
    pub fn has_handler<R: Request>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<R>())
    }

    /// Number of handler tasks still running.
    pub fn active_handlers(&self) -> usize {
        self.active.len()
    }

    /// The configuration this interface was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch `request` to its handler with no time limit.
    ///
    /// # Errors
    ///
    /// `NoHandlerRegistered` if nothing serves `R`, `ResponseTypeMismatch`
    /// if its handler produces something other than `S`.
    pub fn dispatch<R, S>(&self, request: R) -> Result<ResponseStream<S>, CleanError>
    where
        R: Request,
        S: SuccessResponse,
    {
        self.spawn_handler(request, None)
    }

    /// Dispatch `request` as a long-lived stream.
    ///
    /// The handler is cancelled after `Config::watcher_timeout`, if set.
    pub fn dispatch_stream<R, S>(&self, request: R) -> Result<ResponseStream<S>, CleanError>
    where
        R: Request,
        S: SuccessResponse,
    {
        self.spawn_handler(request, self.config.watcher_timeout)
    }

    /// A transport for `R` backed by this interface.
    ///
    /// Performs the handler lookup up front, so a gateway is never wired to
    /// a request type nobody serves.
    pub fn transport<R, S>(self: &Arc<Self>) -> Result<InterfaceTransport<R, S>, CleanError>
    where
        R: Request,
        S: SuccessResponse,
    {
        self.handler::<R, S>()?;
        Ok(InterfaceTransport {
            interface: self.clone(),
            _phantom: PhantomData,
        })
    }

    /// Abort every running handler. Their response streams end.
    pub fn cancel_all(&self) {
        let ids: Vec<Uuid> = self.active.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.active.remove(&id) {
                debug!(subscription_id = %id, "cancelling handler");
                handle.abort();
            }
        }
    }

    /// Cancel running handlers and refuse new work.
    ///
    /// Later dispatches yield a single cancelled failure.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_all();
        info!("external interface disposed");
    }

    /// Returns true once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn handler<R, S>(&self) -> Result<HandlerFn<R, S>, CleanError>
    where
        R: Request,
        S: SuccessResponse,
    {
        let entry = self
            .handlers
            .get(&TypeId::of::<R>())
            .ok_or(CleanError::NoHandlerRegistered {
                request_type: type_name::<R>(),
            })?;

        entry
            .handler
            .downcast_ref::<HandlerFn<R, S>>()
            .cloned()
            .ok_or(CleanError::ResponseTypeMismatch {
                request_type: type_name::<R>(),
                registered: entry.response_type,
                requested: type_name::<S>(),
            })
    }

    fn spawn_handler<R, S>(
        &self,
        request: R,
        timeout: Option<Duration>,
    ) -> Result<ResponseStream<S>, CleanError>
    where
        R: Request,
        S: SuccessResponse,
    {
        let handler = self.handler::<R, S>()?;

        if self.is_disposed() {
            debug!(
                request_type = type_name::<R>(),
                "interface disposed, refusing request"
            );
            return Ok(ResponseStream::once(Err(FailureResponse::cancelled())));
        }

        let (sender, stream) = response_channel::<S>();
        let id = Uuid::new_v4();
        let error_handler = self.error_handler.clone();
        let active = self.active.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        debug!(
            subscription_id = %id,
            request_type = type_name::<R>(),
            "dispatching request to handler"
        );

        let task = tokio::spawn(async move {
            // Wait until the abort handle is tracked so the cleanup below
            // cannot run before the insert.
            if registered_rx.await.is_err() {
                return;
            }

            let failures = sender.clone();
            let run = AssertUnwindSafe(handler.handle(request, sender)).catch_unwind();

            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(subscription_id = %id, "handler timed out, closing stream");
                        active.remove(&id);
                        return;
                    }
                },
                None => run.await,
            };

            // Convert panic to error
            let result = match outcome {
                Ok(result) => result,
                Err(panic_info) => {
                    let panic_msg = extract_panic_message(&panic_info);
                    error!(
                        subscription_id = %id,
                        request_type = type_name::<R>(),
                        panic = %panic_msg,
                        "handler panicked"
                    );
                    Err(anyhow::anyhow!("handler panicked: {}", panic_msg))
                }
            };

            if let Err(e) = result {
                error!(
                    subscription_id = %id,
                    request_type = type_name::<R>(),
                    error = ?e,
                    "handler failed"
                );
                failures.fail(error_handler(&e));
            }

            active.remove(&id);
        });

        self.active.insert(id, task.abort_handle());
        let _ = registered_tx.send(());

        Ok(stream)
    }
}

impl Drop for ExternalInterface {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for ExternalInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalInterface")
            .field("handler_count", &self.handlers.len())
            .field("active_handlers", &self.active.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Transport for request type `R` served by an [`ExternalInterface`].
pub struct InterfaceTransport<R, S> {
    interface: Arc<ExternalInterface>,
    _phantom: PhantomData<fn(R) -> S>,
}

impl<R, S> Clone for InterfaceTransport<R, S> {
    fn clone(&self) -> Self {
        Self {
            interface: self.interface.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<R, S> std::fmt::Debug for InterfaceTransport<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceTransport")
            .field("request_type", &type_name::<R>())
            .field("response_type", &type_name::<S>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R: Request, S: SuccessResponse> Transport<R, S> for InterfaceTransport<R, S> {
    async fn send(&self, request: R) -> Result<S, FailureResponse> {
        let mut stream = self
            .interface
            .dispatch::<R, S>(request)
            .map_err(|e| FailureResponse::new(FailureCategory::Transport, e.to_string()))?;

        match stream.next().await {
            Some(answer) => answer,
            None => Err(FailureResponse::new(
                FailureCategory::Transport,
                "handler finished without a response",
            )),
        }
    }
}

impl<R: Request, S: SuccessResponse> StreamTransport<R, S> for InterfaceTransport<R, S> {
    fn open(&self, request: R) -> ResponseStream<S> {
        match self.interface.dispatch_stream::<R, S>(request) {
            Ok(stream) => stream,
            Err(e) => ResponseStream::once(Err(FailureResponse::new(
                FailureCategory::Transport,
                e.to_string(),
            ))),
        }
    }
}
