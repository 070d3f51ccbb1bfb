//! The use case: a state container and request/response mediator.
//!
//! A `UseCase` owns exactly one [`Entity`]. It:
//! 1. Derives [`Output`]s from the entity through output filters
//! 2. Transforms the entity from [`Input`]s through input filters
//! 3. Mediates requests: an output goes out to whoever subscribed to its
//!    type, and the resulting input (or failure) comes back as a new entity
//!
//! # Key Properties
//!
//! - **One filter per type**: registering a second filter for the same
//!   output or input type is a configuration error
//! - **One subscriber per output type**: a second `subscribe` fails
//! - **Failures are values**: a failed request is folded into the entity
//!   through `on_failure`; `request` only returns `Err` for wiring mistakes
//! - **Serialized writes**: every replacement runs under the entity lock, so
//!   concurrent requests resolve last-resolved-wins without lost updates
//!
//! # Example
//!
//! ```ignore
//! let use_case = UseCase::builder(ProfileEntity::default())
//!     .with_output_filter(|e: &ProfileEntity| ProfileUiOutput { name: e.name.clone() })?
//!     .with_input_filter(|i: ProfileInput, e: &ProfileEntity| ProfileEntity {
//!         name: i.name,
//!         ..e.clone()
//!     })?
//!     .build();
//!
//! use_case
//!     .request(
//!         FetchProfileOutput { id: "123".into() },
//!         |e, i: ProfileInput| ProfileEntity { name: i.name, ..e.clone() },
//!         |e, failure| ProfileEntity { error: Some(failure.message()), ..e.clone() },
//!     )
//!     .await?;
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{Entity, FailureInput, Input, Output, SuccessInput};
use crate::debounce::Debouncer;
use crate::error::CleanError;

type OutputFilterFn<E, O> = Arc<dyn Fn(&E) -> O + Send + Sync>;
type InputFilterFn<E, I> = Arc<dyn Fn(I, &E) -> E + Send + Sync>;

/// What a subscriber hands back to `request`.
///
/// The optional continuation is spawned only after the result has been
/// applied to the entity. Streaming gateways use it to keep feeding inputs
/// without racing the first transition.
pub(crate) struct Resolution<S> {
    pub(crate) result: Result<S, FailureInput>,
    pub(crate) continuation: Option<BoxFuture<'static, ()>>,
}

impl<S> Resolution<S> {
    pub(crate) fn done(result: Result<S, FailureInput>) -> Self {
        Self {
            result,
            continuation: None,
        }
    }
}

pub(crate) type SubscriptionFn<O, S> =
    Arc<dyn Fn(O) -> BoxFuture<'static, Resolution<S>> + Send + Sync>;

/// A type-erased subscription keyed by output type.
struct Subscription {
    callback: Box<dyn Any + Send + Sync>,
    success_type: &'static str,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for a [`UseCase`] and its filter tables.
///
/// Filters are pure functions. They run while the entity lock is held and
/// must not call back into the use case.
pub struct UseCaseBuilder<E: Entity> {
    entity: E,
    output_filters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    input_filters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    config: Config,
}

impl<E: Entity> UseCaseBuilder<E> {
    /// Start building a use case around its initial entity.
    pub fn new(entity: E) -> Self {
        Self {
            entity,
            output_filters: HashMap::new(),
            input_filters: HashMap::new(),
            config: Config::default(),
        }
    }

    /// Use `config` instead of the defaults.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register the filter deriving `O` from the entity.
    ///
    /// Returns `CleanError::FilterAlreadyRegistered` if `O` already has one.
    pub fn with_output_filter<O, F>(mut self, filter: F) -> Result<Self, CleanError>
    where
        O: Output,
        F: Fn(&E) -> O + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<O>();
        if self.output_filters.contains_key(&type_id) {
            return Err(CleanError::FilterAlreadyRegistered {
                type_name: type_name::<O>(),
            });
        }
        let filter: OutputFilterFn<E, O> = Arc::new(filter);
        self.output_filters.insert(type_id, Box::new(filter));
        Ok(self)
    }

    /// Register the filter applying `I` to the entity.
    ///
    /// Returns `CleanError::FilterAlreadyRegistered` if `I` already has one.
    pub fn with_input_filter<I, F>(mut self, filter: F) -> Result<Self, CleanError>
    where
        I: Input,
        F: Fn(I, &E) -> E + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<I>();
        if self.input_filters.contains_key(&type_id) {
            return Err(CleanError::FilterAlreadyRegistered {
                type_name: type_name::<I>(),
            });
        }
        let filter: InputFilterFn<E, I> = Arc::new(filter);
        self.input_filters.insert(type_id, Box::new(filter));
        Ok(self)
    }

    /// Build the use case.
    pub fn build(self) -> UseCase<E> {
        let (state, _) = watch::channel(self.entity);
        UseCase {
            inner: Arc::new(UseCaseInner {
                state,
                output_filters: self.output_filters,
                input_filters: self.input_filters,
                subscriptions: DashMap::new(),
                debouncer: Debouncer::new(),
                config: self.config,
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

// =============================================================================
// UseCase
// =============================================================================

struct UseCaseInner<E: Entity> {
    state: watch::Sender<E>,
    output_filters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    input_filters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    subscriptions: DashMap<TypeId, Subscription>,
    debouncer: Debouncer,
    config: Config,
    disposed: AtomicBool,
}

/// State container and request/response mediator for one entity.
///
/// `UseCase` is a cheap handle; clones share the same entity, filters and
/// subscriptions.
pub struct UseCase<E: Entity> {
    inner: Arc<UseCaseInner<E>>,
}

/// Non-owning handle to a [`UseCase`].
///
/// Long-lived tasks hold this so they stop once the use case is gone.
pub struct WeakUseCase<E: Entity> {
    inner: Weak<UseCaseInner<E>>,
}

impl<E: Entity> WeakUseCase<E> {
    /// Upgrade to a strong handle if the use case is still alive.
    pub fn upgrade(&self) -> Option<UseCase<E>> {
        self.inner.upgrade().map(|inner| UseCase { inner })
    }
}

impl<E: Entity> Clone for WeakUseCase<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Entity> UseCase<E> {
    /// Create a new use case builder.
    pub fn builder(entity: E) -> UseCaseBuilder<E> {
        UseCaseBuilder::new(entity)
    }

    /// Create a use case with no filters.
    pub fn new(entity: E) -> Self {
        UseCaseBuilder::new(entity).build()
    }

    /// Get a non-owning handle.
    pub fn downgrade(&self) -> WeakUseCase<E> {
        WeakUseCase {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Snapshot of the current entity.
    pub fn entity(&self) -> E {
        self.inner.state.borrow().clone()
    }

    /// Observe entity replacements.
    ///
    /// Only replacements with a different entity notify receivers.
    pub fn watch_entity(&self) -> watch::Receiver<E> {
        self.inner.state.subscribe()
    }

    /// The configuration this use case was built with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Replace the entity with `f(current)`.
    pub fn update<F>(&self, f: F) -> Result<(), CleanError>
    where
        F: FnOnce(&E) -> E,
    {
        self.ensure_active()?;
        self.replace(f);
        Ok(())
    }

    /// Derive `O` from the current entity.
    pub fn get_output<O: Output>(&self) -> Result<O, CleanError> {
        let filter = self.output_filter::<O>()?;
        let entity = self.entity();
        Ok(filter(&entity))
    }

    /// Stream of distinct `O`s, starting with the current one.
    ///
    /// A new value is yielded whenever the entity changes in a way that
    /// changes the derived output. The stream ends when the use case is
    /// dropped.
    pub fn watch_output<O: Output>(
        &self,
    ) -> Result<impl Stream<Item = O> + Send + 'static, CleanError> {
        let filter = self.output_filter::<O>()?;
        let receiver = self.inner.state.subscribe();

        Ok(stream::unfold(
            (receiver, filter, None::<O>),
            |(mut receiver, filter, mut last)| async move {
                loop {
                    if last.is_some() && receiver.changed().await.is_err() {
                        return None;
                    }
                    let entity = receiver.borrow_and_update().clone();
                    let output = filter(&entity);
                    if last.as_ref() != Some(&output) {
                        last = Some(output.clone());
                        return Some((output, (receiver, filter, last)));
                    }
                }
            },
        ))
    }

    /// Apply `input` to the entity through its input filter.
    pub fn set_input<I: Input>(&self, input: I) -> Result<(), CleanError> {
        self.ensure_active()?;
        let filter = self
            .inner
            .input_filters
            .get(&TypeId::of::<I>())
            .and_then(|filter| filter.downcast_ref::<InputFilterFn<E, I>>())
            .cloned()
            .ok_or(CleanError::MissingInputFilter {
                input_type: type_name::<I>(),
            })?;

        self.replace(|entity| filter(input, entity));
        Ok(())
    }

    /// Fail with `CleanError::MissingInputFilter` unless `I` has a filter.
    pub(crate) fn require_input_filter<I: Input>(&self) -> Result<(), CleanError> {
        if self.inner.input_filters.contains_key(&TypeId::of::<I>()) {
            Ok(())
        } else {
            Err(CleanError::MissingInputFilter {
                input_type: type_name::<I>(),
            })
        }
    }

    /// Register the handler for requests carrying an `O`.
    ///
    /// Returns `CleanError::SubscriptionAlreadyRegistered` if `O` already has
    /// a subscriber.
    pub fn subscribe<O, S, F, Fut>(&self, callback: F) -> Result<(), CleanError>
    where
        O: Output,
        S: SuccessInput,
        F: Fn(O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, FailureInput>> + Send + 'static,
    {
        let callback: SubscriptionFn<O, S> =
            Arc::new(move |output| callback(output).map(Resolution::done).boxed());
        self.install_subscription(callback)
    }

    pub(crate) fn install_subscription<O, S>(
        &self,
        callback: SubscriptionFn<O, S>,
    ) -> Result<(), CleanError>
    where
        O: Output,
        S: SuccessInput,
    {
        match self.inner.subscriptions.entry(TypeId::of::<O>()) {
            Entry::Occupied(_) => Err(CleanError::SubscriptionAlreadyRegistered {
                output_type: type_name::<O>(),
            }),
            Entry::Vacant(slot) => {
                debug!(
                    output_type = type_name::<O>(),
                    success_type = type_name::<S>(),
                    "subscription registered"
                );
                slot.insert(Subscription {
                    callback: Box::new(callback),
                    success_type: type_name::<S>(),
                });
                Ok(())
            }
        }
    }

    /// Remove the subscription for `O`. Returns true if one existed.
    pub fn unsubscribe<O: Output>(&self) -> bool {
        self.inner
            .subscriptions
            .remove(&TypeId::of::<O>())
            .is_some()
    }

    /// Check if a subscription is registered for `O`.
    pub fn has_subscription<O: Output>(&self) -> bool {
        self.inner.subscriptions.contains_key(&TypeId::of::<O>())
    }

    /// Send `output` to its subscriber and fold the answer into the entity.
    ///
    /// - Success: the entity becomes `on_success(entity, input)`
    /// - Failure: the entity becomes `on_failure(entity, failure)`
    /// - No subscriber: `on_failure` receives a
    ///   [`FailureInput::NoSubscription`] naming `O`
    ///
    /// # Errors
    ///
    /// Only wiring mistakes are returned: a subscriber producing a different
    /// success input than `S`, or a disposed use case.
    pub async fn request<O, S, OnSuccess, OnFailure>(
        &self,
        output: O,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) -> Result<(), CleanError>
    where
        O: Output,
        S: SuccessInput,
        OnSuccess: FnOnce(&E, S) -> E + Send,
        OnFailure: FnOnce(&E, FailureInput) -> E + Send,
    {
        self.ensure_active()?;

        let resolution = match self.subscription::<O, S>()? {
            Some(callback) => callback(output).await,
            None => {
                debug!(
                    output_type = type_name::<O>(),
                    "no subscription for output, failing request"
                );
                Resolution::done(Err(FailureInput::no_subscription::<O>()))
            }
        };

        self.ensure_active()?;

        match resolution.result {
            Ok(input) => self.replace(|entity| on_success(entity, input)),
            Err(failure) => {
                debug!(
                    output_type = type_name::<O>(),
                    failure = %failure,
                    "request failed"
                );
                self.replace(|entity| on_failure(entity, failure))
            }
        };

        if let Some(continuation) = resolution.continuation {
            tokio::spawn(continuation);
        }

        Ok(())
    }

    /// Collapse repeated `action`s sharing `tag` within `duration`.
    ///
    /// With `immediate`, the first call runs at once and calls arriving
    /// inside the window are dropped. Without it, the action runs once,
    /// `duration` after the last call. Calls on a disposed use case are
    /// ignored.
    pub fn debounce<F>(&self, action: F, tag: &str, duration: Duration, immediate: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_disposed() {
            warn!(tag, "debounce called on a disposed use case");
            return;
        }
        self.inner.debouncer.debounce(action, tag, duration, immediate);
    }

    /// `debounce` with the configured window and `immediate = true`.
    pub fn debounce_default<F>(&self, action: F, tag: &str)
    where
        F: FnOnce() + Send + 'static,
    {
        let duration = self.inner.config.debounce_duration;
        self.debounce(action, tag, duration, true);
    }

    /// Tear the use case down.
    ///
    /// Cancels pending debounce timers and drops all subscriptions. Later
    /// state changes return `CleanError::UseCaseDisposed`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.debouncer.cancel_all();
        self.inner.subscriptions.clear();
        info!(entity_type = type_name::<E>(), "use case disposed");
    }

    /// Returns true once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<(), CleanError> {
        if self.is_disposed() {
            return Err(CleanError::UseCaseDisposed {
                entity_type: type_name::<E>(),
            });
        }
        Ok(())
    }

    /// Replace the entity under the write lock, notifying only on change.
    fn replace<F>(&self, f: F) -> bool
    where
        F: FnOnce(&E) -> E,
    {
        self.inner.state.send_if_modified(|current| {
            let next = f(current);
            if next == *current {
                return false;
            }
            *current = next;
            true
        })
    }

    fn output_filter<O: Output>(&self) -> Result<OutputFilterFn<E, O>, CleanError> {
        self.inner
            .output_filters
            .get(&TypeId::of::<O>())
            .and_then(|filter| filter.downcast_ref::<OutputFilterFn<E, O>>())
            .cloned()
            .ok_or(CleanError::MissingOutputFilter {
                output_type: type_name::<O>(),
            })
    }

    fn subscription<O, S>(&self) -> Result<Option<SubscriptionFn<O, S>>, CleanError>
    where
        O: Output,
        S: SuccessInput,
    {
        let Some(subscription) = self.inner.subscriptions.get(&TypeId::of::<O>()) else {
            return Ok(None);
        };
        match subscription.callback.downcast_ref::<SubscriptionFn<O, S>>() {
            Some(callback) => Ok(Some(callback.clone())),
            None => Err(CleanError::SuccessInputMismatch {
                output_type: type_name::<O>(),
                registered: subscription.success_type,
                requested: type_name::<S>(),
            }),
        }
    }
}

impl<E: Entity> Clone for UseCase<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Entity> std::fmt::Debug for UseCase<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UseCase")
            .field("entity", &*self.inner.state.borrow())
            .field("output_filters", &self.inner.output_filters.len())
            .field("input_filters", &self.inner.input_filters.len())
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct CounterEntity {
        count: i32,
        label: String,
        error: Option<String>,
    }
    impl Entity for CounterEntity {}

    #[derive(Debug, Clone, PartialEq)]
    struct CountOutput {
        count: i32,
    }
    impl Output for CountOutput {}

    #[derive(Debug, Clone, PartialEq)]
    struct LabelOutput {
        label: String,
    }
    impl Output for LabelOutput {}

    #[derive(Debug, Clone, PartialEq)]
    struct FetchOutput {
        id: String,
    }
    impl Output for FetchOutput {}

    #[derive(Debug, Clone, PartialEq)]
    struct AddInput {
        amount: i32,
    }
    impl Input for AddInput {}
    impl SuccessInput for AddInput {}

    #[derive(Debug, Clone, PartialEq)]
    struct LabelInput {
        label: String,
    }
    impl Input for LabelInput {}
    impl SuccessInput for LabelInput {}

    fn counter_use_case() -> UseCase<CounterEntity> {
        UseCase::builder(CounterEntity::default())
            .with_output_filter(|e: &CounterEntity| CountOutput { count: e.count })
            .unwrap()
            .with_output_filter(|e: &CounterEntity| LabelOutput {
                label: e.label.clone(),
            })
            .unwrap()
            .with_input_filter(|i: AddInput, e: &CounterEntity| CounterEntity {
                count: e.count + i.amount,
                ..e.clone()
            })
            .unwrap()
            .build()
    }

    fn label_on_success(e: &CounterEntity, i: LabelInput) -> CounterEntity {
        CounterEntity {
            label: i.label,
            ..e.clone()
        }
    }

    fn error_on_failure(e: &CounterEntity, f: FailureInput) -> CounterEntity {
        CounterEntity {
            error: Some(f.message()),
            ..e.clone()
        }
    }

    #[test]
    fn test_get_output_applies_filter() {
        let use_case = counter_use_case();
        assert_eq!(
            use_case.get_output::<CountOutput>().unwrap(),
            CountOutput { count: 0 }
        );
    }

    #[test]
    fn test_get_output_without_filter_fails() {
        let use_case = UseCase::new(CounterEntity::default());
        match use_case.get_output::<CountOutput>() {
            Err(CleanError::MissingOutputFilter { output_type }) => {
                assert!(output_type.ends_with("CountOutput"));
            }
            other => panic!("Expected MissingOutputFilter, got {:?}", other),
        }
    }

    #[test]
    fn test_set_input_applies_filter() {
        let use_case = counter_use_case();
        use_case.set_input(AddInput { amount: 2 }).unwrap();
        use_case.set_input(AddInput { amount: 3 }).unwrap();
        assert_eq!(use_case.entity().count, 5);
        assert_eq!(
            use_case.get_output::<CountOutput>().unwrap(),
            CountOutput { count: 5 }
        );
    }

    #[test]
    fn test_set_input_without_filter_fails() {
        let use_case = counter_use_case();
        let err = use_case
            .set_input(LabelInput {
                label: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, CleanError::MissingInputFilter { .. }));
        assert_eq!(use_case.entity(), CounterEntity::default());
    }

    #[test]
    fn test_duplicate_filters_are_rejected() {
        let result = UseCase::builder(CounterEntity::default())
            .with_output_filter(|e: &CounterEntity| CountOutput { count: e.count })
            .unwrap()
            .with_output_filter(|_: &CounterEntity| CountOutput { count: 0 });
        assert!(matches!(
            result,
            Err(CleanError::FilterAlreadyRegistered { .. })
        ));

        let result = UseCase::builder(CounterEntity::default())
            .with_input_filter(|_: AddInput, e: &CounterEntity| e.clone())
            .unwrap()
            .with_input_filter(|_: AddInput, e: &CounterEntity| e.clone());
        assert!(matches!(
            result,
            Err(CleanError::FilterAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_second_subscription_fails() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|_: FetchOutput| async {
                Ok::<_, FailureInput>(LabelInput { label: "a".into() })
            })
            .unwrap();

        let err = use_case
            .subscribe(|_: FetchOutput| async {
                Ok::<_, FailureInput>(LabelInput { label: "b".into() })
            })
            .unwrap_err();
        match err {
            CleanError::SubscriptionAlreadyRegistered { output_type } => {
                assert!(output_type.ends_with("FetchOutput"));
            }
            other => panic!("Expected SubscriptionAlreadyRegistered, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_without_subscription_folds_failure() {
        let use_case = counter_use_case();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let captured = seen.clone();

        use_case
            .request(
                FetchOutput { id: "1".into() },
                label_on_success,
                move |e, failure| {
                    *captured.lock().unwrap() = Some(failure.clone());
                    error_on_failure(e, failure)
                },
            )
            .await
            .unwrap();

        let failure = seen.lock().unwrap().clone().unwrap();
        let missing = failure.as_no_subscription().unwrap();
        assert!(missing.output_type.ends_with("FetchOutput"));
        assert!(use_case.entity().error.unwrap().contains("FetchOutput"));
    }

    #[tokio::test]
    async fn test_request_success_replaces_entity() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|output: FetchOutput| async move {
                Ok::<_, FailureInput>(LabelInput {
                    label: format!("profile {}", output.id),
                })
            })
            .unwrap();

        use_case
            .request(
                FetchOutput { id: "123".into() },
                label_on_success,
                error_on_failure,
            )
            .await
            .unwrap();

        assert_eq!(use_case.entity().label, "profile 123");
        assert!(use_case.entity().error.is_none());
    }

    #[tokio::test]
    async fn test_request_failure_replaces_entity() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|_: FetchOutput| async {
                Err::<LabelInput, _>(FailureInput::new("backend down"))
            })
            .unwrap();

        use_case
            .request(
                FetchOutput { id: "123".into() },
                label_on_success,
                error_on_failure,
            )
            .await
            .unwrap();

        assert_eq!(use_case.entity().error.as_deref(), Some("backend down"));
        assert_eq!(use_case.entity().label, "");
    }

    #[tokio::test]
    async fn test_request_with_wrong_success_type_is_a_wiring_error() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|_: FetchOutput| async {
                Ok::<_, FailureInput>(LabelInput { label: "x".into() })
            })
            .unwrap();

        let err = use_case
            .request(
                FetchOutput { id: "1".into() },
                |e: &CounterEntity, _: AddInput| e.clone(),
                error_on_failure,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CleanError::SuccessInputMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handler() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|_: FetchOutput| async {
                Ok::<_, FailureInput>(LabelInput { label: "x".into() })
            })
            .unwrap();
        assert!(use_case.has_subscription::<FetchOutput>());
        assert!(use_case.unsubscribe::<FetchOutput>());
        assert!(!use_case.has_subscription::<FetchOutput>());
        assert!(!use_case.unsubscribe::<FetchOutput>());
    }

    #[tokio::test]
    async fn test_concurrent_requests_apply_in_resolution_order() {
        let use_case = counter_use_case();
        use_case
            .subscribe(|output: FetchOutput| async move {
                let delay = if output.id == "slow" { 50 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, FailureInput>(LabelInput { label: output.id })
            })
            .unwrap();

        let slow = use_case.request(
            FetchOutput { id: "slow".into() },
            label_on_success,
            error_on_failure,
        );
        let fast = use_case.request(
            FetchOutput { id: "fast".into() },
            label_on_success,
            error_on_failure,
        );
        let (slow, fast) = tokio::join!(slow, fast);
        slow.unwrap();
        fast.unwrap();

        // Last resolved wins.
        assert_eq!(use_case.entity().label, "slow");
    }

    #[tokio::test]
    async fn test_watch_entity_only_notifies_on_change() {
        let use_case = counter_use_case();
        let mut receiver = use_case.watch_entity();

        use_case.update(|e| e.clone()).unwrap();
        assert!(!receiver.has_changed().unwrap());

        use_case.set_input(AddInput { amount: 1 }).unwrap();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().count, 1);
    }

    #[tokio::test]
    async fn test_watch_output_yields_distinct_values() {
        let use_case = counter_use_case();
        let mut outputs = Box::pin(use_case.watch_output::<CountOutput>().unwrap());

        assert_eq!(outputs.next().await, Some(CountOutput { count: 0 }));

        // Label changes do not change CountOutput.
        use_case
            .update(|e| CounterEntity {
                label: "ignored".into(),
                ..e.clone()
            })
            .unwrap();
        use_case.set_input(AddInput { amount: 4 }).unwrap();

        assert_eq!(outputs.next().await, Some(CountOutput { count: 4 }));
    }

    #[tokio::test]
    async fn test_watch_output_ends_when_use_case_dropped() {
        let use_case = counter_use_case();
        let mut outputs = Box::pin(use_case.watch_output::<CountOutput>().unwrap());
        assert!(outputs.next().await.is_some());

        drop(use_case);
        assert_eq!(outputs.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_through_use_case() {
        let use_case = counter_use_case();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            use_case.debounce(
                move || {
                    count.fetch_add(1, Ordering::SeqCst);
                },
                "t",
                Duration::from_millis(100),
                true,
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let counted = count.clone();
        use_case.debounce(
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
            },
            "t",
            Duration::from_millis(100),
            true,
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_timers_and_rejects_changes() {
        let use_case = counter_use_case();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();

        use_case.debounce(
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
            },
            "search",
            Duration::from_millis(100),
            false,
        );
        use_case
            .subscribe(|_: FetchOutput| async {
                Ok::<_, FailureInput>(LabelInput { label: "x".into() })
            })
            .unwrap();

        use_case.dispose();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(use_case.is_disposed());
        assert!(!use_case.has_subscription::<FetchOutput>());
        assert!(matches!(
            use_case.set_input(AddInput { amount: 1 }),
            Err(CleanError::UseCaseDisposed { .. })
        ));
        let err = use_case
            .request(
                FetchOutput { id: "1".into() },
                label_on_success,
                error_on_failure,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CleanError::UseCaseDisposed { .. }));
    }
}
