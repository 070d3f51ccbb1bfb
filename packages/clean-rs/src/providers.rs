//! Explicit dependency container.
//!
//! Build one `Providers` at process start, register the shared services
//! (external interfaces, clients, use cases) and pass it by reference.
//! Every type has at most one provider.
//!
//! ```ignore
//! let providers = Providers::new();
//! providers.register(Config::from_env()?)?;
//! providers.register_lazy(|p: &Providers| build_interface(p.get::<Config>()))?;
//!
//! let interface = providers.get::<Arc<ExternalInterface>>()?;
//! ```

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::CleanError;

type Shared = Arc<dyn Any + Send + Sync>;
type FactoryFn = Box<dyn Fn(&Providers) -> Shared + Send + Sync>;

struct Slot {
    value: OnceLock<Shared>,
    factory: FactoryFn,
    type_name: &'static str,
}

/// Type-keyed registry of shared singletons.
#[derive(Default)]
pub struct Providers {
    slots: DashMap<TypeId, Arc<Slot>>,
}

impl Providers {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-built value.
    pub fn register<T: Send + Sync + 'static>(&self, value: T) -> Result<(), CleanError> {
        let value: Shared = Arc::new(value);
        let shared = value.clone();
        self.insert::<T>(Slot {
            value: OnceLock::from(value),
            factory: Box::new(move |_: &Providers| shared.clone()),
            type_name: type_name::<T>(),
        })
    }

    /// Register a factory run on the first `get`, exactly once.
    ///
    /// The factory may resolve other providers but not its own type.
    pub fn register_lazy<T, F>(&self, factory: F) -> Result<(), CleanError>
    where
        T: Send + Sync + 'static,
        F: Fn(&Providers) -> T + Send + Sync + 'static,
    {
        self.insert::<T>(Slot {
            value: OnceLock::new(),
            factory: Box::new(move |providers: &Providers| {
                Arc::new(factory(providers)) as Shared
            }),
            type_name: type_name::<T>(),
        })
    }

    /// Resolve the provider for `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, CleanError> {
        let missing = CleanError::MissingProvider {
            type_name: type_name::<T>(),
        };

        // Clone the slot out so the map is not locked while a factory runs.
        let slot = self
            .slots
            .get(&TypeId::of::<T>())
            .map(|slot| slot.value().clone())
            .ok_or(missing.clone())?;

        let value = slot.value.get_or_init(|| {
            debug!(provider = slot.type_name, "building lazy provider");
            (slot.factory)(self)
        });

        value.clone().downcast::<T>().map_err(|_| missing)
    }

    /// Check if a provider is registered for `T`.
    pub fn contains<T: 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    fn insert<T: 'static>(&self, slot: Slot) -> Result<(), CleanError> {
        match self.slots.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(CleanError::ProviderAlreadyRegistered {
                type_name: type_name::<T>(),
            }),
            Entry::Vacant(vacant) => {
                debug!(provider = slot.type_name, "provider registered");
                vacant.insert(Arc::new(slot));
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.slots.iter().map(|slot| slot.type_name).collect();
        f.debug_struct("Providers").field("types", &names).finish()
    }
}
