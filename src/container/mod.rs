//! Singleton service container
//!
//! Owns the tool-provider instances (and anything they depend on) for one
//! server run. It is built once, handed around by `Arc`, and disposed on
//! shutdown. There is no global instance.
//!
//! Registering a type twice replaces the earlier registration. Materialized
//! disposables from the replaced entry stay on the disposal list.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::error::{BridgeError, Result};
use crate::mcp::tools::ToolProvider;

type AnyArc = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceContainer) -> Result<AnyArc> + Send + Sync>;
type ToolCast = fn(&AnyArc) -> Option<Arc<dyn ToolProvider>>;
type DisposeCast = fn(&AnyArc) -> Option<Arc<dyn Disposable>>;

/// Disposal contract for services holding resources
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> Result<()>;
}

fn cast_tool<T: ToolProvider>(any: &AnyArc) -> Option<Arc<dyn ToolProvider>> {
    any.clone()
        .downcast::<T>()
        .ok()
        .map(|t| t as Arc<dyn ToolProvider>)
}

fn cast_disposable<T: Disposable + 'static>(any: &AnyArc) -> Option<Arc<dyn Disposable>> {
    any.clone()
        .downcast::<T>()
        .ok()
        .map(|t| t as Arc<dyn Disposable>)
}

/// A pending singleton registration
pub struct Singleton<T> {
    source: Source,
    tool: Option<ToolCast>,
    dispose: Option<DisposeCast>,
    _marker: PhantomData<fn() -> T>,
}

enum Source {
    Instance(AnyArc),
    Factory(Factory),
}

impl<T: Send + Sync + 'static> Singleton<T> {
    /// Register an already constructed instance
    pub fn instance(value: T) -> Self {
        Self {
            source: Source::Instance(Arc::new(value)),
            tool: None,
            dispose: None,
            _marker: PhantomData,
        }
    }

    /// Register a deferred constructor, run on first resolution
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&ServiceContainer) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            source: Source::Factory(Arc::new(move |c| Ok(Arc::new(factory(c)?) as AnyArc))),
            tool: None,
            dispose: None,
            _marker: PhantomData,
        }
    }

    /// Mark the type as a tool provider
    pub fn tool(mut self) -> Self
    where
        T: ToolProvider,
    {
        self.tool = Some(cast_tool::<T>);
        self
    }

    /// Track the instance for disposal on shutdown
    pub fn disposable(mut self) -> Self
    where
        T: Disposable,
    {
        self.dispose = Some(cast_disposable::<T>);
        self
    }
}

struct Slot {
    type_name: &'static str,
    cell: OnceCell<AnyArc>,
    factory: Option<Factory>,
    tool: Option<ToolCast>,
    dispose: Option<DisposeCast>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<TypeId, Arc<Slot>>,
    order: Vec<TypeId>,
}

/// Singleton registry with ordered disposal
#[derive(Default)]
pub struct ServiceContainer {
    registry: RwLock<Registry>,
    disposal: Mutex<Vec<(&'static str, Arc<dyn Disposable>)>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a singleton; replaces any earlier registration of `T`
    pub fn register<T: Send + Sync + 'static>(&self, singleton: Singleton<T>) {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        let (cell, factory) = match singleton.source {
            Source::Instance(value) => {
                if let Some(cast) = singleton.dispose {
                    if let Some(disposable) = cast(&value) {
                        self.disposal.lock().push((type_name, disposable));
                    }
                }
                (OnceCell::with_value(value), None)
            }
            Source::Factory(factory) => (OnceCell::new(), Some(factory)),
        };

        let slot = Arc::new(Slot {
            type_name,
            cell,
            factory,
            tool: singleton.tool,
            dispose: singleton.dispose,
        });

        let mut registry = self.registry.write();
        if registry.slots.insert(type_id, slot).is_some() {
            tracing::debug!("Replaced singleton registration for {}", type_name);
        } else {
            registry.order.push(type_id);
        }
    }

    /// Register a plain instance
    pub fn add_singleton<T: Send + Sync + 'static>(&self, value: T) {
        self.register(Singleton::instance(value));
    }

    /// Register a deferred constructor
    pub fn add_singleton_factory<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<T> + Send + Sync + 'static,
    {
        self.register(Singleton::factory(factory));
    }

    /// Register a tool provider instance
    pub fn add_tool<T: ToolProvider>(&self, provider: T) {
        self.register(Singleton::instance(provider).tool());
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.registry.read().slots.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.registry.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, type_id: &TypeId) -> Option<Arc<Slot>> {
        self.registry.read().slots.get(type_id).cloned()
    }

    /// Materialize a slot. The registry lock is not held here so factories
    /// may resolve their own dependencies.
    fn resolve(&self, slot: &Slot) -> Result<AnyArc> {
        slot.cell
            .get_or_try_init(|| {
                let factory = slot
                    .factory
                    .as_ref()
                    .ok_or(BridgeError::ServiceNotFound(slot.type_name))?;
                let value = factory(self)?;
                if let Some(cast) = slot.dispose {
                    if let Some(disposable) = cast(&value) {
                        self.disposal.lock().push((slot.type_name, disposable));
                    }
                }
                tracing::debug!("Materialized singleton {}", slot.type_name);
                Ok(value)
            })
            .cloned()
    }

    fn resolve_typed<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>> {
        let Some(slot) = self.slot(&TypeId::of::<T>()) else {
            return Ok(None);
        };
        let value = self.resolve(&slot)?;
        value
            .downcast::<T>()
            .map(Some)
            .map_err(|_| BridgeError::Internal(format!("type mismatch for {}", slot.type_name)))
    }

    /// Resolve `T`, or `None` when it is not registered or its factory fails
    pub fn get_service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.resolve_typed::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    "Failed to construct {}: {}",
                    std::any::type_name::<T>(),
                    e
                );
                None
            }
        }
    }

    /// Resolve `T` or fail with `ServiceNotFound`
    pub fn get_required_service<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_typed::<T>()?
            .ok_or(BridgeError::ServiceNotFound(std::any::type_name::<T>()))
    }

    /// All tool providers, in registration order
    pub fn tool_providers(&self) -> Result<Vec<Arc<dyn ToolProvider>>> {
        let slots: Vec<Arc<Slot>> = {
            let registry = self.registry.read();
            registry
                .order
                .iter()
                .filter_map(|id| registry.slots.get(id))
                .filter(|slot| slot.tool.is_some())
                .cloned()
                .collect()
        };

        let mut providers = Vec::with_capacity(slots.len());
        for slot in slots {
            let value = self.resolve(&slot).map_err(|e| BridgeError::ServiceConstruction {
                service: slot.type_name,
                message: e.to_string(),
            })?;
            if let Some(provider) = slot.tool.and_then(|cast| cast(&value)) {
                providers.push(provider);
            }
        }
        Ok(providers)
    }

    /// Dispose every tracked instance (last registered first) and clear the
    /// container. Failures are logged and do not stop the remaining disposals.
    pub fn dispose(&self) {
        let disposables: Vec<_> = std::mem::take(&mut *self.disposal.lock());
        for (name, disposable) in disposables.into_iter().rev() {
            match disposable.dispose() {
                Ok(()) => tracing::debug!("Disposed {}", name),
                Err(e) => tracing::warn!("Error disposing {}: {}", name, e),
            }
        }

        let mut registry = self.registry.write();
        registry.slots.clear();
        registry.order.clear();
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        let names: Vec<&str> = registry
            .order
            .iter()
            .filter_map(|id| registry.slots.get(id))
            .map(|slot| slot.type_name)
            .collect();
        f.debug_struct("ServiceContainer")
            .field("services", &names)
            .finish()
    }
}
