use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::wiring::Injector;
use crate::router::Controller;

/// A registered component.
///
/// `wire` is called once during startup with an [`Injector`]; components fill
/// their [`Inject`](super::Inject) slots there. Components without
/// dependencies keep the empty default.
pub trait Component: Any + Send + Sync {
    fn wire(&self, _injector: &mut Injector<'_>) {}
}

/// Identity of a capability (usually a `dyn Trait` type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityKey {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl CapabilityKey {
    #[must_use]
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: type_name::<C>(),
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Singleton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Component,
    Controller,
}

/// Immutable registration record for one component type.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Declared capabilities in declaration order. Only the first is bound.
    pub capabilities: Vec<CapabilityKey>,
    pub lifecycle: Lifecycle,
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotFound { type_name: &'static str },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotFound { type_name } => {
                write!(f, "no component registered for {type_name}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

type CapabilityCast<T> = Box<dyn Fn(&Arc<T>) -> Box<dyn Any + Send + Sync>>;

struct CapabilityBinding<T> {
    key: CapabilityKey,
    cast: CapabilityCast<T>,
}

/// Registration input: how to build a component and what it provides.
///
/// ```ignore
/// registry.register_with(
///     ComponentDef::new(PgUserRepo::default())
///         .provides::<dyn UserRepo>(|c| c as Arc<dyn UserRepo>),
/// );
/// ```
pub struct ComponentDef<T: Component> {
    factory: Box<dyn FnOnce() -> T>,
    capabilities: Vec<CapabilityBinding<T>>,
}

impl<T: Component> ComponentDef<T> {
    #[must_use]
    pub fn new(instance: T) -> Self {
        Self::with_factory(move || instance)
    }

    /// Defer construction; the factory only runs if the type is not yet registered.
    #[must_use]
    pub fn with_factory(factory: impl FnOnce() -> T + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            capabilities: Vec::new(),
        }
    }

    /// Declare a capability with the cast that turns the instance into it.
    #[must_use]
    pub fn provides<C>(mut self, cast: fn(Arc<T>) -> Arc<C>) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.push(CapabilityBinding {
            key: CapabilityKey::of::<C>(),
            cast: Box::new(move |instance| {
                let cap: Arc<C> = cast(Arc::clone(instance));
                Box::new(cap)
            }),
        });
        self
    }
}

impl<T: Component> From<T> for ComponentDef<T> {
    fn from(instance: T) -> Self {
        Self::new(instance)
    }
}

/// A registered instance, type-erased for the wiring pass.
#[derive(Clone)]
pub(crate) struct InstanceRecord {
    pub(crate) type_name: &'static str,
    pub(crate) component: Arc<dyn Component>,
}

/// A registered controller, as the route table builder sees it.
#[derive(Clone)]
pub struct ControllerHandle {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub controller: Arc<dyn Controller>,
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Singleton store keyed by concrete type and by capability.
///
/// Both keys map to the same `Arc` allocation. The registry is built during
/// startup through `&mut self` and read-only afterwards.
#[derive(Default)]
pub struct Registry {
    descriptors: Vec<ComponentDescriptor>,
    slots: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    capability_owner: HashMap<TypeId, &'static str>,
    instances: Vec<InstanceRecord>,
    controllers: Vec<ControllerHandle>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with no capabilities.
    pub fn register<T: Component>(&mut self, instance: T) -> Arc<T> {
        self.register_with(ComponentDef::new(instance))
    }

    pub fn register_with<T: Component>(&mut self, def: ComponentDef<T>) -> Arc<T> {
        self.insert(def, ComponentKind::Component).0
    }

    /// Register a controller. Its routes are collected when the route table is built.
    pub fn register_controller<T: Controller>(&mut self, def: impl Into<ComponentDef<T>>) -> Arc<T> {
        let (instance, fresh) = self.insert(def.into(), ComponentKind::Controller);
        if fresh {
            let controller: Arc<dyn Controller> = Arc::clone(&instance) as Arc<dyn Controller>;
            let any: Arc<dyn Any + Send + Sync> = Arc::clone(&instance) as Arc<dyn Any + Send + Sync>;
            self.controllers.push(ControllerHandle {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                controller,
                instance: any,
            });
        }
        instance
    }

    fn insert<T: Component>(&mut self, def: ComponentDef<T>, kind: ComponentKind) -> (Arc<T>, bool) {
        let type_name = type_name::<T>();
        if let Some(existing) = self.resolve::<T>() {
            debug!(component = type_name, "Component already registered, keeping existing instance");
            return (existing, false);
        }

        let instance = Arc::new((def.factory)());
        self.slots
            .insert(TypeId::of::<T>(), Box::new(Arc::clone(&instance)));

        let capabilities: Vec<CapabilityKey> = def.capabilities.iter().map(|c| c.key).collect();
        if let Some(first) = def.capabilities.first() {
            if let Some(previous) = self.capability_owner.insert(first.key.type_id, type_name) {
                warn!(
                    capability = %first.key,
                    previous = previous,
                    component = type_name,
                    "Capability rebound, last registration wins"
                );
            }
            self.slots.insert(first.key.type_id, (first.cast)(&instance));
        }
        for ignored in def.capabilities.iter().skip(1) {
            debug!(
                capability = %ignored.key,
                component = type_name,
                "Only the first declared capability is bound"
            );
        }

        self.descriptors.push(ComponentDescriptor {
            type_id: TypeId::of::<T>(),
            type_name,
            capabilities,
            lifecycle: Lifecycle::Singleton,
            kind,
        });
        self.instances.push(InstanceRecord {
            type_name,
            component: Arc::clone(&instance) as Arc<dyn Component>,
        });
        info!(component = type_name, kind = ?kind, "Component registered");
        (instance, true)
    }

    /// Resolve by concrete type or by capability.
    #[must_use]
    pub fn resolve<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.slots
            .get(&TypeId::of::<T>())?
            .downcast_ref::<Arc<T>>()
            .cloned()
    }

    pub fn try_resolve<T>(&self) -> Result<Arc<T>, ResolveError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<T>().ok_or(ResolveError::NotFound {
            type_name: type_name::<T>(),
        })
    }

    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ComponentDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn controllers(&self) -> &[ControllerHandle] {
        &self.controllers
    }

    pub(crate) fn instance_at(&self, index: usize) -> Option<InstanceRecord> {
        self.instances.get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Drop every instance the registry holds.
    pub fn clear(&mut self) {
        let released = self.descriptors.len();
        self.controllers.clear();
        self.instances.clear();
        self.slots.clear();
        self.capability_owner.clear();
        self.descriptors.clear();
        debug!(released, "Registry released");
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.descriptors.len())
            .field("controllers", &self.controllers.len())
            .finish()
    }
}
