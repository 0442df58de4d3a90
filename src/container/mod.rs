//! Component registry and dependency wiring.
//!
//! Components are registered explicitly during startup, each as a singleton
//! `Arc`. A component can be resolved by its concrete type or by the first
//! capability (`dyn Trait`) it declares. The wiring pass then fills every
//! [`Inject`] slot from the registry.

mod registry;
mod wiring;

pub use registry::{
    CapabilityKey, Component, ComponentDef, ComponentDescriptor, ComponentKind, ControllerHandle,
    Lifecycle, Registry, ResolveError,
};
pub use wiring::{wire_all, Inject, Injector, WiringGap, WiringReport};
