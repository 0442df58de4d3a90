use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use super::registry::{Component, Registry};

/// A dependency slot on a component, filled once during wiring.
///
/// An unresolved slot stays empty; wiring never fails because of it.
pub struct Inject<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized> Inject<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<&Arc<T>> {
        self.cell.get()
    }

    #[must_use]
    pub fn is_wired(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Fill the slot directly. Returns `false` if it was already filled.
    pub fn set(&self, value: Arc<T>) -> bool {
        self.cell.set(value).is_ok()
    }
}

impl<T: ?Sized> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject")
            .field("target", &type_name::<T>())
            .field("wired", &self.is_wired())
            .finish()
    }
}

/// One injection target that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringGap {
    pub owner: &'static str,
    pub target: &'static str,
}

/// Outcome of [`wire_all`].
#[derive(Debug, Clone, Default)]
pub struct WiringReport {
    /// Components whose `wire` ran
    pub wired: usize,
    /// Slots filled
    pub injected: usize,
    /// Components created on demand by `inject_or_default`
    pub created: Vec<&'static str>,
    pub gaps: Vec<WiringGap>,
}

impl WiringReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Handed to [`Component::wire`]; resolves slots against the registry.
pub struct Injector<'a> {
    registry: &'a mut Registry,
    owner: &'static str,
    report: &'a mut WiringReport,
}

impl<'a> Injector<'a> {
    /// Fill `slot` from the registry by its declared type. Returns whether it is wired.
    pub fn inject<T>(&mut self, slot: &Inject<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if slot.is_wired() {
            return true;
        }
        match self.registry.try_resolve::<T>() {
            Ok(instance) => {
                slot.set(instance);
                self.report.injected += 1;
                debug!(owner = self.owner, target = type_name::<T>(), "Injected");
                true
            }
            Err(e) => {
                warn!(owner = self.owner, error = %e, "Injection target unresolved, slot left empty");
                self.report.gaps.push(WiringGap {
                    owner: self.owner,
                    target: type_name::<T>(),
                });
                false
            }
        }
    }

    /// Like [`Injector::inject`], but registers `T::default()` when `T` is unknown.
    ///
    /// The new component is wired later in the same pass.
    pub fn inject_or_default<T>(&mut self, slot: &Inject<T>) -> bool
    where
        T: Component + Default,
    {
        if !self.registry.contains::<T>() {
            self.registry.register(T::default());
            self.report.created.push(type_name::<T>());
            info!(owner = self.owner, component = type_name::<T>(), "Component created on demand");
        }
        self.inject(slot)
    }

    /// Resolve without a slot, for components that keep their own fields.
    #[must_use]
    pub fn resolve<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.resolve::<T>()
    }

    #[must_use]
    pub fn owner(&self) -> &'static str {
        self.owner
    }
}

/// Wire every registered component in registration order.
///
/// Components created during the pass are appended and wired too.
pub fn wire_all(registry: &mut Registry) -> WiringReport {
    let mut report = WiringReport::default();
    let mut index = 0;
    while let Some(record) = registry.instance_at(index) {
        let mut injector = Injector {
            registry: &mut *registry,
            owner: record.type_name,
            report: &mut report,
        };
        record.component.wire(&mut injector);
        report.wired += 1;
        index += 1;
    }
    if report.is_complete() {
        info!(components = report.wired, injected = report.injected, "Wiring complete");
    } else {
        warn!(
            components = report.wired,
            injected = report.injected,
            gaps = report.gaps.len(),
            "Wiring complete with unresolved targets"
        );
    }
    report
}
