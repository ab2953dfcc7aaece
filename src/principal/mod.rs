// src/principal/mod.rs

//! Scope-bound data containers.
//!
//! A [`Principal`] holds the products of one process, run, luminosity block or
//! event. Slots are fixed up front by the [`ProductRegistry`]; each slot
//! resolves at most once, either because its producer module put a value or
//! because a lazy [`DelayedReader`] supplied it on first access.

pub mod product;
pub mod recycle;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

pub use product::{DelayedReader, ProductId, ProductOrigin, ProductSlot, ProductValue};
pub use recycle::PrincipalSlot;
pub use registry::ProductRegistry;

use crate::errors::{Result, SchedError};
use crate::failure::ModuleError;
use crate::types::{EventId, EventNumber, LumiNumber, RunNumber, Timestamp};

/// Nesting level of a principal, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKind {
    Process,
    Run,
    Lumi,
    Event,
}

impl ScopeKind {
    /// Scope a principal of this kind must have as its parent.
    pub fn parent(self) -> Option<ScopeKind> {
        match self {
            ScopeKind::Process => None,
            ScopeKind::Run => Some(ScopeKind::Process),
            ScopeKind::Lumi => Some(ScopeKind::Run),
            ScopeKind::Event => Some(ScopeKind::Lumi),
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeKind::Process => "process",
            ScopeKind::Run => "run",
            ScopeKind::Lumi => "lumi",
            ScopeKind::Event => "event",
        };
        f.write_str(s)
    }
}

/// Identifying coordinates of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinates {
    pub run: Option<RunNumber>,
    pub lumi: Option<LumiNumber>,
    pub event: Option<EventNumber>,
    pub time: Timestamp,
}

impl Coordinates {
    pub fn process() -> Self {
        Self::default()
    }

    pub fn run(run: RunNumber, time: Timestamp) -> Self {
        Self {
            run: Some(run),
            time,
            ..Self::default()
        }
    }

    pub fn lumi(run: RunNumber, lumi: LumiNumber, time: Timestamp) -> Self {
        Self {
            run: Some(run),
            lumi: Some(lumi),
            event: None,
            time,
        }
    }

    pub fn event(id: EventId, time: Timestamp) -> Self {
        Self {
            run: Some(id.run),
            lumi: Some(id.lumi),
            event: Some(id.event),
            time,
        }
    }

    /// Scope these coordinates describe.
    pub fn scope(&self) -> ScopeKind {
        match (self.run, self.lumi, self.event) {
            (None, _, _) => ScopeKind::Process,
            (Some(_), None, _) => ScopeKind::Run,
            (Some(_), Some(_), None) => ScopeKind::Lumi,
            (Some(_), Some(_), Some(_)) => ScopeKind::Event,
        }
    }

    /// Every coordinate the parent fixes must match ours.
    pub fn consistent_with(&self, parent: &Coordinates) -> bool {
        let run_ok = parent.run.is_none() || parent.run == self.run;
        let lumi_ok = parent.lumi.is_none() || parent.lumi == self.lumi;
        let event_ok = parent.event.is_none() || parent.event == self.event;
        run_ok && lumi_ok && event_ok
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.run, self.lumi, self.event) {
            (None, _, _) => f.write_str("process"),
            (Some(r), None, _) => write!(f, "run {r}"),
            (Some(r), Some(l), None) => write!(f, "run {r} lumi {l}"),
            (Some(r), Some(l), Some(e)) => write!(f, "run {r} lumi {l} event {e}"),
        }
    }
}

/// Identity of the unit of work a principal currently represents.
///
/// Two principals with equal keys describe the same run, lumi or event, which
/// is what worker deduplication keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalKey {
    pub scope: ScopeKind,
    pub run: Option<RunNumber>,
    pub lumi: Option<LumiNumber>,
    pub event: Option<EventNumber>,
}

impl fmt::Display for PrincipalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coords = Coordinates {
            run: self.run,
            lumi: self.lumi,
            event: self.event,
            time: Timestamp::default(),
        };
        write!(f, "{} {coords}", self.scope)
    }
}

/// Data container for one scope.
///
/// A principal only observes its parent: the driver owns run and lumi
/// principals for as long as their children are in flight, so the weak link
/// upgrades whenever a child is being processed.
///
/// Concurrent readers of already resolved products take no lock; the first
/// resolution of a slot is serialized by that slot's `OnceLock` only.
pub struct Principal {
    scope: ScopeKind,
    coords: Coordinates,
    parent: Option<Weak<Principal>>,
    slots: Vec<ProductSlot>,
    index: Arc<HashMap<ProductId, usize>>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("scope", &self.scope)
            .field("coords", &self.coords)
            .field("slots", &self.slots.len())
            .field("resolved", &self.resolved_count())
            .finish()
    }
}

impl Principal {
    pub(crate) fn new(
        scope: ScopeKind,
        coords: Coordinates,
        parent: Option<Arc<Principal>>,
        slots: Vec<ProductSlot>,
        index: Arc<HashMap<ProductId, usize>>,
    ) -> Result<Self> {
        check_lineage(scope, &coords, parent.as_deref())?;
        Ok(Self {
            scope,
            coords,
            parent: parent.as_ref().map(Arc::downgrade),
            slots,
            index,
        })
    }

    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coords
    }

    /// The parent principal, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Principal>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn key(&self) -> PrincipalKey {
        PrincipalKey {
            scope: self.scope,
            run: self.coords.run,
            lumi: self.coords.lumi,
            event: self.coords.event,
        }
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &ProductId> {
        self.slots.iter().map(|s| &s.id)
    }

    /// Cached product, resolving lazily through the slot's reader if needed.
    ///
    /// Ids not declared for this scope are looked up in the parent chain, so
    /// an event-level consumer can read lumi or run products.
    pub fn get_or_resolve(&self, id: &ProductId) -> Option<ProductValue> {
        match self.index.get(id) {
            Some(&i) => self.slots[i].resolve(&self.coords),
            None => self.parent().and_then(|p| p.get_or_resolve(id)),
        }
    }

    /// Typed access to a product.
    pub fn get<T>(&self, id: &ProductId) -> std::result::Result<Arc<T>, ModuleError>
    where
        T: Send + Sync + 'static,
    {
        let value = self
            .get_or_resolve(id)
            .ok_or_else(|| ModuleError::ProductNotFound(id.to_string()))?;
        value
            .downcast::<T>()
            .map_err(|_| ModuleError::ProductType(id.to_string()))
    }

    /// Fill a produced slot. Only the declaring module may put, and only once.
    pub fn put(
        &self,
        module: &str,
        id: &ProductId,
        value: ProductValue,
    ) -> std::result::Result<(), ModuleError> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| ModuleError::ProductNotFound(id.to_string()))?;
        let slot = &self.slots[i];
        match &slot.origin {
            ProductOrigin::Module(owner) if owner == module => slot.fill(value),
            _ => Err(ModuleError::ProductNotOwned(id.to_string())),
        }
    }

    /// Number of slots holding a value.
    pub fn resolved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_resolved()).count()
    }

    /// Clear every cached product and rebind the principal to a new unit of
    /// work in the same slot.
    pub(crate) fn recycle(
        &mut self,
        coords: Coordinates,
        parent: Option<Arc<Principal>>,
    ) -> Result<()> {
        check_lineage(self.scope, &coords, parent.as_deref())?;
        for slot in &mut self.slots {
            slot.clear();
        }
        self.coords = coords;
        self.parent = parent.as_ref().map(Arc::downgrade);
        Ok(())
    }
}

fn check_lineage(scope: ScopeKind, coords: &Coordinates, parent: Option<&Principal>) -> Result<()> {
    if coords.scope() != scope {
        return Err(SchedError::Scheduling(format!(
            "coordinates '{coords}' do not describe a {scope} principal"
        )));
    }
    match (scope.parent(), parent) {
        (None, None) => Ok(()),
        (Some(_), None) if scope == ScopeKind::Run => Ok(()),
        (Some(expected), Some(p)) if p.scope == expected => {
            if coords.consistent_with(&p.coords) {
                Ok(())
            } else {
                Err(SchedError::Scheduling(format!(
                    "{scope} principal '{coords}' is inconsistent with its parent '{}'",
                    p.coords
                )))
            }
        }
        (_, Some(p)) => Err(SchedError::Scheduling(format!(
            "{scope} principal cannot have a {} parent",
            p.scope
        ))),
        (Some(expected), None) => Err(SchedError::Scheduling(format!(
            "{scope} principal '{coords}' needs a {expected} parent"
        ))),
    }
}
