// src/principal/recycle.rs

use std::sync::Arc;

use crate::errors::Result;
use crate::principal::{Coordinates, Principal, ProductRegistry, ScopeKind};

/// Reusable principal storage for one stream.
///
/// When nobody else still holds the previous principal it is cleared and
/// rebound in place; otherwise a fresh one is allocated.
#[derive(Debug)]
pub struct PrincipalSlot {
    scope: ScopeKind,
    current: Option<Arc<Principal>>,
    reused: usize,
    allocated: usize,
}

impl PrincipalSlot {
    pub fn new(scope: ScopeKind) -> Self {
        Self {
            scope,
            current: None,
            reused: 0,
            allocated: 0,
        }
    }

    pub fn next(
        &mut self,
        registry: &ProductRegistry,
        coords: Coordinates,
        parent: Option<Arc<Principal>>,
    ) -> Result<Arc<Principal>> {
        if let Some(current) = self.current.as_mut() {
            if let Some(principal) = Arc::get_mut(current) {
                principal.recycle(coords, parent)?;
                self.reused += 1;
                return Ok(Arc::clone(current));
            }
        }
        let fresh = registry.make_principal(self.scope, coords, parent)?;
        self.allocated += 1;
        self.current = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the held principal, e.g. at the end of a lumi so its parent can go.
    pub fn release(&mut self) {
        self.current = None;
    }

    pub fn reused(&self) -> usize {
        self.reused
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::ProductId;
    use crate::types::{EventId, Timestamp};

    fn setup() -> (ProductRegistry, Arc<Principal>) {
        let mut registry = ProductRegistry::new();
        registry
            .register_produced(ScopeKind::Event, ProductId::new("hits"), "digitizer")
            .unwrap();
        let run = registry
            .make_principal(ScopeKind::Run, Coordinates::run(1, Timestamp(0)), None)
            .unwrap();
        let lumi = registry
            .make_principal(ScopeKind::Lumi, Coordinates::lumi(1, 1, Timestamp(0)), Some(run))
            .unwrap();
        (registry, lumi)
    }

    fn coords(event: u64) -> Coordinates {
        Coordinates::event(EventId { run: 1, lumi: 1, event }, Timestamp(0))
    }

    #[test]
    fn recycled_principal_starts_empty() {
        let (registry, lumi) = setup();
        let mut slot = PrincipalSlot::new(ScopeKind::Event);
        let hits = ProductId::new("hits");

        let first = slot.next(&registry, coords(1), Some(lumi.clone())).unwrap();
        first.put("digitizer", &hits, Arc::new(10_u32)).unwrap();
        assert_eq!(first.resolved_count(), 1);
        drop(first);

        let second = slot.next(&registry, coords(2), Some(lumi)).unwrap();
        assert_eq!(second.resolved_count(), 0);
        assert_eq!(second.coordinates().event, Some(2));
        assert_eq!((slot.allocated(), slot.reused()), (1, 1));
    }

    #[test]
    fn shared_principal_is_not_recycled() {
        let (registry, lumi) = setup();
        let mut slot = PrincipalSlot::new(ScopeKind::Event);
        let held = slot.next(&registry, coords(1), Some(lumi.clone())).unwrap();
        let next = slot.next(&registry, coords(2), Some(lumi)).unwrap();
        assert_eq!(held.coordinates().event, Some(1));
        assert_eq!(next.coordinates().event, Some(2));
        assert_eq!((slot.allocated(), slot.reused()), (2, 0));
    }
}
