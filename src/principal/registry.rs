// src/principal/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{Result, SchedError};
use crate::principal::{
    Coordinates, DelayedReader, Principal, ProductId, ProductOrigin, ProductSlot, ScopeKind,
};

#[derive(Debug, Default, Clone)]
struct ScopeLayout {
    slots: Vec<ProductSlot>,
    index: Arc<HashMap<ProductId, usize>>,
}

/// Declared product slots per scope, fixed before processing starts.
#[derive(Debug, Default)]
pub struct ProductRegistry {
    layouts: HashMap<ScopeKind, ScopeLayout>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a product put by the module `label`.
    pub fn register_produced(&mut self, scope: ScopeKind, id: ProductId, label: &str) -> Result<()> {
        self.register(scope, ProductSlot::new(id, ProductOrigin::Module(label.to_string())))
    }

    /// Declare a product read on demand from an external source.
    pub fn register_source(
        &mut self,
        scope: ScopeKind,
        id: ProductId,
        reader: Arc<dyn DelayedReader>,
    ) -> Result<()> {
        self.register(scope, ProductSlot::new(id, ProductOrigin::Source(reader)))
    }

    fn register(&mut self, scope: ScopeKind, slot: ProductSlot) -> Result<()> {
        let layout = self.layouts.entry(scope).or_default();
        if layout.index.contains_key(&slot.id) {
            return Err(SchedError::ConfigError(format!(
                "product '{}' is declared twice for the {scope} scope",
                slot.id
            )));
        }
        Arc::make_mut(&mut layout.index).insert(slot.id.clone(), layout.slots.len());
        layout.slots.push(slot);
        Ok(())
    }

    pub fn products(&self, scope: ScopeKind) -> impl Iterator<Item = &ProductId> {
        self.layouts
            .get(&scope)
            .into_iter()
            .flat_map(|l| l.slots.iter().map(|s| &s.id))
    }

    /// Create an empty principal for `scope`, checking that its coordinates
    /// agree with `parent`.
    pub fn make_principal(
        &self,
        scope: ScopeKind,
        coords: Coordinates,
        parent: Option<Arc<Principal>>,
    ) -> Result<Arc<Principal>> {
        let layout = self.layouts.get(&scope).cloned().unwrap_or_default();
        Principal::new(scope, coords, parent, layout.slots, layout.index).map(Arc::new)
    }
}
