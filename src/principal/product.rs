// src/principal/product.rs

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::failure::ModuleError;
use crate::principal::Coordinates;

/// Type-erased product value shared between consumers.
pub type ProductValue = Arc<dyn Any + Send + Sync>;

/// Name of a data product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// On-demand source of products that are not produced by a module.
pub trait DelayedReader: Send + Sync {
    fn read(&self, id: &ProductId, coords: &Coordinates) -> Option<ProductValue>;
}

/// Who fills a slot.
#[derive(Clone)]
pub enum ProductOrigin {
    /// Put by the module with this label.
    Module(String),
    /// Read lazily on first access.
    Source(Arc<dyn DelayedReader>),
}

impl fmt::Debug for ProductOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductOrigin::Module(label) => write!(f, "Module({label})"),
            ProductOrigin::Source(_) => f.write_str("Source"),
        }
    }
}

/// One product entry of a principal.
#[derive(Debug)]
pub struct ProductSlot {
    pub id: ProductId,
    pub origin: ProductOrigin,
    value: OnceLock<Option<ProductValue>>,
}

impl ProductSlot {
    pub fn new(id: ProductId, origin: ProductOrigin) -> Self {
        Self {
            id,
            origin,
            value: OnceLock::new(),
        }
    }

    pub(crate) fn resolve(&self, coords: &Coordinates) -> Option<ProductValue> {
        match &self.origin {
            ProductOrigin::Module(_) => self.value.get().cloned().flatten(),
            ProductOrigin::Source(reader) => self
                .value
                .get_or_init(|| reader.read(&self.id, coords))
                .clone(),
        }
    }

    pub(crate) fn fill(&self, value: ProductValue) -> Result<(), ModuleError> {
        self.value
            .set(Some(value))
            .map_err(|_| ModuleError::ProductAlreadyPut(self.id.to_string()))
    }

    pub(crate) fn is_resolved(&self) -> bool {
        matches!(self.value.get(), Some(Some(_)))
    }

    pub(crate) fn clear(&mut self) {
        self.value.take();
    }
}

impl Clone for ProductSlot {
    /// A fresh, unresolved slot with the same declaration.
    fn clone(&self) -> Self {
        Self::new(self.id.clone(), self.origin.clone())
    }
}
