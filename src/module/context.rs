// src/module/context.rs

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use crate::concurrency::{TaskPool, WaitingTaskHolder};
use crate::conditions::ConditionEntry;
use crate::failure::{ModuleError, TransitionFailure};
use crate::principal::{Principal, ProductId, ScopeKind};
use crate::transition::{Transition, TransitionInfo};
use crate::types::StreamId;

/// What a handler sees while it runs.
pub struct CallContext<'a> {
    info: &'a TransitionInfo,
    module: &'a str,
    produces: &'a [(ScopeKind, ProductId)],
}

impl<'a> CallContext<'a> {
    pub fn new(
        info: &'a TransitionInfo,
        module: &'a str,
        produces: &'a [(ScopeKind, ProductId)],
    ) -> Self {
        Self {
            info,
            module,
            produces,
        }
    }

    pub fn info(&self) -> &TransitionInfo {
        self.info
    }

    pub fn transition(&self) -> Transition {
        self.info.kind()
    }

    pub fn stream(&self) -> Option<StreamId> {
        self.info.stream()
    }

    pub fn module_label(&self) -> &str {
        self.module
    }

    pub fn principal(&self) -> &Arc<Principal> {
        self.info.principal()
    }

    /// Read a product from the bound principal or its parents.
    pub fn get<T>(&self, id: impl Into<ProductId>) -> Result<Arc<T>, ModuleError>
    where
        T: Send + Sync + 'static,
    {
        self.principal().get::<T>(&id.into())
    }

    /// Put a product into the bound principal.
    pub fn put<T>(&self, id: impl Into<ProductId>, value: T) -> Result<(), ModuleError>
    where
        T: Any + Send + Sync,
    {
        self.principal().put(self.module, &id.into(), Arc::new(value))
    }

    /// Put into the first product this module declares for the bound scope.
    pub fn put_default<T>(&self, value: T) -> Result<(), ModuleError>
    where
        T: Any + Send + Sync,
    {
        let scope = self.principal().scope();
        let id = self
            .produces
            .iter()
            .find(|(s, _)| *s == scope)
            .map(|(_, id)| id)
            .ok_or_else(|| {
                ModuleError::ProductNotOwned(format!("{} ({scope} scope)", self.module))
            })?;
        self.principal().put(self.module, id, Arc::new(value))
    }

    /// Condition record as synchronized for this transition.
    pub fn condition(&self, record: &str) -> Result<&ConditionEntry, ModuleError> {
        self.info
            .conditions()
            .and_then(|snapshot| snapshot.get(record))
            .ok_or_else(|| ModuleError::MissingCondition(record.to_string()))
    }
}

/// Handed to an acquire step together with the holder it must signal.
#[derive(Clone)]
pub struct AcquireContext {
    info: TransitionInfo,
    module: Arc<str>,
    pool: TaskPool,
    started: Instant,
}

impl AcquireContext {
    pub(crate) fn new(info: TransitionInfo, module: Arc<str>, pool: TaskPool) -> Self {
        Self {
            info,
            module,
            pool,
            started: Instant::now(),
        }
    }

    pub fn info(&self) -> &TransitionInfo {
        &self.info
    }

    pub fn module_label(&self) -> &str {
        &self.module
    }

    /// Pool to run the asynchronous part on.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Complete the acquire step with a module failure.
    pub fn fail(&self, holder: WaitingTaskHolder, error: ModuleError) {
        let failure =
            TransitionFailure::module(&self.module, &self.info, &error, self.started.elapsed());
        holder.done_waiting(Err(failure.into_ref()));
    }
}
