// src/transition/info.rs

use std::sync::Arc;

use crate::conditions::ConditionSnapshot;
use crate::principal::{Principal, PrincipalKey};
use crate::transition::{ContextId, ParentContext, Transition};
use crate::types::StreamId;

/// Immutable description of one transition: what kind, for which principal,
/// in which context.
///
/// Built fresh for every transition and never mutated afterwards; cloning only
/// bumps reference counts.
#[derive(Debug, Clone)]
pub struct TransitionInfo {
    kind: Transition,
    principal: Arc<Principal>,
    context: ContextId,
    conditions: Option<Arc<ConditionSnapshot>>,
    file: Option<(usize, Arc<str>)>,
}

impl TransitionInfo {
    /// Descriptor for a job-wide transition (job, process block, files).
    pub fn job(kind: Transition, principal: Arc<Principal>) -> Self {
        debug_assert!(kind.is_global(), "{kind} is not a global transition");
        Self::new(kind, principal, ContextId::Job)
    }

    /// Descriptor for a global run/lumi transition in the given slot.
    pub fn global(kind: Transition, principal: Arc<Principal>, context: ContextId) -> Self {
        debug_assert!(kind.is_global(), "{kind} is not a global transition");
        Self::new(kind, principal, context)
    }

    /// Descriptor for a per-stream transition.
    pub fn for_stream(kind: Transition, principal: Arc<Principal>, stream: StreamId) -> Self {
        debug_assert!(kind.is_stream(), "{kind} is not a stream transition");
        Self::new(kind, principal, ContextId::Stream(stream))
    }

    fn new(kind: Transition, principal: Arc<Principal>, context: ContextId) -> Self {
        Self {
            kind,
            principal,
            context,
            conditions: None,
            file: None,
        }
    }

    pub fn with_conditions(mut self, snapshot: Option<Arc<ConditionSnapshot>>) -> Self {
        self.conditions = snapshot;
        self
    }

    /// Attach the input file a file notification is about, with its ordinal
    /// in the job.
    pub fn with_file(mut self, index: usize, name: impl Into<Arc<str>>) -> Self {
        self.file = Some((index, name.into()));
        self
    }

    pub fn kind(&self) -> Transition {
        self.kind
    }

    pub fn principal(&self) -> &Arc<Principal> {
        &self.principal
    }

    /// Immediate parent of the bound principal (event → lumi → run).
    pub fn parent(&self) -> Option<Arc<Principal>> {
        self.principal.parent()
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn stream(&self) -> Option<StreamId> {
        self.context.stream()
    }

    pub fn conditions(&self) -> Option<&Arc<ConditionSnapshot>> {
        self.conditions.as_ref()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_ref().map(|(_, name)| &**name)
    }

    pub fn file_index(&self) -> Option<usize> {
        self.file.as_ref().map(|(index, _)| *index)
    }

    pub fn principal_key(&self) -> PrincipalKey {
        self.principal.key()
    }

    pub fn parent_context(&self) -> ParentContext {
        ParentContext {
            context: self.context,
            transition: self.kind,
        }
    }
}
