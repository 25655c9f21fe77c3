//! Per-run mutable state, keyed by execution id.
//!
//! A single agent instance serves many concurrent runs. Each run gets its own
//! [`ExecutionState`] behind an `Arc<Mutex<_>>`; the run's handle holds the
//! `Arc`, the registry holds the lookup entry. Ending a run removes the entry
//! and closes the state so stale handles become inert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use dealpilot_core::domain::agent::{
    AgentAction, AgentAlert, AgentErrorEntry, AgentInsight, ExecutionId, TokenUsage,
};

use crate::error::AgentError;

#[derive(Debug)]
pub struct ExecutionState {
    pub(crate) llm_calls_count: u32,
    pub(crate) tokens_used: TokenUsage,
    pub(crate) insights: Vec<AgentInsight>,
    pub(crate) alerts: Vec<AgentAlert>,
    /// Alert cap slots taken, including alerts whose write is still in flight.
    pub(crate) alert_slots: usize,
    pub(crate) actions: Vec<AgentAction>,
    pub(crate) errors: Vec<AgentErrorEntry>,
    pub(crate) started: Instant,
    pub(crate) closed: bool,
}

impl ExecutionState {
    fn new() -> Self {
        Self {
            llm_calls_count: 0,
            tokens_used: TokenUsage::default(),
            insights: Vec::new(),
            alerts: Vec::new(),
            alert_slots: 0,
            actions: Vec::new(),
            errors: Vec::new(),
            started: Instant::now(),
            closed: false,
        }
    }

    fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            llm_calls_count: self.llm_calls_count,
            tokens_used: self.tokens_used,
            insights: self.insights.len(),
            alerts: self.alerts.len(),
            actions: self.actions.len(),
            errors: self.errors.len(),
        }
    }
}

/// Counters of a live run, for operators and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionSnapshot {
    pub llm_calls_count: u32,
    pub tokens_used: TokenUsage,
    pub insights: usize,
    pub alerts: usize,
    pub actions: usize,
    pub errors: usize,
}

#[derive(Clone, Debug)]
pub struct SharedState(Arc<Mutex<ExecutionState>>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(ExecutionState::new())))
    }

    /// Runs `f` against the state unless the run has already ended.
    pub(crate) fn with_open<T>(&self, f: impl FnOnce(&mut ExecutionState) -> T) -> Option<T> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        Some(f(&mut state))
    }

    pub(crate) fn inspect<T>(&self, f: impl FnOnce(&ExecutionState) -> T) -> T {
        f(&self.lock())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionState> {
        match self.0.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn same_as(&self, other: &SharedState) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    active: Mutex<HashMap<ExecutionId, SharedState>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates fresh state for `execution_id`. Refuses an id that is still active.
    pub fn begin(&self, execution_id: &ExecutionId) -> Result<SharedState, AgentError> {
        let mut active = self.active();
        if active.contains_key(execution_id) {
            return Err(AgentError::DuplicateExecution(execution_id.clone()));
        }
        let state = SharedState::new();
        active.insert(execution_id.clone(), state.clone());
        Ok(state)
    }

    /// Releases the entry for `execution_id` and closes `state`.
    ///
    /// Only the entry that `state` was registered under is removed, so a
    /// refused duplicate can never release the run it collided with.
    pub fn end(&self, execution_id: &ExecutionId, state: &SharedState) {
        state.close();
        let mut active = self.active();
        if active.get(execution_id).is_some_and(|current| current.same_as(state)) {
            active.remove(execution_id);
        }
    }

    pub fn is_active(&self, execution_id: &ExecutionId) -> bool {
        self.active().contains_key(execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    pub fn snapshot(&self, execution_id: &ExecutionId) -> Option<ExecutionSnapshot> {
        let state = self.active().get(execution_id).cloned()?;
        let snapshot = state.lock().snapshot();
        Some(snapshot)
    }

    fn active(&self) -> MutexGuard<'_, HashMap<ExecutionId, SharedState>> {
        match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
