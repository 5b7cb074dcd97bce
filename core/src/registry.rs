//! Named guards over resources
//!
//! A `GuardRegistry` holds guards by name and asks each of them, in
//! registration order, whether a resource may be used right now. The first
//! refusal wins.

use crate::circuit::CircuitBreaker;
use crate::errors::GuardError;
use std::sync::Arc;

/// A check that can refuse a resource
pub trait Guard: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, resource: &str) -> Result<(), GuardError>;
}

/// A breaker refuses every resource while it would reject calls
impl Guard for CircuitBreaker {
    fn name(&self) -> &str {
        CircuitBreaker::name(self)
    }

    fn check(&self, resource: &str) -> Result<(), GuardError> {
        if self.is_call_permitted() {
            return Ok(());
        }
        Err(GuardError {
            guard: CircuitBreaker::name(self).to_string(),
            resource: resource.to_string(),
            reason: format!("circuit is {}", self.state_name()),
        })
    }
}

#[derive(Default)]
pub struct GuardRegistry {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guard. A guard with the same name is replaced in place and
    /// returned.
    pub fn register(&mut self, guard: Arc<dyn Guard>) -> Option<Arc<dyn Guard>> {
        tracing::debug!(guard = guard.name(), "guard registered");
        match self.guards.iter_mut().find(|g| g.name() == guard.name()) {
            Some(existing) => Some(std::mem::replace(existing, guard)),
            None => {
                self.guards.push(guard);
                None
            }
        }
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Guard>> {
        let index = self.guards.iter().position(|g| g.name() == name)?;
        Some(self.guards.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Guard>> {
        self.guards.iter().find(|g| g.name() == name)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Every guard must accept `resource`
    pub fn check(&self, resource: &str) -> Result<(), GuardError> {
        self.guards.iter().try_for_each(|guard| guard.check(resource))
    }
}

impl std::fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.guards.iter().map(|g| g.name()).collect();
        f.debug_struct("GuardRegistry").field("guards", &names).finish()
    }
}
