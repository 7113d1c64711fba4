//! Per-connection scope binding.
//!
//! A connection starts `Unbound`. The first qualifying message moves it to
//! `Bound(scope, sender)` and nothing moves it again.

use serde::Serialize;

/// The (scope key, sender) pair a connection is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeBinding {
    pub scope_key: String,
    pub sender: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeState {
    #[default]
    Unbound,
    Bound(ScopeBinding),
}

#[derive(Debug, Default)]
pub struct ScopeResolver {
    state: ScopeState,
}

impl ScopeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ScopeState {
        &self.state
    }

    pub fn binding(&self) -> Option<&ScopeBinding> {
        match &self.state {
            ScopeState::Bound(binding) => Some(binding),
            ScopeState::Unbound => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ScopeState::Bound(_))
    }

    /// Bind to `(scope_key, sender)` if still unbound.
    ///
    /// Returns the new binding only on the call that performed the
    /// transition; every later call returns `None` and leaves the existing
    /// binding untouched, whatever it is asked to bind to.
    pub fn bind(&mut self, scope_key: &str, sender: &str) -> Option<ScopeBinding> {
        if self.is_bound() {
            return None;
        }
        let binding = ScopeBinding {
            scope_key: scope_key.to_string(),
            sender: sender.to_string(),
        };
        self.state = ScopeState::Bound(binding.clone());
        Some(binding)
    }
}
