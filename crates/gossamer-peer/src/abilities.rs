//! Named handlers that execute tasks.

use std::collections::HashMap;
use std::sync::Arc;

use gossamer_protocol::{Address, Task};

use crate::PeerError;

/// Something a peer can do with a task.
///
/// Returns an optional result string that is folded into the completed
/// task's `results`.
pub trait Ability: Send + Sync {
    fn perform(&self, executor: &Address, task: &Task) -> Result<Option<String>, PeerError>;
}

impl<F> Ability for F
where
    F: Fn(&Address, &Task) -> Result<Option<String>, PeerError> + Send + Sync,
{
    fn perform(&self, executor: &Address, task: &Task) -> Result<Option<String>, PeerError> {
        self(executor, task)
    }
}

/// Ability name to handlers. One name may carry several handlers, which
/// run in registration order.
#[derive(Clone, Default)]
pub struct AbilityRegistry {
    handlers: HashMap<String, Vec<Arc<dyn Ability>>>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `name`, or replace all existing ones when
    /// `overwrite` is set.
    pub fn register(&mut self, name: &str, ability: impl Ability + 'static, overwrite: bool) {
        let handlers = self.handlers.entry(name.to_string()).or_default();
        if overwrite {
            handlers.clear();
        }
        handlers.push(Arc::new(ability));
        tracing::debug!(ability = name, handlers = handlers.len(), overwrite, "Ability registered");
    }

    /// [`register`](Self::register) for plain closures.
    pub fn register_fn<F>(&mut self, name: &str, handler: F, overwrite: bool)
    where
        F: Fn(&Address, &Task) -> Result<Option<String>, PeerError> + Send + Sync + 'static,
    {
        self.register(name, handler, overwrite);
    }

    pub fn handlers(&self, name: &str) -> &[Arc<dyn Ability>] {
        self.handlers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.handlers(name).is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AbilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}
