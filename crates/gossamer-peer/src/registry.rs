//! Tag-keyed handler lookup.

use std::collections::HashMap;

/// Maps message tags to handlers. The last registration for a tag wins.
#[derive(Debug, Clone)]
pub struct DispatchRegistry<H> {
    routes: HashMap<String, H>,
}

impl<H: Copy + std::fmt::Debug> DispatchRegistry<H> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Route `tag` to `handler`, returning the handler it replaced.
    pub fn register(&mut self, tag: &str, handler: H) -> Option<H> {
        let previous = self.routes.insert(tag.to_string(), handler);
        if let Some(old) = previous {
            tracing::debug!(tag, ?old, new = ?handler, "Handler overridden");
        }
        previous
    }

    pub fn route(&self, tag: &str) -> Option<H> {
        self.routes.get(tag).copied()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<H: Copy + std::fmt::Debug> Default for DispatchRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
