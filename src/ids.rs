//! Node identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of unique node ids.
///
/// Shared between documents and change handlers, so generation goes through `&self`.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Sequential ids of the form `{prefix}{n}{postfix}`.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    postfix: String,
    count: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            postfix: String::new(),
            count: AtomicU64::new(0),
        }
    }

    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = postfix.into();
        self
    }

    /// First number handed out.
    pub fn starting_at(self, start: u64) -> Self {
        self.count.store(start, Ordering::Relaxed);
        self
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        format!("{}{}{}", self.prefix, n, self.postfix)
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sequential_ids() {
        let ids = SequentialIds::new("n-");
        assert_eq!(ids.next_id(), "n-0");
        assert_eq!(ids.next_id(), "n-1");
        assert_eq!(ids.next_id(), "n-2");
    }

    #[test]
    fn sequential_ids_with_postfix_and_start() {
        let ids = SequentialIds::new("item").with_postfix("x").starting_at(10);
        assert_eq!(ids.next_id(), "item10x");
        assert_eq!(ids.next_id(), "item11x");
    }

    #[test]
    fn random_ids_are_unique() {
        let ids = RandomIds;
        let generated: HashSet<String> = (0..100).map(|_| ids.next_id()).collect();
        assert_eq!(generated.len(), 100);
    }
}
