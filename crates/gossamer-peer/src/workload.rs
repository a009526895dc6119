//! Sources of new tasks.

use rand::{Rng, RngCore};
use serde_json::json;

/// Ability list and payload for a task about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub abilities: Vec<String>,
    pub payload: serde_json::Value,
}

/// Produces the tasks a peer originates when its queue is empty.
pub trait Workload: Send + Sync {
    /// `None` skips this round.
    fn next_task(&mut self, rng: &mut dyn RngCore) -> Option<TaskDraft>;
}

/// Emits `{"random": n}` with `n` in `1..=100`, tagged with a fixed list
/// of abilities.
#[derive(Debug, Clone)]
pub struct RandomWorkload {
    abilities: Vec<String>,
}

impl RandomWorkload {
    pub fn new<I, S>(abilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            abilities: abilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl Workload for RandomWorkload {
    fn next_task(&mut self, rng: &mut dyn RngCore) -> Option<TaskDraft> {
        let value: u32 = rng.gen_range(1..=100);
        Some(TaskDraft {
            abilities: self.abilities.clone(),
            payload: json!({ "random": value }),
        })
    }
}

/// Never originates tasks. The peer still executes and relays others'.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleWorkload;

impl Workload for IdleWorkload {
    fn next_task(&mut self, _rng: &mut dyn RngCore) -> Option<TaskDraft> {
        None
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_random_workload_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut workload = RandomWorkload::new(["sum"]);
        for _ in 0..200 {
            let draft = workload.next_task(&mut rng).unwrap();
            assert_eq!(draft.abilities, vec!["sum".to_string()]);
            let n = draft.payload["random"].as_u64().unwrap();
            assert!((1..=100).contains(&n));
        }
    }

    #[test]
    fn test_idle_workload_never_emits() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(IdleWorkload.next_task(&mut rng).is_none());
    }
}
