//! Executor selection strategies.
//!
//! A strategy picks one executor out of the already-filtered healthy
//! candidates. Strategies are called concurrently from multiple in-flight
//! planning cycles, so their cursors and counters are synchronized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::executor::ExecutorInfo;

/// Policy for choosing which healthy executor handles a given node.
pub trait SelectionStrategy: Send + Sync {
  /// Pick one of `candidates`. `None` only when the slice is empty.
  fn select(&self, candidates: &[ExecutorInfo]) -> Option<ExecutorInfo>;

  /// A task was dispatched to the executor.
  fn on_dispatched(&self, _executor_id: &str) {}

  /// A previously dispatched task finished (successfully or not).
  fn on_finished(&self, _executor_id: &str) {}
}

/// Cyclic cursor over the candidate list, advancing on each selection.
#[derive(Default)]
pub struct RoundRobin {
  cursor: AtomicUsize,
}

impl RoundRobin {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SelectionStrategy for RoundRobin {
  fn select(&self, candidates: &[ExecutorInfo]) -> Option<ExecutorInfo> {
    if candidates.is_empty() {
      return None;
    }
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
    Some(candidates[index].clone())
  }
}

/// Uniform random pick.
#[derive(Default)]
pub struct Random;

impl Random {
  pub fn new() -> Self {
    Self
  }
}

impl SelectionStrategy for Random {
  fn select(&self, candidates: &[ExecutorInfo]) -> Option<ExecutorInfo> {
    if candidates.is_empty() {
      return None;
    }
    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates[index].clone())
  }
}

/// Tracks an in-flight task counter per executor and picks the minimum.
#[derive(Default)]
pub struct LeastLoad {
  in_flight: Mutex<HashMap<String, usize>>,
}

impl LeastLoad {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current in-flight count for an executor (0 if never seen).
  pub fn load_of(&self, executor_id: &str) -> usize {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(executor_id)
      .copied()
      .unwrap_or(0)
  }
}

impl SelectionStrategy for LeastLoad {
  fn select(&self, candidates: &[ExecutorInfo]) -> Option<ExecutorInfo> {
    let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    candidates
      .iter()
      .min_by_key(|e| in_flight.get(&e.executor_id).copied().unwrap_or(0))
      .cloned()
  }

  fn on_dispatched(&self, executor_id: &str) {
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    *in_flight.entry(executor_id.to_string()).or_insert(0) += 1;
  }

  fn on_finished(&self, executor_id: &str) {
    let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(count) = in_flight.get_mut(executor_id) {
      *count = count.saturating_sub(1);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use crate::executor::CommunicationType;

  use super::*;

  fn executor(id: &str) -> ExecutorInfo {
    ExecutorInfo {
      executor_id: id.to_string(),
      executor_type: "generic".to_string(),
      communication_type: CommunicationType::InProcess,
      endpoint: format!("mem://{id}"),
      timeout_ms: None,
      metadata: HashMap::new(),
    }
  }

  #[test]
  fn round_robin_cycles_in_order() {
    let strategy = RoundRobin::new();
    let candidates = vec![executor("e1"), executor("e2"), executor("e3")];

    let picks: Vec<String> = (0..6)
      .map(|_| strategy.select(&candidates).unwrap().executor_id)
      .collect();
    assert_eq!(picks, vec!["e1", "e2", "e3", "e1", "e2", "e3"]);
  }

  #[test]
  fn round_robin_empty_candidates_is_none() {
    let strategy = RoundRobin::new();
    assert!(strategy.select(&[]).is_none());
  }

  #[test]
  fn random_pick_stays_in_candidates() {
    let strategy = Random::new();
    let candidates = vec![executor("e1"), executor("e2")];
    for _ in 0..32 {
      let pick = strategy.select(&candidates).unwrap();
      assert!(pick.executor_id == "e1" || pick.executor_id == "e2");
    }
  }

  #[test]
  fn least_load_picks_minimum_and_tracks_completion() {
    let strategy = LeastLoad::new();
    let candidates = vec![executor("e1"), executor("e2")];

    let first = strategy.select(&candidates).unwrap();
    strategy.on_dispatched(&first.executor_id);

    // The other executor now has the lower count.
    let second = strategy.select(&candidates).unwrap();
    assert_ne!(first.executor_id, second.executor_id);
    strategy.on_dispatched(&second.executor_id);

    strategy.on_finished(&first.executor_id);
    assert_eq!(strategy.load_of(&first.executor_id), 0);
    assert_eq!(strategy.load_of(&second.executor_id), 1);

    let third = strategy.select(&candidates).unwrap();
    assert_eq!(third.executor_id, first.executor_id);
  }

  #[test]
  fn least_load_finish_never_underflows() {
    let strategy = LeastLoad::new();
    strategy.on_finished("e1");
    assert_eq!(strategy.load_of("e1"), 0);
  }
}
