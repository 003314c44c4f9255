//! Derived completion percentages.

use crate::models::{Phase, Task};

/// Percentage of done tasks, rounded. Zero for an empty phase.
pub fn phase_progress(tasks: &[Task]) -> i32 {
  if tasks.is_empty() {
    return 0;
  }
  let done = tasks.iter().filter(|t| t.is_done()).count();
  (100.0 * done as f64 / tasks.len() as f64).round() as i32
}

/// Weighted mean of phase progress, rounded.
///
/// Falls back to a plain mean when no phase carries a weight.
pub fn project_progress(phases: &[Phase]) -> i32 {
  if phases.is_empty() {
    return 0;
  }

  let total_weight: f64 = phases.iter().map(|p| p.weight.max(0.0)).sum();
  let mean = if total_weight > 0.0 {
    phases
      .iter()
      .map(|p| p.progress as f64 * p.weight.max(0.0))
      .sum::<f64>()
      / total_weight
  } else {
    phases.iter().map(|p| p.progress as f64).sum::<f64>() / phases.len() as f64
  };
  mean.round() as i32
}

#[cfg(test)]
mod tests {
  use super::*;

  fn task(status: &str) -> Task {
    Task {
      status: status.to_string(),
      ..Task::new("p1", "t")
    }
  }

  fn phase(progress: i32, weight: f64) -> Phase {
    Phase {
      progress,
      ..Phase::new("p1", "ph", weight)
    }
  }

  #[test]
  fn test_phase_progress_counts_done_tasks() {
    let tasks = vec![task("done"), task("todo"), task("in_progress"), task("todo")];
    assert_eq!(phase_progress(&tasks), 25);
  }

  #[test]
  fn test_completed_counts_as_done() {
    assert_eq!(phase_progress(&[task("completed"), task("todo"), task("todo")]), 33);
  }

  #[test]
  fn test_empty_phase_has_no_progress() {
    assert_eq!(phase_progress(&[]), 0);
  }

  #[test]
  fn test_project_progress_is_weighted() {
    assert_eq!(project_progress(&[phase(25, 50.0), phase(75, 50.0)]), 50);
    assert_eq!(project_progress(&[phase(100, 3.0), phase(0, 1.0)]), 75);
  }

  #[test]
  fn test_unweighted_phases_use_plain_mean() {
    assert_eq!(project_progress(&[phase(20, 0.0), phase(60, 0.0)]), 40);
    assert_eq!(project_progress(&[]), 0);
  }
}
