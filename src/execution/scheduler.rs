//! Execution scheduler - determines which steps to run next

use crate::core::{PipelineGraph, StepPhase};
use indexmap::IndexMap;

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Parallel
    }
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of steps to start, in execution order
    ///
    /// A step is ready when it is pending and every dependency succeeded.
    pub fn next_steps(&self, graph: &PipelineGraph, phases: &IndexMap<String, StepPhase>) -> Vec<String> {
        let active = phases.values().filter(|phase| phase.is_active()).count();
        let capacity = match self.strategy {
            SchedulingStrategy::Sequential => 1usize.saturating_sub(active),
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => max.max(1).saturating_sub(active),
        };

        if capacity == 0 {
            return vec![];
        }

        graph
            .execution_order()
            .iter()
            .filter(|name| phases.get(*name) == Some(&StepPhase::Pending))
            .filter(|name| {
                graph.step(name).is_some_and(|step| {
                    step.dependencies_satisfied(|dep| phases.get(dep) == Some(&StepPhase::Succeeded))
                })
            })
            .take(capacity)
            .cloned()
            .collect()
    }

    /// Pending steps that can never run, with the reason
    ///
    /// A step is blocked when a dependency failed, timed out or was
    /// skipped. Steps are visited in execution order so skips cascade
    /// down the whole graph in one call.
    pub fn blocked_steps(&self, graph: &PipelineGraph, phases: &IndexMap<String, StepPhase>) -> Vec<(String, String)> {
        let mut blocked: Vec<(String, String)> = Vec::new();

        for name in graph.execution_order() {
            if phases.get(name) != Some(&StepPhase::Pending) {
                continue;
            }
            let Some(step) = graph.step(name) else {
                continue;
            };

            let cause = step.dependencies.iter().find_map(|dep| {
                if blocked.iter().any(|(skipped, _)| skipped == dep) {
                    return Some(format!("upstream step '{}' was skipped", dep));
                }
                match phases.get(dep) {
                    Some(phase) if phase.blocks_dependents() => {
                        Some(format!("upstream step '{}' {}", dep, phase))
                    }
                    _ => None,
                }
            });

            if let Some(reason) = cause {
                blocked.push((name.clone(), reason));
            }
        }

        blocked
    }
}
