//! Pipeline graph builder and the immutable graph it produces

use crate::core::error::{GraphError, ValidationIssue};
use crate::core::step::Step;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Accumulates steps and ordering edges
///
/// Nothing is executed here; [`PipelineBuilder::finalize`] validates the
/// whole graph and hands back an immutable [`PipelineGraph`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    parameters: IndexMap<String, Value>,
    steps: IndexMap<String, Step>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
            steps: IndexMap::new(),
        }
    }

    /// Declare a pipeline parameter and its default value
    pub fn add_parameter(&mut self, name: impl Into<String>, default: Value) -> Result<(), GraphError> {
        let name = name.into();
        if self.parameters.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        self.parameters.insert(name, default);
        Ok(())
    }

    /// Add a step; its own `dependencies` are checked at finalize time
    pub fn add_step(&mut self, step: Step) -> Result<(), GraphError> {
        if self.steps.contains_key(&step.name) {
            return Err(GraphError::DuplicateName(step.name));
        }
        debug!(step = %step.name, "adding step");
        self.steps.insert(step.name.clone(), step);
        Ok(())
    }

    /// Make `to` run after `from`
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        for name in [from, to] {
            if !self.steps.contains_key(name) {
                return Err(GraphError::UnknownStep(name.to_string()));
            }
        }

        if let Some(path) = self.path_between(to, from) {
            let mut cycle = vec![from.to_string()];
            cycle.extend(path);
            return Err(GraphError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
                path: cycle,
            });
        }

        if let Some(step) = self.steps.get_mut(to) {
            step.dependencies.insert(from.to_string());
        }
        Ok(())
    }

    /// Number of steps added so far
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Shortest path `start -> ... -> goal` along "runs before" edges
    fn path_between(&self, start: &str, goal: &str) -> Option<Vec<String>> {
        let dependents = dependents_of(&self.steps);
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while let Some(&prev) = previous.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }

            for &next in dependents.get(current).into_iter().flatten() {
                if seen.insert(next) {
                    previous.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        None
    }

    /// Validate everything and freeze the graph
    ///
    /// Every unresolved reference and every cycle is reported, not only
    /// the first one. A parameter reading another step's output makes that
    /// step an implicit dependency.
    pub fn finalize(mut self) -> Result<PipelineGraph, GraphError> {
        let mut issues = Vec::new();
        let known: HashSet<String> = self.steps.keys().cloned().collect();

        for step in self.steps.values_mut() {
            for dependency in &step.dependencies {
                if !known.contains(dependency) {
                    issues.push(ValidationIssue::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            let mut implicit = Vec::new();
            for (parameter, upstream) in step.upstream_references() {
                if known.contains(upstream) {
                    implicit.push(upstream.to_string());
                } else {
                    issues.push(ValidationIssue::UnknownUpstream {
                        step: step.name.clone(),
                        parameter: parameter.to_string(),
                        upstream: upstream.to_string(),
                    });
                }
            }

            for (parameter, name) in step.pipeline_parameter_references() {
                if !self.parameters.contains_key(name) {
                    issues.push(ValidationIssue::UnknownPipelineParameter {
                        step: step.name.clone(),
                        parameter: parameter.to_string(),
                        name: name.to_string(),
                    });
                }
            }

            step.dependencies.extend(implicit);
        }

        for path in find_cycles(&self.steps) {
            issues.push(ValidationIssue::Cycle { path });
        }

        if !issues.is_empty() {
            return Err(GraphError::Validation(issues));
        }

        let execution_order = topological_order(&self.steps);
        let dependents: HashMap<String, Vec<String>> = dependents_of(&self.steps)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into_iter().map(str::to_string).collect::<Vec<_>>()))
            .collect();

        debug!(pipeline = %self.name, steps = self.steps.len(), "pipeline finalized");

        Ok(PipelineGraph {
            name: self.name,
            parameters: self.parameters,
            steps: self.steps,
            execution_order,
            dependents,
        })
    }
}

/// step -> steps that list it as a dependency, in insertion order
fn dependents_of(steps: &IndexMap<String, Step>) -> HashMap<&str, Vec<&str>> {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps.values() {
        for dependency in &step.dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(step.name.as_str());
        }
    }
    dependents
}

/// Every distinct dependency cycle, each starting at its first-inserted step
fn find_cycles(steps: &IndexMap<String, Step>) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        index: usize,
        steps: &IndexMap<String, Step>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        found: &mut IndexSet<Vec<usize>>,
    ) {
        marks[index] = Mark::OnStack;
        stack.push(index);

        if let Some((_, step)) = steps.get_index(index) {
            for dependency in &step.dependencies {
                let Some(next) = steps.get_index_of(dependency) else {
                    continue;
                };
                let mark = marks[next];
                match mark {
                    Mark::Unvisited => visit(next, steps, marks, stack, found),
                    Mark::OnStack => {
                        let start = stack.iter().position(|&i| i == next).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start..].to_vec();
                        // stack runs against the edge direction; flip to "runs before" order
                        cycle.reverse();
                        let min = cycle
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, i)| **i)
                            .map(|(pos, _)| pos)
                            .unwrap_or(0);
                        cycle.rotate_left(min);
                        found.insert(cycle);
                    }
                    Mark::Done => {}
                }
            }
        }

        stack.pop();
        marks[index] = Mark::Done;
    }

    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut stack = Vec::new();
    let mut found = IndexSet::new();
    for index in 0..steps.len() {
        if marks[index] == Mark::Unvisited {
            visit(index, steps, &mut marks, &mut stack, &mut found);
        }
    }

    found
        .into_iter()
        .map(|cycle| {
            let mut path: Vec<String> = cycle
                .iter()
                .filter_map(|&i| steps.get_index(i).map(|(name, _)| name.clone()))
                .collect();
            if let Some(first) = path.first().cloned() {
                path.push(first);
            }
            path
        })
        .collect()
}

/// Kahn's algorithm; ties go to the step added first
fn topological_order(steps: &IndexMap<String, Step>) -> Vec<String> {
    let mut remaining: Vec<usize> = steps
        .values()
        .map(|step| step.dependencies.len())
        .collect();
    let dependents = dependents_of(steps);

    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| index)
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(index) = ready.pop_first() {
        let Some((name, _)) = steps.get_index(index) else {
            continue;
        };
        order.push(name.clone());

        for dependent in dependents.get(name.as_str()).into_iter().flatten() {
            if let Some(d) = steps.get_index_of(*dependent) {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }
    }

    order
}

/// A validated, immutable pipeline DAG
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    parameters: IndexMap<String, Value>,
    steps: IndexMap<String, Step>,
    execution_order: Vec<String>,
    dependents: HashMap<String, Vec<String>>,
}

impl PipelineGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared pipeline parameters with their defaults
    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.parameters
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Steps in insertion order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Topological order, ties broken by insertion order
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Steps that directly depend on `name`
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every step that directly or transitively depends on `name`
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        seen.into_iter().collect()
    }
}
