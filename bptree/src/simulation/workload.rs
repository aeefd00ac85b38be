//! Seeded random workloads checked against an in-memory model.
//!
//! Every operation is applied to both the index and a `BTreeMap`. Results
//! must agree. With fault injection on, a failed operation must leave both
//! the tree and the backend exactly as they were, so the model is simply
//! not updated. Faults are switched off while checkpoints verify the tree.

#![allow(clippy::disallowed_methods)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::invariants::{InvariantChecker, InvariantViolation, NodeShape, TreeShape};
use crate::config::SessionMode;
use crate::error::IndexError;
use crate::storage::{FaultConfig, MemoryIndexStorage};
use crate::testing::{TestIndex, init_tracing, keys_of, shared_index};
use crate::tree::iter::Order;

/// Configuration of one workload run.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub seed: u64,
    pub degree: usize,
    pub session_mode: SessionMode,
    pub operations: usize,
    /// Keys are drawn from `1..=key_space`.
    pub key_space: i64,
    pub fault_config: FaultConfig,
    /// Operations between full checks.
    pub checkpoint_every: usize,
}

impl WorkloadConfig {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            degree: 4,
            session_mode: SessionMode::Buffered,
            operations: 500,
            key_space: 200,
            fault_config: FaultConfig::no_faults(),
            checkpoint_every: 50,
        }
    }

    #[must_use]
    pub const fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    #[must_use]
    pub const fn with_session_mode(mut self, mode: SessionMode) -> Self {
        self.session_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_operations(mut self, operations: usize) -> Self {
        self.operations = operations;
        self
    }

    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }
}

/// Outcome of a workload run.
#[derive(Debug, Default)]
pub struct WorkloadResult {
    pub operations: usize,
    /// Operations that failed on an injected fault.
    pub failed_operations: usize,
    pub invariant_violations: Vec<InvariantViolation>,
}

impl WorkloadResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Add(i64, i64),
    AddOrUpdate(i64, i64),
    Update(i64, i64),
    Remove(i64),
    Get(i64),
}

pub struct Workload {
    config: WorkloadConfig,
    rng: StdRng,
    storage: Arc<MemoryIndexStorage>,
    index: TestIndex,
    model: BTreeMap<i64, i64>,
    result: WorkloadResult,
}

impl Workload {
    #[must_use]
    pub fn new(config: WorkloadConfig) -> Self {
        init_tracing();
        let storage = Arc::new(MemoryIndexStorage::with_faults(
            config.seed,
            config.fault_config.clone(),
        ));
        let index = shared_index(&storage, 7, config.degree, config.session_mode);
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            storage,
            index,
            model: BTreeMap::new(),
            result: WorkloadResult::default(),
        }
    }

    #[must_use]
    pub fn run(mut self) -> WorkloadResult {
        for step in 0..self.config.operations {
            let op = self.next_op(step);
            self.apply(step, op);
            if (step + 1) % self.config.checkpoint_every == 0 {
                self.checkpoint(step);
            }
        }
        self.checkpoint(self.config.operations);
        self.result
    }

    fn next_op(&mut self, step: usize) -> Op {
        let key = self.rng.random_range(1..=self.config.key_space);
        let value = key * 1000 + i64::try_from(step).unwrap_or(0);
        match self.rng.random_range(0..10) {
            0..=2 => Op::Add(key, value),
            3 => Op::AddOrUpdate(key, value),
            4 => Op::Update(key, value),
            5..=7 => Op::Remove(key),
            _ => Op::Get(key),
        }
    }

    fn violation(&mut self, step: usize, description: &str, context: String) {
        self.result.invariant_violations.push(InvariantViolation {
            description: format!("step {step}: {description}"),
            context,
        });
    }

    fn apply(&mut self, step: usize, op: Op) {
        self.result.operations += 1;
        let outcome = match op {
            Op::Add(key, value) => {
                match (self.index.add(key, value), self.model.contains_key(&key)) {
                    (Ok(_), false) => {
                        self.model.insert(key, value);
                        Ok(())
                    }
                    (Err(IndexError::KeyExists), true) => Ok(()),
                    (other, present) => {
                        Err((other.map(|_| ()), format!("add present={present}")))
                    }
                }
            }
            Op::AddOrUpdate(key, value) => match self.index.add_or_update(key, value) {
                Ok(_) => {
                    self.model.insert(key, value);
                    Ok(())
                }
                Err(error) => Err((Err(error), "add_or_update".to_string())),
            },
            Op::Update(key, value) => {
                match (self.index.update(&key, &value), self.model.contains_key(&key)) {
                    (Ok(()), true) => {
                        self.model.insert(key, value);
                        Ok(())
                    }
                    (Err(IndexError::KeyMissing), false) => Ok(()),
                    (other, present) => Err((other, format!("update present={present}"))),
                }
            }
            Op::Remove(key) => match self.index.remove(&key) {
                Ok(removed) if removed == self.model.remove(&key).is_some() => Ok(()),
                other => Err((other.map(|_| ()), "remove".to_string())),
            },
            Op::Get(key) => match self.index.get(&key) {
                Ok(found) if found == self.model.get(&key).copied() => Ok(()),
                other => Err((other.map(|_| ()), "get".to_string())),
            },
        };

        if let Err((result, context)) = outcome {
            match result {
                Err(IndexError::InternalOperationFailure(_)) => self.result.failed_operations += 1,
                other => self.violation(
                    step,
                    "index disagrees with model",
                    format!("{op:?} {context}: {other:?}"),
                ),
            }
        }
    }

    fn checkpoint(&mut self, step: usize) {
        let faults = self.config.fault_config.clone();
        if self.storage.set_fault_config(FaultConfig::no_faults()).is_err() {
            self.violation(step, "backend lock poisoned", String::new());
            return;
        }

        match TreeShape::capture(&self.index) {
            Ok(shape) => self.check_shape(step, &shape),
            Err(error) => self.violation(step, "capture failed", error.to_string()),
        }

        let expected: Vec<_> = self.model.keys().copied().collect();
        let keys = keys_of(&self.index);
        if keys != expected {
            self.violation(step, "ascending keys differ from model", format!("{keys:?}"));
        }
        let mut descending: Vec<_> = self
            .index
            .iter(Order::Descending)
            .filter_map(Result::ok)
            .map(|(key, _)| key)
            .collect();
        descending.reverse();
        if descending != expected {
            let context = format!("{descending:?}");
            self.violation(step, "descending keys differ from model", context);
        }
        if self.index.size().ok() != Some(self.model.len()) {
            let context = format!("{:?}", self.index.size());
            self.violation(step, "size differs from model", context);
        }
        for (key, value) in &self.model {
            let found = self.index.get(key);
            if found.as_ref().ok() != Some(&Some(*value)) {
                let context = format!("{key}: {found:?}, expected {value}");
                self.violation(step, "value differs from model", context);
                break;
            }
        }

        if self.storage.set_fault_config(faults).is_err() {
            self.violation(step, "backend lock poisoned", String::new());
        }
    }

    fn check_shape(&mut self, step: usize, shape: &TreeShape<i64>) {
        let mut checker = InvariantChecker::new();
        checker.check(shape);
        for violation in checker.violations() {
            self.violation(step, &violation.description, violation.context.clone());
        }

        let reachable = shape.root.as_ref().map_or(0, count_nodes);
        match self.storage.node_count(self.index.index_id()) {
            Ok(stored) if stored == reachable => {}
            other => self.violation(
                step,
                "stored nodes differ from reachable nodes",
                format!("reachable {reachable}, stored {other:?}"),
            ),
        }
    }
}

fn count_nodes(node: &NodeShape<i64>) -> usize {
    match node {
        NodeShape::Leaf { .. } => 1,
        NodeShape::Internal { children, .. } => {
            1 + children.iter().map(count_nodes).sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passed(result: &WorkloadResult) {
        assert!(result.passed(), "violations: {:#?}", result.invariant_violations);
    }

    #[test]
    fn test_random_workload_across_degrees() {
        for degree in 3..=8 {
            for mode in [SessionMode::Buffered, SessionMode::Immediate] {
                let seed = u64::try_from(degree).expect("degree") * 31;
                let config = WorkloadConfig::new(seed)
                    .with_degree(degree)
                    .with_session_mode(mode);
                let result = Workload::new(config).run();
                assert_eq!(result.failed_operations, 0);
                assert_passed(&result);
            }
        }
    }

    #[test]
    fn test_random_workload_is_reproducible() {
        let run = |seed| {
            let workload = Workload::new(WorkloadConfig::new(seed).with_operations(300));
            let storage = Arc::clone(&workload.storage);
            let result = workload.run();
            assert_passed(&result);
            storage.stats().expect("stats")
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_failed_operations_leave_no_trace() {
        for seed in [1, 2, 3] {
            let config = WorkloadConfig::new(seed)
                .with_degree(4)
                .with_operations(800)
                .with_fault_config(FaultConfig::io_faults(0.02));
            let result = Workload::new(config).run();
            assert!(result.failed_operations > 0, "no faults were injected");
            assert_passed(&result);
        }
    }
}
