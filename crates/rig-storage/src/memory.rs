//! In-memory repository for tests and simulation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::entities::{Algorithm, AlgorithmStep, Batch, Test};
use crate::repository::Repository;

/// [`Repository`] keeping everything in process memory.
#[derive(Default)]
pub struct MemoryRepository {
    algorithms: Mutex<HashMap<i64, Algorithm>>,
    batches: Mutex<HashMap<i64, Batch>>,
    tests: Mutex<Vec<Test>>,
    next_id: AtomicI64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn algorithm_steps(&self, algorithm_id: i64) -> Result<Vec<AlgorithmStep>> {
        let algorithms = self.algorithms.lock();
        let algorithm = algorithms
            .get(&algorithm_id)
            .ok_or_else(|| anyhow!("unknown algorithm id {}", algorithm_id))?;
        let mut steps = algorithm.steps.clone();
        steps.sort_by_key(|step| step.order);
        Ok(steps)
    }

    async fn insert_algorithm(&self, mut algorithm: Algorithm) -> Result<i64> {
        let id = self.allocate_id();
        algorithm.id = id;
        self.algorithms.lock().insert(id, algorithm);
        Ok(id)
    }

    async fn insert_batch(&self, mut batch: Batch) -> Result<i64> {
        let id = self.allocate_id();
        batch.id = id;
        self.batches.lock().insert(id, batch);
        Ok(id)
    }

    async fn insert_test(&self, mut test: Test) -> Result<i64> {
        let id = self.allocate_id();
        test.id = id;
        self.tests.lock().push(test);
        Ok(id)
    }

    async fn tests_for_batch(&self, batch_id: i64) -> Result<Vec<Test>> {
        Ok(self
            .tests
            .lock()
            .iter()
            .filter(|test| test.batch_id == batch_id)
            .cloned()
            .collect())
    }
}
