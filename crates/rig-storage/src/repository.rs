//! The storage collaborator contract.

use anyhow::Result;
use async_trait::async_trait;

use crate::entities::{Algorithm, AlgorithmStep, Batch, Test};

/// Narrow CRUD surface the control core needs from the storage engine.
///
/// The orchestrator reads the ordered steps of an algorithm before a run
/// and persists the frozen test aggregate when the run finishes; batch
/// bookkeeping exists so a test lands under its sample.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Steps of an algorithm, ordered by their configured position.
    async fn algorithm_steps(&self, algorithm_id: i64) -> Result<Vec<AlgorithmStep>>;

    /// Store an algorithm, returning its id.
    async fn insert_algorithm(&self, algorithm: Algorithm) -> Result<i64>;

    /// Store a batch, returning its id.
    async fn insert_batch(&self, batch: Batch) -> Result<i64>;

    /// Persist a finished test aggregate, returning its id.
    async fn insert_test(&self, test: Test) -> Result<i64>;

    /// All tests recorded for a batch.
    async fn tests_for_batch(&self, batch_id: i64) -> Result<Vec<Test>>;
}
