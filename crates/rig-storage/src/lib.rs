//! Persisted entities and the storage collaborator.
//!
//! The relational engine behind the rig is an external collaborator; the
//! control core only needs the entity shapes and a narrow [`Repository`]
//! contract: read the ordered steps of an algorithm, persist a finished
//! test aggregate, and basic batch CRUD. [`MemoryRepository`] implements
//! the contract in memory for tests and simulation.

pub mod entities;
pub mod memory;
pub mod repository;

pub use entities::{
    Algorithm, AlgorithmStep, Batch, ElectroStatic, Humidity, Photo, Temperature, Test,
    TestStep, Weight,
};
pub use memory::MemoryRepository;
pub use repository::Repository;
