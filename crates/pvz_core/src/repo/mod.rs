//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the pickup-point repository contract and its error taxonomy.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Write paths re-validate input before SQL mutations.
//! - Repository APIs return classified errors, never raw driver errors.

pub mod error;
pub mod memory_repo;
pub mod pvz_repo;
pub mod sqlite_repo;
