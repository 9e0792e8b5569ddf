#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Lattice Core Rust
//!
//! Cross-store transaction coordination and workflow orchestration.
//!
//! ## Overview
//!
//! Lattice synthesizes atomicity across heterogeneous storage backends (a
//! relational database, a document store, and a cache) that share no native
//! transaction protocol. A two-phase commit coordinator drives adapters that
//! can vote; backends that cannot hold a pending write (the cache) execute
//! eagerly and are undone through captured compensating operations.
//!
//! Layered on top is an immutable state engine: every change to a subject
//! produces a new [`engine::State`] with a monotonically increasing sequence
//! number, and a [`engine::WorkflowDriver`] walks a declarative transition
//! table, executing actions whose storage effects ride inside a single
//! coordinated transaction per step.
//!
//! ## Module Organization
//!
//! - [`adapter`] - Backend adapters (relational, document, cache) and the pool
//! - [`transaction`] - Coordinator, operation log, phases, reconciliation
//! - [`engine`] - Immutable state, actions, transition tables, the driver
//! - [`persister`] - Optimistic-concurrency state persistence
//! - [`uow`] - Unit of work handed to actions
//! - [`events`] - Lifecycle event publishing
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`testing`] - In-memory backends and fault injection for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lattice_core::adapter::CacheAdapter;
//! use lattice_core::config::CoreConfig;
//! use lattice_core::events::EventPublisher;
//! use lattice_core::transaction::{ReconciliationQueue, TransactionCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::default();
//! let coordinator = TransactionCoordinator::new(
//!     config.transaction.clone(),
//!     EventPublisher::default(),
//!     Arc::new(ReconciliationQueue::new(EventPublisher::default())),
//! );
//! coordinator.register(Arc::new(CacheAdapter::local("cache"))).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! A transaction either commits on every participant or leaves no durable
//! trace on any of them, with one honest exception: a commit acknowledgment
//! lost after unanimous yes votes parks the transaction as indeterminate in
//! the reconciliation queue rather than guessing an outcome.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod persister;
pub mod testing;
pub mod transaction;
pub mod uow;

pub use adapter::{Adapter, AdapterError, AdapterId, AdapterPool, BackendKind};
pub use config::CoreConfig;
pub use engine::{Action, ActionResult, ExecutionContext, State, WorkflowDriver};
pub use error::{CoreError, Result};
pub use persister::StatePersister;
pub use transaction::{TransactionCoordinator, TransactionError, TransactionPhase};
pub use uow::UnitOfWork;
