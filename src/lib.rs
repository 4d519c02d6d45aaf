//! # Burrow
//!
//! Recursive task-decomposition engine.
//!
//! A tree of nodes, each owning an isolated workspace, splits a task into
//! subtasks delegated to children, validates produced artifacts by running
//! their tests in a sandboxed subprocess, and retries failing children with
//! the accumulated failure context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         ROOT NODE (depth 0, 300s)                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │  Workspace   │  │ Attempt Log  │  │ Dependencies │               │
//! │  └──────────────┘  └──────────────┘  └──────────────┘               │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │  timeout / 2
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │  task_a     │     │  task_b     │     │  task_c     │
//!   │ (depth 1)   │     │ (depth 1)   │     │ (depth 1)   │
//!   └──────┬──────┘     └──────┬──────┘     └─────────────┘
//!          │                   │
//!     ┌────┴────┐         ┌────┴────┐
//!     ▼         ▼         ▼         ▼
//!   ┌────┐   ┌────┐     ┌────┐   ┌────┐
//!   │a_1 │   │a_2 │     │b_1 │   │b_2 │   ◀── Worker + SandboxRunner
//!   └────┘   └────┘     └────┘   └────┘        driven by RetryOrchestrator
//! ```
//!
//! ## Key Concepts
//!
//! - **Node**: A unit of work with its own workspace, timeout and retry budget
//! - **Worker**: The external collaborator that writes artifacts and tests
//! - **Validator**: Runs a node's tests and reports an [`ExecutionOutcome`]
//! - **Attempt**: One recorded retry iteration, kept per [`NodePath`]

pub mod config;
pub mod deps;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod history;
pub mod ident;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod sandbox;
pub mod tree;
pub mod worker;
pub mod workspace;

pub use config::{BurrowConfig, ConfigError, ConfigLoader};
pub use diagnostics::{DiagnosticsBundle, ProgressReport};
pub use error::{BurrowError, FailureKind};
pub use events::{EventSink, EventStream, TreeEvent};
pub use hierarchy::TreeSnapshot;
pub use history::{AttemptDraft, AttemptLog, AttemptRecord};
pub use ident::{canonicalize, NodeId, NodePath};
pub use node::{Node, NodeHandle, NodeStatus};
pub use orchestrator::{compose_retry_task, RetryOrchestrator, RetryOutcome};
pub use registry::ManagedRegistry;
pub use sandbox::{ExecutionOutcome, SandboxRunner, Validator};
pub use tree::{ChildSpec, DecompositionPlan, TaskTree};
pub use worker::{Worker, WorkerReport};
pub use workspace::{FsWorkspace, MemoryWorkspace, NodeLog, WorkspaceKey, WorkspaceStore};
