//! Jax Artifacts Library
//!
//! Governance core of the trading platform: turns a backtest result into an
//! immutable, content-addressed strategy artifact and enforces the approval
//! workflow before the artifact may be used by the live trading runtime.
//!
//! # Architecture
//!
//! ```text
//!   BacktestRun ──► ArtifactBuilder ──► Artifact (SHA-256 sealed)
//!                          │
//!                          ▼
//!                    ArtifactStore (SQLite)
//!          ┌───────────────┼──────────────────┐
//!          ▼               ▼                  ▼
//!   strategy_artifacts  artifact_approvals  artifact_promotions
//!                          ▲                  ▲
//!                          └── update_approval_state (one transaction)
//!
//!   ApprovedArtifactLoader ──► trading runtime (APPROVED / ACTIVE only)
//!   Reconciler ──► artifacts missing approvals, history drift
//! ```
//!
//! # Approval workflow
//!
//! ```text
//!   DRAFT ─► VALIDATED ─► REVIEWED ─► APPROVED ─► ACTIVE ─► DEPRECATED
//!     ▲          │  ▲         │           │          │           │
//!     └──────────┘  └─────────┘(to DRAFT) │          │           │
//!   any non-terminal state ──────────────────────────────────────► REVOKED
//! ```
//!
//! Only APPROVED and ACTIVE artifacts are tradable.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod approval;
pub mod artifact;
pub mod backtest;
pub mod builder;
pub mod canonical;
pub mod context;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod report;
pub mod store;

pub use approval::{Approval, ApprovalState, Promotion};
pub use artifact::{Artifact, DataWindow, RiskProfile, StrategyInfo, ValidationInfo};
pub use backtest::{BacktestMetrics, BacktestRun};
pub use builder::{validation_run_reference, ArtifactBuilder, ArtifactPersister};
pub use context::OpContext;
pub use error::{ArtifactError, CanonicalError, ConstraintViolation, Result};
pub use loader::{ApprovedArtifactLoader, LoadReport, RejectedArtifact};
pub use reconcile::{MissingApproval, ReconciliationReport, Reconciler};
pub use report::ValidationReport;
pub use store::{ArtifactStore, HistoryMismatch, PromotionHistoryEntry, StoreStats};
