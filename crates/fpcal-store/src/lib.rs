//! # Calibration Store
//!
//! The I/O boundary of the FP calibration engine. The engine reads one
//! snapshot per round (contributions for a rule, reputation records and
//! consistency histories for the contributors) and writes one batch of
//! reputation updates after the round. Everything in between is pure.
//!
//! Two implementations ship with the workspace:
//!
//! | Store | Use |
//! |-------|-----|
//! | [`MemoryStore`] | Tests, embedding, short-lived processes |
//! | [`SledStore`] | Durable single-node deployments and the CLI |
//!
//! Both order concurrent reputation writes by round id, which keeps the
//! round-to-round feedback loop deterministic when rounds for different
//! rules touch the same organization.
//!
//! ## Security Notes
//!
//! - Stores only ever see opaque organization handles.
//! - Read failures surface as [`StoreError`]; they are never mapped to an
//!   empty snapshot, which would be indistinguishable from "no contributors".

pub mod memory;
pub mod models;
pub mod storage;

pub use memory::MemoryStore;
pub use models::{CalibrationStore, Result, StoreError, WriteSummary};
pub use storage::SledStore;
