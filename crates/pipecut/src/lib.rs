//! Pipeline-parallel program partitioning and cross-stage liveness
//! scheduling.
//!
//! Takes a linear IR program whose operators carry forward/backward/optimize
//! role tags, splits it into sub-programs runnable as independent pipeline
//! jobs, computes per job instance the minimal set of variables that must
//! survive its completion, and rewrites communication operators with the
//! cross-stream ordering the executor needs.

pub mod analysis;
pub mod ir;
pub mod passes;
pub mod schedule;

pub use ir::{AttrValue, Block, OpRole, Operator, Program, VarDesc};
pub use passes::{program_for_pipeline, prune_program, split_program, SyncStrategy};
pub use schedule::{set_skip_gc_vars, Job};
