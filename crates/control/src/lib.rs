//! Control-plane access.
//!
//! The control plane owns all durable rows (runs, traces, approvals,
//! threads, prompts, artifacts, checkpoints); this crate is the core's
//! only way to reach them: a typed HTTP client ([`client`]), the
//! fire-and-forget trace buffer ([`traces`]), and the retention sweeper
//! ([`retention`]).

pub mod client;
pub mod retention;
pub mod traces;

pub use client::{ControlPlaneClient, ResolveOutcome};
pub use traces::TraceBuffer;
