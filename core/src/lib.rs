//! crossrisk-core: privacy-preserving cross-source risk aggregation.
//!
//! Two independently-owned record sets (a banking feed and an insurance
//! feed) share a pseudonymous customer key. The core joins them, publishes
//! k-anonymous aggregated risk segments, maintains derived views over the
//! published snapshot, and orchestrates the whole refresh pipeline as a
//! DAG of jobs with compliance auditing in the middle.
//!
//! Layering, outermost first:
//!   scheduler  — wave executor over the job graph
//!   jobs       — materializer, auditor, derived views, fraud scan
//!   store      — the only module that talks to SQLite
//!
//! Raw per-customer rows live only in the source mirrors; everything a
//! reader can query is aggregated at k >= 3.

pub mod auditor;
pub mod changelog;
pub mod clock;
pub mod derived;
pub mod error;
pub mod event;
pub mod fraud;
pub mod graph;
pub mod job;
pub mod materializer;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod types;
