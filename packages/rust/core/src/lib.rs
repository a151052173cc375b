//! Pipeline stages and orchestration for the opengov document pipeline.
//!
//! The four stages are each exposed as standalone operations (`ingest`,
//! `canonicalize`, `enrich`, `materialize`) so they can run independently,
//! and [`pipeline::run_pipeline`] chains them end to end. Every stage is a
//! pure function of database state: re-running a stage, or running it after
//! a crash mid-batch, converges on the same final state.

pub mod canonicalize;
pub mod enrich;
pub mod ingest;
pub mod materialize;
pub mod pipeline;

pub use canonicalize::CanonicalizeReport;
pub use enrich::{EnrichOptions, EnrichReport};
pub use ingest::IngestReport;
pub use materialize::MaterializeReport;
pub use pipeline::{PipelineOptions, PipelineReport, ProgressReporter, SilentProgress, run_pipeline};
