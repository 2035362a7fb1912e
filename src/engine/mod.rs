//! The analysis engine: search, trace and per-template evaluation.
//!
//! Evaluation of one template against one application proceeds in a fixed order:
//!
//! 1. Manifest conditions, through a [`ManifestMatcher`]
//! 2. `SEARCH` rules, through the [`SearchEngine`]
//! 3. `TRACE` rules, through the [`TraceEngine`], skipped if a search failed
//!
//! All three share one [`crate::links::LinkTable`], so values bound by an earlier step can
//! be referenced by a later one.
//!
//! # Key Components
//!
//! - [`BugEvaluator`] - Evaluates templates against one application
//! - [`SearchEngine`] - Existence and call-site searches
//! - [`TraceEngine`] - Call-graph and data-flow tracing
//! - [`AppReport`], [`BugVerdict`] - Results

mod evaluator;
mod report;
mod search;
pub mod trace;

pub use evaluator::{BugEvaluator, Evaluation, GraphExporter, ManifestMatcher};
pub use report::{AppReport, BugVerdict};
pub use search::SearchEngine;
pub use trace::{StopCondition, TraceEngine, TraceOutcome};
