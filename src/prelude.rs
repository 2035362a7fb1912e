//! # bugscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the bugscope library. Import this module to get quick access to the essential
//! types for template loading, evaluation and parallel analysis.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all bugscope operations
pub use crate::Error;

/// The result type used throughout bugscope
pub use crate::Result;

/// Engine and worker pool configuration
pub use crate::config::EngineConfig;

// ================================================================================================
// Templates
// ================================================================================================

/// Template loading and validation
pub use crate::template::{TemplateParser, TemplateSet};

/// The parsed template model
pub use crate::template::{BugTemplate, BugTemplateRc, CodeSpec, GraphSpec, ManifestSpec};

// ================================================================================================
// Application Index
// ================================================================================================

/// The abstraction over one decoded application, and its in-memory implementation
pub use crate::index::{BytecodeIndex, IndexAdapter, MemoryIndex};

/// Signatures of classes, methods and fields
pub use crate::index::{FieldRef, MethodQuery, MethodRef};

// ================================================================================================
// Evaluation
// ================================================================================================

/// Values bound while evaluating one template
pub use crate::links::LinkTable;

/// Per-template evaluation and its pluggable collaborators
pub use crate::engine::{BugEvaluator, Evaluation, GraphExporter, ManifestMatcher};

/// Search and trace engines
pub use crate::engine::{SearchEngine, StopCondition, TraceEngine, TraceOutcome};

/// Per-application results
pub use crate::engine::{AppReport, BugVerdict};

// ================================================================================================
// Parallel Analysis
// ================================================================================================

/// The supervised worker pool
pub use crate::worker::{AppFailure, AppLoader, CancelToken, RunSummary, Supervisor};
