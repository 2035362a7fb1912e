//! Bug templates: the declarative rules the engine matches applications against.
//!
//! A template is a JSON document naming one bug. It carries manifest conditions, code
//! conditions, or both, plus an optional graph-binding expression:
//!
//! ```json
//! {
//!     "METADATA": { "NAME": "WebViewFileAccess" },
//!     "CODEPARAMS": {
//!         "SEARCH": {
//!             "SEARCHFORCALLTOMETHOD": {
//!                 "METHOD": "Landroid/webkit/WebSettings;->setAllowFileAccess(Z)V",
//!                 "RETURN": "<class> AS @settings_user"
//!             }
//!         },
//!         "TRACE": {
//!             "TRACEFROM": "<class>:@settings_user",
//!             "TRACETO": "<class>:Lcom/app/MainActivity;",
//!             "RETURN": "<tracepath> AS @tracepath_entry"
//!         }
//!     },
//!     "GRAPH": "@tracepath_entry WITH <method> AS attribute=nodename"
//! }
//! ```
//!
//! Templates are parsed and validated by [`TemplateParser`] into the typed model of this
//! module. A parsed [`BugTemplate`] is immutable and shared read-only across all application
//! evaluations.
//!
//! # Key Components
//!
//! - [`BugTemplate`] - One parsed bug template
//! - [`CodeSpec`], [`SearchRule`], [`SearchClause`], [`TraceRule`] - Code conditions
//! - [`ManifestSpec`] - Structurally validated manifest conditions
//! - [`GraphSpec`] - Graph-binding expression handed to the exporter
//! - [`TemplateParser`], [`TemplateSet`] - Loading and validation

mod manifest;
mod parser;
mod pattern;

use std::{path::PathBuf, sync::Arc};

use strum::{AsRefStr, Display, EnumIter, EnumString};

pub use manifest::ManifestSpec;
pub use parser::{TemplateParser, TemplateSet, TEMPLATE_EXTENSION};
pub use pattern::{
    Candidate, LocationFilter, Pattern, PointTerm, Qualifier, ReturnBinding, ReturnShape, Scope,
    Term, TracePoint, NOT_PREFIX, OR_SEPARATOR,
};

use crate::links::Subpart;

/// Kind of a search clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
pub enum SearchType {
    /// A method exists
    #[strum(serialize = "SEARCHFORMETHOD")]
    MethodExists,
    /// A class exists
    #[strum(serialize = "SEARCHFORCLASS")]
    ClassExists,
    /// A string literal exists
    #[strum(serialize = "SEARCHFORSTRING")]
    StringExists,
    /// A method is called
    #[strum(serialize = "SEARCHFORCALLTOMETHOD")]
    CallsToMethod,
    /// A class is referenced
    #[strum(serialize = "SEARCHFORCALLTOCLASS")]
    CallsToClass,
    /// A string literal is loaded
    #[strum(serialize = "SEARCHFORCALLTOSTRING")]
    CallsToString,
}

impl SearchType {
    /// Returns `true` for the call-site searches, which support location filters and
    /// return bindings.
    #[must_use]
    pub fn is_call_site(self) -> bool {
        matches!(
            self,
            SearchType::CallsToMethod | SearchType::CallsToClass | SearchType::CallsToString
        )
    }

    /// Key of the target value inside a call-site clause object.
    #[must_use]
    pub fn subject_key(self) -> &'static str {
        match self {
            SearchType::MethodExists | SearchType::CallsToMethod => "METHOD",
            SearchType::ClassExists | SearchType::CallsToClass => "CLASS",
            SearchType::StringExists | SearchType::CallsToString => "STRING",
        }
    }

    /// Link selector used for target references without their own selector.
    #[must_use]
    pub fn default_subpart(self) -> Option<Subpart> {
        match self {
            SearchType::MethodExists | SearchType::CallsToMethod => Some(Subpart::Method),
            SearchType::ClassExists | SearchType::CallsToClass => Some(Subpart::Class),
            SearchType::StringExists | SearchType::CallsToString => None,
        }
    }
}

/// One search predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchClause {
    /// What to search for
    pub search_type: SearchType,
    /// The target, an `OR`-list of literals and links
    pub target: Pattern,
    /// Optional call-site location restriction
    pub location: Option<LocationFilter>,
    /// Bindings for the surviving call sites
    pub returns: Vec<ReturnBinding>,
}

/// One rule object of a `SEARCH` section; its clauses are AND-combined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRule {
    /// Clauses in source order
    pub clauses: Vec<SearchClause>,
}

/// Direction of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr)]
pub enum Direction {
    /// From a point towards what it calls
    #[strum(serialize = "FORWARD")]
    Forward,
    /// From a point towards its callers
    #[default]
    #[strum(serialize = "REVERSE")]
    Reverse,
}

/// Precision of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr)]
pub enum TraceMode {
    /// Call-graph reachability only
    #[default]
    #[strum(serialize = "BASIC")]
    Basic,
    /// Call-graph reachability plus register-level data flow
    #[strum(serialize = "ADVANCED")]
    Advanced,
}

/// One trace rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRule {
    /// Start point
    pub from: TracePoint,
    /// End point
    pub to: TracePoint,
    /// Traversal direction
    pub direction: Direction,
    /// Traversal precision
    pub mode: TraceMode,
    /// Maximum chain length; the configured default applies if `None`
    pub max_length: Option<usize>,
    /// `<tracepath>` bindings
    pub returns: Vec<ReturnBinding>,
}

/// The `CODEPARAMS` section: search rules followed by trace rules, all AND-combined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeSpec {
    /// `SEARCH` rules in source order
    pub search: Vec<SearchRule>,
    /// `TRACE` rules in source order
    pub trace: Vec<TraceRule>,
}

impl CodeSpec {
    /// Returns `true` if neither searches nor traces are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.trace.is_empty()
    }
}

/// A graph-binding expression: `@element WITH value AS attribute=name, value AS label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSpec {
    /// The whole expression as written
    pub expression: String,
    /// The graphed identifier
    pub element: String,
    /// The `value AS attribute=name` / `value AS label` parts
    pub attributes: Vec<String>,
}

/// A parsed and validated bug template.
#[derive(Debug, Clone, PartialEq)]
pub struct BugTemplate {
    /// Unique bug name (`METADATA.NAME`)
    pub name: String,
    /// Remaining `METADATA` entries
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Manifest conditions
    pub manifest: Option<ManifestSpec>,
    /// Code conditions
    pub code: Option<CodeSpec>,
    /// Graph-binding expression
    pub graph: Option<GraphSpec>,
    /// File the template was loaded from
    pub source: Option<PathBuf>,
}

impl BugTemplate {
    /// Number of present top-level categories (manifest and code).
    #[must_use]
    pub fn category_count(&self) -> usize {
        usize::from(self.manifest.is_some()) + usize::from(self.code.is_some())
    }
}

/// Shared handle to an immutable template.
pub type BugTemplateRc = Arc<BugTemplate>;
