// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # bugscope
//!
//! A template-driven engine for finding bugs in compiled Android applications.
//!
//! Bugs are described declaratively as JSON **bug templates**: manifest conditions, code
//! searches (existence of, or calls to, a class, method or string) and traces between two
//! points of the call graph. `bugscope` evaluates every template against every application
//! and reports which bugs are present, together with the values each template bound on the
//! way (classes, methods, and the call chains that connect them).
//!
//! ## Features
//!
//! - **📜 Declarative templates** - Search rules with `OR` lists, location filters and negation
//! - **🔗 Link propagation** - Values found by one rule feed the rules after it
//! - **🧭 Call-graph tracing** - Bounded forward/reverse reachability with subclass widening
//! - **🔬 Data-flow tracing** - Register-level tracking through results, arguments and fields
//! - **🌐 Framework idioms** - `AsyncTask` dispatch and `WebView` script bridges
//! - **⚙️ Parallel analysis** - A supervised worker pool with requeueing on worker death
//!
//! ## Quick Start
//!
//! ```rust
//! use bugscope::prelude::*;
//!
//! // An application with a single call edge
//! let index = MemoryIndex::builder()
//!     .call("Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", "Lcom/app/Net;->send()V")
//!     .build()?;
//!
//! let template = TemplateParser::new().parse_str(r#"{
//!     "METADATA": { "NAME": "NetworkFromActivity" },
//!     "CODEPARAMS": {
//!         "TRACE": {
//!             "TRACEFROM": "Lcom/app/Net;->send()V",
//!             "TRACETO": "<class>:Lcom/app/Main;",
//!             "RETURN": "<tracepath> AS @tracepath_send"
//!         }
//!     }
//! }"#)?;
//!
//! let config = EngineConfig::default();
//! let adapter = IndexAdapter::new(&index, &config);
//! let evaluation = BugEvaluator::new(config).evaluate(&template, &adapter)?;
//!
//! assert!(evaluation.satisfied);
//! assert_eq!(
//!     evaluation.links.resolve("@tracepath_send"),
//!     &["Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V,Lcom/app/Net;->send()V"]
//! );
//! # Ok::<(), bugscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`template`] - The template model, parser and validator
//! - [`links`] - The table of values bound while evaluating one template
//! - [`index`] - The [`index::BytecodeIndex`] abstraction over a decoded application
//! - [`engine`] - Search, trace and per-template evaluation
//! - [`worker`] - Parallel analysis of many applications
//! - [`config`] - Engine configuration
//! - [`Error`] and [`Result`] - Error handling
//!
//! `bugscope` does not decode application binaries itself. Callers provide a
//! [`index::BytecodeIndex`] implementation backed by their decoder of choice; the crate ships
//! [`index::MemoryIndex`] for embedding and tests.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Invalid templates are
//! rejected with [`Error::Template`]; a valid template that does not match an application is
//! simply unsatisfied.
//!
//! ```rust
//! use bugscope::{template::TemplateParser, Error};
//!
//! let result = TemplateParser::new().parse_str(r#"{"METADATA": {"NAME": "Empty"}}"#);
//! assert!(matches!(result, Err(Error::Template { .. })));
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use bugscope::prelude::*;
///
/// let config = EngineConfig::from_toml("[analysis]\nworker_count = 4")?;
/// assert_eq!(config.analysis.worker_count, 4);
/// # Ok::<(), bugscope::Error>(())
/// ```
pub mod prelude;

pub mod config;
pub mod engine;
pub mod index;
pub mod links;
pub mod template;
pub mod worker;

/// `bugscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `bugscope` Error type
///
/// The main error type for all operations in this crate. Each variant documents the
/// recovery policy the engine applies to it.
pub use error::Error;
