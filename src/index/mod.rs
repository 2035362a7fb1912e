//! Read-only view of one application's code.
//!
//! The matching engine never decodes application binaries itself. Everything it needs to know
//! about an application - class hierarchy, method declarations, cross references, string
//! literals, instruction bodies and annotations - comes through the [`BytecodeIndex`] trait.
//! A decoder integration implements the trait once; the crate ships [`MemoryIndex`], an
//! in-memory implementation for embedding and testing.
//!
//! On top of the raw trait sits [`IndexAdapter`], which owns the per-application
//! [`HierarchyCache`] and provides the derived queries the engine uses: subclass widening of
//! call-site lookups, interactive-callback filtering and web-view bridge discovery.
//!
//! # Key Components
//!
//! - [`BytecodeIndex`] - The index contract
//! - [`MethodRef`], [`MethodQuery`], [`FieldRef`] - Signatures
//! - [`Instruction`], [`MethodBody`] - Decoded code for register-level tracing
//! - [`HierarchyCache`] - Memoized transitive sub/superclass closures
//! - [`IndexAdapter`] - Derived queries used by the engine
//! - [`MemoryIndex`] - In-memory index with a builder
//!
//! # Example
//!
//! ```rust
//! use bugscope::index::{BytecodeIndex, MemoryIndex, MethodQuery};
//!
//! let index = MemoryIndex::builder()
//!     .class("Lcom/app/Main;", Some("Landroid/app/Activity;"))
//!     .call("Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", "Lcom/app/Net;->send()V")
//!     .build()?;
//!
//! let callers = index.callers_of_method(&MethodQuery::parse("Lcom/app/Net;->send()V"))?;
//! assert_eq!(callers.len(), 1);
//! # Ok::<(), bugscope::Error>(())
//! ```

mod adapter;
mod hierarchy;
mod instruction;
mod memory;
mod signature;

use std::sync::Arc;

pub use adapter::{
    is_interactive_callback, IndexAdapter, ADD_JAVASCRIPT_INTERFACE, INTERACTIVE_CALLBACKS,
    JAVASCRIPT_INTERFACE, WEBVIEW_CLASS,
};
pub use hierarchy::HierarchyCache;
pub use instruction::{Instruction, InstructionKind, InvokeKind, MethodBody, Operand};
pub use memory::{MemoryIndex, MemoryIndexBuilder};
pub use signature::{class_part, has_member_part, FieldRef, MethodQuery, MethodRef};

use crate::Result;

/// Query interface over one application's decoded code.
///
/// All operations are read-only and may fail with [`crate::Error::Index`] if the underlying
/// decoder cannot answer; an empty result is not a failure. Implementations must return
/// results in a stable order so that repeated evaluations bind identical values.
pub trait BytecodeIndex {
    /// Returns the immediate subclasses of `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn subclasses(&self, class: &str) -> Result<Vec<String>>;

    /// Returns the direct superclass of `class`, if known.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn superclass(&self, class: &str) -> Result<Option<String>>;

    /// Returns all methods (declared or referenced) matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn find_methods(&self, query: &MethodQuery) -> Result<Vec<MethodRef>>;

    /// Returns all classes (declared or referenced) named `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn find_classes(&self, class: &str) -> Result<Vec<String>>;

    /// Returns all string literals matching `pattern`, a regular expression anchored at the
    /// start of the literal.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn find_strings(&self, pattern: &str) -> Result<Vec<String>>;

    /// Returns the methods that invoke any method matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn callers_of_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>>;

    /// Returns the methods invoked by any method matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn callees_of_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>>;

    /// Returns the methods that reference `class` (call one of its methods or use the type).
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn callers_of_class(&self, class: &str) -> Result<Vec<MethodRef>>;

    /// Returns the methods that load a string literal matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn callers_of_string(&self, pattern: &str) -> Result<Vec<MethodRef>>;

    /// Returns the decoded body of `method`, or `None` for external and abstract methods.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn method_body(&self, method: &MethodRef) -> Result<Option<Arc<MethodBody>>>;

    /// Returns the methods reading `field`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn field_readers(&self, field: &FieldRef) -> Result<Vec<MethodRef>>;

    /// Returns the methods writing `field`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn field_writers(&self, field: &FieldRef) -> Result<Vec<MethodRef>>;

    /// Returns the annotation types attached to `method`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn annotations(&self, method: &MethodRef) -> Result<Vec<String>>;

    /// Returns all methods carrying the `annotation` type.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    fn annotated_methods(&self, annotation: &str) -> Result<Vec<MethodRef>>;
}

/// Appends `value` to `list` unless already present, preserving first-seen order.
pub(crate) fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}
