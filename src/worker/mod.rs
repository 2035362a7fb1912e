//! Parallel analysis of many applications.
//!
//! Applications are independent of one another, so the only parallelism in the engine is
//! across applications: a [`Supervisor`] hands one application at a time to each of a fixed
//! number of worker threads. A worker loads the application's index through an
//! [`AppLoader`], owns it exclusively while evaluating every template, and reports an
//! [`crate::engine::AppReport`] back.
//!
//! A worker that panics takes its channel down with it. The supervisor notices the
//! disconnection, starts a replacement and requeues the application that was in flight,
//! up to `analysis.max_attempts` times.
//!
//! # Key Components
//!
//! - [`Supervisor`] - Owns the workers and the work queue
//! - [`AppLoader`] - Produces the index of one application inside a worker
//! - [`CancelToken`] - Stops dispatching new applications
//! - [`RunSummary`], [`AppFailure`] - Results of one run

mod supervisor;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub use supervisor::{AppFailure, RunSummary, Supervisor};

use crate::{index::BytecodeIndex, Result};

/// Produces the bytecode index of an application.
///
/// Called on the worker thread that analyses the application; the returned index never
/// leaves that thread.
pub trait AppLoader: Send + Sync {
    /// Loads application `app`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Index`] (or any other error) if the application cannot be
    /// loaded; the application is then reported as failed.
    fn load(&self, app: &str) -> Result<Box<dyn BytecodeIndex>>;
}

impl<F> AppLoader for F
where
    F: Fn(&str) -> Result<Box<dyn BytecodeIndex>> + Send + Sync,
{
    fn load(&self, app: &str) -> Result<Box<dyn BytecodeIndex>> {
        self(app)
    }
}

/// Coarse cancellation shared between a caller and a [`Supervisor`].
///
/// Once cancelled, the supervisor dispatches no further applications and returns as soon
/// as the applications already in flight are finished.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancelToken::cancel`] was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
