use std::{
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Select, Sender};
use tracing::{debug, info, warn};

use crate::{
    engine::{AppReport, BugEvaluator},
    index::IndexAdapter,
    template::TemplateSet,
    worker::{AppLoader, CancelToken},
    Error, Result,
};

/// An application that could not be analysed.
#[derive(Debug)]
pub struct AppFailure {
    /// Application identifier
    pub app: String,
    /// Number of attempts made
    pub attempts: usize,
    /// The last error; [`Error::Worker`] if every attempt killed its worker
    pub error: Error,
}

/// Outcome of [`Supervisor::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Reports of the analysed applications, in completion order
    pub reports: Vec<AppReport>,
    /// Applications whose analysis failed
    pub failures: Vec<AppFailure>,
    /// Applications never dispatched because the run was cancelled
    pub unprocessed: Vec<String>,
}

#[derive(Debug, Clone)]
struct Job {
    app: String,
    attempt: usize,
}

enum Event {
    Done { job: Job, result: Result<AppReport> },
}

/// Everything a worker thread needs, shared read-only by all of them.
struct Context {
    evaluator: BugEvaluator,
    templates: Arc<TemplateSet>,
    loader: Arc<dyn AppLoader>,
}

impl Context {
    fn analyse(&self, app: &str) -> Result<AppReport> {
        let index = self.loader.load(app)?;
        let adapter = IndexAdapter::new(index.as_ref(), self.evaluator.config());
        self.evaluator.analyse_app(app, &self.templates, &adapter)
    }
}

struct Worker {
    id: usize,
    jobs: Sender<Job>,
    events: Receiver<Event>,
    handle: JoinHandle<()>,
    current: Option<Job>,
}

impl Worker {
    fn spawn(id: usize, context: &Arc<Context>) -> Result<Worker> {
        let (jobs_tx, jobs_rx) = bounded::<Job>(1);
        let (events_tx, events_rx) = bounded::<Event>(1);
        let context = Arc::clone(context);

        let handle = thread::Builder::new()
            .name(format!("bugscope-worker-{id}"))
            .spawn(move || {
                for job in jobs_rx.iter() {
                    let result = context.analyse(&job.app);
                    if events_tx.send(Event::Done { job, result }).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| Error::Worker(format!("failed to spawn worker {id} - {e}")))?;

        Ok(Worker {
            id,
            jobs: jobs_tx,
            events: events_rx,
            handle,
            current: None,
        })
    }

    fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Closes the job channel and waits for the thread to exit.
    fn shutdown(self) {
        let Worker {
            id, jobs, handle, ..
        } = self;
        drop(jobs);
        if handle.join().is_err() {
            debug!("Worker {} terminated by panic", id);
        }
    }
}

/// Distributes applications over a fixed set of worker threads.
///
/// Workers are threads of the current process, not separate processes. A panic while
/// analysing an application ends only its worker thread, which is detected through the
/// closed event channel and replaced. Faults that abort the whole process are not isolated.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use bugscope::prelude::*;
///
/// let templates = TemplateSet::new();
/// let loader = |_app: &str| -> bugscope::Result<Box<dyn BytecodeIndex>> {
///     Ok(Box::new(MemoryIndex::builder().build()?))
/// };
///
/// let supervisor = Supervisor::new(
///     BugEvaluator::new(EngineConfig::default()),
///     Arc::new(templates),
///     Arc::new(loader),
/// );
/// let summary = supervisor.run(vec!["a.apk".to_string(), "b.apk".to_string()])?;
/// assert_eq!(summary.reports.len(), 2);
/// # Ok::<(), bugscope::Error>(())
/// ```
pub struct Supervisor {
    context: Arc<Context>,
    cancel: CancelToken,
}

impl Supervisor {
    /// Creates a supervisor; worker count and retry bound come from the evaluator's
    /// configuration.
    #[must_use]
    pub fn new(
        evaluator: BugEvaluator,
        templates: Arc<TemplateSet>,
        loader: Arc<dyn AppLoader>,
    ) -> Self {
        Supervisor {
            context: Arc::new(Context {
                evaluator,
                templates,
                loader,
            }),
            cancel: CancelToken::new(),
        }
    }

    /// Uses `cancel` to stop the run from another thread.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Analyses every application of `apps`.
    ///
    /// Per-application failures, including workers dying on every attempt, are collected
    /// in the summary and never fail the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, or [`Error::Worker`] if a
    /// worker thread cannot be spawned.
    pub fn run(&self, apps: Vec<String>) -> Result<RunSummary> {
        let config = self.context.evaluator.config();
        config.validate()?;
        let max_attempts = config.analysis.max_attempts;
        let total = apps.len();

        let mut queue: VecDeque<Job> = apps
            .into_iter()
            .map(|app| Job { app, attempt: 1 })
            .collect();
        if total == 0 {
            return Ok(RunSummary::default());
        }

        let mut workers = (0..config.analysis.worker_count.min(total))
            .map(|id| Worker::spawn(id, &self.context))
            .collect::<Result<Vec<_>>>()?;
        let mut next_id = workers.len();
        let mut summary = RunSummary::default();

        info!(
            "Analysing {} applications with {} workers",
            total,
            workers.len()
        );

        loop {
            if !self.cancel.is_cancelled() {
                self.dispatch(&mut workers, &mut queue, &mut next_id)?;
            }

            let busy: Vec<usize> = (0..workers.len())
                .filter(|&slot| !workers[slot].is_idle())
                .collect();
            if busy.is_empty() {
                break;
            }

            let (slot, event) = {
                let mut select = Select::new();
                for &slot in &busy {
                    select.recv(&workers[slot].events);
                }
                let operation = select.select();
                let slot = busy[operation.index()];
                (slot, operation.recv(&workers[slot].events))
            };

            match event {
                Ok(Event::Done { job, result }) => {
                    workers[slot].current = None;
                    match result {
                        Ok(report) => summary.reports.push(report),
                        Err(error) => {
                            warn!("{}: analysis failed - {}", job.app, error);
                            summary.failures.push(AppFailure {
                                app: job.app,
                                attempts: job.attempt,
                                error,
                            });
                        }
                    }
                }
                Err(_) => {
                    let dead = workers[slot].current.take();
                    warn!("Worker {} died, replacing it", workers[slot].id);
                    self.replace(&mut workers[slot], &mut next_id)?;

                    let Some(job) = dead else {
                        continue;
                    };
                    if job.attempt < max_attempts {
                        warn!(
                            "{}: requeued after worker death (attempt {} of {})",
                            job.app, job.attempt, max_attempts
                        );
                        queue.push_back(Job {
                            app: job.app,
                            attempt: job.attempt + 1,
                        });
                    } else {
                        warn!("{}: giving up after {} attempts", job.app, job.attempt);
                        summary.failures.push(AppFailure {
                            error: Error::Worker(format!(
                                "worker died analysing {} on every attempt",
                                job.app
                            )),
                            app: job.app,
                            attempts: job.attempt,
                        });
                    }
                }
            }
        }

        summary.unprocessed = queue.into_iter().map(|job| job.app).collect();
        for worker in workers {
            worker.shutdown();
        }

        info!(
            "Analysed {} applications: {} reports, {} failures, {} not started",
            total,
            summary.reports.len(),
            summary.failures.len(),
            summary.unprocessed.len()
        );
        Ok(summary)
    }

    /// Hands queued jobs to idle workers, replacing workers found dead on the way.
    fn dispatch(
        &self,
        workers: &mut [Worker],
        queue: &mut VecDeque<Job>,
        next_id: &mut usize,
    ) -> Result<()> {
        for worker in workers.iter_mut().filter(|worker| worker.is_idle()) {
            let Some(job) = queue.pop_front() else {
                break;
            };
            debug!("Dispatching {} to worker {}", job.app, worker.id);
            if let Err(returned) = worker.jobs.send(job.clone()) {
                queue.push_front(returned.into_inner());
                warn!("Worker {} exited, replacing it", worker.id);
                self.replace(worker, next_id)?;
                continue;
            }
            worker.current = Some(job);
        }
        Ok(())
    }

    fn replace(&self, worker: &mut Worker, next_id: &mut usize) -> Result<()> {
        let replacement = Worker::spawn(*next_id, &self.context)?;
        *next_id += 1;
        std::mem::replace(worker, replacement).shutdown();
        Ok(())
    }
}
