//! Per-application evaluation of bug templates.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    engine::{
        report::{AppReport, BugVerdict},
        search::SearchEngine,
        trace::TraceEngine,
    },
    index::IndexAdapter,
    links::LinkTable,
    template::{BugTemplate, CodeSpec, GraphSpec, ManifestSpec, TemplateSet},
    Result,
};

/// Matches the manifest conditions of a template against one application.
///
/// Implementations may bind values (for example component names) into `links`; code rules
/// evaluated afterwards can refer to them.
pub trait ManifestMatcher: Send + Sync {
    /// Returns `true` if the application's manifest satisfies `manifest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read.
    fn matches(&self, manifest: &ManifestSpec, links: &mut LinkTable) -> Result<bool>;
}

/// Receives the bindings of every satisfied template that carries a `GRAPH` expression.
pub trait GraphExporter: Send + Sync {
    /// Exports the bindings of bug `bug` found in application `app`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Export`] if the bindings cannot be exported.
    fn export(&self, app: &str, bug: &str, graph: &GraphSpec, links: &LinkTable) -> Result<()>;
}

/// Result of evaluating one template against one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// `true` if every present category was satisfied
    pub satisfied: bool,
    /// Values bound while evaluating
    pub links: LinkTable,
}

/// Evaluates bug templates against applications.
///
/// The evaluator is immutable and cheap to clone; a single instance is shared by every
/// worker.
///
/// # Examples
///
/// ```rust
/// use bugscope::prelude::*;
///
/// let index = MemoryIndex::builder()
///     .call("Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", "Lcom/app/Net;->send()V")
///     .build()?;
/// let config = EngineConfig::default();
/// let adapter = IndexAdapter::new(&index, &config);
///
/// let template = TemplateParser::new().parse_str(r#"{
///     "METADATA": { "NAME": "Sender" },
///     "CODEPARAMS": {
///         "SEARCH": {
///             "SEARCHFORCALLTOMETHOD": {
///                 "METHOD": "Lcom/app/Net;->send()V",
///                 "RETURN": "<class> AS @sender"
///             }
///         }
///     }
/// }"#)?;
///
/// let evaluation = BugEvaluator::new(config).evaluate(&template, &adapter)?;
/// assert!(evaluation.satisfied);
/// assert_eq!(evaluation.links.resolve("@sender"), &["Lcom/app/Main;"]);
/// # Ok::<(), bugscope::Error>(())
/// ```
#[derive(Clone)]
pub struct BugEvaluator {
    config: EngineConfig,
    manifest: Option<Arc<dyn ManifestMatcher>>,
    exporter: Option<Arc<dyn GraphExporter>>,
}

impl BugEvaluator {
    /// Creates an evaluator without manifest matcher or graph exporter.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        BugEvaluator {
            config,
            manifest: None,
            exporter: None,
        }
    }

    /// Sets the manifest matcher. Without one, templates with manifest conditions are never
    /// satisfied.
    #[must_use]
    pub fn with_manifest_matcher(mut self, matcher: Arc<dyn ManifestMatcher>) -> Self {
        self.manifest = Some(matcher);
        self
    }

    /// Sets the graph exporter used by [`BugEvaluator::analyse_app`].
    #[must_use]
    pub fn with_graph_exporter(mut self, exporter: Arc<dyn GraphExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates one template.
    ///
    /// Manifest conditions are evaluated before code conditions, each exactly once, sharing
    /// one [`LinkTable`]. The template is satisfied if every present category is.
    ///
    /// # Arguments
    ///
    /// * `template` - The template to evaluate
    /// * `adapter` - The application, wrapped for the engine
    ///
    /// # Errors
    ///
    /// Returns index and manifest errors; the application's evaluation should be abandoned.
    pub fn evaluate(&self, template: &BugTemplate, adapter: &IndexAdapter<'_>) -> Result<Evaluation> {
        let mut links = LinkTable::new();
        let mut satisfied = 0;

        if let Some(manifest) = &template.manifest {
            let matched = match &self.manifest {
                Some(matcher) => matcher.matches(manifest, &mut links)?,
                None => {
                    debug!("{}: no manifest matcher, manifest conditions unsatisfied", template.name);
                    false
                }
            };
            if matched {
                satisfied += 1;
            }
        }

        if let Some(code) = &template.code {
            if self.evaluate_code(code, adapter, &mut links)? {
                satisfied += 1;
            }
        }

        let categories = template.category_count();
        Ok(Evaluation {
            satisfied: categories > 0 && satisfied == categories,
            links,
        })
    }

    fn evaluate_code(
        &self,
        code: &CodeSpec,
        adapter: &IndexAdapter<'_>,
        links: &mut LinkTable,
    ) -> Result<bool> {
        if !code.search.is_empty() && !SearchEngine::new(adapter).evaluate(&code.search, links)? {
            return Ok(false);
        }
        if !code.trace.is_empty()
            && !TraceEngine::new(adapter, &self.config).evaluate(&code.trace, links)?
        {
            return Ok(false);
        }
        Ok(true)
    }

    /// Evaluates every template of `templates` against one application.
    ///
    /// Bindings of satisfied templates are handed to the graph exporter if the template has
    /// a `GRAPH` expression; export failures are logged and do not affect the verdict.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error. Verdicts of templates evaluated before the error
    /// are discarded.
    pub fn analyse_app(
        &self,
        app: &str,
        templates: &TemplateSet,
        adapter: &IndexAdapter<'_>,
    ) -> Result<AppReport> {
        let mut report = AppReport::new(app);

        for template in templates.iter() {
            let evaluation = self.evaluate(template, adapter)?;
            debug!(
                "{}: {} {}",
                app,
                template.name,
                if evaluation.satisfied { "satisfied" } else { "not satisfied" }
            );

            if evaluation.satisfied {
                if let (Some(graph), Some(exporter)) = (&template.graph, &self.exporter) {
                    if let Err(e) = exporter.export(app, &template.name, graph, &evaluation.links) {
                        warn!("{}: graph export for {} failed - {}", app, template.name, e);
                    }
                }
            }

            report.bugs.push(BugVerdict::new(&template.name, evaluation));
        }

        info!(
            "{}: {} of {} bugs present",
            app,
            report.satisfied().count(),
            report.bugs.len()
        );
        Ok(report)
    }
}
