//! Bounded call-graph tracing between two rule end-points.
//!
//! A trace rule asks whether control (Basic mode) or a value (Advanced mode) can get from one
//! point of the application to another. Both modes share the machinery of this module:
//!
//! - end-point expansion: every `TRACEFROM` term is paired with every `TRACETO` term, and
//!   each from-candidate starts an independent walk with a fresh [`TraceState`]
//! - the three-valued [`StopCondition`], evaluated on every node entered
//! - chain accumulation with a hop bound (`TRACELENGTHMAX`)
//!
//! Chains are recorded in walk order and reversed for [`Direction::Reverse`] rules, so a bound
//! `<tracepath>` always reads caller first.
//!
//! # Examples
//!
//! ```rust
//! use bugscope::prelude::*;
//!
//! let index = MemoryIndex::builder()
//!     .call("Lcom/app/B;->b()V", "Lcom/app/A;->a()V")
//!     .call("Lcom/app/C;->c()V", "Lcom/app/B;->b()V")
//!     .build()?;
//! let config = EngineConfig::default();
//! let adapter = IndexAdapter::new(&index, &config);
//!
//! let template = TemplateParser::new().parse_str(r#"{
//!     "METADATA": { "NAME": "Reach" },
//!     "CODEPARAMS": { "TRACE": { "TRACEFROM": "Lcom/app/A;->a()V", "TRACETO": "<class>:Lcom/app/C;" } }
//! }"#)?;
//! let rule = &template.code.as_ref().unwrap().trace[0];
//!
//! let outcome = TraceEngine::new(&adapter, &config).trace(rule, &LinkTable::new())?;
//! assert_eq!(outcome.paths(), vec!["Lcom/app/C;->c()V,Lcom/app/B;->b()V,Lcom/app/A;->a()V"]);
//! # Ok::<(), bugscope::Error>(())
//! ```

mod advanced;
mod basic;
pub mod dispatch;

use std::collections::HashSet;

use tracing::debug;

use crate::{
    config::EngineConfig,
    engine::search::wildcard_match,
    index::{class_part, IndexAdapter, MethodQuery, MethodRef},
    links::LinkTable,
    template::{Candidate, Direction, Qualifier, Scope, TraceMode, TraceRule},
    Result,
};

/// Prefix marking the final node of a chain whose match is uncertain.
pub const MAYBE_MARKER: &str = "|MAYBE|";

/// Separator of nodes in a bound `<tracepath>`.
pub const PATH_SEPARATOR: &str = ",";

/// Whether a node satisfies the trace end-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Not the end-point; keep walking
    False,
    /// The end-point
    True,
    /// Same method name and descriptor as the end-point, declared in another class
    Maybe,
}

/// The chains found by one trace rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceOutcome {
    chains: Vec<Vec<String>>,
}

impl TraceOutcome {
    /// Returns `true` if at least one chain was found.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        !self.chains.is_empty()
    }

    /// The distinct chains, caller first, in discovery order.
    #[must_use]
    pub fn chains(&self) -> &[Vec<String>] {
        &self.chains
    }

    /// Returns `true` if any chain ends in an uncertain match.
    #[must_use]
    pub fn uncertain(&self) -> bool {
        self.chains
            .iter()
            .flatten()
            .any(|node| node.starts_with(MAYBE_MARKER))
    }

    /// The chains joined into `<tracepath>` strings.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.chains
            .iter()
            .map(|chain| chain.join(PATH_SEPARATOR))
            .collect()
    }

    fn push(&mut self, chain: Vec<String>) {
        if !self.chains.contains(&chain) {
            self.chains.push(chain);
        }
    }
}

/// Per from-candidate walk state: the visited set and the chains recorded so far.
#[derive(Debug, Default)]
pub(crate) struct TraceState {
    visited: HashSet<String>,
    chains: Vec<Vec<String>>,
}

impl TraceState {
    /// Marks `key` as visited; returns `false` if it already was.
    pub(crate) fn visit(&mut self, key: String) -> bool {
        self.visited.insert(key)
    }

    pub(crate) fn record(&mut self, chain: Vec<String>) {
        if !self.chains.contains(&chain) {
            self.chains.push(chain);
        }
    }
}

/// The resolved `TRACETO` side of one term pair.
#[derive(Debug)]
pub(crate) struct Target {
    candidates: Vec<Candidate>,
    qualifier: Option<Qualifier>,
}

impl Target {
    pub(crate) fn stop_condition(&self, node: &str) -> StopCondition {
        for candidate in &self.candidates {
            let matched = match candidate.scope {
                Scope::Class => class_part(node) == class_part(&candidate.value),
                Scope::Method => {
                    node == candidate.value
                        || MethodRef::parse(node)
                            .is_ok_and(|method| MethodQuery::parse(&candidate.value).matches(&method))
                }
            };
            if matched {
                return StopCondition::True;
            }
        }

        // Loose matching only for a single literal end-point.
        let [candidate] = self.candidates.as_slice() else {
            return StopCondition::False;
        };
        if !candidate.literal {
            return StopCondition::False;
        }
        match candidate.scope {
            Scope::Class => {
                let pattern = class_part(&candidate.value);
                if pattern.ends_with('*') && wildcard_match(pattern, class_part(node)) {
                    return StopCondition::True;
                }
            }
            Scope::Method => {
                let wanted = MethodQuery::parse(&candidate.value);
                let seen = MethodQuery::parse(node);
                if wanted.name.is_some()
                    && wanted.name == seen.name
                    && wanted.descriptor == seen.descriptor
                    && wanted.class != seen.class
                {
                    return StopCondition::Maybe;
                }
            }
        }
        StopCondition::False
    }
}

/// Outcome of entering a node.
pub(crate) enum Step {
    /// The node matched the end-point and the chain was recorded
    Matched,
    /// The hop bound is reached
    Exhausted,
    /// Keep walking with the extended chain
    Continue(Vec<String>),
}

/// Read-only context of one walk.
pub(crate) struct Walk<'w, 'a> {
    pub(crate) adapter: &'w IndexAdapter<'a>,
    pub(crate) target: &'w Target,
    pub(crate) direction: Direction,
    pub(crate) max_length: usize,
}

impl Walk<'_, '_> {
    /// Records `chain` extended by `label` if `label` satisfies the end-point.
    pub(crate) fn record_match(&self, label: &str, chain: &[String], state: &mut TraceState) -> bool {
        match self.target.stop_condition(label) {
            StopCondition::True => {
                state.record(extend(chain, label));
                true
            }
            StopCondition::Maybe => {
                state.record(extend(chain, &format!("{MAYBE_MARKER}{label}")));
                true
            }
            StopCondition::False => false,
        }
    }

    /// Enters the node `label`.
    ///
    /// Unqualified end-points are matched against every node entered; qualified ones only
    /// at the register level.
    pub(crate) fn step(&self, label: &str, chain: &[String], state: &mut TraceState) -> Step {
        if self.target.qualifier.is_none() && self.record_match(label, chain, state) {
            return Step::Matched;
        }
        let next = extend(chain, label);
        if next.len() - 1 < self.max_length {
            Step::Continue(next)
        } else {
            Step::Exhausted
        }
    }
}

/// Returns `chain` with `label` appended, unless it already ends with it.
pub(crate) fn extend(chain: &[String], label: &str) -> Vec<String> {
    let mut next = chain.to_vec();
    if next.last().map(String::as_str) != Some(label) {
        next.push(label.to_string());
    }
    next
}

/// The walk's start node for a from-candidate.
pub(crate) fn start_node(candidate: &Candidate) -> MethodQuery {
    match candidate.scope {
        Scope::Class => MethodQuery::class(class_part(&candidate.value)),
        Scope::Method => MethodQuery::parse(&candidate.value),
    }
}

/// Evaluates trace rules against one application.
pub struct TraceEngine<'e, 'a> {
    adapter: &'e IndexAdapter<'a>,
    default_max_length: usize,
}

impl<'e, 'a> TraceEngine<'e, 'a> {
    /// Creates a trace engine over `adapter`; rules without `TRACELENGTHMAX` use the
    /// configured default.
    #[must_use]
    pub fn new(adapter: &'e IndexAdapter<'a>, config: &EngineConfig) -> Self {
        TraceEngine {
            adapter,
            default_max_length: config.trace.trace_length_max,
        }
    }

    /// Evaluates an AND-list of trace rules.
    ///
    /// Each satisfied rule binds its chains under its `<tracepath>` identifiers before the
    /// next rule runs. Evaluation stops at the first unsatisfied rule.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn evaluate(&self, rules: &[TraceRule], links: &mut LinkTable) -> Result<bool> {
        for rule in rules {
            let outcome = self.trace(rule, links)?;
            if !outcome.is_satisfied() {
                return Ok(false);
            }
            for binding in &rule.returns {
                links.bind_all(&binding.id, outcome.paths());
            }
        }
        Ok(true)
    }

    /// Runs one trace rule.
    ///
    /// # Errors
    ///
    /// Propagates index errors. Unresolvable end-points give an unsatisfied outcome.
    pub fn trace(&self, rule: &TraceRule, links: &LinkTable) -> Result<TraceOutcome> {
        let max_length = rule.max_length.unwrap_or(self.default_max_length);
        let mut outcome = TraceOutcome::default();

        for from_term in &rule.from.terms {
            let sources = from_term.expand(links);
            for to_term in &rule.to.terms {
                let candidates = to_term.expand(links);
                if sources.is_empty() || candidates.is_empty() {
                    debug!(
                        "Trace {} -> {} has an unresolved end-point",
                        from_term.term, to_term.term
                    );
                    continue;
                }

                let target = Target {
                    candidates,
                    qualifier: rule.to.qualifier,
                };
                let walk = Walk {
                    adapter: self.adapter,
                    target: &target,
                    direction: rule.direction,
                    max_length,
                };

                for source in &sources {
                    let mut state = TraceState::default();
                    match rule.mode {
                        TraceMode::Basic => basic::trace(&walk, source, &mut state)?,
                        TraceMode::Advanced => {
                            advanced::trace(&walk, source, rule.from.qualifier, &mut state)?;
                        }
                    }
                    debug!(
                        "{} trace from {} found {} chains",
                        rule.mode,
                        source.value,
                        state.chains.len()
                    );

                    for mut chain in state.chains {
                        if rule.direction == Direction::Reverse {
                            chain.reverse();
                        }
                        outcome.push(chain);
                    }
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{PointTerm, TracePoint};

    fn target(point: &str) -> Target {
        let point = TracePoint::parse(point).unwrap();
        let term: &PointTerm = &point.terms[0];
        Target {
            candidates: term.expand(&LinkTable::new()),
            qualifier: point.qualifier,
        }
    }

    #[test]
    fn exact_and_class_scoped_matches() {
        let method = target("Lcom/a/B;->run()V");
        assert_eq!(method.stop_condition("Lcom/a/B;->run()V"), StopCondition::True);
        assert_eq!(method.stop_condition("Lcom/a/B;->stop()V"), StopCondition::False);

        let class = target("<class>:Lcom/a/B;");
        assert_eq!(class.stop_condition("Lcom/a/B;->anything()V"), StopCondition::True);
        assert_eq!(class.stop_condition("Lcom/a/B;"), StopCondition::True);
        assert_eq!(class.stop_condition("Lcom/a/C;->run()V"), StopCondition::False);

        let partial = target("<method>:Lcom/a/B;->run");
        assert_eq!(partial.stop_condition("Lcom/a/B;->run(I)V"), StopCondition::True);
    }

    #[test]
    fn wildcard_and_uncertain_matches() {
        let wildcard = target("<class>:Lcom/app/*");
        assert_eq!(wildcard.stop_condition("Lcom/app/x/Y;->y()V"), StopCondition::True);
        assert_eq!(wildcard.stop_condition("Lcom/lib/Y;->y()V"), StopCondition::False);

        let method = target("Lcom/a/B;->run()V");
        assert_eq!(method.stop_condition("Lcom/z/Z;->run()V"), StopCondition::Maybe);
    }

    #[test]
    fn linked_end_points_match_exactly() {
        let mut links = LinkTable::new();
        links.bind("@sink", "Lcom/a/B;->run()V");
        let point = TracePoint::parse("@sink").unwrap();
        let linked = Target {
            candidates: point.terms[0].expand(&links),
            qualifier: point.qualifier,
        };

        assert_eq!(linked.stop_condition("Lcom/a/B;->run()V"), StopCondition::True);
        assert_eq!(linked.stop_condition("Lcom/z/Z;->run()V"), StopCondition::False);
    }

    #[test]
    fn chain_extension() {
        let chain = extend(&[], "a");
        let chain = extend(&chain, "b");
        assert_eq!(extend(&chain, "b"), vec!["a", "b"]);
        assert_eq!(extend(&chain, "a"), vec!["a", "b", "a"]);
    }

    #[test]
    fn outcome_paths() {
        let mut outcome = TraceOutcome::default();
        outcome.push(vec!["a".into(), "b".into()]);
        outcome.push(vec!["a".into(), "b".into()]);
        outcome.push(vec!["c".into(), format!("{MAYBE_MARKER}d")]);

        assert_eq!(outcome.paths(), vec!["a,b", "c,|MAYBE|d"]);
        assert!(outcome.uncertain());
        assert!(outcome.is_satisfied());
    }
}
