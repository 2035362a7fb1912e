//! Rule expressions: target patterns, trace points, location filters and return bindings.
//!
//! These are parsed once when a template is loaded. Link references stay symbolic until a
//! rule is evaluated, when they are expanded against the current [`LinkTable`].

use std::fmt;

use strum::{AsRefStr, Display, EnumString};

use crate::{
    index::has_member_part,
    links::{LinkRef, LinkTable, Subpart},
};

/// Separator of alternatives in every rule expression.
pub const OR_SEPARATOR: &str = " OR ";

/// Negation prefix of a location filter.
pub const NOT_PREFIX: &str = "NOT ";

/// Granularity at which a value is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum Scope {
    /// Compare class parts only
    #[strum(serialize = "<class>")]
    Class,
    /// Compare full method signatures
    #[strum(serialize = "<method>")]
    Method,
}

impl Scope {
    /// Scope implied by a value: [`Scope::Method`] if it carries a member part.
    #[must_use]
    pub fn infer(value: &str) -> Self {
        if has_member_part(value) {
            Scope::Method
        } else {
            Scope::Class
        }
    }

    /// Link selector matching this scope.
    #[must_use]
    pub fn subpart(self) -> Subpart {
        match self {
            Scope::Class => Subpart::Class,
            Scope::Method => Subpart::Method,
        }
    }

    /// Splits an optional `<class>:`/`<method>:` prefix off `text`.
    #[must_use]
    pub fn strip_prefix(text: &str) -> (Option<Scope>, &str) {
        let text = text.trim();
        for scope in [Scope::Class, Scope::Method] {
            if let Some(rest) = text
                .strip_prefix(scope.as_ref())
                .and_then(|rest| rest.strip_prefix(':'))
            {
                return (Some(scope), rest.trim());
            }
        }
        (None, text)
    }
}

/// One alternative of an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A literal value
    Literal(String),
    /// A reference to bound values
    Link(LinkRef),
}

impl Term {
    /// Parses a single alternative.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match LinkRef::parse(text) {
            Some(link) => Term::Link(link),
            None => Term::Literal(text.to_string()),
        }
    }

    /// Returns `true` for link references.
    #[must_use]
    pub fn is_link(&self) -> bool {
        matches!(self, Term::Link(_))
    }

    /// Expands the term to concrete values.
    ///
    /// Literals expand to themselves. Links resolve through `links`; a link without its own
    /// selector uses `default`.
    #[must_use]
    pub fn expand(&self, links: &LinkTable, default: Option<Subpart>) -> Vec<String> {
        match self {
            Term::Literal(value) => vec![value.clone()],
            Term::Link(link) if link.subpart.is_none() && default.is_some() => LinkRef {
                subpart: default,
                ..link.clone()
            }
            .expand(links),
            Term::Link(link) => link.expand(links),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Literal(value) => f.write_str(value),
            Term::Link(link) => write!(f, "{link}"),
        }
    }
}

/// An `OR`-list of terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    /// Alternatives in source order
    pub terms: Vec<Term>,
}

impl Pattern {
    /// Parses `a OR b OR @c`.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Pattern {
            terms: text
                .split(OR_SEPARATOR)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(Term::parse)
                .collect(),
        }
    }

    /// Expands every term and returns the distinct values in first-seen order.
    #[must_use]
    pub fn expand(&self, links: &LinkTable, default: Option<Subpart>) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for term in &self.terms {
            for value in term.expand(links, default) {
                if !result.contains(&value) {
                    result.push(value);
                }
            }
        }
        result
    }

    /// Returns `true` if the pattern has no alternatives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(OR_SEPARATOR)?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

/// Restricts call sites to, or excludes them from, a set of locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFilter {
    /// Keep call sites matching none of the values instead
    pub negated: bool,
    /// Granularity of the comparison
    pub scope: Scope,
    /// Location values; class-scope literals may end in `*`
    pub pattern: Pattern,
}

impl LocationFilter {
    /// Parses `[NOT ][<class>:|<method>:]value[ OR value...]`.
    ///
    /// Returns `None` for an empty location.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negated, text) = match text.strip_prefix(NOT_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (scope, text) = Scope::strip_prefix(text);
        let pattern = Pattern::parse(text);
        if pattern.is_empty() {
            return None;
        }

        Some(LocationFilter {
            negated,
            scope: scope.unwrap_or(Scope::Class),
            pattern,
        })
    }
}

/// What a return binding records for each discovered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum ReturnShape {
    /// Class of the call site
    #[strum(serialize = "<class>")]
    Class,
    /// Full signature of the call site
    #[strum(serialize = "<method>")]
    Method,
    /// Comma-joined trace chain
    #[strum(serialize = "<tracepath>")]
    TracePath,
}

/// `<shape> AS @id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReturnBinding {
    /// Shape of the bound values
    pub shape: ReturnShape,
    /// Destination identifier, including `@`
    pub id: String,
}

impl ReturnBinding {
    /// Parses `<shape> AS @id`; returns `None` if either side is malformed.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (shape, id) = text.split_once(" AS ")?;
        let shape = shape.trim().parse::<ReturnShape>().ok()?;
        let id = id.trim();
        if id.contains(" AS ") || id.is_empty() {
            return None;
        }
        Some(ReturnBinding {
            shape,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for ReturnBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} AS {}", self.shape, self.id)
    }
}

/// Register-level qualifier of a trace point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// The value returned by the point
    ResultOf,
    /// An argument passed to the point; any argument if no index is given
    ArgTo {
        /// Argument position, receiver at 0 for instance methods
        index: Option<usize>,
    },
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::ResultOf => f.write_str("RESULTOF"),
            Qualifier::ArgTo { index: None } => f.write_str("ARGTO"),
            Qualifier::ArgTo { index: Some(i) } => write!(f, "ARGTO ... ARGINDEX {i}"),
        }
    }
}

/// One alternative of a trace point, with its comparison scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointTerm {
    /// Explicit `<class>:`/`<method>:` scope, inferred per value if `None`
    pub scope: Option<Scope>,
    /// The value or link
    pub term: Term,
}

/// A concrete end-point value produced by expanding a [`PointTerm`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// The value, a class or a (possibly partial) method signature
    pub value: String,
    /// Comparison scope
    pub scope: Scope,
    /// `true` if the value was written literally in the template
    pub literal: bool,
}

impl PointTerm {
    /// Expands this term into candidates, in first-seen order.
    #[must_use]
    pub fn expand(&self, links: &LinkTable) -> Vec<Candidate> {
        let values = self.term.expand(links, self.scope.map(Scope::subpart));
        let mut result: Vec<Candidate> = Vec::with_capacity(values.len());
        for value in values {
            let candidate = Candidate {
                scope: self.scope.unwrap_or_else(|| Scope::infer(&value)),
                literal: !self.term.is_link(),
                value,
            };
            if !result.contains(&candidate) {
                result.push(candidate);
            }
        }
        result
    }
}

/// A trace end-point: optional qualifier plus `OR`-separated alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracePoint {
    /// Register-level qualifier
    pub qualifier: Option<Qualifier>,
    /// Alternatives in source order
    pub terms: Vec<PointTerm>,
}

impl TracePoint {
    /// Parses `[RESULTOF |ARGTO ]alt[ OR alt...][ ARGINDEX n]`.
    ///
    /// Returns `None` if no alternative remains or the `ARGINDEX` value is not a number.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut text = text.trim();
        let mut qualifier = None;

        if let Some(rest) = text.strip_prefix("RESULTOF ") {
            qualifier = Some(Qualifier::ResultOf);
            text = rest;
        } else if let Some(rest) = text.strip_prefix("ARGTO ") {
            qualifier = Some(Qualifier::ArgTo { index: None });
            text = rest;
        }

        let mut index = None;
        if let Some((head, tail)) = text.rsplit_once(" ARGINDEX ") {
            index = Some(tail.trim().parse::<usize>().ok()?);
            text = head;
        }
        if let (Some(Qualifier::ArgTo { .. }), Some(_)) = (qualifier, index) {
            qualifier = Some(Qualifier::ArgTo { index });
        }

        let terms: Vec<PointTerm> = text
            .split(OR_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|alt| {
                let (scope, rest) = Scope::strip_prefix(alt);
                PointTerm {
                    scope,
                    term: Term::parse(rest),
                }
            })
            .collect();

        (!terms.is_empty()).then_some(TracePoint { qualifier, terms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> LinkTable {
        let mut links = LinkTable::new();
        links.bind("@site", "Lcom/a/Main;->onCreate(Landroid/os/Bundle;)V");
        links.bind("@site", "Lcom/a/Other;->run()V");
        links.bind("@site", "Lcom/a/Main;->onCreate(Landroid/os/Bundle;)V");
        links
    }

    #[test]
    fn scope_prefix() {
        assert_eq!(
            Scope::strip_prefix("<class>:Lcom/a/B;"),
            (Some(Scope::Class), "Lcom/a/B;")
        );
        assert_eq!(
            Scope::strip_prefix("<method>: @x"),
            (Some(Scope::Method), "@x")
        );
        assert_eq!(Scope::strip_prefix("Lcom/a/B;"), (None, "Lcom/a/B;"));
        assert_eq!(Scope::infer("La;->b()V"), Scope::Method);
        assert_eq!(Scope::infer("La;"), Scope::Class);
    }

    #[test]
    fn pattern_expansion_is_ordered_and_distinct() {
        let pattern = Pattern::parse("Lcom/a/Main; OR @site OR @missing");
        assert_eq!(pattern.terms.len(), 3);

        let values = pattern.expand(&links(), Some(Subpart::Class));
        assert_eq!(values, vec!["Lcom/a/Main;", "Lcom/a/Other;"]);

        let values = pattern.expand(&links(), None);
        assert_eq!(values.len(), 3);
        assert_eq!(pattern.to_string(), "Lcom/a/Main; OR @site OR @missing");
    }

    #[test]
    fn location_filter_parsing() {
        let filter = LocationFilter::parse("NOT <class>:Lcom/google/*").unwrap();
        assert!(filter.negated);
        assert_eq!(filter.scope, Scope::Class);
        assert_eq!(
            filter.pattern.terms,
            vec![Term::Literal("Lcom/google/*".to_string())]
        );

        let filter = LocationFilter::parse("<method>:@site").unwrap();
        assert!(!filter.negated);
        assert_eq!(filter.scope, Scope::Method);
        assert!(filter.pattern.terms[0].is_link());

        let filter = LocationFilter::parse("Lcom/a/Main;").unwrap();
        assert_eq!(filter.scope, Scope::Class);

        assert!(LocationFilter::parse("  ").is_none());
    }

    #[test]
    fn return_binding_parsing() {
        let binding = ReturnBinding::parse("<class> AS @caller").unwrap();
        assert_eq!(binding.shape, ReturnShape::Class);
        assert_eq!(binding.id, "@caller");
        assert_eq!(binding.to_string(), "<class> AS @caller");

        assert!(ReturnBinding::parse("<method>@caller").is_none());
        assert!(ReturnBinding::parse("<field> AS @caller").is_none());
    }

    #[test]
    fn trace_point_parsing() {
        let point = TracePoint::parse("RESULTOF <method>:Lcom/a/B;->get()Ljava/lang/String;")
            .unwrap();
        assert_eq!(point.qualifier, Some(Qualifier::ResultOf));
        assert_eq!(point.terms[0].scope, Some(Scope::Method));

        let point =
            TracePoint::parse("ARGTO Landroid/webkit/WebView;->loadUrl(Ljava/lang/String;)V ARGINDEX 1")
                .unwrap();
        assert_eq!(point.qualifier, Some(Qualifier::ArgTo { index: Some(1) }));

        let point = TracePoint::parse("<class>:Lcom/a/* OR @site").unwrap();
        assert_eq!(point.qualifier, None);
        assert_eq!(point.terms.len(), 2);

        assert!(TracePoint::parse("ARGTO La;->b()V ARGINDEX x").is_none());
        assert!(TracePoint::parse("").is_none());
    }

    #[test]
    fn point_term_candidates() {
        let point = TracePoint::parse("@site OR <class>:@site OR Lcom/a/Sink;").unwrap();
        let links = links();

        let inferred = point.terms[0].expand(&links);
        assert_eq!(inferred.len(), 2);
        assert!(inferred.iter().all(|c| c.scope == Scope::Method && !c.literal));

        let classes = point.terms[1].expand(&links);
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].value, "Lcom/a/Main;");
        assert_eq!(classes[0].scope, Scope::Class);

        let literal = point.terms[2].expand(&links);
        assert_eq!(
            literal,
            vec![Candidate {
                value: "Lcom/a/Sink;".to_string(),
                scope: Scope::Class,
                literal: true,
            }]
        );
    }
}
