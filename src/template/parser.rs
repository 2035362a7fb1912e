//! JSON template loading and validation.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use rayon::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    links::{is_valid_identifier, RESERVED_APP_ID, TRACEPATH_PREFIX},
    template::{
        BugTemplate, BugTemplateRc, CodeSpec, Direction, GraphSpec, LocationFilter, ManifestSpec,
        Pattern, Qualifier, ReturnBinding, ReturnShape, SearchClause, SearchRule, SearchType,
        TraceMode, TracePoint, TraceRule,
    },
    Error, Result,
};

/// File extension of template files.
pub const TEMPLATE_EXTENSION: &str = "template";

const ARGINDEX_MARKER: &str = " ARGINDEX ";

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Deserialize)]
struct RawTemplate {
    #[serde(rename = "METADATA")]
    metadata: Map<String, Value>,
    #[serde(rename = "MANIFESTPARAMS", default)]
    manifest: Option<Value>,
    #[serde(rename = "CODEPARAMS", default)]
    code: Option<RawCode>,
    #[serde(rename = "GRAPH", default)]
    graph: Option<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCode {
    #[serde(rename = "SEARCH", default)]
    search: Option<OneOrMany<Map<String, Value>>>,
    #[serde(rename = "TRACE", default)]
    trace: Option<OneOrMany<RawTrace>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTrace {
    #[serde(rename = "TRACEFROM")]
    from: Option<String>,
    #[serde(rename = "TRACETO")]
    to: Option<String>,
    #[serde(rename = "TRACEDIRECTION", default)]
    direction: Option<String>,
    #[serde(rename = "TRACETYPE", default)]
    mode: Option<String>,
    #[serde(rename = "TRACELENGTHMAX", default)]
    max_length: Option<usize>,
    #[serde(rename = "RETURN", default)]
    returns: Option<OneOrMany<String>>,
}

/// Tracks binding identifiers across one template.
struct Identifiers<'t> {
    template: &'t str,
    seen: HashSet<String>,
}

impl<'t> Identifiers<'t> {
    fn new(template: &'t str) -> Self {
        Identifiers {
            template,
            seen: HashSet::new(),
        }
    }

    fn register(&mut self, id: &str) -> Result<()> {
        if !is_valid_identifier(id) {
            return Err(template_error!(
                self.template,
                "Invalid identifier {} - must be @ followed by letters, digits or _",
                id
            ));
        }
        if id == RESERVED_APP_ID {
            return Err(template_error!(self.template, "{} is reserved", id));
        }
        if !self.seen.insert(id.to_string()) {
            return Err(template_error!(self.template, "Duplicate identifier {}", id));
        }
        Ok(())
    }
}

/// Parses and validates bug templates.
///
/// # Examples
///
/// ```rust
/// use bugscope::template::TemplateParser;
///
/// let template = TemplateParser::new().parse_str(r#"{
///     "METADATA": { "NAME": "ExternalStorage" },
///     "CODEPARAMS": {
///         "SEARCH": { "SEARCHFORSTRING": "/sdcard" }
///     }
/// }"#)?;
///
/// assert_eq!(template.name, "ExternalStorage");
/// # Ok::<(), bugscope::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateParser {}

impl TemplateParser {
    /// Creates a new parser.
    #[must_use]
    pub fn new() -> Self {
        TemplateParser {}
    }

    /// Parses one template from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON and [`Error::Template`] for any violated
    /// template rule.
    pub fn parse_str(&self, source: &str) -> Result<BugTemplate> {
        let value: Value = serde_json::from_str(source)?;
        self.parse_value(value)
    }

    /// Parses one template file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be read, otherwise the same errors as
    /// [`TemplateParser::parse_str`]. Template errors carry the file path if the template
    /// name could not be read.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<BugTemplate> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&source)
            .map_err(|e| template_error!(path.display(), "Invalid JSON - {}", e))?;

        let mut template = self.parse_value(value).map_err(|e| match e {
            Error::Template { template, message } if template.is_empty() => {
                template_error!(path.display(), message)
            }
            other => other,
        })?;
        template.source = Some(path.to_path_buf());
        Ok(template)
    }

    /// Parses one template from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] for any violated template rule.
    pub fn parse_value(&self, value: Value) -> Result<BugTemplate> {
        let name = value
            .get("METADATA")
            .and_then(|m| m.get("NAME"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return Err(template_error!(
                "",
                "METADATA section with a string NAME is required"
            ));
        }

        let raw: RawTemplate =
            serde_json::from_value(value).map_err(|e| template_error!(&name, e))?;

        let mut ids = Identifiers::new(&name);

        let manifest = match raw.manifest {
            Some(params) if !is_empty_object(&params) => {
                let spec = ManifestSpec::parse(&name, params)?;
                for id in spec.return_ids() {
                    ids.register(id)?;
                }
                Some(spec)
            }
            _ => None,
        };

        let code = match raw.code {
            Some(code) => {
                let spec = Self::parse_code(&name, code, &mut ids)?;
                (!spec.is_empty()).then_some(spec)
            }
            None => None,
        };

        if manifest.is_none() && code.is_none() {
            return Err(template_error!(
                &name,
                "Neither MANIFESTPARAMS nor CODEPARAMS sections present"
            ));
        }

        let graph = raw
            .graph
            .map(|graph| Self::parse_graph(&name, &graph))
            .transpose()?;

        let mut metadata = raw.metadata;
        metadata.remove("NAME");

        debug!("Parsed template {}", name);
        Ok(BugTemplate {
            name,
            metadata,
            manifest,
            code,
            graph,
            source: None,
        })
    }

    /// Loads every `*.template` file below `dir`.
    ///
    /// Files are parsed in parallel. Invalid templates are logged and skipped, as are
    /// templates whose name was already loaded from a file earlier in path order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the directory cannot be read. Errors in individual
    /// templates never fail the load.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<TemplateSet> {
        let mut paths = Vec::new();
        collect_template_files(dir.as_ref(), &mut paths)?;
        paths.sort();
        Ok(self.load_files(&paths))
    }

    /// Loads the given template files; see [`TemplateParser::load_dir`].
    #[must_use]
    pub fn load_files(&self, paths: &[PathBuf]) -> TemplateSet {
        let parsed: Vec<(&PathBuf, Result<BugTemplate>)> = paths
            .par_iter()
            .map(|path| (path, self.parse_file(path)))
            .collect();

        let mut set = TemplateSet::default();
        for (path, result) in parsed {
            match result {
                Ok(template) => {
                    if let Err(e) = set.insert(template) {
                        warn!("Skipping {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} of {} templates", set.len(), paths.len());
        set
    }

    fn parse_code(name: &str, raw: RawCode, ids: &mut Identifiers<'_>) -> Result<CodeSpec> {
        let mut code = CodeSpec::default();

        for rule in raw.search.map(OneOrMany::into_vec).unwrap_or_default() {
            code.search.push(Self::parse_search_rule(name, rule, ids)?);
        }
        for rule in raw.trace.map(OneOrMany::into_vec).unwrap_or_default() {
            code.trace.push(Self::parse_trace_rule(name, rule, ids)?);
        }

        Ok(code)
    }

    fn parse_search_rule(
        name: &str,
        rule: Map<String, Value>,
        ids: &mut Identifiers<'_>,
    ) -> Result<SearchRule> {
        if rule.is_empty() {
            return Err(template_error!(name, "SEARCH object structure is invalid"));
        }

        let mut clauses = Vec::with_capacity(rule.len());
        for (key, value) in rule {
            let search_type = key
                .parse::<SearchType>()
                .map_err(|_| template_error!(name, "Unrecognised search type {}", key))?;
            clauses.push(Self::parse_search_clause(name, search_type, value, ids)?);
        }
        Ok(SearchRule { clauses })
    }

    fn parse_search_clause(
        name: &str,
        search_type: SearchType,
        value: Value,
        ids: &mut Identifiers<'_>,
    ) -> Result<SearchClause> {
        if !search_type.is_call_site() {
            return match value {
                Value::String(target) => Ok(SearchClause {
                    search_type,
                    target: Self::parse_target(name, search_type, &target)?,
                    location: None,
                    returns: Vec::new(),
                }),
                Value::Object(obj) if obj.contains_key("SEARCHLOCATION") => Err(template_error!(
                    name,
                    "{} cannot have SEARCHLOCATION",
                    search_type
                )),
                Value::Object(obj) if obj.contains_key("RETURN") => {
                    Err(template_error!(name, "{} cannot have RETURN", search_type))
                }
                _ => Err(template_error!(name, "{} must be a string", search_type)),
            };
        }

        let Value::Object(mut obj) = value else {
            return Err(template_error!(name, "{} must be an object", search_type));
        };

        let subject = search_type.subject_key();
        let target = match obj.remove(subject) {
            Some(Value::String(target)) => Self::parse_target(name, search_type, &target)?,
            Some(_) => return Err(template_error!(name, "{} must be a string", subject)),
            None => {
                return Err(template_error!(
                    name,
                    "{} subkey required in {}",
                    subject,
                    search_type
                ))
            }
        };

        let location = match obj.remove("SEARCHLOCATION") {
            Some(Value::String(location)) => Some(Self::parse_location(name, &location)?),
            Some(_) => return Err(template_error!(name, "SEARCHLOCATION must be a string")),
            None => None,
        };

        let returns = match obj.remove("RETURN") {
            Some(returns) => Self::parse_returns(name, returns)?,
            None => Vec::new(),
        };
        for binding in &returns {
            if binding.shape == ReturnShape::TracePath {
                return Err(template_error!(
                    name,
                    "SEARCH RETURNs must be either <class> or <method>"
                ));
            }
            if binding.id.starts_with(TRACEPATH_PREFIX) {
                return Err(template_error!(
                    name,
                    "{} prefix is reserved for TRACE RETURNs",
                    TRACEPATH_PREFIX
                ));
            }
            ids.register(&binding.id)?;
        }

        if let Some(key) = obj.keys().next() {
            return Err(template_error!(
                name,
                "Unrecognised key {} in {}",
                key,
                search_type
            ));
        }

        Ok(SearchClause {
            search_type,
            target,
            location,
            returns,
        })
    }

    fn parse_target(name: &str, search_type: SearchType, target: &str) -> Result<Pattern> {
        let pattern = Pattern::parse(target);
        if pattern.is_empty() {
            return Err(template_error!(name, "{} has an empty target", search_type));
        }
        Ok(pattern)
    }

    fn parse_location(name: &str, location: &str) -> Result<LocationFilter> {
        let bare = location.trim().trim_start_matches("NOT ").trim_start();
        if bare.starts_with('<') {
            let known = ["<class>:", "<method>:"]
                .iter()
                .any(|prefix| bare.starts_with(prefix));
            if !known {
                return Err(template_error!(
                    name,
                    "Location must be either <class> or <method>"
                ));
            }
        }
        LocationFilter::parse(location)
            .ok_or_else(|| template_error!(name, "SEARCHLOCATION is empty"))
    }

    fn parse_returns(name: &str, returns: Value) -> Result<Vec<ReturnBinding>> {
        let items: Vec<String> = match returns {
            Value::String(s) => s.split(',').map(str::to_string).collect(),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(template_error!(name, "RETURN element must be a string")),
                })
                .collect::<Result<_>>()?,
            _ => return Err(template_error!(name, "RETURN must be list or string")),
        };

        items
            .iter()
            .map(|item| {
                ReturnBinding::parse(item).ok_or_else(|| {
                    template_error!(
                        name,
                        "RETURN {:?} must be <class>, <method> or <tracepath> AS @identifier",
                        item.trim()
                    )
                })
            })
            .collect()
    }

    fn parse_trace_rule(
        name: &str,
        raw: RawTrace,
        ids: &mut Identifiers<'_>,
    ) -> Result<TraceRule> {
        let from_raw = raw
            .from
            .ok_or_else(|| template_error!(name, "Trace object must have TRACEFROM key"))?;
        let to_raw = raw
            .to
            .ok_or_else(|| template_error!(name, "Trace object must have TRACETO key"))?;

        let direction = match raw.direction {
            Some(d) => d.parse::<Direction>().map_err(|_| {
                template_error!(name, "TRACEDIRECTION must be either FORWARD or REVERSE")
            })?,
            None => Direction::default(),
        };
        let mode = match raw.mode {
            Some(m) => m.parse::<TraceMode>().map_err(|_| {
                template_error!(name, "TRACETYPE must be either BASIC or ADVANCED")
            })?,
            None => TraceMode::default(),
        };
        if raw.max_length == Some(0) {
            return Err(template_error!(name, "TRACELENGTHMAX must be at least 1"));
        }

        let from = TracePoint::parse(&from_raw)
            .ok_or_else(|| template_error!(name, "Invalid TRACEFROM {:?}", from_raw))?;
        let to = TracePoint::parse(&to_raw)
            .ok_or_else(|| template_error!(name, "Invalid TRACETO {:?}", to_raw))?;

        Self::check_trace_qualifiers(name, mode, direction, (&from, &from_raw), (&to, &to_raw))?;

        let returns = match raw.returns {
            Some(returns) => returns
                .into_vec()
                .iter()
                .map(|item| {
                    ReturnBinding::parse(item)
                        .ok_or_else(|| template_error!(name, "Trace RETURN must have AS identifier"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        for binding in &returns {
            if binding.shape != ReturnShape::TracePath {
                return Err(template_error!(name, "Trace RETURN AS must be <tracepath>"));
            }
            if !binding.id.starts_with(TRACEPATH_PREFIX) {
                return Err(template_error!(
                    name,
                    "Trace RETURN identifier must begin with \"{}\"",
                    TRACEPATH_PREFIX
                ));
            }
            ids.register(&binding.id)?;
        }

        Ok(TraceRule {
            from,
            to,
            direction,
            mode,
            max_length: raw.max_length,
            returns,
        })
    }

    fn check_trace_qualifiers(
        name: &str,
        mode: TraceMode,
        direction: Direction,
        (from, from_raw): (&TracePoint, &str),
        (to, to_raw): (&TracePoint, &str),
    ) -> Result<()> {
        let from_index = from_raw.contains(ARGINDEX_MARKER);
        let to_index = to_raw.contains(ARGINDEX_MARKER);

        if mode == TraceMode::Basic {
            if from.qualifier.is_some() || to.qualifier.is_some() || from_index || to_index {
                return Err(template_error!(
                    name,
                    "BASIC TRACETYPE cannot have RESULTOF, ARGTO or ARGINDEX"
                ));
            }
            return Ok(());
        }

        let is_argto = |q: Option<Qualifier>| matches!(q, Some(Qualifier::ArgTo { .. }));
        let is_resultof = |q: Option<Qualifier>| q == Some(Qualifier::ResultOf);

        if (from_index && !is_argto(from.qualifier)) || (to_index && !is_argto(to.qualifier)) {
            return Err(template_error!(name, "Cannot have ARGINDEX without ARGTO"));
        }

        match direction {
            Direction::Reverse => {
                if is_resultof(from.qualifier) {
                    return Err(template_error!(
                        name,
                        "RESULTOF for TRACEFROM can only be used with FORWARD tracing"
                    ));
                }
                if is_argto(to.qualifier) {
                    return Err(template_error!(
                        name,
                        "ARGTO for TRACETO can only be used with FORWARD tracing"
                    ));
                }
            }
            Direction::Forward => {
                if is_argto(from.qualifier) {
                    return Err(template_error!(
                        name,
                        "ARGTO for TRACEFROM can only be used with REVERSE tracing"
                    ));
                }
                if !is_resultof(from.qualifier) {
                    return Err(template_error!(
                        name,
                        "TRACEFROM can only start from RESULTOF with FORWARD tracing"
                    ));
                }
                if is_resultof(to.qualifier) {
                    return Err(template_error!(
                        name,
                        "RESULTOF for TRACETO can only be used with REVERSE tracing"
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_graph(name: &str, graph: &Value) -> Result<GraphSpec> {
        let Value::String(expression) = graph else {
            return Err(template_error!(name, "GRAPH element must be string"));
        };
        if !expression.starts_with('@') {
            return Err(template_error!(
                name,
                "Only previous RETURNs (identified by \"@\") can be graphed"
            ));
        }
        let Some((element, attributes)) = expression.split_once(" WITH ") else {
            return Err(template_error!(name, "GRAPH element must have \"WITH\" keyword"));
        };

        let attributes: Vec<String> = attributes.split(',').map(|a| a.trim().to_string()).collect();
        for attribute in &attributes {
            if !attribute.contains(" AS ") {
                return Err(template_error!(
                    name,
                    "Attributes/labels must be specified using the \"AS\" keyword"
                ));
            }
            if !attribute.contains("attribute") && !attribute.contains("label") {
                return Err(template_error!(
                    name,
                    "GRAPH values must be used AS attribute or label"
                ));
            }
        }

        Ok(GraphSpec {
            expression: expression.clone(),
            element: element.trim().to_string(),
            attributes,
        })
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(Map::is_empty)
}

fn collect_template_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_template_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == TEMPLATE_EXTENSION) {
            paths.push(path);
        }
    }
    Ok(())
}

/// An ordered set of uniquely named templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<BugTemplateRc>,
}

impl TemplateSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Template`] if a template with the same name is already present.
    pub fn insert(&mut self, template: BugTemplate) -> Result<()> {
        if self.get(&template.name).is_some() {
            return Err(template_error!(
                &template.name,
                "Template name {} already exists",
                template.name
            ));
        }
        self.templates.push(Arc::new(template));
        Ok(())
    }

    /// Looks up a template by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BugTemplateRc> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Iterates over the templates in load order.
    pub fn iter(&self) -> impl Iterator<Item = &BugTemplateRc> {
        self.templates.iter()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl FromIterator<BugTemplate> for TemplateSet {
    fn from_iter<I: IntoIterator<Item = BugTemplate>>(iter: I) -> Self {
        let mut set = TemplateSet::default();
        for template in iter {
            if let Err(e) = set.insert(template) {
                warn!("{}", e);
            }
        }
        set
    }
}
