//! Bound identifiers shared between the rules of one bug evaluation.
//!
//! Rules discover values (call sites, classes, trace paths) and bind them under `@`-prefixed
//! identifiers; later rules refer back to them with link references such as `@caller`,
//! `@caller[<class>]` or `@caller[<class>]->run()V`. A [`LinkTable`] lives for exactly one
//! (application, bug) evaluation.

use std::{collections::HashMap, fmt};

use serde::ser::{Serialize, SerializeMap, Serializer};
use strum::{AsRefStr, Display, EnumString};

use crate::index::{class_part, has_member_part};

/// Prefix of every link identifier.
pub const LINK_PREFIX: char = '@';

/// Identifier reserved for the application under analysis.
pub const RESERVED_APP_ID: &str = "@app";

/// Prefix required for identifiers bound by trace rules.
pub const TRACEPATH_PREFIX: &str = "@tracepath_";

/// Selects one part of a bound signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum Subpart {
    /// The class part, everything before `->`
    #[strum(serialize = "<class>")]
    Class,
    /// The whole signature, only for values carrying a member part
    #[strum(serialize = "<method>")]
    Method,
}

/// Ordered multi-map of bound identifiers to discovered values.
///
/// Identifiers and the values bound to each identifier keep their first-insertion order, and a
/// value is never bound twice under the same identifier.
///
/// # Examples
///
/// ```rust
/// use bugscope::links::{LinkTable, Subpart};
///
/// let mut links = LinkTable::new();
/// links.bind("@caller", "Lcom/a/B;->run()V");
/// links.bind("@caller", "Lcom/a/C;");
/// links.bind("@caller", "Lcom/a/B;->run()V");
///
/// assert_eq!(links.resolve("@caller").len(), 2);
/// assert_eq!(links.resolve_subpart("@caller", Some(Subpart::Method)), vec!["Lcom/a/B;->run()V"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    entries: Vec<(String, Vec<String>)>,
    lookup: HashMap<String, usize>,
}

impl LinkTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` under `id` if it is not already bound there.
    ///
    /// Returns `true` if the value was added.
    pub fn bind(&mut self, id: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        let idx = match self.lookup.get(id) {
            Some(&idx) => idx,
            None => {
                self.entries.push((id.to_string(), Vec::new()));
                self.lookup.insert(id.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        let values = &mut self.entries[idx].1;
        if values.contains(&value) {
            false
        } else {
            values.push(value);
            true
        }
    }

    /// Binds every value of `values` under `id`, in order.
    pub fn bind_all<I, S>(&mut self, id: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self.bind(id, value);
        }
    }

    /// Returns the values bound under `id`, empty if unknown.
    #[must_use]
    pub fn resolve(&self, id: &str) -> &[String] {
        self.lookup
            .get(id)
            .map_or(&[][..], |&idx| self.entries[idx].1.as_slice())
    }

    /// Returns the values bound under `id`, reduced to `subpart`.
    ///
    /// * `None` - the whole values
    /// * `Some(Subpart::Class)` - the distinct class parts
    /// * `Some(Subpart::Method)` - the whole values that carry a member part
    #[must_use]
    pub fn resolve_subpart(&self, id: &str, subpart: Option<Subpart>) -> Vec<String> {
        let values = self.resolve(id);
        let mut result: Vec<String> = Vec::with_capacity(values.len());
        for value in values {
            let selected = match subpart {
                None => value.as_str(),
                Some(Subpart::Class) => class_part(value),
                Some(Subpart::Method) if has_member_part(value) => value.as_str(),
                Some(Subpart::Method) => continue,
            };
            if !result.iter().any(|v| v == selected) {
                result.push(selected.to_string());
            }
        }
        result
    }

    /// Returns `true` if at least one value is bound under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        !self.resolve(id).is_empty()
    }

    /// Number of bound identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(identifier, values)` in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(id, values)| (id.as_str(), values.as_slice()))
    }
}

impl Serialize for LinkTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, values) in &self.entries {
            map.serialize_entry(id, values)?;
        }
        map.end()
    }
}

/// A reference to bound values: `@id`, optionally followed by a `[<class>]`/`[<method>]`
/// selector and a literal suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkRef {
    /// The identifier including the `@` prefix
    pub id: String,
    /// Optional part selector
    pub subpart: Option<Subpart>,
    /// Literal text appended to every resolved value
    pub suffix: String,
}

impl LinkRef {
    /// Parses a link reference; returns `None` if `term` does not start with `@`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bugscope::links::{LinkRef, Subpart};
    ///
    /// let link = LinkRef::parse("@task[<class>]->execute()V").unwrap();
    /// assert_eq!(link.id, "@task");
    /// assert_eq!(link.subpart, Some(Subpart::Class));
    /// assert_eq!(link.suffix, "->execute()V");
    /// assert!(LinkRef::parse("Lcom/a/B;").is_none());
    /// ```
    #[must_use]
    pub fn parse(term: &str) -> Option<LinkRef> {
        let term = term.trim();
        let rest = term.strip_prefix(LINK_PREFIX)?;

        let id_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let id = format!("{LINK_PREFIX}{}", &rest[..id_len]);
        let mut rest = &rest[id_len..];

        let mut subpart = None;
        if let Some(inner) = rest.strip_prefix('[') {
            if let Some((selector, tail)) = inner.split_once(']') {
                if let Ok(parsed) = selector.parse::<Subpart>() {
                    subpart = Some(parsed);
                    rest = tail;
                }
            }
        }

        Some(LinkRef {
            id,
            subpart,
            suffix: rest.to_string(),
        })
    }

    /// Resolves the reference against `links`, appending the suffix to every value.
    #[must_use]
    pub fn expand(&self, links: &LinkTable) -> Vec<String> {
        links
            .resolve_subpart(&self.id, self.subpart)
            .into_iter()
            .map(|value| format!("{value}{}", self.suffix))
            .collect()
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)?;
        if let Some(subpart) = self.subpart {
            write!(f, "[{subpart}]")?;
        }
        f.write_str(&self.suffix)
    }
}

/// Returns `true` if `id` is a syntactically valid binding identifier.
#[must_use]
pub fn is_valid_identifier(id: &str) -> bool {
    id.strip_prefix(LINK_PREFIX).is_some_and(|name| {
        !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
    })
}
