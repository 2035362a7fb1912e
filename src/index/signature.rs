//! Class, method and field signatures in Dalvik descriptor notation.
//!
//! Methods are written `Lpkg/Class;->name(args)ret`, fields `Lpkg/Class;->name:type`. Rules and
//! link tables pass these around as plain strings; this module provides the typed forms used
//! when talking to a [`crate::index::BytecodeIndex`], plus the loose string helpers that split a
//! signature into its class and method parts.

use std::fmt;

use crate::{Error, Result};

/// Separator between the class part and the member part of a signature.
pub const MEMBER_SEPARATOR: &str = "->";

/// Returns the class part of a signature (everything before `->`, or the whole string).
///
/// # Examples
///
/// ```rust
/// use bugscope::index::class_part;
///
/// assert_eq!(class_part("Lcom/a/B;->run()V"), "Lcom/a/B;");
/// assert_eq!(class_part("Lcom/a/B;"), "Lcom/a/B;");
/// ```
#[must_use]
pub fn class_part(signature: &str) -> &str {
    match signature.find(MEMBER_SEPARATOR) {
        Some(pos) => &signature[..pos],
        None => signature,
    }
}

/// Returns `true` if the signature carries a member part.
#[must_use]
pub fn has_member_part(signature: &str) -> bool {
    signature.contains(MEMBER_SEPARATOR)
}

/// A fully qualified method: declaring class, name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Declaring class, e.g. `Lcom/app/Main;`
    pub class: String,
    /// Method name, e.g. `onCreate`
    pub name: String,
    /// Descriptor including parentheses and return type, e.g. `(Landroid/os/Bundle;)V`
    pub descriptor: String,
}

impl MethodRef {
    /// Creates a new method reference from its parts.
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        MethodRef {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Parses a full method signature.
    ///
    /// # Arguments
    ///
    /// * `signature` - A signature of the form `Lpkg/Class;->name(args)ret`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signature`] if the class part, the `->` separator, the name, or the
    /// parenthesised descriptor is missing.
    pub fn parse(signature: &str) -> Result<Self> {
        let query = MethodQuery::parse(signature);
        match (query.name, query.descriptor) {
            (Some(name), Some(descriptor)) if !query.class.is_empty() && !name.is_empty() => {
                Ok(MethodRef {
                    class: query.class,
                    name,
                    descriptor,
                })
            }
            _ => Err(Error::Signature(signature.to_string())),
        }
    }

    /// Returns `name` followed by `descriptor`, e.g. `run()V`.
    #[must_use]
    pub fn name_descriptor(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    /// Returns a query that matches exactly this method.
    #[must_use]
    pub fn to_query(&self) -> MethodQuery {
        MethodQuery {
            class: self.class.clone(),
            name: Some(self.name.clone()),
            descriptor: Some(self.descriptor.clone()),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.class, MEMBER_SEPARATOR, self.name, self.descriptor
        )
    }
}

/// A possibly partial method signature.
///
/// A query always names a class; name and descriptor are optional and act as wildcards when
/// absent. The trace engine also uses queries as call-graph nodes, since class-scoped end-points
/// and the indirect-dispatch substitutions do not name a complete method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodQuery {
    /// Declaring class
    pub class: String,
    /// Method name, any if `None`
    pub name: Option<String>,
    /// Method descriptor, any if `None`
    pub descriptor: Option<String>,
}

impl MethodQuery {
    /// Creates a query matching every method of `class`.
    pub fn class(class: impl Into<String>) -> Self {
        MethodQuery {
            class: class.into(),
            name: None,
            descriptor: None,
        }
    }

    /// Creates a query for `class->name` with any descriptor.
    pub fn named(class: impl Into<String>, name: impl Into<String>) -> Self {
        MethodQuery {
            class: class.into(),
            name: Some(name.into()),
            descriptor: None,
        }
    }

    /// Splits a loose signature into class, name and descriptor.
    ///
    /// `Lcom/a/B;` yields a class-only query, `Lcom/a/B;->run` a query without descriptor, and
    /// `Lcom/a/B;->run()V` a complete one. Parsing never fails; validation of complete
    /// signatures happens in [`MethodRef::parse`].
    #[must_use]
    pub fn parse(signature: &str) -> Self {
        let Some(pos) = signature.find(MEMBER_SEPARATOR) else {
            return MethodQuery::class(signature.trim());
        };

        let class = signature[..pos].trim().to_string();
        let member = signature[pos + MEMBER_SEPARATOR.len()..].trim();
        match member.find('(') {
            Some(paren) => MethodQuery {
                class,
                name: Some(member[..paren].to_string()),
                descriptor: Some(member[paren..].to_string()),
            },
            None if member.is_empty() => MethodQuery::class(class),
            None => MethodQuery {
                class,
                name: Some(member.to_string()),
                descriptor: None,
            },
        }
    }

    /// Returns a copy of this query targeting a different class.
    #[must_use]
    pub fn with_class(&self, class: &str) -> Self {
        MethodQuery {
            class: class.to_string(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Returns `true` if `method` satisfies every part this query specifies.
    #[must_use]
    pub fn matches(&self, method: &MethodRef) -> bool {
        self.class == method.class
            && self.name.as_ref().is_none_or(|name| *name == method.name)
            && self
                .descriptor
                .as_ref()
                .is_none_or(|descriptor| *descriptor == method.descriptor)
    }

    /// Returns the complete method, if both name and descriptor are set.
    #[must_use]
    pub fn as_method(&self) -> Option<MethodRef> {
        match (&self.name, &self.descriptor) {
            (Some(name), Some(descriptor)) => Some(MethodRef::new(
                self.class.clone(),
                name.clone(),
                descriptor.clone(),
            )),
            _ => None,
        }
    }
}

impl From<&MethodRef> for MethodQuery {
    fn from(method: &MethodRef) -> Self {
        method.to_query()
    }
}

impl fmt::Display for MethodQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.class)?;
        if let Some(name) = &self.name {
            write!(f, "{MEMBER_SEPARATOR}{name}")?;
            if let Some(descriptor) = &self.descriptor {
                f.write_str(descriptor)?;
            }
        }
        Ok(())
    }
}

/// A fully qualified field: declaring class, name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Declaring class
    pub class: String,
    /// Field name
    pub name: String,
    /// Field type descriptor, e.g. `Ljava/lang/String;`
    pub type_desc: String,
}

impl FieldRef {
    /// Creates a new field reference from its parts.
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        type_desc: impl Into<String>,
    ) -> Self {
        FieldRef {
            class: class.into(),
            name: name.into(),
            type_desc: type_desc.into(),
        }
    }

    /// Parses `Lpkg/Class;->name:type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signature`] if the separator or the type is missing.
    pub fn parse(signature: &str) -> Result<Self> {
        let invalid = || Error::Signature(signature.to_string());

        let pos = signature.find(MEMBER_SEPARATOR).ok_or_else(invalid)?;
        let member = &signature[pos + MEMBER_SEPARATOR.len()..];
        let (name, type_desc) = member.split_once(':').ok_or_else(invalid)?;
        if pos == 0 || name.is_empty() || type_desc.is_empty() {
            return Err(invalid());
        }

        Ok(FieldRef::new(&signature[..pos], name, type_desc))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}:{}",
            self.class, MEMBER_SEPARATOR, self.name, self.type_desc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_method() {
        let method = MethodRef::parse("Lcom/a/B;->run(ILjava/lang/String;)V").unwrap();
        assert_eq!(method.class, "Lcom/a/B;");
        assert_eq!(method.name, "run");
        assert_eq!(method.descriptor, "(ILjava/lang/String;)V");
        assert_eq!(method.to_string(), "Lcom/a/B;->run(ILjava/lang/String;)V");
        assert_eq!(method.name_descriptor(), "run(ILjava/lang/String;)V");
    }

    #[test]
    fn parse_rejects_partial_method() {
        assert!(MethodRef::parse("Lcom/a/B;").is_err());
        assert!(MethodRef::parse("Lcom/a/B;->run").is_err());
        assert!(MethodRef::parse("->run()V").is_err());
    }

    #[test]
    fn query_parts() {
        let q = MethodQuery::parse("Lcom/a/B;");
        assert_eq!(q, MethodQuery::class("Lcom/a/B;"));

        let q = MethodQuery::parse("Lcom/a/B;->run");
        assert_eq!(q, MethodQuery::named("Lcom/a/B;", "run"));
        assert_eq!(q.to_string(), "Lcom/a/B;->run");

        let q = MethodQuery::parse("Lcom/a/B;->run()V");
        assert_eq!(q.descriptor.as_deref(), Some("()V"));
        assert!(q.as_method().is_some());
    }

    #[test]
    fn query_matching() {
        let method = MethodRef::new("Lcom/a/B;", "run", "()V");
        assert!(MethodQuery::class("Lcom/a/B;").matches(&method));
        assert!(MethodQuery::named("Lcom/a/B;", "run").matches(&method));
        assert!(!MethodQuery::named("Lcom/a/B;", "stop").matches(&method));
        assert!(!MethodQuery::parse("Lcom/a/B;->run(I)V").matches(&method));
        assert!(!MethodQuery::class("Lcom/a/C;").matches(&method));
    }

    #[test]
    fn class_part_helpers() {
        assert_eq!(class_part("La;->b()V"), "La;");
        assert!(has_member_part("La;->b()V"));
        assert!(!has_member_part("La;"));
    }

    #[test]
    fn parse_field() {
        let field = FieldRef::parse("Lcom/a/B;->url:Ljava/lang/String;").unwrap();
        assert_eq!(field.name, "url");
        assert_eq!(field.type_desc, "Ljava/lang/String;");
        assert_eq!(field.to_string(), "Lcom/a/B;->url:Ljava/lang/String;");
        assert!(FieldRef::parse("Lcom/a/B;->url").is_err());
    }
}
