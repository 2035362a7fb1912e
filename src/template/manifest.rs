//! Structural validation of `MANIFESTPARAMS`.
//!
//! Manifest conditions are matched by an external manifest matcher; the engine only checks
//! that the section is well formed and collects the identifiers it binds, so that identifier
//! uniqueness can be enforced across the whole template.

use serde_json::{Map, Value};

use crate::{template::pattern::OR_SEPARATOR, Result};

const LOOKFOR: &str = "LOOKFOR";
const RETURN: &str = "RETURN";
const BASEPATH: &str = "BASEPATH";
const SEARCHPATH: &str = "SEARCHPATH";

const TAG_EXISTS: &str = "TAGEXISTS";
const TAG_NOT_EXISTS: &str = "TAGNOTEXISTS";
const TAG_VALUE_MATCH: &str = "TAGVALUEMATCH";
const TAG_VALUE_NO_MATCH: &str = "TAGVALUENOMATCH";
const LOOKFOR_KEYS: [&str; 4] = [TAG_EXISTS, TAG_NOT_EXISTS, TAG_VALUE_MATCH, TAG_VALUE_NO_MATCH];

/// A validated `MANIFESTPARAMS` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSpec {
    params: Value,
    return_ids: Vec<String>,
}

impl ManifestSpec {
    /// Validates a raw `MANIFESTPARAMS` value.
    ///
    /// # Arguments
    ///
    /// * `template` - Template name, for error messages
    /// * `params` - The raw section
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Template`] if the section violates any structural rule.
    pub fn parse(template: &str, params: Value) -> Result<Self> {
        let Value::Object(root) = &params else {
            return Err(template_error!(template, "MANIFESTPARAMS must be an object"));
        };

        if let Some(basepath) = root.get(BASEPATH) {
            let Value::String(basepath) = basepath else {
                return Err(template_error!(template, "BASEPATH must be a string"));
            };
            if basepath.contains(" AND ") {
                return Err(template_error!(template, "AND cannot be used within BASEPATH"));
            }
        }

        if let Some(searchpath) = root.get(SEARCHPATH) {
            if !searchpath.is_object() {
                return Err(template_error!(template, "SEARCHPATH must be an object"));
            }
            if searchpath.to_string().contains(" AND ") {
                return Err(template_error!(
                    template,
                    "AND cannot be used within SEARCHPATH"
                ));
            }
        }

        let mut return_ids = Vec::new();
        check_level(template, root, &mut return_ids)?;

        Ok(ManifestSpec { params, return_ids })
    }

    /// The raw section, for the manifest matcher.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Identifiers bound by the section's `RETURN` entries.
    #[must_use]
    pub fn return_ids(&self) -> &[String] {
        &self.return_ids
    }
}

fn check_level(template: &str, level: &Map<String, Value>, ids: &mut Vec<String>) -> Result<()> {
    if let Some(lookfor) = level.get(LOOKFOR) {
        check_lookfor(template, lookfor)?;
    }
    if let Some(returns) = level.get(RETURN) {
        check_return(template, returns, ids)?;
    }

    for (key, value) in level {
        if key == LOOKFOR || key == RETURN {
            continue;
        }
        match value {
            Value::Object(child) => check_level(template, child, ids)?,
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(child) = item {
                        check_level(template, child, ids)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Returns the string values of a LOOKFOR option, which may be a string or a list of strings.
fn option_values<'v>(template: &str, key: &str, value: &'v Value) -> Result<Vec<&'v str>> {
    match value {
        Value::String(s) => Ok(vec![s.as_str()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| template_error!(template, "{} must be list or string", key))
            })
            .collect(),
        _ => Err(template_error!(template, "{} must be list or string", key)),
    }
}

fn is_exported_tag(condition: &str) -> bool {
    let tag = condition.split('=').next().unwrap_or_default().trim();
    tag.split(':').nth(1) == Some("exported")
}

fn check_lookfor(template: &str, lookfor: &Value) -> Result<()> {
    let Value::Object(lookfor) = lookfor else {
        return Err(template_error!(template, "LOOKFOR element must be an object"));
    };

    if lookfor.contains_key(RETURN) {
        return Err(template_error!(
            template,
            "LOOKFOR object cannot have RETURN sub-key"
        ));
    }
    if let Some(key) = lookfor.keys().find(|k| !LOOKFOR_KEYS.contains(&k.as_str())) {
        return Err(template_error!(template, "Unrecognised LOOKFOR key {}", key));
    }
    if lookfor.is_empty() {
        return Err(template_error!(template, "No valid LOOKFOR keyword(s)"));
    }

    for (key, value) in lookfor {
        let values = option_values(template, key, value)?;
        for condition in values {
            match key.as_str() {
                TAG_EXISTS if condition.contains(' ') => {
                    return Err(template_error!(
                        template,
                        "TAGEXISTS must only specify name of tag"
                    ));
                }
                TAG_NOT_EXISTS | TAG_VALUE_NO_MATCH if condition.contains(OR_SEPARATOR) => {
                    return Err(template_error!(template, "{} cannot have \"OR\"", key));
                }
                TAG_VALUE_MATCH if is_exported_tag(condition) && condition.contains(OR_SEPARATOR) => {
                    return Err(template_error!(
                        template,
                        "Exported tag cannot match on more than one value"
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn check_return(template: &str, returns: &Value, ids: &mut Vec<String>) -> Result<()> {
    let values = match returns {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| template_error!(template, "RETURN element must be a string"))
            })
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(template_error!(
                template,
                "RETURN element must be list or string"
            ))
        }
    };

    for value in values {
        let parts: Vec<&str> = value.split(" AS ").collect();
        if parts.len() != 2 {
            return Err(template_error!(
                template,
                "RETURN element must have unique \"AS\" identifier"
            ));
        }
        let id = parts[1].trim();
        if !id.starts_with('@') {
            return Err(template_error!(
                template,
                "RETURN \"AS\" identifier must begin with \"@\""
            ));
        }
        ids.push(id.to_string());
    }
    Ok(())
}
