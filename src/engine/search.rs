//! Evaluation of `SEARCH` rules.
//!
//! A search rule list is satisfied only if every rule is, and a rule only if every clause is.
//! Call-site clauses bind the surviving call sites; those bindings become visible to later
//! clauses of the same list at once, but are committed to the caller's [`LinkTable`] only if
//! the whole list is satisfied.

use tracing::debug;

use crate::{
    index::{class_part, IndexAdapter, MethodQuery, MethodRef},
    links::LinkTable,
    template::{LocationFilter, ReturnShape, Scope, SearchClause, SearchRule, SearchType},
    Result,
};

/// Evaluates search rules against one application.
pub struct SearchEngine<'e, 'a> {
    adapter: &'e IndexAdapter<'a>,
}

impl<'e, 'a> SearchEngine<'e, 'a> {
    /// Creates a search engine over `adapter`.
    #[must_use]
    pub fn new(adapter: &'e IndexAdapter<'a>) -> Self {
        SearchEngine { adapter }
    }

    /// Evaluates an AND-list of search rules.
    ///
    /// On success every binding made by the rules is appended to `links`; on failure `links`
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates index errors. An empty result is not an error.
    pub fn evaluate(&self, rules: &[SearchRule], links: &mut LinkTable) -> Result<bool> {
        let mut working = links.clone();
        for (position, rule) in rules.iter().enumerate() {
            if !self.evaluate_rule(rule, &mut working)? {
                debug!("Search rule {} not satisfied", position);
                return Ok(false);
            }
        }
        *links = working;
        Ok(true)
    }

    /// Evaluates one rule object, binding into `links` as it goes.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn evaluate_rule(&self, rule: &SearchRule, links: &mut LinkTable) -> Result<bool> {
        for clause in &rule.clauses {
            if !self.evaluate_clause(clause, links)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_clause(&self, clause: &SearchClause, links: &mut LinkTable) -> Result<bool> {
        let candidates = clause
            .target
            .expand(links, clause.search_type.default_subpart());
        if candidates.is_empty() {
            debug!("{} {} resolved to nothing", clause.search_type, clause.target);
            return Ok(false);
        }

        if !clause.search_type.is_call_site() {
            for candidate in &candidates {
                if self.exists(clause.search_type, candidate)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        let locations = clause
            .location
            .as_ref()
            .map(|filter| (filter, filter.pattern.expand(links, Some(filter.scope.subpart()))));
        if let Some((filter, values)) = &locations {
            if values.is_empty() {
                debug!("Search location {} resolved to nothing", filter.pattern);
                return Ok(false);
            }
        }

        let mut sites: Vec<MethodRef> = Vec::new();
        for candidate in &candidates {
            for site in self.call_sites(clause.search_type, candidate)? {
                let keep = match &locations {
                    Some((filter, values)) => location_matches(filter, values, &site),
                    None => true,
                };
                if keep && !sites.contains(&site) {
                    sites.push(site);
                }
            }
        }

        debug!(
            "{} {} found {} call sites",
            clause.search_type,
            clause.target,
            sites.len()
        );
        if sites.is_empty() {
            return Ok(false);
        }

        for binding in &clause.returns {
            for site in &sites {
                match binding.shape {
                    ReturnShape::Class => links.bind(&binding.id, site.class.as_str()),
                    ReturnShape::Method | ReturnShape::TracePath => {
                        links.bind(&binding.id, site.to_string())
                    }
                };
            }
        }
        Ok(true)
    }

    fn exists(&self, search_type: SearchType, candidate: &str) -> Result<bool> {
        match search_type {
            SearchType::MethodExists => self.adapter.method_exists(&MethodQuery::parse(candidate)),
            SearchType::ClassExists => self.adapter.class_exists(class_part(candidate)),
            SearchType::StringExists => self.adapter.string_exists(candidate),
            SearchType::CallsToMethod | SearchType::CallsToClass | SearchType::CallsToString => {
                Ok(false)
            }
        }
    }

    fn call_sites(&self, search_type: SearchType, candidate: &str) -> Result<Vec<MethodRef>> {
        match search_type {
            SearchType::CallsToMethod => self
                .adapter
                .calls_to_method(&MethodQuery::parse(candidate)),
            SearchType::CallsToClass => self.adapter.calls_to_class(class_part(candidate)),
            SearchType::CallsToString => self.adapter.calls_to_string(candidate),
            SearchType::MethodExists | SearchType::ClassExists | SearchType::StringExists => {
                Ok(Vec::new())
            }
        }
    }
}

/// Matches `value` against `pattern`, where a trailing `*` makes `pattern` a prefix.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

/// Decides whether a call site survives a location filter.
///
/// A plain filter keeps sites matching any of `values`; a negated one keeps sites matching
/// none of them.
fn location_matches(filter: &LocationFilter, values: &[String], site: &MethodRef) -> bool {
    let matched = match filter.scope {
        Scope::Class => values
            .iter()
            .any(|value| wildcard_match(class_part(value), &site.class)),
        Scope::Method => {
            let signature = site.to_string();
            values.iter().any(|value| wildcard_match(value, &signature))
        }
    };
    matched != filter.negated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, template::TemplateParser, test::android_app};

    fn rules(json: &str) -> Vec<SearchRule> {
        let source = format!(
            r#"{{"METADATA": {{"NAME": "t"}}, "CODEPARAMS": {{"SEARCH": {json}}}}}"#
        );
        TemplateParser::new()
            .parse_str(&source)
            .unwrap()
            .code
            .unwrap()
            .search
    }

    #[test]
    fn wildcard() {
        assert!(wildcard_match("Lcom/app/*", "Lcom/app/Main;"));
        assert!(!wildcard_match("Lcom/app/*", "Lcom/other/Main;"));
        assert!(wildcard_match("Lcom/app/Main;", "Lcom/app/Main;"));
        assert!(!wildcard_match("Lcom/app/Main", "Lcom/app/Main;"));
    }

    #[test]
    fn existence_searches() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        let engine = SearchEngine::new(&adapter);
        let mut links = LinkTable::new();

        assert!(engine
            .evaluate(&rules(r#"{"SEARCHFORCLASS": "Landroid/app/Activity;"}"#), &mut links)
            .unwrap());
        assert!(engine
            .evaluate(&rules(r#"{"SEARCHFORSTRING": "https://"}"#), &mut links)
            .unwrap());
        assert!(!engine
            .evaluate(&rules(r#"{"SEARCHFORSTRING": "ftp://"}"#), &mut links)
            .unwrap());
        assert!(engine
            .evaluate(
                &rules(r#"{"SEARCHFORMETHOD": "Lcom/app/Net;->send(Ljava/lang/String;)V"}"#),
                &mut links
            )
            .unwrap());
        assert!(links.is_empty());
    }

    #[test]
    fn call_site_bindings() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        let engine = SearchEngine::new(&adapter);
        let mut links = LinkTable::new();

        let satisfied = engine
            .evaluate(
                &rules(
                    r#"{"SEARCHFORCALLTOMETHOD": {
                        "METHOD": "Lcom/app/Net;->send(Ljava/lang/String;)V",
                        "RETURN": "<class> AS @sender, <method> AS @site"
                    }}"#,
                ),
                &mut links,
            )
            .unwrap();

        assert!(satisfied);
        assert_eq!(links.resolve("@sender"), &["Lcom/app/Main;"]);
        assert_eq!(
            links.resolve("@site"),
            &["Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V"]
        );
    }

    #[test]
    fn failed_search_binds_nothing() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        let engine = SearchEngine::new(&adapter);
        let mut links = LinkTable::new();

        let satisfied = engine
            .evaluate(
                &rules(
                    r#"[
                        {"SEARCHFORCALLTOCLASS": {"CLASS": "Lcom/app/Net;", "RETURN": "<class> AS @user"}},
                        {"SEARCHFORSTRING": "ftp://"}
                    ]"#,
                ),
                &mut links,
            )
            .unwrap();

        assert!(!satisfied);
        assert!(links.is_empty());
    }

    #[test]
    fn later_clauses_see_earlier_bindings() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        let engine = SearchEngine::new(&adapter);
        let mut links = LinkTable::new();

        let satisfied = engine
            .evaluate(
                &rules(
                    r#"[
                        {"SEARCHFORCALLTOMETHOD": {"METHOD": "Lcom/app/Net;->send(Ljava/lang/String;)V", "RETURN": "<class> AS @sender"}},
                        {"SEARCHFORMETHOD": "@sender[<class>]->onCreate(Landroid/os/Bundle;)V"}
                    ]"#,
                ),
                &mut links,
            )
            .unwrap();

        assert!(satisfied);
        assert_eq!(links.resolve("@sender"), &["Lcom/app/Main;"]);
    }

    #[test]
    fn location_filters() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        let engine = SearchEngine::new(&adapter);

        let search = |location: &str| {
            let mut links = LinkTable::new();
            let json = format!(
                r#"{{"SEARCHFORCALLTOCLASS": {{
                    "CLASS": "Lcom/app/Net;",
                    "SEARCHLOCATION": "{location}",
                    "RETURN": "<class> AS @user"
                }}}}"#
            );
            let satisfied = engine.evaluate(&rules(&json), &mut links).unwrap();
            (satisfied, links.resolve("@user").to_vec())
        };

        assert_eq!(search("<class>:Lcom/app/*").1.len(), 2);
        assert_eq!(search("Lcom/app/Main;").1, vec!["Lcom/app/Main;"]);
        assert_eq!(search("NOT Lcom/app/Main;").1, vec!["Lcom/app/Sync;"]);
        assert!(!search("NOT Lcom/app/*").0);
        assert_eq!(
            search("<method>:Lcom/app/Sync;->doInBackground([Ljava/lang/Object;)Ljava/lang/Object;").1,
            vec!["Lcom/app/Sync;"]
        );
    }
}
