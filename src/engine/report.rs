//! Per-application analysis results.

use serde::Serialize;

use crate::{engine::evaluator::Evaluation, links::LinkTable, Result};

/// Verdict of one bug template for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugVerdict {
    /// Template name
    pub bug: String,
    /// `true` if the bug is present
    pub satisfied: bool,
    /// Values bound while evaluating; only kept for satisfied templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings: Option<LinkTable>,
}

impl BugVerdict {
    /// Builds the verdict of template `bug` from its evaluation.
    #[must_use]
    pub fn new(bug: &str, evaluation: Evaluation) -> Self {
        BugVerdict {
            bug: bug.to_string(),
            satisfied: evaluation.satisfied,
            bindings: evaluation.satisfied.then_some(evaluation.links),
        }
    }
}

/// All verdicts for one application, in template order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppReport {
    /// Application identifier
    pub app: String,
    /// One verdict per evaluated template
    pub bugs: Vec<BugVerdict>,
}

impl AppReport {
    /// Creates an empty report for `app`.
    #[must_use]
    pub fn new(app: &str) -> Self {
        AppReport {
            app: app.to_string(),
            bugs: Vec::new(),
        }
    }

    /// Verdicts of the bugs present in the application.
    pub fn satisfied(&self) -> impl Iterator<Item = &BugVerdict> {
        self.bugs.iter().filter(|verdict| verdict.satisfied)
    }

    /// Renders the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_only_for_present_bugs() {
        let mut links = LinkTable::new();
        links.bind("@x", "Lcom/app/Main;");

        let present = BugVerdict::new(
            "Present",
            Evaluation {
                satisfied: true,
                links: links.clone(),
            },
        );
        let absent = BugVerdict::new(
            "Absent",
            Evaluation {
                satisfied: false,
                links,
            },
        );
        assert!(present.bindings.is_some());
        assert!(absent.bindings.is_none());

        let mut report = AppReport::new("app.apk");
        report.bugs.push(present);
        report.bugs.push(absent);
        let names: Vec<&str> = report.satisfied().map(|v| v.bug.as_str()).collect();
        assert_eq!(names, vec!["Present"]);
    }
}
