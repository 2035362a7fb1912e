//! Framework dispatch that the static call graph does not show.
//!
//! `AsyncTask.execute(...)` runs the task's `doInBackground` on a worker thread, so the call
//! graph has an `execute` edge where control actually continues in `doInBackground`. Both
//! trace modes substitute one for the other when crossing such an edge.

use crate::{
    index::{IndexAdapter, MethodQuery, MethodRef},
    Result,
};

/// Base class of background tasks.
pub const ASYNC_TASK_CLASS: &str = "Landroid/os/AsyncTask;";

/// Method run by a background task.
pub const DO_IN_BACKGROUND: &str = "doInBackground";

/// Method that starts a background task.
pub const EXECUTE: &str = "execute";

/// Descriptors of the `execute` overloads that start `doInBackground`.
pub const EXECUTE_DESCRIPTORS: [&str; 2] = [
    "([Ljava/lang/Object;)Landroid/os/AsyncTask;",
    "(Ljava/lang/Runnable;)V",
];

/// `loadUrl` hands control from a web view to script code.
pub const LOAD_URL: &str = "loadUrl";

fn is_task(adapter: &IndexAdapter<'_>, class: &str) -> Result<bool> {
    adapter.is_same_or_subclass(class, ASYNC_TASK_CLASS)
}

/// Returns the methods whose call sites lead into `method`.
///
/// This is `method` itself, plus both `execute` overloads of its class if `method` is the
/// `doInBackground` of a background task.
///
/// # Errors
///
/// Propagates index errors.
pub fn reverse_targets(adapter: &IndexAdapter<'_>, method: &MethodQuery) -> Result<Vec<MethodQuery>> {
    let mut targets = vec![method.clone()];
    if method.name.as_deref() == Some(DO_IN_BACKGROUND) && is_task(adapter, &method.class)? {
        for descriptor in EXECUTE_DESCRIPTORS {
            targets.push(MethodQuery {
                class: method.class.clone(),
                name: Some(EXECUTE.to_string()),
                descriptor: Some(descriptor.to_string()),
            });
        }
    }
    Ok(targets)
}

/// Returns the method control continues in when `callee` is invoked.
///
/// An `execute` overload of a background task continues in that task's `doInBackground`,
/// whatever its descriptor; any other callee is returned unchanged.
///
/// # Errors
///
/// Propagates index errors.
pub fn forward_target(adapter: &IndexAdapter<'_>, callee: &MethodRef) -> Result<MethodQuery> {
    if callee.name == EXECUTE
        && EXECUTE_DESCRIPTORS.contains(&callee.descriptor.as_str())
        && is_task(adapter, &callee.class)?
    {
        return Ok(MethodQuery::named(callee.class.as_str(), DO_IN_BACKGROUND));
    }
    Ok(callee.to_query())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, test::android_app};

    #[test]
    fn execute_continues_in_background() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());

        let execute = MethodRef::new(
            "Lcom/app/Sync;",
            EXECUTE,
            "([Ljava/lang/Object;)Landroid/os/AsyncTask;",
        );
        assert_eq!(
            forward_target(&adapter, &execute).unwrap(),
            MethodQuery::named("Lcom/app/Sync;", DO_IN_BACKGROUND)
        );

        let send = MethodRef::new("Lcom/app/Net;", "send", "(Ljava/lang/String;)V");
        assert_eq!(forward_target(&adapter, &send).unwrap(), send.to_query());
    }

    #[test]
    fn background_entered_through_execute() {
        let index = android_app();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());

        let background =
            MethodQuery::parse("Lcom/app/Sync;->doInBackground([Ljava/lang/Object;)Ljava/lang/Object;");
        let targets = reverse_targets(&adapter, &background).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[2].descriptor.as_deref(), Some("(Ljava/lang/Runnable;)V"));

        // Same name outside a task class is not substituted.
        let plain = MethodQuery::named("Lcom/app/Net;", DO_IN_BACKGROUND);
        assert_eq!(reverse_targets(&adapter, &plain).unwrap(), vec![plain]);
    }
}
