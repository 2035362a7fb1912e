//! Call-graph reachability.

use crate::{
    engine::trace::{dispatch, start_node, Step, TraceState, Walk},
    index::{push_unique, MethodQuery},
    template::{Candidate, Direction},
    Result,
};

/// Walks the call graph from `source` until the end-point or the hop bound is reached.
pub(super) fn trace(walk: &Walk<'_, '_>, source: &Candidate, state: &mut TraceState) -> Result<()> {
    visit(walk, &start_node(source), &[], state)
}

fn visit(
    walk: &Walk<'_, '_>,
    node: &MethodQuery,
    chain: &[String],
    state: &mut TraceState,
) -> Result<()> {
    let label = node.to_string();
    if !state.visit(label.clone()) {
        return Ok(());
    }

    let chain = match walk.step(&label, chain, state) {
        Step::Continue(chain) => chain,
        Step::Matched | Step::Exhausted => return Ok(()),
    };

    let next = match walk.direction {
        Direction::Reverse => callers(walk, node)?,
        Direction::Forward => callees(walk, node)?,
    };
    for node in &next {
        visit(walk, node, &chain, state)?;
    }
    Ok(())
}

/// Callers of `node` and of its overrides, each widened over the caller's own subclasses.
fn callers(walk: &Walk<'_, '_>, node: &MethodQuery) -> Result<Vec<MethodQuery>> {
    let adapter = walk.adapter;
    let mut result = Vec::new();
    for target in dispatch::reverse_targets(adapter, node)? {
        for caller in adapter.calls_to_method(&target)? {
            for class in adapter.class_and_subclasses(&caller.class)? {
                push_unique(&mut result, caller.to_query().with_class(&class));
            }
        }
    }
    Ok(result)
}

/// Methods invoked by `node` or by any override of it.
fn callees(walk: &Walk<'_, '_>, node: &MethodQuery) -> Result<Vec<MethodQuery>> {
    let adapter = walk.adapter;
    let mut result = Vec::new();
    for class in adapter.class_and_subclasses(&node.class)? {
        for callee in adapter.calls_from_method(&node.with_class(&class))? {
            push_unique(&mut result, dispatch::forward_target(adapter, &callee)?);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::{
        config::EngineConfig,
        engine::trace::{TraceEngine, TraceOutcome},
        index::{BytecodeIndex, IndexAdapter},
        links::LinkTable,
        template::{TemplateParser, TraceRule},
        test::{android_app, call_chain, call_cycle},
    };

    fn rule(trace: &str) -> TraceRule {
        let source = format!(
            r#"{{"METADATA": {{"NAME": "t"}}, "CODEPARAMS": {{"TRACE": {trace}}}}}"#
        );
        let template = TemplateParser::new().parse_str(&source).unwrap();
        template.code.unwrap().trace.remove(0)
    }

    fn run(index: &dyn BytecodeIndex, trace: &str) -> TraceOutcome {
        let config = EngineConfig::default();
        let adapter = IndexAdapter::new(index, &config);
        TraceEngine::new(&adapter, &config)
            .trace(&rule(trace), &LinkTable::new())
            .unwrap()
    }

    #[test]
    fn reverse_chain_reads_caller_first() {
        let outcome = run(
            &call_chain(),
            r#"{"TRACEFROM": "Lcom/app/A;->a()V", "TRACETO": "Lcom/app/C;->c()V"}"#,
        );
        assert_eq!(
            outcome.paths(),
            vec!["Lcom/app/C;->c()V,Lcom/app/B;->b()V,Lcom/app/A;->a()V"]
        );
    }

    #[test]
    fn forward_chain() {
        let outcome = run(
            &call_chain(),
            r#"{"TRACEFROM": "<class>:Lcom/app/C;", "TRACETO": "<class>:Lcom/app/A;", "TRACEDIRECTION": "FORWARD"}"#,
        );
        assert_eq!(
            outcome.paths(),
            vec!["Lcom/app/C;,Lcom/app/B;->b()V,Lcom/app/A;->a()V"]
        );
    }

    #[test]
    fn hop_bound() {
        let trace = |max: usize| {
            run(
                &call_chain(),
                &format!(
                    r#"{{"TRACEFROM": "Lcom/app/A;->a()V", "TRACETO": "<class>:Lcom/app/C;", "TRACELENGTHMAX": {max}}}"#
                ),
            )
        };
        assert!(trace(2).is_satisfied());
        assert!(!trace(1).is_satisfied());
    }

    #[test]
    fn cycle_terminates() {
        let outcome = run(
            &call_cycle(),
            r#"{"TRACEFROM": "Lcom/app/A;->a()V", "TRACETO": "<class>:Lcom/app/Missing;", "TRACELENGTHMAX": 5}"#,
        );
        assert!(!outcome.is_satisfied());

        let outcome = run(
            &call_cycle(),
            r#"{"TRACEFROM": "Lcom/app/A;->a()V", "TRACETO": "<class>:Lcom/app/*", "TRACELENGTHMAX": 5}"#,
        );
        // The start node itself is already inside the wildcard.
        assert_eq!(outcome.paths(), vec!["Lcom/app/A;->a()V"]);
    }

    #[test]
    fn background_task_is_entered_through_execute() {
        let outcome = run(
            &android_app(),
            r#"{"TRACEFROM": "Lcom/app/Net;->upload([B)V", "TRACETO": "<class>:Lcom/app/Main;"}"#,
        );
        assert_eq!(
            outcome.chains(),
            &[vec![
                "Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V".to_string(),
                "Lcom/app/Sync;->doInBackground([Ljava/lang/Object;)Ljava/lang/Object;".to_string(),
                "Lcom/app/Net;->upload([B)V".to_string(),
            ]]
        );

        let outcome = run(
            &android_app(),
            r#"{"TRACEFROM": "Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", "TRACETO": "Lcom/app/Net;->upload([B)V", "TRACEDIRECTION": "FORWARD"}"#,
        );
        assert_eq!(
            outcome.paths(),
            vec!["Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V,Lcom/app/Sync;->doInBackground,Lcom/app/Net;->upload([B)V"]
        );
    }

    #[test]
    fn uncertain_end_point() {
        let outcome = run(
            &android_app(),
            r#"{"TRACEFROM": "Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", "TRACETO": "Lcom/other/Net;->upload([B)V", "TRACEDIRECTION": "FORWARD"}"#,
        );
        assert!(outcome.uncertain());
        assert_eq!(
            outcome.chains()[0].last().map(String::as_str),
            Some("|MAYBE|Lcom/app/Net;->upload([B)V")
        );
    }
}
