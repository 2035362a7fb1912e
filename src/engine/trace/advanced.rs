//! Call-graph tracing with register-level data flow.
//!
//! Inside a method body one register is tracked at a time. Reverse walks scan backwards from
//! a use to the definition of the register; forward walks scan onwards from a definition to
//! its uses. Values leave a method through invocation arguments and results, field writes,
//! and the web view script bridge, and enter one through parameters, results and field
//! reads.
//!
//! Visited keys carry the register and instruction position, so the same method can be
//! entered once per tracked value.

use std::sync::Arc;

use crate::{
    engine::trace::{dispatch, start_node, Step, TraceState, Walk},
    index::{
        push_unique, FieldRef, Instruction, InstructionKind, InvokeKind, MethodBody, MethodQuery,
        MethodRef,
    },
    template::{Candidate, Direction, Qualifier},
    Result,
};

/// Name of instance constructors.
const CONSTRUCTOR: &str = "<init>";

/// Walks from `source` following the value selected by `qualifier`.
///
/// Reverse walks start at the arguments of the source (all of them, or the one selected by
/// `ARGINDEX`); forward walks start at its result.
pub(super) fn trace(
    walk: &Walk<'_, '_>,
    source: &Candidate,
    qualifier: Option<Qualifier>,
    state: &mut TraceState,
) -> Result<()> {
    let tracer = Tracer { walk };
    let node = start_node(source);
    match walk.direction {
        Direction::Reverse => {
            let position = match qualifier {
                Some(Qualifier::ArgTo { index }) => index,
                _ => None,
            };
            tracer.method_reverse(&node, &[], position, state)
        }
        Direction::Forward => tracer.result_forward(&node, state),
    }
}

struct Tracer<'t, 'w, 'a> {
    walk: &'t Walk<'w, 'a>,
}

impl Tracer<'_, '_, '_> {
    fn body(&self, method: &MethodRef) -> Result<Option<Arc<MethodBody>>> {
        self.walk.adapter.index().method_body(method)
    }

    /// Continues at every call site of `node` whose argument at `position` (any argument if
    /// `None`) carries the tracked value.
    fn method_reverse(
        &self,
        node: &MethodQuery,
        chain: &[String],
        position: Option<usize>,
        state: &mut TraceState,
    ) -> Result<()> {
        let adapter = self.walk.adapter;
        let label = node.to_string();
        if !state.visit(format!("method|{label}|{position:?}")) {
            return Ok(());
        }
        let chain = match self.walk.step(&label, chain, state) {
            Step::Continue(chain) => chain,
            Step::Matched | Step::Exhausted => return Ok(()),
        };

        let mut targets = Vec::new();
        for class in adapter.class_and_subclasses(&node.class)? {
            let query = node.with_class(&class);
            if let Some(method) = query.as_method() {
                if adapter.is_script_interface(&method)? {
                    // Script code reaches the method through the bridge object.
                    let constructor = MethodQuery::named(class.as_str(), CONSTRUCTOR);
                    for creator in adapter.direct_calls_to_method(&constructor)? {
                        self.method_reverse(&creator.to_query(), &chain, None, state)?;
                    }
                    continue;
                }
            }
            for target in dispatch::reverse_targets(adapter, &query)? {
                push_unique(&mut targets, target);
            }
        }

        for target in &targets {
            for caller in adapter.direct_calls_to_method(target)? {
                let Some(body) = self.body(&caller)? else {
                    continue;
                };
                let caller_chain = match self.walk.step(&caller.to_string(), &chain, state) {
                    Step::Continue(chain) => chain,
                    Step::Matched | Step::Exhausted => continue,
                };

                for (idx, instruction) in body.instructions.iter().enumerate() {
                    if !instruction.invoked().is_some_and(|m| target.matches(m)) {
                        continue;
                    }
                    let count = instruction.register_count();
                    if count == 0 {
                        continue;
                    }
                    let positions: Vec<usize> = match position {
                        Some(position) if position < count => vec![position],
                        Some(_) => Vec::new(),
                        None => (0..count).collect(),
                    };
                    for position in positions {
                        if let Some(register) = instruction.register(position) {
                            self.register_reverse(&caller, &body, idx, register, &caller_chain, state)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Scans backwards from `index` for the definition of `register`.
    ///
    /// Only the definitions matched below end the scan; others, such as `new-instance`, are
    /// scanned past, so the walk over-approximates the sources of a register.
    fn register_reverse(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        index: usize,
        register: u16,
        chain: &[String],
        state: &mut TraceState,
    ) -> Result<()> {
        if !state.visit(format!("register|{method}|{index}|{register}")) {
            return Ok(());
        }

        let end = index.min(body.instructions.len());
        for (idx, instruction) in body.instructions[..end].iter().enumerate().rev() {
            let defined = instruction.register(0) == Some(register);
            match instruction.kind {
                InstructionKind::Move if defined => {
                    if let Some(source) = instruction.register(1) {
                        self.register_reverse(method, body, idx, source, chain, state)?;
                    }
                    return Ok(());
                }
                InstructionKind::MoveResult if defined => {
                    return self.result_reverse(method, body, idx, chain, state);
                }
                InstructionKind::Const if defined => return Ok(()),
                InstructionKind::ArrayGet if defined => {
                    if let Some(array) = instruction.register(1) {
                        self.register_reverse(method, body, idx, array, chain, state)?;
                    }
                    return Ok(());
                }
                InstructionKind::ArrayPut if instruction.register(1) == Some(register) => {
                    if let Some(value) = instruction.register(0) {
                        self.register_reverse(method, body, idx, value, chain, state)?;
                    }
                }
                InstructionKind::InstanceGet | InstructionKind::StaticGet if defined => {
                    if let Some(field) = instruction.field() {
                        self.field_reverse(field, chain, state)?;
                    }
                    return Ok(());
                }
                InstructionKind::Invoke(kind)
                    if kind != InvokeKind::Static && defined && instruction.register_count() > 1 =>
                {
                    // A call on the tracked object may fill it from its arguments.
                    for (_, argument) in instruction.registers().skip(1) {
                        self.register_reverse(method, body, idx, argument, chain, state)?;
                    }
                }
                _ => {}
            }
        }

        if let Some(parameter) = body.parameter_index(register) {
            self.method_reverse(&method.to_query(), chain, Some(parameter), state)?;
        }
        Ok(())
    }

    /// Handles a `move-result` of the tracked register at `index`.
    fn result_reverse(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        index: usize,
        chain: &[String],
        state: &mut TraceState,
    ) -> Result<()> {
        let Some((idx, invoke)) = body.instructions[..index]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, instruction)| instruction.kind.is_invoke())
        else {
            return Ok(());
        };
        let Some(invoked) = invoke.invoked() else {
            return Ok(());
        };

        if self.walk.target.qualifier == Some(Qualifier::ResultOf)
            && self.walk.record_match(&invoked.to_string(), chain, state)
        {
            return Ok(());
        }

        for (_, argument) in invoke.registers() {
            self.register_reverse(method, body, idx, argument, chain, state)?;
        }
        Ok(())
    }

    /// Continues at every write of `field`, tracking the written value.
    fn field_reverse(
        &self,
        field: &FieldRef,
        chain: &[String],
        state: &mut TraceState,
    ) -> Result<()> {
        if !state.visit(format!("field|{field}")) {
            return Ok(());
        }

        for writer in self.walk.adapter.index().field_writers(field)? {
            let Some(body) = self.body(&writer)? else {
                continue;
            };
            let writer_chain = match self.walk.step(&writer.to_string(), chain, state) {
                Step::Continue(chain) => chain,
                Step::Matched | Step::Exhausted => continue,
            };

            for (idx, instruction) in body.instructions.iter().enumerate() {
                let is_write = matches!(
                    instruction.kind,
                    InstructionKind::InstancePut | InstructionKind::StaticPut
                );
                if is_write && instruction.field() == Some(field) {
                    if let Some(value) = instruction.register(0) {
                        self.register_reverse(&writer, &body, idx, value, &writer_chain, state)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Starts at every `move-result` of a call to `node`.
    fn result_forward(&self, node: &MethodQuery, state: &mut TraceState) -> Result<()> {
        let adapter = self.walk.adapter;
        let label = node.to_string();
        if !state.visit(format!("result|{label}")) {
            return Ok(());
        }
        let chain = match self.walk.step(&label, &[], state) {
            Step::Continue(chain) => chain,
            Step::Matched | Step::Exhausted => return Ok(()),
        };

        for class in adapter.class_and_subclasses(&node.class)? {
            let query = node.with_class(&class);
            for caller in adapter.direct_calls_to_method(&query)? {
                let Some(body) = self.body(&caller)? else {
                    continue;
                };
                let caller_chain = match self.walk.step(&caller.to_string(), &chain, state) {
                    Step::Continue(chain) => chain,
                    Step::Matched | Step::Exhausted => continue,
                };

                for (idx, instruction) in body.instructions.iter().enumerate() {
                    if !instruction.invoked().is_some_and(|m| query.matches(m)) {
                        continue;
                    }
                    if let Some(result) = moved_result(&body, idx) {
                        self.register_forward(&caller, &body, idx + 2, result, &caller_chain, state)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Scans onwards from `start` for uses of `register` until it is overwritten.
    fn register_forward(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        start: usize,
        register: u16,
        chain: &[String],
        state: &mut TraceState,
    ) -> Result<()> {
        if !state.visit(format!("use|{method}|{start}|{register}")) {
            return Ok(());
        }

        for (idx, instruction) in body.instructions.iter().enumerate().skip(start) {
            let first = instruction.register(0);
            let second = instruction.register(1);
            match instruction.kind {
                InstructionKind::Move => {
                    if second == Some(register) {
                        if let Some(destination) = first.filter(|&d| d != register) {
                            self.register_forward(method, body, idx + 1, destination, chain, state)?;
                        }
                    } else if first == Some(register) {
                        return Ok(());
                    }
                }
                InstructionKind::ArrayGet => {
                    if second == Some(register) {
                        if let Some(destination) = first {
                            self.register_forward(method, body, idx + 1, destination, chain, state)?;
                        }
                    }
                    if first == Some(register) {
                        return Ok(());
                    }
                }
                InstructionKind::MoveResult
                | InstructionKind::Const
                | InstructionKind::InstanceGet
                | InstructionKind::StaticGet
                    if first == Some(register) =>
                {
                    return Ok(());
                }
                InstructionKind::ArrayPut if first == Some(register) => {
                    // The array now carries the value.
                    if let Some(array) = second {
                        self.register_forward(method, body, idx + 1, array, chain, state)?;
                    }
                }
                InstructionKind::InstancePut | InstructionKind::StaticPut
                    if first == Some(register) =>
                {
                    if let Some(field) = instruction.field() {
                        self.field_forward(field, chain, state)?;
                    }
                }
                InstructionKind::Invoke(kind) => {
                    self.invoke_forward(method, body, idx, kind, instruction, register, chain, state)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Follows the tracked `register` into and out of an invocation.
    #[allow(clippy::too_many_arguments)]
    fn invoke_forward(
        &self,
        method: &MethodRef,
        body: &MethodBody,
        idx: usize,
        kind: InvokeKind,
        instruction: &Instruction,
        register: u16,
        chain: &[String],
        state: &mut TraceState,
    ) -> Result<()> {
        let adapter = self.walk.adapter;
        let Some(invoked) = instruction.invoked() else {
            return Ok(());
        };
        let positions: Vec<usize> = instruction
            .registers()
            .filter(|&(_, r)| r == register)
            .map(|(position, _)| position)
            .collect();
        if positions.is_empty() {
            return Ok(());
        }

        if let Some(Qualifier::ArgTo { index }) = self.walk.target.qualifier {
            let position_matches = index.is_none_or(|index| positions.contains(&index));
            if position_matches && self.walk.record_match(&invoked.to_string(), chain, state) {
                return Ok(());
            }
        }

        if invoked.name == dispatch::LOAD_URL && adapter.is_webview(&invoked.class)? {
            for bridged in adapter.bridged_methods(&invoked.class)?.iter() {
                self.parameters_forward(&bridged.to_query(), chain, None, state)?;
            }
        }

        if let Some(result) = moved_result(body, idx) {
            self.register_forward(method, body, idx + 2, result, chain, state)?;
        }

        if kind == InvokeKind::Direct && invoked.name == CONSTRUCTOR && !positions.contains(&0) {
            // The constructed object now carries the value.
            if let Some(receiver) = instruction.register(0) {
                self.register_forward(method, body, idx + 1, receiver, chain, state)?;
            }
        }

        let callee = dispatch::forward_target(adapter, invoked)?;
        for position in positions {
            self.parameters_forward(&callee, chain, Some(position), state)?;
        }
        Ok(())
    }

    /// Continues in every implementation of `node`, tracking the parameter at `position`
    /// (every parameter if `None`).
    fn parameters_forward(
        &self,
        node: &MethodQuery,
        chain: &[String],
        position: Option<usize>,
        state: &mut TraceState,
    ) -> Result<()> {
        let adapter = self.walk.adapter;
        let label = node.to_string();
        if !state.visit(format!("parameter|{label}|{position:?}")) {
            return Ok(());
        }
        let chain = match self.walk.step(&label, chain, state) {
            Step::Continue(chain) => chain,
            Step::Matched | Step::Exhausted => return Ok(()),
        };

        for class in adapter.class_and_subclasses(&node.class)? {
            for method in adapter.index().find_methods(&node.with_class(&class))? {
                let Some(body) = self.body(&method)? else {
                    continue;
                };
                let registers: Vec<u16> = match position {
                    Some(position) => body.parameter_register(position).into_iter().collect(),
                    None => (0..usize::from(body.ins))
                        .filter_map(|position| body.parameter_register(position))
                        .collect(),
                };
                for register in registers {
                    self.register_forward(&method, &body, 0, register, &chain, state)?;
                }
            }
        }
        Ok(())
    }

    /// Continues at every read of `field`, tracking the loaded register.
    fn field_forward(&self, field: &FieldRef, chain: &[String], state: &mut TraceState) -> Result<()> {
        if !state.visit(format!("field|{field}")) {
            return Ok(());
        }

        for reader in self.walk.adapter.index().field_readers(field)? {
            let Some(body) = self.body(&reader)? else {
                continue;
            };
            let reader_chain = match self.walk.step(&reader.to_string(), chain, state) {
                Step::Continue(chain) => chain,
                Step::Matched | Step::Exhausted => continue,
            };

            for (idx, instruction) in body.instructions.iter().enumerate() {
                let is_read = matches!(
                    instruction.kind,
                    InstructionKind::InstanceGet | InstructionKind::StaticGet
                );
                if is_read && instruction.field() == Some(field) {
                    if let Some(loaded) = instruction.register(0) {
                        self.register_forward(&reader, &body, idx + 1, loaded, &reader_chain, state)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Returns the destination of the `move-result` directly following the invocation at `idx`.
fn moved_result(body: &MethodBody, idx: usize) -> Option<u16> {
    body.instructions
        .get(idx + 1)
        .filter(|next| next.kind == InstructionKind::MoveResult)
        .and_then(|next| next.register(0))
}

#[cfg(test)]
mod tests {
    use crate::{
        config::EngineConfig,
        engine::trace::{TraceEngine, TraceOutcome},
        index::{BytecodeIndex, IndexAdapter},
        links::LinkTable,
        template::TemplateParser,
        test::{data_flow_app, webview_app},
    };

    const SECRET: &str = "Lcom/app/Source;->secret()Ljava/lang/String;";
    const ON_CREATE: &str = "Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V";
    const LEAK: &str = "Lcom/app/Main;->leak(Ljava/lang/String;)V";
    const SEND: &str = "Lcom/app/Net;->send(Ljava/lang/String;)V";

    fn run(index: &dyn BytecodeIndex, from: &str, to: &str, direction: &str) -> TraceOutcome {
        let source = format!(
            r#"{{"METADATA": {{"NAME": "t"}}, "CODEPARAMS": {{"TRACE": {{
                "TRACEFROM": "{from}", "TRACETO": "{to}",
                "TRACEDIRECTION": "{direction}", "TRACETYPE": "ADVANCED"
            }}}}}}"#
        );
        let template = TemplateParser::new().parse_str(&source).unwrap();
        let rule = &template.code.as_ref().unwrap().trace[0];

        let config = EngineConfig::default();
        let adapter = IndexAdapter::new(index, &config);
        TraceEngine::new(&adapter, &config)
            .trace(rule, &LinkTable::new())
            .unwrap()
    }

    #[test]
    fn forward_result_to_argument() {
        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            &format!("ARGTO {SEND} ARGINDEX 0"),
            "FORWARD",
        );
        assert_eq!(outcome.paths(), vec![[SECRET, ON_CREATE, LEAK, SEND].join(",")]);
    }

    #[test]
    fn forward_stops_at_overwrite() {
        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            "ARGTO Lcom/app/Log;->d(Ljava/lang/String;)V",
            "FORWARD",
        );
        assert!(!outcome.is_satisfied());
    }

    #[test]
    fn forward_argument_index_must_match() {
        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            &format!("ARGTO {LEAK} ARGINDEX 0"),
            "FORWARD",
        );
        assert!(!outcome.is_satisfied());

        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            &format!("ARGTO {LEAK} ARGINDEX 1"),
            "FORWARD",
        );
        assert_eq!(outcome.paths(), vec![[SECRET, ON_CREATE, LEAK].join(",")]);
    }

    #[test]
    fn forward_through_field() {
        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            "ARGTO Lcom/app/Net;->upload(Ljava/lang/String;)V",
            "FORWARD",
        );
        assert_eq!(
            outcome.paths(),
            vec![[
                SECRET,
                ON_CREATE,
                "Lcom/app/Worker;->run()V",
                "Lcom/app/Net;->upload(Ljava/lang/String;)V"
            ]
            .join(",")]
        );
    }

    #[test]
    fn reverse_argument_to_result() {
        let outcome = run(
            &data_flow_app(),
            &format!("ARGTO {SEND} ARGINDEX 0"),
            &format!("RESULTOF {SECRET}"),
            "REVERSE",
        );
        assert_eq!(outcome.paths(), vec![[SECRET, ON_CREATE, LEAK, SEND].join(",")]);
    }

    #[test]
    fn argument_index_out_of_range_matches_nothing() {
        let outcome = run(
            &data_flow_app(),
            &format!("ARGTO {SEND} ARGINDEX 7"),
            &format!("RESULTOF {SECRET}"),
            "REVERSE",
        );
        assert!(!outcome.is_satisfied());

        let outcome = run(
            &data_flow_app(),
            &format!("RESULTOF {SECRET}"),
            &format!("ARGTO {SEND} ARGINDEX 7"),
            "FORWARD",
        );
        assert!(!outcome.is_satisfied());
    }

    #[test]
    fn reverse_through_field() {
        let outcome = run(
            &data_flow_app(),
            "ARGTO Lcom/app/Net;->upload(Ljava/lang/String;)V",
            &format!("RESULTOF {SECRET}"),
            "REVERSE",
        );
        assert_eq!(
            outcome.paths(),
            vec![[
                SECRET,
                ON_CREATE,
                "Lcom/app/Worker;->run()V",
                "Lcom/app/Net;->upload(Ljava/lang/String;)V"
            ]
            .join(",")]
        );
    }

    #[test]
    fn reverse_constant_is_a_dead_end() {
        let outcome = run(
            &data_flow_app(),
            "ARGTO Lcom/app/Log;->d(Ljava/lang/String;)V",
            &format!("RESULTOF {SECRET}"),
            "REVERSE",
        );
        assert!(!outcome.is_satisfied());
    }

    #[test]
    fn forward_into_script_bridge() {
        let outcome = run(
            &webview_app(),
            &format!("RESULTOF {SECRET}"),
            &format!("ARGTO {SEND}"),
            "FORWARD",
        );
        assert_eq!(
            outcome.paths(),
            vec![[
                SECRET,
                "Lcom/app/Main;->show()V",
                "Lcom/app/Bridge;->post(Ljava/lang/String;)V",
                SEND
            ]
            .join(",")]
        );
    }

    #[test]
    fn reverse_out_of_script_bridge() {
        let outcome = run(
            &webview_app(),
            &format!("ARGTO {SEND}"),
            "<class>:Lcom/app/Main;",
            "REVERSE",
        );
        assert_eq!(
            outcome.paths(),
            vec![[
                "Lcom/app/Main;->show()V",
                "Lcom/app/Bridge;->post(Ljava/lang/String;)V",
                SEND
            ]
            .join(",")]
        );
    }
}
