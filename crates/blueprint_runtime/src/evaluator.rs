// Evaluator - Runs compiled graphs
//
// Control flow is push-based: emitting an entry point follows signal wires from
// node to node, each node deciding which of its signal outputs continues. Data
// flow is pull-based: a node asks for an input, which re-evaluates the producing
// output on every read. Nothing is cached, so an output read K times is computed
// K times.
//
// Each invocation owns an `ExecutionContext`. Function calls push a frame on the
// context; a function's input boundary reads its arguments back in the caller's
// frame. There is no step limit: a loop whose condition never turns false runs
// forever.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use blueprint_types::Value;

use crate::compiler::{EntryPoint, Program, VarId};
use crate::definitions::{FunctionId, StructId};
use crate::error::EvalError;
use crate::graph::Graph;
use crate::node::{InputRef, NodeConfig, NodeId, NodeKind, OutputRef};
use crate::registry::NodeBehavior;

// ─────────────────────────────────────────────────────────────────────────────
// Triggers and Results
// ─────────────────────────────────────────────────────────────────────────────

/// External event that starts an invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrigger {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
}

impl ExecutionTrigger {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_player(mut self, player: impl Into<String>) -> Self {
        self.player = Some(player.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_number(mut self, number: f64) -> Self {
        self.number = Some(number);
        self
    }
}

/// Text sent to a player during an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub to: Option<String>,
    pub text: String,
}

/// What an invocation left behind
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub context: Uuid,
    pub event: String,
    pub messages: Vec<Message>,
    /// Named variables of the outermost frame
    pub variables: BTreeMap<String, Value>,
    /// Node evaluations and executions performed
    pub steps: u64,
}

/// How control leaves a node after it executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue through the given signal output
    Continue(usize),
    /// Stop this chain
    End,
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Context
// ─────────────────────────────────────────────────────────────────────────────

/// Key into a frame's variable store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarKey {
    /// Slot allocated at compile time
    Slot(VarId),
    /// User variable
    Named(String),
}

#[derive(Debug, Default)]
struct Frame {
    /// Call node that opened this frame; `None` for the outermost frame
    call: Option<NodeId>,
    vars: HashMap<VarKey, Value>,
    /// Signal output the function left through
    returned: Option<usize>,
    /// Values captured by the output boundary on return
    results: Vec<Option<Value>>,
    /// Results of calls made from this frame, by call node
    call_results: HashMap<NodeId, Vec<Option<Value>>>,
}

impl Frame {
    fn new(call: Option<NodeId>) -> Self {
        Self {
            call,
            ..Default::default()
        }
    }
}

/// State of a single invocation; never shared between invocations
#[derive(Debug)]
pub struct ExecutionContext {
    id: Uuid,
    trigger: ExecutionTrigger,
    /// Never empty
    frames: Vec<Frame>,
    messages: Vec<Message>,
    steps: u64,
}

impl ExecutionContext {
    pub fn new(trigger: ExecutionTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            frames: vec![Frame::new(None)],
            messages: Vec::new(),
            steps: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn trigger(&self) -> &ExecutionTrigger {
        &self.trigger
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// A named variable of the outermost frame
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.frames
            .first()
            .and_then(|f| f.vars.get(&VarKey::Named(name.to_string())))
    }

    fn frame(&self) -> &Frame {
        // frames is never empty
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    fn leave(&mut self) -> Frame {
        if self.frames.len() > 1 {
            self.frames.pop().unwrap_or_default()
        } else {
            Frame::default()
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        let variables = self
            .frames
            .into_iter()
            .next()
            .map(|root| {
                root.vars
                    .into_iter()
                    .filter_map(|(key, value)| match key {
                        VarKey::Named(name) => Some((name, value)),
                        VarKey::Slot(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        ExecutionResult {
            context: self.id,
            event: self.trigger.event,
            messages: self.messages,
            variables,
            steps: self.steps,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluator
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluator limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorOptions {
    /// Deepest allowed nesting of function calls
    pub max_call_depth: usize,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self { max_call_depth: 256 }
    }
}

/// Walks a compiled graph on behalf of execution contexts.
///
/// Borrows the graph and program immutably, so any number of evaluators can
/// run against the same program at once.
pub struct Evaluator<'a> {
    graph: &'a Graph,
    program: &'a Program,
    options: EvaluatorOptions,
}

impl<'a> Evaluator<'a> {
    pub fn new(graph: &'a Graph, program: &'a Program) -> Self {
        Self::with_options(graph, program, EvaluatorOptions::default())
    }

    pub fn with_options(graph: &'a Graph, program: &'a Program, options: EvaluatorOptions) -> Self {
        Self {
            graph,
            program,
            options,
        }
    }

    /// Start an invocation at an entry point
    pub fn emit(&self, ctx: &mut ExecutionContext, entry: EntryPoint) -> Result<(), EvalError> {
        let root = self
            .program
            .root(entry)
            .ok_or(EvalError::UnknownEntryPoint(entry))?;
        debug!(context = %ctx.id, event = %ctx.trigger.event, node = %root.node, "Emitting entry point");
        self.fire(ctx, root)
    }

    /// Transfer control through a signal output and run until the chain ends
    pub fn fire(&self, ctx: &mut ExecutionContext, output: OutputRef) -> Result<(), EvalError> {
        let mut current = output;
        while let Some(target) = self.graph.signal_target(current) {
            match self.execute(ctx, target)? {
                Flow::Continue(slot) => current = OutputRef::new(target.node, slot),
                Flow::End => break,
            }
        }
        Ok(())
    }

    /// Read an input: evaluate its source, else use its inset, else its default
    pub fn pull(&self, ctx: &mut ExecutionContext, input: InputRef) -> Result<Value, EvalError> {
        let port = self
            .graph
            .input_port(input)
            .map_err(|_| EvalError::UnknownNode(input.node))?;
        match port.source() {
            Some(source) => self.evaluate(ctx, source),
            None => port
                .inset()
                .or(port.def.default.as_ref())
                .cloned()
                .ok_or_else(|| EvalError::MissingValue {
                    node: input.node,
                    input: port.def.name.clone(),
                }),
        }
    }

    fn behavior(&self, node: NodeId) -> Result<&'a std::sync::Arc<dyn NodeBehavior>, EvalError> {
        self.program.behavior(node).ok_or_else(|| EvalError::NodeFault {
            node,
            message: "node type has no behavior".to_string(),
        })
    }

    fn evaluate(&self, ctx: &mut ExecutionContext, output: OutputRef) -> Result<Value, EvalError> {
        let node = self
            .graph
            .node(output.node)
            .ok_or(EvalError::UnknownNode(output.node))?;
        match node.output(output.slot) {
            Some(port) if !port.def.is_signal() => {}
            _ => {
                return Err(EvalError::NotAValueOutput {
                    node: output.node,
                    slot: output.slot,
                });
            }
        }

        ctx.steps += 1;
        trace!(context = %ctx.id, node = %output.node, output = output.slot, "Evaluating output");

        match node.kind() {
            NodeKind::Builtin(_) => {
                let behavior = self.behavior(output.node)?;
                let mut scope = Scope {
                    eval: self,
                    ctx,
                    node: output.node,
                    config: node.config(),
                };
                behavior.evaluate(&mut scope, output.slot)
            }
            NodeKind::Call(function) => self.evaluate_call(ctx, output.node, *function, output.slot),
            NodeKind::FunctionInput(function) => {
                self.evaluate_argument(ctx, output.node, *function, output.slot)
            }
            NodeKind::StructBoundary(structure) => self.construct(ctx, output.node, *structure),
            NodeKind::FunctionOutput(_) => Err(EvalError::NotAValueOutput {
                node: output.node,
                slot: output.slot,
            }),
        }
    }

    fn execute(&self, ctx: &mut ExecutionContext, target: InputRef) -> Result<Flow, EvalError> {
        let node = self
            .graph
            .node(target.node)
            .ok_or(EvalError::UnknownNode(target.node))?;

        ctx.steps += 1;
        debug!(context = %ctx.id, node = %target.node, input = target.slot, "Executing node");

        match node.kind() {
            NodeKind::Builtin(_) => {
                let behavior = self.behavior(target.node)?;
                let mut scope = Scope {
                    eval: self,
                    ctx,
                    node: target.node,
                    config: node.config(),
                };
                behavior.execute(&mut scope, target.slot)
            }
            NodeKind::Call(function) => self.execute_call(ctx, target.node, *function, target.slot),
            NodeKind::FunctionOutput(function) => {
                self.execute_return(ctx, target.node, *function, target.slot)
            }
            NodeKind::FunctionInput(_) | NodeKind::StructBoundary(_) => Err(EvalError::NotASignalInput {
                node: target.node,
                slot: target.slot,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Functions
    // ─────────────────────────────────────────────────────────────────────────

    fn boundaries(&self, call: NodeId, function: FunctionId) -> Result<(NodeId, NodeId), EvalError> {
        self.graph
            .function(function)
            .and_then(|f| Some((f.input_node()?, f.output_node()?)))
            .ok_or_else(|| EvalError::NodeFault {
                node: call,
                message: format!("function {} is not defined", function),
            })
    }

    fn enter(&self, ctx: &mut ExecutionContext, call: NodeId) -> Result<(), EvalError> {
        if ctx.frames.len() > self.options.max_call_depth {
            return Err(EvalError::CallDepthExceeded(self.options.max_call_depth));
        }
        ctx.frames.push(Frame::new(Some(call)));
        Ok(())
    }

    /// The call node of the current frame, checked against a boundary's function
    fn caller(&self, ctx: &ExecutionContext, boundary: NodeId, function: FunctionId) -> Result<NodeId, EvalError> {
        ctx.frame()
            .call
            .filter(|call| {
                self.graph
                    .node(*call)
                    .is_some_and(|n| *n.kind() == NodeKind::Call(function))
            })
            .ok_or(EvalError::OutsideFunction(boundary))
    }

    fn execute_call(
        &self,
        ctx: &mut ExecutionContext,
        call: NodeId,
        function: FunctionId,
        slot: usize,
    ) -> Result<Flow, EvalError> {
        let (entry, _) = self.boundaries(call, function)?;

        self.enter(ctx, call)?;
        let result = self.fire(ctx, OutputRef::new(entry, slot));
        let frame = ctx.leave();
        result?;

        match frame.returned {
            Some(exit) => {
                ctx.frame_mut().call_results.insert(call, frame.results);
                Ok(Flow::Continue(exit))
            }
            None => Ok(Flow::End),
        }
    }

    fn execute_return(
        &self,
        ctx: &mut ExecutionContext,
        boundary: NodeId,
        function: FunctionId,
        slot: usize,
    ) -> Result<Flow, EvalError> {
        self.caller(ctx, boundary, function)?;
        let node = self
            .graph
            .node(boundary)
            .ok_or(EvalError::UnknownNode(boundary))?;

        let mut results = Vec::with_capacity(node.inputs().len());
        for (index, port) in node.inputs().iter().enumerate() {
            if port.def.is_signal() {
                results.push(None);
                continue;
            }
            // Unset results only fail if a caller reads them
            match self.pull(ctx, InputRef::new(boundary, index)) {
                Ok(value) => results.push(Some(value)),
                Err(EvalError::MissingValue { .. }) => results.push(None),
                Err(e) => return Err(e),
            }
        }

        let frame = ctx.frame_mut();
        frame.results = results;
        frame.returned = Some(slot);
        Ok(Flow::End)
    }

    fn evaluate_call(
        &self,
        ctx: &mut ExecutionContext,
        call: NodeId,
        function: FunctionId,
        slot: usize,
    ) -> Result<Value, EvalError> {
        if let Some(Some(value)) = ctx.frame().call_results.get(&call).and_then(|r| r.get(slot)) {
            return Ok(value.clone());
        }

        let (_, exit) = self.boundaries(call, function)?;
        self.enter(ctx, call)?;
        let result = self.pull(ctx, InputRef::new(exit, slot));
        ctx.leave();
        result
    }

    fn evaluate_argument(
        &self,
        ctx: &mut ExecutionContext,
        boundary: NodeId,
        function: FunctionId,
        slot: usize,
    ) -> Result<Value, EvalError> {
        let call = self.caller(ctx, boundary, function)?;

        // Arguments are read in the caller's frame
        let frame = ctx.leave();
        let result = self.pull(ctx, InputRef::new(call, slot));
        ctx.frames.push(frame);
        result
    }

    fn construct(&self, ctx: &mut ExecutionContext, node: NodeId, structure: StructId) -> Result<Value, EvalError> {
        let schema = self
            .graph
            .struct_entry(structure)
            .map(|s| s.schema.clone())
            .ok_or_else(|| EvalError::NodeFault {
                node,
                message: format!("struct {} is not defined", structure),
            })?;

        let mut fields = Vec::with_capacity(schema.fields.len());
        for (index, field) in schema.fields.iter().enumerate() {
            fields.push((field.name.clone(), self.pull(ctx, InputRef::new(node, index))?));
        }
        Ok(Value::Struct {
            name: schema.name.clone(),
            fields,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Scope
// ─────────────────────────────────────────────────────────────────────────────

/// What a node behavior sees while it evaluates or executes
pub struct Scope<'s, 'a> {
    eval: &'s Evaluator<'a>,
    ctx: &'s mut ExecutionContext,
    node: NodeId,
    config: &'a NodeConfig,
}

impl Scope<'_, '_> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn context_id(&self) -> Uuid {
        self.ctx.id
    }

    pub fn trigger(&self) -> &ExecutionTrigger {
        &self.ctx.trigger
    }

    pub fn config(&self) -> &NodeConfig {
        self.config
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Build a fault attributed to this node
    pub fn fault(&self, message: impl Into<String>) -> EvalError {
        EvalError::NodeFault {
            node: self.node,
            message: message.into(),
        }
    }

    // Inputs

    pub fn input(&mut self, slot: usize) -> Result<Value, EvalError> {
        self.eval.pull(self.ctx, InputRef::new(self.node, slot))
    }

    /// Read an input, treating an unconnected input without default as absent
    pub fn try_input(&mut self, slot: usize) -> Result<Option<Value>, EvalError> {
        match self.input(slot) {
            Ok(value) => Ok(Some(value)),
            Err(EvalError::MissingValue { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> EvalError {
        EvalError::TypeMismatch {
            node: self.node,
            expected,
            found: found.kind_name(),
        }
    }

    pub fn input_number(&mut self, slot: usize) -> Result<f64, EvalError> {
        let value = self.input(slot)?;
        value.as_number().ok_or_else(|| self.mismatch("number", &value))
    }

    pub fn input_bool(&mut self, slot: usize) -> Result<bool, EvalError> {
        let value = self.input(slot)?;
        value.as_bool().ok_or_else(|| self.mismatch("boolean", &value))
    }

    pub fn input_text(&mut self, slot: usize) -> Result<String, EvalError> {
        match self.input(slot)? {
            Value::Text(s) => Ok(s),
            other => Err(self.mismatch("text", &other)),
        }
    }

    pub fn input_list(&mut self, slot: usize) -> Result<Vec<Value>, EvalError> {
        match self.input(slot)? {
            Value::List(items) => Ok(items),
            other => Err(self.mismatch("list", &other)),
        }
    }

    // Control

    /// Run the chain attached to one of this node's signal outputs
    pub fn fire(&mut self, slot: usize) -> Result<(), EvalError> {
        self.eval.fire(self.ctx, OutputRef::new(self.node, slot))
    }

    // Variables

    /// The `index`-th slot this node allocated at compile time
    pub fn slot(&self, index: usize) -> Result<VarKey, EvalError> {
        self.eval
            .program
            .slot(self.node, index)
            .map(VarKey::Slot)
            .ok_or_else(|| self.fault(format!("variable slot {} was not allocated", index)))
    }

    pub fn variable(&self, key: &VarKey) -> Option<&Value> {
        self.ctx.frame().vars.get(key)
    }

    pub fn set_variable(&mut self, key: VarKey, value: Value) {
        self.ctx.frame_mut().vars.insert(key, value);
    }

    // Effects

    pub fn send_message(&mut self, to: Option<String>, text: String) {
        debug!(context = %self.ctx.id, to = ?to, text = %text, "Message sent");
        self.ctx.messages.push(Message { to, text });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use blueprint_types::{Field, ValueType};
    use serde_json::json;

    use super::*;
    use crate::compiler::Compiler;
    use crate::definitions::FunctionDef;
    use crate::node::Position;
    use crate::registry::NodeRegistry;

    fn run(graph: &Graph, registry: &NodeRegistry, trigger: ExecutionTrigger) -> Result<ExecutionContext, EvalError> {
        let program = Compiler::compile(graph, registry);
        let evaluator = Evaluator::new(graph, &program);
        let mut ctx = ExecutionContext::new(trigger.clone());
        for entry in program.entry_points(&trigger.event) {
            evaluator.emit(&mut ctx, *entry)?;
        }
        Ok(ctx)
    }

    #[test]
    fn test_pull_falls_back_to_default() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let multiply = graph
            .add_builtin(&registry, "math/Multiply", NodeConfig::Null, Position::default())
            .unwrap();
        let program = Compiler::compile(&graph, &registry);
        let evaluator = Evaluator::new(&graph, &program);
        let mut ctx = ExecutionContext::new(ExecutionTrigger::new("test"));

        assert_eq!(
            evaluator.pull(&mut ctx, InputRef::new(multiply, 0)).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            evaluator.evaluate(&mut ctx, OutputRef::new(multiply, 0)).unwrap(),
            Value::Number(1.0)
        );
        assert!(matches!(
            evaluator.pull(&mut ctx, InputRef::new(multiply, 7)),
            Err(EvalError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_inset_sits_between_wire_and_default() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let multiply = graph
            .add_builtin(&registry, "math/Multiply", NodeConfig::Null, Position::default())
            .unwrap();
        let two = graph
            .add_builtin(&registry, "value/Constant", json!({ "value": { "kind": "number", "value": 2.0 } }), Position::default())
            .unwrap();
        let input = InputRef::new(multiply, 0);
        graph.set_inset(input, Some(Value::Number(6.0))).unwrap();

        let pull = |graph: &Graph| {
            let program = Compiler::compile(graph, &registry);
            let evaluator = Evaluator::new(graph, &program);
            let mut ctx = ExecutionContext::new(ExecutionTrigger::new("test"));
            evaluator.pull(&mut ctx, input).unwrap()
        };
        assert_eq!(pull(&graph), Value::Number(6.0));

        graph.connect(OutputRef::new(two, 0), input).unwrap();
        assert_eq!(pull(&graph), Value::Number(2.0));

        // Disconnecting clears the inset, so the port default is back in play
        assert!(graph.disconnect(OutputRef::new(two, 0), input));
        assert_eq!(graph.input_port(input).unwrap().inset(), None);
        assert_eq!(pull(&graph), Value::Number(1.0));
    }

    #[test]
    fn test_trigger_payload() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let on = graph
            .add_builtin(&registry, "event/On", json!({ "event": "chat" }), Position::default())
            .unwrap();
        let set = graph
            .add_builtin(
                &registry,
                "var/Set",
                json!({ "variable": "said", "type": "text" }),
                Position::default(),
            )
            .unwrap();
        graph.connect(OutputRef::new(on, 0), InputRef::new(set, 0)).unwrap();
        graph.connect(OutputRef::new(on, 2), InputRef::new(set, 1)).unwrap();

        let ctx = run(&graph, &registry, ExecutionTrigger::new("chat").with_text("hi")).unwrap();
        assert_eq!(ctx.variable("said"), Some(&Value::from("hi")));
        assert_eq!(ctx.steps(), 2);

        let err = run(&graph, &registry, ExecutionTrigger::new("chat")).unwrap_err();
        assert_eq!(err, EvalError::MissingTriggerData("text"));
    }

    #[test]
    fn test_boundary_outside_function() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let f = graph
            .define_function(
                FunctionDef::new("f", vec![Field::new("x", ValueType::Number)], vec![]),
                Position::default(),
            )
            .unwrap();
        let entry = graph.function(f).unwrap().input_node().unwrap();

        let program = Compiler::compile(&graph, &registry);
        let evaluator = Evaluator::new(&graph, &program);
        let mut ctx = ExecutionContext::new(ExecutionTrigger::new("test"));
        assert_eq!(
            evaluator.evaluate(&mut ctx, OutputRef::new(entry, 0)),
            Err(EvalError::OutsideFunction(entry))
        );
    }

    #[test]
    fn test_function_without_return_ends_chain() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = Graph::new();
        let f = graph
            .define_function(
                FunctionDef::new(
                    "noop",
                    vec![Field::new("exec", ValueType::Signal)],
                    vec![Field::new("done", ValueType::Signal)],
                ),
                Position::default(),
            )
            .unwrap();
        let on = graph
            .add_builtin(&registry, "event/On", json!({ "event": "go" }), Position::default())
            .unwrap();
        let call = graph.add_call(f, Position::default()).unwrap();
        let set = graph
            .add_builtin(
                &registry,
                "var/Set",
                json!({ "variable": "after", "type": "number" }),
                Position::default(),
            )
            .unwrap();
        graph.connect(OutputRef::new(on, 0), InputRef::new(call, 0)).unwrap();
        graph.connect(OutputRef::new(call, 0), InputRef::new(set, 0)).unwrap();

        // The body never reaches the output boundary
        let ctx = run(&graph, &registry, ExecutionTrigger::new("go")).unwrap();
        assert_eq!(ctx.variable("after"), None);

        // Once it does, control continues past the call
        let entry = graph.function(f).unwrap().input_node().unwrap();
        let exit = graph.function(f).unwrap().output_node().unwrap();
        graph.connect(OutputRef::new(entry, 0), InputRef::new(exit, 0)).unwrap();
        let err = run(&graph, &registry, ExecutionTrigger::new("go")).unwrap_err();
        assert!(matches!(err, EvalError::MissingValue { node, .. } if node == set));
    }
}
