// Built-in Nodes - The catalog every registry starts from
//
// Configured nodes keep their settings in the node config (a JSON object) and
// persist them through `write_data`/`read_data`. Type settings are stored as
// type names (`number`, `list<text>`, a struct name) and resolved against the
// graph's structs when ports are declared.

use std::sync::Arc;

use rand::Rng;
use serde_json::json;

use blueprint_types::codec::{Reader, Writer};
use blueprint_types::{DecodeError, NodePorts, PortDef, StructLookup, Value, ValueType};

use crate::compiler::Compiler;
use crate::error::{EvalError, GraphError};
use crate::evaluator::{Flow, Scope, VarKey};
use crate::node::{NodeConfig, NodeId, OutputRef};
use crate::registry::{NodeBehavior, NodeDef, NodeRegistry};

/// Register every built-in node type
pub fn register_builtin_nodes(registry: &mut NodeRegistry) {
    register_event(registry);
    register_flow_nodes(registry);
    register_log(registry);
    register_message(registry);
    register_constant(registry);
    register_variable_nodes(registry);
    register_math_nodes(registry);
    register_compare(registry);
    register_logic_gates(registry);
    register_text_nodes(registry);
    register_list_nodes(registry);
    register_struct_get(registry);
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn config_str<'c>(config: &'c NodeConfig, key: &str, default: &'c str) -> &'c str {
    config.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

/// Resolve a type setting; absent means `number`
fn config_type(config: &NodeConfig, key: &str, structs: &dyn StructLookup) -> Result<ValueType, GraphError> {
    let name = config_str(config, key, "number");
    ValueType::parse(name, structs).ok_or_else(|| GraphError::UnresolvedReference(name.to_string()))
}

/// Write string settings in order
fn write_strings(config: &NodeConfig, fields: &[(&str, &str)], out: &mut Writer) {
    for (key, default) in fields {
        out.string(config_str(config, key, default));
    }
}

/// Read string settings written by [`write_strings`]
fn read_strings(input: &mut Reader, keys: &[&str]) -> Result<NodeConfig, DecodeError> {
    let mut config = serde_json::Map::new();
    for key in keys {
        config.insert(key.to_string(), NodeConfig::String(input.string()?));
    }
    Ok(NodeConfig::Object(config))
}

fn variable_name(scope: &Scope<'_, '_>) -> String {
    scope.config_str("variable").unwrap_or("value").to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for an external event; exposes the trigger's payload
struct OnEvent;

impl NodeBehavior for OnEvent {
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(NodePorts::new(
            vec![],
            vec![
                PortDef::signal("then"),
                PortDef::value("player", ValueType::Player),
                PortDef::value("text", ValueType::Text),
                PortDef::value("number", ValueType::Number),
            ],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("event", "start")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["event"])
    }

    fn register(&self, node: NodeId, config: &NodeConfig, compiler: &mut Compiler) {
        let entry = compiler.mark_root(OutputRef::new(node, 0));
        compiler.subscribe(config_str(config, "event", "start"), entry);
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, output: usize) -> Result<Value, EvalError> {
        let trigger = scope.trigger();
        match output {
            1 => trigger
                .player
                .clone()
                .map(Value::Player)
                .ok_or(EvalError::MissingTriggerData("player")),
            2 => trigger
                .text
                .clone()
                .map(Value::Text)
                .ok_or(EvalError::MissingTriggerData("text")),
            3 => trigger
                .number
                .map(Value::Number)
                .ok_or(EvalError::MissingTriggerData("number")),
            _ => Err(EvalError::NotAValueOutput {
                node: scope.node(),
                slot: output,
            }),
        }
    }
}

fn register_event(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("event/On", "Events", "Runs when the configured event fires"),
        Arc::new(OnEvent),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow Control
// ─────────────────────────────────────────────────────────────────────────────

struct Branch;

impl NodeBehavior for Branch {
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(NodePorts::new(
            vec![
                PortDef::signal("exec"),
                PortDef::with_default("condition", ValueType::Boolean, Value::Boolean(false)),
            ],
            vec![PortDef::signal("true"), PortDef::signal("false")],
        ))
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        let condition = scope.input_bool(1)?;
        Ok(Flow::Continue(if condition { 0 } else { 1 }))
    }
}

/// Repeats the body while the condition holds. Nothing bounds the iteration count.
struct While;

impl NodeBehavior for While {
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(NodePorts::new(
            vec![
                PortDef::signal("exec"),
                PortDef::with_default("condition", ValueType::Boolean, Value::Boolean(false)),
            ],
            vec![PortDef::signal("body"), PortDef::signal("completed")],
        ))
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        while scope.input_bool(1)? {
            scope.fire(0)?;
        }
        Ok(Flow::Continue(1))
    }
}

/// Runs the body once per list element, exposing element and index
struct ForEach;

impl NodeBehavior for ForEach {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let element = config_type(config, "element", structs)?;
        Ok(NodePorts::new(
            vec![
                PortDef::signal("exec"),
                PortDef::value("list", ValueType::list(element.clone())),
            ],
            vec![
                PortDef::signal("body"),
                PortDef::value("element", element),
                PortDef::value("index", ValueType::Number),
                PortDef::signal("completed"),
            ],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("element", "number")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["element"])
    }

    fn register(&self, node: NodeId, _config: &NodeConfig, compiler: &mut Compiler) {
        compiler.allocate_id(node);
        compiler.allocate_id(node);
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        let items = scope.input_list(1)?;
        let element = scope.slot(0)?;
        let index = scope.slot(1)?;
        for (i, item) in items.into_iter().enumerate() {
            scope.set_variable(element.clone(), item);
            scope.set_variable(index.clone(), Value::Number(i as f64));
            scope.fire(0)?;
        }
        Ok(Flow::Continue(3))
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, output: usize) -> Result<Value, EvalError> {
        let key = match output {
            1 => scope.slot(0)?,
            2 => scope.slot(1)?,
            _ => {
                return Err(EvalError::NotAValueOutput {
                    node: scope.node(),
                    slot: output,
                });
            }
        };
        scope
            .variable(&key)
            .cloned()
            .ok_or_else(|| scope.fault("loop value read outside of the loop body"))
    }
}

/// Runs each output chain in order
struct Sequence;

impl Sequence {
    fn count(config: &NodeConfig) -> usize {
        config
            .get("outputs")
            .and_then(|v| v.as_u64())
            .map(|n| n.clamp(1, 16) as usize)
            .unwrap_or(2)
    }
}

impl NodeBehavior for Sequence {
    fn ports(&self, config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let outputs = (0..Self::count(config))
            .map(|i| PortDef::signal(&format!("then_{}", i)))
            .collect();
        Ok(NodePorts::new(vec![PortDef::signal("exec")], outputs))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        out.count(Self::count(config));
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        Ok(json!({ "outputs": input.count()? }))
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        for slot in 0..Self::count(scope.config()) {
            scope.fire(slot)?;
        }
        Ok(Flow::End)
    }
}

fn register_flow_nodes(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("flow/Branch", "Flow Control", "Branch execution based on a boolean condition"),
        Arc::new(Branch),
    );
    registry.register(
        NodeDef::new("flow/While", "Flow Control", "Repeat the body while the condition is true"),
        Arc::new(While),
    );
    registry.register(
        NodeDef::new("flow/ForEach", "Flow Control", "Run the body for every element of a list"),
        Arc::new(ForEach),
    );
    registry.register(
        NodeDef::new("flow/Sequence", "Flow Control", "Execute multiple branches in sequence"),
        Arc::new(Sequence),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Utilities
// ─────────────────────────────────────────────────────────────────────────────

struct Log;

impl NodeBehavior for Log {
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(NodePorts::new(
            vec![
                PortDef::signal("exec"),
                PortDef::with_default("message", ValueType::Text, Value::from("")),
            ],
            vec![PortDef::signal("then")],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("level", "info")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["level"])
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        let message = scope.input_text(1)?;
        let context = scope.context_id();

        match scope.config_str("level").unwrap_or("info") {
            "error" => tracing::error!(target: "blueprint", %context, "{}", message),
            "warn" => tracing::warn!(target: "blueprint", %context, "{}", message),
            "debug" => tracing::debug!(target: "blueprint", %context, "{}", message),
            _ => tracing::info!(target: "blueprint", %context, "{}", message),
        }

        Ok(Flow::Continue(0))
    }
}

fn register_log(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("util/Log", "Utilities", "Log a message to the console"),
        Arc::new(Log),
    );
}

/// Sends text to a player, by default the one who triggered the event
struct SendMessage;

impl NodeBehavior for SendMessage {
    fn ports(&self, _config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        Ok(NodePorts::new(
            vec![
                PortDef::signal("exec"),
                PortDef::value("text", ValueType::Text),
                PortDef::value("player", ValueType::Player),
            ],
            vec![PortDef::signal("then")],
        ))
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        let text = scope.input_text(1)?;
        let to = match scope.try_input(2)? {
            Some(Value::Player(player)) => Some(player),
            Some(other) => {
                return Err(EvalError::TypeMismatch {
                    node: scope.node(),
                    expected: "player",
                    found: other.kind_name(),
                });
            }
            None => scope.trigger().player.clone(),
        };
        scope.send_message(to, text);
        Ok(Flow::Continue(0))
    }
}

fn register_message(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("util/Message", "Utilities", "Send a chat message to a player"),
        Arc::new(SendMessage),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Values and Variables
// ─────────────────────────────────────────────────────────────────────────────

/// A literal of a primitive type
struct Constant;

impl Constant {
    fn literal(config: &NodeConfig) -> Result<Value, GraphError> {
        match config.get("value") {
            None | Some(NodeConfig::Null) => Ok(Value::Number(0.0)),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| GraphError::InvalidConfig(format!("value: {}", e))),
        }
    }
}

impl NodeBehavior for Constant {
    fn ports(&self, config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let value_type = match Self::literal(config)? {
            Value::Number(_) => ValueType::Number,
            Value::Text(_) => ValueType::Text,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Player(_) => ValueType::Player,
            other => {
                return Err(GraphError::InvalidConfig(format!(
                    "constants must be primitive, got {}",
                    other.kind_name()
                )));
            }
        };
        Ok(NodePorts::new(vec![], vec![PortDef::value("value", value_type)]))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        Self::literal(config)
            .unwrap_or(Value::Number(0.0))
            .encode(out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        let value = Value::decode(input)?;
        let value = serde_json::to_value(&value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(json!({ "value": value }))
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        Self::literal(scope.config()).map_err(|e| scope.fault(e.to_string()))
    }
}

fn register_constant(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("value/Constant", "Values", "A literal number, text, boolean or player").pure(),
        Arc::new(Constant),
    );
}

const VARIABLE_FIELDS: [(&str, &str); 2] = [("variable", "value"), ("type", "number")];

struct GetVariable;

impl NodeBehavior for GetVariable {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let value_type = config_type(config, "type", structs)?;
        Ok(NodePorts::new(vec![], vec![PortDef::value("value", value_type)]))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &VARIABLE_FIELDS, out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["variable", "type"])
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        let name = variable_name(scope);
        scope
            .variable(&VarKey::Named(name.clone()))
            .cloned()
            .ok_or(EvalError::UnsetVariable(name))
    }
}

struct SetVariable;

impl NodeBehavior for SetVariable {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let value_type = config_type(config, "type", structs)?;
        Ok(NodePorts::new(
            vec![PortDef::signal("exec"), PortDef::value("value", value_type.clone())],
            vec![PortDef::signal("then"), PortDef::value("value", value_type)],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &VARIABLE_FIELDS, out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["variable", "type"])
    }

    fn execute(&self, scope: &mut Scope<'_, '_>, _input: usize) -> Result<Flow, EvalError> {
        let value = scope.input(1)?;
        let name = variable_name(scope);
        scope.set_variable(VarKey::Named(name), value);
        Ok(Flow::Continue(0))
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        GetVariable.evaluate(scope, 0)
    }
}

fn register_variable_nodes(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("var/Get", "Variables", "Get the value of a variable").pure(),
        Arc::new(GetVariable),
    );
    registry.register(
        NodeDef::new("var/Set", "Variables", "Set the value of a variable"),
        Arc::new(SetVariable),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Math
// ─────────────────────────────────────────────────────────────────────────────

fn binary_number_ports(default_a: f64, default_b: f64) -> NodePorts {
    NodePorts::new(
        vec![
            PortDef::with_default("a", ValueType::Number, Value::Number(default_a)),
            PortDef::with_default("b", ValueType::Number, Value::Number(default_b)),
        ],
        vec![PortDef::value("result", ValueType::Number)],
    )
}

fn register_math_nodes(registry: &mut NodeRegistry) {
    registry.register_fn(
        NodeDef::new("math/Add", "Math", "Add two numbers"),
        binary_number_ports(0.0, 0.0),
        |scope| Ok(Value::Number(scope.input_number(0)? + scope.input_number(1)?)),
    );

    registry.register_fn(
        NodeDef::new("math/Subtract", "Math", "Subtract B from A"),
        binary_number_ports(0.0, 0.0),
        |scope| Ok(Value::Number(scope.input_number(0)? - scope.input_number(1)?)),
    );

    registry.register_fn(
        NodeDef::new("math/Multiply", "Math", "Multiply two numbers"),
        binary_number_ports(1.0, 1.0),
        |scope| Ok(Value::Number(scope.input_number(0)? * scope.input_number(1)?)),
    );

    registry.register_fn(
        NodeDef::new("math/Divide", "Math", "Divide A by B"),
        binary_number_ports(0.0, 1.0),
        |scope| {
            let a = scope.input_number(0)?;
            let b = scope.input_number(1)?;
            if b == 0.0 {
                return Err(scope.fault("division by zero"));
            }
            Ok(Value::Number(a / b))
        },
    );

    registry.register_fn(
        NodeDef::new("math/Random", "Math", "Random number between min (inclusive) and max (exclusive)"),
        NodePorts::new(
            vec![
                PortDef::with_default("min", ValueType::Number, Value::Number(0.0)),
                PortDef::with_default("max", ValueType::Number, Value::Number(1.0)),
            ],
            vec![PortDef::value("result", ValueType::Number)],
        ),
        |scope| {
            let min = scope.input_number(0)?;
            let max = scope.input_number(1)?;
            if max <= min {
                return Ok(Value::Number(min));
            }
            Ok(Value::Number(rand::thread_rng().gen_range(min..max)))
        },
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Logic
// ─────────────────────────────────────────────────────────────────────────────

const OPERATORS: [&str; 6] = ["==", "!=", "<", "<=", ">", ">="];

struct Compare;

impl NodeBehavior for Compare {
    fn ports(&self, config: &NodeConfig, _structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let operator = config_str(config, "operator", "==");
        if !OPERATORS.contains(&operator) {
            return Err(GraphError::InvalidConfig(format!("unknown operator '{}'", operator)));
        }
        Ok(NodePorts::new(
            vec![
                PortDef::with_default("a", ValueType::Number, Value::Number(0.0)),
                PortDef::with_default("b", ValueType::Number, Value::Number(0.0)),
            ],
            vec![PortDef::value("result", ValueType::Boolean)],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("operator", "==")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["operator"])
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        let a = scope.input_number(0)?;
        let b = scope.input_number(1)?;
        let result = match scope.config_str("operator").unwrap_or("==") {
            "==" => (a - b).abs() < f64::EPSILON,
            "!=" => (a - b).abs() >= f64::EPSILON,
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            other => return Err(scope.fault(format!("unknown operator '{}'", other))),
        };
        Ok(Value::Boolean(result))
    }
}

fn register_compare(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("logic/Compare", "Logic", "Compare two numbers").pure(),
        Arc::new(Compare),
    );
}

fn register_logic_gates(registry: &mut NodeRegistry) {
    let gate = || {
        NodePorts::new(
            vec![
                PortDef::with_default("a", ValueType::Boolean, Value::Boolean(false)),
                PortDef::with_default("b", ValueType::Boolean, Value::Boolean(false)),
            ],
            vec![PortDef::value("result", ValueType::Boolean)],
        )
    };

    registry.register_fn(
        NodeDef::new("logic/And", "Logic", "Logical AND of two boolean values"),
        gate(),
        |scope| Ok(Value::Boolean(scope.input_bool(0)? && scope.input_bool(1)?)),
    );

    registry.register_fn(
        NodeDef::new("logic/Or", "Logic", "Logical OR of two boolean values"),
        gate(),
        |scope| Ok(Value::Boolean(scope.input_bool(0)? || scope.input_bool(1)?)),
    );

    registry.register_fn(
        NodeDef::new("logic/Not", "Logic", "Logical NOT of a boolean value"),
        NodePorts::new(
            vec![PortDef::with_default("value", ValueType::Boolean, Value::Boolean(false))],
            vec![PortDef::value("result", ValueType::Boolean)],
        ),
        |scope| Ok(Value::Boolean(!scope.input_bool(0)?)),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Text
// ─────────────────────────────────────────────────────────────────────────────

/// Formats any value as text
struct ToText;

impl NodeBehavior for ToText {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let value_type = config_type(config, "type", structs)?;
        Ok(NodePorts::new(
            vec![PortDef::value("value", value_type)],
            vec![PortDef::value("text", ValueType::Text)],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("type", "number")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["type"])
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        Ok(Value::Text(scope.input(0)?.to_string()))
    }
}

fn register_text_nodes(registry: &mut NodeRegistry) {
    registry.register_fn(
        NodeDef::new("text/Concat", "Text", "Join two pieces of text"),
        NodePorts::new(
            vec![
                PortDef::with_default("a", ValueType::Text, Value::from("")),
                PortDef::with_default("b", ValueType::Text, Value::from("")),
            ],
            vec![PortDef::value("result", ValueType::Text)],
        ),
        |scope| {
            let mut text = scope.input_text(0)?;
            text.push_str(&scope.input_text(1)?);
            Ok(Value::Text(text))
        },
    );

    registry.register(
        NodeDef::new("text/ToText", "Text", "Format a value as text").pure(),
        Arc::new(ToText),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Lists
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum ListOp {
    Length,
    Get,
    Append,
}

/// List operations over a configured element type
struct ListNode(ListOp);

impl NodeBehavior for ListNode {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let element = config_type(config, "element", structs)?;
        let list = ValueType::list(element.clone());
        let ports = match self.0 {
            ListOp::Length => NodePorts::new(
                vec![PortDef::value("list", list)],
                vec![PortDef::value("length", ValueType::Number)],
            ),
            ListOp::Get => NodePorts::new(
                vec![
                    PortDef::value("list", list),
                    PortDef::with_default("index", ValueType::Number, Value::Number(0.0)),
                ],
                vec![PortDef::value("element", element)],
            ),
            ListOp::Append => NodePorts::new(
                vec![PortDef::value("list", list.clone()), PortDef::value("item", element)],
                vec![PortDef::value("list", list)],
            ),
        };
        Ok(ports)
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("element", "number")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["element"])
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        let mut items = scope.input_list(0)?;
        match self.0 {
            ListOp::Length => Ok(Value::Number(items.len() as f64)),
            ListOp::Get => {
                let index = scope.input_number(1)?;
                if index < 0.0 || index.fract() != 0.0 || index as usize >= items.len() {
                    return Err(scope.fault(format!(
                        "index {} out of range for list of {}",
                        index,
                        items.len()
                    )));
                }
                Ok(items.swap_remove(index as usize))
            }
            ListOp::Append => {
                items.push(scope.input(1)?);
                Ok(Value::List(items))
            }
        }
    }
}

fn register_list_nodes(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("list/Length", "Lists", "Number of elements in a list").pure(),
        Arc::new(ListNode(ListOp::Length)),
    );
    registry.register(
        NodeDef::new("list/Get", "Lists", "Element at an index").pure(),
        Arc::new(ListNode(ListOp::Get)),
    );
    registry.register(
        NodeDef::new("list/Append", "Lists", "A copy of the list with one more element").pure(),
        Arc::new(ListNode(ListOp::Append)),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Structs
// ─────────────────────────────────────────────────────────────────────────────

/// Reads one field of a struct instance
struct GetField;

impl NodeBehavior for GetField {
    fn ports(&self, config: &NodeConfig, structs: &dyn StructLookup) -> Result<NodePorts, GraphError> {
        let name = config_str(config, "struct", "");
        let field = config_str(config, "field", "");
        let schema = structs
            .lookup_struct(name)
            .ok_or_else(|| GraphError::UnresolvedReference(name.to_string()))?;
        let field_type = schema
            .field_index(field)
            .map(|i| schema.fields[i].value_type.clone())
            .ok_or_else(|| GraphError::InvalidConfig(format!("struct {} has no field '{}'", name, field)))?;

        Ok(NodePorts::new(
            vec![PortDef::value("value", ValueType::structure(schema))],
            vec![PortDef::value(field, field_type)],
        ))
    }

    fn write_data(&self, config: &NodeConfig, out: &mut Writer) {
        write_strings(config, &[("struct", ""), ("field", "")], out);
    }

    fn read_data(&self, input: &mut Reader, _structs: &dyn StructLookup) -> Result<NodeConfig, DecodeError> {
        read_strings(input, &["struct", "field"])
    }

    fn evaluate(&self, scope: &mut Scope<'_, '_>, _output: usize) -> Result<Value, EvalError> {
        let field = scope.config_str("field").unwrap_or_default().to_string();
        let value = scope.input(0)?;
        value
            .field(&field)
            .cloned()
            .ok_or_else(|| scope.fault(format!("value has no field '{}'", field)))
    }
}

fn register_struct_get(registry: &mut NodeRegistry) {
    registry.register(
        NodeDef::new("struct/Get", "Structs", "Read a field of a struct").pure(),
        Arc::new(GetField),
    );
}
