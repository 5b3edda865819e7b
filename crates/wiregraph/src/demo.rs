//! Sample graph written by `wiregraph demo`
//!
//! Events:
//! - `join`: greets the joining player
//! - `square`: calls the `square` function on the trigger number
//! - `count`: counts up to the trigger number with a while loop
//! - `point`: builds a `Point` and reports its `y` field

use anyhow::Result;
use serde_json::json;

use blueprint_runtime::{
    FunctionDef, Graph, InputRef, NodeConfig, NodeId, NodeRegistry, OutputRef, Position,
};
use blueprint_types::{Field, StructType, Value, ValueType};

struct Builder<'r> {
    graph: Graph,
    registry: &'r NodeRegistry,
}

impl Builder<'_> {
    fn node(&mut self, type_id: &str, config: NodeConfig, x: f64, y: f64) -> Result<NodeId> {
        Ok(self
            .graph
            .add_builtin(self.registry, type_id, config, Position::new(x, y))?)
    }

    fn constant(&mut self, value: Value, x: f64, y: f64) -> Result<NodeId> {
        self.node("value/Constant", json!({ "value": serde_json::to_value(value)? }), x, y)
    }

    fn event(&mut self, name: &str, y: f64) -> Result<NodeId> {
        self.node("event/On", json!({ "event": name }), 0.0, y)
    }

    fn wire(&mut self, from: (NodeId, usize), to: (NodeId, usize)) -> Result<()> {
        self.graph
            .connect(OutputRef::new(from.0, from.1), InputRef::new(to.0, to.1))?;
        Ok(())
    }
}

pub fn build(registry: &NodeRegistry) -> Result<Graph> {
    let mut b = Builder {
        graph: Graph::new(),
        registry,
    };

    // join
    let join = b.event("join", 0.0)?;
    let welcome = b.constant(Value::from("Welcome to the server"), 150.0, 80.0)?;
    let greet = b.node("util/Message", NodeConfig::Null, 300.0, 0.0)?;
    b.wire((join, 0), (greet, 0))?;
    b.graph.connect_with_relays(
        OutputRef::new(welcome, 0),
        InputRef::new(greet, 1),
        vec![Position::new(225.0, 80.0), Position::new(225.0, 20.0)],
    )?;
    let log = b.node("util/Log", json!({ "level": "info" }), 450.0, 0.0)?;
    b.wire((greet, 0), (log, 0))?;
    b.wire((welcome, 0), (log, 1))?;

    // square
    let square = b.graph.define_function(
        FunctionDef::new(
            "square",
            vec![Field::new("exec", ValueType::Signal), Field::new("n", ValueType::Number)],
            vec![Field::new("done", ValueType::Signal), Field::new("result", ValueType::Number)],
        ),
        Position::new(0.0, 1000.0),
    )?;
    let (entry, exit) = {
        let f = b.graph.function(square);
        (
            f.and_then(|f| f.input_node()),
            f.and_then(|f| f.output_node()),
        )
    };
    let (Some(entry), Some(exit)) = (entry, exit) else {
        anyhow::bail!("function square has no boundary nodes");
    };
    let multiply = b.node("math/Multiply", NodeConfig::Null, 200.0, 1000.0)?;
    b.wire((entry, 0), (exit, 0))?;
    b.wire((entry, 1), (multiply, 0))?;
    b.wire((entry, 1), (multiply, 1))?;
    b.wire((multiply, 0), (exit, 1))?;

    let on_square = b.event("square", 200.0)?;
    let call = b.graph.add_call(square, Position::new(150.0, 200.0))?;
    let as_text = b.node("text/ToText", json!({ "type": "number" }), 300.0, 260.0)?;
    let report = b.node("util/Message", NodeConfig::Null, 450.0, 200.0)?;
    b.wire((on_square, 0), (call, 0))?;
    b.wire((on_square, 3), (call, 1))?;
    b.wire((call, 0), (report, 0))?;
    b.wire((call, 1), (as_text, 0))?;
    b.wire((as_text, 0), (report, 1))?;

    // count
    let on_count = b.event("count", 400.0)?;
    let zero = b.constant(Value::from(0), 0.0, 480.0)?;
    let reset = b.node("var/Set", json!({ "variable": "i", "type": "number" }), 150.0, 400.0)?;
    let repeat = b.node("flow/While", NodeConfig::Null, 300.0, 400.0)?;
    let below = b.node("logic/Compare", json!({ "operator": "<" }), 300.0, 500.0)?;
    let current = b.node("var/Get", json!({ "variable": "i", "type": "number" }), 150.0, 550.0)?;
    let next = b.node("math/Add", NodeConfig::Null, 450.0, 550.0)?;
    let step = b.node("var/Set", json!({ "variable": "i", "type": "number" }), 600.0, 400.0)?;
    let count_text = b.node("text/ToText", json!({ "type": "number" }), 600.0, 550.0)?;
    let done = b.node("util/Message", NodeConfig::Null, 750.0, 450.0)?;
    b.wire((on_count, 0), (reset, 0))?;
    b.wire((zero, 0), (reset, 1))?;
    b.wire((reset, 0), (repeat, 0))?;
    b.wire((current, 0), (below, 0))?;
    b.wire((on_count, 3), (below, 1))?;
    b.wire((below, 0), (repeat, 1))?;
    b.wire((repeat, 0), (step, 0))?;
    b.wire((current, 0), (next, 0))?;
    b.graph.set_inset(InputRef::new(next, 1), Some(Value::from(1)))?;
    b.wire((next, 0), (step, 1))?;
    b.wire((repeat, 1), (done, 0))?;
    b.wire((current, 0), (count_text, 0))?;
    b.wire((count_text, 0), (done, 1))?;

    // point
    let point = b.graph.define_struct(
        StructType::new(
            "Point",
            vec![Field::new("x", ValueType::Number), Field::new("y", ValueType::Number)],
        ),
        Position::new(0.0, 1300.0),
    )?;
    let Some(construct) = b.graph.struct_entry(point).and_then(|s| s.boundary()) else {
        anyhow::bail!("struct Point has no boundary node");
    };
    let on_point = b.event("point", 700.0)?;
    let three = b.constant(Value::from(3), 0.0, 780.0)?;
    let field = b.node("struct/Get", json!({ "struct": "Point", "field": "y" }), 300.0, 780.0)?;
    let field_text = b.node("text/ToText", json!({ "type": "number" }), 450.0, 780.0)?;
    let show = b.node("util/Message", NodeConfig::Null, 600.0, 700.0)?;
    b.wire((three, 0), (construct, 0))?;
    b.wire((on_point, 3), (construct, 1))?;
    b.wire((construct, 0), (field, 0))?;
    b.wire((field, 0), (field_text, 0))?;
    b.wire((on_point, 0), (show, 0))?;
    b.wire((field_text, 0), (show, 1))?;

    Ok(b.graph)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blueprint_runtime::{ExecutionTrigger, ScriptHost, persistence};

    use super::*;

    fn host() -> ScriptHost {
        let registry = NodeRegistry::with_builtins();
        let graph = build(&registry).unwrap();
        ScriptHost::with_graph(Arc::new(registry), graph)
    }

    fn messages(host: &ScriptHost, trigger: ExecutionTrigger) -> Vec<String> {
        host.fire(trigger)
            .into_iter()
            .flat_map(|r| r.unwrap().messages)
            .map(|m| m.text)
            .collect()
    }

    #[test]
    fn test_demo_events() {
        let host = host();
        assert_eq!(
            messages(&host, ExecutionTrigger::new("join").with_player("sam")),
            vec!["Welcome to the server"]
        );
        assert_eq!(
            messages(&host, ExecutionTrigger::new("square").with_number(7.0)),
            vec!["49"]
        );
        assert_eq!(
            messages(&host, ExecutionTrigger::new("count").with_number(5.0)),
            vec!["5"]
        );
        assert_eq!(
            messages(&host, ExecutionTrigger::new("point").with_number(2.5)),
            vec!["2.5"]
        );
    }

    #[test]
    fn test_demo_round_trips() {
        let registry = NodeRegistry::with_builtins();
        let graph = build(&registry).unwrap();
        let bytes = persistence::encode(&graph, &registry).unwrap();
        let report = persistence::decode(bytes, &registry).unwrap();
        assert_eq!(
            blueprint_runtime::GraphSummary::of(&report.graph),
            blueprint_runtime::GraphSummary::of(&graph)
        );
    }
}
