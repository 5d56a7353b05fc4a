//! Graph-building helpers shared by the engine's tests.

use serde_json::Value;

use nodes::catalog::find_template;

use crate::models::{Connection, Endpoint, Graph, Node, Position};

/// Instantiate `template` with `config` (a JSON object) merged over its defaults.
pub fn node(template: &str, config: Value) -> Node {
    let template = find_template(template).unwrap_or_else(|| panic!("no template '{template}'"));
    let mut node = Node::from_template(template, Position::default());
    if let Value::Object(fields) = config {
        node.config.extend(fields);
    }
    node.sync_config_ports();
    node
}

/// Add `node` to `graph`, returning its id.
pub fn add(graph: &mut Graph, node: Node) -> String {
    let id = node.id.clone();
    graph.nodes.push(node);
    id
}

/// Wire `from.out_key` to `to.in_key` without the editor's validation.
pub fn link(graph: &mut Graph, from: &str, out_key: &str, to: &str, in_key: &str) {
    let source = graph.node(from).and_then(|n| n.output(out_key)).map(|p| p.id.clone());
    let target = graph.node(to).and_then(|n| n.input(in_key)).map(|p| p.id.clone());
    let (Some(source), Some(target)) = (source, target) else {
        panic!("cannot link {from}.{out_key} -> {to}.{in_key}");
    };
    graph.connections.push(Connection::new(
        Endpoint { node_id: from.into(), port_id: source },
        Endpoint { node_id: to.into(), port_id: target },
        nodes::catalog::ANY,
    ));
    graph.refresh_port_flags();
}
