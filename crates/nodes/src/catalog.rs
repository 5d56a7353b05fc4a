//! Static node template catalog.
//!
//! Templates are plain data: the engine deep-copies one into a graph node
//! whenever the user drops it on the canvas.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// The wildcard port data type.
pub const ANY: &str = "any";

/// What a node does at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Data,
}

/// Catalog grouping shown in the node palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Triggers,
    Actions,
    Conditions,
    Data,
    Integrations,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// A port declaration on a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortTemplate {
    /// Stable port name, e.g. `true` or `item`. Condition nodes route by it.
    pub key: String,
    pub direction: PortDirection,
    /// Declared data type, or [`ANY`].
    pub data_type: String,
}

impl PortTemplate {
    pub fn input(key: &str, data_type: &str) -> Self {
        Self {
            key: key.to_owned(),
            direction: PortDirection::Input,
            data_type: data_type.to_owned(),
        }
    }

    pub fn output(key: &str, data_type: &str) -> Self {
        Self {
            key: key.to_owned(),
            direction: PortDirection::Output,
            data_type: data_type.to_owned(),
        }
    }
}

/// One entry of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: String,
    pub kind: NodeKind,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub ports: Vec<PortTemplate>,
    pub default_config: Map<String, Value>,
}

impl NodeTemplate {
    fn new(
        id: &str,
        kind: NodeKind,
        category: Category,
        title: &str,
        description: &str,
        ports: Vec<PortTemplate>,
        default_config: Value,
    ) -> Self {
        Self {
            id: id.to_owned(),
            kind,
            category,
            title: title.to_owned(),
            description: description.to_owned(),
            ports,
            default_config: match default_config {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &PortTemplate> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &PortTemplate> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Output)
    }
}

/// Every built-in template, in palette order.
pub fn catalog() -> &'static [NodeTemplate] {
    static CATALOG: OnceLock<Vec<NodeTemplate>> = OnceLock::new();
    CATALOG.get_or_init(build_catalog)
}

/// Look up a template by id.
pub fn find_template(id: &str) -> Option<&'static NodeTemplate> {
    catalog().iter().find(|t| t.id == id)
}

/// All templates of one palette category.
pub fn templates_in(category: Category) -> impl Iterator<Item = &'static NodeTemplate> {
    catalog().iter().filter(move |t| t.category == category)
}

fn build_catalog() -> Vec<NodeTemplate> {
    use Category as C;
    use NodeKind as K;
    use PortTemplate as P;

    vec![
        // ------------------------------------------------------------------
        // Triggers
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "manual-trigger",
            K::Trigger,
            C::Triggers,
            "Manual Trigger",
            "Start the workflow by hand",
            vec![P::output("output", ANY)],
            json!({}),
        ),
        NodeTemplate::new(
            "schedule-trigger",
            K::Trigger,
            C::Triggers,
            "Schedule",
            "Start the workflow on a schedule",
            vec![P::output("output", ANY)],
            json!({ "everyMinutes": 60 }),
        ),
        NodeTemplate::new(
            "webhook-trigger",
            K::Trigger,
            C::Triggers,
            "Webhook",
            "Start the workflow from an incoming HTTP request",
            vec![P::output("output", "object")],
            json!({ "path": "" }),
        ),
        NodeTemplate::new(
            "memory-created",
            K::Trigger,
            C::Triggers,
            "Memory Created",
            "Fires when a new memory is stored",
            vec![P::output("memory", "object")],
            json!({}),
        ),
        // ------------------------------------------------------------------
        // Actions
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "create-note",
            K::Action,
            C::Actions,
            "Create Note",
            "Store a new note in the memory platform",
            vec![P::input("input", ANY), P::output("note", "object")],
            json!({ "title": "", "content": "" }),
        ),
        NodeTemplate::new(
            "send-notification",
            K::Action,
            C::Actions,
            "Send Notification",
            "Notify the user",
            vec![P::input("input", ANY), P::output("output", ANY)],
            json!({ "message": "" }),
        ),
        NodeTemplate::new(
            "subflow",
            K::Action,
            C::Actions,
            "Subflow",
            "Run a reusable subflow as a single step",
            vec![
                P::input("input", ANY),
                P::output("output", ANY),
                P::output("error", ANY),
            ],
            json!({ "subflowId": "" }),
        ),
        // ------------------------------------------------------------------
        // Integrations
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "http-request",
            K::Action,
            C::Integrations,
            "HTTP Request",
            "Call an external HTTP endpoint",
            vec![P::input("input", ANY), P::output("response", "object")],
            json!({ "method": "GET", "url": "" }),
        ),
        // ------------------------------------------------------------------
        // AI
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "ai-summarize",
            K::Action,
            C::Ai,
            "Summarize",
            "Summarize text with a language model",
            vec![P::input("text", ANY), P::output("summary", "string")],
            json!({ "model": "default", "maxWords": 100 }),
        ),
        // ------------------------------------------------------------------
        // Conditions
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "if-else",
            K::Condition,
            C::Conditions,
            "If / Else",
            "Branch on a boolean expression",
            vec![
                P::input("input", ANY),
                P::output("true", ANY),
                P::output("false", ANY),
            ],
            json!({ "condition": "true" }),
        ),
        NodeTemplate::new(
            "switch",
            K::Condition,
            C::Conditions,
            "Switch",
            "Route to the first case whose value equals the input",
            vec![
                P::input("input", ANY),
                P::output("case1", ANY),
                P::output("case2", ANY),
                P::output("case3", ANY),
                P::output("default", ANY),
            ],
            json!({ "cases": [] }),
        ),
        NodeTemplate::new(
            "for-loop",
            K::Condition,
            C::Conditions,
            "For Each",
            "Run the item branch once per array element, in order",
            vec![
                P::input("input", ANY),
                P::output("item", ANY),
                P::output("complete", ANY),
            ],
            json!({}),
        ),
        NodeTemplate::new(
            "while-loop",
            K::Condition,
            C::Conditions,
            "While",
            "Repeat the loop branch while an expression holds",
            vec![
                P::input("input", ANY),
                P::output("loop", ANY),
                P::output("exit", ANY),
            ],
            json!({ "condition": "false", "maxIterations": 100 }),
        ),
        NodeTemplate::new(
            "memory-router",
            K::Condition,
            C::Conditions,
            "Memory Router",
            "Route a memory by the first matching rule",
            vec![
                P::input("memory", ANY),
                P::output("important", ANY),
                P::output("archive", ANY),
                P::output("default", ANY),
            ],
            json!({ "rules": [], "defaultOutput": "default" }),
        ),
        // ------------------------------------------------------------------
        // Data
        // ------------------------------------------------------------------
        NodeTemplate::new(
            "set-fields",
            K::Data,
            C::Data,
            "Set Fields",
            "Merge fixed values into the payload",
            vec![P::input("input", ANY), P::output("output", ANY)],
            json!({ "values": {} }),
        ),
        NodeTemplate::new(
            "counter",
            K::Data,
            C::Data,
            "Counter",
            "Increment a numeric payload field",
            vec![P::input("input", ANY), P::output("output", ANY)],
            json!({ "field": "count", "by": 1 }),
        ),
        NodeTemplate::new(
            "log",
            K::Data,
            C::Data,
            "Log",
            "Write the payload to the run log and pass it on",
            vec![P::input("input", ANY), P::output("output", ANY)],
            json!({}),
        ),
    ]
}
