//! Node-type → topic routing.

use tracing::warn;

/// Worker-pool family a node type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeFamily {
    /// Synchronous I/O-bound handlers run by `flowline worker`.
    Lightweight,
    /// Model-backed handlers run by a separate runtime.
    Analytical,
}

const LIGHTWEIGHT_TYPES: &[&str] = &[
    "start",
    "trigger",
    "webhooktrigger",
    "wait",
    "end",
    "transform",
    "delay",
    "filter",
    "condition",
    "conditional",
    "email",
    "action",
    "webhook",
    "calculator",
    "httprequest",
    "googlecalendar",
];

const ANALYTICAL_TYPES: &[&str] = &[
    "textgeneration",
    "llm",
    "classification",
    "textclassification",
    "clustering",
    "prediction",
    "mlprediction",
    "regression",
    "sentiment",
    "summarization",
    "embedding",
    "questionanswering",
    "translation",
    "ner",
];

impl NodeFamily {
    /// Pure routing function. Unknown types fall back to the lightweight
    /// family with a warning.
    pub fn for_node_type(node_type: &str) -> Self {
        let tag = normalize(node_type);
        if ANALYTICAL_TYPES.contains(&tag.as_str()) {
            NodeFamily::Analytical
        } else {
            if !LIGHTWEIGHT_TYPES.contains(&tag.as_str()) {
                warn!(node_type = %node_type, "Unknown node type, routing to lightweight workers");
            }
            NodeFamily::Lightweight
        }
    }

    /// Topic carrying execution requests for this family.
    pub fn topic(self) -> Topic {
        match self {
            NodeFamily::Lightweight => Topic::LightweightNodes,
            NodeFamily::Analytical => Topic::AnalyticalNodes,
        }
    }
}

impl std::str::FromStr for NodeFamily {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lightweight" => Ok(Self::Lightweight),
            "analytical"  => Ok(Self::Analytical),
            other         => Err(format!("unknown node family: {other}")),
        }
    }
}

/// `textGeneration`, `text-generation` and `text_generation` share a tag.
fn normalize(node_type: &str) -> String {
    node_type
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Logical broker topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    LightweightNodes,
    AnalyticalNodes,
    NodeCompletion,
    WorkflowEvents,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::LightweightNodes,
        Topic::AnalyticalNodes,
        Topic::NodeCompletion,
        Topic::WorkflowEvents,
    ];

    /// Broker subject for this topic.
    pub fn subject(self) -> &'static str {
        match self {
            Topic::LightweightNodes => "flowline.nodes.lightweight",
            Topic::AnalyticalNodes => "flowline.nodes.analytical",
            Topic::NodeCompletion => "flowline.nodes.completion",
            Topic::WorkflowEvents => "flowline.workflow.events",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lightweight_types_route_to_lightweight_topic() {
        for t in ["start", "transform", "delay", "filter", "email", "webhook", "calculator", "httpRequest", "googleCalendar"] {
            assert_eq!(NodeFamily::for_node_type(t), NodeFamily::Lightweight, "{t}");
        }
    }

    #[test]
    fn analytical_types_route_regardless_of_spelling() {
        for t in ["textGeneration", "text-generation", "text_generation", "Classification", "clustering", "ml_prediction"] {
            assert_eq!(NodeFamily::for_node_type(t), NodeFamily::Analytical, "{t}");
        }
        assert_eq!(NodeFamily::Analytical.topic(), Topic::AnalyticalNodes);
    }

    #[test]
    fn unknown_types_fail_open_to_lightweight() {
        assert_eq!(NodeFamily::for_node_type("teleport"), NodeFamily::Lightweight);
        assert_eq!(NodeFamily::for_node_type("teleport").topic(), Topic::LightweightNodes);
    }

    #[test]
    fn subjects_are_distinct() {
        let mut subjects: Vec<_> = Topic::ALL.iter().map(|t| t.subject()).collect();
        subjects.sort();
        subjects.dedup();
        assert_eq!(subjects.len(), Topic::ALL.len());
    }
}
