//! Graphviz DOT and JSON summaries for visualization tools.

use crate::graph::{GraphStats, SolutionGraph};
use serde::Serialize;

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Longest state rendering kept in a DOT label.
const LABEL_LIMIT: usize = 60;

fn shorten(s: &str) -> String {
    if s.chars().count() <= LABEL_LIMIT {
        return s.to_string();
    }
    let mut out: String = s.chars().take(LABEL_LIMIT - 1).collect();
    out.push('…');
    out
}

pub fn render_dot(graph: &SolutionGraph) -> String {
    let mut out = String::new();
    out.push_str("digraph solution_graph {\n");
    out.push_str("  rankdir=LR;\n");
    out.push_str("  node [shape=box, fontname=\"Helvetica\"];\n");
    out.push_str("  edge [fontname=\"Helvetica\"];\n\n");

    for v in graph.vertices() {
        let label = format!(
            "{}\\n{}\\nsupport={}",
            v.id,
            dot_escape(&shorten(&v.state.to_sexpr())),
            v.support()
        );
        let mut attrs = vec![format!("label=\"{label}\"")];
        if v.terminal {
            attrs.push("peripheries=2".to_string());
            attrs.push("style=filled".to_string());
            attrs.push("fillcolor=\"#d9f2d9\"".to_string());
        }
        if v.is_approximate() {
            attrs.push("color=\"#cc6600\"".to_string());
        }
        out.push_str(&format!("  n{} [{}];\n", v.id.raw(), attrs.join(", ")));
    }
    out.push('\n');

    for e in graph.edges() {
        out.push_str(&format!(
            "  n{} -> n{} [label=\"{}\", penwidth={:.1}];\n",
            e.from.raw(),
            e.to.raw(),
            e.frequency,
            1.0 + f64::from(e.frequency).ln()
        ));
    }
    out.push_str("}\n");
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct VertexSummary {
    pub id: u32,
    pub fingerprint: String,
    pub support: usize,
    pub terminal: bool,
    pub approximate: bool,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub id: u32,
    pub from: u32,
    pub to: u32,
    pub frequency: u32,
    pub edits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub task: String,
    pub rule_set: String,
    pub stats: GraphStats,
    pub vertices: Vec<VertexSummary>,
    pub edges: Vec<EdgeSummary>,
}

pub fn summarize(graph: &SolutionGraph) -> GraphSummary {
    GraphSummary {
        task: graph.task().to_string(),
        rule_set: graph.rule_set().to_string(),
        stats: graph.stats(),
        vertices: graph
            .vertices()
            .iter()
            .map(|v| VertexSummary {
                id: v.id.raw(),
                fingerprint: v.state.digest(),
                support: v.support(),
                terminal: v.terminal,
                approximate: v.is_approximate(),
                state: v.state.to_sexpr(),
            })
            .collect(),
        edges: graph
            .edges()
            .iter()
            .map(|e| EdgeSummary {
                id: e.id.raw(),
                from: e.from.raw(),
                to: e.to.raw(),
                frequency: e.frequency,
                edits: e.edit.len(),
            })
            .collect(),
    }
}

pub fn render_json(graph: &SolutionGraph) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&summarize(graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_and_shortens_labels() {
        assert_eq!(dot_escape(r#"(const "a\b")"#), r#"(const \"a\\b\")"#);
        let long = "x".repeat(100);
        assert_eq!(shorten(&long).chars().count(), LABEL_LIMIT);
        assert_eq!(shorten("(module)"), "(module)");
    }
}
