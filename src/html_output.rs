//! Graph document export: a vis.js network page or bare JSON

use crate::graph::{Edge, Graph, Node};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::io::Write;

const DOCUMENT_HEAD: &str = r#"<html>
<head>
    <script src="./vis.min.js"></script>
    <link href="./vis.min.css" rel="stylesheet" type="text/css" />

    <style type="text/css">
        #mynetwork {
            width:  100%;
            height: 100%;
            border: 1px solid lightgray;
        }
    </style>
</head>
<body>
<div id="mynetwork"></div>

<script type="text/javascript">
"#;

const DOCUMENT_TAIL: &str = r#"
    var container = document.getElementById('mynetwork');
    var data = { nodes: nodes, edges: edges };
    var options = { physics: { enabled: false } };
    var network = new vis.Network(container, data, options);
</script>
</body>
</html>
"#;

/// vis.js attributes for one node
pub fn node_value(node: &Node) -> Value {
    let mut value = match node.category {
        Some(category) => {
            let style = category.style(&node.name, &node.detail);
            let mut value = json!({
                "id": node.id,
                "label": style.label,
                "x": node.x,
                "y": node.y,
                "size": style.size,
                "category": category,
            });
            if let Some(title) = style.title {
                value["title"] = json!(title);
            }
            if let Some(color) = style.color {
                value["color"] = json!(color);
            }
            if let Some(shape) = style.shape {
                value["shape"] = json!(shape);
            }
            value
        }
        None => json!({
            "id": node.id,
            "label": node.label,
            "x": node.x,
            "y": node.y,
            "size": 25,
            "shape": "text",
        }),
    };
    if let Some(pid) = node.pid {
        value["pid"] = json!(pid);
    }
    value
}

pub fn edge_value(edge: &Edge) -> Value {
    json!({ "from": edge.from, "to": edge.to })
}

/// JSON text that is safe to inline inside a `<script>` element
fn script_json(value: &Value) -> Result<String> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize graph")?;
    Ok(text.replace("</", "<\\/"))
}

/// Write the graph as a standalone HTML page
pub fn write_html<W: Write>(graph: &Graph, mut out: W) -> Result<()> {
    let nodes = Value::Array(graph.nodes.iter().map(node_value).collect());
    let edges = Value::Array(graph.edges.iter().map(edge_value).collect());

    out.write_all(DOCUMENT_HEAD.as_bytes())
        .context("Failed to write graph document")?;
    writeln!(out, "    var nodes = new vis.DataSet({});", script_json(&nodes)?)
        .context("Failed to write graph nodes")?;
    writeln!(out, "    var edges = new vis.DataSet({});", script_json(&edges)?)
        .context("Failed to write graph edges")?;
    out.write_all(DOCUMENT_TAIL.as_bytes())
        .context("Failed to write graph document")?;
    out.flush().context("Failed to flush graph document")?;
    Ok(())
}

/// Write the graph as `{"nodes": [...], "edges": [...]}`
pub fn write_json<W: Write>(graph: &Graph, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, graph).context("Failed to write graph JSON")?;
    writeln!(out).context("Failed to write graph JSON")?;
    out.flush().context("Failed to flush graph JSON")?;
    Ok(())
}
