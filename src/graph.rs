//! Process graph construction over a record stream.
//!
//! Every retained record becomes a node placed at `(sequence * X_STEP, lane)`.
//! Successive retained nodes of one process are chained by ordering edges,
//! and each successful fork/clone gets a creation edge to the first node of
//! the process it created. strace does not always print the creating call
//! before the child's first event, so creation edges are resolved through a
//! registry keyed by the child's pid that either side may fill first.

use crate::types::{Category, Pid, Record};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Horizontal distance between successive nodes
pub const X_STEP: i64 = 25;
/// Vertical distance between process lanes
pub const LANE_STEP: i64 = 100;
/// How far left of a process's first node its label sits
pub const LABEL_OFFSET: i64 = 50;

/// One graph node; `category` is `None` for per-process label nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub pid: Option<Pid>,
    pub name: String,
    pub label: String,
    /// Arguments and result, rendered for display
    pub detail: String,
    pub x: i64,
    pub y: i64,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Between successive retained nodes of one process
    Sequence,
    /// From a fork/clone node to the created process's first node
    Creation,
}

/// Finished node and edge lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions {
    /// Elide default-category records after a process's first node
    pub compress: bool,
}

/// Per-process layout state
#[derive(Debug)]
struct Lane {
    pid: Option<Pid>,
    y: i64,
    first_x: Option<i64>,
    last_node: Option<String>,
}

/// Whichever side of a creation edge was observed first
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCreation {
    /// The fork/clone node, waiting for the child's first node
    Creator(String),
    /// The child's first node, waiting for the fork/clone that made it
    FirstNode(String),
}

/// Online graph builder; feed records in stream order with [`GraphBuilder::push`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    options: GraphOptions,
    graph: Graph,
    lanes: Vec<Lane>,
    lane_index: HashMap<Option<Pid>, usize>,
    creations: HashMap<Pid, PendingCreation>,
    ids: HashSet<String>,
    sequence: i64,
    elided: usize,
}

impl GraphBuilder {
    pub fn new(options: GraphOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    /// Records dropped by compression so far
    pub fn elided(&self) -> usize {
        self.elided
    }

    fn lane(&mut self, pid: Option<Pid>) -> usize {
        if let Some(&index) = self.lane_index.get(&pid) {
            return index;
        }
        let index = self.lanes.len();
        self.lanes.push(Lane {
            pid,
            y: index as i64 * LANE_STEP,
            first_x: None,
            last_node: None,
        });
        self.lane_index.insert(pid, index);
        index
    }

    /// Node ids are record timestamps; a repeated one gets a `#n` suffix
    fn unique_id(&mut self, timestamp: &str) -> String {
        if self.ids.insert(timestamp.to_string()) {
            return timestamp.to_string();
        }
        tracing::warn!(timestamp, "duplicate record timestamp, disambiguating node id");
        let mut n = 2;
        loop {
            let candidate = format!("{timestamp}#{n}");
            if self.ids.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn link(&mut self, from: String, to: String, kind: EdgeKind) {
        self.graph.edges.push(Edge { from, to, kind });
    }

    /// Add one record; returns the id of the node created for it, if retained
    pub fn push(&mut self, record: &Record) -> Option<String> {
        let category = record.category();
        let lane = self.lane(record.pid);

        if self.options.compress
            && category == Category::Default
            && self.lanes[lane].first_x.is_some()
        {
            self.elided += 1;
            tracing::trace!(timestamp = %record.timestamp, name = %record.name, "eliding node");
            return None;
        }

        let id = self.unique_id(&record.timestamp);
        let x = self.sequence * X_STEP;
        self.sequence += 1;

        let detail = render_detail(record);
        let style = category.style(&record.name, &detail);
        self.graph.nodes.push(Node {
            id: id.clone(),
            pid: record.pid,
            name: record.name.clone(),
            label: style.label,
            detail,
            x,
            y: self.lanes[lane].y,
            category: Some(category),
        });

        let previous = self.lanes[lane].last_node.replace(id.clone());
        match previous {
            Some(previous) => self.link(previous, id.clone(), EdgeKind::Sequence),
            None => {
                self.lanes[lane].first_x = Some(x);
                if let Some(pid) = record.pid {
                    self.first_node_created(pid, &id);
                }
            }
        }

        if let Some(child) = record.created_pid() {
            self.creation_seen(child, &id);
        }

        Some(id)
    }

    fn first_node_created(&mut self, pid: Pid, id: &str) {
        match self.creations.remove(&pid) {
            Some(PendingCreation::Creator(creator)) => {
                self.link(creator, id.to_string(), EdgeKind::Creation);
            }
            Some(PendingCreation::FirstNode(_)) | None => {
                self.creations
                    .insert(pid, PendingCreation::FirstNode(id.to_string()));
            }
        }
    }

    fn creation_seen(&mut self, child: Pid, id: &str) {
        match self.creations.remove(&child) {
            Some(PendingCreation::FirstNode(first)) => {
                tracing::debug!(child, "creation call observed after the child's first event");
                self.link(id.to_string(), first, EdgeKind::Creation);
            }
            Some(PendingCreation::Creator(stale)) => {
                tracing::debug!(child, stale = %stale, "pid created twice before it was seen");
                self.creations
                    .insert(child, PendingCreation::Creator(id.to_string()));
            }
            None => {
                self.creations
                    .insert(child, PendingCreation::Creator(id.to_string()));
            }
        }
    }

    /// Append one label node per process and return the finished graph.
    ///
    /// Creation edges whose child never appeared are dropped.
    pub fn finish(mut self) -> Graph {
        let unresolved = self
            .creations
            .values()
            .filter(|pending| matches!(pending, PendingCreation::Creator(_)))
            .count();
        if unresolved > 0 {
            tracing::debug!(unresolved, "creation edges without an observed child");
        }

        for lane in &self.lanes {
            let Some(first_x) = lane.first_x else {
                continue;
            };
            let text = lane
                .pid
                .map_or_else(|| "main".to_string(), |pid| pid.to_string());
            self.graph.nodes.push(Node {
                id: label_id(lane.pid),
                pid: lane.pid,
                name: text.clone(),
                label: text,
                detail: String::new(),
                x: first_x - LABEL_OFFSET,
                y: lane.y,
                category: None,
            });
        }
        self.graph
    }
}

/// Id of the label node for one process
pub fn label_id(pid: Option<Pid>) -> String {
    match pid {
        Some(pid) => format!("pid:{pid}"),
        None => "pid:main".to_string(),
    }
}

/// `["a", "b"] / result`, or just the result for argument-less records
pub fn render_detail(record: &Record) -> String {
    if record.args.is_empty() {
        return record.result.clone();
    }
    let args = serde_json::to_string(&record.args).unwrap_or_default();
    format!("{args} / {}", record.result)
}

/// Build the whole graph from an iterator of records
pub fn build<I>(records: I, options: GraphOptions) -> Graph
where
    I: IntoIterator<Item = Record>,
{
    let mut builder = GraphBuilder::new(options);
    for record in records {
        builder.push(&record);
    }
    builder.finish()
}
