//! Checkpoint graph
//!
//! The graph is the tree of debugging attempts. It owns the node map,
//! enforces the structural invariants, persists itself as a
//! [`GraphSnapshot`], and broadcasts a [`GraphEvent`] for every mutation so a
//! presentation layer can follow along.
//!
//! ## Structure
//!
//! ```text
//! 0 root (main)
//! ├── 1 "Fix index" (main)
//! │   └── 3 "Handle empty list" (main)
//! └── 2 "Try recursion" (main.2-<uuid>)   <- fork: second child of 0
//! ```
//!
//! ## Invariants
//!
//! - Node 0 is the root and the only node without a parent.
//! - Ids are allocated from `node_count` and never reused.
//! - A node's `commit_id` is set at most once.
//! - The active node always exists and is visible.
//!
//! The graph never touches the working tree. Restoring files before
//! [`CheckpointGraph::set_active`] is the caller's job.

use crate::error::{ForkpointError, Result};
use crate::types::{CheckpointNode, GraphEvent, GraphSnapshot, Hunk, NoticeLevel};
use crate::utils;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Id of the root node
pub const ROOT_ID: u64 = 0;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Tree of checkpoint nodes
pub struct CheckpointGraph {
    /// All nodes by id
    nodes: BTreeMap<u64, CheckpointNode>,
    /// Number of ids allocated so far
    node_count: u64,
    /// Currently active node
    active_node: u64,
    /// Event fan-out
    events: broadcast::Sender<GraphEvent>,
}

impl std::fmt::Debug for CheckpointGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointGraph")
            .field("node_count", &self.node_count)
            .field("active_node", &self.active_node)
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

/// One row of a rendered tree
#[derive(Debug, Clone)]
pub struct TreeRow<'a> {
    /// Box-drawing prefix including the connector
    pub prefix: String,
    /// Depth below the root
    pub depth: usize,
    /// The node on this row
    pub node: &'a CheckpointNode,
    /// Whether this is the active node
    pub is_active: bool,
}

/// Graph statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    /// Total number of nodes
    pub total_nodes: usize,
    /// Nodes with a commit attached
    pub committed_nodes: usize,
    /// Hidden nodes
    pub hidden_nodes: usize,
    /// Nodes with more than one child
    pub fork_points: usize,
    /// Length of the longest root-to-leaf path
    pub max_depth: usize,
}

impl CheckpointGraph {
    /// Create a graph holding only a root node
    pub fn new(root_text: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut graph = Self {
            nodes: BTreeMap::new(),
            node_count: 0,
            active_node: ROOT_ID,
            events,
        };
        graph.create_root(root_text);
        graph
    }

    /// Reset to a single root node; returns the root id
    pub fn create_root(&mut self, text: impl Into<String>) -> u64 {
        let text = text.into();
        self.nodes.clear();
        self.nodes.insert(ROOT_ID, CheckpointNode::new(ROOT_ID, None, text.clone()));
        self.node_count = 1;
        let previous = self.active_node;
        self.active_node = ROOT_ID;

        info!("Created root checkpoint {:?}", text);
        self.emit(GraphEvent::NodeCreated { id: ROOT_ID, parent: None, text });
        self.emit(GraphEvent::ActiveChanged { id: ROOT_ID, previous });
        ROOT_ID
    }

    /// Append a pending child to `parent`; returns the new id
    pub fn create_child(
        &mut self,
        parent: u64,
        initial_text: impl Into<String>,
        run_output: impl Into<String>,
        run_error: impl Into<String>,
    ) -> Result<u64> {
        if !self.nodes.contains_key(&parent) {
            return Err(ForkpointError::NodeNotFound(parent));
        }

        let id = self.node_count;
        let text = initial_text.into();
        let mut node = CheckpointNode::new(id, Some(parent), text.clone());
        node.run_output = run_output.into();
        node.run_error = run_error.into();

        self.nodes.insert(id, node);
        self.node_mut(parent)?.children.push(id);
        self.node_count += 1;

        debug!("Created checkpoint {} under {}", id, parent);
        self.emit(GraphEvent::NodeCreated { id, parent: Some(parent), text });
        Ok(id)
    }

    /// Record the commit backing a node
    ///
    /// Attaching the commit a node already has is a no-op; a different commit
    /// is rejected.
    pub fn attach_commit(&mut self, id: u64, commit_id: &str, branch_id: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        if !node.commit_id.is_empty() {
            if node.commit_id == commit_id {
                trace!("Commit {} already attached to {}", commit_id, id);
                return Ok(());
            }
            return Err(ForkpointError::CommitAlreadyAttached {
                node: id,
                existing: node.commit_id.clone(),
            });
        }

        node.commit_id = commit_id.to_string();
        node.branch_id = branch_id.to_string();

        debug!("Attached commit {} on {} to checkpoint {}", commit_id, branch_id, id);
        self.emit(GraphEvent::CommitAttached {
            id,
            commit_id: commit_id.to_string(),
            branch_id: branch_id.to_string(),
        });
        Ok(())
    }

    /// Change the active node
    pub fn set_active(&mut self, id: u64) -> Result<()> {
        let node = self.get(id)?;
        if !node.visible {
            return Err(ForkpointError::NodeHidden(id));
        }

        let previous = self.active_node;
        if previous == id {
            return Ok(());
        }
        self.active_node = id;

        debug!("Active checkpoint {} -> {}", previous, id);
        self.emit(GraphEvent::ActiveChanged { id, previous });
        Ok(())
    }

    /// Hide or show a node
    ///
    /// The root and the active node cannot be hidden.
    pub fn set_visible(&mut self, id: u64, visible: bool) -> Result<()> {
        if !visible && id == ROOT_ID {
            return Err(ForkpointError::InvalidGraph("the root cannot be hidden".to_string()));
        }
        if !visible && id == self.active_node {
            return Err(ForkpointError::InvalidGraph(format!(
                "checkpoint {} is active and cannot be hidden",
                id
            )));
        }

        let node = self.node_mut(id)?;
        if node.visible == visible {
            return Ok(());
        }
        node.visible = visible;

        self.emit(GraphEvent::VisibilityChanged { id, visible });
        Ok(())
    }

    /// Replace a node's label and hunks
    pub fn update_summary(&mut self, id: u64, text: impl Into<String>, diffs: Vec<Hunk>) -> Result<()> {
        let text = text.into();
        let node = self.node_mut(id)?;
        node.text = text.clone();
        node.diffs = diffs.clone();

        self.emit(GraphEvent::SummaryUpdated { id, text, diffs });
        Ok(())
    }

    /// Tell subscribers that the working files now show node `id`
    pub fn announce_restore(&self, id: u64) {
        self.emit(GraphEvent::Restored { id });
    }

    /// Publish a user-facing notice
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(GraphEvent::Notice { level, message: message.into() });
    }

    /// Subscribe to graph events
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Root node id
    pub fn root(&self) -> u64 {
        ROOT_ID
    }

    /// Active node id
    pub fn active_node(&self) -> u64 {
        self.active_node
    }

    /// Number of ids allocated
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Look up a node
    pub fn node(&self, id: u64) -> Option<&CheckpointNode> {
        self.nodes.get(&id)
    }

    /// Look up a node, failing if absent
    pub fn get(&self, id: u64) -> Result<&CheckpointNode> {
        self.nodes.get(&id).ok_or(ForkpointError::NodeNotFound(id))
    }

    /// The active node
    pub fn active(&self) -> Result<&CheckpointNode> {
        self.get(self.active_node)
    }

    /// All nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &CheckpointNode> {
        self.nodes.values()
    }

    /// Ancestors of a node from the root down to its parent
    pub fn ancestors(&self, id: u64) -> Vec<&CheckpointNode> {
        let mut ancestors = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent_id) = current {
            match self.nodes.get(&parent_id) {
                Some(parent) => {
                    ancestors.push(parent);
                    current = parent.parent;
                }
                None => break,
            }
        }
        ancestors.reverse();
        ancestors
    }

    /// Persistable snapshot of the whole graph
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            root: ROOT_ID,
            node_count: self.node_count,
            active_node: self.active_node,
            nodes: self.nodes.clone(),
        }
    }

    /// Rebuild a graph from a snapshot, validating its structure
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        validate(&snapshot)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            nodes: snapshot.nodes,
            node_count: snapshot.node_count,
            active_node: snapshot.active_node,
            events,
        })
    }

    /// Replace this graph's contents with a snapshot, keeping subscribers
    pub fn replace(&mut self, snapshot: GraphSnapshot) -> Result<()> {
        validate(&snapshot)?;
        let previous = self.active_node;
        self.nodes = snapshot.nodes;
        self.node_count = snapshot.node_count;
        self.active_node = snapshot.active_node;

        if previous != self.active_node {
            self.emit(GraphEvent::ActiveChanged { id: self.active_node, previous });
        }
        Ok(())
    }

    /// Write the snapshot as JSON, atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        utils::atomic_write(path, &json)?;
        trace!("Saved graph ({} nodes) to {:?}", self.nodes.len(), path);
        Ok(())
    }

    /// Load a graph saved with [`CheckpointGraph::save`]
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_snapshot(Self::read_snapshot(path)?)
    }

    /// Read a saved snapshot without building a graph from it
    pub fn read_snapshot(path: &Path) -> Result<GraphSnapshot> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Rows of the tree in depth-first order
    pub fn tree_rows(&self, include_hidden: bool) -> Vec<TreeRow<'_>> {
        let mut rows = Vec::new();
        if let Some(root) = self.nodes.get(&ROOT_ID) {
            rows.push(TreeRow {
                prefix: String::new(),
                depth: 0,
                node: root,
                is_active: self.active_node == ROOT_ID,
            });
            self.push_children(root, "", 1, include_hidden, &mut rows);
        }
        rows
    }

    fn push_children<'a>(
        &'a self,
        node: &'a CheckpointNode,
        prefix: &str,
        depth: usize,
        include_hidden: bool,
        rows: &mut Vec<TreeRow<'a>>,
    ) {
        let children: Vec<&CheckpointNode> = node
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|child| include_hidden || child.visible)
            .collect();

        for (i, &child) in children.iter().enumerate() {
            let is_last = i + 1 == children.len();
            let connector = if is_last { "└── " } else { "├── " };
            rows.push(TreeRow {
                prefix: format!("{}{}", prefix, connector),
                depth,
                node: child,
                is_active: self.active_node == child.id,
            });

            let extension = if is_last { "    " } else { "│   " };
            let child_prefix = format!("{}{}", prefix, extension);
            self.push_children(child, &child_prefix, depth + 1, include_hidden, rows);
        }
    }

    /// Graph statistics
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            total_nodes: self.nodes.len(),
            committed_nodes: self.nodes.values().filter(|n| !n.commit_id.is_empty()).count(),
            hidden_nodes: self.nodes.values().filter(|n| !n.visible).count(),
            fork_points: self.nodes.values().filter(|n| n.is_fork_point()).count(),
            max_depth: self.depth(ROOT_ID),
        }
    }

    fn depth(&self, id: u64) -> usize {
        match self.nodes.get(&id) {
            Some(node) => 1 + node.children.iter().map(|c| self.depth(*c)).max().unwrap_or(0),
            None => 0,
        }
    }

    fn node_mut(&mut self, id: u64) -> Result<&mut CheckpointNode> {
        self.nodes.get_mut(&id).ok_or(ForkpointError::NodeNotFound(id))
    }

    fn emit(&self, event: GraphEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Check a snapshot against the graph invariants
fn validate(snapshot: &GraphSnapshot) -> Result<()> {
    let invalid = |msg: String| Err(ForkpointError::InvalidGraph(msg));

    if snapshot.root != ROOT_ID {
        return invalid(format!("root must be {}, found {}", ROOT_ID, snapshot.root));
    }
    match snapshot.nodes.get(&ROOT_ID) {
        Some(root) if root.parent.is_none() => {}
        Some(_) => return invalid("root node has a parent".to_string()),
        None => return invalid("root node missing".to_string()),
    }

    for (key, node) in &snapshot.nodes {
        if *key != node.id {
            return invalid(format!("node stored under {} has id {}", key, node.id));
        }
        if node.id >= snapshot.node_count {
            return invalid(format!("node {} not below node count {}", node.id, snapshot.node_count));
        }
        match node.parent {
            None if node.id != ROOT_ID => {
                return invalid(format!("node {} has no parent", node.id));
            }
            Some(parent) => match snapshot.nodes.get(&parent) {
                Some(p) if p.children.contains(&node.id) => {}
                Some(_) => return invalid(format!("node {} missing from parent {}", node.id, parent)),
                None => return invalid(format!("node {} has unknown parent {}", node.id, parent)),
            },
            None => {}
        }
        for child in &node.children {
            match snapshot.nodes.get(child) {
                Some(c) if c.parent == Some(node.id) => {}
                _ => return invalid(format!("node {} lists foreign child {}", node.id, child)),
            }
        }
    }

    // Every node reachable from the root exactly once
    let mut seen = HashSet::new();
    let mut stack = vec![ROOT_ID];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return invalid(format!("node {} reachable twice", id));
        }
        if let Some(node) = snapshot.nodes.get(&id) {
            stack.extend(node.children.iter().copied());
        }
    }
    if seen.len() != snapshot.nodes.len() {
        return invalid("graph contains unreachable nodes".to_string());
    }

    match snapshot.nodes.get(&snapshot.active_node) {
        Some(node) if node.visible => Ok(()),
        Some(_) => invalid(format!("active node {} is hidden", snapshot.active_node)),
        None => invalid(format!("active node {} does not exist", snapshot.active_node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HunkLine;
    use tempfile::TempDir;

    fn sample() -> CheckpointGraph {
        let mut graph = CheckpointGraph::new("Debugging main.py");
        let a = graph.create_child(ROOT_ID, "a", "", "").unwrap();
        graph.create_child(a, "b", "out", "err").unwrap();
        graph.create_child(ROOT_ID, "c", "", "").unwrap();
        graph
    }

    #[test]
    fn test_ids_are_monotonic() {
        let graph = sample();
        let ids: Vec<u64> = graph.nodes().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.get(ROOT_ID).unwrap().children, vec![1, 3]);
        assert!(graph.get(ROOT_ID).unwrap().is_fork_point());
        assert_eq!(graph.get(2).unwrap().run_output, "out");
    }

    #[test]
    fn test_create_root_resets() {
        let mut graph = sample();
        graph.set_active(2).unwrap();
        assert_eq!(graph.create_root("again"), ROOT_ID);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.active_node(), ROOT_ID);
        assert!(graph.node(1).is_none());
    }

    #[test]
    fn test_attach_commit_once() {
        let mut graph = sample();
        graph.attach_commit(1, "abc", "main").unwrap();
        graph.attach_commit(1, "abc", "main").unwrap();
        assert!(matches!(
            graph.attach_commit(1, "def", "main"),
            Err(ForkpointError::CommitAlreadyAttached { node: 1, .. })
        ));
        assert_eq!(graph.get(1).unwrap().commit_id, "abc");
    }

    #[test]
    fn test_visibility_rules() {
        let mut graph = sample();
        assert!(graph.set_visible(ROOT_ID, false).is_err());

        graph.set_active(2).unwrap();
        assert!(graph.set_visible(2, false).is_err());

        graph.set_visible(3, false).unwrap();
        assert!(matches!(graph.set_active(3), Err(ForkpointError::NodeHidden(3))));
        assert_eq!(graph.tree_rows(false).len(), 3);
        assert_eq!(graph.tree_rows(true).len(), 4);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");

        let mut graph = sample();
        graph.set_active(2).unwrap();
        graph
            .update_summary(2, "Fixed loop", vec![Hunk {
                old_start: 1,
                new_start: 1,
                lines: vec![HunkLine::add("x", 1)],
            }])
            .unwrap();
        graph.save(&path).unwrap();

        let loaded = CheckpointGraph::load(&path).unwrap();
        assert_eq!(loaded.snapshot(), graph.snapshot());
        assert_eq!(loaded.active_node(), 2);
        assert_eq!(loaded.get(2).unwrap().text, "Fixed loop");
    }

    #[test]
    fn test_invalid_snapshots_rejected() {
        let graph = sample();

        let mut hidden_active = graph.snapshot();
        hidden_active.active_node = 3;
        hidden_active.nodes.get_mut(&3).unwrap().visible = false;
        assert!(CheckpointGraph::from_snapshot(hidden_active).is_err());

        let mut orphan = graph.snapshot();
        orphan.nodes.get_mut(&0).unwrap().children.retain(|c| *c != 3);
        assert!(CheckpointGraph::from_snapshot(orphan).is_err());

        let mut low_count = graph.snapshot();
        low_count.node_count = 2;
        assert!(CheckpointGraph::from_snapshot(low_count).is_err());
    }

    #[test]
    fn test_events_published() {
        let mut graph = CheckpointGraph::new("root");
        let mut rx = graph.subscribe();

        let id = graph.create_child(ROOT_ID, "child", "", "").unwrap();
        graph.set_active(id).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            GraphEvent::NodeCreated { id, parent: Some(ROOT_ID), text: "child".to_string() }
        );
        assert_eq!(rx.try_recv().unwrap(), GraphEvent::ActiveChanged { id, previous: ROOT_ID });
    }

    #[test]
    fn test_ancestors_and_stats() {
        let graph = sample();
        let ancestors: Vec<u64> = graph.ancestors(2).iter().map(|n| n.id).collect();
        assert_eq!(ancestors, vec![0, 1]);

        let stats = graph.stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.fork_points, 1);
        assert_eq!(stats.max_depth, 3);
    }
}
