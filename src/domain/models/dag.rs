//! Error decomposition graph models
//!
//! A root failure can be decomposed into dependent sub-problems. The graph is
//! created once per decomposition decision and never mutated after it has been
//! validated; which nodes are solved lives in the run state, not here.

use serde::{Deserialize, Serialize};

use super::ErrorCategory;

/// One decomposed sub-problem of a larger failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNode {
    /// Unique id within the graph
    pub id: String,
    /// Problem description for this sub-problem
    pub problem: String,
    /// Error category
    #[serde(default)]
    pub category: ErrorCategory,
    /// Files this sub-problem is expected to touch
    #[serde(default)]
    pub affected_files: Vec<String>,
    /// Ids of nodes that must be solved before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Lower values are attempted first
    #[serde(default)]
    pub priority: i32,
    /// Estimated complexity, used to break priority ties
    #[serde(default)]
    pub complexity: i32,
}

impl ErrorNode {
    /// Create a node with no dependencies and default priority/complexity
    pub fn new(id: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            problem: problem.into(),
            category: ErrorCategory::default(),
            affected_files: Vec::new(),
            dependencies: Vec::new(),
            priority: 0,
            complexity: 0,
        }
    }

    /// Builder: set the dependencies of this node
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set priority and complexity
    pub fn with_rank(mut self, priority: i32, complexity: i32) -> Self {
        self.priority = priority;
        self.complexity = complexity;
        self
    }

    /// Builder: set the affected files
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the category
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }
}

/// A directed edge: `from` must be solved before `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagEdge {
    /// The dependency
    pub from: String,
    /// The dependent sub-problem
    pub to: String,
}

impl DagEdge {
    /// Create a new edge
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Decomposition of one root problem into sub-problems
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDag {
    /// Description of the root problem
    pub root_problem: String,
    /// Sub-problems, in the order the decomposer produced them
    pub nodes: Vec<ErrorNode>,
    /// Dependency edges
    #[serde(default)]
    pub edges: Vec<DagEdge>,
}

impl ErrorDag {
    /// Build a graph whose edges are derived from each node's dependency list.
    pub fn from_nodes(root_problem: impl Into<String>, nodes: Vec<ErrorNode>) -> Self {
        let edges = nodes
            .iter()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(move |dep| DagEdge::new(dep.clone(), node.id.clone()))
            })
            .collect();
        Self {
            root_problem: root_problem.into(),
            nodes,
            edges,
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&ErrorNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Number of sub-problems.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Progress through a decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagProgress {
    /// Solved nodes that belong to the graph
    pub solved: usize,
    /// Total nodes in the graph
    pub total: usize,
    /// `round(solved / total * 100)`, 0 for an empty graph
    pub percentage: u32,
    /// Nodes still unsolved
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_nodes_derives_edges() {
        let dag = ErrorDag::from_nodes(
            "build fails",
            vec![
                ErrorNode::new("a", "missing import"),
                ErrorNode::new("b", "type mismatch").with_dependencies(["a"]),
            ],
        );

        assert_eq!(dag.edges, vec![DagEdge::new("a", "b")]);
        assert_eq!(dag.len(), 2);
        assert!(dag.node("b").is_some());
        assert!(dag.node("c").is_none());
    }

    #[test]
    fn test_node_yaml_defaults() {
        let yaml = "id: a\nproblem: broken test\n";
        let node: ErrorNode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.category, ErrorCategory::Unknown);
        assert!(node.dependencies.is_empty());
        assert_eq!(node.priority, 0);
    }
}
