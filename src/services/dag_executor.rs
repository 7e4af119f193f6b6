//! DAG executor for decomposed repair runs.
//!
//! Validates a decomposition graph and picks which sub-problem to work on
//! next. Solved-node membership is owned by the run state and passed in.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::DagValidationError;
use crate::domain::models::{DagProgress, ErrorDag, ErrorNode, RunState};

/// Scheduler over a validated [`ErrorDag`].
#[derive(Debug, Clone)]
pub struct DagExecutor {
    max_nodes: usize,
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self { max_nodes: 64 }
    }
}

impl DagExecutor {
    pub fn new(max_nodes: usize) -> Self {
        Self { max_nodes }
    }

    /// Validate graph structure.
    ///
    /// Checks run in order: size, duplicate ids, dangling edges, cycles. Cycle
    /// detection walks the edge relation depth-first with an explicit stack and
    /// a recursion-stack set, so self-loops are cycles too.
    pub fn validate(&self, dag: &ErrorDag) -> Result<(), DagValidationError> {
        if dag.nodes.is_empty() {
            return Err(DagValidationError::EmptyGraph);
        }
        if dag.nodes.len() > self.max_nodes {
            return Err(DagValidationError::TooManyNodes {
                count: dag.nodes.len(),
                max: self.max_nodes,
            });
        }

        let mut ids: HashSet<&str> = HashSet::with_capacity(dag.nodes.len());
        for node in &dag.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(DagValidationError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &dag.edges {
            if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
                return Err(DagValidationError::DanglingEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        match find_cycle(dag) {
            Some(path) => Err(DagValidationError::CyclicGraph(path)),
            None => Ok(()),
        }
    }

    /// Unsolved nodes whose dependencies are all solved, in graph order.
    pub fn executable_nodes<'a>(&self, dag: &'a ErrorDag, solved: &[String]) -> Vec<&'a ErrorNode> {
        let solved: HashSet<&str> = solved.iter().map(String::as_str).collect();
        dag.nodes
            .iter()
            .filter(|node| !solved.contains(node.id.as_str()))
            .filter(|node| {
                node.dependencies
                    .iter()
                    .all(|dep| solved.contains(dep.as_str()))
            })
            .collect()
    }

    /// Lowest priority first, then lowest complexity. `None` when everything is
    /// solved or blocked.
    pub fn next_node<'a>(&self, dag: &'a ErrorDag, solved: &[String]) -> Option<&'a ErrorNode> {
        self.executable_nodes(dag, solved)
            .into_iter()
            .min_by_key(|node| (node.priority, node.complexity))
    }

    /// Record `node_id` as solved and clear the current node pointer.
    ///
    /// Returns `false` without touching the run when it has no decomposition.
    pub fn mark_solved(&self, run: &mut RunState, node_id: &str) -> bool {
        if run.dag.is_none() {
            return false;
        }
        if !run.solved_nodes.iter().any(|id| id == node_id) {
            run.solved_nodes.push(node_id.to_string());
        }
        run.current_node = None;
        true
    }

    /// Every node is solved. Order of `solved` is irrelevant.
    pub fn is_complete(&self, dag: &ErrorDag, solved: &[String]) -> bool {
        let solved: HashSet<&str> = solved.iter().map(String::as_str).collect();
        dag.nodes.iter().all(|node| solved.contains(node.id.as_str()))
    }

    pub fn progress(&self, dag: &ErrorDag, solved: &[String]) -> DagProgress {
        let solved: HashSet<&str> = solved.iter().map(String::as_str).collect();
        let total = dag.nodes.len();
        let solved_count = dag
            .nodes
            .iter()
            .filter(|node| solved.contains(node.id.as_str()))
            .count();

        let percentage = if total == 0 {
            0
        } else {
            (solved_count as f64 / total as f64 * 100.0).round() as u32
        };

        DagProgress {
            solved: solved_count,
            total,
            percentage,
            remaining: total - solved_count,
        }
    }
}

/// Depth-first search for a back-edge. Returns the cycle as a closed path
/// (`a -> b -> a`).
fn find_cycle(dag: &ErrorDag) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &dag.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    for start in dag.nodes.iter().map(|n| n.id.as_str()) {
        if visited.contains(start) {
            continue;
        }

        // (node, index of the next neighbour to explore)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        visited.insert(start);
        on_stack.insert(start);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let neighbours = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

            if next >= neighbours.len() {
                on_stack.remove(node);
                stack.pop();
                continue;
            }
            frame.1 += 1;

            let neighbour = neighbours[next];
            if on_stack.contains(neighbour) {
                let from = stack
                    .iter()
                    .position(|(id, _)| *id == neighbour)
                    .unwrap_or(0);
                let mut path: Vec<String> = stack[from..].iter().map(|(id, _)| id.to_string()).collect();
                path.push(neighbour.to_string());
                return Some(path);
            }
            if visited.insert(neighbour) {
                on_stack.insert(neighbour);
                stack.push((neighbour, 0));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DagEdge;

    fn ids(nodes: &[&ErrorNode]) -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    fn solved(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn three_node_dag() -> ErrorDag {
        ErrorDag::from_nodes(
            "build fails",
            vec![
                ErrorNode::new("A", "unused import"),
                ErrorNode::new("B", "missing trait impl"),
                ErrorNode::new("C", "test expects new output").with_dependencies(["B"]),
            ],
        )
    }

    #[test]
    fn test_three_node_walkthrough() {
        let executor = DagExecutor::default();
        let dag = three_node_dag();
        executor.validate(&dag).unwrap();

        assert_eq!(ids(&executor.executable_nodes(&dag, &[])), vec!["A", "B"]);
        assert_eq!(ids(&executor.executable_nodes(&dag, &solved(&["B"]))), vec!["A", "C"]);
        assert_eq!(ids(&executor.executable_nodes(&dag, &solved(&["A", "B"]))), vec!["C"]);

        let progress = executor.progress(&dag, &solved(&["A", "B"]));
        assert_eq!(progress.solved, 2);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.percentage, 67);
        assert_eq!(progress.remaining, 1);
    }

    #[test]
    fn test_validate_empty_graph() {
        let dag = ErrorDag::from_nodes("nothing", vec![]);
        assert_eq!(
            DagExecutor::default().validate(&dag),
            Err(DagValidationError::EmptyGraph)
        );
    }

    #[test]
    fn test_validate_duplicate_node() {
        let dag = ErrorDag::from_nodes(
            "dup",
            vec![ErrorNode::new("A", "one"), ErrorNode::new("A", "two")],
        );
        assert_eq!(
            DagExecutor::default().validate(&dag),
            Err(DagValidationError::DuplicateNode("A".into()))
        );
    }

    #[test]
    fn test_validate_dangling_edge() {
        let dag = ErrorDag::from_nodes(
            "dangling",
            vec![ErrorNode::new("A", "one").with_dependencies(["ghost"])],
        );
        assert_eq!(
            DagExecutor::default().validate(&dag),
            Err(DagValidationError::DanglingEdge {
                from: "ghost".into(),
                to: "A".into()
            })
        );
    }

    #[test]
    fn test_validate_cycle_reports_path() {
        let dag = ErrorDag::from_nodes(
            "cycle",
            vec![
                ErrorNode::new("A", "one").with_dependencies(["C"]),
                ErrorNode::new("B", "two").with_dependencies(["A"]),
                ErrorNode::new("C", "three").with_dependencies(["B"]),
            ],
        );
        match DagExecutor::default().validate(&dag) {
            Err(DagValidationError::CyclicGraph(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_self_loop() {
        let dag = ErrorDag {
            root_problem: "self".into(),
            nodes: vec![ErrorNode::new("A", "one")],
            edges: vec![DagEdge::new("A", "A")],
        };
        assert_eq!(
            DagExecutor::default().validate(&dag),
            Err(DagValidationError::CyclicGraph(vec!["A".into(), "A".into()]))
        );
    }

    #[test]
    fn test_validate_diamond_is_acyclic() {
        let dag = ErrorDag::from_nodes(
            "diamond",
            vec![
                ErrorNode::new("A", "root"),
                ErrorNode::new("B", "left").with_dependencies(["A"]),
                ErrorNode::new("C", "right").with_dependencies(["A"]),
                ErrorNode::new("D", "join").with_dependencies(["B", "C"]),
            ],
        );
        assert!(DagExecutor::default().validate(&dag).is_ok());
    }

    #[test]
    fn test_validate_caps_node_count() {
        let nodes = (0..5).map(|i| ErrorNode::new(format!("n{i}"), "x")).collect();
        let dag = ErrorDag::from_nodes("big", nodes);
        assert_eq!(
            DagExecutor::new(4).validate(&dag),
            Err(DagValidationError::TooManyNodes { count: 5, max: 4 })
        );
    }

    #[test]
    fn test_next_node_prefers_priority_then_complexity() {
        let dag = ErrorDag::from_nodes(
            "ranked",
            vec![
                ErrorNode::new("slow", "x").with_rank(1, 8),
                ErrorNode::new("cheap", "x").with_rank(1, 2),
                ErrorNode::new("later", "x").with_rank(3, 1),
            ],
        );
        let executor = DagExecutor::default();
        assert_eq!(executor.next_node(&dag, &[]).map(|n| n.id.as_str()), Some("cheap"));
        assert_eq!(
            executor.next_node(&dag, &solved(&["cheap"])).map(|n| n.id.as_str()),
            Some("slow")
        );
        assert!(executor
            .next_node(&dag, &solved(&["cheap", "slow", "later"]))
            .is_none());
    }

    #[test]
    fn test_next_node_none_when_blocked() {
        let dag = ErrorDag::from_nodes(
            "blocked",
            vec![ErrorNode::new("A", "x").with_dependencies(["outside"])],
        );
        assert!(DagExecutor::default().next_node(&dag, &[]).is_none());
    }

    #[test]
    fn test_mark_solved() {
        let executor = DagExecutor::default();
        let mut run = RunState::new(None, 5);
        assert!(!executor.mark_solved(&mut run, "A"));
        assert!(run.solved_nodes.is_empty());

        run.dag = Some(three_node_dag());
        run.current_node = Some("A".into());
        assert!(executor.mark_solved(&mut run, "A"));
        assert!(executor.mark_solved(&mut run, "A"));
        assert_eq!(run.solved_nodes, vec!["A".to_string()]);
        assert!(run.current_node.is_none());
    }

    #[test]
    fn test_is_complete_and_progress_extremes() {
        let executor = DagExecutor::default();
        let dag = three_node_dag();
        assert!(!executor.is_complete(&dag, &solved(&["A", "B"])));
        assert!(executor.is_complete(&dag, &solved(&["C", "A", "B"])));
        assert_eq!(executor.progress(&dag, &[]).percentage, 0);
        assert_eq!(executor.progress(&dag, &solved(&["B", "C", "A"])).percentage, 100);

        let empty = ErrorDag::from_nodes("empty", vec![]);
        assert_eq!(executor.progress(&empty, &[]).percentage, 0);
    }
}
