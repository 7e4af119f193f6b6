//! Error DAG inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::table::list_table;
use crate::domain::models::config::Config;
use crate::domain::models::{DagProgress, ErrorDag};
use crate::services::DagExecutor;

#[derive(Args, Debug)]
pub struct DagArgs {
    #[command(subcommand)]
    pub command: DagCommands,
}

#[derive(Subcommand, Debug)]
pub enum DagCommands {
    /// Validate a YAML or JSON graph and show what would run next
    Inspect {
        /// Graph file
        file: PathBuf,
        /// Node ids already solved (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        solved: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub problem: String,
    pub priority: i32,
    pub complexity: i32,
    pub dependencies: Vec<String>,
    pub solved: bool,
    pub executable: bool,
}

#[derive(Debug, Serialize)]
pub struct InspectOutput {
    pub root_problem: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub nodes: Vec<NodeSummary>,
    pub next_node: Option<String>,
    pub complete: bool,
    pub progress: DagProgress,
}

impl CommandOutput for InspectOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Root problem: {}", self.root_problem)];
        match &self.error {
            Some(error) => lines.push(format!("Invalid graph: {error}")),
            None => lines.push("Graph is valid".to_string()),
        }

        let mut table = list_table(&["id", "problem", "priority", "complexity", "depends on", "state"]);
        for node in &self.nodes {
            let state = if node.solved {
                "solved"
            } else if node.executable {
                "ready"
            } else {
                "blocked"
            };
            table.add_row(vec![
                node.id.clone(),
                truncate(&node.problem, 40),
                node.priority.to_string(),
                node.complexity.to_string(),
                node.dependencies.join(","),
                state.to_string(),
            ]);
        }
        lines.push(table.to_string());

        lines.push(format!(
            "Progress: {}/{} ({}%)",
            self.progress.solved, self.progress.total, self.progress.percentage
        ));
        if self.complete {
            lines.push("All sub-problems solved".to_string());
        } else if let Some(next) = &self.next_node {
            lines.push(format!("Next: {next}"));
        } else if self.valid {
            lines.push("No executable node: remaining nodes are blocked".to_string());
        }
        lines.join("\n")
    }
}

pub async fn execute(args: DagArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        DagCommands::Inspect { file, solved } => {
            let dag = load_dag(&file).await?;
            let executor = DagExecutor::new(config.coordinator.max_dag_nodes);
            output(&inspect(&executor, &dag, &solved), json_mode);
        }
    }
    Ok(())
}

/// Read a graph; when the file lists no edges they are derived from each
/// node's dependencies.
pub async fn load_dag(path: &Path) -> Result<ErrorDag> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read {}", path.display()))?;
    let dag: ErrorDag =
        serde_yaml::from_str(&raw).context(format!("Failed to parse {}", path.display()))?;
    if dag.edges.is_empty() {
        return Ok(ErrorDag::from_nodes(dag.root_problem, dag.nodes));
    }
    Ok(dag)
}

pub fn inspect(executor: &DagExecutor, dag: &ErrorDag, solved: &[String]) -> InspectOutput {
    let error = executor.validate(dag).err().map(|e| e.to_string());
    let valid = error.is_none();

    let executable: Vec<&str> = if valid {
        executor
            .executable_nodes(dag, solved)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect()
    } else {
        Vec::new()
    };

    let nodes = dag
        .nodes
        .iter()
        .map(|node| NodeSummary {
            id: node.id.clone(),
            problem: node.problem.clone(),
            priority: node.priority,
            complexity: node.complexity,
            dependencies: node.dependencies.clone(),
            solved: solved.contains(&node.id),
            executable: executable.contains(&node.id.as_str()),
        })
        .collect();

    InspectOutput {
        root_problem: dag.root_problem.clone(),
        valid,
        error,
        nodes,
        next_node: if valid {
            executor.next_node(dag, solved).map(|n| n.id.clone())
        } else {
            None
        },
        complete: valid && executor.is_complete(dag, solved),
        progress: executor.progress(dag, solved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r"
root_problem: build fails
nodes:
  - id: A
    problem: missing dependency
    priority: 1
  - id: B
    problem: type mismatch
    dependencies: [A]
  - id: C
    problem: failing test
    dependencies: [A]
    priority: 2
";

    #[tokio::test]
    async fn test_load_dag_derives_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dag.yaml");
        std::fs::write(&path, GRAPH).unwrap();

        let dag = load_dag(&path).await.unwrap();
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.edges.len(), 2);
    }

    #[test]
    fn test_inspect_reports_next_node() {
        let dag: ErrorDag = serde_yaml::from_str(GRAPH).unwrap();
        let dag = ErrorDag::from_nodes(dag.root_problem, dag.nodes);
        let executor = DagExecutor::default();

        let out = inspect(&executor, &dag, &[]);
        assert!(out.valid);
        assert_eq!(out.next_node.as_deref(), Some("A"));

        let out = inspect(&executor, &dag, &["A".to_string()]);
        assert_eq!(out.next_node.as_deref(), Some("B"));
        assert_eq!(out.progress.solved, 1);
        assert!(out.to_human().contains("Next: B"));
    }

    #[test]
    fn test_inspect_reports_cycle() {
        let dag: ErrorDag = serde_yaml::from_str(
            r"
root_problem: loop
nodes:
  - id: A
    problem: a
  - id: B
    problem: b
edges:
  - { from: A, to: B }
  - { from: B, to: A }
",
        )
        .unwrap();
        let out = inspect(&DagExecutor::default(), &dag, &[]);
        assert!(!out.valid);
        assert!(out.error.is_some());
        assert!(out.next_node.is_none());
        assert!(out.to_human().contains("Invalid graph"));
    }
}
