// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{DagmasterError, Result};
use crate::model::{TaskCode, TaskDefinition, TaskRelation};
use crate::types::TaskDependType;

/// Internal node structure: the definition plus immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    definition: TaskDefinition,
    /// Direct predecessors inside this DAG.
    deps: Vec<TaskCode>,
    /// Direct successors inside this DAG.
    dependents: Vec<TaskCode>,
}

/// Sub-graph selection applied while building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartNodes {
    pub nodes: Vec<TaskCode>,
    pub depend_type: TaskDependType,
}

/// Immutable per-pass DAG keyed by task code.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDag {
    nodes: HashMap<TaskCode, DagNode>,
    begin_nodes: Vec<TaskCode>,
    order: Vec<TaskCode>,
}

impl WorkflowDag {
    /// Build the DAG of one workflow definition.
    ///
    /// Fails if an edge references an unknown task, a task code is
    /// duplicated, the edges form a cycle, or a start node is unknown. With a
    /// non-empty `start`, only the selected nodes and the edges between them
    /// are kept.
    pub fn build(
        tasks: &[TaskDefinition],
        relations: &[TaskRelation],
        start: Option<&StartNodes>,
    ) -> Result<Self> {
        let mut defs: HashMap<TaskCode, &TaskDefinition> = HashMap::new();
        for task in tasks {
            if defs.insert(task.code, task).is_some() {
                return Err(DagmasterError::ConfigError(format!(
                    "duplicate task code {} in workflow definition",
                    task.code
                )));
            }
        }

        let mut edges: Vec<(TaskCode, TaskCode)> = Vec::new();
        for rel in relations {
            if !defs.contains_key(&rel.post) {
                return Err(DagmasterError::UnknownTask {
                    from: rel.pre.unwrap_or(rel.post),
                    to: rel.post,
                    missing: rel.post,
                });
            }
            let Some(pre) = rel.pre else { continue };
            if !defs.contains_key(&pre) {
                return Err(DagmasterError::UnknownTask {
                    from: pre,
                    to: rel.post,
                    missing: pre,
                });
            }
            if !edges.contains(&(pre, rel.post)) {
                edges.push((pre, rel.post));
            }
        }

        let mut graph: DiGraphMap<TaskCode, ()> = DiGraphMap::new();
        for task in tasks {
            graph.add_node(task.code);
        }
        for &(pre, post) in &edges {
            graph.add_edge(pre, post, ());
        }
        let full_order = toposort(&graph, None).map_err(|cycle| {
            DagmasterError::DagCycle(format!(
                "cycle detected in task DAG involving task {}",
                cycle.node_id()
            ))
        })?;

        let selected = match start {
            Some(start) if !start.nodes.is_empty() => select_nodes(&graph, start)?,
            _ => defs.keys().copied().collect(),
        };

        let mut nodes: HashMap<TaskCode, DagNode> = HashMap::new();
        for task in tasks.iter().filter(|t| selected.contains(&t.code)) {
            nodes.insert(
                task.code,
                DagNode {
                    definition: task.clone(),
                    deps: Vec::new(),
                    dependents: Vec::new(),
                },
            );
        }
        for &(pre, post) in &edges {
            if !(selected.contains(&pre) && selected.contains(&post)) {
                continue;
            }
            if let Some(node) = nodes.get_mut(&post) {
                node.deps.push(pre);
            }
            if let Some(node) = nodes.get_mut(&pre) {
                node.dependents.push(post);
            }
        }

        let begin_nodes = tasks
            .iter()
            .map(|t| t.code)
            .filter(|code| nodes.get(code).is_some_and(|n| n.deps.is_empty()))
            .collect();
        let order = full_order
            .into_iter()
            .filter(|code| selected.contains(code))
            .collect();

        Ok(Self {
            nodes,
            begin_nodes,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, code: TaskCode) -> bool {
        self.nodes.contains_key(&code)
    }

    pub fn definition(&self, code: TaskCode) -> Option<&TaskDefinition> {
        self.nodes.get(&code).map(|n| &n.definition)
    }

    /// Nodes without predecessors, in definition order.
    pub fn begin_nodes(&self) -> &[TaskCode] {
        &self.begin_nodes
    }

    pub fn is_begin(&self, code: TaskCode) -> bool {
        self.begin_nodes.contains(&code)
    }

    /// Task codes in a topological order.
    pub fn topological_order(&self) -> &[TaskCode] {
        &self.order
    }

    pub fn predecessors(&self, code: TaskCode) -> &[TaskCode] {
        self.nodes
            .get(&code)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, code: TaskCode) -> &[TaskCode] {
        self.nodes
            .get(&code)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_forbidden(&self, code: TaskCode) -> bool {
        self.nodes
            .get(&code)
            .is_some_and(|n| n.definition.forbidden)
    }

    pub fn forbidden_nodes(&self) -> impl Iterator<Item = TaskCode> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|code| self.is_forbidden(*code))
    }

    /// Predecessors with every forbidden node replaced by its own
    /// predecessors, transitively.
    pub fn effective_predecessors(&self, code: TaskCode) -> Vec<TaskCode> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<TaskCode> = self.predecessors(code).iter().rev().copied().collect();
        while let Some(pre) = stack.pop() {
            if !seen.insert(pre) {
                continue;
            }
            if self.is_forbidden(pre) {
                stack.extend(self.predecessors(pre).iter().rev().copied());
            } else {
                out.push(pre);
            }
        }
        out
    }

    /// Whether a direct successor, looking through forbidden nodes, is a
    /// CONDITIONS task.
    pub fn has_conditions_after(&self, code: TaskCode) -> bool {
        let mut stack: Vec<TaskCode> = self.successors(code).to_vec();
        let mut seen = HashSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            if node.definition.task_type.is_conditions() {
                return true;
            }
            if node.definition.forbidden {
                stack.extend(node.dependents.iter().copied());
            }
        }
        false
    }
}

fn select_nodes(graph: &DiGraphMap<TaskCode, ()>, start: &StartNodes) -> Result<HashSet<TaskCode>> {
    let mut selected = HashSet::new();
    let mut queue: VecDeque<TaskCode> = VecDeque::new();

    for &code in &start.nodes {
        if !graph.contains_node(code) {
            return Err(DagmasterError::InvalidCommand(format!(
                "start node {code} is not part of the workflow"
            )));
        }
        queue.push_back(code);
    }

    while let Some(code) = queue.pop_front() {
        if !selected.insert(code) {
            continue;
        }
        let next: Vec<TaskCode> = match start.depend_type {
            TaskDependType::TaskOnly => Vec::new(),
            TaskDependType::TaskPost => graph
                .neighbors_directed(code, petgraph::Direction::Outgoing)
                .collect(),
            TaskDependType::TaskPre => graph
                .neighbors_directed(code, petgraph::Direction::Incoming)
                .collect(),
        };
        queue.extend(next);
    }

    Ok(selected)
}
