//! All the generic task graph related abstractions.
//!
//! A [`Graph`] owns a collection of [`Task`]s. Tasks never reference each
//! other directly: task B depends on task A iff some output channel of A is
//! an input channel of B, after stripping any transcoding suffix. The graph
//! is rebuilt and validated from scratch on every transformation, so a
//! malformed graph can never exist, let alone be executed.
//!
//! ## Derived structure
//!
//! * A name index, and indices from (transcoding-stripped) channel names to
//!   the tasks consuming or producing them.
//! * A topological grouping: layers of mutually independent tasks, ordered
//!   so that all dependencies of a layer lie in strictly earlier layers.
//!
//! ## Invariants
//!
//! * Task names are unique.
//! * Every channel is produced by at most one task.
//! * Every channel is confirmed by at most one task.
//! * A transcoded channel is never also referenced by its bare base name.
//! * The dependency relation is acyclic.
pub mod modular;
mod slice;
mod topo;
pub mod transcode;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::ops::{Add, BitAnd, BitOr, Sub};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::error::GraphError;
use crate::task::{Decorator, Task};

use transcode::strip;

/// An element of a graph definition: either a task or a whole graph whose
/// tasks become direct members.
#[derive(Clone, Debug)]
pub enum Member {
    Task(Task),
    Graph(Graph),
}

impl From<Task> for Member {
    fn from(task: Task) -> Self {
        Member::Task(task)
    }
}

impl From<Graph> for Member {
    fn from(graph: Graph) -> Self {
        Member::Graph(graph)
    }
}

impl From<&Graph> for Member {
    fn from(graph: &Graph) -> Self {
        Member::Graph(graph.clone())
    }
}

/// A validated directed acyclic graph of tasks.
#[derive(Clone)]
pub struct Graph {
    pub(crate) dag: DiGraph<Task, ()>,
    by_name: HashMap<String, NodeIndex>,
    by_input: HashMap<String, BTreeSet<NodeIndex>>,
    by_output: HashMap<String, NodeIndex>,
    layers: Vec<Vec<NodeIndex>>,
}

impl Graph {
    /// Builds a graph from tasks and nested graphs.
    pub fn new<M: Into<Member>>(members: impl IntoIterator<Item = M>) -> Result<Graph, GraphError> {
        Self::tagged(members, Vec::<String>::new())
    }

    /// Builds a graph, adding `tags` to every task.
    pub fn tagged<M, T>(
        members: impl IntoIterator<Item = M>,
        tags: impl IntoIterator<Item = T>,
    ) -> Result<Graph, GraphError>
    where
        M: Into<Member>,
        T: Into<String>,
    {
        let members: Vec<Member> = members.into_iter().map(Into::into).collect();
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();

        validate_duplicate_tasks(&members)?;

        let tasks: Vec<Task> = members
            .into_iter()
            .flat_map(|member| match member {
                Member::Task(task) => vec![task],
                Member::Graph(graph) => graph.dag.into_nodes_edges().0.into_iter().map(|n| n.weight).collect(),
            })
            .map(|task| if tags.is_empty() { task } else { task.tag(tags.iter().cloned()) })
            .collect();

        Self::build(tasks)
    }

    pub fn empty() -> Graph {
        Graph {
            dag: DiGraph::new(),
            by_name: HashMap::new(),
            by_input: HashMap::new(),
            by_output: HashMap::new(),
            layers: Vec::new(),
        }
    }

    fn build(tasks: Vec<Task>) -> Result<Graph, GraphError> {
        validate_transcoded_channels(&tasks)?;
        validate_unique_outputs(&tasks)?;
        validate_unique_confirms(&tasks)?;

        let mut graph = Graph::empty();

        for task in tasks {
            let name = task.name();
            let index = graph.dag.add_node(task);
            graph.by_name.insert(name, index);

            let task = &graph.dag[index];
            for input in task.inputs() {
                graph.by_input.entry(strip(input).to_string()).or_default().insert(index);
            }
            for output in task.outputs() {
                graph.by_output.insert(strip(output).to_string(), index);
            }
        }

        let mut edges = BTreeSet::new();
        for child in graph.dag.node_indices() {
            for input in graph.dag[child].inputs() {
                if let Some(&parent) = graph.by_output.get(strip(input)) {
                    edges.insert((parent, child));
                }
            }
        }
        for (parent, child) in edges {
            graph.dag.add_edge(parent, child, ());
        }

        graph.layers = topo::layers(&graph.dag, Task::name).map_err(|cyclic| {
            GraphError::CircularDependency(
                cyclic.into_iter().map(|i| graph.dag[i].to_string()).collect(),
            )
        })?;

        Ok(graph)
    }

    /// Builds a new graph from a subset of this graph's tasks.
    pub(crate) fn subgraph(&self, indices: impl IntoIterator<Item = NodeIndex>) -> Result<Graph, GraphError> {
        let indices: BTreeSet<NodeIndex> = indices.into_iter().collect();
        Self::build(indices.into_iter().map(|i| self.dag[i].clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.by_name.get(name).map(|&index| &self.dag[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All tasks in topological order: if task A needs to run before task B,
    /// it appears earlier.
    pub fn tasks(&self) -> Vec<&Task> {
        self.layers.iter().flatten().map(|&i| &self.dag[i]).collect()
    }

    /// Tasks in topologically ordered layers of mutually independent tasks.
    pub fn grouped_tasks(&self) -> Vec<Vec<&Task>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| &self.dag[i]).collect())
            .collect()
    }

    /// Parents of every task, keyed by task name. Independent tasks map to
    /// an empty set.
    pub fn task_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.dag
            .node_indices()
            .map(|index| {
                let parents = self
                    .dag
                    .neighbors_directed(index, Direction::Incoming)
                    .map(|parent| self.dag[parent].name())
                    .collect();
                (self.dag[index].name(), parents)
            })
            .collect()
    }

    pub fn all_inputs(&self) -> BTreeSet<String> {
        self.dag
            .node_weights()
            .flat_map(|task| task.inputs())
            .map(String::from)
            .collect()
    }

    pub fn all_outputs(&self) -> BTreeSet<String> {
        self.dag
            .node_weights()
            .flat_map(|task| task.outputs())
            .map(String::from)
            .collect()
    }

    /// Every channel used by the graph, as input or output.
    pub fn data_sets(&self) -> BTreeSet<String> {
        let mut all = self.all_inputs();
        all.extend(self.all_outputs());
        all
    }

    /// Free inputs: channels consumed but never produced within the graph.
    /// They must be provided by the store before a run.
    pub fn inputs(&self) -> BTreeSet<String> {
        self.remove_intermediates(self.all_inputs())
    }

    /// Final outputs: channels produced but never consumed within the graph.
    pub fn outputs(&self) -> BTreeSet<String> {
        self.remove_intermediates(self.all_outputs())
    }

    fn remove_intermediates(&self, channels: BTreeSet<String>) -> BTreeSet<String> {
        let inputs: HashSet<&str> = self.by_input.keys().map(String::as_str).collect();
        let outputs: HashSet<&str> = self.by_output.keys().map(String::as_str).collect();

        channels
            .into_iter()
            .filter(|channel| {
                let base = strip(channel);
                !(inputs.contains(base) && outputs.contains(base))
            })
            .collect()
    }

    /// Returns a copy of the graph with every task tagged.
    pub fn tag<T: Into<String>>(&self, tags: impl IntoIterator<Item = T>) -> Result<Graph, GraphError> {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        Self::build(self.tasks().into_iter().map(|t| t.tag(tags.iter().cloned())).collect())
    }

    /// Returns a copy of the graph with every task decorated. The first
    /// decorator is the outermost one.
    pub fn decorate(&self, decorators: impl IntoIterator<Item = Decorator>) -> Result<Graph, GraphError> {
        let decorators: Vec<Decorator> = decorators.into_iter().collect();
        Self::build(
            self.tasks()
                .into_iter()
                .map(|t| t.decorate(decorators.iter().cloned()))
                .collect(),
        )
    }

    /// Tasks of both graphs. A task present in both is kept once; tasks
    /// sharing a name with different definitions are rejected.
    pub fn union(&self, other: &Graph) -> Result<Graph, GraphError> {
        let mut tasks: Vec<Task> = self.dag.node_weights().cloned().collect();
        let mut conflicts = BTreeSet::new();

        for task in other.dag.node_weights() {
            match self.get(&task.name()) {
                Some(existing) if existing.same_definition(task) => {}
                Some(_) => {
                    conflicts.insert(task.name());
                }
                None => tasks.push(task.clone()),
            }
        }

        if !conflicts.is_empty() {
            return Err(GraphError::ConflictingTasks(conflicts.into_iter().collect()));
        }

        Self::build(tasks)
    }

    /// Tasks of this graph which are not part of `other`.
    pub fn difference(&self, other: &Graph) -> Result<Graph, GraphError> {
        self.subgraph(
            self.dag
                .node_indices()
                .filter(|&i| !other.contains(&self.dag[i].name())),
        )
    }

    /// Tasks present in both graphs.
    pub fn intersection(&self, other: &Graph) -> Result<Graph, GraphError> {
        self.subgraph(
            self.dag
                .node_indices()
                .filter(|&i| other.contains(&self.dag[i].name())),
        )
    }

    /// Execution order and free inputs in a loggable, pre-formatted string.
    pub fn describe(&self, names_only: bool) -> String {
        let join = |set: BTreeSet<String>| {
            if set.is_empty() {
                "None".to_string()
            } else {
                set.into_iter().collect::<Vec<_>>().join(", ")
            }
        };

        let tasks = self
            .tasks()
            .into_iter()
            .map(|task| if names_only { task.name() } else { task.to_string() })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "#### Pipeline execution order ####\n\
             Inputs: {}\n\n\
             {}\n\n\
             Outputs: {}\n\
             ##################################",
            join(self.inputs()),
            tasks,
            join(self.outputs())
        )
    }

    /// JSON representation of the graph, tasks in execution order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct TaskJson<'a> {
            name: String,
            inputs: Vec<&'a str>,
            outputs: Vec<&'a str>,
            tags: &'a BTreeSet<String>,
        }

        #[derive(Serialize)]
        struct GraphJson<'a> {
            version: &'static str,
            pipeline: Vec<TaskJson<'a>>,
        }

        serde_json::to_string(&GraphJson {
            version: env!("CARGO_PKG_VERSION"),
            pipeline: self
                .tasks()
                .into_iter()
                .map(|task| TaskJson {
                    name: task.name(),
                    inputs: task.inputs(),
                    outputs: task.outputs(),
                    tags: task.tags(),
                })
                .collect(),
        })
    }

    /// Renders the graph as a Mermaid diagram, with free inputs and final
    /// outputs drawn as channel nodes.
    pub fn render_mermaid(&self) -> String {
        use std::fmt::Write;

        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        for index in self.layers.iter().flatten() {
            let name = self.dag[*index].name().replace('"', "\\\"");
            let _ = writeln!(f, "    t{}[\"{}\"]", index.index(), name);
        }

        let channels: Vec<String> = self.inputs().into_iter().chain(self.outputs()).collect();
        for (i, channel) in channels.iter().enumerate() {
            let _ = writeln!(f, "    c{i}([\"{}\"])", channel.replace('"', "\\\""));
        }

        for edge in self.dag.edge_indices() {
            let Some((source, target)) = self.dag.edge_endpoints(edge) else {
                continue;
            };
            let labels: BTreeSet<&str> = self.dag[source]
                .outputs()
                .into_iter()
                .filter(|o| self.dag[target].inputs().iter().any(|i| strip(i) == strip(o)))
                .collect();
            let label = labels.into_iter().collect::<Vec<_>>().join(", ");
            let _ = writeln!(f, "    t{} -- \"{}\" --> t{}", source.index(), label, target.index());
        }

        for (i, channel) in channels.iter().enumerate() {
            for index in self.dag.node_indices() {
                let task = &self.dag[index];
                if task.inputs().contains(&channel.as_str()) {
                    let _ = writeln!(f, "    c{i} --> t{}", index.index());
                }
                if task.outputs().contains(&channel.as_str()) {
                    let _ = writeln!(f, "    t{} --> c{i}", index.index());
                }
            }
        }

        f
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn layer_indices(&self) -> &[Vec<NodeIndex>] {
        &self.layers
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Graph {
    /// Graphs are equal when they hold the same set of tasks.
    fn eq(&self, other: &Self) -> bool {
        self.by_name.len() == other.by_name.len()
            && self.by_name.keys().all(|name| other.by_name.contains_key(name))
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tasks()).finish()
    }
}

impl Display for Graph {
    /// Short summary listing at most ten task names.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MAX: usize = 10;
        let mut names: Vec<String> = self.tasks().into_iter().take(MAX).map(Task::name).collect();
        if self.len() > MAX {
            names.push("...".into());
        }
        write!(f, "Graph([{}])", names.join(", "))
    }
}

impl Add<&Graph> for &Graph {
    type Output = Result<Graph, GraphError>;

    fn add(self, rhs: &Graph) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOr<&Graph> for &Graph {
    type Output = Result<Graph, GraphError>;

    fn bitor(self, rhs: &Graph) -> Self::Output {
        self.union(rhs)
    }
}

impl Sub<&Graph> for &Graph {
    type Output = Result<Graph, GraphError>;

    fn sub(self, rhs: &Graph) -> Self::Output {
        self.difference(rhs)
    }
}

impl BitAnd<&Graph> for &Graph {
    type Output = Result<Graph, GraphError>;

    fn bitand(self, rhs: &Graph) -> Self::Output {
        self.intersection(rhs)
    }
}

/// Task names must be unique across all members. Offenders are reported
/// grouped by the member graph they come from.
fn validate_duplicate_tasks(members: &[Member]) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<(String, BTreeSet<String>)> = Vec::new();

    let mut check = |name: String, origin: &dyn Fn() -> String| {
        if !seen.insert(name.clone()) {
            let origin = origin();
            match duplicates.iter_mut().find(|(o, _)| *o == origin) {
                Some((_, names)) => {
                    names.insert(name);
                }
                None => duplicates.push((origin, BTreeSet::from([name]))),
            }
        }
    };

    for member in members {
        match member {
            Member::Task(task) => check(task.name(), &|| "Free tasks".to_string()),
            Member::Graph(graph) => {
                for task in graph.dag.node_weights() {
                    check(task.name(), &|| graph.to_string());
                }
            }
        }
    }

    if duplicates.is_empty() {
        return Ok(());
    }

    let mut info = String::new();
    for (origin, names) in duplicates {
        info.push_str(&origin);
        info.push_str(":\n");
        for name in names {
            info.push_str(&format!("  - {name}\n"));
        }
    }

    Err(GraphError::DuplicateTasks(info))
}

fn validate_transcoded_channels(tasks: &[Task]) -> Result<(), GraphError> {
    let channels: HashSet<&str> = tasks
        .iter()
        .flat_map(|task| task.inputs().into_iter().chain(task.outputs()))
        .collect();

    let invalid: BTreeSet<String> = channels
        .iter()
        .filter(|channel| transcode::is_transcoded(channel))
        .map(|channel| strip(channel))
        .filter(|base| channels.contains(base))
        .map(String::from)
        .collect();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(GraphError::Transcoding(invalid.into_iter().collect()))
    }
}

fn find_duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(strip(name)).or_default() += 1;
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn validate_unique_outputs(tasks: &[Task]) -> Result<(), GraphError> {
    let duplicates = find_duplicates(tasks.iter().flat_map(|task| task.outputs()));
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(GraphError::OutputNotUnique(duplicates))
    }
}

fn validate_unique_confirms(tasks: &[Task]) -> Result<(), GraphError> {
    let duplicates = find_duplicates(
        tasks
            .iter()
            .flat_map(|task| task.confirms().iter().map(String::as_str)),
    );
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(GraphError::ConfirmNotUnique(duplicates))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{Args, Value};
    use crate::task::task;

    pub(crate) fn identity(args: Args) -> anyhow::Result<Value> {
        Ok(args.positional.into_iter().next().unwrap_or_default())
    }

    pub(crate) fn biconcat(args: Args) -> anyhow::Result<Value> {
        Ok(Value::new(format!("{}{}", args.arg::<String>(0)?, args.arg::<String>(1)?)))
    }

    pub(crate) fn node(name: &str, inputs: &[&str], outputs: &[&str]) -> Task {
        task(identity, inputs.to_vec(), outputs.to_vec())
            .name(name)
            .build()
            .unwrap()
    }

    /// A -> t1 -> B -> t2 -> C, with t3 reading A and C.
    pub(crate) fn chain() -> Graph {
        Graph::new([
            node("t1", &["A"], &["B"]),
            node("t2", &["B"], &["C"]),
            node("t3", &["A", "C"], &["D"]),
        ])
        .unwrap()
    }

    fn names(tasks: Vec<&Task>) -> BTreeSet<String> {
        tasks.into_iter().map(Task::name).collect()
    }

    #[test]
    fn test_inputs_outputs() {
        let graph = chain();
        assert_eq!(graph.inputs(), BTreeSet::from(["A".to_string()]));
        assert_eq!(graph.outputs(), BTreeSet::from(["D".to_string()]));
        assert_eq!(graph.data_sets().len(), 4);
    }

    #[test]
    fn test_grouped_tasks_cover_tasks() {
        let graph = chain();
        let grouped: Vec<Vec<String>> = graph
            .grouped_tasks()
            .into_iter()
            .map(|layer| layer.into_iter().map(Task::name).collect())
            .collect();

        assert_eq!(grouped, vec![vec!["t1"], vec!["t2"], vec!["t3"]]);

        let flat: BTreeSet<String> = grouped.into_iter().flatten().collect();
        assert_eq!(flat, names(graph.tasks()));
    }

    #[test]
    fn test_independent_tasks_share_layer() {
        let graph = Graph::new([
            node("b", &["X"], &["Y"]),
            node("a", &["X"], &["Z"]),
            node("c", &["Y", "Z"], &["W"]),
        ])
        .unwrap();

        let layers = graph.grouped_tasks();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].iter().map(|t| t.name()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_inputs_and_outputs_disjoint() {
        let graph = Graph::new([
            node("a", &["X@csv"], &["Y"]),
            node("b", &["Y"], &["X2@json"]),
        ])
        .unwrap();

        let stripped = |set: BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|c| strip(c).to_string()).collect()
        };
        assert!(stripped(graph.inputs()).is_disjoint(&stripped(graph.outputs())));
    }

    #[test]
    fn test_circular_dependency() {
        let err = Graph::new([node("a", &["Y"], &["X"]), node("b", &["X"], &["Y"])]).unwrap_err();
        match err {
            GraphError::CircularDependency(tasks) => assert_eq!(tasks.len(), 2),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_transcoded_self_dependency_is_circular() {
        let err = Graph::new([node("a", &["M@csv"], &["M@json"])]).unwrap_err();
        assert!(matches!(err, GraphError::CircularDependency(_)));
    }

    #[test]
    fn test_output_not_unique() {
        let err = Graph::new([node("a", &["X"], &["Z"]), node("b", &["Y"], &["Z"])]).unwrap_err();
        match err {
            GraphError::OutputNotUnique(names) => assert_eq!(names, vec!["Z".to_string()]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_output_not_unique_transcoded() {
        let err = Graph::new([node("a", &["X"], &["Z@csv"]), node("b", &["Y"], &["Z@json"])]).unwrap_err();
        assert!(matches!(err, GraphError::OutputNotUnique(_)));
    }

    #[test]
    fn test_confirm_not_unique() {
        let a = task(identity, "X", "Y").name("a").confirms(["C"]).build().unwrap();
        let b = task(identity, "Y", "Z").name("b").confirms(["C"]).build().unwrap();
        let err = Graph::new([a, b]).unwrap_err();
        assert!(matches!(err, GraphError::ConfirmNotUnique(names) if names == vec!["C".to_string()]));
    }

    #[test]
    fn test_duplicate_names_grouped_by_origin() {
        let inner = Graph::new([node("a", &["X"], &["Y"])]).unwrap();
        let err = Graph::new([
            Member::from(node("a", &["Q"], &["R"])),
            Member::from(node("a", &["S"], &["T"])),
            Member::from(inner),
        ])
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Free tasks:\n  - a"));
        assert!(message.contains("Graph([a]):\n  - a"));
    }

    #[test]
    fn test_transcoding_conflict() {
        let err = Graph::new([node("a", &["M"], &["N"]), node("b", &["N"], &["M@csv"])]).unwrap_err();
        match err {
            GraphError::Transcoding(names) => assert_eq!(names, vec!["M".to_string()]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_transcoded_dependency() {
        let graph = Graph::new([
            node("consume", &["M@json"], &["N"]),
            node("produce", &["L"], &["M@csv"]),
        ])
        .unwrap();

        let order: Vec<String> = graph.tasks().into_iter().map(Task::name).collect();
        assert_eq!(order, vec!["produce", "consume"]);
        assert_eq!(graph.inputs(), BTreeSet::from(["L".to_string()]));
        assert_eq!(graph.outputs(), BTreeSet::from(["N".to_string()]));
    }

    #[test]
    fn test_nested_graph_tags() {
        let inner = Graph::new([node("a", &["X"], &["Y"])]).unwrap();
        let graph = Graph::tagged([Member::from(inner), Member::from(node("b", &["Y"], &["Z"]))], ["outer"]).unwrap();

        assert!(graph.tasks().iter().all(|t| t.tags().contains("outer")));
    }

    #[test]
    fn test_task_dependencies() {
        let deps = chain().task_dependencies();
        assert!(deps["t1"].is_empty());
        assert_eq!(deps["t3"], BTreeSet::from(["t2".to_string()]));
    }

    #[test]
    fn test_union_difference_round_trip() {
        let first = Graph::new([node("a", &["X"], &["Y"])]).unwrap();
        let second = Graph::new([node("b", &["Y"], &["Z"])]).unwrap();

        let sum = (&first + &second).unwrap();
        assert_eq!(sum.len(), 2);

        let back = (&sum - &second).unwrap();
        assert_eq!(back, first);
    }

    #[test]
    fn test_union_allows_identical_tasks() {
        let a = node("a", &["X"], &["Y"]);
        let first = Graph::new([a.clone()]).unwrap();
        let second = Graph::new([a, node("b", &["Y"], &["Z"])]).unwrap();

        let sum = (&first | &second).unwrap();
        assert_eq!(sum.len(), 2);
    }

    #[test]
    fn test_union_rejects_conflicting_tasks() {
        let first = Graph::new([node("a", &["X"], &["Y"])]).unwrap();
        let second = Graph::new([node("a", &["X"], &["W"])]).unwrap();

        let err = (&first + &second).unwrap_err();
        assert!(matches!(err, GraphError::ConflictingTasks(names) if names == vec!["a".to_string()]));
    }

    #[test]
    fn test_intersection() {
        let graph = chain();
        let other = Graph::new([node("t2", &["B"], &["C"]), node("x", &["Q"], &["R"])]).unwrap();
        let common = (&graph & &other).unwrap();
        assert_eq!(names(common.tasks()), BTreeSet::from(["t2".to_string()]));
    }

    #[test]
    fn test_tag_graph() {
        let graph = chain().tag(["etl"]).unwrap();
        assert!(graph.tasks().iter().all(|t| t.tags().contains("etl")));
    }

    #[test]
    fn test_describe() {
        let text = chain().describe(true);
        assert!(text.contains("Inputs: A"));
        assert!(text.contains("t1\nt2\nt3"));
        assert!(text.contains("Outputs: D"));
    }

    #[test]
    fn test_to_json() {
        let json: serde_json::Value = serde_json::from_str(&chain().to_json().unwrap()).unwrap();
        let pipeline = json["pipeline"].as_array().unwrap();
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline[0]["name"], "t1");
        assert_eq!(pipeline[2]["inputs"], serde_json::json!(["A", "C"]));
    }

    #[test]
    fn test_render_mermaid() {
        let text = chain().render_mermaid();
        assert!(text.starts_with("graph LR"));
        assert!(text.contains("t0 -- \"B\" --> t1"));
        assert!(text.contains("([\"A\"])"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = Graph::new(Vec::<Task>::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.inputs().is_empty());
        assert!(graph.grouped_tasks().is_empty());
    }

    #[test]
    fn test_biconcat_helper() {
        let t = task(biconcat, ["x", "y"], "z").build().unwrap();
        let out = t
            .run(BTreeMap::from([
                ("x".to_string(), Value::new("a".to_string())),
                ("y".to_string(), Value::new("b".to_string())),
            ]))
            .unwrap();
        assert_eq!(out["z"].downcast_ref::<String>().unwrap(), "ab");
    }
}
