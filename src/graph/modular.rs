//! Reusable graphs instantiated under a namespace with renamed channels.
//!
//! ```rust
//! use nagare::{Args, Graph, Value, task};
//! use nagare::graph::modular::{Remap, pipeline};
//!
//! let clean = task(|args: Args| Ok(args.positional[0].clone()), "raw", "clean")
//!     .name("clean")
//!     .build()
//!     .unwrap();
//! let template = Graph::new([clean]).unwrap();
//!
//! let cars = pipeline(&template, Remap::new().namespace("cars").input("raw", "cars_raw")).unwrap();
//! assert!(cars.get("cars.clean").is_some());
//! assert!(cars.inputs().contains("cars_raw"));
//! assert!(cars.outputs().contains("cars.clean"));
//! ```
use std::collections::{BTreeMap, BTreeSet};

use super::Graph;
use super::transcode::{TRANSCODING_SEPARATOR, split, strip};
use crate::error::ModularError;

/// How a graph's channels and task names are rewritten by [`pipeline`].
#[derive(Clone, Debug, Default)]
pub struct Remap {
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
    pub namespace: Option<String>,
}

impl Remap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a free input of the graph to another channel.
    pub fn input(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.inputs.insert(from.into(), to.into());
        self
    }

    pub fn output(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.outputs.insert(from.into(), to.into());
        self
    }

    pub fn parameter(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.parameters.insert(from.into(), to.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Parameters are shared configuration and are never namespaced.
pub fn is_parameter(name: &str) -> bool {
    name.starts_with("params:") || name == "parameters"
}

/// Copies `graph` with every channel renamed and every task moved under the
/// namespace of `remap`.
///
/// Each channel goes through the first matching rule:
///
/// 1. an explicit mapping from `inputs`, `outputs` or `parameters`,
/// 2. parameters stay as they are,
/// 3. a transcoded channel whose base is mapped keeps its suffix,
/// 4. otherwise the namespace is prepended.
pub fn pipeline(graph: &Graph, remap: Remap) -> Result<Graph, ModularError> {
    validate_exist(graph, &remap)?;
    validate_inputs_outputs(graph, &remap)?;

    let Remap {
        inputs,
        outputs,
        parameters,
        namespace,
    } = remap;

    let mapping: BTreeMap<String, String> = inputs.into_iter().chain(outputs).chain(parameters).collect();

    let rename = |name: &str| -> String {
        if let Some(mapped) = mapping.get(name) {
            return mapped.clone();
        }
        if is_parameter(name) {
            return name.to_string();
        }
        if let Ok((base, suffix)) = split(name)
            && !suffix.is_empty()
            && let Some(mapped) = mapping.get(base)
        {
            return format!("{mapped}{TRANSCODING_SEPARATOR}{suffix}");
        }
        match &namespace {
            Some(namespace) => format!("{namespace}.{name}"),
            None => name.to_string(),
        }
    };

    let tasks = graph
        .tasks()
        .into_iter()
        .map(|task| {
            let nested = match (&namespace, task.namespace()) {
                (Some(outer), Some(inner)) => Some(format!("{outer}.{inner}")),
                (Some(outer), None) => Some(outer.clone()),
                (None, inner) => inner.map(String::from),
            };
            task.remapped(&rename, nested)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Graph::new(tasks)?)
}

fn stripped<'a>(names: impl IntoIterator<Item = &'a String>) -> BTreeSet<&'a str> {
    names.into_iter().map(|n| strip(n)).collect()
}

fn validate_exist(graph: &Graph, remap: &Remap) -> Result<(), ModularError> {
    let existing: BTreeSet<String> = graph.data_sets().iter().map(|c| strip(c).to_string()).collect();

    let requested = stripped(remap.inputs.keys())
        .into_iter()
        .chain(stripped(remap.outputs.keys()))
        .chain(remap.parameters.keys().map(String::as_str));

    let missing: BTreeSet<String> = requested
        .filter(|name| !existing.contains(*name))
        .map(String::from)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ModularError::Unmapped(missing.into_iter().collect()))
    }
}

fn validate_inputs_outputs(graph: &Graph, remap: &Remap) -> Result<(), ModularError> {
    let inputs = stripped(remap.inputs.keys());
    let outputs = stripped(remap.outputs.keys());

    let parameters: Vec<String> = inputs.iter().filter(|i| is_parameter(i)).map(|i| i.to_string()).collect();
    if !parameters.is_empty() {
        return Err(ModularError::ParameterAsInput(parameters));
    }

    let free = graph.inputs();
    let free = stripped(free.iter());

    let not_free: Vec<String> = inputs.difference(&free).map(|i| i.to_string()).collect();
    if !not_free.is_empty() {
        return Err(ModularError::NotFreeInput(not_free));
    }

    let clashing: Vec<String> = outputs.intersection(&free).map(|o| o.to_string()).collect();
    if !clashing.is_empty() {
        return Err(ModularError::OutputIsFreeInput(clashing));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{identity, node};
    use crate::task::{Task, task};

    fn template() -> Graph {
        Graph::new([
            node("a", &["X", "params:rate"], &["Y"]),
            node("b", &["Y"], &["Z"]),
        ])
        .unwrap()
    }

    fn names(graph: &Graph) -> Vec<String> {
        graph.tasks().into_iter().map(Task::name).collect()
    }

    #[test]
    fn test_namespace_prefixes_tasks_and_channels() {
        let graph = pipeline(&template(), Remap::new().namespace("ns")).unwrap();

        assert_eq!(names(&graph), vec!["ns.a", "ns.b"]);
        assert_eq!(graph.get("ns.a").unwrap().inputs(), vec!["ns.X", "params:rate"]);
        assert_eq!(graph.outputs(), BTreeSet::from(["ns.Z".to_string()]));
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let remap = Remap::new()
            .namespace("ns")
            .input("X", "raw")
            .output("Z", "final")
            .parameter("params:rate", "params:ns_rate");
        let graph = pipeline(&template(), remap).unwrap();

        assert_eq!(graph.get("ns.a").unwrap().inputs(), vec!["raw", "params:ns_rate"]);
        assert_eq!(graph.get("ns.b").unwrap().inputs(), vec!["ns.Y"]);
        assert_eq!(graph.get("ns.b").unwrap().outputs(), vec!["final"]);
    }

    #[test]
    fn test_no_namespace_keeps_names() {
        let graph = pipeline(&template(), Remap::new().input("X", "raw")).unwrap();
        assert_eq!(names(&graph), vec!["a", "b"]);
        assert!(graph.inputs().contains("raw"));
    }

    #[test]
    fn test_transcoded_base_mapping_keeps_suffix() {
        let graph = Graph::new([node("load", &["M@csv"], &["N"])]).unwrap();
        let graph = pipeline(&graph, Remap::new().namespace("ns").input("M", "cars")).unwrap();
        assert_eq!(graph.get("ns.load").unwrap().inputs(), vec!["cars@csv"]);
    }

    #[test]
    fn test_nested_namespace() {
        let inner = task(identity, "X", "Y").name("a").namespace("inner").build().unwrap();
        let graph = pipeline(&Graph::new([inner]).unwrap(), Remap::new().namespace("outer")).unwrap();
        assert_eq!(names(&graph), vec!["outer.inner.a"]);
    }

    #[test]
    fn test_confirms_are_renamed() {
        let t = task(identity, "X", "Y").name("a").confirms(["C"]).build().unwrap();
        let graph = pipeline(&Graph::new([t]).unwrap(), Remap::new().namespace("ns")).unwrap();
        assert_eq!(graph.get("ns.a").unwrap().confirms(), ["ns.C".to_string()]);
    }

    #[test]
    fn test_two_instances_combine() {
        let first = pipeline(&template(), Remap::new().namespace("one")).unwrap();
        let second = pipeline(&template(), Remap::new().namespace("two")).unwrap();
        assert_eq!((&first + &second).unwrap().len(), 4);
    }

    #[test]
    fn test_validation() {
        let graph = template();

        let err = pipeline(&graph, Remap::new().input("nope", "x")).unwrap_err();
        assert!(matches!(err, ModularError::Unmapped(names) if names == vec!["nope".to_string()]));

        let err = pipeline(&graph, Remap::new().input("Y", "x")).unwrap_err();
        assert!(matches!(err, ModularError::NotFreeInput(_)));

        let err = pipeline(&graph, Remap::new().output("X", "x")).unwrap_err();
        assert!(matches!(err, ModularError::OutputIsFreeInput(_)));

        let err = pipeline(&graph, Remap::new().input("params:rate", "x")).unwrap_err();
        assert!(matches!(err, ModularError::ParameterAsInput(_)));
    }
}
