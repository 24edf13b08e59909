use std::collections::BTreeMap;

use crate::error::NagareError;
use crate::graph::Graph;

/// Name of the graph run when none is asked for explicitly.
pub const DEFAULT_GRAPH: &str = "__default__";

/// Named graphs of an application, assembled once at startup and handed to
/// whatever needs to look them up.
#[derive(Clone, Debug, Default)]
pub struct GraphRegistry {
    graphs: BTreeMap<String, Graph>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `graph` under `name`, returning the graph it replaces.
    pub fn register(&mut self, name: impl Into<String>, graph: Graph) -> Option<Graph> {
        self.graphs.insert(name.into(), graph)
    }

    pub fn get(&self, name: &str) -> Result<&Graph, NagareError> {
        self.graphs
            .get(name)
            .ok_or_else(|| NagareError::PipelineNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }

    /// The graph registered as [`DEFAULT_GRAPH`], or the union of every
    /// registered graph when there is none.
    pub fn default_graph(&self) -> Result<Graph, NagareError> {
        if let Some(graph) = self.graphs.get(DEFAULT_GRAPH) {
            return Ok(graph.clone());
        }

        let mut all = Graph::empty();
        for graph in self.graphs.values() {
            all = all.union(graph)?;
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::node;

    fn registry() -> GraphRegistry {
        let mut registry = GraphRegistry::new();
        registry.register("ingest", Graph::new([node("a", &["X"], &["Y"])]).unwrap());
        registry.register("report", Graph::new([node("b", &["Y"], &["Z"])]).unwrap());
        registry
    }

    #[test]
    fn test_get() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["ingest", "report"]);
        assert_eq!(registry.get("ingest").unwrap().len(), 1);
        assert!(matches!(registry.get("nope"), Err(NagareError::PipelineNotFound(name)) if name == "nope"));
    }

    #[test]
    fn test_default_is_union() {
        let graph = registry().default_graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.inputs().into_iter().collect::<Vec<_>>(), vec!["X"]);
    }

    #[test]
    fn test_explicit_default() {
        let mut registry = registry();
        registry.register(DEFAULT_GRAPH, Graph::new([node("c", &["Q"], &["R"])]).unwrap());

        let graph = registry.default_graph().unwrap();
        assert!(graph.get("c").is_some());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_union_conflict_surfaces() {
        let mut registry = registry();
        registry.register("clash", Graph::new([node("a", &["X"], &["W"])]).unwrap());
        assert!(matches!(registry.default_graph(), Err(NagareError::Graph(_))));
    }

    #[test]
    fn test_empty_registry() {
        assert!(GraphRegistry::new().default_graph().unwrap().is_empty());
    }
}
