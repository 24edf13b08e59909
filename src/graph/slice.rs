//! Slicing a graph into smaller graphs.
//!
//! Every slice validates its selectors against the graph first and fails
//! naming the unknown ones. A slice that resolves to no tasks is an error,
//! with the single exception of tag slicing with no tags at all.
use std::collections::BTreeSet;

use petgraph::Direction;
use petgraph::graph::NodeIndex;

use super::Graph;
use super::transcode::{is_transcoded, strip};
use crate::error::SliceError;

fn collect<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> BTreeSet<String> {
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}

impl Graph {
    /// Tasks with exactly the given names.
    pub fn only_nodes<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let names = collect(names);
        let indices = self.resolve_tasks(&names)?;
        self.slice("only_nodes", &names, indices)
    }

    /// Tasks whose namespace is `namespace` or nested inside it.
    pub fn only_nodes_with_namespace(&self, namespace: &str) -> Result<Graph, SliceError> {
        let nested = format!("{namespace}.");
        let indices: BTreeSet<NodeIndex> = self
            .dag
            .node_indices()
            .filter(|&i| {
                self.dag[i]
                    .namespace()
                    .is_some_and(|ns| ns == namespace || ns.starts_with(&nested))
            })
            .collect();

        if indices.is_empty() {
            return Err(SliceError::UnknownNamespace(namespace.to_string()));
        }

        Ok(self.subgraph(indices)?)
    }

    /// Tasks directly consuming any of the given channels.
    ///
    /// A bare name matches every transcoded variant of that channel, a
    /// transcoded name only matches itself.
    pub fn only_nodes_with_inputs<S: AsRef<str>>(
        &self,
        channels: impl IntoIterator<Item = S>,
    ) -> Result<Graph, SliceError> {
        let channels = collect(channels);
        self.validate_channels(&channels)?;
        let indices = self.consumers(&channels);
        self.slice("only_nodes_with_inputs", &channels, indices)
    }

    /// Tasks directly producing any of the given channels.
    pub fn only_nodes_with_outputs<S: AsRef<str>>(
        &self,
        channels: impl IntoIterator<Item = S>,
    ) -> Result<Graph, SliceError> {
        let channels = collect(channels);
        self.validate_channels(&channels)?;
        let indices = self.producers(&channels);
        self.slice("only_nodes_with_outputs", &channels, indices)
    }

    /// Tasks depending, directly or transitively, on the given channels.
    pub fn from_inputs<S: AsRef<str>>(&self, channels: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let channels = collect(channels);
        self.validate_channels(&channels)?;
        let indices = self.expand(self.consumers(&channels), Direction::Outgoing);
        self.slice("from_inputs", &channels, indices)
    }

    /// Tasks needed, directly or transitively, to produce the given channels.
    pub fn to_outputs<S: AsRef<str>>(&self, channels: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let channels = collect(channels);
        self.validate_channels(&channels)?;
        let indices = self.expand(self.producers(&channels), Direction::Incoming);
        self.slice("to_outputs", &channels, indices)
    }

    /// The named tasks and everything that depends on them.
    pub fn from_nodes<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let names = collect(names);
        let indices = self.resolve_tasks(&names)?;
        let indices = self.expand(indices, Direction::Outgoing);
        self.slice("from_nodes", &names, indices)
    }

    /// The named tasks and everything they depend on.
    pub fn to_nodes<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let names = collect(names);
        let indices = self.resolve_tasks(&names)?;
        let indices = self.expand(indices, Direction::Incoming);
        self.slice("to_nodes", &names, indices)
    }

    /// Tasks tagged with any of `tags`. No tags at all yields an empty
    /// graph.
    pub fn only_nodes_with_tags<S: AsRef<str>>(&self, tags: impl IntoIterator<Item = S>) -> Result<Graph, SliceError> {
        let tags = collect(tags);
        if tags.is_empty() {
            return Ok(Graph::empty());
        }

        let indices = self
            .dag
            .node_indices()
            .filter(|&i| !self.dag[i].tags().is_disjoint(&tags))
            .collect();

        self.slice("only_nodes_with_tags", &tags, indices)
    }

    fn slice(
        &self,
        operation: &'static str,
        selectors: &BTreeSet<String>,
        indices: BTreeSet<NodeIndex>,
    ) -> Result<Graph, SliceError> {
        if indices.is_empty() {
            return Err(SliceError::Empty {
                operation,
                selectors: selectors.iter().cloned().collect(),
            });
        }

        Ok(self.subgraph(indices)?)
    }

    fn resolve_tasks(&self, names: &BTreeSet<String>) -> Result<BTreeSet<NodeIndex>, SliceError> {
        let unknown: Vec<String> = names.iter().filter(|n| !self.contains(n)).cloned().collect();
        if !unknown.is_empty() {
            return Err(SliceError::UnknownTasks(unknown));
        }

        Ok(names.iter().filter_map(|n| self.index_of(n)).collect())
    }

    /// Accepts full channel names as well as the base names of transcoded
    /// channels.
    fn validate_channels(&self, channels: &BTreeSet<String>) -> Result<(), SliceError> {
        let known = self.data_sets();
        let bases: BTreeSet<&str> = known.iter().map(|c| strip(c)).collect();

        let unknown: Vec<String> = channels
            .iter()
            .filter(|c| !known.contains(*c) && !bases.contains(c.as_str()))
            .cloned()
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SliceError::UnknownChannels(unknown))
        }
    }

    fn consumers(&self, channels: &BTreeSet<String>) -> BTreeSet<NodeIndex> {
        channels
            .iter()
            .flat_map(|channel| {
                self.by_input
                    .get(strip(channel))
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(move |&i| !is_transcoded(channel) || self.dag[i].inputs().contains(&channel.as_str()))
            })
            .collect()
    }

    fn producers(&self, channels: &BTreeSet<String>) -> BTreeSet<NodeIndex> {
        channels
            .iter()
            .filter_map(|channel| {
                self.by_output
                    .get(strip(channel))
                    .copied()
                    .filter(|&i| !is_transcoded(channel) || self.dag[i].outputs().contains(&channel.as_str()))
            })
            .collect()
    }

    /// Repeatedly adds the neighbours of the frontier in `direction` until
    /// no new task is found.
    fn expand(&self, seeds: BTreeSet<NodeIndex>, direction: Direction) -> BTreeSet<NodeIndex> {
        let mut result = seeds.clone();
        let mut frontier = seeds;

        while !frontier.is_empty() {
            frontier = frontier
                .iter()
                .flat_map(|&i| self.dag.neighbors_directed(i, direction))
                .filter(|i| !result.contains(i))
                .collect();
            result.extend(frontier.iter().copied());
        }

        result
    }
}
