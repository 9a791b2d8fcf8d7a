use std::collections::HashSet;

use petgraph::stable_graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::visit::IntoEdgeReferences;
use petgraph::visit::NodeIndexable;
use serde::Deserialize;
use serde::Serialize;

use crate::error::RequestTrackerError;
use crate::request_tracker::RequestOutput;

use super::RequestEdgeType;
use super::RequestGraph;
use super::RequestGraphNode;

/// Everything about a request graph except its nodes, which are stored in chunks
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequestGraph {
  /// Number of node slots in each chunk, including vacant ones
  pub node_counts_per_blob: Vec<usize>,
  pub nodes_per_blob: usize,
  pub edges: Vec<(usize, usize, RequestEdgeType)>,
  /// Requests that were running when the graph was written are stored as invalid
  pub invalid_nodes: Vec<usize>,
  pub unpredictable_nodes: Vec<usize>,
  pub invalidate_on_build_nodes: Vec<usize>,
}

/// One chunk of node slots. Vacant slots left by removed nodes are `None` so that node
/// indices survive the round trip.
pub type SerializedNodeChunk<T> = Vec<Option<RequestGraphNode<T>>>;

fn sorted_indices<'a>(nodes: impl Iterator<Item = &'a NodeIndex>) -> Vec<usize> {
  let mut indices = nodes.map(|node_id| node_id.index()).collect::<Vec<_>>();
  indices.sort_unstable();
  indices.dedup();
  indices
}

impl<T: RequestOutput> RequestGraph<T> {
  /// Number of chunks the current node index space spans
  pub fn chunk_count(&self) -> usize {
    self.graph.node_bound().div_ceil(self.nodes_per_blob)
  }

  pub fn serialize_metadata(&self) -> SerializedRequestGraph {
    let node_bound = self.graph.node_bound();
    let node_counts_per_blob = (0..node_bound)
      .step_by(self.nodes_per_blob)
      .map(|start| self.nodes_per_blob.min(node_bound - start))
      .collect();

    let edges = self
      .graph
      .edge_references()
      .map(|edge| (edge.source().index(), edge.target().index(), *edge.weight()))
      .collect();

    SerializedRequestGraph {
      node_counts_per_blob,
      nodes_per_blob: self.nodes_per_blob,
      edges,
      invalid_nodes: sorted_indices(self.invalid_nodes.iter().chain(self.incomplete_nodes.iter())),
      unpredictable_nodes: sorted_indices(self.unpredictable_nodes.iter()),
      invalidate_on_build_nodes: sorted_indices(self.invalidate_on_build_nodes.iter()),
    }
  }

  /// Node slots of chunk `index`
  pub fn node_chunk(&self, index: usize) -> SerializedNodeChunk<T> {
    let start = index * self.nodes_per_blob;
    let end = (start + self.nodes_per_blob).min(self.graph.node_bound());

    (start..end)
      .map(|slot| self.graph.node_weight(NodeIndex::new(slot)).cloned())
      .collect()
  }

  /// Rebuild a graph from its metadata and the concatenated slots of all its chunks.
  ///
  /// Chunks are only considered clean when they were written with the same `nodes_per_blob`.
  pub fn from_serialized(
    metadata: SerializedRequestGraph,
    nodes: Vec<Option<RequestGraphNode<T>>>,
    nodes_per_blob: usize,
  ) -> Result<Self, RequestTrackerError> {
    let mut request_graph = RequestGraph::new(nodes_per_blob);
    let mut graph = StableDiGraph::with_capacity(nodes.len(), metadata.edges.len());
    let mut vacant = HashSet::new();

    for node in nodes {
      match node {
        Some(node) => {
          graph.add_node(node);
        }
        // Fill the slot and free it again once every index is allocated
        None => {
          vacant.insert(graph.add_node(RequestGraphNode::FileName {
            name: String::new(),
          }));
        }
      }
    }

    for (from, to, edge_type) in metadata.edges {
      let (from_id, to_id) = (NodeIndex::new(from), NodeIndex::new(to));
      if from_id.index() >= graph.node_bound()
        || to_id.index() >= graph.node_bound()
        || vacant.contains(&from_id)
        || vacant.contains(&to_id)
      {
        return Err(RequestTrackerError::InvalidEdge { from, to });
      }

      graph.add_edge(from_id, to_id, edge_type);
    }

    for node_id in vacant {
      graph.remove_node(node_id);
    }

    request_graph.graph = graph;

    let node_ids = request_graph.graph.node_indices().collect::<Vec<_>>();
    for node_id in node_ids {
      let content_key = request_graph.graph[node_id].content_key();
      request_graph.index_node(node_id, content_key);
    }

    let existing = |index: &usize| request_graph.graph.contains_node(NodeIndex::new(*index));
    let to_set = |indices: Vec<usize>| -> HashSet<NodeIndex> {
      indices
        .into_iter()
        .filter(existing)
        .map(NodeIndex::new)
        .collect()
    };

    request_graph.invalid_nodes = to_set(metadata.invalid_nodes);
    request_graph.unpredictable_nodes = to_set(metadata.unpredictable_nodes);
    request_graph.invalidate_on_build_nodes = to_set(metadata.invalidate_on_build_nodes);

    if metadata.nodes_per_blob == request_graph.nodes_per_blob {
      request_graph.cached_request_chunks = (0..metadata.node_counts_per_blob.len()).collect();
    }

    Ok(request_graph)
  }
}
