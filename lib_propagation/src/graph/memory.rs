use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{GraphMutation, GraphNode, GraphStore};
use crate::error::{PropagationError, Result};

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    // (from, relation, to) in creation order.
    edges: Vec<(String, String, String)>,
}

impl GraphState {
    fn apply(&mut self, mutation: &GraphMutation) -> Result<()> {
        match mutation {
            GraphMutation::UpsertNode(node) => {
                self.nodes.insert(node.key.clone(), node.clone());
            }
            GraphMutation::UpsertEdge { from, relation, to } => {
                for endpoint in [from, to] {
                    if !self.nodes.contains_key(endpoint) {
                        return Err(PropagationError::GraphStore(format!(
                            "edge endpoint '{}' does not exist",
                            endpoint
                        )));
                    }
                }
                let edge = (from.clone(), relation.clone(), to.clone());
                if !self.edges.contains(&edge) {
                    self.edges.push(edge);
                }
            }
        }
        Ok(())
    }
}

/// Graph held in memory. A batch is applied to a copy and swapped in only
/// when every mutation succeeds.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn node(&self, key: &str) -> Option<GraphNode> {
        self.state.lock().await.nodes.get(key).cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn apply(&self, batch: &[GraphMutation]) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        for mutation in batch {
            staged.apply(mutation)?;
        }
        *state = staged;
        Ok(())
    }

    async fn edges_from(&self, key: &str, relation: &str) -> Result<Vec<GraphNode>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|(from, rel, _)| from == key && rel == relation)
            .filter_map(|(_, _, to)| state.nodes.get(to).cloned())
            .collect())
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.nodes.len())
    }

    async fn edge_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.edges.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
