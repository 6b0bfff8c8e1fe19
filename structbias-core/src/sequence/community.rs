//! Community graph for the community-structure variant.
//!
//! Items are split into contiguous communities. The first and last member
//! of each community are boundary nodes. Inside a community every pair is
//! connected except the two boundary nodes; the last node of community `c`
//! bridges to the first node of community `c + 1` (mod K). Every node ends
//! up with degree `m - 1`.

use super::{Design, ItemPair, Partitions};
use crate::error::SequenceError;
use rand::Rng;

/// Adjacency of the community graph.
#[derive(Debug, Clone)]
pub struct CommunityGraph {
    item_count: usize,
    community_size: usize,
    neighbors: Vec<Vec<usize>>,
}

impl CommunityGraph {
    pub fn new(item_count: usize, communities: usize) -> Result<Self, SequenceError> {
        let fail = |reason: String| SequenceError::StructuralConstraint {
            variant: "community",
            items: item_count,
            reason,
        };

        if communities < 2 {
            return Err(fail(format!("need at least 2 communities, got {communities}")));
        }
        if item_count % communities != 0 {
            return Err(fail(format!(
                "item count is not divisible by {communities} communities"
            )));
        }
        let community_size = item_count / communities;
        if community_size < 3 {
            return Err(fail(format!(
                "communities of {community_size} items leave no internal nodes"
            )));
        }

        let mut graph = Self {
            item_count,
            community_size,
            neighbors: vec![Vec::new(); item_count],
        };

        for community in 0..communities {
            let first = community * community_size;
            let last = first + community_size - 1;
            for a in first..=last {
                for b in (a + 1)..=last {
                    if !(a == first && b == last) {
                        graph.connect(a, b);
                    }
                }
            }
            let next_first = ((community + 1) % communities) * community_size;
            graph.connect(last, next_first);
        }

        for list in &mut graph.neighbors {
            list.sort_unstable();
            list.dedup();
        }
        Ok(graph)
    }

    fn connect(&mut self, a: usize, b: usize) {
        self.neighbors[a].push(b);
        self.neighbors[b].push(a);
    }

    #[must_use]
    pub const fn community_of(&self, item: usize) -> usize {
        item / self.community_size
    }

    #[must_use]
    pub const fn is_boundary(&self, item: usize) -> bool {
        let offset = item % self.community_size;
        offset == 0 || offset == self.community_size - 1
    }

    #[must_use]
    pub fn neighbors(&self, item: usize) -> &[usize] {
        &self.neighbors[item]
    }

    #[must_use]
    pub fn is_edge(&self, a: usize, b: usize) -> bool {
        self.neighbors[a].binary_search(&b).is_ok()
    }

    /// Walk the graph, emitting each traversed edge as (from, to).
    pub fn random_walk(&self, length: usize, rng: &mut impl Rng) -> Vec<ItemPair> {
        let mut current = rng.gen_range(0..self.item_count);
        let mut walk = Vec::with_capacity(length);
        for _ in 0..length {
            let options = &self.neighbors[current];
            let next = options[rng.gen_range(0..options.len())];
            walk.push((current, next));
            current = next;
        }
        walk
    }

    /// Directed edges as designed pairs, plus the four pair categories over
    /// all N x N ordered cells (diagonal included).
    pub(super) fn design(&self) -> Design {
        let core_labels: Vec<ItemPair> = (0..self.item_count)
            .flat_map(|a| self.neighbors[a].iter().map(move |&b| (a, b)))
            .collect();

        let mut graph: [Vec<ItemPair>; 4] = Default::default();
        for row in 0..self.item_count {
            for col in 0..self.item_count {
                let category = if self.community_of(row) == self.community_of(col) {
                    if self.is_boundary(row) && self.is_boundary(col) { 1 } else { 0 }
                } else if self.is_edge(row, col) {
                    2
                } else {
                    3
                };
                graph[category].push((row, col));
            }
        }

        Design {
            core_labels,
            partitions: Partitions::Community { graph },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn every_node_has_the_same_degree() {
        let graph = CommunityGraph::new(15, 3).expect("15 items in 3 communities");
        for item in 0..15 {
            assert_eq!(graph.neighbors(item).len(), 4, "item {item}");
        }
    }

    #[test]
    fn boundary_nodes_bridge_neighbouring_communities() {
        let graph = CommunityGraph::new(8, 2).expect("8 items in 2 communities");
        assert!(graph.is_edge(3, 4));
        assert!(graph.is_edge(7, 0));
        assert!(!graph.is_edge(0, 3));
        assert!(!graph.is_edge(1, 5));
        assert!(graph.is_boundary(0) && graph.is_boundary(3));
        assert!(!graph.is_boundary(1));
    }

    #[test]
    fn walk_only_follows_edges() {
        let graph = CommunityGraph::new(12, 3).expect("12 items in 3 communities");
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let walk = graph.random_walk(200, &mut rng);
        for window in walk.windows(2) {
            assert_eq!(window[0].1, window[1].0);
        }
        for &(a, b) in &walk {
            assert!(graph.is_edge(a, b));
        }
    }

    #[test]
    fn eight_items_in_two_communities_partition_sizes() {
        let graph = CommunityGraph::new(8, 2).expect("8 items in 2 communities");
        let Partitions::Community { graph: parts } = graph.design().partitions else {
            panic!("community design must produce community partitions");
        };
        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        // within blocks: 2 * 16 cells, 4 boundary-boundary cells each
        assert_eq!(sizes, vec![24, 8, 4, 28]);
        assert_eq!(sizes.iter().sum::<usize>(), 64);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(CommunityGraph::new(9, 2).is_err());
        assert!(CommunityGraph::new(8, 1).is_err());
        assert!(CommunityGraph::new(8, 4).is_err());
    }
}
