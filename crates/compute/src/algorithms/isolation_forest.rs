//! Isolation forest: an ensemble of random axis-aligned partitioning trees.
//!
//! Each tree is grown on a random subsample and stored as an arena of nodes
//! addressed by integer id. A point's anomaly score is derived from its
//! average isolation depth: the fewer cuts needed to isolate it, the higher
//! the score.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Euler–Mascheroni constant, used in the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Parameters for fitting an [`IsolationForest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

/// Index of a node inside its tree's arena.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: NodeId,
        right: NodeId,
    },
    Leaf {
        /// Training rows that reached this leaf.
        size: usize,
    },
}

/// One isolation tree. The root is always node 0.
#[derive(Debug, Clone)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over `rows` (indices into `data`) up to `max_depth`.
    fn grow(data: &[Vec<f64>], mut rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, &mut rows, 0, max_depth, rng);
        tree
    }

    fn grow_node(
        &mut self,
        data: &[Vec<f64>],
        rows: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= max_depth || rows.len() <= 1 {
            return id;
        }

        // Only features with spread can separate anything.
        let dim = data[rows[0]].len();
        let candidates: Vec<(usize, f64, f64)> = (0..dim)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(data[r][f]), hi.max(data[r][f]))
                });
                (hi - lo > f64::EPSILON).then_some((f, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);

        // Partition in place: values below the threshold go left.
        let mut split = 0;
        for i in 0..rows.len() {
            if data[rows[i]][feature] < threshold {
                rows.swap(i, split);
                split += 1;
            }
        }

        let (left_rows, right_rows) = rows.split_at_mut(split);
        let left = self.grow_node(data, left_rows, depth + 1, max_depth, rng);
        let right = self.grow_node(data, right_rows, depth + 1, max_depth, rng);

        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Depth at which `point` lands in a leaf, plus the expected remaining
    /// depth for the rows that leaf still holds.
    pub fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// Average path length of an unsuccessful binary search tree lookup over `n` items.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A fitted isolation forest.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit on standardized row vectors.
    ///
    /// Each tree draws `min(max_samples, rows)` rows without replacement from
    /// its own RNG stream (`seed + tree index`), so results are reproducible
    /// and independent of how rayon schedules the trees.
    ///
    /// # Panics
    /// Panics if `data` has fewer than 2 rows or `params.n_trees` is 0.
    pub fn fit(data: &[Vec<f64>], params: &ForestParams) -> Self {
        assert!(data.len() >= 2, "isolation forest: need at least 2 rows");
        assert!(params.n_trees >= 1, "isolation forest: need at least 1 tree");

        let sample_size = params.max_samples.clamp(2, data.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let rows = sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::grow(data, rows, max_depth, &mut rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Anomaly score per row in (0, 1]; higher means easier to isolate.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        let norm = average_path_length(self.sample_size);
        data.par_iter()
            .map(|point| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
                    / self.trees.len() as f64;
                2f64.powf(-mean_depth / norm)
            })
            .collect()
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}

/// Flag the `count` highest scores. Ties go to the earlier row.
pub fn flag_top(scores: &[f64], count: usize) -> Vec<u8> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut flags = vec![0u8; scores.len()];
    for &i in order.iter().take(count) {
        flags[i] = 1;
    }
    flags
}
