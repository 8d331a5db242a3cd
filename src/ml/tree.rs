//! Histogram-based regression trees shared by the boosted and forest trainers.
//!
//! Features are binned once per training run. Rows only store the bins that
//! differ from the bin of `0.0`, which keeps mostly-zero text vectors cheap.

use serde::{Deserialize, Serialize};

/// Node of a binary regression tree. The root is `nodes[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature_index: u32,
        /// Rows with `feature <= threshold` (or a missing value) go left.
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        value: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict(&self, features: &[f32]) -> f32 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature_index,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = features
                        .get(*feature_index as usize)
                        .copied()
                        .unwrap_or(f32::NAN);
                    idx = if value.is_nan() || value <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                None => return 0.0,
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, TreeNode::Leaf { .. }))
            .count()
    }

    /// Check child links point inside the node list.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split { left, right, .. } = node {
                let (left, right) = (*left as usize, *right as usize);
                if left <= idx || right <= idx || left >= self.nodes.len() || right >= self.nodes.len() {
                    return Err(format!("Node {idx} has invalid children"));
                }
            }
        }
        Ok(())
    }
}

/// Feature matrix quantized into equal-width bins.
pub(crate) struct BinnedMatrix {
    n_features: usize,
    bins: usize,
    default_bin: Vec<u8>,
    /// Per row, `(feature, bin)` pairs sorted by feature, omitting default bins.
    entries: Vec<Vec<(u32, u8)>>,
    /// `thresholds[f][b]`: largest raw value of feature `f` that falls in bins `<= b`.
    thresholds: Vec<Vec<f32>>,
}

impl BinnedMatrix {
    pub(crate) fn build(x: &[Vec<f32>], n_features: usize, bins: usize) -> Self {
        let bins = bins.clamp(2, 256);
        let (mins, maxs) = compute_feature_min_max(x, n_features);
        let bin_of = |feature: usize, value: f32| -> u8 {
            if value.is_nan() || value == f32::NEG_INFINITY {
                return 0;
            }
            if value == f32::INFINITY {
                return (bins - 1) as u8;
            }
            let (min, max) = (mins[feature], maxs[feature]);
            let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
            ((t * bins as f32).floor() as usize).min(bins - 1) as u8
        };

        let default_bin: Vec<u8> = (0..n_features).map(|f| bin_of(f, 0.0)).collect();
        let mut bin_max = vec![f32::NAN; n_features * bins];
        let mut entries = Vec::with_capacity(x.len());
        for row in x {
            let mut sparse = Vec::new();
            for (f, &value) in row.iter().take(n_features).enumerate() {
                let b = bin_of(f, value);
                if value.is_finite() {
                    let slot = &mut bin_max[f * bins + b as usize];
                    if slot.is_nan() || value > *slot {
                        *slot = value;
                    }
                }
                if b != default_bin[f] {
                    sparse.push((f as u32, b));
                }
            }
            entries.push(sparse);
        }

        let thresholds = (0..n_features)
            .map(|f| {
                let mut running = f32::MIN;
                (0..bins)
                    .map(|b| {
                        let value = bin_max[f * bins + b];
                        if !value.is_nan() && value > running {
                            running = value;
                        }
                        running
                    })
                    .collect()
            })
            .collect();

        Self {
            n_features,
            bins,
            default_bin,
            entries,
            thresholds,
        }
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn n_features(&self) -> usize {
        self.n_features
    }

    fn bin(&self, row: usize, feature: u32) -> u8 {
        let entries = &self.entries[row];
        match entries.binary_search_by_key(&feature, |(f, _)| *f) {
            Ok(pos) => entries[pos].1,
            Err(_) => self.default_bin[feature as usize],
        }
    }
}

fn compute_feature_min_max(x: &[Vec<f32>], feature_len: usize) -> (Vec<f32>, Vec<f32>) {
    let mut mins = vec![f32::INFINITY; feature_len];
    let mut maxs = vec![f32::NEG_INFINITY; feature_len];
    for row in x {
        for (j, &v) in row.iter().take(feature_len).enumerate() {
            if v.is_finite() {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
    }
    for j in 0..feature_len {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
        if mins[j] == maxs[j] {
            maxs[j] = mins[j] + 1.0;
        }
    }
    (mins, maxs)
}

/// Growth limits for one tree.
#[derive(Debug, Clone)]
pub(crate) struct TreeParams {
    pub(crate) max_leaves: usize,
    pub(crate) min_leaf: usize,
    /// Features allowed for splitting; `None` allows all.
    pub(crate) feature_mask: Option<Vec<bool>>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    gain: f64,
    feature: u32,
    bin: u8,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<u32>,
    split: Option<SplitCandidate>,
}

/// Reusable per-node histogram buffers.
pub(crate) struct Histogram {
    bins: usize,
    counts: Vec<u32>,
    sums: Vec<f64>,
    touched: Vec<u32>,
    is_touched: Vec<bool>,
}

impl Histogram {
    pub(crate) fn new(matrix: &BinnedMatrix) -> Self {
        let cells = matrix.n_features * matrix.bins;
        Self {
            bins: matrix.bins,
            counts: vec![0; cells],
            sums: vec![0.0; cells],
            touched: Vec::new(),
            is_touched: vec![false; matrix.n_features],
        }
    }

    fn clear(&mut self) {
        for &f in &self.touched {
            let start = f as usize * self.bins;
            self.counts[start..start + self.bins].fill(0);
            self.sums[start..start + self.bins].fill(0.0);
            self.is_touched[f as usize] = false;
        }
        self.touched.clear();
    }

    fn accumulate(
        &mut self,
        matrix: &BinnedMatrix,
        targets: &[f32],
        rows: &[u32],
        mask: Option<&[bool]>,
    ) -> f64 {
        self.clear();
        let mut total = 0f64;
        for &row in rows {
            let target = targets[row as usize] as f64;
            total += target;
            for &(f, b) in &matrix.entries[row as usize] {
                if mask.is_some_and(|m| !m[f as usize]) {
                    continue;
                }
                if !self.is_touched[f as usize] {
                    self.is_touched[f as usize] = true;
                    self.touched.push(f);
                }
                let cell = f as usize * self.bins + b as usize;
                self.counts[cell] += 1;
                self.sums[cell] += target;
            }
        }
        // Rows without an entry sit in the feature's default bin.
        let n = rows.len() as u32;
        for &f in &self.touched {
            let start = f as usize * self.bins;
            let listed: u32 = self.counts[start..start + self.bins].iter().sum();
            let listed_sum: f64 = self.sums[start..start + self.bins].iter().sum();
            let cell = start + matrix.default_bin[f as usize] as usize;
            self.counts[cell] += n - listed;
            self.sums[cell] += total - listed_sum;
        }
        self.touched.sort_unstable();
        total
    }

    fn best_split(&self, n: usize, total: f64, min_leaf: usize) -> Option<SplitCandidate> {
        let min_leaf = min_leaf.max(1) as u32;
        let n = n as u32;
        let parent = total * total / n.max(1) as f64;
        let mut best: Option<SplitCandidate> = None;
        for &f in &self.touched {
            let start = f as usize * self.bins;
            let mut left_n = 0u32;
            let mut left_sum = 0f64;
            for b in 0..self.bins - 1 {
                left_n += self.counts[start + b];
                left_sum += self.sums[start + b];
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / left_n as f64
                    + right_sum * right_sum / right_n as f64
                    - parent;
                if gain > 1e-12 && best.is_none_or(|current| gain > current.gain) {
                    best = Some(SplitCandidate {
                        gain,
                        feature: f,
                        bin: b as u8,
                    });
                }
            }
        }
        best
    }
}

/// Grow a leaf-wise regression tree fitting `targets` over `rows`.
///
/// Leaf values are the mean target of their rows multiplied by `leaf_scale`.
pub(crate) fn grow_tree(
    matrix: &BinnedMatrix,
    targets: &[f32],
    rows: Vec<u32>,
    params: &TreeParams,
    leaf_scale: f32,
    hist: &mut Histogram,
) -> RegressionTree {
    let mask = params.feature_mask.as_deref();
    let mut nodes = vec![TreeNode::Leaf {
        value: leaf_value(targets, &rows, leaf_scale),
    }];
    let split = find_split(matrix, targets, &rows, params, mask, hist);
    let mut open = vec![OpenLeaf {
        node: 0,
        rows,
        split,
    }];

    let mut leaves = 1usize;
    while leaves < params.max_leaves.max(1) {
        let best = open
            .iter()
            .enumerate()
            .filter_map(|(pos, leaf)| leaf.split.map(|s| (pos, s.gain)))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        let Some((pos, _)) = best else {
            break;
        };
        let leaf = open.swap_remove(pos);
        let Some(split) = leaf.split else {
            break;
        };
        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = leaf
            .rows
            .iter()
            .partition(|&&row| matrix.bin(row as usize, split.feature) <= split.bin);

        let left = nodes.len();
        nodes.push(TreeNode::Leaf {
            value: leaf_value(targets, &left_rows, leaf_scale),
        });
        let right = nodes.len();
        nodes.push(TreeNode::Leaf {
            value: leaf_value(targets, &right_rows, leaf_scale),
        });
        nodes[leaf.node] = TreeNode::Split {
            feature_index: split.feature,
            threshold: matrix.thresholds[split.feature as usize][split.bin as usize],
            left: left as u32,
            right: right as u32,
        };

        for (node, rows) in [(left, left_rows), (right, right_rows)] {
            let split = find_split(matrix, targets, &rows, params, mask, hist);
            open.push(OpenLeaf { node, rows, split });
        }
        leaves += 1;
    }

    RegressionTree { nodes }
}

fn find_split(
    matrix: &BinnedMatrix,
    targets: &[f32],
    rows: &[u32],
    params: &TreeParams,
    mask: Option<&[bool]>,
    hist: &mut Histogram,
) -> Option<SplitCandidate> {
    if rows.len() < params.min_leaf.max(1) * 2 {
        return None;
    }
    let total = hist.accumulate(matrix, targets, rows, mask);
    hist.best_split(rows.len(), total, params.min_leaf)
}

fn leaf_value(targets: &[f32], rows: &[u32], scale: f32) -> f32 {
    if rows.is_empty() {
        return 0.0;
    }
    let sum: f64 = rows.iter().map(|&row| targets[row as usize] as f64).sum();
    (sum / rows.len() as f64) as f32 * scale
}
