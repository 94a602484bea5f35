//! Random forest classifier built from CART trees with Gini impurity.
//!
//! Each tree is grown on a bootstrap sample and considers a random subset
//! of features at every split. Trees are stored as flat node arrays so a
//! fitted forest serializes to plain JSON.

use std::ops::Range;

use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` grows trees until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Candidate features per split; `None` means `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn features_per_split(&self, n_features: usize) -> usize {
        let k = self
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize);
        k.clamp(1, n_features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Root is `nodes[0]`; children are always stored after their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict_distribution(&self, x: &[f64]) -> &[f64] {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Structural check used before trusting a deserialized tree.
    pub fn is_well_formed(&self, n_features: usize, n_classes: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(i, node)| match node {
                Node::Leaf { distribution } => {
                    distribution.len() == n_classes && distribution.iter().all(|p| p.is_finite())
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    *feature < n_features
                        && threshold.is_finite()
                        && *left > i
                        && *right > i
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
            })
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((i, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = &self.nodes[i] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

enum Grown {
    Leaf(Vec<f64>),
    Split { split: Split, mid: usize },
}

/// A subtree still to be grown: its slice of the sample indices and the
/// split node (and side) that will point at it.
struct Pending {
    range: Range<usize>,
    depth: usize,
    parent: Option<(usize, bool)>,
}

struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    labels: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    features_per_split: usize,
    rng: StdRng,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self, samples: &mut [usize]) -> (DecisionTree, Vec<f64>) {
        self.build(samples);
        let total: f64 = self.importances.iter().sum();
        if total > 0.0 {
            for value in &mut self.importances {
                *value /= total;
            }
        }
        (DecisionTree { nodes: self.nodes }, self.importances)
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &s in samples {
            counts[self.labels[s]] += 1;
        }
        counts
    }

    /// Grow the tree depth-first with an explicit work stack, so deep trees
    /// never exhaust the call stack.
    fn build(&mut self, samples: &mut [usize]) {
        let mut stack = vec![Pending {
            range: 0..samples.len(),
            depth: 0,
            parent: None,
        }];

        while let Some(Pending {
            range,
            depth,
            parent,
        }) = stack.pop()
        {
            let node_index = self.nodes.len();
            let start = range.start;
            match self.grow_node(&mut samples[range.clone()], depth) {
                Grown::Leaf(distribution) => self.nodes.push(Node::Leaf { distribution }),
                Grown::Split { split, mid } => {
                    self.nodes.push(Node::Split {
                        feature: split.feature,
                        threshold: split.threshold,
                        left: 0,
                        right: 0,
                    });
                    // right pushed first so the left subtree is laid out first
                    stack.push(Pending {
                        range: start + mid..range.end,
                        depth: depth + 1,
                        parent: Some((node_index, false)),
                    });
                    stack.push(Pending {
                        range: start..start + mid,
                        depth: depth + 1,
                        parent: Some((node_index, true)),
                    });
                }
            }

            if let Some((parent, is_left)) = parent {
                if let Node::Split { left, right, .. } = &mut self.nodes[parent] {
                    if is_left {
                        *left = node_index;
                    } else {
                        *right = node_index;
                    }
                }
            }
        }
    }

    /// Decide one node over `samples`, partitioning them in place when it splits.
    fn grow_node(&mut self, samples: &mut [usize], depth: usize) -> Grown {
        let n = samples.len();
        let counts = self.class_counts(samples);
        let distribution: Vec<f64> = counts.iter().map(|&c| c as f64 / n as f64).collect();

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let too_small = n < self.params.min_samples_split;
        let too_deep = self.params.max_depth.is_some_and(|max| depth >= max);
        if pure || too_small || too_deep {
            return Grown::Leaf(distribution);
        }

        let parent_impurity = gini(&counts, n);
        let Some(split) = self.best_split(samples, &counts) else {
            return Grown::Leaf(distribution);
        };

        // left side holds x <= threshold
        let mut mid = 0;
        for i in 0..n {
            if self.features[samples[i]][split.feature] <= split.threshold {
                samples.swap(i, mid);
                mid += 1;
            }
        }

        self.importances[split.feature] += n as f64 * (parent_impurity - split.impurity);
        Grown::Split { split, mid }
    }

    fn best_split(&mut self, samples: &[usize], counts: &[usize]) -> Option<Split> {
        let n = samples.len();
        let n_features = self.features[0].len();
        // Visit features in random order. Past `features_per_split` the search
        // only continues while no valid split has been found.
        let permutation = index::sample(&mut self.rng, n_features, n_features);
        let mut order = samples.to_vec();
        let mut best: Option<Split> = None;

        for (examined, feature) in permutation.iter().enumerate() {
            if examined >= self.features_per_split && best.is_some() {
                break;
            }
            let column = |s: usize| self.features[s][feature];
            order.sort_by(|&a, &b| column(a).total_cmp(&column(b)));

            let mut left = vec![0usize; self.n_classes];
            let mut right = counts.to_vec();
            for i in 0..n - 1 {
                let label = self.labels[order[i]];
                left[label] += 1;
                right[label] -= 1;

                let current = column(order[i]);
                let next = column(order[i + 1]);
                if current >= next {
                    continue;
                }

                let n_left = i + 1;
                let n_right = n - n_left;
                let impurity = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / n as f64;

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

/// Fitted forest together with the class labels its indices refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub classes: Vec<String>,
    pub n_features: usize,
    pub params: ForestParams,
    pub trees: Vec<DecisionTree>,
    /// Mean impurity decrease per feature, normalized to sum to 1.
    pub feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on `features` (one row per sample) and `labels` (indices into `classes`).
    pub fn fit(
        features: &[Vec<f64>],
        labels: &[usize],
        classes: Vec<String>,
        params: &ForestParams,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(PipelineError::Training("no samples to fit".to_string()));
        }
        if features.len() != labels.len() {
            return Err(PipelineError::Training(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let n_features = features[0].len();
        if n_features == 0 || features.iter().any(|row| row.len() != n_features) {
            return Err(PipelineError::Training(
                "feature rows must share a non-zero width".to_string(),
            ));
        }
        if let Some(bad) = labels.iter().find(|&&l| l >= classes.len()) {
            return Err(PipelineError::Training(format!(
                "label index {bad} outside {} classes",
                classes.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(PipelineError::Training(
                "forest needs at least one tree".to_string(),
            ));
        }

        let n = features.len();
        let features_per_split = params.features_per_split(n_features);
        let mut master = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);
        let mut feature_importances = vec![0.0; n_features];

        for _ in 0..params.n_trees {
            let mut rng = StdRng::seed_from_u64(master.gen());
            let mut samples: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let builder = TreeBuilder {
                features,
                labels,
                n_classes: classes.len(),
                params,
                features_per_split,
                rng,
                nodes: Vec::new(),
                importances: vec![0.0; n_features],
            };
            let (tree, importances) = builder.grow(&mut samples);
            for (total, value) in feature_importances.iter_mut().zip(importances) {
                *total += value;
            }
            trees.push(tree);
        }

        let sum: f64 = feature_importances.iter().sum();
        if sum > 0.0 {
            for value in &mut feature_importances {
                *value /= sum;
            }
        }

        tracing::debug!(
            "Fitted {} trees (max depth {}) on {} samples",
            trees.len(),
            trees.iter().map(DecisionTree::depth).max().unwrap_or(0),
            n
        );

        Ok(Self {
            classes,
            n_features,
            params: params.clone(),
            trees,
            feature_importances,
        })
    }

    /// Class probabilities averaged over all trees.
    pub fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (total, p) in totals.iter_mut().zip(tree.predict_distribution(x)) {
                *total += p;
            }
        }
        let n = self.trees.len() as f64;
        totals.iter().map(|t| t / n).collect()
    }

    /// Most probable class index; ties go to the lowest index.
    pub fn predict(&self, x: &[f64]) -> usize {
        argmax(&self.predict_proba(x))
    }

    pub fn is_well_formed(&self) -> bool {
        !self.trees.is_empty()
            && self.feature_importances.len() == self.n_features
            && self
                .trees
                .iter()
                .all(|t| t.is_well_formed(self.n_features, self.classes.len()))
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let jitter = (i % 7) as f64 * 0.1;
            features.push(vec![-2.0 - jitter, 1.0, (i % 3) as f64]);
            labels.push(0);
            features.push(vec![2.0 + jitter, 1.0, (i % 3) as f64]);
            labels.push(1);
        }
        (features, labels)
    }

    fn classes() -> Vec<String> {
        vec!["pass".to_string(), "fail".to_string()]
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        }
    }

    #[test]
    fn separable_data_is_learned() {
        let (features, labels) = two_blobs();
        let forest = RandomForest::fit(&features, &labels, classes(), &small_params()).unwrap();

        let correct = features
            .iter()
            .zip(&labels)
            .filter(|(x, y)| forest.predict(x) == **y)
            .count();
        assert_eq!(correct, features.len());
        assert_eq!(forest.classes[forest.predict(&[5.0, 1.0, 0.0])], "fail");
        assert!(forest.is_well_formed());
    }

    #[test]
    fn same_seed_grows_the_same_forest() {
        let (features, labels) = two_blobs();
        let a = RandomForest::fit(&features, &labels, classes(), &small_params()).unwrap();
        let b = RandomForest::fit(&features, &labels, classes(), &small_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (features, labels) = two_blobs();
        let forest = RandomForest::fit(&features, &labels, classes(), &small_params()).unwrap();
        let proba = forest.predict_proba(&[0.1, 1.0, 2.0]);
        assert_eq!(proba.len(), 2);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn importance_concentrates_on_the_informative_feature() {
        let (features, labels) = two_blobs();
        let params = ForestParams {
            n_trees: 20,
            max_features: Some(3),
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&features, &labels, classes(), &params).unwrap();
        assert!(forest.feature_importances[0] > 0.9);
        assert_eq!(forest.feature_importances[1], 0.0);
    }

    #[test]
    fn max_depth_limits_growth() {
        let (features, labels) = two_blobs();
        let params = ForestParams {
            n_trees: 5,
            max_depth: Some(1),
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&features, &labels, classes(), &params).unwrap();
        assert!(forest.trees.iter().all(|t| t.depth() <= 1));
    }

    #[test]
    fn unbounded_depth_grows_a_long_chain_without_recursion() {
        // alternating labels force a split between every pair of neighbours
        let n = 3000;
        let features: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let labels: Vec<usize> = (0..n).map(|i| usize::from(i % 2 == 1)).collect();
        let params = ForestParams {
            n_trees: 1,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&features, &labels, classes(), &params).unwrap();

        let tree = &forest.trees[0];
        assert!(tree.is_well_formed(1, 2));
        assert!(tree.depth() > 10);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let (features, mut labels) = two_blobs();
        labels.pop();
        let err = RandomForest::fit(&features, &labels, classes(), &small_params()).unwrap_err();
        assert!(matches!(err, PipelineError::Training(_)));
    }

    #[test]
    fn malformed_tree_is_detected() {
        let tree = DecisionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.5,
                left: 0,
                right: 3,
            }],
        };
        assert!(!tree.is_well_formed(1, 2));
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax(&[0.1, 0.5, 0.4]), 1);
    }
}
