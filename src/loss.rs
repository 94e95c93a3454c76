//  Copyright 2026 The tinytext authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::matrix::Matrix;
use crate::model::State;
use crate::predictions::Predictions;
use crate::vector::Vector;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: f32 = 8.0;
const LOG_TABLE_SIZE: usize = 512;
const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// Sampled sigmoid and log lookup tables, one copy per loss.
struct LossTables {
    t_sigmoid: Vec<f32>,
    t_log: Vec<f32>,
}

impl LossTables {
    fn new() -> LossTables {
        let mut t_sigmoid = Vec::with_capacity(SIGMOID_TABLE_SIZE + 1);
        for i in 0..=SIGMOID_TABLE_SIZE {
            let x = (i * 2) as f32 * MAX_SIGMOID / SIGMOID_TABLE_SIZE as f32 - MAX_SIGMOID;
            t_sigmoid.push(1.0 / (1.0 + (-x).exp()));
        }
        let mut t_log = Vec::with_capacity(LOG_TABLE_SIZE + 1);
        for i in 0..=LOG_TABLE_SIZE {
            let x = (i as f32 + 1e-5) / LOG_TABLE_SIZE as f32;
            t_log.push(x.ln());
        }
        LossTables { t_sigmoid, t_log }
    }

    fn sigmoid(&self, x: f32) -> f32 {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as f32 / MAX_SIGMOID / 2.0) as usize;
            self.t_sigmoid[i]
        }
    }

    fn log(&self, x: f32) -> f32 {
        if x > 1.0 {
            return 0.0;
        }
        let i = (x * LOG_TABLE_SIZE as f32) as usize;
        self.t_log[i]
    }
}

/// One logistic decision against output row `target`; the shared piece
/// behind ns, hs and ova.
fn binary_logistic(
    wo: &Matrix,
    tables: &LossTables,
    target: i32,
    state: &mut State,
    label_is_positive: bool,
    lr: f32,
    backprop: bool,
) -> f32 {
    let score = tables.sigmoid(wo.dot_row(&state.hidden, target as i64));
    if backprop {
        let alpha = lr * (label_is_positive as i32 as f32 - score);
        state.grad.add_row_scaled(wo, target as i64, alpha);
        wo.add_vector_to_row(&state.hidden, target as i64, alpha);
    }
    if label_is_positive {
        -tables.log(score)
    } else {
        -tables.log(1.0 - score)
    }
}

/// Sigmoid of every class score; the prediction route shared by the
/// binary-decision losses.
fn compute_sigmoid_output(wo: &Matrix, tables: &LossTables, state: &mut State) {
    let State { hidden, output, .. } = state;
    output.mul_matrix_vector(wo, hidden);
    for i in 0..output.len() {
        output[i] = tables.sigmoid(output[i]);
    }
}

fn find_k_best(k: usize, threshold: f32, heap: &mut Predictions, output: &Vector) {
    for i in 0..output.len() {
        if output[i] < threshold {
            continue;
        }
        if heap.is_full(k) && output[i] < heap.min_score() {
            continue;
        }
        heap.push_bounded(k, output[i], i as i32);
    }
}

pub struct SoftmaxLoss {
    wo: Arc<Matrix>,
    tables: LossTables,
}

impl SoftmaxLoss {
    fn compute_output(&self, state: &mut State) {
        let State { hidden, output, .. } = state;
        output.mul_matrix_vector(&self.wo, hidden);
        let max = output[output.argmax()];
        let mut z = 0.0;
        for i in 0..output.len() {
            output[i] = (output[i] - max).exp();
            z += output[i];
        }
        for i in 0..output.len() {
            output[i] /= z;
        }
    }

    fn forward(
        &self,
        targets: &[i32],
        target_index: i32,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        self.compute_output(state);
        debug_assert!(target_index >= 0 && (target_index as usize) < targets.len());
        let target = targets[target_index as usize] as usize;
        if backprop {
            let osz = self.wo.rows() as usize;
            for i in 0..osz {
                let label = if i == target { 1.0 } else { 0.0 };
                let alpha = lr * (label - state.output[i]);
                state.grad.add_row_scaled(&self.wo, i as i64, alpha);
                self.wo.add_vector_to_row(&state.hidden, i as i64, alpha);
            }
        }
        -self.tables.log(state.output[target])
    }
}

pub struct NegativeSamplingLoss {
    wo: Arc<Matrix>,
    tables: LossTables,
    neg: i32,
    negatives: Vec<i32>,
}

impl NegativeSamplingLoss {
    fn new(wo: Arc<Matrix>, neg: i32, target_counts: &[i64]) -> NegativeSamplingLoss {
        // unigram table proportional to count^0.5
        let z: f64 = target_counts.iter().map(|&c| (c as f64).sqrt()).sum();
        let mut negatives = Vec::with_capacity(NEGATIVE_TABLE_SIZE);
        for (i, &count) in target_counts.iter().enumerate() {
            let c = (count as f64).sqrt();
            let reps = (c * NEGATIVE_TABLE_SIZE as f64 / z).ceil() as usize;
            for _ in 0..reps {
                negatives.push(i as i32);
            }
        }
        NegativeSamplingLoss {
            wo,
            tables: LossTables::new(),
            neg,
            negatives,
        }
    }

    fn get_negative(&self, target: i32, rng: &mut StdRng) -> i32 {
        loop {
            let negative = self.negatives[rng.gen_range(0..self.negatives.len())];
            if negative != target {
                return negative;
            }
        }
    }

    fn forward(
        &self,
        targets: &[i32],
        target_index: i32,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        debug_assert!(target_index >= 0 && (target_index as usize) < targets.len());
        let target = targets[target_index as usize];
        let mut loss = binary_logistic(&self.wo, &self.tables, target, state, true, lr, backprop);
        for _ in 0..self.neg {
            let negative = self.get_negative(target, &mut state.rng);
            loss += binary_logistic(&self.wo, &self.tables, negative, state, false, lr, backprop);
        }
        loss
    }
}

#[derive(Clone, Copy)]
struct TreeNode {
    parent: i32,
    left: i32,
    right: i32,
    count: i64,
    binary: bool,
}

pub struct HierarchicalSoftmaxLoss {
    wo: Arc<Matrix>,
    tables: LossTables,
    paths: Vec<Vec<i32>>,
    codes: Vec<Vec<bool>>,
    tree: Vec<TreeNode>,
    osz: i32,
}

impl HierarchicalSoftmaxLoss {
    /// Huffman tree over the target frequencies; leaves are targets,
    /// internal node `n` scores against output row `n - osz`.
    fn new(wo: Arc<Matrix>, target_counts: &[i64]) -> HierarchicalSoftmaxLoss {
        let osz = target_counts.len();
        let mut tree = vec![
            TreeNode {
                parent: -1,
                left: -1,
                right: -1,
                count: 1_000_000_000_000_000,
                binary: false,
            };
            2 * osz - 1
        ];
        for i in 0..osz {
            tree[i].count = target_counts[i];
        }
        let mut leaf = osz as i64 - 1;
        let mut node = osz;
        for i in osz..2 * osz - 1 {
            let mut mini = [0usize; 2];
            for slot in &mut mini {
                if leaf >= 0 && tree[leaf as usize].count < tree[node].count {
                    *slot = leaf as usize;
                    leaf -= 1;
                } else {
                    *slot = node;
                    node += 1;
                }
            }
            tree[i].left = mini[0] as i32;
            tree[i].right = mini[1] as i32;
            tree[i].count = tree[mini[0]].count + tree[mini[1]].count;
            tree[mini[0]].parent = i as i32;
            tree[mini[1]].parent = i as i32;
            tree[mini[1]].binary = true;
        }
        let mut paths = Vec::with_capacity(osz);
        let mut codes = Vec::with_capacity(osz);
        for i in 0..osz {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut j = i;
            while tree[j].parent != -1 {
                path.push(tree[j].parent - osz as i32);
                code.push(tree[j].binary);
                j = tree[j].parent as usize;
            }
            paths.push(path);
            codes.push(code);
        }
        HierarchicalSoftmaxLoss {
            wo,
            tables: LossTables::new(),
            paths,
            codes,
            tree,
            osz: osz as i32,
        }
    }

    fn forward(
        &self,
        targets: &[i32],
        target_index: i32,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        debug_assert!(target_index >= 0 && (target_index as usize) < targets.len());
        let target = targets[target_index as usize] as usize;
        let mut loss = 0.0;
        for i in 0..self.paths[target].len() {
            let node = self.paths[target][i];
            let positive = self.codes[target][i];
            loss += binary_logistic(&self.wo, &self.tables, node, state, positive, lr, backprop);
        }
        loss
    }

    /// Best-first walk from the root, pruning branches that cannot reach
    /// the heap any more.
    fn predict(&self, k: usize, threshold: f32, heap: &mut Predictions, state: &mut State) {
        self.dfs(k, threshold, 2 * self.osz - 2, 1.0, heap, &state.hidden);
    }

    fn dfs(
        &self,
        k: usize,
        threshold: f32,
        node: i32,
        score: f32,
        heap: &mut Predictions,
        hidden: &Vector,
    ) {
        if score < threshold {
            return;
        }
        if heap.is_full(k) && score < heap.min_score() {
            return;
        }
        let n = self.tree[node as usize];
        if n.left == -1 && n.right == -1 {
            heap.push_bounded(k, score, node);
            return;
        }
        let f = self
            .tables
            .sigmoid(self.wo.dot_row(hidden, (node - self.osz) as i64));
        self.dfs(k, threshold, n.left, score * (1.0 - f), heap, hidden);
        self.dfs(k, threshold, n.right, score * f, heap, hidden);
    }
}

pub struct OneVsAllLoss {
    wo: Arc<Matrix>,
    tables: LossTables,
}

impl OneVsAllLoss {
    /// Every class is its own binary decision; `target_index` is unused.
    fn forward(&self, targets: &[i32], state: &mut State, lr: f32, backprop: bool) -> f32 {
        let mut loss = 0.0;
        let osz = state.output.len();
        for i in 0..osz {
            let is_match = targets.contains(&(i as i32));
            loss +=
                binary_logistic(&self.wo, &self.tables, i as i32, state, is_match, lr, backprop);
        }
        loss
    }
}

/// The loss variants behind one dispatch surface. `forward` returns the
/// example loss and, when `backprop` is set, writes `state.grad` and
/// updates the output matrix.
pub enum Loss {
    Softmax(SoftmaxLoss),
    NegativeSampling(NegativeSamplingLoss),
    HierarchicalSoftmax(HierarchicalSoftmaxLoss),
    OneVsAll(OneVsAllLoss),
}

impl Loss {
    pub fn softmax(wo: Arc<Matrix>) -> Loss {
        Loss::Softmax(SoftmaxLoss {
            wo,
            tables: LossTables::new(),
        })
    }

    pub fn negative_sampling(wo: Arc<Matrix>, neg: i32, target_counts: &[i64]) -> Loss {
        Loss::NegativeSampling(NegativeSamplingLoss::new(wo, neg, target_counts))
    }

    pub fn hierarchical_softmax(wo: Arc<Matrix>, target_counts: &[i64]) -> Loss {
        Loss::HierarchicalSoftmax(HierarchicalSoftmaxLoss::new(wo, target_counts))
    }

    pub fn one_vs_all(wo: Arc<Matrix>) -> Loss {
        Loss::OneVsAll(OneVsAllLoss {
            wo,
            tables: LossTables::new(),
        })
    }

    pub fn forward(
        &self,
        targets: &[i32],
        target_index: i32,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        match self {
            Loss::Softmax(l) => l.forward(targets, target_index, state, lr, backprop),
            Loss::NegativeSampling(l) => l.forward(targets, target_index, state, lr, backprop),
            Loss::HierarchicalSoftmax(l) => l.forward(targets, target_index, state, lr, backprop),
            Loss::OneVsAll(l) => l.forward(targets, state, lr, backprop),
        }
    }

    pub fn compute_output(&self, state: &mut State) {
        match self {
            Loss::Softmax(l) => l.compute_output(state),
            Loss::NegativeSampling(l) => compute_sigmoid_output(&l.wo, &l.tables, state),
            Loss::HierarchicalSoftmax(l) => compute_sigmoid_output(&l.wo, &l.tables, state),
            Loss::OneVsAll(l) => compute_sigmoid_output(&l.wo, &l.tables, state),
        }
    }

    /// Top-`k` labels scoring at least `threshold`, into `heap`.
    pub fn predict(&self, k: usize, threshold: f32, heap: &mut Predictions, state: &mut State) {
        match self {
            Loss::HierarchicalSoftmax(l) => l.predict(k, threshold, heap, state),
            _ => {
                self.compute_output(state);
                find_k_best(k, threshold, heap, &state.output);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense_matrix::DenseMatrix;
    use approx::assert_abs_diff_eq;

    fn zero_wo(rows: i64, dim: i64) -> Arc<Matrix> {
        Arc::new(Matrix::Dense(DenseMatrix::new(rows, dim)))
    }

    fn fresh_state(dim: usize, osz: usize) -> State {
        State::new(dim, osz, 0)
    }

    #[test]
    fn sigmoid_table_is_symmetric_and_saturates() {
        let tables = LossTables::new();
        assert_abs_diff_eq!(tables.sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert_eq!(tables.sigmoid(-9.0), 0.0);
        assert_eq!(tables.sigmoid(9.0), 1.0);
        assert_abs_diff_eq!(
            tables.sigmoid(2.0) + tables.sigmoid(-2.0),
            1.0,
            epsilon = 1e-2
        );
    }

    #[test]
    fn log_table_matches_ln_on_grid_points() {
        let tables = LossTables::new();
        assert_abs_diff_eq!(tables.log(0.5), (0.5f32).ln(), epsilon = 1e-4);
        assert_abs_diff_eq!(tables.log(0.25), (0.25f32).ln(), epsilon = 1e-4);
        assert_eq!(tables.log(1.5), 0.0);
    }

    #[test]
    fn softmax_loss_on_zero_weights_is_log_of_class_count() {
        let loss = Loss::softmax(zero_wo(4, 10));
        let mut state = fresh_state(10, 4);
        let value = loss.forward(&[2], 0, &mut state, 0.1, false);
        assert_abs_diff_eq!(value, (4.0f32).ln(), epsilon = 1e-3);
    }

    #[test]
    fn softmax_backprop_reduces_loss_on_repeats() {
        let wo = zero_wo(3, 8);
        let loss = Loss::softmax(wo);
        let mut state = fresh_state(8, 3);
        for j in 0..8 {
            state.hidden[j] = 0.1 * (j as f32 + 1.0);
        }
        let first = loss.forward(&[1], 0, &mut state, 0.5, true);
        state.grad.zero();
        let mut last = first;
        for _ in 0..20 {
            state.grad.zero();
            last = loss.forward(&[1], 0, &mut state, 0.5, true);
        }
        assert!(last < first, "loss did not decrease: {first} -> {last}");
    }

    #[test]
    fn negative_sampling_on_zero_weights_costs_log_half_per_decision() {
        let counts = vec![10i64; 8];
        let loss = Loss::negative_sampling(zero_wo(8, 6), 5, &counts);
        let mut state = fresh_state(6, 8);
        let value = loss.forward(&[3], 0, &mut state, 0.1, false);
        assert_abs_diff_eq!(value, 6.0 * (2.0f32).ln(), epsilon = 1e-2);
    }

    #[test]
    fn negative_sampling_never_draws_the_target() {
        let counts = vec![100i64, 1];
        let loss = match Loss::negative_sampling(zero_wo(2, 4), 5, &counts) {
            Loss::NegativeSampling(l) => l,
            _ => unreachable!(),
        };
        let mut rng = <StdRng as rand::SeedableRng>::seed_from_u64(5);
        for _ in 0..1000 {
            assert_eq!(loss.get_negative(0, &mut rng), 1);
        }
    }

    #[test]
    fn huffman_paths_are_unique_and_prefix_free() {
        let counts: Vec<i64> = (1..=16).map(|i| i * 7).collect();
        let loss = match Loss::hierarchical_softmax(zero_wo(15, 4), &counts) {
            Loss::HierarchicalSoftmax(l) => l,
            _ => unreachable!(),
        };
        let codes: Vec<&Vec<bool>> = loss.codes.iter().collect();
        for (i, a) in codes.iter().enumerate() {
            assert!(!a.is_empty());
            for (j, b) in codes.iter().enumerate() {
                if i == j {
                    continue;
                }
                assert_ne!(a, b, "labels {i} and {j} share a path");
                // a path may not prefix another (leaf-to-root codes:
                // compare the root-to-leaf orientation)
                let ra: Vec<bool> = a.iter().rev().cloned().collect();
                let rb: Vec<bool> = b.iter().rev().cloned().collect();
                let shorter = ra.len().min(rb.len());
                assert!(
                    ra[..shorter] != rb[..shorter] || ra.len() == rb.len(),
                    "path of {i} prefixes path of {j}"
                );
            }
        }
    }

    #[test]
    fn frequent_labels_get_shorter_paths() {
        let counts: Vec<i64> = vec![1000, 500, 10, 5, 2, 1];
        let loss = match Loss::hierarchical_softmax(zero_wo(5, 4), &counts) {
            Loss::HierarchicalSoftmax(l) => l,
            _ => unreachable!(),
        };
        assert!(loss.codes[0].len() <= loss.codes[5].len());
    }

    #[test]
    fn hs_predict_on_zero_weights_spreads_mass_evenly() {
        let counts: Vec<i64> = vec![8, 4, 2, 1];
        let loss = Loss::hierarchical_softmax(zero_wo(3, 4), &counts);
        let mut state = fresh_state(4, 4);
        let mut heap = Predictions::new();
        loss.predict(4, 0.0, &mut heap, &mut state);
        assert_eq!(heap.len(), 4);
        let total: f32 = heap.iter().map(|p| p.score).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn one_vs_all_sums_per_label_decisions() {
        let loss = Loss::one_vs_all(zero_wo(3, 5));
        let mut state = fresh_state(5, 3);
        let value = loss.forward(&[0, 2], -1, &mut state, 0.1, false);
        assert_abs_diff_eq!(value, 3.0 * (2.0f32).ln(), epsilon = 1e-2);
    }

    #[test]
    fn predict_respects_threshold() {
        let loss = Loss::softmax(zero_wo(4, 6));
        let mut state = fresh_state(6, 4);
        let mut heap = Predictions::new();
        // uniform output is 0.25 per class
        loss.predict(4, 0.5, &mut heap, &mut state);
        assert!(heap.is_empty());
        loss.predict(4, 0.2, &mut heap, &mut state);
        assert_eq!(heap.len(), 4);
    }
}
