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

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::matrix::Matrix;
use crate::predictions::Predictions;
use crate::vector::Vector;

/// Ask `predict` for every class instead of a fixed `k`.
pub const UNLIMITED_PREDICTIONS: i32 = -1;
/// `target_index` for losses that treat every target as positive (ova).
pub const ALL_LABELS_AS_TARGET: i32 = -1;

/// Per-thread scratchpad. Each training thread owns exactly one of these
/// for its whole lifetime; nothing here is shared.
pub struct State {
    pub hidden: Vector,
    pub output: Vector,
    pub grad: Vector,
    pub rng: StdRng,
    loss_value: f64,
    nexamples: i64,
}

impl State {
    pub fn new(hidden_size: usize, output_size: usize, seed: u64) -> State {
        State {
            hidden: Vector::new(hidden_size),
            output: Vector::new(output_size),
            grad: Vector::new(hidden_size),
            rng: StdRng::seed_from_u64(seed),
            loss_value: 0.0,
            nexamples: 0,
        }
    }

    /// Mean loss over every example this state has seen.
    pub fn loss(&self) -> f64 {
        if self.nexamples == 0 {
            return 0.0;
        }
        self.loss_value / self.nexamples as f64
    }

    fn increment_n_examples(&mut self, loss: f32) {
        self.loss_value += loss as f64;
        self.nexamples += 1;
    }
}

/// Couples the input matrix, the output matrix and a loss into the
/// forward/backward step. Shared read-mostly across training threads;
/// the matrices absorb unsynchronized updates (see `DenseMatrix`).
pub struct Model {
    wi: Arc<Matrix>,
    wo: Arc<Matrix>,
    loss: Loss,
    normalize_gradient: bool,
}

impl Model {
    pub fn new(wi: Arc<Matrix>, wo: Arc<Matrix>, loss: Loss, normalize_gradient: bool) -> Model {
        Model {
            wi,
            wo,
            loss,
            normalize_gradient,
        }
    }

    /// hidden = mean of the input rows.
    fn compute_hidden(&self, input: &[i32], state: &mut State) {
        let hidden = &mut state.hidden;
        hidden.zero();
        for &i in input {
            hidden.add_row(&self.wi, i as i64);
        }
        hidden.mul(1.0 / input.len() as f32);
    }

    /// One training example: forward through the loss, then add the
    /// gradient back into every input row. No-op on empty input.
    pub fn update(
        &self,
        input: &[i32],
        targets: &[i32],
        target_index: i32,
        lr: f32,
        state: &mut State,
    ) {
        if input.is_empty() {
            return;
        }
        self.compute_hidden(input, state);
        state.grad.zero();
        let loss_value = self.loss.forward(targets, target_index, state, lr, true);
        state.increment_n_examples(loss_value);
        if self.normalize_gradient {
            state.grad.mul(1.0 / input.len() as f32);
        }
        for &i in input {
            self.wi.add_vector_to_row(&state.grad, i as i64, 1.0);
        }
    }

    /// Top-`k` predictions scoring at least `threshold` for the pooled
    /// input ids.
    pub fn predict(
        &self,
        input: &[i32],
        k: i32,
        threshold: f32,
        heap: &mut Predictions,
        state: &mut State,
    ) -> Result<()> {
        let k = if k == UNLIMITED_PREDICTIONS {
            self.wo.rows() as i32
        } else {
            k
        };
        if k <= 0 {
            return Err(Error::Config("k needs to be 1 or higher".to_string()));
        }
        if input.is_empty() {
            return Err(Error::Config(
                "prediction needs a non-empty input".to_string(),
            ));
        }
        heap.clear();
        self.compute_hidden(input, state);
        self.loss.predict(k as usize, threshold, heap, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense_matrix::DenseMatrix;
    use approx::assert_abs_diff_eq;

    fn small_model(loss_of: impl Fn(Arc<Matrix>) -> Loss) -> (Model, State) {
        let mut wi = DenseMatrix::new(6, 4);
        wi.uniform(0.1, 3);
        let wi = Arc::new(Matrix::Dense(wi));
        let wo = Arc::new(Matrix::Dense(DenseMatrix::new(3, 4)));
        let loss = loss_of(wo.clone());
        let model = Model::new(wi, wo, loss, true);
        let state = State::new(4, 3, 0);
        (model, state)
    }

    #[test]
    fn hidden_is_the_mean_of_input_rows() {
        let (model, mut state) = small_model(Loss::softmax);
        model.compute_hidden(&[1, 3], &mut state);
        let dense = model.wi.as_dense().unwrap();
        for j in 0..4 {
            let expected = (dense.row(1)[j] + dense.row(3)[j]) / 2.0;
            assert_abs_diff_eq!(state.hidden[j], expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn update_is_a_no_op_on_empty_input() {
        let (model, mut state) = small_model(Loss::softmax);
        model.update(&[], &[0], 0, 0.1, &mut state);
        assert_eq!(state.loss(), 0.0);
    }

    #[test]
    fn update_accumulates_loss_and_examples() {
        let (model, mut state) = small_model(Loss::softmax);
        model.update(&[0, 1], &[2], 0, 0.1, &mut state);
        assert!(state.loss() > 0.0);
        model.update(&[2], &[1], 0, 0.1, &mut state);
        assert!(state.loss() > 0.0);
    }

    #[test]
    fn repeated_updates_learn_the_example() {
        let (model, mut state) = small_model(Loss::softmax);
        let mut heap = Predictions::new();
        for _ in 0..200 {
            model.update(&[0, 1], &[2], 0, 0.2, &mut state);
        }
        model
            .predict(&[0, 1], 1, 0.0, &mut heap, &mut state)
            .unwrap();
        assert_eq!(heap.as_slice()[0].label, 2);
    }

    #[test]
    fn predict_rejects_bad_arguments() {
        let (model, mut state) = small_model(Loss::softmax);
        let mut heap = Predictions::new();
        assert!(model.predict(&[], 1, 0.0, &mut heap, &mut state).is_err());
        assert!(model.predict(&[0], 0, 0.0, &mut heap, &mut state).is_err());
    }

    #[test]
    fn unlimited_predictions_return_every_class() {
        let (model, mut state) = small_model(Loss::softmax);
        let mut heap = Predictions::new();
        model
            .predict(&[0], UNLIMITED_PREDICTIONS, 0.0, &mut heap, &mut state)
            .unwrap();
        assert_eq!(heap.len(), 3);
    }
}
