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

use std::collections::HashMap;

use crate::predictions::Prediction;

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    gold: u64,
    predicted: u64,
    predicted_gold: u64,
}

impl Counts {
    fn precision(&self) -> f64 {
        if self.predicted == 0 {
            return f64::NAN;
        }
        self.predicted_gold as f64 / self.predicted as f64
    }

    fn recall(&self) -> f64 {
        if self.gold == 0 {
            return f64::NAN;
        }
        self.predicted_gold as f64 / self.gold as f64
    }

    fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p.is_nan() || r.is_nan() {
            return f64::NAN;
        }
        2.0 * p * r / (p + r)
    }
}

/// Accumulates gold/predicted/hit counts globally and per label.
/// Query with `label_id = -1` for the aggregate triple.
#[derive(Debug, Default)]
pub struct Meter {
    overall: Counts,
    labels: HashMap<i32, Counts>,
    nexamples: u64,
}

impl Meter {
    pub fn new() -> Meter {
        Meter::default()
    }

    pub fn nexamples(&self) -> u64 {
        self.nexamples
    }

    pub fn log(&mut self, labels: &[i32], predictions: &[Prediction]) {
        self.nexamples += 1;
        self.overall.gold += labels.len() as u64;
        self.overall.predicted += predictions.len() as u64;

        for pred in predictions {
            let entry = self.labels.entry(pred.label).or_default();
            entry.predicted += 1;
            if labels.contains(&pred.label) {
                entry.predicted_gold += 1;
                self.overall.predicted_gold += 1;
            }
        }
        for &label in labels {
            self.labels.entry(label).or_default().gold += 1;
        }
    }

    fn counts(&self, label_id: i32) -> Counts {
        if label_id < 0 {
            return self.overall;
        }
        self.labels.get(&label_id).copied().unwrap_or_default()
    }

    pub fn precision(&self, label_id: i32) -> f64 {
        self.counts(label_id).precision()
    }

    pub fn recall(&self, label_id: i32) -> f64 {
        self.counts(label_id).recall()
    }

    pub fn f1_score(&self, label_id: i32) -> f64 {
        self.counts(label_id).f1_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pred(score: f32, label: i32) -> Prediction {
        Prediction { score, label }
    }

    #[test]
    fn single_example_metrics() {
        let mut meter = Meter::new();
        meter.log(&[1, 2], &[pred(0.9, 1), pred(0.8, 3)]);

        assert_eq!(meter.nexamples(), 1);
        assert_abs_diff_eq!(meter.precision(-1), 0.5);
        assert_abs_diff_eq!(meter.recall(-1), 0.5);
        assert_abs_diff_eq!(meter.f1_score(-1), 0.5);
        // label 3 was predicted but never gold
        assert!(meter.recall(3).is_nan());
        assert_abs_diff_eq!(meter.precision(3), 0.0);
        // label 2 was gold but never predicted
        assert!(meter.precision(2).is_nan());
        assert_abs_diff_eq!(meter.recall(2), 0.0);
    }

    #[test]
    fn unseen_label_is_undefined_everywhere() {
        let meter = Meter::new();
        assert!(meter.precision(7).is_nan());
        assert!(meter.recall(7).is_nan());
        assert!(meter.f1_score(7).is_nan());
    }

    #[test]
    fn accumulates_across_examples() {
        let mut meter = Meter::new();
        meter.log(&[0], &[pred(1.0, 0)]);
        meter.log(&[1], &[pred(1.0, 0)]);
        assert_eq!(meter.nexamples(), 2);
        assert_abs_diff_eq!(meter.precision(-1), 0.5);
        assert_abs_diff_eq!(meter.recall(-1), 0.5);
        assert_abs_diff_eq!(meter.precision(0), 0.5);
        assert_abs_diff_eq!(meter.recall(0), 1.0);
    }

    #[test]
    fn perfect_predictions_score_one() {
        let mut meter = Meter::new();
        meter.log(&[4], &[pred(1.0, 4)]);
        assert_abs_diff_eq!(meter.precision(-1), 1.0);
        assert_abs_diff_eq!(meter.recall(-1), 1.0);
        assert_abs_diff_eq!(meter.f1_score(-1), 1.0);
    }
}
