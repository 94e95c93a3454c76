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

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f32,
    pub label: i32,
}

/// A bounded list of (score, label) pairs kept sorted by descending
/// score, ties broken by the lower label id. `k` is small, so a sorted
/// array beats a heap here.
#[derive(Debug, Default)]
pub struct Predictions {
    items: Vec<Prediction>,
}

impl Predictions {
    pub fn new() -> Predictions {
        Predictions { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[Prediction] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.items.iter()
    }

    /// Lowest retained score; only meaningful when non-empty.
    pub fn min_score(&self) -> f32 {
        self.items.last().map(|p| p.score).unwrap_or(f32::MIN)
    }

    pub fn is_full(&self, k: usize) -> bool {
        self.items.len() >= k
    }

    pub fn push_bounded(&mut self, k: usize, score: f32, label: i32) {
        if self.items.len() >= k && score < self.min_score() {
            return;
        }
        let pos = self
            .items
            .iter()
            .position(|p| p.score < score || (p.score == score && p.label > label))
            .unwrap_or(self.items.len());
        self.items.insert(pos, Prediction { score, label });
        self.items.truncate(k);
    }
}

impl<'a> IntoIterator for &'a Predictions {
    type Item = &'a Prediction;
    type IntoIter = std::slice::Iter<'a, Prediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_top_k_sorted_descending() {
        let mut preds = Predictions::new();
        for (score, label) in [(0.1, 0), (0.9, 1), (0.4, 2), (0.6, 3)] {
            preds.push_bounded(2, score, label);
        }
        let got: Vec<(f32, i32)> = preds.iter().map(|p| (p.score, p.label)).collect();
        assert_eq!(got, vec![(0.9, 1), (0.6, 3)]);
    }

    #[test]
    fn ties_break_toward_lower_label() {
        let mut preds = Predictions::new();
        preds.push_bounded(2, 0.5, 3);
        preds.push_bounded(2, 0.5, 1);
        preds.push_bounded(2, 0.5, 2);
        let got: Vec<i32> = preds.iter().map(|p| p.label).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn rejects_below_minimum_when_full() {
        let mut preds = Predictions::new();
        preds.push_bounded(2, 0.8, 0);
        preds.push_bounded(2, 0.7, 1);
        preds.push_bounded(2, 0.2, 2);
        assert_eq!(preds.len(), 2);
        assert_eq!(preds.min_score(), 0.7);
    }
}
