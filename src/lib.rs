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

//! A compact engine for shallow neural text representations: subword-aware
//! vocabulary construction, multi-threaded embedding training under several
//! loss formulations, product-quantized compression and classification
//! evaluation.

pub mod args;
pub use args::{Args, LossName, ModelName};

pub mod error;
pub use error::{Error, Result};

pub mod tokenizer;
pub use tokenizer::{EOS, TokenReader};

pub mod dictionary;
pub use dictionary::{Dictionary, EntryKind};

pub mod vector;
pub use vector::Vector;

pub mod dense_matrix;
pub use dense_matrix::DenseMatrix;

pub mod product_quantizer;
pub use product_quantizer::ProductQuantizer;

pub mod quant_matrix;
pub use quant_matrix::QuantMatrix;

pub mod matrix;
pub use matrix::Matrix;

pub mod loss;
pub use loss::Loss;

pub mod model;
pub use model::{Model, State};

pub mod predictions;
pub use predictions::{Prediction, Predictions};

pub mod meter;
pub use meter::Meter;

pub mod engine;
pub use engine::Engine;
