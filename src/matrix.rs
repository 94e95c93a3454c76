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

use std::io::{Read, Write};

use crate::dense_matrix::DenseMatrix;
use crate::error::{Error, Result};
use crate::quant_matrix::QuantMatrix;
use crate::vector::Vector;

/// The two backing stores behind one row-level contract. The set is
/// closed, so a tagged variant beats a trait object here.
pub enum Matrix {
    Dense(DenseMatrix),
    Quant(QuantMatrix),
}

impl Matrix {
    pub fn rows(&self) -> i64 {
        match self {
            Matrix::Dense(m) => m.rows(),
            Matrix::Quant(m) => m.rows(),
        }
    }

    pub fn cols(&self) -> i64 {
        match self {
            Matrix::Dense(m) => m.cols(),
            Matrix::Quant(m) => m.cols(),
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Matrix::Quant(_))
    }

    pub fn as_dense(&self) -> Option<&DenseMatrix> {
        match self {
            Matrix::Dense(m) => Some(m),
            Matrix::Quant(_) => None,
        }
    }

    pub fn dot_row(&self, vec: &Vector, i: i64) -> f32 {
        match self {
            Matrix::Dense(m) => m.dot_row(vec, i),
            Matrix::Quant(m) => m.dot_row(vec, i),
        }
    }

    /// A[i, :] += a * vec. A quantized matrix is read-only after
    /// training; asking it to mutate is a programmer error.
    pub fn add_vector_to_row(&self, vec: &Vector, i: i64, a: f32) {
        match self {
            Matrix::Dense(m) => m.add_vector_to_row(vec, i, a),
            Matrix::Quant(_) => panic!("add_vector_to_row called on a quantized matrix"),
        }
    }

    pub fn add_row_to_vector(&self, dst: &mut Vector, i: i64) {
        match self {
            Matrix::Dense(m) => m.add_row_to_vector(dst, i),
            Matrix::Quant(m) => m.add_row_to_vector(dst, i),
        }
    }

    pub fn add_row_to_vector_scaled(&self, dst: &mut Vector, i: i64, a: f32) {
        match self {
            Matrix::Dense(m) => m.add_row_to_vector_scaled(dst, i, a),
            Matrix::Quant(m) => m.add_row_to_vector_scaled(dst, i, a),
        }
    }

    /// One tag byte, then the variant payload.
    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        match self {
            Matrix::Dense(m) => {
                out.write_all(&[0])?;
                m.save(out)
            }
            Matrix::Quant(m) => {
                out.write_all(&[1])?;
                m.save(out)
            }
        }
    }

    pub fn load<R: Read>(input: &mut R) -> Result<Matrix> {
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;
        match tag[0] {
            0 => Ok(Matrix::Dense(DenseMatrix::load(input)?)),
            1 => Ok(Matrix::Quant(QuantMatrix::load(input)?)),
            t => Err(Error::MalformedModel(format!("unknown matrix tag {t}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_round_trips_through_tagged_form() {
        let mut dense = DenseMatrix::new(4, 3);
        dense.uniform(1.0, 21);
        let mat = Matrix::Dense(dense);
        let mut buf = Vec::new();
        mat.save(&mut buf).unwrap();
        let loaded = Matrix::load(&mut buf.as_slice()).unwrap();
        assert!(!loaded.is_quantized());
        assert_eq!(loaded.rows(), 4);
        assert_eq!(loaded.cols(), 3);
        let v = Vector::from_vec(vec![1.0, -1.0, 0.5]);
        for i in 0..4 {
            assert_eq!(mat.dot_row(&v, i), loaded.dot_row(&v, i));
        }
    }

    #[test]
    #[should_panic(expected = "quantized matrix")]
    fn quantized_rejects_mutation() {
        let mut dense = DenseMatrix::new(300, 4);
        dense.uniform(1.0, 22);
        let mat = Matrix::Quant(QuantMatrix::new(dense, 2, false).unwrap());
        let v = Vector::new(4);
        mat.add_vector_to_row(&v, 0, 1.0);
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let buf = [9u8, 0, 0];
        assert!(matches!(
            Matrix::load(&mut buf.as_slice()),
            Err(Error::MalformedModel(_))
        ));
    }
}
