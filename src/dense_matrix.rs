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
use std::ptr::slice_from_raw_parts_mut;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::vector::Vector;

/// Row-major dense matrix.
///
/// Training threads update rows concurrently without synchronization
/// (Hogwild): updates are sparse relative to the matrix and small in
/// magnitude, so lost writes are tolerated. All the raw-pointer mutation
/// that makes this possible is confined to `add_vector_to_row`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    m: i64,
    n: i64,
    data: Vec<f32>,
}

impl DenseMatrix {
    pub fn new(m: i64, n: i64) -> DenseMatrix {
        DenseMatrix {
            m,
            n,
            data: vec![0.0; (m * n) as usize],
        }
    }

    pub fn rows(&self) -> i64 {
        self.m
    }

    pub fn cols(&self) -> i64 {
        self.n
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, i: i64) -> &[f32] {
        debug_assert!(i >= 0 && i < self.m);
        let offset = (i * self.n) as usize;
        &self.data[offset..offset + self.n as usize]
    }

    pub fn row_mut(&mut self, i: i64) -> &mut [f32] {
        debug_assert!(i >= 0 && i < self.m);
        let offset = (i * self.n) as usize;
        &mut self.data[offset..offset + self.n as usize]
    }

    /// Fill with samples from U(-a, a), reproducibly for a fixed seed.
    pub fn uniform(&mut self, a: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new_inclusive(-a, a);
        for v in &mut self.data {
            *v = rng.sample(dist);
        }
    }

    pub fn dot_row(&self, vec: &Vector, i: i64) -> f32 {
        debug_assert!(i >= 0 && i < self.m);
        debug_assert_eq!(vec.len() as i64, self.n);
        self.row(i)
            .iter()
            .zip(vec.as_slice())
            .fold(0.0, |acc, (a, b)| acc + a * b)
    }

    /// A[i, :] += a * vec, through a shared reference.
    ///
    /// Called concurrently from every training thread; racing additions on
    /// the same row may drop individual updates.
    pub fn add_vector_to_row(&self, vec: &Vector, i: i64, a: f32) {
        debug_assert!(i >= 0 && i < self.m);
        debug_assert_eq!(vec.len() as i64, self.n);
        let row = self.row(i);
        let row = slice_from_raw_parts_mut(row.as_ptr().cast_mut(), row.len());
        unsafe {
            for (j, v) in vec.as_slice().iter().enumerate() {
                (*row)[j] += a * v;
            }
        }
    }

    pub fn add_row_to_vector(&self, dst: &mut Vector, i: i64) {
        for (d, s) in dst.as_mut_slice().iter_mut().zip(self.row(i)) {
            *d += s;
        }
    }

    pub fn add_row_to_vector_scaled(&self, dst: &mut Vector, i: i64, a: f32) {
        for (d, s) in dst.as_mut_slice().iter_mut().zip(self.row(i)) {
            *d += a * s;
        }
    }

    pub fn l2_norm_row(&self, i: i64) -> f32 {
        self.row(i).iter().fold(0.0, |acc, v| acc + v * v).sqrt()
    }

    pub fn l2_norm_rows(&self, norms: &mut Vector) {
        debug_assert_eq!(norms.len() as i64, self.m);
        for i in 0..self.m {
            norms[i as usize] = self.l2_norm_row(i);
        }
    }

    /// Divide each row by the matching norm; all-zero rows are left alone.
    pub fn divide_rows(&mut self, norms: &Vector) {
        debug_assert_eq!(norms.len() as i64, self.m);
        for i in 0..self.m {
            let norm = norms[i as usize];
            if norm != 0.0 {
                for v in self.row_mut(i) {
                    *v /= norm;
                }
            }
        }
    }

    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_i64::<LittleEndian>(self.m)?;
        out.write_i64::<LittleEndian>(self.n)?;
        for &v in &self.data {
            out.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> Result<DenseMatrix> {
        let m = input.read_i64::<LittleEndian>()?;
        let n = input.read_i64::<LittleEndian>()?;
        if m < 0 || n < 0 {
            return Err(Error::MalformedModel(format!(
                "negative matrix dimensions {m}x{n}"
            )));
        }
        let mut data = vec![0.0f32; (m * n) as usize];
        input.read_f32_into::<LittleEndian>(&mut data)?;
        Ok(DenseMatrix { m, n, data })
    }
}
