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

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::dense_matrix::DenseMatrix;
use crate::error::{Error, Result};
use crate::product_quantizer::ProductQuantizer;
use crate::vector::Vector;

/// A product-quantized matrix. Read-only: it answers dot-product and
/// row-accumulation queries through the codebooks, and training never
/// writes into it.
///
/// With `qnorm`, rows are normalized before the codebooks are trained and
/// the per-row L2 norm is coded separately by a 1x1 quantizer (one byte
/// per row), then reapplied multiplicatively on every query.
pub struct QuantMatrix {
    m: i64,
    n: i64,
    codesize: usize,
    codes: Vec<u8>,
    pq: ProductQuantizer,
    norm_pq: Option<ProductQuantizer>,
    norm_codes: Vec<u8>,
}

impl QuantMatrix {
    pub fn new(mut mat: DenseMatrix, dsub: usize, qnorm: bool) -> Result<QuantMatrix> {
        let m = mat.rows();
        let n = mat.cols();
        let rows = m as usize;
        let codesize = rows * (n as usize).div_ceil(dsub);
        let mut pq = ProductQuantizer::new(n as usize, dsub);

        let mut norm_pq = None;
        let mut norm_codes = Vec::new();
        if qnorm {
            let mut norms = Vector::new(rows);
            mat.l2_norm_rows(&mut norms);
            mat.divide_rows(&norms);
            let mut npq = ProductQuantizer::new(1, 1);
            npq.train(rows, norms.as_slice())?;
            norm_codes = vec![0u8; rows];
            npq.compute_codes(norms.as_slice(), &mut norm_codes, rows);
            norm_pq = Some(npq);
        }

        pq.train(rows, mat.data())?;
        let mut codes = vec![0u8; codesize];
        pq.compute_codes(mat.data(), &mut codes, rows);

        Ok(QuantMatrix {
            m,
            n,
            codesize,
            codes,
            pq,
            norm_pq,
            norm_codes,
        })
    }

    pub fn rows(&self) -> i64 {
        self.m
    }

    pub fn cols(&self) -> i64 {
        self.n
    }

    fn norm(&self, i: i64) -> f32 {
        match &self.norm_pq {
            Some(npq) => npq.get_centroid(0, self.norm_codes[i as usize])[0],
            None => 1.0,
        }
    }

    pub fn dot_row(&self, vec: &Vector, i: i64) -> f32 {
        debug_assert!(i >= 0 && i < self.m);
        debug_assert_eq!(vec.len() as i64, self.n);
        self.pq.mulcode(vec, &self.codes, i as usize, self.norm(i))
    }

    pub fn add_row_to_vector(&self, dst: &mut Vector, i: i64) {
        self.pq.addcode(dst, &self.codes, i as usize, self.norm(i));
    }

    pub fn add_row_to_vector_scaled(&self, dst: &mut Vector, i: i64, a: f32) {
        self.pq
            .addcode(dst, &self.codes, i as usize, a * self.norm(i));
    }

    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u8(self.norm_pq.is_some() as u8)?;
        out.write_i64::<LittleEndian>(self.m)?;
        out.write_i64::<LittleEndian>(self.n)?;
        out.write_i32::<LittleEndian>(self.pq.nsubq() as i32)?;
        out.write_i32::<LittleEndian>(self.codesize as i32)?;
        self.pq.save(out)?;
        out.write_all(&self.codes)?;
        if let Some(npq) = &self.norm_pq {
            npq.save(out)?;
            out.write_all(&self.norm_codes)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> Result<QuantMatrix> {
        let qnorm = input.read_u8()? != 0;
        let m = input.read_i64::<LittleEndian>()?;
        let n = input.read_i64::<LittleEndian>()?;
        let nsubq = input.read_i32::<LittleEndian>()?;
        let codesize = input.read_i32::<LittleEndian>()?;
        if m < 0 || n < 0 || codesize < 0 {
            return Err(Error::MalformedModel(
                "invalid quantized matrix header".to_string(),
            ));
        }
        let pq = ProductQuantizer::load(input)?;
        if pq.nsubq() != nsubq as usize {
            return Err(Error::MalformedModel(
                "code width disagrees with quantizer layout".to_string(),
            ));
        }
        let mut codes = vec![0u8; codesize as usize];
        input.read_exact(&mut codes)?;
        let mut norm_pq = None;
        let mut norm_codes = Vec::new();
        if qnorm {
            let npq = ProductQuantizer::load(input)?;
            norm_codes = vec![0u8; m as usize];
            input.read_exact(&mut norm_codes)?;
            norm_pq = Some(npq);
        }
        Ok(QuantMatrix {
            m,
            n,
            codesize: codesize as usize,
            codes,
            pq,
            norm_pq,
            norm_codes,
        })
    }
}
