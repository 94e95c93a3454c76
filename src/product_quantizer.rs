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
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::vector::Vector;

const NBITS: usize = 8;
/// Centroids per subquantizer.
pub const KSUB: usize = 1 << NBITS;
const MAX_POINTS_PER_CLUSTER: usize = 256;
const MAX_POINTS: usize = MAX_POINTS_PER_CLUSTER * KSUB;
const SEED: u64 = 1234;
const NITER: usize = 25;
const EPS: f32 = 1e-7;

fn dist_l2(x: &[f32], y: &[f32]) -> f32 {
    x.iter()
        .zip(y)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Nearest centroid for `x` among the `KSUB` rows of `centroids`, ties to
/// the lowest index.
fn assign_centroid(x: &[f32], centroids: &[f32], d: usize) -> (u8, f32) {
    let mut code = 0u8;
    let mut dist = dist_l2(x, &centroids[..d]);
    for k in 1..KSUB {
        let dist_k = dist_l2(x, &centroids[k * d..(k + 1) * d]);
        if dist_k < dist {
            code = k as u8;
            dist = dist_k;
        }
    }
    (code, dist)
}

fn estep(x: &[f32], centroids: &[f32], codes: &mut [u8], d: usize, n: usize) {
    for i in 0..n {
        codes[i] = assign_centroid(&x[i * d..(i + 1) * d], centroids, d).0;
    }
}

fn mstep(x: &[f32], centroids: &mut [f32], codes: &[u8], d: usize, n: usize, rng: &mut StdRng) {
    let mut nelts = vec![0i64; KSUB];
    centroids.fill(0.0);
    for i in 0..n {
        let k = codes[i] as usize;
        let c = &mut centroids[k * d..(k + 1) * d];
        for (j, v) in c.iter_mut().enumerate() {
            *v += x[i * d + j];
        }
        nelts[k] += 1;
    }
    for k in 0..KSUB {
        let z = nelts[k] as f32;
        if z != 0.0 {
            for v in &mut centroids[k * d..(k + 1) * d] {
                *v /= z;
            }
        }
    }
    // reseed empty clusters from a populated one, split apart by +-EPS
    for k in 0..KSUB {
        if nelts[k] != 0 {
            continue;
        }
        let mut m = 0usize;
        loop {
            let r: f64 = rng.gen_range(0.0..1.0);
            if r * ((n - KSUB) as f64) < (nelts[m] - 1) as f64 {
                break;
            }
            m = (m + 1) % KSUB;
        }
        let clone: Vec<f32> = centroids[m * d..(m + 1) * d].to_vec();
        centroids[k * d..(k + 1) * d].copy_from_slice(&clone);
        for j in 0..d {
            let sign = if j % 2 == 1 { EPS } else { -EPS };
            centroids[k * d + j] += sign;
            centroids[m * d + j] -= sign;
        }
        nelts[k] = nelts[m] / 2;
        nelts[m] -= nelts[k];
    }
}

fn kmeans(x: &[f32], centroids: &mut [f32], n: usize, d: usize, rng: &mut StdRng) {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    for k in 0..KSUB {
        centroids[k * d..(k + 1) * d].copy_from_slice(&x[perm[k] * d..perm[k] * d + d]);
    }
    let mut codes = vec![0u8; n];
    for _ in 0..NITER {
        estep(x, centroids, &mut codes, d, n);
        mstep(x, centroids, &codes, d, n, rng);
    }
}

/// A two-level k-means codebook over `dim`-length rows.
///
/// Rows are split into `nsubq` subvectors of `dsub` scalars (the final one
/// holds `lastdsub <= dsub`), and each subvector is coded by its nearest
/// of `KSUB` centroids.
pub struct ProductQuantizer {
    dim: usize,
    nsubq: usize,
    dsub: usize,
    lastdsub: usize,
    centroids: Vec<f32>,
    rng: StdRng,
}

impl ProductQuantizer {
    pub fn new(dim: usize, dsub: usize) -> ProductQuantizer {
        let mut nsubq = dim / dsub;
        let mut lastdsub = dim % dsub;
        if lastdsub == 0 {
            lastdsub = dsub;
        } else {
            nsubq += 1;
        }
        ProductQuantizer {
            dim,
            nsubq,
            dsub,
            lastdsub,
            centroids: vec![0.0; dim * KSUB],
            rng: StdRng::seed_from_u64(SEED),
        }
    }

    pub fn nsubq(&self) -> usize {
        self.nsubq
    }

    fn subdim(&self, m: usize) -> usize {
        if m == self.nsubq - 1 {
            self.lastdsub
        } else {
            self.dsub
        }
    }

    /// Codebook entry `i` of subquantizer `m`.
    pub fn get_centroid(&self, m: usize, i: u8) -> &[f32] {
        if m == self.nsubq - 1 {
            let offset = m * KSUB * self.dsub + i as usize * self.lastdsub;
            &self.centroids[offset..offset + self.lastdsub]
        } else {
            let offset = (m * KSUB + i as usize) * self.dsub;
            &self.centroids[offset..offset + self.dsub]
        }
    }

    /// Learn the codebooks from `n` rows stored contiguously in `x`.
    pub fn train(&mut self, n: usize, x: &[f32]) -> Result<()> {
        if n < KSUB {
            return Err(Error::Config(format!(
                "matrix too small for quantization, {n} rows but at least {KSUB} are needed"
            )));
        }
        debug_assert!(x.len() >= n * self.dim);
        let mut perm: Vec<usize> = (0..n).collect();
        let np = n.min(MAX_POINTS);
        let mut xslice = vec![0.0f32; np * self.dsub];
        for m in 0..self.nsubq {
            let d = self.subdim(m);
            if np != n {
                perm.shuffle(&mut self.rng);
            }
            for j in 0..np {
                let src = perm[j] * self.dim + m * self.dsub;
                xslice[j * d..j * d + d].copy_from_slice(&x[src..src + d]);
            }
            let start = m * KSUB * self.dsub;
            kmeans(
                &xslice[..np * d],
                &mut self.centroids[start..start + KSUB * d],
                np,
                d,
                &mut self.rng,
            );
        }
        Ok(())
    }

    fn compute_code(&self, x: &[f32], code: &mut [u8]) {
        for m in 0..self.nsubq {
            let d = self.subdim(m);
            let block_start = m * KSUB * self.dsub;
            let (k, _) = assign_centroid(
                &x[m * self.dsub..m * self.dsub + d],
                &self.centroids[block_start..block_start + KSUB * d],
                d,
            );
            code[m] = k;
        }
    }

    /// Encode `n` rows of `x` into `nsubq` bytes each.
    pub fn compute_codes(&self, x: &[f32], codes: &mut [u8], n: usize) {
        debug_assert!(codes.len() >= n * self.nsubq);
        for i in 0..n {
            self.compute_code(
                &x[i * self.dim..(i + 1) * self.dim],
                &mut codes[i * self.nsubq..(i + 1) * self.nsubq],
            );
        }
    }

    /// alpha * <v, decode(codes[t])>
    pub fn mulcode(&self, v: &Vector, codes: &[u8], t: usize, alpha: f32) -> f32 {
        let mut res = 0.0;
        let code = &codes[self.nsubq * t..self.nsubq * (t + 1)];
        for m in 0..self.nsubq {
            let c = self.get_centroid(m, code[m]);
            for (j, cj) in c.iter().enumerate() {
                res += v[m * self.dsub + j] * cj;
            }
        }
        res * alpha
    }

    /// x += alpha * decode(codes[t])
    pub fn addcode(&self, x: &mut Vector, codes: &[u8], t: usize, alpha: f32) {
        let code = &codes[self.nsubq * t..self.nsubq * (t + 1)];
        for m in 0..self.nsubq {
            let c = self.get_centroid(m, code[m]);
            for (j, cj) in c.iter().enumerate() {
                x[m * self.dsub + j] += alpha * cj;
            }
        }
    }

    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.dim as i32)?;
        out.write_i32::<LittleEndian>(self.nsubq as i32)?;
        out.write_i32::<LittleEndian>(self.dsub as i32)?;
        out.write_i32::<LittleEndian>(self.lastdsub as i32)?;
        for &v in &self.centroids {
            out.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> Result<ProductQuantizer> {
        let dim = input.read_i32::<LittleEndian>()?;
        let nsubq = input.read_i32::<LittleEndian>()?;
        let dsub = input.read_i32::<LittleEndian>()?;
        let lastdsub = input.read_i32::<LittleEndian>()?;
        if dim <= 0 || dsub <= 0 {
            return Err(Error::MalformedModel(
                "invalid product quantizer dimensions".to_string(),
            ));
        }
        let mut pq = ProductQuantizer::new(dim as usize, dsub as usize);
        if pq.nsubq != nsubq as usize || pq.lastdsub != lastdsub as usize {
            return Err(Error::MalformedModel(
                "inconsistent product quantizer layout".to_string(),
            ));
        }
        input.read_f32_into::<LittleEndian>(&mut pq.centroids)?;
        Ok(pq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Standard;

    fn gaussianish(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
        // sum of uniforms, close enough to normal for these tests
        let mut rng = StdRng::seed_from_u64(seed);
        (0..rows * dim)
            .map(|_| {
                let s: f32 = (0..4).map(|_| rng.sample::<f32, _>(Standard) - 0.5).sum();
                s
            })
            .collect()
    }

    #[test]
    fn rejects_too_few_rows() {
        let mut pq = ProductQuantizer::new(8, 2);
        let x = gaussianish(KSUB - 1, 8, 1);
        assert!(pq.train(KSUB - 1, &x).is_err());
    }

    #[test]
    fn trains_with_exactly_ksub_rows() {
        let mut pq = ProductQuantizer::new(4, 2);
        let x = gaussianish(KSUB, 4, 2);
        pq.train(KSUB, &x).unwrap();
        let mut codes = vec![0u8; KSUB * pq.nsubq()];
        pq.compute_codes(&x, &mut codes, KSUB);
    }

    #[test]
    fn uneven_dim_uses_shorter_last_subquantizer() {
        let pq = ProductQuantizer::new(10, 4);
        assert_eq!(pq.nsubq(), 3);
        assert_eq!(pq.subdim(0), 4);
        assert_eq!(pq.subdim(2), 2);
    }

    #[test]
    fn mulcode_approximates_dot_product() {
        let rows = 1000;
        let dim = 32;
        let x = gaussianish(rows, dim, 3);
        let mut pq = ProductQuantizer::new(dim, 8);
        pq.train(rows, &x).unwrap();
        let mut codes = vec![0u8; rows * pq.nsubq()];
        pq.compute_codes(&x, &mut codes, rows);

        let v = Vector::from_vec(gaussianish(1, dim, 4));
        let v_norm = v.norm();
        let mut close = 0;
        let mut tight = 0;
        for i in 0..rows {
            let row = &x[i * dim..(i + 1) * dim];
            let exact: f32 = row.iter().zip(v.as_slice()).map(|(a, b)| a * b).sum();
            let approx = pq.mulcode(&v, &codes, i, 1.0);
            let row_norm: f32 = row.iter().map(|a| a * a).sum::<f32>().sqrt();
            let rel = (exact - approx).abs() / (row_norm * v_norm);
            if rel < 0.2 {
                close += 1;
            }
            if rel < 0.1 {
                tight += 1;
            }
        }
        // 8-wide subvectors quantize coarsely; most rows stay tight and
        // nearly all stay close
        assert!(close as f32 >= 0.95 * rows as f32, "only {close}/{rows} rows close");
        assert!(tight as f32 >= 0.5 * rows as f32, "only {tight}/{rows} rows tight");
    }

    #[test]
    fn addcode_reconstructs_codebook_entry() {
        let dim = 6;
        let rows = KSUB;
        let x = gaussianish(rows, dim, 5);
        let mut pq = ProductQuantizer::new(dim, 3);
        pq.train(rows, &x).unwrap();
        let mut codes = vec![0u8; rows * pq.nsubq()];
        pq.compute_codes(&x, &mut codes, rows);

        let mut rec = Vector::new(dim);
        pq.addcode(&mut rec, &codes, 0, 1.0);
        let mut expected = Vec::new();
        for m in 0..pq.nsubq() {
            expected.extend_from_slice(pq.get_centroid(m, codes[m]));
        }
        for j in 0..dim {
            assert!((rec[j] - expected[j]).abs() < 1e-6);
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dim = 8;
        let x = gaussianish(KSUB, dim, 6);
        let mut pq = ProductQuantizer::new(dim, 2);
        pq.train(KSUB, &x).unwrap();

        let mut buf = Vec::new();
        pq.save(&mut buf).unwrap();
        let loaded = ProductQuantizer::load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded.centroids, pq.centroids);
        assert_eq!(loaded.nsubq(), pq.nsubq());
    }
}
