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
use clap::ValueEnum;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelName {
    Cbow,
    Sg,
    Sup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LossName {
    Hs,
    Ns,
    Softmax,
    Ova,
}

impl ModelName {
    fn to_i32(self) -> i32 {
        match self {
            ModelName::Cbow => 1,
            ModelName::Sg => 2,
            ModelName::Sup => 3,
        }
    }

    fn from_i32(v: i32) -> Result<Self> {
        match v {
            1 => Ok(ModelName::Cbow),
            2 => Ok(ModelName::Sg),
            3 => Ok(ModelName::Sup),
            _ => Err(Error::MalformedModel(format!("unknown model id {v}"))),
        }
    }
}

impl LossName {
    fn to_i32(self) -> i32 {
        match self {
            LossName::Hs => 1,
            LossName::Ns => 2,
            LossName::Softmax => 3,
            LossName::Ova => 4,
        }
    }

    fn from_i32(v: i32) -> Result<Self> {
        match v {
            1 => Ok(LossName::Hs),
            2 => Ok(LossName::Ns),
            3 => Ok(LossName::Softmax),
            4 => Ok(LossName::Ova),
            _ => Err(Error::MalformedModel(format!("unknown loss id {v}"))),
        }
    }
}

/// The full recognized option set. Training, quantization and autotune
/// options travel together so a saved model carries the record whole.
#[derive(Debug, Clone)]
pub struct Args {
    pub input: String,
    pub output: String,
    pub lr: f64,
    pub lr_update_rate: i32,
    pub dim: i32,
    pub ws: i32,
    pub epoch: i32,
    pub min_count: i32,
    pub min_count_label: i32,
    pub neg: i32,
    pub word_ngrams: i32,
    pub loss: LossName,
    pub model: ModelName,
    pub bucket: i32,
    pub minn: i32,
    pub maxn: i32,
    pub thread: i32,
    pub t: f64,
    pub label: String,
    pub verbose: i32,
    pub pretrained_vectors: String,
    pub save_output: bool,
    pub seed: i32,

    pub qout: bool,
    pub retrain: bool,
    pub qnorm: bool,
    pub cutoff: u64,
    pub dsub: u64,

    pub autotune_validation_file: String,
    pub autotune_metric: String,
    pub autotune_predictions: i32,
    pub autotune_duration: i32,
    pub autotune_model_size: String,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            input: String::new(),
            output: String::new(),
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossName::Ns,
            model: ModelName::Sg,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            pretrained_vectors: String::new(),
            save_output: false,
            seed: 0,
            qout: false,
            retrain: false,
            qnorm: false,
            cutoff: 0,
            dsub: 2,
            autotune_validation_file: String::new(),
            autotune_metric: "f1".to_string(),
            autotune_predictions: 1,
            autotune_duration: 60 * 5,
            autotune_model_size: String::new(),
        }
    }
}

fn write_string<W: Write>(out: &mut W, s: &str) -> std::io::Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())
}

fn read_string<R: Read>(input: &mut R) -> Result<String> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::MalformedModel("non-UTF-8 string".to_string()))
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.minn > self.maxn {
            return Err(Error::Config(format!(
                "minn ({}) cannot exceed maxn ({})",
                self.minn, self.maxn
            )));
        }
        if self.dim <= 0 {
            return Err(Error::Config("dim must be positive".to_string()));
        }
        if self.thread <= 0 {
            return Err(Error::Config("thread must be positive".to_string()));
        }
        Ok(())
    }

    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        write_string(out, &self.input)?;
        write_string(out, &self.output)?;
        out.write_f64::<LittleEndian>(self.lr)?;
        out.write_i32::<LittleEndian>(self.lr_update_rate)?;
        out.write_i32::<LittleEndian>(self.dim)?;
        out.write_i32::<LittleEndian>(self.ws)?;
        out.write_i32::<LittleEndian>(self.epoch)?;
        out.write_i32::<LittleEndian>(self.min_count)?;
        out.write_i32::<LittleEndian>(self.min_count_label)?;
        out.write_i32::<LittleEndian>(self.neg)?;
        out.write_i32::<LittleEndian>(self.word_ngrams)?;
        out.write_i32::<LittleEndian>(self.loss.to_i32())?;
        out.write_i32::<LittleEndian>(self.model.to_i32())?;
        out.write_i32::<LittleEndian>(self.bucket)?;
        out.write_i32::<LittleEndian>(self.minn)?;
        out.write_i32::<LittleEndian>(self.maxn)?;
        out.write_i32::<LittleEndian>(self.thread)?;
        out.write_f64::<LittleEndian>(self.t)?;
        write_string(out, &self.label)?;
        out.write_i32::<LittleEndian>(self.verbose)?;
        write_string(out, &self.pretrained_vectors)?;
        out.write_u8(self.save_output as u8)?;
        out.write_i32::<LittleEndian>(self.seed)?;
        out.write_u8(self.qout as u8)?;
        out.write_u8(self.retrain as u8)?;
        out.write_u8(self.qnorm as u8)?;
        out.write_u64::<LittleEndian>(self.cutoff)?;
        out.write_u64::<LittleEndian>(self.dsub)?;
        write_string(out, &self.autotune_validation_file)?;
        write_string(out, &self.autotune_metric)?;
        out.write_i32::<LittleEndian>(self.autotune_predictions)?;
        out.write_i32::<LittleEndian>(self.autotune_duration)?;
        write_string(out, &self.autotune_model_size)
    }

    pub fn load<R: Read>(input: &mut R) -> Result<Args> {
        Ok(Args {
            input: read_string(input)?,
            output: read_string(input)?,
            lr: input.read_f64::<LittleEndian>()?,
            lr_update_rate: input.read_i32::<LittleEndian>()?,
            dim: input.read_i32::<LittleEndian>()?,
            ws: input.read_i32::<LittleEndian>()?,
            epoch: input.read_i32::<LittleEndian>()?,
            min_count: input.read_i32::<LittleEndian>()?,
            min_count_label: input.read_i32::<LittleEndian>()?,
            neg: input.read_i32::<LittleEndian>()?,
            word_ngrams: input.read_i32::<LittleEndian>()?,
            loss: LossName::from_i32(input.read_i32::<LittleEndian>()?)?,
            model: ModelName::from_i32(input.read_i32::<LittleEndian>()?)?,
            bucket: input.read_i32::<LittleEndian>()?,
            minn: input.read_i32::<LittleEndian>()?,
            maxn: input.read_i32::<LittleEndian>()?,
            thread: input.read_i32::<LittleEndian>()?,
            t: input.read_f64::<LittleEndian>()?,
            label: read_string(input)?,
            verbose: input.read_i32::<LittleEndian>()?,
            pretrained_vectors: read_string(input)?,
            save_output: input.read_u8()? != 0,
            seed: input.read_i32::<LittleEndian>()?,
            qout: input.read_u8()? != 0,
            retrain: input.read_u8()? != 0,
            qnorm: input.read_u8()? != 0,
            cutoff: input.read_u64::<LittleEndian>()?,
            dsub: input.read_u64::<LittleEndian>()?,
            autotune_validation_file: read_string(input)?,
            autotune_metric: read_string(input)?,
            autotune_predictions: input.read_i32::<LittleEndian>()?,
            autotune_duration: input.read_i32::<LittleEndian>()?,
            autotune_model_size: read_string(input)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::default();
        assert_eq!(args.lr, 0.05);
        assert_eq!(args.dim, 100);
        assert_eq!(args.bucket, 2_000_000);
        assert_eq!(args.label, "__label__");
        assert_eq!(args.loss, LossName::Ns);
        assert_eq!(args.model, ModelName::Sg);
        assert_eq!(args.dsub, 2);
    }

    #[test]
    fn round_trips_through_binary_form() {
        let mut args = Args::default();
        args.input = "corpus.txt".to_string();
        args.loss = LossName::Softmax;
        args.model = ModelName::Sup;
        args.minn = 2;
        args.maxn = 5;
        args.qnorm = true;
        args.cutoff = 50_000;

        let mut buf = Vec::new();
        args.save(&mut buf).unwrap();
        let loaded = Args::load(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.input, "corpus.txt");
        assert_eq!(loaded.loss, LossName::Softmax);
        assert_eq!(loaded.model, ModelName::Sup);
        assert_eq!(loaded.minn, 2);
        assert_eq!(loaded.maxn, 5);
        assert!(loaded.qnorm);
        assert_eq!(loaded.cutoff, 50_000);
    }

    #[test]
    fn rejects_inverted_ngram_range() {
        let mut args = Args::default();
        args.minn = 7;
        args.maxn = 3;
        assert!(args.validate().is_err());
    }
}
