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

use std::cmp::Ordering as CmpOrdering;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

use crate::args::{Args, LossName, ModelName};
use crate::dense_matrix::DenseMatrix;
use crate::dictionary::{Dictionary, EntryKind};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::matrix::Matrix;
use crate::meter::Meter;
use crate::model::{Model, State};
use crate::predictions::Predictions;
use crate::quant_matrix::QuantMatrix;
use crate::tokenizer::{EOS, TokenReader};
use crate::vector::Vector;

const MODEL_MAGIC: i32 = 0x2F42_5F17;
const MODEL_VERSION: i32 = 1;

/// The training/inference driver: owns the dictionary, both matrices and
/// the model, fans training out over threads, and moves everything to and
/// from disk.
pub struct Engine {
    args: Args,
    dict: Dictionary,
    input: Arc<Matrix>,
    output: Arc<Matrix>,
    model: Model,
    quantized: bool,
    token_count: AtomicI64,
    avg_loss: AtomicU32,
    stop: AtomicBool,
}

impl Engine {
    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn is_quantized(&self) -> bool {
        self.quantized
    }

    /// Workers check this flag between lines; set it to cancel training.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn target_counts(args: &Args, dict: &Dictionary) -> Vec<i64> {
        if args.model == ModelName::Sup {
            dict.get_counts(EntryKind::Label)
        } else {
            dict.get_counts(EntryKind::Word)
        }
    }

    fn build_loss(args: &Args, counts: &[i64], wo: Arc<Matrix>) -> Result<Loss> {
        match args.loss {
            LossName::Hs | LossName::Ns if counts.is_empty() => Err(Error::Config(
                "hs and ns losses need at least one target class".to_string(),
            )),
            LossName::Hs => Ok(Loss::hierarchical_softmax(wo, counts)),
            LossName::Ns => Ok(Loss::negative_sampling(wo, args.neg, counts)),
            LossName::Softmax => Ok(Loss::softmax(wo)),
            LossName::Ova => Ok(Loss::one_vs_all(wo)),
        }
    }

    fn make_model(
        args: &Args,
        dict: &Dictionary,
        input: Arc<Matrix>,
        output: Arc<Matrix>,
        aux_counts: Option<Vec<i64>>,
    ) -> Result<Model> {
        let counts = match aux_counts {
            Some(counts) if !counts.is_empty() => counts,
            _ => Self::target_counts(args, dict),
        };
        let loss = Self::build_loss(args, &counts, output.clone())?;
        let normalize = args.model == ModelName::Sup;
        Ok(Model::new(input, output, loss, normalize))
    }

    /// Build the vocabulary and matrices from `args.input` and run the
    /// training threads to completion.
    pub fn train(args: Args) -> Result<Engine> {
        args.validate()?;
        let mut dict = Dictionary::new(args.clone());
        {
            let mut reader = TokenReader::open(&args.input, 0)?;
            dict.read_from(&mut reader)?;
        }
        let input = if args.pretrained_vectors.is_empty() {
            let mut mat = DenseMatrix::new((dict.nwords() + args.bucket) as i64, args.dim as i64);
            mat.uniform(1.0 / args.dim as f32, args.seed as u64);
            mat
        } else {
            Self::load_pretrained(&mut dict, &args)?
        };
        let output_rows = if args.model == ModelName::Sup {
            dict.nlabels()
        } else {
            dict.nwords()
        };
        let input = Arc::new(Matrix::Dense(input));
        let output = Arc::new(Matrix::Dense(DenseMatrix::new(
            output_rows as i64,
            args.dim as i64,
        )));
        let model = Self::make_model(&args, &dict, input.clone(), output.clone(), None)?;
        let engine = Engine {
            args,
            dict,
            input,
            output,
            model,
            quantized: false,
            token_count: AtomicI64::new(0),
            avg_loss: AtomicU32::new(0.0f32.to_bits()),
            stop: AtomicBool::new(false),
        };
        engine.start_threads()?;
        Ok(engine)
    }

    /// Text matrix in `word v0 .. v{dim-1}` form; words are added to the
    /// dictionary and their rows seed the input matrix.
    fn load_pretrained(dict: &mut Dictionary, args: &Args) -> Result<DenseMatrix> {
        let file = BufReader::new(File::open(&args.pretrained_vectors)?);
        let mut lines = file.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Config("empty pretrained vectors file".to_string()))??;
        let mut parts = header.split_whitespace();
        let n: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Config("malformed pretrained vectors header".to_string()))?;
        let dim: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Config("malformed pretrained vectors header".to_string()))?;
        if dim as i32 != args.dim {
            return Err(Error::Config(format!(
                "pretrained vectors have dimension {dim}, expected {}",
                args.dim
            )));
        }
        let mut mat = DenseMatrix::new(n as i64, dim as i64);
        let mut words = Vec::with_capacity(n);
        for i in 0..n {
            let line = lines
                .next()
                .ok_or_else(|| Error::Config("truncated pretrained vectors file".to_string()))??;
            let mut parts = line.split_whitespace();
            let word = parts
                .next()
                .ok_or_else(|| Error::Config("malformed pretrained vectors line".to_string()))?
                .to_string();
            let row = mat.row_mut(i as i64);
            for slot in row.iter_mut().take(dim) {
                *slot = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| {
                    Error::Config(format!("malformed pretrained vector for '{word}'"))
                })?;
            }
            dict.add(&word);
            words.push(word);
        }
        dict.threshold(1, 0);
        dict.init();
        let mut input = DenseMatrix::new((dict.nwords() + args.bucket) as i64, args.dim as i64);
        input.uniform(1.0 / args.dim as f32, args.seed as u64);
        for (i, word) in words.iter().enumerate() {
            let idx = dict.get_id(word);
            if idx < 0 || idx >= dict.nwords() {
                continue;
            }
            input.row_mut(idx as i64).copy_from_slice(mat.row(i as i64));
        }
        Ok(input)
    }

    fn keep_training(&self, total: i64) -> bool {
        self.token_count.load(Ordering::Relaxed) < total && !self.stop.load(Ordering::Relaxed)
    }

    fn start_threads(&self) -> Result<()> {
        self.token_count.store(0, Ordering::Relaxed);
        self.stop.store(false, Ordering::Relaxed);
        let file_size = std::fs::metadata(&self.args.input)?.len();
        let start = Instant::now();
        let total = (self.args.epoch as i64 * self.dict.ntokens()).max(1);
        let result: Result<()> = thread::scope(|scope| {
            let mut handles = Vec::new();
            for thread_id in 0..self.args.thread {
                handles.push(scope.spawn(move || self.train_thread(thread_id, file_size)));
            }
            while self.keep_training(total) {
                thread::sleep(Duration::from_millis(100));
                if self.args.verbose > 1 {
                    self.print_progress(&start, total);
                }
            }
            for handle in handles {
                handle.join().expect("training thread panicked")?;
            }
            Ok(())
        });
        if self.args.verbose > 1 {
            self.print_progress(&start, total);
            eprintln!();
        }
        result
    }

    fn print_progress(&self, start: &Instant, total: i64) {
        let count = self.token_count.load(Ordering::Relaxed).min(total);
        let progress = count as f64 / total as f64;
        let elapsed = start.elapsed().as_secs_f64().max(1e-9);
        let wst = count as f64 / 1000.0 / elapsed / self.args.thread as f64;
        let lr = self.args.lr * (1.0 - progress);
        let loss = f32::from_bits(self.avg_loss.load(Ordering::Relaxed));
        eprint!(
            "\rProgress: {:6.2}% words/sec/thread: {:8.2}k lr: {:9.6} avg.loss: {:9.6}",
            progress * 100.0,
            wst,
            lr,
            loss
        );
        let _ = std::io::stderr().flush();
    }

    fn train_thread(&self, thread_id: i32, file_size: u64) -> Result<()> {
        let result = self.train_thread_inner(thread_id, file_size);
        if result.is_err() {
            // wake the siblings so nobody spins on a dead run
            self.stop.store(true, Ordering::Relaxed);
        }
        result
    }

    fn train_thread_inner(&self, thread_id: i32, file_size: u64) -> Result<()> {
        let offset = file_size / self.args.thread as u64 * thread_id as u64;
        let mut reader = TokenReader::open(&self.args.input, offset)?;
        let mut state = State::new(
            self.args.dim as usize,
            self.output.rows() as usize,
            (self.args.seed + thread_id) as u64,
        );
        let total = (self.args.epoch as i64 * self.dict.ntokens()).max(1);
        let mut local_token_count: i64 = 0;
        let mut line: Vec<i32> = Vec::new();
        let mut labels: Vec<i32> = Vec::new();
        while self.keep_training(total) {
            let progress = self.token_count.load(Ordering::Relaxed) as f64 / total as f64;
            let lr = (self.args.lr * (1.0 - progress)) as f32;
            if reader.at_eof() {
                reader.seek_to(0)?;
            }
            match self.args.model {
                ModelName::Sup => {
                    local_token_count +=
                        self.dict.get_line(&mut reader, &mut line, &mut labels)? as i64;
                    self.supervised(&mut state, lr, &line, &labels);
                }
                ModelName::Cbow => {
                    local_token_count +=
                        self.dict
                            .get_line_sampled(&mut reader, &mut line, &mut state.rng)?
                            as i64;
                    self.cbow(&mut state, lr, &line);
                }
                ModelName::Sg => {
                    local_token_count +=
                        self.dict
                            .get_line_sampled(&mut reader, &mut line, &mut state.rng)?
                            as i64;
                    self.skipgram(&mut state, lr, &line);
                }
            }
            if local_token_count > self.args.lr_update_rate as i64 {
                self.token_count
                    .fetch_add(local_token_count, Ordering::Relaxed);
                local_token_count = 0;
                if thread_id == 0 {
                    self.avg_loss
                        .store((state.loss() as f32).to_bits(), Ordering::Relaxed);
                }
            }
        }
        self.token_count
            .fetch_add(local_token_count, Ordering::Relaxed);
        if thread_id == 0 {
            self.avg_loss
                .store((state.loss() as f32).to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn supervised(&self, state: &mut State, lr: f32, line: &[i32], labels: &[i32]) {
        if labels.is_empty() || line.is_empty() {
            return;
        }
        let target_index = match self.args.loss {
            LossName::Ova => crate::model::ALL_LABELS_AS_TARGET,
            _ => state.rng.gen_range(0..labels.len()) as i32,
        };
        self.model.update(line, labels, target_index, lr, state);
    }

    fn cbow(&self, state: &mut State, lr: f32, line: &[i32]) {
        let mut bow: Vec<i32> = Vec::new();
        for w in 0..line.len() {
            let boundary = state.rng.gen_range(1..=self.args.ws) as isize;
            bow.clear();
            for c in -boundary..=boundary {
                let pos = w as isize + c;
                if c != 0 && pos >= 0 && pos < line.len() as isize {
                    bow.extend_from_slice(self.dict.get_subwords(line[pos as usize]));
                }
            }
            self.model.update(&bow, line, w as i32, lr, state);
        }
    }

    fn skipgram(&self, state: &mut State, lr: f32, line: &[i32]) {
        for w in 0..line.len() {
            let boundary = state.rng.gen_range(1..=self.args.ws) as isize;
            for c in -boundary..=boundary {
                let pos = w as isize + c;
                if c != 0 && pos >= 0 && pos < line.len() as isize {
                    let subwords = self.dict.get_subwords(line[w]);
                    self.model.update(subwords, line, pos as i32, lr, state);
                }
            }
        }
    }

    /// Stream a labeled file and accumulate precision/recall per label.
    pub fn test<R: BufRead>(
        &self,
        reader: &mut TokenReader<R>,
        k: i32,
        threshold: f32,
    ) -> Result<Meter> {
        let mut meter = Meter::new();
        let mut state = State::new(self.args.dim as usize, self.output.rows() as usize, 0);
        let mut line = Vec::new();
        let mut labels = Vec::new();
        let mut predictions = Predictions::new();
        loop {
            let ntokens = self.dict.get_line(reader, &mut line, &mut labels)?;
            if ntokens == 0 && reader.at_eof() {
                break;
            }
            if labels.is_empty() || line.is_empty() {
                continue;
            }
            self.model
                .predict(&line, k, threshold, &mut predictions, &mut state)?;
            meter.log(&labels, predictions.as_slice());
        }
        Ok(meter)
    }

    /// Predict the next line of `reader`. `None` at end of stream; an
    /// empty vector for lines with nothing the model knows.
    pub fn predict_line<R: BufRead>(
        &self,
        reader: &mut TokenReader<R>,
        k: i32,
        threshold: f32,
    ) -> Result<Option<Vec<(f32, String)>>> {
        let mut line = Vec::new();
        let mut labels = Vec::new();
        let ntokens = self.dict.get_line(reader, &mut line, &mut labels)?;
        if ntokens == 0 && reader.at_eof() {
            return Ok(None);
        }
        if line.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let mut state = State::new(self.args.dim as usize, self.output.rows() as usize, 0);
        let mut predictions = Predictions::new();
        self.model
            .predict(&line, k, threshold, &mut predictions, &mut state)?;
        let mut out = Vec::with_capacity(predictions.len());
        for p in predictions.iter() {
            out.push((p.score, self.dict.get_label(p.label)?.to_string()));
        }
        Ok(Some(out))
    }

    /// Average of a word's subword rows; OOV words fall back to their
    /// bucketed n-grams.
    pub fn word_vector(&self, word: &str) -> Vector {
        let mut vec = Vector::new(self.args.dim as usize);
        let ngrams = self.dict.subwords_of_token(word);
        for &id in &ngrams {
            vec.add_row(&self.input, id as i64);
        }
        if !ngrams.is_empty() {
            vec.mul(1.0 / ngrams.len() as f32);
        }
        vec
    }

    /// Average of one line's ids.
    pub fn text_vector<R: BufRead>(&self, reader: &mut TokenReader<R>) -> Result<Vector> {
        let mut line = Vec::new();
        let mut labels = Vec::new();
        self.dict.get_line(reader, &mut line, &mut labels)?;
        let mut vec = Vector::new(self.args.dim as usize);
        for &id in &line {
            vec.add_row(&self.input, id as i64);
        }
        if !line.is_empty() {
            vec.mul(1.0 / line.len() as f32);
        }
        Ok(vec)
    }

    /// Input rows ranked by norm, `</s>` pinned first, truncated to
    /// `cutoff`.
    fn select_embeddings(&self, input: &DenseMatrix, cutoff: usize) -> Vec<i32> {
        let mut norms = Vector::new(input.rows() as usize);
        input.l2_norm_rows(&mut norms);
        let eos_id = self.dict.get_id(EOS);
        let mut idx: Vec<i32> = (0..input.rows() as i32).collect();
        idx.sort_by(|&i1, &i2| {
            if i1 == eos_id {
                CmpOrdering::Less
            } else if i2 == eos_id {
                CmpOrdering::Greater
            } else {
                norms[i2 as usize]
                    .partial_cmp(&norms[i1 as usize])
                    .unwrap_or(CmpOrdering::Equal)
            }
        });
        idx.truncate(cutoff);
        idx
    }

    pub fn set_quantize_options(
        &mut self,
        cutoff: u64,
        dsub: u64,
        qnorm: bool,
        qout: bool,
        retrain: bool,
    ) {
        self.args.cutoff = cutoff;
        self.args.dsub = dsub;
        self.args.qnorm = qnorm;
        self.args.qout = qout;
        self.args.retrain = retrain;
    }

    pub fn set_retrain_schedule(&mut self, epoch: i32, lr: f64) {
        self.args.epoch = epoch;
        self.args.lr = lr;
    }

    /// Compress the input matrix (and optionally the output matrix) with
    /// product quantization, per the `cutoff`/`dsub`/`qnorm`/`qout`/
    /// `retrain` settings already in `args`.
    pub fn quantize(&mut self) -> Result<()> {
        if self.args.model != ModelName::Sup {
            return Err(Error::Config(
                "quantization only applies to supervised models".to_string(),
            ));
        }
        if self.quantized {
            return Err(Error::Config("the model is already quantized".to_string()));
        }
        let mut dense = self
            .input
            .as_dense()
            .expect("unquantized model carries a dense input matrix")
            .clone();
        let cutoff = self.args.cutoff as i64;
        if cutoff > 0 && cutoff < dense.rows() {
            let mut idx = self.select_embeddings(&dense, cutoff as usize);
            self.dict.prune(&mut idx);
            let mut pruned = DenseMatrix::new(idx.len() as i64, self.args.dim as i64);
            for (i, &row) in idx.iter().enumerate() {
                pruned
                    .row_mut(i as i64)
                    .copy_from_slice(dense.row(row as i64));
            }
            dense = pruned;
            self.input = Arc::new(Matrix::Dense(dense.clone()));
            self.model = Self::make_model(
                &self.args,
                &self.dict,
                self.input.clone(),
                self.output.clone(),
                None,
            )?;
            if self.args.retrain {
                self.start_threads()?;
                dense = self
                    .input
                    .as_dense()
                    .expect("retraining keeps the input matrix dense")
                    .clone();
            }
        }
        self.input = Arc::new(Matrix::Quant(QuantMatrix::new(
            dense,
            self.args.dsub as usize,
            self.args.qnorm,
        )?));
        if self.args.qout {
            let odense = self
                .output
                .as_dense()
                .expect("unquantized model carries a dense output matrix")
                .clone();
            self.output = Arc::new(Matrix::Quant(QuantMatrix::new(odense, 2, self.args.qnorm)?));
        }
        self.quantized = true;
        self.model = Self::make_model(
            &self.args,
            &self.dict,
            self.input.clone(),
            self.output.clone(),
            None,
        )?;
        Ok(())
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_i32::<LittleEndian>(MODEL_MAGIC)?;
        out.write_i32::<LittleEndian>(MODEL_VERSION)?;
        self.args.save(&mut out)?;
        self.dict.save(&mut out)?;
        self.input.save(&mut out)?;
        self.output.save(&mut out)?;
        // ns and hs rebuild their sampling table / tree from these counts
        let counts = match self.args.loss {
            LossName::Ns | LossName::Hs => Self::target_counts(&self.args, &self.dict),
            LossName::Softmax | LossName::Ova => Vec::new(),
        };
        out.write_i64::<LittleEndian>(counts.len() as i64)?;
        for c in counts {
            out.write_i64::<LittleEndian>(c)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Engine> {
        let mut reader = BufReader::new(File::open(path)?);
        match Self::load_model_from(&mut reader) {
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                Error::MalformedModel("truncated model file".to_string()),
            ),
            other => other,
        }
    }

    fn load_model_from<R: BufRead>(reader: &mut R) -> Result<Engine> {
        let magic = reader.read_i32::<LittleEndian>()?;
        if magic != MODEL_MAGIC {
            return Err(Error::MalformedModel("bad magic number".to_string()));
        }
        let version = reader.read_i32::<LittleEndian>()?;
        if version != MODEL_VERSION {
            return Err(Error::MalformedModel(format!(
                "unsupported model version {version}"
            )));
        }
        let args = Args::load(reader)?;
        let dict = Dictionary::load(args.clone(), reader)?;
        let input = Arc::new(Matrix::load(reader)?);
        let output = Arc::new(Matrix::load(reader)?);
        let ncounts = reader.read_i64::<LittleEndian>()?;
        if ncounts < 0 {
            return Err(Error::MalformedModel("negative count block".to_string()));
        }
        let mut counts = Vec::with_capacity(ncounts as usize);
        for _ in 0..ncounts {
            counts.push(reader.read_i64::<LittleEndian>()?);
        }
        let quantized = input.is_quantized();
        let model = Self::make_model(&args, &dict, input.clone(), output.clone(), Some(counts))?;
        Ok(Engine {
            args,
            dict,
            input,
            output,
            model,
            quantized,
            token_count: AtomicI64::new(0),
            avg_loss: AtomicU32::new(0.0f32.to_bits()),
            stop: AtomicBool::new(false),
        })
    }

    /// Word vectors in whitespace text form, one word per line.
    pub fn save_vectors<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{} {}", self.dict.nwords(), self.args.dim)?;
        for id in 0..self.dict.nwords() {
            let word = self.dict.get_word(id);
            let vec = self.word_vector(word);
            write!(out, "{word}")?;
            for v in vec.as_slice() {
                write!(out, " {v:.5}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Output-matrix rows in the same text form, named by label (sup) or
    /// word.
    pub fn save_output_vectors<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let output = self.output.as_dense().ok_or_else(|| {
            Error::Config("cannot dump a quantized output matrix as text".to_string())
        })?;
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{} {}", output.rows(), self.args.dim)?;
        for i in 0..output.rows() {
            let name = if self.args.model == ModelName::Sup {
                self.dict.get_label(i as i32)?
            } else {
                self.dict.get_word(i as i32)
            };
            write!(out, "{name}")?;
            for v in output.row(i) {
                write!(out, " {v:.5}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eos_row_is_ranked_first_for_the_cutoff() {
        let mut args = Args::default();
        args.min_count = 1;
        args.min_count_label = 1;
        args.bucket = 100;
        args.model = ModelName::Sup;
        let mut dict = Dictionary::new(args.clone());
        for token in ["big", "small", EOS] {
            dict.add(token);
        }
        dict.threshold(1, 1);
        dict.init();

        let mut input = DenseMatrix::new((dict.nwords() + args.bucket) as i64, 4);
        input.uniform(1.0, 17);
        let output = Arc::new(Matrix::Dense(DenseMatrix::new(0, 4)));
        let input_arc = Arc::new(Matrix::Dense(input.clone()));
        let engine = Engine {
            model: Engine::make_model(
                &{
                    let mut a = args.clone();
                    a.loss = LossName::Softmax;
                    a
                },
                &dict,
                input_arc.clone(),
                output.clone(),
                None,
            )
            .unwrap(),
            args,
            dict,
            input: input_arc,
            output,
            quantized: false,
            token_count: AtomicI64::new(0),
            avg_loss: AtomicU32::new(0.0f32.to_bits()),
            stop: AtomicBool::new(false),
        };
        let eos_id = engine.dict.get_id(EOS);
        let idx = engine.select_embeddings(&input, 5);
        assert_eq!(idx[0], eos_id);
        assert_eq!(idx.len(), 5);
    }
}
