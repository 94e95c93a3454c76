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

use std::io::BufReader;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tinytext::{Args, Engine, LossName, ModelName, TokenReader};

#[derive(Parser)]
#[command(name = "tinytext", version, about = "Shallow text representation trainer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Learn a model from a tokenized corpus
    Train(TrainCmd),
    /// Evaluate a model on a labeled file
    Test(TestCmd),
    /// Print the most likely labels for each input line
    Predict(PredictCmd),
    /// Compress a trained supervised model with product quantization
    Quantize(QuantizeCmd),
}

#[derive(clap::Args)]
struct TrainCmd {
    /// Training file path
    #[arg(long)]
    input: String,
    /// Output file path base (writes <output>.bin and <output>.vec)
    #[arg(long)]
    output: String,
    /// Learning rate
    #[arg(long, default_value_t = 0.05)]
    lr: f64,
    /// Rate of updates for the learning rate
    #[arg(long = "lrUpdateRate", default_value_t = 100)]
    lr_update_rate: i32,
    /// Size of word vectors
    #[arg(long, default_value_t = 100)]
    dim: i32,
    /// Size of the context window
    #[arg(long, default_value_t = 5)]
    ws: i32,
    /// Number of epochs
    #[arg(long, default_value_t = 5)]
    epoch: i32,
    /// Minimal number of word occurrences
    #[arg(long = "minCount", default_value_t = 5)]
    min_count: i32,
    /// Minimal number of label occurrences
    #[arg(long = "minCountLabel", default_value_t = 0)]
    min_count_label: i32,
    /// Number of negatives sampled
    #[arg(long, default_value_t = 5)]
    neg: i32,
    /// Max length of word ngram
    #[arg(long = "wordNgrams", default_value_t = 1)]
    word_ngrams: i32,
    /// Loss function
    #[arg(long, value_enum, default_value_t = LossName::Ns)]
    loss: LossName,
    /// Model architecture
    #[arg(long, value_enum, default_value_t = ModelName::Sg)]
    model: ModelName,
    /// Number of hash buckets for n-grams
    #[arg(long, default_value_t = 2_000_000)]
    bucket: i32,
    /// Min length of char ngram
    #[arg(long, default_value_t = 3)]
    minn: i32,
    /// Max length of char ngram
    #[arg(long, default_value_t = 6)]
    maxn: i32,
    /// Number of threads
    #[arg(long, default_value_t = 12)]
    thread: i32,
    /// Sampling threshold
    #[arg(long, default_value_t = 1e-4)]
    t: f64,
    /// Label prefix
    #[arg(long, default_value = "__label__")]
    label: String,
    /// Verbosity level
    #[arg(long, default_value_t = 2)]
    verbose: i32,
    /// Pretrained word vectors for the input matrix
    #[arg(long = "pretrainedVectors", default_value = "")]
    pretrained_vectors: String,
    /// Also write the output matrix to <output>.output
    #[arg(long = "saveOutput", default_value_t = false)]
    save_output: bool,
    /// Seed for the per-thread generators
    #[arg(long, default_value_t = 0)]
    seed: i32,
}

#[derive(clap::Args)]
struct TestCmd {
    /// Trained model (.bin)
    #[arg(long)]
    model: String,
    /// Labeled test file
    #[arg(long)]
    input: String,
    /// Number of predictions per example
    #[arg(short, default_value_t = 1)]
    k: i32,
    /// Minimal prediction score
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,
}

#[derive(clap::Args)]
struct PredictCmd {
    /// Trained model (.bin)
    #[arg(long)]
    model: String,
    /// Input file, or "-" for stdin
    #[arg(long, default_value = "-")]
    input: String,
    /// Number of predictions per line
    #[arg(short, default_value_t = 1)]
    k: i32,
    /// Minimal prediction score
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,
}

#[derive(clap::Args)]
struct QuantizeCmd {
    /// Trained model (.bin)
    #[arg(long)]
    model: String,
    /// Output path for the quantized model
    #[arg(long)]
    output: String,
    /// Keep only this many input rows (0 keeps all)
    #[arg(long, default_value_t = 0)]
    cutoff: u64,
    /// Subvector length for the codebooks
    #[arg(long, default_value_t = 2)]
    dsub: u64,
    /// Quantize row norms separately
    #[arg(long, default_value_t = false)]
    qnorm: bool,
    /// Quantize the output matrix too
    #[arg(long, default_value_t = false)]
    qout: bool,
    /// Fine-tune after a cutoff prune (needs the training file)
    #[arg(long, default_value_t = false)]
    retrain: bool,
    /// Epochs for retraining
    #[arg(long, default_value_t = 1)]
    epoch: i32,
    /// Learning rate for retraining
    #[arg(long, default_value_t = 0.1)]
    lr: f64,
}

fn train(cmd: TrainCmd) -> anyhow::Result<()> {
    let mut args = Args::default();
    args.input = cmd.input;
    args.output = cmd.output;
    args.lr = cmd.lr;
    args.lr_update_rate = cmd.lr_update_rate;
    args.dim = cmd.dim;
    args.ws = cmd.ws;
    args.epoch = cmd.epoch;
    args.min_count = cmd.min_count;
    args.min_count_label = cmd.min_count_label;
    args.neg = cmd.neg;
    args.word_ngrams = cmd.word_ngrams;
    args.loss = cmd.loss;
    args.model = cmd.model;
    args.bucket = cmd.bucket;
    args.minn = cmd.minn;
    args.maxn = cmd.maxn;
    args.thread = cmd.thread;
    args.t = cmd.t;
    args.label = cmd.label;
    args.verbose = cmd.verbose;
    args.pretrained_vectors = cmd.pretrained_vectors;
    args.save_output = cmd.save_output;
    args.seed = cmd.seed;

    let output = args.output.clone();
    let save_output = args.save_output;
    let engine = Engine::train(args).context("training failed")?;
    engine
        .save_model(format!("{output}.bin"))
        .context("cannot write the model file")?;
    engine
        .save_vectors(format!("{output}.vec"))
        .context("cannot write the vectors file")?;
    if save_output {
        engine
            .save_output_vectors(format!("{output}.output"))
            .context("cannot write the output vectors file")?;
    }
    Ok(())
}

fn test(cmd: TestCmd) -> anyhow::Result<()> {
    let engine = Engine::load_model(&cmd.model)
        .with_context(|| format!("cannot load model '{}'", cmd.model))?;
    let mut reader = TokenReader::open(&cmd.input, 0)
        .with_context(|| format!("cannot open test file '{}'", cmd.input))?;
    let meter = engine.test(&mut reader, cmd.k, cmd.threshold)?;
    println!("N\t{}", meter.nexamples());
    println!("P@{}\t{:.3}", cmd.k, meter.precision(-1));
    println!("R@{}\t{:.3}", cmd.k, meter.recall(-1));
    println!("F1\t{:.3}", meter.f1_score(-1));
    Ok(())
}

fn predict(cmd: PredictCmd) -> anyhow::Result<()> {
    let engine = Engine::load_model(&cmd.model)
        .with_context(|| format!("cannot load model '{}'", cmd.model))?;
    if cmd.input == "-" {
        let stdin = std::io::stdin();
        let mut reader = TokenReader::new(BufReader::new(stdin.lock()));
        predict_stream(&engine, &mut reader, cmd.k, cmd.threshold)
    } else {
        let mut reader = TokenReader::open(&cmd.input, 0)
            .with_context(|| format!("cannot open input file '{}'", cmd.input))?;
        predict_stream(&engine, &mut reader, cmd.k, cmd.threshold)
    }
}

fn predict_stream<R: std::io::BufRead>(
    engine: &Engine,
    reader: &mut TokenReader<R>,
    k: i32,
    threshold: f32,
) -> anyhow::Result<()> {
    while let Some(predictions) = engine.predict_line(reader, k, threshold)? {
        let mut first = true;
        for (score, label) in predictions {
            if !first {
                print!(" ");
            }
            print!("{label} {score:.6}");
            first = false;
        }
        println!();
    }
    Ok(())
}

fn quantize(cmd: QuantizeCmd) -> anyhow::Result<()> {
    let mut engine = Engine::load_model(&cmd.model)
        .with_context(|| format!("cannot load model '{}'", cmd.model))?;
    {
        let args = engine.args();
        anyhow::ensure!(
            !cmd.retrain || !args.input.is_empty(),
            "retraining needs the original training file"
        );
    }
    engine.set_quantize_options(cmd.cutoff, cmd.dsub, cmd.qnorm, cmd.qout, cmd.retrain);
    if cmd.retrain {
        engine.set_retrain_schedule(cmd.epoch, cmd.lr);
    }
    engine.quantize().context("quantization failed")?;
    engine
        .save_model(&cmd.output)
        .context("cannot write the quantized model")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match Cli::parse().command {
        Command::Train(cmd) => train(cmd),
        Command::Test(cmd) => test(cmd),
        Command::Predict(cmd) => predict(cmd),
        Command::Quantize(cmd) => quantize(cmd),
    }
}
