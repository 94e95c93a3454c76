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

use std::fs;
use std::io::Cursor;
use std::path::Path;

use tinytext::{Args, Engine, Error, LossName, ModelName, TokenReader};

const TINY_CORPUS: &str = "__label__cat the quick brown fox\n__label__dog lazy dog sleeps\n";

fn write_corpus(dir: &Path, text: &str) -> String {
    let path = dir.join("corpus.txt");
    fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_string()
}

fn supervised_args(input: String) -> Args {
    let mut args = Args::default();
    args.input = input;
    args.model = ModelName::Sup;
    args.loss = LossName::Softmax;
    args.min_count = 1;
    args.min_count_label = 1;
    args.dim = 10;
    args.epoch = 5;
    args.lr = 0.1;
    args.bucket = 1_000;
    args.thread = 1;
    args.verbose = 0;
    args
}

fn line_reader(text: &str) -> TokenReader<Cursor<Vec<u8>>> {
    TokenReader::new(Cursor::new(text.as_bytes().to_vec()))
}

#[test]
fn tiny_supervised_learns_the_training_labels() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), TINY_CORPUS);
    let engine = Engine::train(supervised_args(input)).unwrap();

    assert_eq!(engine.dict().nwords(), 8);
    assert_eq!(engine.dict().nlabels(), 2);

    let mut reader = line_reader("the quick fox\n");
    let predictions = engine.predict_line(&mut reader, 1, 0.0).unwrap().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].1, "__label__cat");

    let mut reader = line_reader("lazy dog sleeps\n");
    let predictions = engine.predict_line(&mut reader, 1, 0.0).unwrap().unwrap();
    assert_eq!(predictions[0].1, "__label__dog");
}

#[test]
fn test_meter_counts_examples_and_hits() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), TINY_CORPUS);
    let engine = Engine::train(supervised_args(input)).unwrap();

    let mut reader = line_reader(TINY_CORPUS);
    let meter = engine.test(&mut reader, 1, 0.0).unwrap();
    assert_eq!(meter.nexamples(), 2);
    assert!(meter.precision(-1) >= 0.5);
    assert!(!meter.f1_score(-1).is_nan());
}

#[test]
fn saved_model_reloads_with_bitwise_identical_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), TINY_CORPUS);
    let engine = Engine::train(supervised_args(input)).unwrap();
    let model_path = dir.path().join("model.bin");
    engine.save_model(&model_path).unwrap();

    let loaded = Engine::load_model(&model_path).unwrap();
    for query in ["the quick fox\n", "lazy dog sleeps\n", "brown cat\n"] {
        let mut r1 = line_reader(query);
        let mut r2 = line_reader(query);
        let original = engine.predict_line(&mut r1, 2, 0.0).unwrap().unwrap();
        let reloaded = loaded.predict_line(&mut r2, 2, 0.0).unwrap().unwrap();
        assert_eq!(original.len(), reloaded.len());
        for (a, b) in original.iter().zip(&reloaded) {
            assert_eq!(a.0.to_bits(), b.0.to_bits(), "scores drifted for {query:?}");
            assert_eq!(a.1, b.1);
        }
    }
}

#[test]
fn quantized_model_still_predicts_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), TINY_CORPUS);
    let mut engine = Engine::train(supervised_args(input)).unwrap();

    engine.set_quantize_options(0, 2, false, false, false);
    engine.quantize().unwrap();
    assert!(engine.is_quantized());

    let mut reader = line_reader("the quick fox\n");
    let predictions = engine.predict_line(&mut reader, 1, 0.0).unwrap().unwrap();
    assert_eq!(predictions.len(), 1);

    let model_path = dir.path().join("model.ftz");
    engine.save_model(&model_path).unwrap();
    let loaded = Engine::load_model(&model_path).unwrap();
    assert!(loaded.is_quantized());
    let mut r1 = line_reader("the quick fox\n");
    let mut r2 = line_reader("the quick fox\n");
    let original = engine.predict_line(&mut r1, 1, 0.0).unwrap().unwrap();
    let reloaded = loaded.predict_line(&mut r2, 1, 0.0).unwrap().unwrap();
    assert_eq!(original[0].0.to_bits(), reloaded[0].0.to_bits());
    assert_eq!(original[0].1, reloaded[0].1);
}

#[test]
fn quantize_with_cutoff_prunes_and_keeps_working() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), TINY_CORPUS);
    let mut engine = Engine::train(supervised_args(input)).unwrap();

    engine.set_quantize_options(300, 2, true, false, false);
    engine.quantize().unwrap();

    let mut reader = line_reader("the quick fox\n");
    let predictions = engine.predict_line(&mut reader, 1, 0.0).unwrap().unwrap();
    assert_eq!(predictions.len(), 1);
}

#[test]
fn quantize_rejects_unsupervised_models() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), "one two three four five six seven\n");
    let mut args = supervised_args(input);
    args.model = ModelName::Sg;
    args.loss = LossName::Ns;
    args.epoch = 1;
    let mut engine = Engine::train(args).unwrap();
    assert!(matches!(engine.quantize(), Err(Error::Config(_))));
}

#[test]
fn empty_corpus_is_an_empty_vocabulary_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_corpus(dir.path(), "");
    let args = supervised_args(input);
    assert!(matches!(
        Engine::train(args),
        Err(Error::EmptyVocabulary)
    ));
}

#[test]
fn garbage_model_file_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.bin");
    fs::write(&path, b"definitely not a model").unwrap();
    assert!(matches!(
        Engine::load_model(&path),
        Err(Error::MalformedModel(_))
    ));
}

#[test]
fn skipgram_trains_and_produces_word_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "the cat sat on the mat\nthe dog sat on the rug\n".repeat(20);
    let input = write_corpus(dir.path(), &corpus);
    let mut args = Args::default();
    args.input = input;
    args.model = ModelName::Sg;
    args.loss = LossName::Ns;
    args.min_count = 1;
    args.dim = 8;
    args.epoch = 1;
    args.neg = 2;
    args.bucket = 100;
    args.thread = 2;
    args.verbose = 0;
    let engine = Engine::train(args).unwrap();

    let vec = engine.word_vector("cat");
    assert_eq!(vec.len(), 8);
    assert!(vec.as_slice().iter().all(|v| v.is_finite()));
    // out-of-vocabulary words pool their subword buckets
    let oov = engine.word_vector("catlike");
    assert!(oov.as_slice().iter().any(|v| *v != 0.0));

    let vectors_path = dir.path().join("model.vec");
    engine.save_vectors(&vectors_path).unwrap();
    let text = fs::read_to_string(&vectors_path).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        format!("{} {}", engine.dict().nwords(), engine.args().dim)
    );
}

#[test]
fn cbow_trains_with_hierarchical_softmax() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "alpha beta gamma delta epsilon zeta\n".repeat(10);
    let input = write_corpus(dir.path(), &corpus);
    let mut args = Args::default();
    args.input = input;
    args.model = ModelName::Cbow;
    args.loss = LossName::Hs;
    args.min_count = 1;
    args.dim = 6;
    args.epoch = 1;
    args.bucket = 100;
    args.thread = 1;
    args.verbose = 0;
    let engine = Engine::train(args).unwrap();
    let vec = engine.word_vector("gamma");
    assert!(vec.as_slice().iter().all(|v| v.is_finite()));
}

#[test]
fn one_vs_all_supervised_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "__label__a __label__b red green\n__label__c blue yellow\n".repeat(5);
    let input = write_corpus(dir.path(), &corpus);
    let mut args = supervised_args(input);
    args.loss = LossName::Ova;
    let engine = Engine::train(args).unwrap();
    let mut reader = line_reader("red green\n");
    let predictions = engine.predict_line(&mut reader, 3, 0.0).unwrap().unwrap();
    assert!(!predictions.is_empty());
}
