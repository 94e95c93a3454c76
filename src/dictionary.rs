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

use std::collections::HashMap;
use std::io::{BufRead, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;
use rand::distributions::Uniform;

use crate::args::{Args, ModelName};
use crate::error::{Error, Result};
use crate::tokenizer::{EOS, TokenReader};

pub const MAX_VOCAB_SIZE: usize = 30_000_000;
pub const MAX_LINE_SIZE: usize = 1024;

const BOW: char = '<';
const EOW: char = '>';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    Word = 0,
    Label = 1,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub word: String,
    pub count: i64,
    pub kind: EntryKind,
    pub subwords: Vec<i32>,
}

/// The vocabulary: an insertion-ordered entry list plus a fixed-capacity
/// open-addressing table mapping surface forms to entry indices. The table
/// never rehashes; after every threshold pass it is rebuilt from scratch.
pub struct Dictionary {
    args: Args,
    word2int: Vec<i32>,
    words: Vec<Entry>,
    pdiscard: Vec<f32>,
    nwords: i32,
    nlabels: i32,
    ntokens: i64,
    // None until quantization prunes n-gram buckets
    pruneidx: Option<HashMap<i32, i32>>,
}

impl Dictionary {
    pub fn new(args: Args) -> Dictionary {
        Dictionary {
            args,
            word2int: vec![-1; MAX_VOCAB_SIZE],
            words: Vec::new(),
            pdiscard: Vec::new(),
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            pruneidx: None,
        }
    }

    pub fn nwords(&self) -> i32 {
        self.nwords
    }

    pub fn nlabels(&self) -> i32 {
        self.nlabels
    }

    pub fn ntokens(&self) -> i64 {
        self.ntokens
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// FNV-1a over the raw bytes; bucket ids depend on these exact
    /// constants, sign-extension included.
    pub fn hash_bytes(bytes: &[u8]) -> u32 {
        let mut h: u32 = 2_166_136_261;
        for &b in bytes {
            h ^= b as i8 as u32;
            h = h.wrapping_mul(16_777_619);
        }
        h
    }

    pub fn hash(word: &str) -> u32 {
        Self::hash_bytes(word.as_bytes())
    }

    /// Probe slot for `w`: either its current slot or the empty slot where
    /// it would be inserted.
    fn find(&self, w: &str) -> usize {
        self.find_with_hash(w, Self::hash(w))
    }

    fn find_with_hash(&self, w: &str, h: u32) -> usize {
        let size = self.word2int.len();
        let mut id = h as usize % size;
        while self.word2int[id] != -1 && self.words[self.word2int[id] as usize].word != w {
            id = (id + 1) % size;
        }
        id
    }

    fn kind_of_token(&self, w: &str) -> EntryKind {
        if w.starts_with(&self.args.label) {
            EntryKind::Label
        } else {
            EntryKind::Word
        }
    }

    pub fn kind(&self, id: i32) -> EntryKind {
        debug_assert!(id >= 0 && (id as usize) < self.words.len());
        self.words[id as usize].kind
    }

    pub fn get_id(&self, w: &str) -> i32 {
        self.word2int[self.find(w)]
    }

    fn get_id_with_hash(&self, w: &str, h: u32) -> i32 {
        self.word2int[self.find_with_hash(w, h)]
    }

    pub fn get_word(&self, id: i32) -> &str {
        debug_assert!(id >= 0 && (id as usize) < self.words.len());
        &self.words[id as usize].word
    }

    /// Surface form of a zero-based label id.
    pub fn get_label(&self, lid: i32) -> Result<&str> {
        if lid < 0 || lid >= self.nlabels {
            return Err(Error::Config(format!("label id {lid} is out of range")));
        }
        Ok(&self.words[(lid + self.nwords) as usize].word)
    }

    pub fn get_subwords(&self, id: i32) -> &[i32] {
        debug_assert!(id >= 0 && (id as usize) < self.words.len());
        &self.words[id as usize].subwords
    }

    /// Subword ids for any surface form, in- or out-of-vocabulary.
    pub fn subwords_of_token(&self, word: &str) -> Vec<i32> {
        let id = self.get_id(word);
        if id >= 0 {
            return self.get_subwords(id).to_vec();
        }
        let mut ngrams = Vec::new();
        if word != EOS {
            self.compute_subwords(&format!("{BOW}{word}{EOW}"), &mut ngrams);
        }
        ngrams
    }

    /// Per-kind counts in entry order; for labels, index == label id.
    pub fn get_counts(&self, kind: EntryKind) -> Vec<i64> {
        self.words
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }

    pub fn add(&mut self, w: &str) {
        let h = self.find(w);
        self.ntokens += 1;
        if self.word2int[h] == -1 {
            let kind = self.kind_of_token(w);
            self.word2int[h] = self.words.len() as i32;
            self.words.push(Entry {
                word: w.to_string(),
                count: 1,
                kind,
                subwords: Vec::new(),
            });
        } else {
            self.words[self.word2int[h] as usize].count += 1;
        }
    }

    /// Build the vocabulary from a token stream.
    pub fn read_from<R: BufRead>(&mut self, reader: &mut TokenReader<R>) -> Result<()> {
        let mut min_threshold: i64 = 1;
        while let Some(token) = reader.read_token()? {
            self.add(&token);
            if self.args.verbose > 1 && self.ntokens % 1_000_000 == 0 {
                eprint!("\rRead {}M words", self.ntokens / 1_000_000);
            }
            if self.words.len() as f64 > 0.75 * MAX_VOCAB_SIZE as f64 {
                min_threshold += 1;
                self.threshold(min_threshold, min_threshold);
            }
        }
        self.threshold(self.args.min_count as i64, self.args.min_count_label as i64);
        if self.args.verbose > 1 && self.ntokens >= 1_000_000 {
            eprintln!("\rRead {}M words", self.ntokens / 1_000_000);
        }
        log::info!(
            "read {} tokens: {} words, {} labels",
            self.ntokens,
            self.nwords,
            self.nlabels
        );
        if self.words.is_empty() {
            return Err(Error::EmptyVocabulary);
        }
        self.init();
        Ok(())
    }

    /// Recompute the discard table and subword lists; required after any
    /// out-of-band mutation of the entry list.
    pub fn init(&mut self) {
        self.init_table_discard();
        self.init_ngrams();
    }

    /// Drop words below `t` and labels below `tl`, then rebuild the table.
    /// The sort must stay stable so equal counts keep insertion order.
    pub fn threshold(&mut self, t: i64, tl: i64) {
        self.words.sort_by(|a, b| {
            (a.kind as u8)
                .cmp(&(b.kind as u8))
                .then_with(|| b.count.cmp(&a.count))
        });
        self.words.retain(|e| match e.kind {
            EntryKind::Word => e.count >= t,
            EntryKind::Label => e.count >= tl,
        });
        self.words.shrink_to_fit();
        self.rebuild_table();
    }

    fn rebuild_table(&mut self) {
        self.nwords = 0;
        self.nlabels = 0;
        self.word2int.fill(-1);
        for i in 0..self.words.len() {
            match self.words[i].kind {
                EntryKind::Word => self.nwords += 1,
                EntryKind::Label => self.nlabels += 1,
            }
            let slot = self.find(&self.words[i].word);
            self.word2int[slot] = i as i32;
        }
    }

    fn init_table_discard(&mut self) {
        self.pdiscard.clear();
        self.pdiscard.reserve(self.words.len());
        for e in &self.words {
            let f = e.count as f64 / self.ntokens as f64;
            self.pdiscard
                .push(((self.args.t / f).sqrt() + self.args.t / f) as f32);
        }
    }

    /// True when the token should be dropped this time around.
    pub fn discard(&self, id: i32, rand: f32) -> bool {
        debug_assert!(id >= 0 && id < self.nwords);
        if self.args.model == ModelName::Sup {
            return false;
        }
        rand > self.pdiscard[id as usize]
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.words.len() {
            let bracketed = format!("{BOW}{}{EOW}", self.words[i].word);
            let mut subwords = vec![i as i32];
            if self.words[i].word != EOS {
                self.compute_subwords(&bracketed, &mut subwords);
            }
            self.words[i].subwords = subwords;
        }
    }

    /// Character n-grams of the bracketed surface, lengths in
    /// [minn, maxn] counted in codepoints. Single-character n-grams
    /// touching either bracket are skipped.
    pub fn compute_subwords(&self, word: &str, ngrams: &mut Vec<i32>) {
        let bytes = word.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i] & 0xC0 == 0x80 {
                continue;
            }
            let mut ngram: Vec<u8> = Vec::new();
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= self.args.maxn {
                ngram.push(bytes[j]);
                j += 1;
                while j < bytes.len() && bytes[j] & 0xC0 == 0x80 {
                    ngram.push(bytes[j]);
                    j += 1;
                }
                if n >= self.args.minn && !(n == 1 && (i == 0 || j == bytes.len())) {
                    let h = Self::hash_bytes(&ngram) % self.args.bucket as u32;
                    self.push_hash(ngrams, h as i32);
                }
                n += 1;
            }
        }
    }

    fn push_hash(&self, hashes: &mut Vec<i32>, id: i32) {
        if id < 0 {
            return;
        }
        match &self.pruneidx {
            None => hashes.push(self.nwords + id),
            Some(map) => {
                if let Some(&j) = map.get(&id) {
                    hashes.push(self.nwords + j);
                }
            }
        }
    }

    fn add_subwords(&self, line: &mut Vec<i32>, token: &str, id: i32) {
        if id < 0 {
            // out of vocabulary: fall back to the bucketed n-grams
            if token != EOS {
                self.compute_subwords(&format!("{BOW}{token}{EOW}"), line);
            }
        } else if self.args.maxn <= 0 {
            line.push(id);
        } else {
            line.extend_from_slice(self.get_subwords(id));
        }
    }

    fn add_word_ngrams(&self, line: &mut Vec<i32>, hashes: &[u32], n: i32) {
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for j in (i + 1)..hashes.len() {
                if j >= i + n as usize {
                    break;
                }
                h = h.wrapping_mul(116_049_371).wrapping_add(hashes[j] as u64);
                self.push_hash(line, (h % self.args.bucket as u64) as i32);
            }
        }
    }

    /// One labeled line: subword-expanded word ids and zero-based label
    /// ids. Returns the raw token count for progress accounting.
    pub fn get_line<R: BufRead>(
        &self,
        reader: &mut TokenReader<R>,
        words: &mut Vec<i32>,
        labels: &mut Vec<i32>,
    ) -> std::io::Result<i32> {
        let mut word_hashes: Vec<u32> = Vec::new();
        let mut ntokens = 0;
        words.clear();
        labels.clear();
        while let Some(token) = reader.read_token()? {
            let h = Self::hash(&token);
            let id = self.get_id_with_hash(&token, h);
            let kind = if id < 0 {
                self.kind_of_token(&token)
            } else {
                self.kind(id)
            };
            ntokens += 1;
            match kind {
                EntryKind::Word => {
                    self.add_subwords(words, &token, id);
                    word_hashes.push(h);
                }
                EntryKind::Label => {
                    if id >= 0 {
                        labels.push(id - self.nwords);
                    }
                }
            }
            if token == EOS {
                break;
            }
        }
        self.add_word_ngrams(words, &word_hashes, self.args.word_ngrams);
        Ok(ntokens)
    }

    /// One line of in-vocabulary word ids with frequency subsampling,
    /// capped at `MAX_LINE_SIZE` tokens.
    pub fn get_line_sampled<R: BufRead, G: Rng>(
        &self,
        reader: &mut TokenReader<R>,
        words: &mut Vec<i32>,
        rng: &mut G,
    ) -> std::io::Result<i32> {
        let uniform = Uniform::new(0.0f32, 1.0f32);
        let mut ntokens = 0;
        words.clear();
        while let Some(token) = reader.read_token()? {
            let id = self.word2int[self.find(&token)];
            if id < 0 {
                continue;
            }
            ntokens += 1;
            if self.kind(id) == EntryKind::Word && !self.discard(id, rng.sample(uniform)) {
                words.push(id);
            }
            if ntokens > MAX_LINE_SIZE as i32 || token == EOS {
                break;
            }
        }
        Ok(ntokens)
    }

    /// Restrict the dictionary to the rows in `idx` (words and n-gram
    /// buckets picked by the quantizer cutoff). Labels always survive.
    /// On return `idx` lists kept words then kept buckets, and the
    /// surviving buckets are remapped to compact slots.
    pub fn prune(&mut self, idx: &mut Vec<i32>) {
        let mut kept_words: Vec<i32> = Vec::new();
        let mut kept_ngrams: Vec<i32> = Vec::new();
        for &id in idx.iter() {
            if id < self.nwords {
                kept_words.push(id);
            } else {
                kept_ngrams.push(id);
            }
        }
        kept_words.sort_unstable();

        let mut map = HashMap::new();
        for (j, &ng) in kept_ngrams.iter().enumerate() {
            map.insert(ng - self.nwords, j as i32);
        }
        self.pruneidx = Some(map);

        idx.clear();
        idx.extend_from_slice(&kept_words);
        idx.extend_from_slice(&kept_ngrams);

        self.word2int.fill(-1);
        let mut j = 0usize;
        for i in 0..self.words.len() {
            let keep = self.words[i].kind == EntryKind::Label
                || (j < kept_words.len() && kept_words[j] == i as i32);
            if keep {
                if i != j {
                    self.words.swap(j, i);
                }
                let slot = self.find(&self.words[j].word);
                self.word2int[slot] = j as i32;
                j += 1;
            }
        }
        self.nwords = kept_words.len() as i32;
        self.words.truncate(j);
        self.init_ngrams();
    }

    pub fn save<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_i32::<LittleEndian>(self.words.len() as i32)?;
        out.write_i32::<LittleEndian>(self.nwords)?;
        out.write_i32::<LittleEndian>(self.nlabels)?;
        out.write_i64::<LittleEndian>(self.ntokens)?;
        match &self.pruneidx {
            None => out.write_i64::<LittleEndian>(-1)?,
            Some(map) => out.write_i64::<LittleEndian>(map.len() as i64)?,
        }
        for e in &self.words {
            out.write_u32::<LittleEndian>(e.word.len() as u32)?;
            out.write_all(e.word.as_bytes())?;
            out.write_i64::<LittleEndian>(e.count)?;
            out.write_u8(e.kind as u8)?;
        }
        if let Some(map) = &self.pruneidx {
            let mut pairs: Vec<(i32, i32)> = map.iter().map(|(&k, &v)| (k, v)).collect();
            pairs.sort_unstable();
            for (k, v) in pairs {
                out.write_i32::<LittleEndian>(k)?;
                out.write_i32::<LittleEndian>(v)?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(args: Args, input: &mut R) -> Result<Dictionary> {
        let size = input.read_i32::<LittleEndian>()?;
        let nwords = input.read_i32::<LittleEndian>()?;
        let nlabels = input.read_i32::<LittleEndian>()?;
        let ntokens = input.read_i64::<LittleEndian>()?;
        let pruneidx_size = input.read_i64::<LittleEndian>()?;
        if size < 0 || nwords < 0 || nlabels < 0 || nwords + nlabels != size {
            return Err(Error::MalformedModel("inconsistent dictionary header".to_string()));
        }
        let mut words = Vec::with_capacity(size as usize);
        for _ in 0..size {
            let len = input.read_u32::<LittleEndian>()? as usize;
            let mut buf = vec![0u8; len];
            input.read_exact(&mut buf)?;
            let word = String::from_utf8(buf)
                .map_err(|_| Error::MalformedModel("non-UTF-8 vocabulary entry".to_string()))?;
            let count = input.read_i64::<LittleEndian>()?;
            let kind = match input.read_u8()? {
                0 => EntryKind::Word,
                1 => EntryKind::Label,
                k => {
                    return Err(Error::MalformedModel(format!("unknown entry kind {k}")));
                }
            };
            words.push(Entry {
                word,
                count,
                kind,
                subwords: Vec::new(),
            });
        }
        let pruneidx = if pruneidx_size < 0 {
            None
        } else {
            let mut map = HashMap::with_capacity(pruneidx_size as usize);
            for _ in 0..pruneidx_size {
                let k = input.read_i32::<LittleEndian>()?;
                let v = input.read_i32::<LittleEndian>()?;
                map.insert(k, v);
            }
            Some(map)
        };
        let mut dict = Dictionary {
            args,
            word2int: vec![-1; MAX_VOCAB_SIZE],
            words,
            pdiscard: Vec::new(),
            nwords,
            nlabels,
            ntokens,
            pruneidx,
        };
        for i in 0..dict.words.len() {
            let slot = dict.find(&dict.words[i].word);
            dict.word2int[slot] = i as i32;
        }
        dict.init();
        Ok(dict)
    }
}
