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

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// The end-of-sentence sentinel emitted for every newline.
pub const EOS: &str = "</s>";

#[inline]
fn is_token_separator(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c' | b'\0')
}

/// Streams whitespace-delimited tokens from a byte source.
///
/// A token is a maximal run of non-separator bytes. A newline additionally
/// yields the `</s>` sentinel: on its own when no token precedes it, or
/// right after the token it terminates (the newline is pushed back so the
/// next call picks the sentinel up).
pub struct TokenReader<R> {
    reader: R,
    unread: Option<u8>,
    eof: bool,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(reader: R) -> TokenReader<R> {
        TokenReader {
            reader,
            unread: None,
            eof: false,
        }
    }

    /// True once the underlying source has been exhausted.
    pub fn at_eof(&self) -> bool {
        self.eof
    }

    fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        if let Some(byte) = self.unread.take() {
            return Ok(Some(byte));
        }
        let mut byte = [0u8; 1];
        // one read call per byte; R is buffered so this stays cheap
        match self.reader.read(&mut byte)? {
            0 => {
                self.eof = true;
                Ok(None)
            }
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read and return the next token, or `None` at end of stream.
    pub fn read_token(&mut self) -> std::io::Result<Option<String>> {
        let mut word: Vec<u8> = Vec::new();
        while let Some(byte) = self.next_byte()? {
            if !is_token_separator(byte) {
                word.push(byte);
                continue;
            }
            if word.is_empty() {
                if byte == b'\n' {
                    return Ok(Some(EOS.to_string()));
                }
                continue;
            }
            if byte == b'\n' {
                // this newline still owes the sentinel
                self.unread = Some(byte);
            }
            break;
        }
        if word.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8(word).unwrap_or_else(|_| String::from("<INV>")),
        ))
    }
}

impl<R: BufRead + Seek> TokenReader<R> {
    /// Re-start reading from byte `offset`.
    pub fn seek_to(&mut self, offset: u64) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.unread = None;
        self.eof = false;
        Ok(())
    }
}

impl TokenReader<BufReader<File>> {
    /// Open `path` for token iteration, starting at byte `offset`.
    pub fn open<P: AsRef<Path>>(path: P, offset: u64) -> std::io::Result<Self> {
        let mut reader = TokenReader::new(BufReader::new(File::open(path)?));
        if offset > 0 {
            reader.seek_to(offset)?;
        }
        Ok(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tokens_of(text: &str) -> Vec<String> {
        let mut reader = TokenReader::new(Cursor::new(text.as_bytes().to_vec()));
        let mut out = Vec::new();
        while let Some(tok) = reader.read_token().unwrap() {
            out.push(tok);
        }
        out
    }

    #[test]
    fn splits_on_any_whitespace() {
        assert_eq!(
            tokens_of("a b\tc\rd\x0be\x0cf\0g"),
            vec!["a", "b", "c", "d", "e", "f", "g"]
        );
    }

    #[test]
    fn newline_emits_sentinel_after_token() {
        assert_eq!(tokens_of("cat dog\nfox"), vec!["cat", "dog", EOS, "fox"]);
    }

    #[test]
    fn bare_newlines_emit_one_sentinel_each() {
        assert_eq!(tokens_of("\n\n"), vec![EOS, EOS]);
    }

    #[test]
    fn trailing_token_without_newline_is_kept() {
        assert_eq!(tokens_of("alpha beta"), vec!["alpha", "beta"]);
    }

    #[test]
    fn seek_restarts_iteration() {
        let mut reader = TokenReader::new(Cursor::new(b"one two\n".to_vec()));
        while reader.read_token().unwrap().is_some() {}
        assert!(reader.at_eof());
        reader.seek_to(0).unwrap();
        assert!(!reader.at_eof());
        assert_eq!(reader.read_token().unwrap().unwrap(), "one");
    }
}
