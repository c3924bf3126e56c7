// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod common;

use common::{batch, hashed_vocabulary_file, vocabulary, TOKENS, UNK};
use gpu_runtime::runtime::device::{Device, DeviceBuilder};
use once_cell::sync::Lazy;
use proptest::prelude::*;
use std::error::Error;
use std::fs;
use text_ops::error::ErrorKind;
use text_ops::wordpiece;
use text_ops::{WordPieceTokenizer, WordPieceTokenizerBuilder};

static DEVICE: Lazy<Device> = Lazy::new(|| {
    DeviceBuilder::default()
        .workers(4)
        .build()
        .expect("Failed to initialize device")
});

fn tokenizer() -> WordPieceTokenizer<'static> {
    WordPieceTokenizerBuilder::default()
        .build(&DEVICE, vocabulary())
        .expect("Failed to build tokenizer")
}

fn tokenize(tokenizer: &WordPieceTokenizer<'_>, strings: &[&str]) -> Vec<Vec<u32>> {
    let (bytes, offsets) = batch(strings);
    let tokens = tokenizer
        .tokenize(&bytes, &offsets, strings.len())
        .expect("Failed to tokenize");

    (0..tokens.num_strings())
        .map(|i| tokens.string_tokens(i).unwrap().to_vec())
        .collect()
}

#[test]
fn known_sentence() -> Result<(), Box<dyn Error>> {
    let (bytes, offsets) = batch(&["Hello, world! The tokenizers"]);

    let tokens = tokenizer().tokenize(&bytes, &offsets, 1)?;

    assert_eq!(
        tokens.token_ids(),
        &[7592, 1010, 2088, 999, 1996, 19204, 17629, 2015]
    );
    assert_eq!(tokens.offsets(), &[0, 8]);
    Ok(())
}

#[test]
fn offsets_per_string() -> Result<(), Box<dyn Error>> {
    let (bytes, offsets) = batch(&["Hello world", "", "the token", "!!"]);

    let tokens = tokenizer().tokenize(&bytes, &offsets, 4)?;

    assert_eq!(tokens.offsets(), &[0, 2, 2, 4, 6]);
    assert_eq!(tokens.token_ids(), &[7592, 2088, 1996, 19204, 999, 999]);
    assert_eq!(tokens.string_tokens(1), Some(&[][..]));
    assert_eq!(tokens.string_tokens(4), None);
    Ok(())
}

#[test]
fn long_words_are_unknown() {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .max_word_length(5)
        .build(&DEVICE, vocabulary())
        .unwrap();

    assert_eq!(tokenize(&tokenizer, &["tokenizers hello"]), vec![vec![UNK, 7592]]);
}

#[test]
fn unmatched_words_are_unknown() {
    let tokens = tokenize(&tokenizer(), &["hello xyz tokenxyz"]);

    assert_eq!(tokens, vec![vec![7592, UNK, UNK]]);
}

#[test]
fn case_is_kept_without_lowercasing() {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .do_lower_case(false)
        .build(&DEVICE, vocabulary())
        .unwrap();

    assert_eq!(tokenize(&tokenizer, &["Hello hello"]), vec![vec![UNK, 7592]]);
}

#[test]
fn accents_are_stripped() {
    assert_eq!(tokenize(&tokenizer(), &["Héllo WÖRLD"]), vec![vec![7592, 2088]]);
}

#[test]
fn invalid_utf8_is_dropped() -> Result<(), Box<dyn Error>> {
    let bytes = b"hello \xff\xfe world";
    let offsets = [0, bytes.len() as u32];

    let tokens = tokenizer().tokenize(bytes, &offsets, 1)?;

    assert_eq!(tokens.token_ids(), &[7592, 2088]);
    Ok(())
}

#[test]
fn nonzero_first_offset() -> Result<(), Box<dyn Error>> {
    let bytes = b"xxxhello world";
    let offsets = [3, 8, 14];

    let tokens = tokenizer().tokenize(bytes, &offsets, 2)?;

    assert_eq!(tokens.offsets(), &[0, 1, 2]);
    assert_eq!(tokens.token_ids(), &[7592, 2088]);
    Ok(())
}

#[test]
fn empty_batch() -> Result<(), Box<dyn Error>> {
    let tokens = tokenizer().tokenize(&[], &[0], 0)?;

    assert_eq!(tokens.num_strings(), 0);
    assert!(tokens.token_ids().is_empty());
    assert_eq!(tokens.offsets(), &[0]);
    Ok(())
}

#[test]
fn bounds_are_checked() {
    let small = WordPieceTokenizerBuilder::default()
        .max_num_strings(1)
        .max_num_chars(8)
        .build(&DEVICE, vocabulary())
        .unwrap();

    let (bytes, offsets) = batch(&["a", "b"]);
    let too_many_strings = small.tokenize(&bytes, &offsets, 2).unwrap_err();

    let (bytes, offsets) = batch(&["hello world"]);
    let too_many_chars = small.tokenize(&bytes, &offsets, 1).unwrap_err();

    let decreasing = tokenizer().tokenize(b"hello", &[3, 1], 1).unwrap_err();
    let missing_offsets = tokenizer().tokenize(b"hello", &[0], 1).unwrap_err();
    let out_of_bounds = tokenizer().tokenize(b"hello", &[0, 6], 1).unwrap_err();

    for error in [
        too_many_strings,
        too_many_chars,
        decreasing,
        missing_offsets,
        out_of_bounds,
    ]
    .iter()
    {
        match error.kind() {
            ErrorKind::InvalidArgument(_) => {}
            other => panic!("Unexpected error: {}", other),
        }
    }
}

#[test]
fn invalid_configuration_fails() {
    let zero_stride = WordPieceTokenizerBuilder::default()
        .stride(0)
        .build(&DEVICE, vocabulary());
    let wide_stride = WordPieceTokenizerBuilder::default()
        .max_sequence_length(8)
        .stride(9)
        .build(&DEVICE, vocabulary());

    assert!(zero_stride.is_err());
    assert!(wide_stride.is_err());
}

#[test]
fn subword_tensor_with_stride() -> Result<(), Box<dyn Error>> {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .max_sequence_length(4)
        .stride(2)
        .build(&DEVICE, vocabulary())?;
    let (bytes, offsets) = batch(&["Hello, world! The tokenizers", "world"]);

    let result = tokenizer.subword_tokenize(&bytes, &offsets, 2)?;

    assert_eq!(result.nrows_tensor(), 4);
    assert_eq!(result.sequence_length(), 4);
    assert_eq!(
        result.tensor_token_ids(),
        &[
            7592, 1010, 2088, 999, //
            2088, 999, 1996, 19204, //
            1996, 19204, 17629, 2015, //
            2088, 0, 0, 0,
        ]
    );
    assert_eq!(
        result.tensor_attention_mask(),
        &[1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0]
    );
    assert_eq!(
        result.tensor_metadata(),
        &[0, 0, 3, 0, 2, 3, 0, 2, 3, 1, 0, 0]
    );
    Ok(())
}

#[test]
fn subword_tensor_truncated() -> Result<(), Box<dyn Error>> {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .max_sequence_length(4)
        .stride(2)
        .do_truncate(true)
        .build(&DEVICE, vocabulary())?;
    let (bytes, offsets) = batch(&["Hello, world! The tokenizers"]);

    let result = tokenizer.subword_tokenize(&bytes, &offsets, 1)?;

    assert_eq!(result.nrows_tensor(), 1);
    assert_eq!(result.tensor_token_ids(), &[7592, 1010, 2088, 999]);
    assert_eq!(result.tensor_metadata(), &[0, 0, 3]);
    Ok(())
}

#[test]
fn tensor_row_limit() {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .max_sequence_length(4)
        .stride(2)
        .max_rows_final_tensor(2)
        .build(&DEVICE, vocabulary())
        .unwrap();
    let (bytes, offsets) = batch(&["Hello, world! The tokenizers"]);

    let error = tokenizer.subword_tokenize(&bytes, &offsets, 1).unwrap_err();

    match error.kind() {
        ErrorKind::InvalidArgument(_) => {}
        other => panic!("Unexpected error: {}", other),
    }
}

#[test]
fn loads_vocabulary_file() -> Result<(), Box<dyn Error>> {
    let path = std::env::temp_dir().join(format!("vocab-hash-{}.txt", std::process::id()));
    fs::write(&path, hashed_vocabulary_file(TOKENS))?;

    let tokenizer = WordPieceTokenizerBuilder::default().build_from_file(&DEVICE, &path);
    fs::remove_file(&path)?;

    assert_eq!(tokenize(&tokenizer?, &["the world"]), vec![vec![1996, 2088]]);
    Ok(())
}

#[test]
fn tokenize_with_defaults() -> Result<(), Box<dyn Error>> {
    let (bytes, offsets) = batch(&["hello", "world"]);

    let (token_ids, token_offsets) = wordpiece::tokenize(&DEVICE, vocabulary(), &bytes, &offsets, 2)?;

    assert_eq!(token_ids.as_slice(), &[7592, 2088]);
    assert_eq!(token_offsets.as_slice(), &[0, 1, 2]);
    Ok(())
}

#[test]
fn device_memory_is_released() -> Result<(), Box<dyn Error>> {
    let device = DeviceBuilder::default().workers(2).build()?;
    {
        let tokenizer = WordPieceTokenizerBuilder::default().build(&device, vocabulary())?;
        let (bytes, offsets) = batch(&["hello world"]);
        let result = tokenizer.subword_tokenize(&bytes, &offsets, 1)?;
        assert!(device.memory_used() > 0);
        assert_eq!(result.nrows_tensor(), 1);
    }

    assert_eq!(device.memory_used(), 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn batch_equals_single_strings(
        strings in prop::collection::vec("(hello|world|the|token|izers|xyz|, |!| ){0,12}", 0..20)
    ) {
        let tokenizer = tokenizer();
        let strings: Vec<&str> = strings.iter().map(String::as_str).collect();

        let batched = tokenize(&tokenizer, &strings);
        let single: Vec<Vec<u32>> = strings
            .iter()
            .map(|s| tokenize(&tokenizer, &[*s]).remove(0))
            .collect();

        prop_assert_eq!(batched, single);
    }
}
