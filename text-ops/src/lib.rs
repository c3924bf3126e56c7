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

//! A data-parallel WordPiece tokenizer.
//!
//! The tokenizer splits a batch of UTF-8 strings into subword token ids. It
//! looks up tokens in a vocabulary that has been pre-hashed into a two-level
//! perfect hash table. Each string is processed by one device thread in two
//! passes: the first pass counts the tokens, a prefix sum turns the counts
//! into offsets, and the second pass writes the token ids.
//!
//! Optionally, the token ids are reshaped into a fixed-width tensor for
//! transformer models, see `WordPieceTokenizer::subword_tokenize`.

pub mod error;
pub mod normalizer;
pub mod tensor;
pub mod vocabulary;
pub mod wordpiece;

pub use normalizer::{BasicNormalizer, Normalizer};
pub use tensor::TokenizerResult;
pub use vocabulary::HashedVocabulary;
pub use wordpiece::{TokenIds, WordPieceTokenizer, WordPieceTokenizerBuilder};
