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

//! Text normalization before WordPiece tokenization.

/// Cleans up text and separates it into whitespace-delimited words.
pub trait Normalizer: Sync {
    /// Appends the normalized `text` to `output`.
    fn normalize(&self, text: &str, output: &mut String);
}

/// The normalizer of the BERT basic tokenizer.
///
/// Removes control characters, maps whitespace to spaces, and surrounds
/// punctuation and CJK ideographs with spaces, such that each becomes a word
/// of its own. Optionally lowercases the text and strips accents.
#[derive(Clone, Copy, Debug)]
pub struct BasicNormalizer {
    do_lower_case: bool,
}

impl Default for BasicNormalizer {
    fn default() -> Self {
        Self {
            do_lower_case: true,
        }
    }
}

impl BasicNormalizer {
    pub fn new(do_lower_case: bool) -> Self {
        Self { do_lower_case }
    }

    pub fn do_lower_case(&self) -> bool {
        self.do_lower_case
    }

    fn push_char(c: char, output: &mut String) {
        if is_punctuation(c) || is_cjk(c) {
            output.push(' ');
            output.push(c);
            output.push(' ');
        } else {
            output.push(c);
        }
    }
}

impl Normalizer for BasicNormalizer {
    fn normalize(&self, text: &str, output: &mut String) {
        for c in text.chars() {
            if c == '\0' || c == char::REPLACEMENT_CHARACTER {
                continue;
            }
            if c.is_whitespace() {
                output.push(' ');
                continue;
            }
            if c.is_control() {
                continue;
            }

            if self.do_lower_case {
                c.to_lowercase()
                    .filter(|&lower| !is_combining_mark(lower))
                    .for_each(|lower| Self::push_char(strip_accent(lower), output));
            } else {
                Self::push_char(c, output);
            }
        }
    }
}

fn is_combining_mark(c: char) -> bool {
    ('\u{300}'..='\u{36f}').contains(&c)
}

/// Maps a lowercase Latin letter with diacritics to its base letter.
///
/// Letters that are distinct letters instead of accented forms, such as 'ø'
/// or 'ł', are kept.
fn strip_accent(c: char) -> char {
    match c {
        'à'..='å' => 'a',
        'ç' => 'c',
        'è'..='ë' => 'e',
        'ì'..='ï' => 'i',
        'ñ' => 'n',
        'ò'..='ö' => 'o',
        'ù'..='ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ā' | 'ă' | 'ą' => 'a',
        'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' => 'd',
        'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' => 'h',
        'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' => 'l',
        'ń' | 'ņ' | 'ň' => 'n',
        'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' => 't',
        'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        _ => c,
    }
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '¡' | '§' | '«' | '¶' | '·' | '»' | '¿' | '\u{2000}'..='\u{206f}' | '\u{3000}'..='\u{303f}'
        )
}

fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{4e00}'..='\u{9fff}'
            | '\u{3400}'..='\u{4dbf}'
            | '\u{20000}'..='\u{2a6df}'
            | '\u{2a700}'..='\u{2b73f}'
            | '\u{2b740}'..='\u{2b81f}'
            | '\u{2b820}'..='\u{2ceaf}'
            | '\u{f900}'..='\u{faff}'
            | '\u{2f800}'..='\u{2fa1f}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(normalizer: BasicNormalizer, text: &str) -> Vec<String> {
        let mut output = String::new();
        normalizer.normalize(text, &mut output);
        output.split_whitespace().map(|w| w.to_string()).collect()
    }

    #[test]
    fn splits_punctuation() {
        let words = normalize(BasicNormalizer::default(), "Hello, world!");
        assert_eq!(words, vec!["hello", ",", "world", "!"]);
    }

    #[test]
    fn keeps_case_without_lowercasing() {
        let words = normalize(BasicNormalizer::new(false), "Héllo  Wörld");
        assert_eq!(words, vec!["Héllo", "Wörld"]);
    }

    #[test]
    fn strips_accents() {
        let words = normalize(BasicNormalizer::default(), "Crème BRÛLÉE Łódź søren");
        assert_eq!(words, vec!["creme", "brulee", "łodz", "søren"]);
    }

    #[test]
    fn removes_combining_marks() {
        let words = normalize(BasicNormalizer::default(), "cafe\u{301}");
        assert_eq!(words, vec!["cafe"]);
    }

    #[test]
    fn removes_control_characters() {
        let words = normalize(BasicNormalizer::default(), "a\u{0}b\u{7}c\u{fffd}d\te\nf");
        assert_eq!(words, vec!["abcd", "e", "f"]);
    }

    #[test]
    fn splits_cjk_ideographs() {
        let words = normalize(BasicNormalizer::default(), "ab中文cd");
        assert_eq!(words, vec!["ab", "中", "文", "cd"]);
    }

    #[test]
    fn splits_general_punctuation() {
        let words = normalize(BasicNormalizer::default(), "wait\u{2026}what\u{3002}");
        assert_eq!(words, vec!["wait", "\u{2026}", "what", "\u{3002}"]);
    }
}
