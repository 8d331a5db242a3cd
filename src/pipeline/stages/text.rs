//! Bag-of-n-grams text featurization.
//!
//! Fitting learns two vocabularies from the training column: word n-grams and
//! character n-grams over the normalized text. Transforming emits term
//! frequencies for both blocks, each block L2-normalized, so every output
//! vector has the same length and slot meaning as at fit time.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::Transformer;
use crate::error::PipelineResult;
use crate::pipeline::data::{ColumnType, DataView, Row, Schema, Value};

const TEXT_START: char = '\u{2}';
const TEXT_END: char = '\u{3}';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextFeaturizerOptions {
    /// Longest word n-gram; `0` disables the word block.
    pub word_ngram_len: usize,
    /// Character n-gram length; `0` disables the char block.
    pub char_ngram_len: usize,
    /// Terms seen fewer times than this are dropped.
    pub min_count: usize,
    pub max_word_terms: usize,
    pub max_char_terms: usize,
}

impl Default for TextFeaturizerOptions {
    fn default() -> Self {
        Self {
            word_ngram_len: 2,
            char_ngram_len: 3,
            min_count: 1,
            max_word_terms: 1000,
            max_char_terms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFeaturizer {
    pub input: String,
    pub output: String,
    pub options: TextFeaturizerOptions,
    word_vocab: BTreeMap<String, u32>,
    char_vocab: BTreeMap<String, u32>,
}

impl TextFeaturizer {
    pub fn fit(
        input: &str,
        output: &str,
        options: &TextFeaturizerOptions,
        data: &DataView,
    ) -> PipelineResult<Self> {
        data.schema().require(input, &ColumnType::Text)?;
        let mut words = TermCounter::default();
        let mut chars = TermCounter::default();
        for row in data.rows() {
            let normalized = normalize(row.text(input)?);
            for term in word_ngrams(&normalized, options.word_ngram_len) {
                words.add(term);
            }
            for term in char_ngrams(&normalized, options.char_ngram_len) {
                chars.add(term);
            }
        }
        Ok(Self {
            input: input.to_string(),
            output: output.to_string(),
            options: options.clone(),
            word_vocab: words.into_vocabulary(options.min_count, options.max_word_terms),
            char_vocab: chars.into_vocabulary(options.min_count, options.max_char_terms),
        })
    }

    pub fn output_len(&self) -> usize {
        self.word_vocab.len() + self.char_vocab.len()
    }

    /// Check every vocabulary slot addresses its own block.
    pub fn validate(&self) -> Result<(), String> {
        for (block, vocab) in [("word", &self.word_vocab), ("char", &self.char_vocab)] {
            if let Some((term, slot)) = vocab.iter().find(|(_, slot)| **slot as usize >= vocab.len()) {
                return Err(format!(
                    "{block} term {term:?} has slot {slot} outside a vocabulary of {}",
                    vocab.len()
                ));
            }
        }
        Ok(())
    }

    /// Featurize a single string.
    pub fn featurize(&self, text: &str) -> Vec<f32> {
        let normalized = normalize(text);
        let word_len = self.word_vocab.len();
        let mut out = vec![0.0f32; self.output_len()];
        for term in word_ngrams(&normalized, self.options.word_ngram_len) {
            if let Some(&slot) = self.word_vocab.get(&term) {
                out[slot as usize] += 1.0;
            }
        }
        for term in char_ngrams(&normalized, self.options.char_ngram_len) {
            if let Some(&slot) = self.char_vocab.get(&term) {
                out[word_len + slot as usize] += 1.0;
            }
        }
        let (word_block, char_block) = out.split_at_mut(word_len);
        l2_normalize(word_block);
        l2_normalize(char_block);
        out
    }
}

impl Transformer for TextFeaturizer {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(&self.input, &ColumnType::Text)?;
        let mut schema = input.clone();
        schema.set(
            &self.output,
            ColumnType::Vector {
                len: self.output_len(),
            },
        );
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let features = self.featurize(row.text(&self.input)?);
        row.set(&self.output, Value::Vector(features));
        Ok(())
    }
}

#[derive(Default)]
struct TermCounter {
    counts: HashMap<String, (usize, usize)>,
}

impl TermCounter {
    fn add(&mut self, term: String) {
        let next = self.counts.len();
        self.counts.entry(term).or_insert((0, next)).0 += 1;
    }

    /// Most frequent terms first, ties broken by first occurrence.
    fn into_vocabulary(self, min_count: usize, max_terms: usize) -> BTreeMap<String, u32> {
        let mut terms: Vec<(String, usize, usize)> = self
            .counts
            .into_iter()
            .filter(|(_, (count, _))| *count >= min_count.max(1))
            .map(|(term, (count, first))| (term, count, first))
            .collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        terms
            .into_iter()
            .take(max_terms)
            .enumerate()
            .map(|(slot, (term, _, _))| (term, slot as u32))
            .collect()
    }
}

/// Lower-case and replace everything but letters and digits with single spaces.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

fn word_ngrams(normalized: &str, max_len: usize) -> Vec<String> {
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    let mut out = Vec::new();
    for n in 1..=max_len {
        for window in tokens.windows(n) {
            out.push(window.join(" "));
        }
    }
    out
}

fn char_ngrams(normalized: &str, len: usize) -> Vec<String> {
    if len == 0 {
        return Vec::new();
    }
    let mut chars = Vec::with_capacity(normalized.len() + 2);
    chars.push(TEXT_START);
    chars.extend(normalized.chars());
    chars.push(TEXT_END);
    chars
        .windows(len)
        .map(|window| window.iter().collect())
        .collect()
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(texts: &[&str]) -> DataView {
        let schema = Schema::new().with("Text", ColumnType::Text);
        let rows = texts
            .iter()
            .map(|t| Row::new().with("Text", Value::Text(t.to_string())))
            .collect();
        DataView::from_rows(schema, rows).unwrap()
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Belt-Bag, BLACK! "), "belt bag black");
        assert_eq!(normalize("..."), "");
    }

    #[test]
    fn word_ngrams_include_bigrams() {
        let grams = word_ngrams("shell belt bag", 2);
        assert_eq!(
            grams,
            vec!["shell", "belt", "bag", "shell belt", "belt bag"]
        );
    }

    #[test]
    fn validate_rejects_slot_outside_vocabulary() {
        let mut featurizer = TextFeaturizer::fit(
            "Text",
            "Features",
            &TextFeaturizerOptions::default(),
            &corpus(&["shell belt bag"]),
        )
        .unwrap();
        assert!(featurizer.validate().is_ok());
        featurizer.word_vocab.insert("stray".to_string(), 500);
        assert!(featurizer.validate().unwrap_err().contains("stray"));
    }

    #[test]
    fn output_length_fixed_and_blocks_normalized() {
        let featurizer = TextFeaturizer::fit(
            "Text",
            "Features",
            &TextFeaturizerOptions::default(),
            &corpus(&["Striped shell belt bag", "Leather belt"]),
        )
        .unwrap();
        let a = featurizer.featurize("belt bag");
        let b = featurizer.featurize("completely unseen words");
        assert_eq!(a.len(), featurizer.output_len());
        assert_eq!(b.len(), featurizer.output_len());

        let word_len = featurizer.word_vocab.len();
        let word_norm: f32 = a[..word_len].iter().map(|v| v * v).sum();
        assert!((word_norm - 1.0).abs() < 1e-5);
        assert!(b[..word_len].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn vocabulary_is_capped_by_frequency() {
        let options = TextFeaturizerOptions {
            word_ngram_len: 1,
            char_ngram_len: 0,
            max_word_terms: 1,
            ..TextFeaturizerOptions::default()
        };
        let featurizer =
            TextFeaturizer::fit("Text", "F", &options, &corpus(&["bag belt", "bag"])).unwrap();
        assert_eq!(featurizer.output_len(), 1);
        assert_eq!(featurizer.word_vocab.get("bag"), Some(&0));
    }

    #[test]
    fn featurize_is_deterministic() {
        let featurizer = TextFeaturizer::fit(
            "Text",
            "F",
            &TextFeaturizerOptions::default(),
            &corpus(&["one two three", "two three four"]),
        )
        .unwrap();
        assert_eq!(featurizer.featurize("two three"), featurizer.featurize("two three"));
    }
}
