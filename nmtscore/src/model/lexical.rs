//! Lexical translation model.
//!
//! Each target token is explained by a uniform mixture over the source
//! positions, the end-of-sequence position included, which plays the role of
//! the null word:
//!
//! ```text
//! p(y_i | x) = 1/|x| * sum_j t(y_i | x_j)
//! ```
//!
//! The attention weight of source position `j` for target position `i` is the
//! posterior `t(y_i | x_j) / sum_k t(y_i | x_k)`.
use std::io::BufRead;

use hashbrown::HashMap;

use crate::alignment::AlignmentMatrix;
use crate::common::{EOS_ID, EOS_TOKEN};
use crate::corpus::Batch;
use crate::errors::{Result, ScoreError};
use crate::model::weights::{LexicalParams, TranslationEntry};
use crate::model::{BatchOutput, Scorer};
use crate::vocab::Vocabulary;

/// The default probability of pairs missing from a lexical table.
pub const DEFAULT_FLOOR: f32 = 1e-7;

/// A scorer backed by a table of lexical translation probabilities.
#[derive(Debug, Clone)]
pub struct LexicalModel {
    params: LexicalParams,
}

impl LexicalModel {
    /// Creates a model from validated parameters.
    pub fn new(params: LexicalParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Gets the parameters.
    #[inline(always)]
    pub fn params(&self) -> &LexicalParams {
        &self.params
    }

    /// Gets `t(target | source)`, falling back to the floor probability.
    #[inline(always)]
    pub fn prob(&self, source: u32, target: u32) -> f64 {
        let p = self
            .params
            .rows
            .get(source as usize)
            .and_then(|row| {
                row.binary_search_by_key(&target, |e| e.target)
                    .ok()
                    .map(|i| row[i].prob)
            })
            .unwrap_or(self.params.floor);
        f64::from(p.max(self.params.floor))
    }

    /// Scores one sentence pair given unpadded ids, both ending in [`EOS_ID`].
    ///
    /// Returns the negative log-probability and, on request, the attention matrix.
    pub fn score_pair(
        &self,
        source: &[u32],
        target: &[u32],
        alignment: bool,
    ) -> (f32, Option<AlignmentMatrix>) {
        let mut cost = 0.0f64;
        let mut rows = Vec::with_capacity(if alignment { target.len() } else { 0 });
        let mut probs = Vec::with_capacity(source.len());

        for &y in target {
            probs.clear();
            probs.extend(source.iter().map(|&x| self.prob(x, y)));
            let total: f64 = probs.iter().sum();
            cost -= (total / source.len() as f64).ln();
            if alignment {
                rows.push(probs.iter().map(|&p| (p / total) as f32).collect());
            }
        }

        (cost as f32, alignment.then(|| AlignmentMatrix { rows }))
    }
}

impl Scorer for LexicalModel {
    fn score(&self, batch: &Batch, alignment: bool) -> Result<BatchOutput> {
        let mut costs = Vec::with_capacity(batch.n_samples());
        let mut alignments = Vec::with_capacity(if alignment { batch.n_samples() } else { 0 });

        for sample in 0..batch.n_samples() {
            let source = batch.source_ids(0, sample);
            let target = batch.target_ids(sample);
            let (cost, matrix) = self.score_pair(&source, &target, alignment);
            costs.push(cost);
            if let Some(matrix) = matrix {
                alignments.push(matrix);
            }
        }

        Ok(BatchOutput {
            costs,
            alignments: alignment.then_some(alignments),
        })
    }
}

/// Counts collected while building a lexical table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Number of pairs stored.
    pub num_entries: usize,

    /// Number of lines skipped because a token is out of vocabulary.
    pub num_skipped: usize,

    /// Number of lines that overwrote an earlier value of the same pair.
    pub num_overwritten: usize,
}

/// Builder of [`LexicalParams`] from a plain-text table.
///
/// Each line of the table holds `source_token target_token probability`,
/// separated by whitespace. Empty lines are ignored.
pub struct LexicalModelBuilder {
    source_vocab: Vocabulary,
    target_vocab: Vocabulary,
    n_words_src: usize,
    n_words: usize,
    floor: f32,
}

impl LexicalModelBuilder {
    /// Creates a new builder.
    pub fn new(source_vocab: Vocabulary, target_vocab: Vocabulary) -> Self {
        Self {
            source_vocab,
            target_vocab,
            n_words_src: 0,
            n_words: 0,
            floor: DEFAULT_FLOOR,
        }
    }

    /// Bounds the source vocabulary. `0` means unbounded.
    pub const fn n_words_src(mut self, n_words_src: usize) -> Self {
        self.n_words_src = n_words_src;
        self
    }

    /// Bounds the target vocabulary. `0` means unbounded.
    pub const fn n_words(mut self, n_words: usize) -> Self {
        self.n_words = n_words;
        self
    }

    /// Sets the probability of pairs missing from the table.
    pub const fn floor(mut self, floor: f32) -> Self {
        self.floor = floor;
        self
    }

    /// Reads the table and builds the parameters.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when a line does not have three columns, a
    /// probability is not in `(0, 1]`, or the floor is not in `(0, 1]`.
    pub fn from_reader<R>(self, rdr: R) -> Result<(LexicalParams, BuildStats)>
    where
        R: BufRead,
    {
        let mut stats = BuildStats::default();
        let mut table: Vec<HashMap<u32, f32>> = vec![];

        for (i, line) in rdr.lines().enumerate() {
            let line = line?;
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.is_empty() {
                continue;
            }
            let &[src, trg, prob] = &cols[..] else {
                return Err(ScoreError::invalid_format(
                    "table",
                    format!("line {}: expected 3 columns, got {}", i + 1, cols.len()),
                ));
            };
            let prob: f32 = prob.parse()?;
            if !(prob > 0.0 && prob <= 1.0) {
                return Err(ScoreError::invalid_format(
                    "table",
                    format!("line {}: {} is not a probability", i + 1, prob),
                ));
            }

            let (Some(src), Some(trg)) = (
                lookup(&self.source_vocab, src, self.n_words_src),
                lookup(&self.target_vocab, trg, self.n_words),
            ) else {
                stats.num_skipped += 1;
                continue;
            };

            let src = src as usize;
            if table.len() <= src {
                table.resize_with(src + 1, HashMap::new);
            }
            if table[src].insert(trg, prob).is_some() {
                stats.num_overwritten += 1;
            }
        }

        let rows: Vec<Vec<TranslationEntry>> = table
            .into_iter()
            .map(|row| {
                let mut row: Vec<_> = row
                    .into_iter()
                    .map(|(target, prob)| TranslationEntry { target, prob })
                    .collect();
                row.sort_unstable_by_key(|e| e.target);
                row
            })
            .collect();

        let params = LexicalParams {
            n_words_src: u32::try_from(self.n_words_src)?,
            n_words: u32::try_from(self.n_words)?,
            floor: self.floor,
            rows,
        };
        params.validate()?;
        stats.num_entries = params.num_entries();

        if stats.num_skipped != 0 {
            log::warn!("{} table lines skipped: out-of-vocabulary tokens", stats.num_skipped);
        }
        Ok((params, stats))
    }
}

fn lookup(vocab: &Vocabulary, token: &str, n_words: usize) -> Option<u32> {
    let id = if token == EOS_TOKEN {
        Some(EOS_ID)
    } else {
        vocab.get(token)
    }?;
    (n_words == 0 || (id as usize) < n_words).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::corpus::SentencePair;

    const EPS: f32 = 1e-5;

    fn vocabs() -> (Vocabulary, Vocabulary) {
        (
            Vocabulary::from_entries([("eos", 0), ("UNK", 1), ("das", 2), ("Haus", 3)]),
            Vocabulary::from_entries([("eos", 0), ("UNK", 1), ("the", 2), ("house", 3)]),
        )
    }

    fn model() -> LexicalModel {
        let table = "\
<eos> <eos> 1.0
das the 0.5
das house 0.1
Haus house 0.8
Haus the 0.1
";
        let (src, trg) = vocabs();
        let (params, stats) = LexicalModelBuilder::new(src, trg)
            .floor(0.01)
            .from_reader(table.as_bytes())
            .unwrap();
        assert_eq!(stats.num_entries, 5);
        LexicalModel::new(params).unwrap()
    }

    #[test]
    fn test_prob_lookup() {
        let model = model();
        assert!((model.prob(2, 2) - 0.5).abs() < 1e-6);
        assert!((model.prob(3, 3) - 0.8).abs() < 1e-6);
        assert!((model.prob(3, 0) - 0.01).abs() < 1e-6);
        assert!((model.prob(42, 2) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_score_pair() {
        let model = model();
        // source: das Haus <eos>, target: the house <eos>
        let (cost, matrix) = model.score_pair(&[2, 3, 0], &[2, 3, 0], true);

        let p_the = (0.5 + 0.1 + 0.01) / 3.0f64;
        let p_house = (0.1 + 0.8 + 0.01) / 3.0f64;
        let p_eos = (0.01 + 0.01 + 1.0) / 3.0f64;
        let expected = -(p_the.ln() + p_house.ln() + p_eos.ln());
        assert!((cost - expected as f32).abs() < EPS);

        let matrix = matrix.unwrap();
        assert_eq!(matrix.target_len(), 3);
        assert_eq!(matrix.source_len(), 3);
        for row in &matrix.rows {
            let total: f32 = row.iter().sum();
            assert!((total - 1.0).abs() < EPS);
        }
        assert!((matrix.rows[1][1] - (0.8 / 0.91) as f32).abs() < EPS);
    }

    #[test]
    fn test_score_batch_matches_pairs() {
        let model = model();
        let pairs = vec![
            SentencePair {
                source: vec![vec![2, 3]],
                target: vec![2, 3],
            },
            SentencePair {
                source: vec![vec![3]],
                target: vec![],
            },
        ];
        let batch = Batch::prepare(&pairs);
        let out = model.score(&batch, false).unwrap();
        assert!(out.alignments.is_none());
        assert_eq!(out.costs.len(), 2);
        assert_eq!(out.costs[0], model.score_pair(&[2, 3, 0], &[2, 3, 0], false).0);
        assert_eq!(out.costs[1], model.score_pair(&[3, 0], &[0], false).0);

        let out = model.score(&batch, true).unwrap();
        let alignments = out.alignments.unwrap();
        assert_eq!(alignments.len(), 2);
        assert_eq!(alignments[1].target_len(), 1);
        assert_eq!(alignments[1].source_len(), 2);
    }

    #[test]
    fn test_builder_skips_and_overwrites() {
        let table = "\
das the 0.5
das garden 0.3
das the 0.6

Haus house 0.9
";
        let (src, trg) = vocabs();
        let (params, stats) = LexicalModelBuilder::new(src, trg)
            .n_words(4)
            .from_reader(table.as_bytes())
            .unwrap();
        assert_eq!(stats.num_skipped, 1);
        assert_eq!(stats.num_overwritten, 1);
        assert_eq!(stats.num_entries, 2);
        assert_eq!(params.n_words, 4);
        assert_eq!(params.floor, DEFAULT_FLOOR);
        assert_eq!(params.rows[2], vec![TranslationEntry { target: 2, prob: 0.6 }]);
    }

    #[test]
    fn test_builder_truncated_vocab() {
        let (src, trg) = vocabs();
        let (_, stats) = LexicalModelBuilder::new(src, trg)
            .n_words_src(3)
            .from_reader("Haus house 0.9\ndas the 0.4\n".as_bytes())
            .unwrap();
        assert_eq!(stats.num_skipped, 1);
        assert_eq!(stats.num_entries, 1);
    }

    #[test]
    fn test_builder_rejects_bad_lines() {
        let (src, trg) = vocabs();
        let err = LexicalModelBuilder::new(src.clone(), trg.clone())
            .from_reader("das the\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ScoreError::InvalidFormat(_)));

        let err = LexicalModelBuilder::new(src.clone(), trg.clone())
            .from_reader("das the 1.5\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ScoreError::InvalidFormat(_)));

        let err = LexicalModelBuilder::new(src, trg)
            .from_reader("das the abc\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ScoreError::ParseFloat(_)));
    }
}
