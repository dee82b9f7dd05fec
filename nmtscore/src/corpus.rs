//! Line-aligned parallel corpora.
pub mod batch;

use std::io::{BufRead, Lines};

use crate::common::{FACTOR_SEPARATOR, UNK_ID};
use crate::errors::{Result, ScoreError};
use crate::vocab::Vocabulary;

pub use crate::corpus::batch::Batch;

/// A sentence pair mapped to vocabulary ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentencePair {
    /// Source ids, indexed by factor and then by token position.
    pub source: Vec<Vec<u32>>,

    /// Target ids.
    pub target: Vec<u32>,
}

impl SentencePair {
    /// Gets the number of source tokens.
    #[inline(always)]
    pub fn source_len(&self) -> usize {
        self.source.first().map_or(0, Vec::len)
    }

    /// Gets the number of target tokens.
    #[inline(always)]
    pub fn target_len(&self) -> usize {
        self.target.len()
    }
}

/// Iterator of minibatches over a line-aligned source and target text.
///
/// Batches are yielded in input order and never reordered by length, so the
/// `i`-th pair of the corpus is always the `i`-th scored pair.
pub struct TextIterator<S, T> {
    source: Lines<S>,
    target: Lines<T>,
    source_vocabs: Vec<Vocabulary>,
    target_vocab: Vocabulary,
    n_words_source: usize,
    n_words_target: usize,
    batch_size: usize,
    line_no: usize,
    finished: bool,
}

impl<S, T> TextIterator<S, T>
where
    S: BufRead,
    T: BufRead,
{
    /// Creates a new iterator.
    ///
    /// # Arguments
    ///
    ///  - `source_vocabs`: One vocabulary per source factor. The first is the word factor.
    ///  - `n_words_source`, `n_words_target`: Vocabulary sizes. Word ids at or above
    ///    them are replaced with the unknown id. `0` disables the cap.
    ///  - `batch_size`: Maximum number of pairs in a batch.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when `batch_size` is zero or no source
    /// vocabulary is given.
    pub fn new(
        source: S,
        target: T,
        source_vocabs: Vec<Vocabulary>,
        target_vocab: Vocabulary,
        n_words_source: usize,
        n_words_target: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(ScoreError::invalid_argument(
                "batch_size",
                "must be at least 1",
            ));
        }
        if source_vocabs.is_empty() {
            return Err(ScoreError::invalid_argument(
                "source_vocabs",
                "at least one source vocabulary is required",
            ));
        }
        Ok(Self {
            source: source.lines(),
            target: target.lines(),
            source_vocabs,
            target_vocab,
            n_words_source,
            n_words_target,
            batch_size,
            line_no: 0,
            finished: false,
        })
    }

    /// Gets the number of source factors.
    #[inline(always)]
    pub fn num_factors(&self) -> usize {
        self.source_vocabs.len()
    }

    fn encode_source(&self, line: &str) -> Result<Vec<Vec<u32>>> {
        let n_factors = self.num_factors();
        let mut ids = vec![vec![]; n_factors];
        for token in line.split_ascii_whitespace() {
            if n_factors == 1 {
                ids[0].push(cap(self.source_vocabs[0].id(token), self.n_words_source));
                continue;
            }
            let factors: Vec<&str> = token.split(FACTOR_SEPARATOR).collect();
            if factors.len() != n_factors {
                return Err(ScoreError::invalid_format(
                    "source",
                    format!(
                        "line {}: token {:?} has {} factors, expected {}",
                        self.line_no,
                        token,
                        factors.len(),
                        n_factors
                    ),
                ));
            }
            for (i, (factor, vocab)) in factors.iter().zip(&self.source_vocabs).enumerate() {
                let id = vocab.id(factor);
                // Only the word factor is bounded by the vocabulary size.
                ids[i].push(if i == 0 { cap(id, self.n_words_source) } else { id });
            }
        }
        Ok(ids)
    }

    fn encode_target(&self, line: &str) -> Vec<u32> {
        line.split_ascii_whitespace()
            .map(|token| cap(self.target_vocab.id(token), self.n_words_target))
            .collect()
    }

    fn next_pair(&mut self) -> Result<Option<SentencePair>> {
        match (self.source.next(), self.target.next()) {
            (None, None) => Ok(None),
            (Some(src), Some(trg)) => {
                self.line_no += 1;
                let (src, trg) = (src?, trg?);
                Ok(Some(SentencePair {
                    source: self.encode_source(&src)?,
                    target: self.encode_target(&trg),
                }))
            }
            (Some(_), None) => Err(ScoreError::invalid_format(
                "target",
                format!("target text ends at line {} before the source text", self.line_no),
            )),
            (None, Some(_)) => Err(ScoreError::invalid_format(
                "source",
                format!("source text ends at line {} before the target text", self.line_no),
            )),
        }
    }
}

impl<S, T> Iterator for TextIterator<S, T>
where
    S: BufRead,
    T: BufRead,
{
    type Item = Result<Vec<SentencePair>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut pairs = Vec::with_capacity(self.batch_size);
        while pairs.len() < self.batch_size {
            match self.next_pair() {
                Ok(Some(pair)) => pairs.push(pair),
                Ok(None) => {
                    self.finished = true;
                    break;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        if pairs.is_empty() {
            None
        } else {
            Some(Ok(pairs))
        }
    }
}

#[inline(always)]
const fn cap(id: u32, n_words: usize) -> u32 {
    if n_words > 0 && id as usize >= n_words {
        UNK_ID
    } else {
        id
    }
}
