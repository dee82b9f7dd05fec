//! Padded minibatches built from sentence pairs.

use crate::common::EOS_ID;
use crate::corpus::SentencePair;

/// Padded, time-major model input for a minibatch.
///
/// Every sequence is terminated with [`EOS_ID`], so the source length of a
/// pair with `n` tokens is `n + 1`. Positions past the end of a sequence hold
/// [`EOS_ID`] with a mask value of `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    n_samples: usize,
    n_factors: usize,
    max_source_len: usize,
    max_target_len: usize,
    // [factor][t][sample]
    x: Vec<u32>,
    // [t][sample]
    x_mask: Vec<f32>,
    // [t][sample]
    y: Vec<u32>,
    // [t][sample]
    y_mask: Vec<f32>,
    source_lens: Vec<usize>,
    target_lens: Vec<usize>,
}

impl Batch {
    /// Builds the padded input from sentence pairs.
    pub fn prepare(pairs: &[SentencePair]) -> Self {
        let n_samples = pairs.len();
        let n_factors = pairs.iter().map(|p| p.source.len()).max().unwrap_or(1).max(1);
        let source_lens: Vec<usize> = pairs.iter().map(|p| p.source_len() + 1).collect();
        let target_lens: Vec<usize> = pairs.iter().map(|p| p.target_len() + 1).collect();
        let max_source_len = source_lens.iter().copied().max().unwrap_or(0);
        let max_target_len = target_lens.iter().copied().max().unwrap_or(0);

        let mut x = vec![EOS_ID; n_factors * max_source_len * n_samples];
        let mut x_mask = vec![0.0; max_source_len * n_samples];
        let mut y = vec![EOS_ID; max_target_len * n_samples];
        let mut y_mask = vec![0.0; max_target_len * n_samples];

        for (s, pair) in pairs.iter().enumerate() {
            for (f, ids) in pair.source.iter().enumerate() {
                for (t, &id) in ids.iter().enumerate() {
                    x[(f * max_source_len + t) * n_samples + s] = id;
                }
            }
            for t in 0..source_lens[s] {
                x_mask[t * n_samples + s] = 1.0;
            }
            for (t, &id) in pair.target.iter().enumerate() {
                y[t * n_samples + s] = id;
            }
            for t in 0..target_lens[s] {
                y_mask[t * n_samples + s] = 1.0;
            }
        }

        Self {
            n_samples,
            n_factors,
            max_source_len,
            max_target_len,
            x,
            x_mask,
            y,
            y_mask,
            source_lens,
            target_lens,
        }
    }

    /// Gets the number of sentence pairs.
    #[inline(always)]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Gets the number of source factors.
    #[inline(always)]
    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    /// Gets the padded source length.
    #[inline(always)]
    pub fn max_source_len(&self) -> usize {
        self.max_source_len
    }

    /// Gets the padded target length.
    #[inline(always)]
    pub fn max_target_len(&self) -> usize {
        self.max_target_len
    }

    /// Gets the source length of the `sample`-th pair, including the end-of-sequence position.
    #[inline(always)]
    pub fn source_len(&self, sample: usize) -> usize {
        self.source_lens[sample]
    }

    /// Gets the target length of the `sample`-th pair, including the end-of-sequence position.
    #[inline(always)]
    pub fn target_len(&self, sample: usize) -> usize {
        self.target_lens[sample]
    }

    /// Gets the source id of `factor` at time step `t`.
    #[inline(always)]
    pub fn x(&self, factor: usize, t: usize, sample: usize) -> u32 {
        self.x[(factor * self.max_source_len + t) * self.n_samples + sample]
    }

    /// Gets the source mask at time step `t`.
    #[inline(always)]
    pub fn x_mask(&self, t: usize, sample: usize) -> f32 {
        self.x_mask[t * self.n_samples + sample]
    }

    /// Gets the target id at time step `t`.
    #[inline(always)]
    pub fn y(&self, t: usize, sample: usize) -> u32 {
        self.y[t * self.n_samples + sample]
    }

    /// Gets the target mask at time step `t`.
    #[inline(always)]
    pub fn y_mask(&self, t: usize, sample: usize) -> f32 {
        self.y_mask[t * self.n_samples + sample]
    }

    /// Collects the unpadded source ids of `factor` for the `sample`-th pair,
    /// including the end-of-sequence id.
    pub fn source_ids(&self, factor: usize, sample: usize) -> Vec<u32> {
        (0..self.source_len(sample))
            .map(|t| self.x(factor, t, sample))
            .collect()
    }

    /// Collects the unpadded target ids of the `sample`-th pair, including the
    /// end-of-sequence id.
    pub fn target_ids(&self, sample: usize) -> Vec<u32> {
        (0..self.target_len(sample)).map(|t| self.y(t, sample)).collect()
    }
}
