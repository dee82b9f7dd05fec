//! Scoring of a parallel corpus with one or more models.
use std::io::{BufRead, Write};

use crate::alignment::AlignmentMatrix;
use crate::common::DEFAULT_BATCH_SIZE;
use crate::corpus::{Batch, TextIterator};
use crate::errors::{Result, ScoreError};
use crate::model::Model;
use crate::vocab::{InverseVocabulary, Vocabulary};

/// Options of a scoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOptions {
    batch_size: usize,
    normalize: bool,
    verbose: bool,
    alignment: bool,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            normalize: false,
            verbose: false,
            alignment: false,
        }
    }
}

impl ScoreOptions {
    /// Sets the number of sentence pairs per minibatch.
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Divides each score by the target length, end-of-sequence included.
    pub const fn normalize(mut self, yes: bool) -> Self {
        self.normalize = yes;
        self
    }

    /// Reports progress after each batch.
    pub const fn verbose(mut self, yes: bool) -> Self {
        self.verbose = yes;
        self
    }

    /// Collects the attention matrices of the first model.
    pub const fn alignment(mut self, yes: bool) -> Self {
        self.alignment = yes;
        self
    }

    /// Gets the minibatch size.
    #[inline(always)]
    pub const fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// Checks if scores are length-normalized.
    #[inline(always)]
    pub const fn is_normalized(&self) -> bool {
        self.normalize
    }

    /// Checks if alignments are collected.
    #[inline(always)]
    pub const fn with_alignment(&self) -> bool {
        self.alignment
    }
}

/// Scores of a corpus, one column per model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    scores: Vec<Vec<f32>>,
    lengths: Vec<usize>,
    alignments: Option<Vec<AlignmentMatrix>>,
}

impl ScoreTable {
    /// Gets the number of scored lines.
    #[inline(always)]
    pub fn num_lines(&self) -> usize {
        self.lengths.len()
    }

    /// Gets the number of models.
    #[inline(always)]
    pub fn num_models(&self) -> usize {
        self.scores.len()
    }

    /// Gets the scores of the `model`-th model, in line order.
    #[inline(always)]
    pub fn scores(&self, model: usize) -> &[f32] {
        &self.scores[model]
    }

    /// Gets the scores of every model for the `line`-th line.
    pub fn line_scores(&self, line: usize) -> Vec<f32> {
        self.scores.iter().map(|s| s[line]).collect()
    }

    /// Gets the target length of the `line`-th line, end-of-sequence included.
    #[inline(always)]
    pub fn length(&self, line: usize) -> usize {
        self.lengths[line]
    }

    /// Gets the alignments, present when they were requested.
    #[inline(always)]
    pub fn alignments(&self) -> Option<&[AlignmentMatrix]> {
        self.alignments.as_deref()
    }

    /// Takes the alignments out of the table.
    pub fn take_alignments(&mut self) -> Option<Vec<AlignmentMatrix>> {
        self.alignments.take()
    }
}

/// Scores parallel text with an ensemble of models.
///
/// The corpus is batched once with the dictionaries of the first model and
/// every batch is handed to each model in turn.
pub struct Rescorer {
    models: Vec<Model>,
    options: ScoreOptions,
}

impl Rescorer {
    /// Creates a new rescorer.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when `models` is empty or the batch size is zero.
    pub fn new(models: Vec<Model>, options: ScoreOptions) -> Result<Self> {
        let Some(first) = models.first() else {
            return Err(ScoreError::invalid_argument(
                "models",
                "at least one model is required",
            ));
        };
        if options.batch_size == 0 {
            return Err(ScoreError::invalid_argument(
                "batch_size",
                "must be at least 1",
            ));
        }
        for model in &models[1..] {
            if model.config().dictionaries != first.config().dictionaries {
                log::warn!(
                    "{} uses other dictionaries than {}; the corpus is encoded with the latter",
                    model.path().display(),
                    first.path().display()
                );
            }
        }
        if options.alignment {
            log::info!("Save weight mode ON, alignment matrix will be saved.");
        }
        Ok(Self { models, options })
    }

    /// Gets the models.
    #[inline(always)]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Gets the options.
    #[inline(always)]
    pub fn options(&self) -> &ScoreOptions {
        &self.options
    }

    /// Loads the source factor and target vocabularies of the first model.
    pub fn load_vocabularies(&self) -> Result<(Vec<Vocabulary>, Vocabulary)> {
        let config = self.models[0].config();
        let mut source_vocabs = config
            .source_dictionaries()
            .iter()
            .map(Vocabulary::from_path)
            .collect::<Result<Vec<_>>>()?;
        source_vocabs[0] =
            std::mem::take(&mut source_vocabs[0]).truncate(config.source_vocab_size());
        let target_vocab =
            Vocabulary::from_path(config.target_dictionary())?.truncate(config.target_vocab_size());
        Ok((source_vocabs, target_vocab))
    }

    /// Scores every pair of a line-aligned corpus.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when a dictionary cannot be loaded, the two
    /// texts differ in length, or a scorer fails or returns the wrong number
    /// of results.
    pub fn score_corpus<S, T>(&self, source: S, target: T) -> Result<ScoreTable>
    where
        S: BufRead,
        T: BufRead,
    {
        let mut alignments = self.options.alignment.then(Vec::new);
        let mut table = self.score_corpus_with(source, target, |matrix| {
            if let Some(alignments) = alignments.as_mut() {
                alignments.push(matrix);
            }
            Ok(())
        })?;
        table.alignments = alignments;
        Ok(table)
    }

    /// Scores every pair of a line-aligned corpus, handing each attention
    /// matrix of the first model to `on_alignment` in line order as soon as
    /// its batch is scored.
    ///
    /// The returned table carries no alignments. `on_alignment` is only
    /// called when alignments are enabled in the options.
    ///
    /// # Errors
    ///
    /// Same as [`Rescorer::score_corpus`], plus any error of `on_alignment`.
    pub fn score_corpus_with<S, T, F>(
        &self,
        source: S,
        target: T,
        mut on_alignment: F,
    ) -> Result<ScoreTable>
    where
        S: BufRead,
        T: BufRead,
        F: FnMut(AlignmentMatrix) -> Result<()>,
    {
        let (source_vocabs, target_vocab) = self.load_vocabularies()?;
        let inverse = self
            .options
            .verbose
            .then(|| (source_vocabs[0].invert(), target_vocab.invert()));

        let config = self.models[0].config();
        let pairs = TextIterator::new(
            source,
            target,
            source_vocabs,
            target_vocab,
            config.source_vocab_size(),
            config.target_vocab_size(),
            self.options.batch_size,
        )?;

        let mut table = ScoreTable {
            scores: vec![vec![]; self.models.len()],
            lengths: vec![],
            alignments: None,
        };

        for batch in pairs {
            let batch = Batch::prepare(&batch?);
            let offset = table.lengths.len();
            table
                .lengths
                .extend((0..batch.n_samples()).map(|i| batch.target_len(i)));

            for (m, model) in self.models.iter().enumerate() {
                let alignment = self.options.alignment && m == 0;
                let output = model.scorer().score(&batch, alignment)?;
                if output.costs.len() != batch.n_samples() {
                    return Err(ScoreError::invalid_state(
                        "scorer output size mismatch",
                        format!(
                            "{} returned {} costs for {} pairs",
                            model.path().display(),
                            output.costs.len(),
                            batch.n_samples()
                        ),
                    ));
                }

                let scores = &mut table.scores[m];
                for (i, cost) in output.costs.into_iter().enumerate() {
                    scores.push(if self.options.normalize {
                        cost / batch.target_len(i) as f32
                    } else {
                        cost
                    });
                }

                if alignment {
                    let matrices = output.alignments.unwrap_or_default();
                    if matrices.len() != batch.n_samples() {
                        return Err(ScoreError::invalid_state(
                            "scorer output size mismatch",
                            format!(
                                "{} returned {} alignments for {} pairs",
                                model.path().display(),
                                matrices.len(),
                                batch.n_samples()
                            ),
                        ));
                    }
                    for matrix in matrices {
                        on_alignment(matrix)?;
                    }
                }

                if self.options.verbose {
                    log::info!(
                        "{}: {} samples computed",
                        model.path().display(),
                        offset + batch.n_samples()
                    );
                }
            }

            if let Some((src_inv, trg_inv)) = &inverse {
                log_batch(&batch, offset, &table, src_inv, trg_inv);
            }
        }

        Ok(table)
    }
}

fn log_batch(
    batch: &Batch,
    offset: usize,
    table: &ScoreTable,
    src_inv: &InverseVocabulary,
    trg_inv: &InverseVocabulary,
) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    for i in 0..batch.n_samples() {
        log::debug!(
            "{} ||| {} ||| {:?}",
            src_inv.decode(&batch.source_ids(0, i)),
            trg_inv.decode(&batch.target_ids(i)),
            table.line_scores(offset + i)
        );
    }
}

/// Writes one line per target sentence: the text stripped of ASCII
/// whitespace, a space, then the space-separated score of each model.
///
/// # Errors
///
/// [`ScoreError`] is returned when the number of target lines differs from
/// the number of scored lines, or on I/O failure.
pub fn write_scores<T, W>(table: &ScoreTable, target: T, mut wtr: W) -> Result<()>
where
    T: BufRead,
    W: Write,
{
    let mut n = 0;
    for line in target.lines() {
        let line = line?;
        if n >= table.num_lines() {
            return Err(ScoreError::invalid_state(
                "line count mismatch",
                format!("more than {} target lines", table.num_lines()),
            ));
        }
        let scores: Vec<String> = table.scores.iter().map(|s| s[n].to_string()).collect();
        writeln!(wtr, "{} {}", line.trim_ascii(), scores.join(" "))?;
        n += 1;
    }
    if n != table.num_lines() {
        return Err(ScoreError::invalid_state(
            "line count mismatch",
            format!("{} target lines for {} scores", n, table.num_lines()),
        ));
    }
    wtr.flush()?;
    Ok(())
}
