//! Models and the scoring interface.
//!
//! [`Scorer`] is the boundary to whatever executes a translation model: given
//! a padded [`Batch`], it returns one cost per sentence pair and, on request,
//! the attention matrices. Everything else in this crate only deals with text,
//! vocabularies and files.
pub mod lexical;
pub mod weights;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::alignment::AlignmentMatrix;
use crate::config::ModelConfig;
use crate::corpus::Batch;
use crate::errors::{Result, ScoreError};
use crate::model::lexical::LexicalModel;
use crate::model::weights::LexicalParams;

/// Output of a [`Scorer`] for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    /// Negative log-probability of each target sentence, in batch order.
    pub costs: Vec<f32>,

    /// Attention matrices in batch order, present when requested.
    pub alignments: Option<Vec<AlignmentMatrix>>,
}

/// A callable that scores batches of sentence pairs.
pub trait Scorer {
    /// Computes the cost of each pair in `batch`.
    ///
    /// When `alignment` is true, the output must also carry one
    /// `target_len x source_len` matrix per pair.
    fn score(&self, batch: &Batch, alignment: bool) -> Result<BatchOutput>;
}

/// A model bundle: configuration plus a scorer built from its parameters.
pub struct Model {
    path: PathBuf,
    config: ModelConfig,
    scorer: Box<dyn Scorer>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Model {
    /// Loads the model stored at `path`.
    ///
    /// The configuration is read from the sidecar of `path` (see
    /// [`ModelConfig::for_model`]) and the parameters from `path` itself.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when either part cannot be read, or when the
    /// vocabulary sizes of the parameters disagree with the configuration.
    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let config = ModelConfig::for_model(path)?;
        let params = LexicalParams::from_path(path)?;
        check_vocab_size("n_words_src", config.n_words_src, params.n_words_src)?;
        check_vocab_size("n_words", config.n_words, params.n_words)?;

        log::info!(
            "Loaded {} ({} translation entries)",
            path.display(),
            params.num_entries()
        );
        let scorer = LexicalModel::new(params)?;
        Self::from_parts(path, config, Box::new(scorer))
    }

    /// Creates a model from an already constructed scorer.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when `config` lacks a target dictionary or
    /// its factor count disagrees with its source dictionaries.
    pub fn from_parts<P>(path: P, config: ModelConfig, scorer: Box<dyn Scorer>) -> Result<Self>
    where
        P: Into<PathBuf>,
    {
        config.validate()?;
        Ok(Self {
            path: path.into(),
            config,
            scorer,
        })
    }

    /// Gets the path the model was loaded from.
    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the configuration.
    #[inline(always)]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Gets the scorer.
    #[inline(always)]
    pub fn scorer(&self) -> &dyn Scorer {
        self.scorer.as_ref()
    }
}

fn check_vocab_size(arg: &'static str, configured: Option<usize>, built: u32) -> Result<()> {
    match configured {
        Some(n) if built != 0 && n != built as usize => Err(ScoreError::invalid_format(
            arg,
            format!("configuration says {n}, but the parameters were built for {built}"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    struct ConstantScorer;

    impl Scorer for ConstantScorer {
        fn score(&self, batch: &Batch, _alignment: bool) -> Result<BatchOutput> {
            Ok(BatchOutput {
                costs: vec![1.0; batch.n_samples()],
                alignments: None,
            })
        }
    }

    fn config(dictionaries: &[&str], factors: usize) -> ModelConfig {
        ModelConfig {
            dictionaries: dictionaries.iter().map(PathBuf::from).collect(),
            n_words_src: None,
            n_words: None,
            factors,
            dropout_embedding: 0.0,
            dropout_hidden: 0.0,
            dropout_source: 0.0,
            dropout_target: 0.0,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_from_parts_validates_config() {
        let config_ok = config(&["src.json", "trg.json"], 1);
        let model = Model::from_parts("m.npz", config_ok, Box::new(ConstantScorer)).unwrap();
        assert_eq!(model.config().source_dictionaries().len(), 1);

        for config in [
            config(&[], 1),
            config(&["trg.json"], 1),
            config(&["src.json", "trg.json"], 2),
        ] {
            let err = Model::from_parts("m.npz", config, Box::new(ConstantScorer)).unwrap_err();
            assert!(matches!(err, ScoreError::InvalidFormat(_)));
        }
    }

    #[test]
    fn test_source_dictionaries_of_empty_config() {
        assert!(config(&[], 1).source_dictionaries().is_empty());
    }

    #[test]
    fn test_check_vocab_size() {
        assert!(check_vocab_size("n_words", None, 10).is_ok());
        assert!(check_vocab_size("n_words", Some(10), 0).is_ok());
        assert!(check_vocab_size("n_words", Some(10), 10).is_ok());
        assert!(matches!(
            check_vocab_size("n_words", Some(10), 20),
            Err(ScoreError::InvalidFormat(_))
        ));
    }
}
