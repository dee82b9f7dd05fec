//! Model configuration.
//!
//! Each model file `<model>` comes with a sidecar holding its hyperparameters,
//! either `<model>.json` or, for old models, a pickled dict `<model>.pkl`.
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ScoreError};

/// Hyperparameters of a trained model.
///
/// Only the keys needed for scoring are typed. Every other key is kept in
/// [`ModelConfig::extra`] so that a configuration survives a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Source factor dictionaries followed by the target dictionary.
    pub dictionaries: Vec<PathBuf>,

    /// Source vocabulary size. Ids at or above it are mapped to the unknown token.
    #[serde(default)]
    pub n_words_src: Option<usize>,

    /// Target vocabulary size. Ids at or above it are mapped to the unknown token.
    #[serde(default)]
    pub n_words: Option<usize>,

    /// Number of source factors.
    #[serde(default = "default_factors")]
    pub factors: usize,

    /// Dropout rate of embeddings. Missing in old models, meaning disabled.
    #[serde(default)]
    pub dropout_embedding: f64,

    /// Dropout rate of hidden layers. Missing in old models, meaning disabled.
    #[serde(default)]
    pub dropout_hidden: f64,

    /// Dropout rate of source words. Missing in old models, meaning disabled.
    #[serde(default)]
    pub dropout_source: f64,

    /// Dropout rate of target words. Missing in old models, meaning disabled.
    #[serde(default)]
    pub dropout_target: f64,

    /// Remaining hyperparameters, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

const fn default_factors() -> usize {
    1
}

impl ModelConfig {
    /// Loads the configuration of the model at `model_path`.
    ///
    /// `<model_path>.json` is tried first. On any failure, the legacy
    /// `<model_path>.pkl` is read instead. Relative dictionary paths that do not
    /// exist from the working directory are resolved against the directory of
    /// the configuration file.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when neither sidecar can be read, or when the
    /// configuration is inconsistent.
    pub fn for_model<P>(model_path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let model_path = model_path.as_ref();
        let json_path = append_extension(model_path, "json");

        let config = match File::open(&json_path)
            .map_err(ScoreError::from)
            .and_then(|f| Self::from_json_reader(BufReader::new(f)))
        {
            Ok(config) => config,
            Err(json_err) => {
                let pkl_path = append_extension(model_path, "pkl");
                log::warn!(
                    "Failed to load {} ({}), falling back to {}",
                    json_path.display(),
                    json_err,
                    pkl_path.display()
                );
                let file = File::open(&pkl_path).map_err(|e| {
                    ScoreError::invalid_argument(
                        "model_path",
                        format!(
                            "No usable configuration for {}: {}: {}; {}: {}",
                            model_path.display(),
                            json_path.display(),
                            json_err,
                            pkl_path.display(),
                            e
                        ),
                    )
                })?;
                Self::from_pickle_reader(BufReader::new(file))?
            }
        };

        let base_dir = model_path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_dictionaries(base_dir))
    }

    /// Reads a JSON configuration file.
    ///
    /// Dictionary paths are resolved as in [`ModelConfig::for_model`].
    pub fn from_json_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ScoreError::invalid_argument(
                "path",
                format!("Failed to open configuration {}: {}", path.display(), e),
            )
        })?;
        let config = Self::from_json_reader(BufReader::new(file))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolve_dictionaries(base_dir))
    }

    /// Reads a configuration serialized as a JSON object.
    pub fn from_json_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let config: Self = serde_json::from_reader(rdr)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration serialized as a pickled dict.
    pub fn from_pickle_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let options = serde_pickle::DeOptions::new().decode_strings();
        let config: Self = serde_pickle::from_reader(rdr, options)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn write_json<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        serde_json::to_writer_pretty(&mut wtr, self)?;
        wtr.write_all(b"\n")?;
        Ok(())
    }

    /// Gets the dictionaries of the source factors.
    #[inline(always)]
    pub fn source_dictionaries(&self) -> &[PathBuf] {
        self.dictionaries
            .split_last()
            .map_or(&[], |(_, sources)| sources)
    }

    /// Gets the dictionary of the target side.
    ///
    /// # Panics
    ///
    /// Panics if `dictionaries` is empty, which a validated configuration never is.
    #[inline(always)]
    pub fn target_dictionary(&self) -> &Path {
        &self.dictionaries[self.dictionaries.len() - 1]
    }

    /// Gets the source vocabulary size, `0` meaning unbounded.
    #[inline(always)]
    pub fn source_vocab_size(&self) -> usize {
        self.n_words_src.unwrap_or(0)
    }

    /// Gets the target vocabulary size, `0` meaning unbounded.
    #[inline(always)]
    pub fn target_vocab_size(&self) -> usize {
        self.n_words.unwrap_or(0)
    }

    /// Checks that there is a target dictionary and one dictionary per source factor.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dictionaries.len() < 2 {
            return Err(ScoreError::invalid_format(
                "dictionaries",
                format!(
                    "at least one source and one target dictionary are required, got {}",
                    self.dictionaries.len()
                ),
            ));
        }
        if self.factors != self.dictionaries.len() - 1 {
            return Err(ScoreError::invalid_format(
                "factors",
                format!(
                    "{} factors declared but {} source dictionaries given",
                    self.factors,
                    self.dictionaries.len() - 1
                ),
            ));
        }
        Ok(())
    }

    fn resolve_dictionaries(mut self, base_dir: &Path) -> Self {
        for dict in &mut self.dictionaries {
            if dict.is_relative() && !dict.exists() {
                let candidate = base_dir.join(&*dict);
                if candidate.exists() {
                    log::debug!("Resolved dictionary {} to {}", dict.display(), candidate.display());
                    *dict = candidate;
                }
            }
        }
        self
    }
}

/// Appends `.ext` to the full file name, keeping any existing extension.
pub(crate) fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
