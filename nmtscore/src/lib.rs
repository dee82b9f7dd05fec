//! # nmtscore
//!
//! nmtscore scores parallel text with translation models: every target
//! sentence receives the negative log-probability of being produced from its
//! source sentence, optionally length-normalized, one score per model.
//!
//! ## Examples
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::fs::{self, File};
//!
//! use nmtscore::model::lexical::LexicalModelBuilder;
//! use nmtscore::{Model, Rescorer, ScoreOptions, Vocabulary};
//!
//! let dir = tempfile::tempdir()?;
//! let src_dict = dir.path().join("vocab.de.json");
//! let trg_dict = dir.path().join("vocab.en.json");
//! fs::write(&src_dict, r#"{"eos": 0, "UNK": 1, "das": 2, "Haus": 3}"#)?;
//! fs::write(&trg_dict, r#"{"eos": 0, "UNK": 1, "the": 2, "house": 3}"#)?;
//!
//! let table = "das the 0.9\nHaus house 0.8\n<eos> <eos> 1.0\n";
//! let (params, _) = LexicalModelBuilder::new(
//!     Vocabulary::from_path(&src_dict)?,
//!     Vocabulary::from_path(&trg_dict)?,
//! )
//! .from_reader(table.as_bytes())?;
//!
//! let model_path = dir.path().join("model.bin");
//! params.write(File::create(&model_path)?)?;
//! let config = serde_json::json!({ "dictionaries": [src_dict, trg_dict] });
//! fs::write(dir.path().join("model.bin.json"), config.to_string())?;
//!
//! let rescorer = Rescorer::new(vec![Model::load(&model_path)?], ScoreOptions::default())?;
//! let scores = rescorer.score_corpus("das Haus\n".as_bytes(), "the house\n".as_bytes())?;
//!
//! assert_eq!(scores.num_lines(), 1);
//! assert_eq!(scores.length(0), 3);
//! assert!(scores.scores(0)[0] > 0.0);
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]

pub mod alignment;
pub mod common;
pub mod config;
pub mod corpus;
pub mod errors;
pub mod model;
pub mod rescore;
pub mod vocab;

#[cfg(test)]
mod test_utils;

pub use model::Model;
pub use rescore::{Rescorer, ScoreOptions};
pub use vocab::Vocabulary;

/// Version number of this library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
