use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::append_extension;
use crate::model::lexical::LexicalModelBuilder;
use crate::vocab::Vocabulary;

pub const SOURCE_DICT: &str = r#"{"eos": 0, "UNK": 1, "das": 2, "Haus": 3, "ist": 4, "klein": 5, "groß": 6}"#;
pub const TARGET_DICT: &str = r#"{"eos": 0, "UNK": 1, "the": 2, "house": 3, "is": 4, "small": 5, "big": 6}"#;
pub const FACTOR_DICT: &str = r#"{"eos": 0, "UNK": 1, "ART": 2, "NN": 3, "VB": 4, "ADJ": 5}"#;

pub const TABLE: &str = "\
das the 0.9
Haus house 0.8
ist is 0.7
klein small 0.6
groß big 0.6
klein big 0.05
<eos> <eos> 1.0
";

pub const SOURCE: &str = "das Haus ist klein\nHaus\n\ndas Haus ist groß\nklein\n";
pub const TARGET: &str = "the house is small\nhouse\n\nthe house is big\nsmall house\n";

/// A directory holding dictionaries and any number of lexical models.
pub struct ModelDir {
    pub dir: TempDir,
    pub source_dict: PathBuf,
    pub target_dict: PathBuf,
    pub factor_dict: PathBuf,
}

impl ModelDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source_dict = dir.path().join("vocab.de.json");
        let target_dict = dir.path().join("vocab.en.json");
        let factor_dict = dir.path().join("vocab.pos.json");
        fs::write(&source_dict, SOURCE_DICT).unwrap();
        fs::write(&target_dict, TARGET_DICT).unwrap();
        fs::write(&factor_dict, FACTOR_DICT).unwrap();
        Self {
            dir,
            source_dict,
            target_dict,
            factor_dict,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a model built from `table` and its JSON configuration.
    pub fn write_model(&self, name: &str, table: &str, config: serde_json::Value) -> PathBuf {
        let (params, _) = LexicalModelBuilder::new(
            Vocabulary::from_path(&self.source_dict).unwrap(),
            Vocabulary::from_path(&self.target_dict).unwrap(),
        )
        .from_reader(table.as_bytes())
        .unwrap();

        let model_path = self.path().join(name);
        if name.ends_with(".zst") {
            let mut encoder = zstd::Encoder::new(File::create(&model_path).unwrap(), 3).unwrap();
            params.write(&mut encoder).unwrap();
            encoder.finish().unwrap();
        } else {
            params.write(File::create(&model_path).unwrap()).unwrap();
        }
        fs::write(append_extension(&model_path, "json"), config.to_string()).unwrap();
        model_path
    }

    /// Writes a single-factor model built from [`TABLE`].
    pub fn write_default_model(&self, name: &str) -> PathBuf {
        let config = serde_json::json!({
            "dictionaries": [self.source_dict, self.target_dict],
            "dim_word": 512,
        });
        self.write_model(name, TABLE, config)
    }
}
