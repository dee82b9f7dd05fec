use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use nmtscore::Vocabulary;
use nmtscore::config::ModelConfig;
use nmtscore::errors::ScoreError;
use nmtscore::model::lexical::{DEFAULT_FLOOR, LexicalModelBuilder};
use nmtscore::model::weights::LexicalParams;
use tempfile::NamedTempFile;

#[derive(Parser, Debug)]
#[clap(
    name = "build",
    about = "A program to build lexical weights from a translation table."
)]
pub struct Args {
    /// Translation table, one `source_token target_token probability` per line.
    #[clap(short = 't', long)]
    table_in: PathBuf,

    /// Model configuration (JSON) naming the source and target dictionaries.
    #[clap(short = 'm', long)]
    config_in: PathBuf,

    /// File to which the weights are output. Compressed with zstd when it ends in `.zst`.
    #[clap(short = 'o', long)]
    weights_out: PathBuf,

    /// Probability of pairs missing from the table.
    #[clap(long, default_value_t = DEFAULT_FLOOR)]
    floor: f32,

    /// Also copies the configuration to `<weights_out>.json`, so that the
    /// weights can be scored with directly.
    #[clap(long)]
    write_config: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to persist the weights: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Weights building failed: {0}")]
    Score(#[from] ScoreError),
}

pub fn run(args: Args) -> Result<(), BuildError> {
    println!("Loading the configuration...");
    let config = ModelConfig::from_json_path(&args.config_in)?;

    println!("Compiling the lexical table...");
    let params = build_params(&config, &args.table_in, args.floor)?;

    println!("Writing the weights...");
    write_params(&params, &args.weights_out)?;

    if args.write_config {
        let mut name = OsString::from(args.weights_out.as_os_str());
        name.push(".json");
        let config_out = PathBuf::from(name);
        let mut wtr = BufWriter::new(File::create(&config_out)?);
        config.write_json(&mut wtr)?;
        wtr.flush()?;
        println!("Wrote the configuration to {}", config_out.display());
    }

    println!("Successfully built the weights to {}", args.weights_out.display());
    Ok(())
}

/// Builds the parameters from the word dictionaries named by `config`.
pub fn build_params(
    config: &ModelConfig,
    table: &Path,
    floor: f32,
) -> Result<LexicalParams, BuildError> {
    let source_vocab = Vocabulary::from_path(&config.source_dictionaries()[0])?;
    let target_vocab = Vocabulary::from_path(config.target_dictionary())?;

    let (params, stats) = LexicalModelBuilder::new(source_vocab, target_vocab)
        .n_words_src(config.source_vocab_size())
        .n_words(config.target_vocab_size())
        .floor(floor)
        .from_reader(BufReader::new(File::open(table)?))?;

    println!(
        "#entries={}, #skipped={}, #overwritten={}",
        stats.num_entries, stats.num_skipped, stats.num_overwritten
    );
    Ok(params)
}

/// Writes `params` to `path` through a temporary file in the same directory.
pub fn write_params(params: &LexicalParams, path: &Path) -> Result<(), BuildError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;

    let is_zstd = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("zst"));
    if is_zstd {
        let mut encoder = zstd::Encoder::new(BufWriter::new(tmp.as_file_mut()), 19)?;
        params.write(&mut encoder)?;
        encoder.finish()?.flush()?;
    } else {
        let mut wtr = BufWriter::new(tmp.as_file_mut());
        params.write(&mut wtr)?;
        wtr.flush()?;
    }

    tmp.persist(path)?;
    Ok(())
}
