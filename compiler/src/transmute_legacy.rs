use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use nmtscore::Vocabulary;
use nmtscore::config::ModelConfig;
use nmtscore::errors::ScoreError;

#[derive(Parser, Debug)]
#[clap(
    name = "transmute-legacy",
    about = "Convert a legacy pickled configuration or dictionary to JSON."
)]
pub struct Args {
    /// Path to the pickled file (`.pkl`, optionally `.pkl.zst`).
    #[clap(value_name = "INPUT")]
    pub input: PathBuf,

    /// File to which the JSON is output. Defaults to INPUT with its extension
    /// replaced by `.json`.
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,

    /// Treat INPUT as a dictionary instead of a model configuration.
    #[clap(long)]
    dictionary: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransmuteLegacyError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error("Refusing to overwrite the input file: {0}")]
    SameInputOutput(PathBuf),
}

pub fn run(args: Args) -> Result<(), TransmuteLegacyError> {
    let output = args
        .output
        .unwrap_or_else(|| default_output(&args.input));
    if output == args.input {
        return Err(TransmuteLegacyError::SameInputOutput(output));
    }

    let reader = get_reader(&args.input)?;
    let mut writer = BufWriter::new(File::create(&output)?);

    if args.dictionary {
        let vocab = Vocabulary::from_pickle_reader(reader)?;
        println!("Read {} dictionary entries.", vocab.len());
        vocab.write_json(&mut writer)?;
    } else {
        let config = ModelConfig::from_pickle_reader(reader)?;
        println!(
            "Read a configuration with {} dictionaries and {} other keys.",
            config.dictionaries.len(),
            config.extra.len()
        );
        config.write_json(&mut writer)?;
    }
    writer.flush()?;

    println!("Successfully converted to {}", output.display());
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let is_zstd = input
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("zst"));
    let stem = if is_zstd {
        input.with_extension("")
    } else {
        input.to_path_buf()
    };
    stem.with_extension("json")
}

fn get_reader(path: &Path) -> Result<Box<dyn Read>, TransmuteLegacyError> {
    let file = File::open(path)?;

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    match extension.as_deref() {
        Some("zst") => {
            println!("Detected .zst extension, decompressing...");
            let decoder = zstd::Decoder::new(file)?;
            Ok(Box::new(BufReader::new(decoder)))
        }
        _ => Ok(Box::new(BufReader::new(file))),
    }
}
