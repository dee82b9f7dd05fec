use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use nmtscore::alignment::{AlignmentSidecar, alignment_path};
use nmtscore::errors::ScoreError;
use nmtscore::rescore::write_scores;
use nmtscore::{Model, Rescorer, ScoreOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "score",
    version,
    about = "Rescores parallel text with one or more translation models."
)]
struct Args {
    /// Model files to score with. One score column is written per model.
    #[clap(short = 'm', long, required = true, num_args = 1..)]
    models: Vec<PathBuf>,

    /// Source text, one sentence per line.
    #[clap(short = 's', long)]
    source: PathBuf,

    /// Target text, one sentence per line, aligned with the source text.
    #[clap(short = 't', long)]
    target: PathBuf,

    /// File to which the scores are written. Defaults to stdout.
    #[clap(short = 'o', long)]
    output: Option<PathBuf>,

    /// Number of sentence pairs scored at once.
    #[clap(short = 'b', long, default_value_t = nmtscore::common::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Divides each score by the target length, end-of-sequence included.
    #[clap(short = 'n', long)]
    normalize: bool,

    /// Reports progress on stderr.
    #[clap(short = 'v', long)]
    verbose: bool,

    /// Also writes the attention matrices of the first model to `<output>.alignment`.
    #[clap(short = 'w', long)]
    walign: bool,
}

#[derive(Debug, thiserror::Error)]
enum ScoreCliError {
    #[error("--walign requires --output; alignments are written next to the score file")]
    AlignmentToStdout,

    #[error("{}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Score(#[from] ScoreError),
}

fn open(path: &Path) -> Result<BufReader<File>, ScoreCliError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ScoreCliError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn run(args: Args) -> Result<(), ScoreCliError> {
    if args.walign && args.output.is_none() {
        return Err(ScoreCliError::AlignmentToStdout);
    }

    let models = args
        .models
        .iter()
        .map(Model::load)
        .collect::<Result<Vec<_>, _>>()?;
    let options = ScoreOptions::default()
        .batch_size(args.batch_size)
        .normalize(args.normalize)
        .verbose(args.verbose)
        .alignment(args.walign);
    let rescorer = Rescorer::new(models, options)?;

    let mut sidecar = match &args.output {
        Some(output) if args.walign => Some(AlignmentSidecar::new(output)?),
        _ => None,
    };
    let table = rescorer.score_corpus_with(open(&args.source)?, open(&args.target)?, |matrix| {
        match sidecar.as_mut() {
            Some(sidecar) => sidecar.push(&matrix),
            None => Ok(()),
        }
    })?;
    log::info!("Scored {} sentence pairs", table.num_lines());

    match &args.output {
        Some(output) => {
            let mut wtr = BufWriter::new(File::create(output)?);
            write_scores(&table, open(&args.target)?, &mut wtr)?;
            wtr.flush()?;
        }
        None => {
            let stdout = io::stdout();
            write_scores(&table, open(&args.target)?, BufWriter::new(stdout.lock()))?;
        }
    }

    if let (Some(output), Some(sidecar)) = (&args.output, sidecar) {
        let path = alignment_path(output);
        let mut wtr = BufWriter::new(File::create(&path)?);
        let n = sidecar.combine(open(&args.source)?, open(&args.target)?, &mut wtr)?;
        wtr.flush()?;
        log::info!("Wrote {} alignments to {}", n, path.display());
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
