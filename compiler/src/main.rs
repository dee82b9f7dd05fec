mod build;
mod transmute_legacy;

use clap::Parser;
use thiserror::Error;

use crate::{build::BuildError, transmute_legacy::TransmuteLegacyError};

#[derive(Parser, Debug)]
#[clap(name = "compiler", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Build a lexical weights file from a translation table.
    Build(build::Args),

    /// Convert a legacy pickled configuration or dictionary to JSON.
    Transmute(transmute_legacy::Args),
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    BuildError(#[from] BuildError),
    #[error(transparent)]
    TransmuteLegacy(#[from] TransmuteLegacyError),
}

fn main() -> Result<(), CompileError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => Ok(build::run(args)?),
        Command::Transmute(args) => Ok(transmute_legacy::run(args)?),
    }
}
