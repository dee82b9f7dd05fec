//! Attention/alignment matrices and their on-disk formats.
//!
//! Matrices are first streamed to a sidecar file, one JSON object per line
//! (`{"matrix": [[...], ...]}`). Once scoring is over, the sidecar is merged
//! with the original sentences into one JSON object per pair:
//!
//! ```text
//! {"id":0,"source_sent":"das Haus","target_sent":"the house","matrix":[[...],...]}
//! ```
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::append_extension;
use crate::errors::{Result, ScoreError};

/// Attention weights of one sentence pair.
///
/// `rows[i][j]` is the weight of source position `j` when predicting target
/// position `i`. Both dimensions include the end-of-sequence position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMatrix {
    /// Rows indexed by target position.
    pub rows: Vec<Vec<f32>>,
}

impl AlignmentMatrix {
    /// Gets the number of target positions.
    #[inline(always)]
    pub fn target_len(&self) -> usize {
        self.rows.len()
    }

    /// Gets the number of source positions.
    #[inline(always)]
    pub fn source_len(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

#[derive(Serialize, Deserialize)]
struct SidecarEntry {
    matrix: Vec<Vec<f32>>,
}

/// A combined alignment entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    /// Zero-based index of the pair in the corpus.
    pub id: usize,

    /// Source sentence, trimmed.
    pub source_sent: String,

    /// Target sentence, trimmed.
    pub target_sent: String,

    /// Attention weights, see [`AlignmentMatrix::rows`].
    pub matrix: Vec<Vec<f32>>,
}

/// Returns the path of the combined alignment file for a score output path.
pub fn alignment_path<P>(output: P) -> PathBuf
where
    P: AsRef<Path>,
{
    append_extension(output.as_ref(), "alignment")
}

/// Temporary file receiving alignment matrices as they are computed.
///
/// The file is created next to the score output with the prefix
/// `<output>.json` and is removed when this value is dropped.
pub struct AlignmentSidecar {
    wtr: BufWriter<NamedTempFile>,
    len: usize,
}

impl AlignmentSidecar {
    /// Creates an empty sidecar for the score output at `output`.
    pub fn new<P>(output: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let output = output.as_ref();
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = output.file_name().ok_or_else(|| {
            ScoreError::invalid_argument("output", format!("{} is not a file path", output.display()))
        })?;
        let mut prefix = name.to_os_string();
        prefix.push(".json");

        let file = tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)?;
        log::debug!("Writing alignment sidecar to {}", file.path().display());
        Ok(Self {
            wtr: BufWriter::new(file),
            len: 0,
        })
    }

    /// Appends a matrix.
    pub fn push(&mut self, matrix: &AlignmentMatrix) -> Result<()> {
        serde_json::to_writer(
            &mut self.wtr,
            &SidecarEntry {
                matrix: matrix.rows.clone(),
            },
        )?;
        self.wtr.write_all(b"\n")?;
        self.len += 1;
        Ok(())
    }

    /// Gets the number of matrices written so far.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if no matrix has been written.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets the path of the underlying temporary file.
    pub fn path(&self) -> &Path {
        self.wtr.get_ref().path()
    }

    /// Merges the sidecar with the original text into `wtr`, consuming the sidecar.
    pub fn combine<S, T, W>(self, source: S, target: T, wtr: W) -> Result<usize>
    where
        S: BufRead,
        T: BufRead,
        W: Write,
    {
        let file = self.wtr.into_inner().map_err(|e| e.into_error())?;
        let reader: File = file.reopen()?;
        combine_source_target_text(source, target, BufReader::new(reader), wtr)
    }
}

/// Merges alignment sidecar entries with the sentence pairs they belong to.
///
/// Returns the number of records written.
///
/// # Errors
///
/// [`ScoreError`] is returned when the number of sidecar entries differs from
/// the number of sentence pairs, or when an entry cannot be parsed.
pub fn combine_source_target_text<S, T, R, W>(
    source: S,
    target: T,
    sidecar: R,
    mut wtr: W,
) -> Result<usize>
where
    S: BufRead,
    T: BufRead,
    R: Read,
    W: Write,
{
    let mut entries = serde_json::Deserializer::from_reader(sidecar).into_iter::<SidecarEntry>();
    let mut source = source.lines();
    let mut target = target.lines();
    let mut id = 0;

    loop {
        let (src, trg) = match (source.next(), target.next()) {
            (Some(src), Some(trg)) => (src?, trg?),
            (None, None) => break,
            _ => {
                return Err(ScoreError::invalid_format(
                    "corpus",
                    format!("source and target differ in length after line {id}"),
                ));
            }
        };
        let entry = entries.next().ok_or_else(|| {
            ScoreError::invalid_state(
                "missing alignment",
                format!("no alignment entry for pair {id}"),
            )
        })??;
        let record = AlignmentRecord {
            id,
            source_sent: src.trim_ascii().to_string(),
            target_sent: trg.trim_ascii().to_string(),
            matrix: entry.matrix,
        };
        serde_json::to_writer(&mut wtr, &record)?;
        wtr.write_all(b"\n")?;
        id += 1;
    }

    if entries.next().is_some() {
        return Err(ScoreError::invalid_state(
            "surplus alignment",
            format!("more alignment entries than the {id} sentence pairs"),
        ));
    }
    wtr.flush()?;
    Ok(id)
}
