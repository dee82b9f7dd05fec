//! Serialized parameters of the lexical translation model.
//!
//! Layout of a weights file:
//!
//! ```text
//! MODEL_MAGIC | sha256(payload) (32 bytes) | payload (rkyv)
//! ```
//!
//! A file whose name ends in `.zst` is the same layout compressed with zstd.
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use memmap2::Mmap;
use rkyv::rancor::Error;
use rkyv::util::AlignedVec;
use sha2::{Digest, Sha256};

use crate::errors::{Result, ScoreError};

/// Magic bytes identifying a lexical weights file.
pub const MODEL_MAGIC: &[u8] = b"NmtScoreLexicalWeights 0.1\n";

/// Magic bytes of a zip archive, the container of NumPy `.npz` parameter files.
const NPZ_MAGIC: &[u8] = b"PK\x03\x04";

const DIGEST_LEN: usize = 32;

/// A translation probability `t(target | source)`.
#[derive(Debug, Clone, Copy, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct TranslationEntry {
    /// Target id.
    pub target: u32,

    /// Probability, in `(0, 1]`.
    pub prob: f32,
}

/// Parameters of [`LexicalModel`](crate::model::lexical::LexicalModel).
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct LexicalParams {
    /// Source vocabulary size the table was built for, `0` meaning unbounded.
    pub n_words_src: u32,

    /// Target vocabulary size the table was built for, `0` meaning unbounded.
    pub n_words: u32,

    /// Probability of any pair missing from the table.
    pub floor: f32,

    /// Rows indexed by source id, each sorted by target id without duplicates.
    pub rows: Vec<Vec<TranslationEntry>>,
}

impl LexicalParams {
    /// Serializes the parameters.
    ///
    /// # Errors
    ///
    /// This function will return an error if writing to `wtr` fails or the
    /// `rkyv` serialization process encounters an error.
    pub fn write<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        let payload = rkyv::to_bytes::<Error>(self).map_err(|e| {
            ScoreError::invalid_state("rkyv serialization failed", e.to_string())
        })?;
        let digest = Sha256::digest(payload.as_slice());

        wtr.write_all(MODEL_MAGIC)?;
        wtr.write_all(&digest)?;
        wtr.write_all(&payload)?;
        Ok(())
    }

    /// Reads parameters from an uncompressed stream.
    pub fn read<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut buffer = Vec::new();
        rdr.read_to_end(&mut buffer)?;
        Self::from_slice(&buffer)
    }

    /// Reads parameters from a file.
    ///
    /// Files ending in `.zst` are decompressed on the fly. Others are memory-mapped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is corrupted, or is not
    /// a lexical weights file.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ScoreError::invalid_argument(
                "path",
                format!("Failed to open model file {}: {}", path.display(), e),
            )
        })?;

        let is_zstd = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("zst"));

        if is_zstd {
            log::debug!("Decompressing {}", path.display());
            let decoder = zstd::Decoder::new(BufReader::new(file))?;
            return Self::read(decoder);
        }

        // SAFETY: the mapping is read-only and dropped before returning.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_slice(&mmap)
    }

    /// Parses parameters from the bytes of a weights file.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.starts_with(NPZ_MAGIC) {
            return Err(ScoreError::invalid_argument(
                "data",
                "This appears to be a NumPy parameter archive of a neural model. \
                 Only lexical weights files can be scored.",
            ));
        }
        let Some(rest) = data.strip_prefix(MODEL_MAGIC) else {
            return Err(ScoreError::invalid_argument(
                "data",
                "The magic number of the input model mismatches.",
            ));
        };
        if rest.len() < DIGEST_LEN {
            return Err(ScoreError::invalid_format(
                "data",
                "Model file too small or corrupted.",
            ));
        }
        let (expected, payload) = rest.split_at(DIGEST_LEN);
        let actual = Sha256::digest(payload);
        if actual.as_slice() != expected {
            return Err(ScoreError::invalid_format(
                "data",
                format!(
                    "checksum mismatch: expected {}, found {}",
                    hex::encode(expected),
                    hex::encode(actual)
                ),
            ));
        }

        let mut aligned_bytes = AlignedVec::<16>::with_capacity(payload.len());
        aligned_bytes.extend_from_slice(payload);

        let params = rkyv::from_bytes::<Self, Error>(&aligned_bytes).map_err(|e| {
            ScoreError::invalid_state(
                "rkyv validation failed. The model file may be corrupted or incompatible.",
                e.to_string(),
            )
        })?;
        params.validate()?;
        Ok(params)
    }

    /// Checks the invariants that scoring relies on.
    pub fn validate(&self) -> Result<()> {
        if !(self.floor > 0.0 && self.floor <= 1.0) {
            return Err(ScoreError::invalid_format(
                "floor",
                format!("must be in (0, 1], got {}", self.floor),
            ));
        }
        for (src, row) in self.rows.iter().enumerate() {
            if row.windows(2).any(|w| w[0].target >= w[1].target) {
                return Err(ScoreError::invalid_format(
                    "rows",
                    format!("row {src} is not sorted by target id"),
                ));
            }
            if let Some(e) = row.iter().find(|e| !(e.prob > 0.0 && e.prob <= 1.0)) {
                return Err(ScoreError::invalid_format(
                    "rows",
                    format!("t({} | {}) = {} is not a probability", e.target, src, e.prob),
                ));
            }
        }
        Ok(())
    }

    /// Gets the number of stored pairs.
    pub fn num_entries(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LexicalParams {
        LexicalParams {
            n_words_src: 4,
            n_words: 4,
            floor: 1e-4,
            rows: vec![
                vec![TranslationEntry { target: 0, prob: 0.9 }],
                vec![],
                vec![
                    TranslationEntry { target: 2, prob: 0.7 },
                    TranslationEntry { target: 3, prob: 0.2 },
                ],
            ],
        }
    }

    #[test]
    fn test_write_read() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer).unwrap();
        assert!(buffer.starts_with(MODEL_MAGIC));

        let params = LexicalParams::read(buffer.as_slice()).unwrap();
        assert_eq!(params, sample());
        assert_eq!(params.num_entries(), 3);
    }

    #[test]
    fn test_from_path_plain_and_zstd() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("model.bin");
        sample().write(File::create(&plain).unwrap()).unwrap();
        assert_eq!(LexicalParams::from_path(&plain).unwrap(), sample());

        let compressed = dir.path().join("model.bin.zst");
        let mut encoder = zstd::Encoder::new(File::create(&compressed).unwrap(), 3).unwrap();
        sample().write(&mut encoder).unwrap();
        encoder.finish().unwrap();
        assert_eq!(LexicalParams::from_path(&compressed).unwrap(), sample());
    }

    #[test]
    fn test_corrupted_payload() {
        let mut buffer = Vec::new();
        sample().write(&mut buffer).unwrap();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xFF;

        let err = LexicalParams::read(buffer.as_slice()).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidFormat(_)));
    }

    #[test]
    fn test_wrong_magic() {
        let err = LexicalParams::from_slice(b"PK\x03\x04 numpy").unwrap_err();
        assert!(matches!(err, ScoreError::InvalidArgument(_)));

        let err = LexicalParams::from_slice(b"something else entirely").unwrap_err();
        assert!(matches!(err, ScoreError::InvalidArgument(_)));

        let err = LexicalParams::from_slice(MODEL_MAGIC).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidFormat(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LexicalParams::from_path(dir.path().join("nothing.bin")).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate() {
        let mut params = sample();
        params.rows[2].swap(0, 1);
        assert!(params.validate().is_err());

        let mut params = sample();
        params.floor = 0.0;
        assert!(params.validate().is_err());

        let mut params = sample();
        params.rows[0][0].prob = 1.5;
        assert!(params.validate().is_err());
    }
}
