//! Token vocabularies.
//!
//! A vocabulary file maps each token to an integer id. Two serializations are
//! accepted: a JSON object (the current format) and a pickled dict or
//! `OrderedDict` (the legacy format). In both, id [`EOS_ID`] is the
//! end-of-sequence token and [`UNK_ID`] is the unknown token.
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use hashbrown::HashMap;
use serde::Serializer;

use crate::common::{EOS_ID, EOS_TOKEN, UNK_ID, UNK_TOKEN};
use crate::errors::{Result, ScoreError};

/// Mapping from a token to its id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    map: HashMap<String, u32>,
}

impl Vocabulary {
    /// Loads a vocabulary file, trying JSON first and falling back to a pickled dict.
    ///
    /// # Errors
    ///
    /// [`ScoreError`] is returned when the file cannot be read or when it is
    /// neither valid JSON nor a valid pickle.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            ScoreError::invalid_argument(
                "path",
                format!("Failed to open dictionary {}: {}", path.display(), e),
            )
        })?;

        match Self::from_json_reader(bytes.as_slice()) {
            Ok(vocab) => Ok(vocab),
            Err(json_err) => {
                log::debug!(
                    "{} is not a JSON dictionary ({}), trying pickle",
                    path.display(),
                    json_err
                );
                Self::from_pickle_reader(bytes.as_slice()).map_err(|pkl_err| {
                    ScoreError::invalid_format(
                        "dictionary",
                        format!(
                            "{}: neither JSON ({}) nor pickle ({})",
                            path.display(),
                            json_err,
                            pkl_err
                        ),
                    )
                })
            }
        }
    }

    /// Reads a vocabulary serialized as a JSON object.
    pub fn from_json_reader<R>(rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let map: HashMap<String, u32> = serde_json::from_reader(rdr)?;
        Ok(Self { map })
    }

    /// Reads a vocabulary serialized as a pickled dict or `collections.OrderedDict`.
    ///
    /// Byte strings written by Python 2 are decoded as UTF-8.
    pub fn from_pickle_reader<R>(mut rdr: R) -> Result<Self>
    where
        R: Read,
    {
        let mut bytes = vec![];
        rdr.read_to_end(&mut bytes)?;

        let options = serde_pickle::DeOptions::new().decode_strings();
        match serde_pickle::from_slice::<HashMap<String, u32>>(&bytes, options) {
            Ok(map) => Ok(Self { map }),
            Err(_) if mentions_ordered_dict(&bytes) => Self::from_ordered_dict_pickle(&bytes),
            Err(e) => Err(e.into()),
        }
    }

    /// serde-pickle resolves no `OrderedDict`, so the reference is rewritten to
    /// `copyreg._reconstructor`, which it reduces to a plain dict (the form
    /// filled by `SETITEMS`) or to its argument (the `[[key, id], ...]` form).
    fn from_ordered_dict_pickle(bytes: &[u8]) -> Result<Self> {
        let mut bytes = bytes.to_vec();
        for (from, to) in ORDERED_DICT_GLOBALS {
            bytes = replace_all(&bytes, from, to);
        }
        let options = serde_pickle::DeOptions::new()
            .decode_strings()
            .keep_restore_state();
        let value = serde_pickle::value_from_slice(&bytes, options)?;

        let mut map = HashMap::new();
        match value {
            serde_pickle::Value::Dict(dict) => {
                for (key, id) in dict {
                    let (token, id) = pickled_entry(key.into_value(), id)?;
                    map.insert(token, id);
                }
            }
            serde_pickle::Value::List(pairs) | serde_pickle::Value::Tuple(pairs) => {
                for pair in pairs {
                    let (token, id) = pickled_pair(pair)?;
                    map.insert(token, id);
                }
            }
            other => {
                return Err(ScoreError::invalid_format(
                    "dictionary",
                    format!("expected a pickled OrderedDict, got {other:?}"),
                ));
            }
        }
        Ok(Self { map })
    }

    /// Writes the vocabulary as a pretty-printed JSON object, entries ordered by id.
    pub fn write_json<W>(&self, mut wtr: W) -> Result<()>
    where
        W: Write,
    {
        let mut entries: Vec<(&str, u32)> =
            self.map.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        entries.sort_unstable_by_key(|&(_, id)| id);
        let mut ser = serde_json::Serializer::pretty(&mut wtr);
        (&mut ser).collect_map(entries)?;
        wtr.write_all(b"\n")?;
        Ok(())
    }

    /// Creates a vocabulary from `(token, id)` pairs.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            map: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Removes every entry whose id is `n_words` or greater.
    ///
    /// `0` leaves the vocabulary untouched.
    pub fn truncate(mut self, n_words: usize) -> Self {
        if n_words != 0 {
            self.map.retain(|_, id| (*id as usize) < n_words);
        }
        self
    }

    /// Gets the id of `token`, if present.
    #[inline(always)]
    pub fn get(&self, token: &str) -> Option<u32> {
        self.map.get(token).copied()
    }

    /// Gets the id of `token`, or [`UNK_ID`] when it is absent.
    #[inline(always)]
    pub fn id(&self, token: &str) -> u32 {
        self.get(token).unwrap_or(UNK_ID)
    }

    /// Gets the number of entries.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Checks if the vocabulary has no entries.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Builds the id-to-token mapping.
    pub fn invert(&self) -> InverseVocabulary {
        let mut words: HashMap<u32, String> =
            self.map.iter().map(|(k, &v)| (v, k.clone())).collect();
        words.insert(EOS_ID, EOS_TOKEN.to_string());
        words.insert(UNK_ID, UNK_TOKEN.to_string());
        InverseVocabulary { words }
    }
}

/// `collections.OrderedDict` references of pickle protocols 0-3 and 4+, each
/// paired with the `copyreg._reconstructor` reference of the same protocol.
const ORDERED_DICT_GLOBALS: [(&[u8], &[u8]); 2] = [
    (b"ccollections\nOrderedDict\n", b"ccopy_reg\n_reconstructor\n"),
    (
        b"\x8c\x0bcollections\x94\x8c\x0bOrderedDict\x94",
        b"\x8c\x07copyreg\x94\x8c\x0e_reconstructor\x94",
    ),
];

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn mentions_ordered_dict(bytes: &[u8]) -> bool {
    ORDERED_DICT_GLOBALS
        .iter()
        .any(|(from, _)| find(bytes, from).is_some())
}

fn replace_all(bytes: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some(i) = find(rest, from) {
        out.extend_from_slice(&rest[..i]);
        out.extend_from_slice(to);
        rest = &rest[i + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

fn pickled_pair(pair: serde_pickle::Value) -> Result<(String, u32)> {
    let kv = match pair {
        serde_pickle::Value::List(kv) | serde_pickle::Value::Tuple(kv) => kv,
        other => {
            return Err(ScoreError::invalid_format(
                "dictionary",
                format!("expected a [token, id] pair, got {other:?}"),
            ));
        }
    };
    match <[serde_pickle::Value; 2]>::try_from(kv) {
        Ok([key, id]) => pickled_entry(key, id),
        Err(kv) => Err(ScoreError::invalid_format(
            "dictionary",
            format!("expected a [token, id] pair, got {} items", kv.len()),
        )),
    }
}

fn pickled_entry(key: serde_pickle::Value, id: serde_pickle::Value) -> Result<(String, u32)> {
    match (key, id) {
        (serde_pickle::Value::String(token), serde_pickle::Value::I64(id)) => {
            Ok((token, u32::try_from(id)?))
        }
        (key, id) => Err(ScoreError::invalid_format(
            "dictionary",
            format!("unexpected entry {key:?}: {id:?}"),
        )),
    }
}

/// Mapping from an id back to its token.
#[derive(Debug, Clone)]
pub struct InverseVocabulary {
    words: HashMap<u32, String>,
}

impl InverseVocabulary {
    /// Gets the token of `id`. Unassigned ids are reported as [`UNK_TOKEN`].
    pub fn word(&self, id: u32) -> &str {
        self.words.get(&id).map_or(UNK_TOKEN, String::as_str)
    }

    /// Joins the tokens of `ids` with spaces.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| self.word(id))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn sample() -> Vocabulary {
        Vocabulary::from_json_reader(
            r#"{"eos": 0, "UNK": 1, "the": 2, "house": 3, "is": 4, "small": 5}"#.as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let vocab = sample();
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.id("house"), 3);
        assert_eq!(vocab.id("garden"), UNK_ID);
        assert_eq!(vocab.get("garden"), None);
    }

    #[test]
    fn test_truncate() {
        let vocab = sample().truncate(4);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("house"), 3);
        assert_eq!(vocab.id("is"), UNK_ID);
        assert_eq!(vocab.id("small"), UNK_ID);

        let vocab = sample().truncate(0);
        assert_eq!(vocab.len(), 6);
    }

    #[test]
    fn test_invert() {
        let inv = sample().invert();
        assert_eq!(inv.word(0), "<eos>");
        assert_eq!(inv.word(1), "UNK");
        assert_eq!(inv.word(3), "house");
        assert_eq!(inv.word(99), "UNK");
        assert_eq!(inv.decode(&[2, 3, 4, 0]), "the house is <eos>");
    }

    #[test]
    fn test_pickle_fallback() {
        let entries: std::collections::BTreeMap<String, u32> =
            [("eos", 0), ("UNK", 1), ("Haus", 2)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        serde_pickle::to_writer(&mut file, &entries, serde_pickle::SerOptions::new()).unwrap();
        file.flush().unwrap();

        let vocab = Vocabulary::from_path(file.path()).unwrap();
        assert_eq!(vocab.id("Haus"), 2);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_pickled_ordered_dict() {
        // pickle.dumps(OrderedDict([('eos', 0), ('UNK', 1), ('Haus', 2)]), protocol=2)
        let py3 = b"\x80\x02ccollections\nOrderedDict\nq\x00)Rq\x01(\
            X\x03\x00\x00\x00eosq\x02K\x00\
            X\x03\x00\x00\x00UNKq\x03K\x01\
            X\x04\x00\x00\x00Hausq\x04K\x02u.";
        // The same dictionary pickled by Python 2.
        let py2 = b"\x80\x02ccollections\nOrderedDict\nq\x00]q\x01(\
            ]q\x02(U\x03eosq\x03K\x00e\
            ]q\x04(U\x03UNKq\x05K\x01e\
            ]q\x06(U\x04Hausq\x07K\x02ee\x85q\x08Rq\x09.";

        for bytes in [&py3[..], &py2[..]] {
            let vocab = Vocabulary::from_pickle_reader(bytes).unwrap();
            assert_eq!(vocab.len(), 3);
            assert_eq!(vocab.id("eos"), 0);
            assert_eq!(vocab.id("Haus"), 2);
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(py3).unwrap();
        file.flush().unwrap();
        assert_eq!(Vocabulary::from_path(file.path()).unwrap().id("UNK"), 1);
    }

    #[test]
    fn test_pickled_list_is_rejected() {
        let bytes = serde_pickle::to_vec(&vec![1u32, 2], serde_pickle::SerOptions::new()).unwrap();
        let err = Vocabulary::from_pickle_reader(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ScoreError::Pickle(_)));
    }

    #[test]
    fn test_write_json() {
        let mut buffer = vec![];
        sample().write_json(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.find("\"UNK\"").unwrap() < text.find("\"small\"").unwrap());
        assert_eq!(Vocabulary::from_json_reader(text.as_bytes()).unwrap(), sample());
    }

    #[test]
    fn test_unreadable_dictionary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a dictionary").unwrap();
        file.flush().unwrap();

        let err = Vocabulary::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ScoreError::InvalidFormat(_)));
    }
}
