//! Common settings in nmtscore.

/// The reserved id of the end-of-sequence token.
///
/// Padding positions in a [`Batch`](crate::corpus::Batch) also carry this id.
pub const EOS_ID: u32 = 0;

/// The reserved id of the unknown token.
pub const UNK_ID: u32 = 1;

/// Surface form of [`EOS_ID`] in an inverted vocabulary.
pub const EOS_TOKEN: &str = "<eos>";

/// Surface form of [`UNK_ID`] in an inverted vocabulary.
pub const UNK_TOKEN: &str = "UNK";

/// Separator between the word and its factors in a source token (`word|f1|f2`).
pub const FACTOR_SEPARATOR: char = '|';

/// The default number of sentence pairs in a minibatch.
pub const DEFAULT_BATCH_SIZE: usize = 80;
