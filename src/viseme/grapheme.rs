//! Grapheme → viseme lookup.
//!
//! A cheap stand-in for a phonemizer: looks at the written character (or
//! two-character cluster) at a text offset and picks the closest mouth
//! shape. Works for English and Spanish text well enough to read as speech.

use super::MouthShape;
use std::collections::HashMap;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Two-character clusters, checked in this order before single characters.
const DIGRAPHS: &[(&str, MouthShape)] = &[
    // Consonant clusters
    ("ch", MouthShape::SZ),
    ("sh", MouthShape::SZ),
    ("zh", MouthShape::SZ),
    ("th", MouthShape::TDN),
    ("ph", MouthShape::FV),
    ("qu", MouthShape::TDN),
    ("ll", MouthShape::TDN),
    ("rr", MouthShape::R),
    ("wh", MouthShape::U),
    // Vowel pairs
    ("oo", MouthShape::U),
    ("ou", MouthShape::U),
    ("ue", MouthShape::U),
    ("ee", MouthShape::I),
    ("ea", MouthShape::I),
    ("ie", MouthShape::I),
    ("ai", MouthShape::A),
    ("au", MouthShape::O),
    ("oa", MouthShape::O),
    ("ei", MouthShape::E),
    // R-colored vowels
    ("ar", MouthShape::R),
    ("er", MouthShape::R),
    ("ir", MouthShape::R),
    ("or", MouthShape::R),
    ("ur", MouthShape::R),
];

const SINGLES: &[(&str, MouthShape)] = &[
    ("a", MouthShape::A),
    ("e", MouthShape::E),
    ("iy", MouthShape::I),
    ("o", MouthShape::O),
    ("uw", MouthShape::U),
    ("mbp", MouthShape::MBP),
    ("fv", MouthShape::FV),
    ("tdnlkgcqhjx", MouthShape::TDN),
    ("sz", MouthShape::SZ),
    ("r", MouthShape::R),
];

static TABLE: LazyLock<GraphemeTable> = LazyLock::new(GraphemeTable::build);

/// A matched grapheme: its shape and how many characters it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grapheme {
    pub shape: MouthShape,
    /// 2 for a digraph, 1 for a single character, 0 past the end of the text.
    pub width: usize,
}

impl Grapheme {
    const END: Grapheme = Grapheme {
        shape: MouthShape::Neutral,
        width: 0,
    };

    fn single(shape: MouthShape) -> Self {
        Self { shape, width: 1 }
    }
}

/// Read-only grapheme table, built once per process.
#[derive(Debug)]
pub struct GraphemeTable {
    digraphs: Vec<([char; 2], MouthShape)>,
    singles: HashMap<char, MouthShape>,
}

impl GraphemeTable {
    /// The shared process-wide table.
    pub fn global() -> &'static GraphemeTable {
        &TABLE
    }

    fn build() -> Self {
        let digraphs = DIGRAPHS
            .iter()
            .filter_map(|(pair, shape)| {
                let mut chars = pair.chars();
                Some(([chars.next()?, chars.next()?], *shape))
            })
            .collect();
        let singles = SINGLES
            .iter()
            .flat_map(|(letters, shape)| letters.chars().map(move |c| (c, *shape)))
            .collect();
        Self { digraphs, singles }
    }

    /// Look up the grapheme starting at `offset` (a char index into `text`).
    ///
    /// Total: out-of-range offsets, pauses and unknown characters all give
    /// `Neutral`.
    pub fn lookup(&self, text: &[char], offset: usize) -> Grapheme {
        let Some(&raw) = text.get(offset) else {
            return Grapheme::END;
        };
        if is_pause_char(raw) {
            return Grapheme::single(MouthShape::Neutral);
        }
        let Some(first) = fold(raw) else {
            return Grapheme::single(MouthShape::Neutral);
        };

        if let Some(second) = text.get(offset + 1).copied().and_then(fold) {
            let pair = [first, second];
            if let Some((_, shape)) = self.digraphs.iter().find(|(p, _)| *p == pair) {
                return Grapheme {
                    shape: *shape,
                    width: 2,
                };
            }
        }

        Grapheme::single(
            self.singles
                .get(&first)
                .copied()
                .unwrap_or(MouthShape::Neutral),
        )
    }
}

/// Lower-case and strip diacritics: `'Á'` → `'a'`, `'ñ'` → `'n'`.
fn fold(c: char) -> Option<char> {
    c.to_lowercase().nfd().find(|ch| !is_combining_mark(*ch))
}

/// Whitespace and punctuation (anything that is not a letter or digit).
pub fn is_pause_char(c: char) -> bool {
    !c.is_alphanumeric()
}

/// First offset at or after `from` that is not a pause character, or `text.len()`.
pub fn skip_pauses(text: &[char], from: usize) -> usize {
    text.iter()
        .enumerate()
        .skip(from)
        .find(|(_, c)| !is_pause_char(**c))
        .map_or(text.len(), |(i, _)| i)
}

/// Mouth shape for the grapheme at `offset` using the global table.
pub fn map_offset(text: &[char], offset: usize) -> MouthShape {
    GraphemeTable::global().lookup(text, offset).shape
}
