//! Viseme mapping for lip-sync animation.
//!
//! A viseme is a visual mouth shape that corresponds to a speech sound.
//! The avatar renders one of a fixed set of sprites; this module names
//! them and maps written text onto them (see [`grapheme`]).

pub mod grapheme;

pub use grapheme::{Grapheme, GraphemeTable, is_pause_char, map_offset, skip_pauses};

/// Mouth shapes in sprite-sheet order. The discriminant is the viseme index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MouthShape {
    /// Closed, relaxed mouth (silence and pauses).
    #[default]
    Neutral = 0,
    /// /a/ (mouth open wide)
    A = 1,
    /// /e/ (mouth medium, spread)
    E = 2,
    /// /i/ (wide, teeth close)
    I = 3,
    /// /o/ (rounded, medium)
    O = 4,
    /// /u/ (rounded, small)
    U = 5,
    /// /m/, /b/, /p/ (lips pressed together)
    MBP = 6,
    /// /f/, /v/ (teeth on lip)
    FV = 7,
    /// /t/, /d/, /n/ and other tongue-on-ridge consonants
    TDN = 8,
    /// /s/, /z/, /sh/ (teeth together)
    SZ = 9,
    /// /r/ (lips slightly rounded)
    R = 10,
}

/// Integer position into [`MouthShape::ALL`].
pub type VisemeIndex = usize;

impl MouthShape {
    /// Number of shapes.
    pub const COUNT: usize = 11;

    /// Every shape, in index order.
    pub const ALL: [MouthShape; Self::COUNT] = [
        MouthShape::Neutral,
        MouthShape::A,
        MouthShape::E,
        MouthShape::I,
        MouthShape::O,
        MouthShape::U,
        MouthShape::MBP,
        MouthShape::FV,
        MouthShape::TDN,
        MouthShape::SZ,
        MouthShape::R,
    ];

    pub fn index(self) -> VisemeIndex {
        self as usize
    }

    /// Resolve an index; anything out of range is `Neutral`.
    pub fn from_index(index: VisemeIndex) -> Self {
        Self::ALL.get(index).copied().unwrap_or(MouthShape::Neutral)
    }

    /// Vowel shapes dwell one extra fallback tick.
    pub fn is_vowel(self) -> bool {
        matches!(
            self,
            MouthShape::A | MouthShape::E | MouthShape::I | MouthShape::O | MouthShape::U
        )
    }

    /// Sprite filename for this shape.
    pub fn asset_name(self) -> &'static str {
        match self {
            MouthShape::Neutral => "mouth_neutral.png",
            MouthShape::A => "mouth_a.png",
            MouthShape::E => "mouth_e.png",
            MouthShape::I => "mouth_i.png",
            MouthShape::O => "mouth_o.png",
            MouthShape::U => "mouth_u.png",
            MouthShape::MBP => "mouth_mbp.png",
            MouthShape::FV => "mouth_fv.png",
            MouthShape::TDN => "mouth_tdn.png",
            MouthShape::SZ => "mouth_sz.png",
            MouthShape::R => "mouth_r.png",
        }
    }
}

/// The older four-sprite mouth set, driven by loudness only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LegacyMouth {
    #[default]
    Closed,
    Small,
    Medium,
    Wide,
}

impl LegacyMouth {
    /// Pick a sprite from a normalized speaking level in \[0, 1\].
    pub fn from_level(level: f32) -> Self {
        if level < 0.2 {
            LegacyMouth::Closed
        } else if level < 0.4 {
            LegacyMouth::Small
        } else if level < 0.65 {
            LegacyMouth::Medium
        } else {
            LegacyMouth::Wide
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LegacyMouth::Closed => "closed",
            LegacyMouth::Small => "small",
            LegacyMouth::Medium => "medium",
            LegacyMouth::Wide => "wide",
        }
    }

    pub fn asset_name(self) -> &'static str {
        match self {
            LegacyMouth::Closed => "mouth_closed.png",
            LegacyMouth::Small => "mouth_open_small.png",
            LegacyMouth::Medium => "mouth_open_medium.png",
            LegacyMouth::Wide => "mouth_open_wide.png",
        }
    }
}

/// What the renderer is asked to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouthCue {
    Viseme(MouthShape),
    Named(LegacyMouth),
}

impl MouthCue {
    /// Sprite filename for either cue flavour.
    pub fn asset_name(self) -> &'static str {
        match self {
            MouthCue::Viseme(shape) => shape.asset_name(),
            MouthCue::Named(mouth) => mouth.asset_name(),
        }
    }

    /// Whether the cue shows a closed mouth.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            MouthCue::Viseme(MouthShape::Neutral) | MouthCue::Named(LegacyMouth::Closed)
        )
    }
}

impl From<MouthShape> for MouthCue {
    fn from(shape: MouthShape) -> Self {
        MouthCue::Viseme(shape)
    }
}

impl From<LegacyMouth> for MouthCue {
    fn from(mouth: LegacyMouth) -> Self {
        MouthCue::Named(mouth)
    }
}
