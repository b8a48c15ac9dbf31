//! Fixed label set shared by training and scoring
//!
//! The index of every label is its position in [`Label::ALL`]. Classifier
//! artifacts record [`LABEL_SET_VERSION`] and the symbol order so a model
//! trained against a different ordering is rejected at load time.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Bump whenever the order or membership of [`Label::ALL`] changes.
pub const LABEL_SET_VERSION: u32 = 1;

/// One of the eight Vietnamese alphabet letters being practised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    E,
    H,
    I,
    L,
    N,
    /// Ơ (O with horn)
    OHorn,
    U,
    V,
}

impl Label {
    pub const COUNT: usize = 8;

    /// Every label in index order
    pub const ALL: [Label; Label::COUNT] = [
        Label::E,
        Label::H,
        Label::I,
        Label::L,
        Label::N,
        Label::OHorn,
        Label::U,
        Label::V,
    ];

    /// Dense class index used by the classifier
    pub fn index(self) -> usize {
        match self {
            Label::E => 0,
            Label::H => 1,
            Label::I => 2,
            Label::L => 3,
            Label::N => 4,
            Label::OHorn => 5,
            Label::U => 6,
            Label::V => 7,
        }
    }

    pub fn from_index(index: usize) -> Option<Label> {
        Label::ALL.get(index).copied()
    }

    /// Canonical symbol, also used as lesson id and archive prefix
    pub fn symbol(self) -> &'static str {
        match self {
            Label::E => "E",
            Label::H => "H",
            Label::I => "I",
            Label::L => "L",
            Label::N => "N",
            Label::OHorn => "Ơ",
            Label::U => "U",
            Label::V => "V",
        }
    }

    /// Resolve a symbol to a label.
    ///
    /// Older recordings were labelled with a lowercase `i`; it is accepted
    /// as an alias of `I`. Anything else outside the set is rejected.
    pub fn parse(symbol: &str) -> Result<Label> {
        match symbol {
            "i" => Ok(Label::I),
            s => Label::ALL
                .iter()
                .copied()
                .find(|l| l.symbol() == s)
                .ok_or_else(|| AppError::InvalidLabel(s.to_string())),
        }
    }

    /// Symbols in index order, as stored in classifier artifacts
    pub fn symbols() -> Vec<String> {
        Label::ALL.iter().map(|l| l.symbol().to_string()).collect()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Label {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Label::parse(s)
    }
}

/// A single step of the guided walk: watch the demonstration, then record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    pub label: Label,
    pub title: &'static str,
}

impl Lesson {
    pub fn id(&self) -> &'static str {
        self.label.symbol()
    }

    /// Demonstration clip for this lesson inside `videos_dir`
    pub fn video_path(&self, videos_dir: &Path) -> PathBuf {
        videos_dir.join(format!("{}.mov", self.id()))
    }
}

/// Lessons in presentation order
pub const LESSONS: [Lesson; Label::COUNT] = [
    Lesson { label: Label::E, title: "Chữ cái E" },
    Lesson { label: Label::H, title: "Chữ cái H" },
    Lesson { label: Label::I, title: "Chữ cái i" },
    Lesson { label: Label::L, title: "Chữ cái L" },
    Lesson { label: Label::N, title: "Chữ cái N" },
    Lesson { label: Label::OHorn, title: "Chữ cái Ơ" },
    Lesson { label: Label::U, title: "Chữ cái U" },
    Lesson { label: Label::V, title: "Chữ cái V" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip_is_identity() {
        for (i, label) in Label::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
            assert_eq!(Label::from_index(label.index()), Some(*label));
            assert_eq!(Label::parse(label.symbol()).unwrap(), *label);
        }
        assert_eq!(Label::from_index(Label::COUNT), None);
    }

    #[test]
    fn test_indices_are_distinct() {
        let mut seen = [false; Label::COUNT];
        for label in Label::ALL {
            assert!(!seen[label.index()], "duplicate index for {}", label);
            seen[label.index()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_unknown_label_rejected() {
        for bad in ["", "A", "e", "O", "EE"] {
            match Label::parse(bad) {
                Err(AppError::InvalidLabel(s)) => assert_eq!(s, bad),
                other => panic!("expected InvalidLabel for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_lowercase_i_alias() {
        assert_eq!(Label::parse("i").unwrap(), Label::I);
        assert_eq!("Ơ".parse::<Label>().unwrap(), Label::OHorn);
    }

    #[test]
    fn test_lessons_follow_label_order() {
        for (lesson, label) in LESSONS.iter().zip(Label::ALL) {
            assert_eq!(lesson.label, label);
        }
        let path = LESSONS[5].video_path(Path::new("assets/videos"));
        assert_eq!(path, PathBuf::from("assets/videos/Ơ.mov"));
    }
}
