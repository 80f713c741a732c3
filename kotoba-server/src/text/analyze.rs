//! Script-run segmentation and difficulty estimation
//!
//! Without a morphological dictionary the text is split on script
//! boundaries: a kanji run keeps its trailing hiragana (okurigana), katakana
//! and Latin/digit runs stand alone, and a hiragana run not attached to
//! kanji is its own token. Punctuation and whitespace separate tokens.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use wana_kana::utils::{is_char_hiragana, is_char_kanji, is_char_katakana};

/// Kanji share below which a text counts as beginner material
const BEGINNER_KANJI_RATIO: f64 = 0.20;
/// Kanji share below which a text counts as intermediate material
const INTERMEDIATE_KANJI_RATIO: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    pub fn from_kanji_ratio(ratio: f64) -> Self {
        if ratio < BEGINNER_KANJI_RATIO {
            Difficulty::Beginner
        } else if ratio < INTERMEDIATE_KANJI_RATIO {
            Difficulty::Intermediate
        } else {
            Difficulty::Advanced
        }
    }
}

/// Summary numbers stored on a processed book
#[derive(Debug, Clone, PartialEq)]
pub struct TextStats {
    pub word_count: i64,
    pub unique_word_count: i64,
    /// Kanji / (kanji + kana); 0 when the text has no Japanese characters
    pub kanji_ratio: f64,
    /// `None` when the text contains no Japanese characters
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Kanji,
    Hiragana,
    Katakana,
    /// Long vowel mark (ー), extends whichever kana run precedes it
    Prolonged,
    Latin,
    Separator,
}

fn script_of(c: char) -> Script {
    if c == 'ー' {
        Script::Prolonged
    // iteration mark and shime count as kanji
    } else if is_char_kanji(c) || c == '々' || c == '〆' {
        Script::Kanji
    } else if is_char_hiragana(c) {
        Script::Hiragana
    } else if is_char_katakana(c) {
        Script::Katakana
    } else if c.is_alphanumeric() {
        Script::Latin
    } else {
        Script::Separator
    }
}

/// Split text into script-run tokens
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    // (byte offset of token start, script of the run, okurigana seen)
    let mut run: Option<(usize, Script, bool)> = None;

    for (i, c) in text.char_indices() {
        let script = script_of(c);

        let continues = match (run, script) {
            (_, Script::Separator) | (None, _) => false,
            (Some((_, Script::Kanji, false)), Script::Kanji) => true,
            (Some((_, Script::Kanji, _)), Script::Hiragana) => true,
            (Some((_, current, _)), Script::Prolonged) => {
                matches!(current, Script::Hiragana | Script::Katakana | Script::Kanji)
            }
            (Some((_, current, _)), next) => current == next && current != Script::Kanji,
        };

        if continues {
            if let Some((start, Script::Kanji, _)) = run {
                if script == Script::Hiragana {
                    run = Some((start, Script::Kanji, true));
                }
            }
            continue;
        }

        if let Some((start, _, _)) = run.take() {
            tokens.push(&text[start..i]);
        }
        match script {
            Script::Separator => {}
            Script::Prolonged => run = Some((i, Script::Katakana, false)),
            _ => run = Some((i, script, false)),
        }
    }

    if let Some((start, _, _)) = run {
        tokens.push(&text[start..]);
    }

    tokens
}

/// Count tokens and estimate difficulty
pub fn analyze(text: &str) -> TextStats {
    let tokens = tokenize(text);
    let unique: HashSet<&str> = tokens.iter().copied().collect();

    let mut kanji = 0usize;
    let mut japanese = 0usize;
    for c in text.chars() {
        match script_of(c) {
            Script::Kanji => {
                kanji += 1;
                japanese += 1;
            }
            Script::Hiragana | Script::Katakana | Script::Prolonged => japanese += 1,
            _ => {}
        }
    }

    let (kanji_ratio, difficulty) = if japanese == 0 {
        (0.0, None)
    } else {
        let ratio = kanji as f64 / japanese as f64;
        (ratio, Some(Difficulty::from_kanji_ratio(ratio)))
    };

    TextStats {
        word_count: tokens.len() as i64,
        unique_word_count: unique.len() as i64,
        kanji_ratio,
        difficulty,
    }
}
