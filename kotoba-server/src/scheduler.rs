//! Spaced repetition scheduler
//!
//! SM-2 variant over four answer grades. Pure functions only; persistence of
//! the resulting card state lives in `db::srs`.
//!
//! | Grade | Interval                                             | Ease   |
//! |-------|------------------------------------------------------|--------|
//! | Again | 1 day, repetitions reset                             | -0.20  |
//! | Hard  | first: 1, then `max(prev + 1, round(prev * 1.2))`    | -0.15  |
//! | Good  | first: 1, second: 6, then `round(prev * ease)`       |  0     |
//! | Easy  | first: 4, then `round(prev * ease * 1.3)`            | +0.15  |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ease factor of a new card
pub const DEFAULT_EASE: f64 = 2.5;
/// Lower ease bound
pub const MIN_EASE: f64 = 1.3;
/// Upper ease bound
pub const MAX_EASE: f64 = 5.0;
/// Interval ceiling (100 years)
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

const HARD_MULTIPLIER: f64 = 1.2;
const EASY_BONUS: f64 = 1.3;

/// Answer grade, stored as `response_quality` 1..=4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// Map a stored/submitted quality value to a grade
    pub fn from_quality(quality: i64) -> Option<Self> {
        match quality {
            1 => Some(Grade::Again),
            2 => Some(Grade::Hard),
            3 => Some(Grade::Good),
            4 => Some(Grade::Easy),
            _ => None,
        }
    }

    pub fn quality(self) -> i64 {
        match self {
            Grade::Again => 1,
            Grade::Hard => 2,
            Grade::Good => 3,
            Grade::Easy => 4,
        }
    }

    /// Everything except Again counts as a correct recall
    pub fn is_correct(self) -> bool {
        self != Grade::Again
    }

    fn ease_delta(self) -> f64 {
        match self {
            Grade::Again => -0.20,
            Grade::Hard => -0.15,
            Grade::Good => 0.0,
            Grade::Easy => 0.15,
        }
    }
}

/// Scheduling-relevant card state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardState {
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetition_count: i64,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            ease_factor: DEFAULT_EASE,
            interval_days: 1,
            repetition_count: 0,
        }
    }
}

/// Result of grading a card
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetition_count: i64,
    pub due_date: DateTime<Utc>,
    pub correct: bool,
}

impl Schedule {
    pub fn state(&self) -> CardState {
        CardState {
            ease_factor: self.ease_factor,
            interval_days: self.interval_days,
            repetition_count: self.repetition_count,
        }
    }
}

/// Compute the next state of a card answered with `grade` at `now`
pub fn schedule(state: &CardState, grade: Grade, now: DateTime<Utc>) -> Schedule {
    let prev = state.interval_days.max(1);
    let first = state.repetition_count <= 0;
    let ease = state.ease_factor;

    let (interval, repetition_count) = match grade {
        Grade::Again => (1, 0),
        Grade::Hard => {
            let interval = if first {
                1
            } else {
                (prev + 1).max(round_days(prev as f64 * HARD_MULTIPLIER))
            };
            (interval, state.repetition_count + 1)
        }
        Grade::Good => {
            let interval = match state.repetition_count {
                r if r <= 0 => 1,
                1 => 6,
                _ => round_days(prev as f64 * ease),
            };
            (interval, state.repetition_count + 1)
        }
        Grade::Easy => {
            let interval = if first {
                4
            } else {
                round_days(prev as f64 * ease * EASY_BONUS)
            };
            (interval, state.repetition_count + 1)
        }
    };

    let interval_days = interval.clamp(1, MAX_INTERVAL_DAYS);

    Schedule {
        ease_factor: clamp_ease(ease + grade.ease_delta()),
        interval_days,
        repetition_count,
        due_date: now + Duration::days(interval_days),
        correct: grade.is_correct(),
    }
}

/// Update `(current_streak, longest_streak)` after an answer
pub fn update_streaks(current: i64, longest: i64, correct: bool) -> (i64, i64) {
    if correct {
        let current = current + 1;
        (current, longest.max(current))
    } else {
        (0, longest)
    }
}

/// Round to two decimals and clamp into `[MIN_EASE, MAX_EASE]`
pub fn clamp_ease(ease: f64) -> f64 {
    ((ease * 100.0).round() / 100.0).clamp(MIN_EASE, MAX_EASE)
}

fn round_days(days: f64) -> i64 {
    if days >= MAX_INTERVAL_DAYS as f64 {
        MAX_INTERVAL_DAYS
    } else {
        days.round() as i64
    }
}
