//! Book text extraction and analysis

pub mod analyze;
pub mod extract;

pub use analyze::{analyze, tokenize, Difficulty, TextStats};
pub use extract::{extract_file, Chapter, ExtractError, Extracted};
