use std::path::Path;

use rand::seq::SliceRandom;

/// Supplies candidate words for new rounds.
pub trait WordSource: Send + Sync {
    /// Up to `n` distinct random words.
    fn random_words(&self, n: usize) -> Vec<String>;

    fn random_word(&self) -> String;
}

const DEFAULT_WORDS: &[&str] = &[
    "apple", "banana", "bicycle", "bridge", "butterfly", "camera", "candle", "castle", "cloud",
    "compass", "crown", "dinosaur", "dolphin", "dragon", "drum", "elephant", "envelope", "feather",
    "fire truck", "flower", "giraffe", "guitar", "hammer", "helicopter", "house", "ice cream",
    "island", "jellyfish", "kangaroo", "key", "kite", "ladder", "lighthouse", "lemon", "moon",
    "mountain", "mushroom", "octopus", "owl", "palm tree", "penguin", "piano", "pirate", "pizza",
    "rainbow", "robot", "rocket", "sandwich", "scissors", "snowman", "spider", "star", "submarine",
    "sun", "telescope", "tent", "tiger", "tornado", "train", "umbrella", "volcano", "whale",
    "windmill", "zebra",
];

#[derive(Debug, thiserror::Error)]
pub enum WordsError {
    #[error("failed to read word list: {0}")]
    Io(#[from] std::io::Error),
    #[error("word list is empty")]
    Empty,
}

/// A fixed, non-empty list of words picked from uniformly.
#[derive(Debug, Clone)]
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    pub fn new(words: Vec<String>) -> Result<Self, WordsError> {
        let words: Vec<String> = words
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Err(WordsError::Empty);
        }
        Ok(Self { words })
    }

    /// Reads one word per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WordsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::new(
            contents
                .lines()
                .filter(|line| !line.trim_start().starts_with('#'))
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for WordList {
    fn default() -> Self {
        Self {
            words: DEFAULT_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl WordSource for WordList {
    fn random_words(&self, n: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        self.words.choose_multiple(&mut rng, n).cloned().collect()
    }

    fn random_word(&self) -> String {
        let mut rng = rand::thread_rng();
        self.words.choose(&mut rng).cloned().unwrap_or_default()
    }
}

/// Hides every letter behind an underscore, keeping spaces and punctuation.
pub fn mask_word(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_alphabetic() { '_' } else { c })
        .collect()
}

/// Case- and surrounding-whitespace-insensitive comparison of a guess.
pub fn matches_word(guess: &str, word: &str) -> bool {
    guess.trim().to_lowercase() == word.trim().to_lowercase()
}
