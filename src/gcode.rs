//! Letter/value word parser for shaper configuration commands.
//!
//! A configuration command is a line of letter-prefixed words, e.g.
//! `P"zvd" F40 S0.1` or `Pcustom H0.4:0.7 T0.0125:0.0125`. Values follow
//! the letter directly; float arrays are colon-separated; string values
//! may be double-quoted.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("Invalid number '{value}' for parameter '{letter}'")]
    BadNumber { letter: char, value: String },
    #[error("Parameter '{letter}' value {value} is out of range")]
    OutOfRange { letter: char, value: f32 },
}

#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    words: Vec<(char, String)>,
}

impl CommandArgs {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = Vec::new();
        for token in line.split_whitespace() {
            let mut chars = token.chars();
            let letter = chars.next().unwrap();
            if !letter.is_ascii_alphabetic() {
                return Err(CommandError::UnexpectedToken(token.to_string()));
            }
            let value = chars.as_str().trim_matches('"');
            words.push((letter.to_ascii_uppercase(), value.to_string()));
        }
        Ok(Self { words })
    }

    pub fn seen(&self, letter: char) -> bool {
        self.words.iter().any(|(l, _)| *l == letter)
    }

    pub fn string_value(&self, letter: char) -> Option<&str> {
        self.words
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| v.as_str())
    }

    pub fn f32_value(&self, letter: char) -> Result<f32, CommandError> {
        let value = self.string_value(letter).unwrap_or_default();
        value.parse().map_err(|_| CommandError::BadNumber {
            letter,
            value: value.to_string(),
        })
    }

    /// Fetch a float and reject it if outside `[min, max]`.
    pub fn limited_f32_value(
        &self,
        letter: char,
        min: f32,
        max: f32,
    ) -> Result<f32, CommandError> {
        let value = self.f32_value(letter)?;
        if value < min || value > max {
            return Err(CommandError::OutOfRange { letter, value });
        }
        Ok(value)
    }

    /// Fetch a colon-separated float array, e.g. `H0.4:0.7:0.9`.
    pub fn f32_array(&self, letter: char) -> Result<Vec<f32>, CommandError> {
        let value = self.string_value(letter).unwrap_or_default();
        value
            .split(':')
            .map(|part| {
                part.parse().map_err(|_| CommandError::BadNumber {
                    letter,
                    value: part.to_string(),
                })
            })
            .collect()
    }
}
