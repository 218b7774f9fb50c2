//! Small order-preserving argument maps for the two argument styles found in slicer output:
//! `G1 X1.5 Y2 E.03` style letter words, and `EXCLUDE_OBJECT_DEFINE NAME=a CENTER=1,2` style
//! key/value pairs. A later duplicate overwrites the earlier value in place.

use crate::error::{Error, Result};
use crate::Mm;

/// Drops a trailing `;comment` and surrounding whitespace.
pub fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(i) => line[..i].trim(),
        None => line.trim(),
    }
}

/// Parses a G-code number. Bare letters (`Z` with no digits) are how a zero renders, so an empty
/// value reads back as zero.
pub fn parse_number(value: &str, line_number: usize) -> Result<Mm> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value.parse().map_err(|_| Error::InvalidNumber {
        line_number,
        value: value.to_owned(),
    })
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Words {
    entries: Vec<(char, Mm)>,
}

impl Words {
    /// Parses every word after the command word, e.g. everything after `G1`.
    pub fn parse(args: &str, line_number: usize) -> Result<Words> {
        let mut words = Words::default();
        for token in strip_comment(args).split_whitespace() {
            let mut chars = token.chars();
            let letter = match chars.next() {
                Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
                _ => {
                    return Err(Error::InvalidWord {
                        line_number,
                        token: token.to_owned(),
                    })
                }
            };
            let value = parse_number(chars.as_str(), line_number)?;
            words.insert(letter, value);
        }
        Ok(words)
    }

    fn insert(&mut self, letter: char, value: Mm) {
        match self.entries.iter_mut().find(|(l, _)| *l == letter) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((letter, value)),
        }
    }

    pub fn get(&self, letter: char) -> Option<Mm> {
        self.entries
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeyValues {
    entries: Vec<(String, String)>,
}

impl KeyValues {
    pub fn parse(args: &str, line_number: usize) -> Result<KeyValues> {
        let mut kv = KeyValues::default();
        for token in args.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                return Err(Error::InvalidWord {
                    line_number,
                    token: token.to_owned(),
                });
            };
            kv.insert(key.trim(), value.trim());
        }
        Ok(kv)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_owned(),
            None => self.entries.push((key.to_owned(), value.to_owned())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
