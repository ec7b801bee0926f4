//! Loader for the ASCII hex memory-image format.
//!
//! Whitespace-separated tokens: `@XXXXXXXX` resets the write cursor to an
//! absolute byte address, any other 8-hex-digit group is a data word whose
//! textual byte order matches ascending memory addresses (so the group is
//! byte-reversed before being stored as a little-endian word).

use std::str::FromStr;

use thiserror::Error;

use crate::miu::{Ram, RAM_BYTES};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid character {0:?} in hex image")]
    BadChar(char),
    #[error("'@' must be followed by exactly 8 hex digits")]
    TruncatedAddress,
    #[error("data word truncated at end of input")]
    TruncatedWord,
    #[error("image write at {0:#010x} falls outside the {RAM_BYTES}-byte RAM")]
    OutOfRange(u32),
}

/// A parsed memory image: architectural words and the addresses they load at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemImage {
    pub words: Vec<(u32, u32)>,
}

fn hex_digit(c: char) -> Result<u32, ImageError> {
    c.to_digit(16).ok_or(ImageError::BadChar(c))
}

fn is_delim(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\0'
}

impl FromStr for MemImage {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = Vec::new();
        let mut chars = s.chars().peekable();
        let mut cursor: u32 = 0;

        while let Some(c) = chars.next() {
            if is_delim(c) {
                continue;
            }

            if c == '@' {
                let mut addr = 0u32;
                for _ in 0..8 {
                    let d = chars.next().ok_or(ImageError::TruncatedAddress)?;
                    addr = (addr << 4) | hex_digit(d)?;
                }
                cursor = addr;
                continue;
            }

            // A data word: 8 hex digits, possibly spread over several
            // whitespace-separated byte groups.
            let mut acc = hex_digit(c)?;
            let mut count = 1;
            while count < 8 {
                match chars.next() {
                    Some(d) if is_delim(d) => continue,
                    Some(d) => {
                        acc = (acc << 4) | hex_digit(d)?;
                        count += 1;
                    }
                    None => return Err(ImageError::TruncatedWord),
                }
            }

            if cursor as usize + 4 > RAM_BYTES {
                return Err(ImageError::OutOfRange(cursor));
            }
            words.push((cursor, acc.swap_bytes()));
            cursor += 4;
        }

        Ok(MemImage { words })
    }
}

impl MemImage {
    pub fn apply(&self, ram: &mut Ram) {
        for &(addr, word) in &self.words {
            ram.write(addr, 4, word);
        }
    }
}
