//! Quote-aware splitting of command strings into argv.
//!
//! Commands are spawned directly rather than through `/bin/sh`, so arguments
//! containing spaces must be kept together here. The rules are the POSIX
//! shell word rules without expansion: single quotes are literal, double
//! quotes allow `\"`, `\\`, `\$` and `` \` `` escapes, and a backslash
//! outside quotes escapes the next character.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
  #[error("unterminated {0} quote")]
  UnterminatedQuote(char),

  #[error("trailing backslash")]
  TrailingBackslash,
}

/// Split `input` into words.
pub fn split(input: &str) -> Result<Vec<String>, SplitError> {
  let mut words = Vec::new();
  let mut word = String::new();
  // Distinguishes `''` (an empty argument) from no word at all.
  let mut in_word = false;
  let mut chars = input.chars();

  while let Some(ch) = chars.next() {
    match ch {
      c if c.is_whitespace() => {
        if in_word {
          words.push(std::mem::take(&mut word));
          in_word = false;
        }
      }
      '\'' => {
        in_word = true;
        loop {
          match chars.next() {
            Some('\'') => break,
            Some(c) => word.push(c),
            None => return Err(SplitError::UnterminatedQuote('\'')),
          }
        }
      }
      '"' => {
        in_word = true;
        loop {
          match chars.next() {
            Some('"') => break,
            Some('\\') => match chars.next() {
              Some(c @ ('"' | '\\' | '$' | '`')) => word.push(c),
              Some('\n') => {}
              Some(c) => {
                word.push('\\');
                word.push(c);
              }
              None => return Err(SplitError::UnterminatedQuote('"')),
            },
            Some(c) => word.push(c),
            None => return Err(SplitError::UnterminatedQuote('"')),
          }
        }
      }
      '\\' => {
        in_word = true;
        match chars.next() {
          Some('\n') => {}
          Some(c) => word.push(c),
          None => return Err(SplitError::TrailingBackslash),
        }
      }
      c => {
        in_word = true;
        word.push(c);
      }
    }
  }

  if in_word {
    words.push(word);
  }

  Ok(words)
}
