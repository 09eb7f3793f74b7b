//! Placeholder parsing and substitution for stage command strings.
//!
//! Stage commands are written before the install prefix and search paths are
//! known, so they reference the [`BuildContext`](crate::stage::BuildContext)
//! through placeholders that are substituted right before a stage runs.
//!
//! # Placeholder Formats
//!
//! - `$${prefix}` - the install prefix
//! - `$${cache}` - the cache root
//! - `$${include_flags}` - `-I<path>` for every extra include path, space separated
//! - `$${lib_flags}` - `-L<path>` for every extra library path, space separated
//! - `$${include_paths}` - extra include paths joined with `;`
//! - `$${lib_paths}` - extra library paths joined with `;`
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so `$HOME` or `$(nproc)`
//! inside a command string are left for whatever the command does with them.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use stagebuild_lib::placeholder::{parse, Placeholder, Segment};
//!
//! let segments = parse("./configure --prefix=$${prefix}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("./configure --prefix=".to_string()),
//!     Segment::Placeholder(Placeholder::Prefix),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${prefix}`
  Prefix,
  /// `$${cache}`
  Cache,
  /// `$${include_flags}`
  IncludeFlags,
  /// `$${lib_flags}`
  LibFlags,
  /// `$${include_paths}`
  IncludePaths,
  /// `$${lib_paths}`
  LibPaths,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),
}

/// Trait for resolving placeholder values.
pub trait Resolver {
  fn resolve(&self, placeholder: Placeholder) -> String;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or names an unknown value.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    if !matches!(chars.peek(), Some((_, '$'))) {
      // Lone $, shell variables pass through
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if matches!(chars.peek(), Some((_, '{'))) {
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some((_, '{')) => {
        chars.next();

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(PlaceholderError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_name(&name)?));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_name(name: &str) -> Result<Placeholder, PlaceholderError> {
  match name.trim() {
    "prefix" => Ok(Placeholder::Prefix),
    "cache" => Ok(Placeholder::Cache),
    "include_flags" => Ok(Placeholder::IncludeFlags),
    "lib_flags" => Ok(Placeholder::LibFlags),
    "include_paths" => Ok(Placeholder::IncludePaths),
    "lib_paths" => Ok(Placeholder::LibPaths),
    other => Err(PlaceholderError::Unknown(other.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  let mut result = String::with_capacity(input.len());

  for segment in &segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(&resolver.resolve(*p)),
    }
  }

  Ok(result)
}
