//! Turns a raw command line into a launch plan.
//!
//! The scanner understands single quotes, double quotes and backslash escapes
//! only as far as needed to tell whether `<`, `>`, `|` and `&` are operators.
//! Everything else is left to `/bin/sh`, which receives the stage text verbatim.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Kind of redirection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Input redirection (`<`): the first stage reads standard input from a file.
    Input,
    /// Output redirection (`>`): the last stage writes standard output to a file,
    /// **truncating** it first.
    Output,
}

impl RedirectKind {
    fn operator(self) -> char {
        match self {
            RedirectKind::Input => '<',
            RedirectKind::Output => '>',
        }
    }
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.operator())
    }
}

/// Errors that can occur while building a [`CommandPlan`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsingError {
    #[error("empty command")]
    EmptyCommand,
    #[error("missing file name after {0}")]
    MissingTarget(RedirectKind),
    #[error("missing command around '|'")]
    EmptyPipeStage,
}

/// What the launcher needs to know to start an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    /// One entry per process, in pipeline order; at most two.
    pub stages: Vec<String>,
    /// Target of the first `<`, fed to the first stage.
    pub input: Option<String>,
    /// Target of the first `>`, receiving the last stage's output.
    pub output: Option<String>,
    /// Set when the line ended with `&`.
    pub background: bool,
}

impl CommandPlan {
    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }

    pub fn target(&self, kind: RedirectKind) -> Option<&str> {
        match kind {
            RedirectKind::Input => self.input.as_deref(),
            RedirectKind::Output => self.output.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Unquoted,
    SingleQuote,
    DoubleQuote,
}

/// Byte offsets and characters of `text` that sit outside any quoting.
fn unquoted_chars(text: &str) -> Vec<(usize, char)> {
    let mut state = QuoteState::Unquoted;
    let mut escaped = false;
    let mut out = Vec::new();

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (state, ch) {
            (QuoteState::Unquoted | QuoteState::DoubleQuote, '\\') => escaped = true,
            (QuoteState::Unquoted, '\'') => state = QuoteState::SingleQuote,
            (QuoteState::Unquoted, '"') => state = QuoteState::DoubleQuote,
            (QuoteState::SingleQuote, '\'') | (QuoteState::DoubleQuote, '"') => {
                state = QuoteState::Unquoted
            }
            (QuoteState::Unquoted, c) => out.push((i, c)),
            _ => {}
        }
    }
    out
}

fn is_operator(c: char) -> bool {
    matches!(c, '<' | '>' | '|' | '&')
}

/// Reads one word starting at byte `start`, removing quotes.
///
/// Leading whitespace is skipped. The word ends at unquoted whitespace or an
/// unquoted operator character. Returns the word and the byte offset just past
/// it, or `None` if there is no word.
fn read_word(text: &str, start: usize) -> Option<(String, usize)> {
    let rest = &text[start..];
    let skipped = rest.len() - rest.trim_start().len();
    let begin = start + skipped;

    let mut word = String::new();
    let mut state = QuoteState::Unquoted;
    let mut escaped = false;
    let mut end = text.len();

    for (i, ch) in text[begin..].char_indices() {
        if escaped {
            word.push(ch);
            escaped = false;
            continue;
        }
        match (state, ch) {
            (QuoteState::Unquoted, c) if c.is_whitespace() || is_operator(c) => {
                end = begin + i;
                break;
            }
            (QuoteState::Unquoted | QuoteState::DoubleQuote, '\\') => escaped = true,
            (QuoteState::Unquoted, '\'') => state = QuoteState::SingleQuote,
            (QuoteState::Unquoted, '"') => state = QuoteState::DoubleQuote,
            (QuoteState::SingleQuote, '\'') | (QuoteState::DoubleQuote, '"') => {
                state = QuoteState::Unquoted
            }
            (_, c) => word.push(c),
        }
    }

    if end == begin { None } else { Some((word, end)) }
}

/// Splits a line into words on unquoted whitespace, removing quotes.
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut state = QuoteState::Unquoted;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (state, ch) {
            (QuoteState::Unquoted, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (QuoteState::Unquoted, '\\') => {
                escaped = true;
                in_word = true;
            }
            (QuoteState::Unquoted, '\'') => {
                state = QuoteState::SingleQuote;
                in_word = true;
            }
            (QuoteState::Unquoted, '"') => {
                state = QuoteState::DoubleQuote;
                in_word = true;
            }
            (QuoteState::SingleQuote, '\'') | (QuoteState::DoubleQuote, '"') => {
                state = QuoteState::Unquoted
            }
            (QuoteState::DoubleQuote, '\\') => escaped = true,
            (_, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Byte offset of a trailing, unquoted `&`.
fn background_marker(text: &str) -> Option<usize> {
    unquoted_chars(text)
        .last()
        .copied()
        .filter(|&(i, c)| c == '&' && i + 1 == text.len())
        .map(|(i, _)| i)
}

/// True when `text` contains an unquoted `<`, `>` or `|`, or ends with `&`.
pub fn has_operators(text: &str) -> bool {
    let text = text.trim_end();
    background_marker(text).is_some()
        || unquoted_chars(text)
            .iter()
            .any(|&(_, c)| matches!(c, '<' | '>' | '|'))
}

/// Copies the characters of `text[range]` that are not inside any of `cuts`.
fn keep(text: &str, range: Range<usize>, cuts: &[Range<usize>]) -> String {
    text.char_indices()
        .filter(|(i, _)| range.contains(i) && !cuts.iter().any(|cut| cut.contains(i)))
        .map(|(_, c)| c)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Builds the launch plan for a command line.
///
/// The trailing `&` is stripped first. The first unquoted `|` splits the line
/// into two stages. The first unquoted `<` and `>` are looked up in the whole
/// line and removed together with their target word; later occurrences stay in
/// the stage text.
pub fn parse(line: &str) -> Result<CommandPlan, ParsingError> {
    let mut text = line.trim_end_matches(['\n', '\r']).trim_end();

    let background = match background_marker(text) {
        Some(at) => {
            text = text[..at].trim_end();
            true
        }
        None => false,
    };

    let ops = unquoted_chars(text);
    let first = |op: char| ops.iter().find(|&&(_, c)| c == op).map(|&(i, _)| i);

    let mut cuts = Vec::new();
    let mut target_of = |kind: RedirectKind| -> Result<Option<String>, ParsingError> {
        match first(kind.operator()) {
            Some(at) => {
                let (target, end) =
                    read_word(text, at + 1).ok_or(ParsingError::MissingTarget(kind))?;
                cuts.push(at..end);
                Ok(Some(target))
            }
            None => Ok(None),
        }
    };
    let input = target_of(RedirectKind::Input)?;
    let output = target_of(RedirectKind::Output)?;

    let stages = match first('|') {
        Some(at) => {
            let left = keep(text, 0..at, &cuts);
            let right = keep(text, at + 1..text.len(), &cuts);
            if left.is_empty() || right.is_empty() {
                return Err(ParsingError::EmptyPipeStage);
            }
            vec![left, right]
        }
        None => {
            let whole = keep(text, 0..text.len(), &cuts);
            if whole.is_empty() && input.is_none() && output.is_none() {
                return Err(ParsingError::EmptyCommand);
            }
            vec![whole]
        }
    };

    Ok(CommandPlan {
        stages,
        input,
        output,
        background,
    })
}

/// Resolves a redirection target against the working directory captured at
/// redirection time. Absolute targets are returned unchanged.
pub fn resolve_target(cwd: &Path, target: &str) -> PathBuf {
    cwd.join(target)
}
