//! Pattern-driven extraction of typed values from device output.
//!
//! Matching is line-oriented: a pattern is tried against each line of the
//! text and every hit becomes a [`Match`]. Block helpers cut multi-line
//! sections out of the output first, so a pattern can be scoped to, for
//! example, one inventory table or one `interface` stanza.
//!
//! A pattern that does not match is "field absent", not an error. Only a
//! missing block delimiter is a structural failure.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::ExtractError;

static PAGER_MARKERS: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"\s*(<--- More --->|---- More ----|--More--|---\(more.*?\)---)\s*(\x08+\s*\x08+)?",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid PAGER_MARKERS regex: {err}"),
    }
});

/// One matching line with its named captures.
#[derive(Debug)]
pub struct Match<'t> {
    captures: Captures<'t>,
    line: usize,
}

impl<'t> Match<'t> {
    /// Named capture, if it participated in the match.
    pub fn get(&self, name: &str) -> Option<&'t str> {
        self.captures.name(name).map(|m| m.as_str())
    }

    /// Named capture parsed into `T`; `None` when absent or unparsable.
    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// 0-based line number within the scanned text.
    pub fn line(&self) -> usize {
        self.line
    }

    /// The whole matched slice.
    pub fn as_str(&self) -> &'t str {
        self.captures.get(0).map(|m| m.as_str()).unwrap_or_default()
    }
}

/// Converts an absent capture into [`ExtractError::MissingField`].
pub fn required<'t>(m: &Match<'t>, name: &str) -> Result<&'t str, ExtractError> {
    m.get(name)
        .ok_or_else(|| ExtractError::MissingField(name.to_string()))
}

/// Parses a present capture, failing on values that do not convert.
pub fn parse_required<T: FromStr>(m: &Match<'_>, name: &str) -> Result<T, ExtractError> {
    let raw = required(m, name)?;
    raw.trim().parse().map_err(|_| ExtractError::InvalidField {
        field: name.to_string(),
        value: raw.to_string(),
    })
}

/// First line of `text` matching `pattern`.
pub fn extract_one<'t>(text: &'t str, pattern: &Regex) -> Option<Match<'t>> {
    matches(text, pattern).next()
}

/// Every line of `text` matching `pattern`, in text order.
pub fn extract_all<'t>(text: &'t str, pattern: &Regex) -> Vec<Match<'t>> {
    matches(text, pattern).collect()
}

/// Lazily projects every match through `projector`, dropping `None`s.
///
/// The returned iterator is restartable: cloning it replays the scan from
/// the start without touching any shared state.
pub fn extract_fields<'t, T, F>(
    text: &'t str,
    pattern: &'t Regex,
    projector: F,
) -> impl Iterator<Item = T> + Clone + 't
where
    T: 't,
    F: Fn(&Match<'t>) -> Option<T> + Clone + 't,
{
    text.lines().enumerate().filter_map(move |(line, content)| {
        let captures = pattern.captures(content)?;
        projector(&Match { captures, line })
    })
}

fn matches<'t, 'p>(text: &'t str, pattern: &'p Regex) -> impl Iterator<Item = Match<'t>> + 'p
where
    't: 'p,
{
    text.lines()
        .enumerate()
        .filter_map(move |(line, content)| {
            pattern
                .captures(content)
                .map(|captures| Match { captures, line })
        })
}

/// Returns the lines strictly between the first line satisfying `start`
/// and the next line satisfying `end`.
///
/// Passing `None` for `end` fences the block at the end of the text.
pub fn extract_block<'t>(
    text: &'t str,
    start: impl Fn(&str) -> bool,
    end: Option<&dyn Fn(&str) -> bool>,
) -> Result<&'t str, ExtractError> {
    let mut offset = 0;
    let mut body_start = None;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        match body_start {
            None if start(content) => body_start = Some(offset + line.len()),
            Some(from) => {
                if let Some(end) = end
                    && end(content)
                {
                    return Ok(&text[from..offset]);
                }
            }
            None => {}
        }
        offset += line.len();
    }

    match (body_start, end) {
        (None, _) => Err(ExtractError::MissingBlock("start delimiter".to_string())),
        (Some(_), Some(_)) => Err(ExtractError::MissingBlock("end delimiter".to_string())),
        (Some(from), None) => Ok(&text[from..]),
    }
}

/// Splits `text` into sections, each beginning at a line that satisfies
/// `start` and running up to (not including) the next such line. Lines
/// before the first start line are dropped.
pub fn split_sections<'t>(text: &'t str, start: impl Fn(&str) -> bool) -> Vec<&'t str> {
    let mut sections = Vec::new();
    let mut offset = 0;
    let mut current = None;
    for line in text.split_inclusive('\n') {
        if start(line.trim_end_matches(['\r', '\n'])) {
            if let Some(from) = current {
                sections.push(&text[from..offset]);
            }
            current = Some(offset);
        }
        offset += line.len();
    }
    if let Some(from) = current {
        sections.push(&text[from..]);
    }
    sections
}

/// A single pure rewrite applied to raw output before matching.
#[derive(Debug, Clone)]
pub enum Normalization {
    /// Remove `\r` characters.
    StripCarriageReturns,
    /// Trim whitespace at the end of every line.
    TrimLineEnds,
    /// Remove pager prompts such as `--More--` left in captured output.
    StripPagerMarkers,
    /// Join every line matching the pattern onto the previous line,
    /// separated by one space (devices wrap long records).
    JoinContinuations(Regex),
    /// Drop lines that are empty after trimming.
    DropBlankLines,
}

impl Normalization {
    fn apply(&self, text: &str) -> String {
        match self {
            Normalization::StripCarriageReturns => text.replace('\r', ""),
            Normalization::TrimLineEnds => text
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n"),
            Normalization::StripPagerMarkers => PAGER_MARKERS.replace_all(text, "\n").into_owned(),
            Normalization::JoinContinuations(continuation) => {
                let mut out: Vec<String> = Vec::new();
                for line in text.lines() {
                    if continuation.is_match(line)
                        && let Some(previous) = out.last_mut()
                    {
                        previous.push(' ');
                        previous.push_str(line.trim());
                        continue;
                    }
                    out.push(line.to_string());
                }
                out.join("\n")
            }
            Normalization::DropBlankLines => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Applies `steps` in order to a raw output blob.
pub fn normalize(raw: &str, steps: &[Normalization]) -> String {
    steps
        .iter()
        .fold(raw.to_string(), |text, step| step.apply(&text))
}

/// The usual cleanup for interactive CLI output.
pub fn default_normalization() -> Vec<Normalization> {
    vec![
        Normalization::StripCarriageReturns,
        Normalization::StripPagerMarkers,
        Normalization::TrimLineEnds,
    ]
}
