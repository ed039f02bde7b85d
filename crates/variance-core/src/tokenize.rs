//! Splits witness text into token spans.
//!
//! The scanner is a single pass over the characters of a witness fragment.
//! Offsets are absolute character offsets into the full witness text, so a
//! fragment starting at 120 produces tokens starting at or after 120.
//!
//! Tokens are released in batches. A token that ends in a hyphen may still be
//! joined with the next word, so no batch is released while one is pending.

use std::mem;

use serde::{Deserialize, Serialize};
use unicode_categories::UnicodeCategories;

use crate::config::{CollatorConfig, Hyphenation};
use crate::model::Range;

/// A token span plus its normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub range: Range,
    pub text: String,
}

/// Totals reported after tokenizing one witness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizeSummary {
    pub tokens: usize,
    /// Sum of the lengths of all token ranges.
    pub tokenized_len: usize,
}

/// Tokenize `text` restricted to `fragment`, returning every token in order.
#[must_use]
pub fn tokenize(text: &str, fragment: Range, config: &CollatorConfig) -> Vec<Token> {
    let mut out = Vec::new();
    let result: Result<TokenizeSummary, std::convert::Infallible> =
        tokenize_batched(text, fragment, config, usize::MAX, |batch| {
            out.extend(batch);
            Ok(())
        });
    match result {
        Ok(_) => out,
        Err(never) => match never {},
    }
}

/// Tokenize and hand tokens to `flush` in batches of at least `batch_size`
/// (the final batch may be shorter). Stops at the first flush error.
pub fn tokenize_batched<E, F>(
    text: &str,
    fragment: Range,
    config: &CollatorConfig,
    batch_size: usize,
    mut flush: F,
) -> Result<TokenizeSummary, E>
where
    F: FnMut(Vec<Token>) -> Result<(), E>,
{
    let mut scanner = Scanner::new(*config, batch_size.max(1));
    let chars = text
        .chars()
        .enumerate()
        .skip(fragment.start)
        .take(fragment.len());

    let mut end = fragment.start;
    for (offset, ch) in chars {
        scanner.push(offset, ch);
        if let Some(batch) = scanner.take_batch() {
            flush(batch)?;
        }
        end = offset + 1;
    }

    scanner.finish(end);
    let remaining = mem::take(&mut scanner.buffer);
    if !remaining.is_empty() {
        flush(remaining)?;
    }
    Ok(scanner.summary)
}

struct Scanner {
    config: CollatorConfig,
    batch_size: usize,
    buffer: Vec<Token>,
    summary: TokenizeSummary,

    token_start: Option<usize>,
    token_text: String,
    last_raw: Option<char>,
    before_last_raw: Option<char>,

    ws_start: Option<usize>,
    ws_text: String,
    ws_has_break: bool,

    /// Last buffered token ends in a word hyphen and only whitespace follows.
    hyphen_pending: bool,
}

impl Scanner {
    const fn new(config: CollatorConfig, batch_size: usize) -> Self {
        Self {
            config,
            batch_size,
            buffer: Vec::new(),
            summary: TokenizeSummary {
                tokens: 0,
                tokenized_len: 0,
            },
            token_start: None,
            token_text: String::new(),
            last_raw: None,
            before_last_raw: None,
            ws_start: None,
            ws_text: String::new(),
            ws_has_break: false,
            hyphen_pending: false,
        }
    }

    fn is_token_char(&self, ch: char) -> bool {
        if ch.is_whitespace() {
            false
        } else if ch == '-' || ch.is_alphanumeric() {
            true
        } else {
            !self.config.filter_punctuation
        }
    }

    fn push(&mut self, offset: usize, ch: char) {
        if self.is_token_char(ch) {
            if self.token_start.is_none() && !self.try_join() {
                self.close_whitespace(offset);
                self.token_start = Some(offset);
            }
            self.append(ch);
            return;
        }

        self.close_token(offset);
        if ch.is_whitespace() {
            self.ws_start.get_or_insert(offset);
            self.ws_text.push(ch);
            if ch == '\n' || ch == '\r' {
                self.ws_has_break = true;
            }
        } else {
            // filtered punctuation: breaks the token and is dropped
            self.close_whitespace(offset);
        }
    }

    fn finish(&mut self, end: usize) {
        self.close_token(end);
        self.close_whitespace(end);
    }

    fn take_batch(&mut self) -> Option<Vec<Token>> {
        if self.hyphen_pending || self.buffer.len() < self.batch_size {
            return None;
        }
        Some(mem::take(&mut self.buffer))
    }

    fn append(&mut self, ch: char) {
        self.before_last_raw = self.last_raw;
        self.last_raw = Some(ch);

        if self.config.filter_punctuation && (ch.is_punctuation_dash() || ch.is_punctuation_other())
        {
            return;
        }
        if self.config.filter_case {
            self.token_text.extend(ch.to_lowercase());
        } else {
            self.token_text.push(ch);
        }
    }

    /// Reopen the pending hyphenated token when the whitespace since it
    /// satisfies the hyphenation mode.
    fn try_join(&mut self) -> bool {
        if !self.hyphen_pending || self.ws_start.is_none() {
            return false;
        }
        let joinable = match self.config.hyphenation {
            Hyphenation::None => false,
            Hyphenation::FilterLinebreak => self.ws_has_break,
            Hyphenation::FilterAll => true,
        };
        if !joinable {
            return false;
        }
        let Some(mut previous) = self.buffer.pop() else {
            return false;
        };

        if previous.text.ends_with('-') {
            previous.text.pop();
        }
        self.summary.tokens -= 1;
        self.summary.tokenized_len -= previous.range.len();

        self.hyphen_pending = false;
        self.ws_start = None;
        self.ws_text.clear();
        self.ws_has_break = false;
        self.token_start = Some(previous.range.start);
        self.token_text = previous.text;
        self.last_raw = None;
        self.before_last_raw = None;
        true
    }

    fn close_token(&mut self, end: usize) {
        let Some(start) = self.token_start.take() else {
            return;
        };
        let candidate = self.config.hyphenation != Hyphenation::None
            && self.last_raw == Some('-')
            && self.before_last_raw.is_some_and(char::is_alphanumeric);

        let text = mem::take(&mut self.token_text);
        self.last_raw = None;
        self.before_last_raw = None;
        self.hyphen_pending = candidate;
        // a run of dashes with nothing left to compare
        if self.config.filter_punctuation && text.is_empty() && !candidate {
            return;
        }
        self.emit(Range { start, end }, text);
    }

    /// End a whitespace run, emitting it as a token when whitespace is
    /// significant. Any pending hyphen is resolved as not joined.
    fn close_whitespace(&mut self, end: usize) {
        self.hyphen_pending = false;
        self.ws_has_break = false;
        let text = mem::take(&mut self.ws_text);
        let Some(start) = self.ws_start.take() else {
            return;
        };
        if !self.config.filter_whitespace && end > start {
            self.emit(Range { start, end }, text);
        }
    }

    fn emit(&mut self, range: Range, text: String) {
        self.summary.tokens += 1;
        self.summary.tokenized_len += range.len();
        self.buffer.push(Token { range, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(text: &str) -> Range {
        Range {
            start: 0,
            end: text.chars().count(),
        }
    }

    fn spans(tokens: &[Token]) -> Vec<(usize, usize, &str)> {
        tokens
            .iter()
            .map(|t| (t.range.start, t.range.end, t.text.as_str()))
            .collect()
    }

    #[test]
    fn splits_on_whitespace_and_lowercases() {
        let text = "The Cat  sat";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(
            spans(&tokens),
            vec![(0, 3, "the"), (4, 7, "cat"), (9, 12, "sat")]
        );
    }

    #[test]
    fn punctuation_breaks_tokens_when_filtered() {
        let text = "cat, dog.";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(0, 3, "cat"), (5, 8, "dog")]);

        let keep = CollatorConfig {
            filter_punctuation: false,
            ..CollatorConfig::default()
        };
        let tokens = tokenize(text, all(text), &keep);
        assert_eq!(spans(&tokens), vec![(0, 4, "cat,"), (5, 9, "dog.")]);
    }

    #[test]
    fn inner_hyphen_is_kept_in_range_but_filtered_from_text() {
        let text = "well-known";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(0, 10, "wellknown")]);
    }

    #[test]
    fn linebreak_hyphenation_joins_across_newline() {
        let text = "exam-\nple";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(0, 9, "example")]);
    }

    #[test]
    fn hyphenation_none_keeps_two_tokens() {
        let text = "exam-\nple";
        let config = CollatorConfig {
            hyphenation: Hyphenation::None,
            ..CollatorConfig::default()
        };
        let tokens = tokenize(text, all(text), &config);
        assert_eq!(spans(&tokens), vec![(0, 5, "exam"), (6, 9, "ple")]);
    }

    #[test]
    fn linebreak_mode_ignores_hyphen_before_plain_space() {
        let text = "exam- ple";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(tokens.len(), 2);

        let config = CollatorConfig {
            hyphenation: Hyphenation::FilterAll,
            ..CollatorConfig::default()
        };
        let tokens = tokenize(text, all(text), &config);
        assert_eq!(spans(&tokens), vec![(0, 9, "example")]);
    }

    #[test]
    fn lone_dash_is_not_a_hyphen_candidate() {
        let text = "a -\nb";
        let keep = CollatorConfig {
            filter_punctuation: false,
            ..CollatorConfig::default()
        };
        let tokens = tokenize(text, all(text), &keep);
        assert_eq!(spans(&tokens), vec![(0, 1, "a"), (2, 3, "-"), (4, 5, "b")]);
    }

    #[test]
    fn standalone_dashes_vanish_when_punctuation_is_filtered() {
        let text = "-\nple";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(2, 5, "ple")]);

        let text = "he said -- yes";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(
            spans(&tokens),
            vec![(0, 2, "he"), (3, 7, "said"), (11, 14, "yes")]
        );
    }

    #[test]
    fn whitespace_runs_become_tokens_when_significant() {
        let text = "a  b\n";
        let config = CollatorConfig {
            filter_whitespace: false,
            ..CollatorConfig::default()
        };
        let tokens = tokenize(text, all(text), &config);
        let ranges: Vec<_> = tokens.iter().map(|t| (t.range.start, t.range.end)).collect();
        assert_eq!(ranges, vec![(0, 1), (1, 3), (3, 4), (4, 5)]);
        assert_eq!(tokens[1].text, "  ");
    }

    #[test]
    fn fragment_offsets_are_absolute() {
        let text = "skip this part";
        let tokens = tokenize(text, Range { start: 5, end: 9 }, &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(5, 9, "this")]);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = "café noir";
        let tokens = tokenize(text, all(text), &CollatorConfig::default());
        assert_eq!(spans(&tokens), vec![(0, 4, "café"), (5, 9, "noir")]);
    }

    #[test]
    fn batches_never_split_a_pending_hyphen() {
        let text = "one two-\nthree four";
        let mut batches = Vec::new();
        let summary = tokenize_batched::<(), _>(
            text,
            all(text),
            &CollatorConfig::default(),
            2,
            |batch| {
                batches.push(batch);
                Ok(())
            },
        )
        .expect("infallible sink");

        assert_eq!(summary.tokens, 3);
        let flat: Vec<Token> = batches.iter().flatten().cloned().collect();
        assert_eq!(
            spans(&flat),
            vec![(0, 3, "one"), (4, 14, "twothree"), (15, 19, "four")]
        );
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn flush_errors_stop_tokenizing() {
        let text = "a b c d";
        let mut calls = 0;
        let result = tokenize_batched(text, all(text), &CollatorConfig::default(), 1, |_| {
            calls += 1;
            Err("disk full")
        });
        assert_eq!(result, Err("disk full"));
        assert_eq!(calls, 1);
    }
}
