use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::VariantUnit;
use crate::error::CollationError;
use crate::model::{Range, Witness, WitnessId};
use crate::store::TextSource;

/// One witness reading of a variant unit. `text` is `None` when the
/// witnesses omit the base text entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub text: Option<String>,
    pub sigla: Vec<String>,
}

/// One rendered line of the apparatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApparatusRow {
    /// Base line span, `"3"` or `"3 - 4"`.
    pub lines: String,
    pub base_range: Range,
    /// Base text, or the bookend words around an insertion point.
    pub lemma: String,
    pub insertion: bool,
    /// Sigla of included witnesses that read as the base here.
    pub same_as_base: Vec<String>,
    pub readings: Vec<Reading>,
}

impl fmt::Display for ApparatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}] {}", self.lines, self.lemma, self.same_as_base.join(", "))?;
        for reading in &self.readings {
            let sigla = reading.sigla.join(", ");
            match &reading.text {
                Some(text) => write!(f, "; {text}: {sigla}")?,
                None => write!(f, "; not in {sigla}")?,
            }
        }
        Ok(())
    }
}

/// Collapse whitespace runs to one space and line breaks to `" / "`.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Character offsets at which each line of a text starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(
                text.chars()
                    .enumerate()
                    .filter(|(_, ch)| *ch == '\n')
                    .map(|(offset, _)| offset + 1),
            )
            .collect();
        Self { starts }
    }

    /// 1-based line holding the character at `offset`.
    #[must_use]
    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|start| *start <= offset)
    }

    /// Line span of `range`: `"3"` or `"3 - 4"`.
    #[must_use]
    pub fn span(&self, range: Range) -> String {
        let first = self.line_of(range.start);
        let last = if range.is_empty() {
            first
        } else {
            self.line_of(range.end - 1)
        };
        if first == last {
            first.to_string()
        } else {
            format!("{first} - {last}")
        }
    }
}

/// Base words immediately left and right of an insertion point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Bookends {
    before: Option<String>,
    after: Option<String>,
}

impl Bookends {
    fn lemma(&self) -> String {
        [self.before.as_deref(), self.after.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn wrap(&self, text: &str) -> String {
        [self.before.as_deref(), Some(text), self.after.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// State carried from one rendered row to the next.
#[derive(Debug, Default)]
struct Prior {
    lemma: Option<String>,
    changed: BTreeSet<String>,
}

pub(super) struct Renderer<'a, S: TextSource + ?Sized> {
    store: &'a S,
    base: Vec<char>,
    lines: LineIndex,
    included: &'a [&'a Witness],
    sigla: HashMap<WitnessId, &'a str>,
    context_window: usize,
}

impl<'a, S: TextSource + ?Sized> Renderer<'a, S> {
    pub(super) fn new(
        store: &'a S,
        base: &Witness,
        included: &'a [&'a Witness],
        context_window: usize,
    ) -> Result<Self, CollationError> {
        let len = store
            .text_len(base.id)
            .map_err(|e| CollationError::io(base.id, e))?;
        let text = store
            .read(base.id, Range { start: 0, end: len })
            .map_err(|e| CollationError::io(base.id, e))?;
        Ok(Self {
            store,
            lines: LineIndex::new(&text),
            base: text.chars().collect(),
            included,
            sigla: included.iter().map(|w| (w.id, w.siglum.as_str())).collect(),
            context_window,
        })
    }

    /// Render `units` in order. `step` runs after each row and may abort the
    /// render.
    pub(super) fn render<F>(
        &self,
        units: &[VariantUnit],
        mut step: F,
    ) -> Result<Vec<ApparatusRow>, CollationError>
    where
        F: FnMut() -> Result<(), CollationError>,
    {
        let mut rows = Vec::with_capacity(units.len());
        units.iter().try_fold(Prior::default(), |prior, unit| {
            let (row, next) = self.render_unit(unit, &prior)?;
            rows.push(row);
            step()?;
            Ok::<_, CollationError>(next)
        })?;
        Ok(rows)
    }

    fn render_unit(
        &self,
        unit: &VariantUnit,
        prior: &Prior,
    ) -> Result<(ApparatusRow, Prior), CollationError> {
        if unit.range.end > self.base.len() {
            return Err(inconsistent(format!(
                "variant unit {} lies outside the base text (length {})",
                unit.range,
                self.base.len()
            )));
        }

        let insertion = unit.range.is_empty();
        let bookends = insertion.then(|| self.bookends(unit.range.start));
        let lemma = bookends.as_ref().map_or_else(
            || normalize_text(&self.base_slice(unit.range)),
            Bookends::lemma,
        );

        let mut nested = false;
        let mut readings: BTreeMap<Option<String>, BTreeSet<String>> = BTreeMap::new();
        for (witness, range) in &unit.witnesses {
            let siglum = self.sigla.get(witness).ok_or_else(|| {
                inconsistent(format!(
                    "variant unit {} references witness {witness} outside the apparatus",
                    unit.range
                ))
            })?;

            let text = if range.is_empty() {
                None
            } else {
                let text = normalize_text(
                    &self
                        .store
                        .read(*witness, *range)
                        .map_err(|e| CollationError::io(*witness, e))?,
                );
                Some(match &bookends {
                    Some(bookends) => {
                        // the left bookend was the previous row's lemma
                        if bookends.before.is_some() && bookends.before == prior.lemma {
                            nested = true;
                        }
                        bookends.wrap(&text)
                    }
                    None => text,
                })
            };
            readings
                .entry(text)
                .or_default()
                .insert((*siglum).to_owned());
        }

        let changed: BTreeSet<String> = readings.values().flatten().cloned().collect();
        let same_as_base = self
            .included
            .iter()
            .map(|w| &w.siglum)
            .filter(|siglum| !changed.contains(*siglum))
            .filter(|siglum| !(nested && prior.changed.contains(*siglum)))
            .cloned()
            .collect();

        let row = ApparatusRow {
            lines: self.lines.span(unit.range),
            base_range: unit.range,
            lemma: lemma.clone(),
            insertion,
            same_as_base,
            readings: readings
                .into_iter()
                .map(|(text, sigla)| Reading {
                    text,
                    sigla: sigla.into_iter().collect(),
                })
                .collect(),
        };
        Ok((
            row,
            Prior {
                lemma: Some(lemma),
                changed,
            },
        ))
    }

    fn base_slice(&self, range: Range) -> String {
        let range = range.clamp_to(self.base.len());
        self.base[range.start..range.end].iter().collect()
    }

    /// Nearest whole base words around `offset`, looking
    /// `context_window` characters each way and widening to word
    /// boundaries. Either side is missing at the edges of the text.
    fn bookends(&self, offset: usize) -> Bookends {
        let len = self.base.len();
        let offset = offset.min(len);
        let mut start = offset.saturating_sub(self.context_window);
        while start > 0 && !self.base[start - 1].is_whitespace() {
            start -= 1;
        }
        let mut end = offset.saturating_add(self.context_window).min(len);
        while end < len && !self.base[end].is_whitespace() {
            end += 1;
        }

        let left = self.base_slice(Range { start, end: offset });
        let right = self.base_slice(Range { start: offset, end });
        Bookends {
            before: left.split_whitespace().last().map(str::to_owned),
            after: right.split_whitespace().next().map(str::to_owned),
        }
    }
}

fn inconsistent(message: String) -> CollationError {
    error!(%message, "Inconsistent apparatus merge state");
    CollationError::InconsistentMergeState(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollatorConfig;
    use crate::model::SetId;
    use crate::store::{MemoryStore, SetRepository};

    fn r(start: usize, end: usize) -> Range {
        Range { start, end }
    }

    struct Fixture {
        store: MemoryStore,
        witnesses: Vec<Witness>,
    }

    impl Fixture {
        fn new(texts: &[&str]) -> Self {
            let store = MemoryStore::new();
            let set: SetId = store.create_set("s", CollatorConfig::default()).expect("set");
            for (i, text) in texts.iter().enumerate() {
                let siglum = ["A", "B", "C", "D"][i];
                store
                    .add_witness(set, siglum, siglum, text, None)
                    .expect("witness");
            }
            let witnesses = store.witnesses_of(set).expect("witnesses");
            Self { store, witnesses }
        }

        fn id(&self, index: usize) -> WitnessId {
            self.witnesses[index].id
        }

        fn render(&self, units: &[VariantUnit]) -> Result<Vec<ApparatusRow>, CollationError> {
            let included: Vec<&Witness> = self.witnesses[1..].iter().collect();
            let renderer = Renderer::new(&self.store, &self.witnesses[0], &included, 40)?;
            renderer.render(units, || Ok(()))
        }
    }

    fn unit(range: Range, witnesses: &[(WitnessId, Range)]) -> VariantUnit {
        let mut unit = VariantUnit::new(range, 1);
        for (id, range) in witnesses {
            unit.add_witness(*id, *range, 1);
        }
        unit
    }

    #[test]
    fn normalize_marks_line_breaks_and_collapses_spaces() {
        assert_eq!(normalize_text("  one   two\n\nthree\r\n four "), "one two / three / four");
        assert_eq!(normalize_text("\n"), "");
    }

    #[test]
    fn line_spans() {
        let index = LineIndex::new("ab\ncd\nef");
        assert_eq!(index.span(r(0, 2)), "1");
        assert_eq!(index.span(r(3, 5)), "2");
        assert_eq!(index.span(r(1, 7)), "1 - 3");
        assert_eq!(index.span(r(6, 6)), "3");
    }

    #[test]
    fn change_groups_witnesses_by_reading() {
        let f = Fixture::new(&["the cat sat", "the dog sat", "the dog sat", "the cat sat"]);
        let rows = f
            .render(&[unit(r(4, 7), &[(f.id(1), r(4, 7)), (f.id(2), r(4, 7))])])
            .expect("render");

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.lemma, "cat");
        assert_eq!(row.lines, "1");
        assert_eq!(row.same_as_base, vec!["D".to_owned()]);
        assert_eq!(
            row.readings,
            vec![Reading {
                text: Some("dog".into()),
                sigla: vec!["B".into(), "C".into()],
            }]
        );
        assert_eq!(row.to_string(), "1\tcat] D; dog: B, C");
    }

    #[test]
    fn omission_has_no_text() {
        let f = Fixture::new(&["a very old man", "a old man"]);
        let rows = f
            .render(&[unit(r(2, 6), &[(f.id(1), Range::point(2))])])
            .expect("render");
        assert_eq!(rows[0].readings[0].text, None);
        assert_eq!(rows[0].to_string(), "1\tvery] ; not in B");
    }

    #[test]
    fn insertion_is_bookended_by_base_words() {
        let f = Fixture::new(&["a man", "a tall man"]);
        let rows = f
            .render(&[unit(Range::point(1), &[(f.id(1), r(2, 6))])])
            .expect("render");
        let row = &rows[0];
        assert!(row.insertion);
        assert_eq!(row.lemma, "a man");
        assert_eq!(row.readings[0].text.as_deref(), Some("a tall man"));
    }

    #[test]
    fn bookends_widen_to_whole_words() {
        let f = Fixture::new(&["a extraordinary man", "a extraordinary old man"]);
        let included: Vec<&Witness> = f.witnesses[1..].iter().collect();
        let renderer = Renderer::new(&f.store, &f.witnesses[0], &included, 5).expect("renderer");
        let ends = renderer.bookends(15);
        assert_eq!(ends.before.as_deref(), Some("extraordinary"));
        assert_eq!(ends.after.as_deref(), Some("man"));

        let ends = renderer.bookends(1);
        assert_eq!(ends.before.as_deref(), Some("a"));
        assert_eq!(ends.after.as_deref(), Some("extraordinary"));
    }

    #[test]
    fn insertion_at_document_start_is_one_sided() {
        let f = Fixture::new(&["man", "old man"]);
        let rows = f
            .render(&[unit(Range::point(0), &[(f.id(1), r(0, 3))])])
            .expect("render");
        assert_eq!(rows[0].lemma, "man");
        assert_eq!(rows[0].readings[0].text.as_deref(), Some("old man"));
    }

    #[test]
    fn nested_change_is_not_counted_as_same_as_base() {
        // B changes "cat" and C inserts after it; the insertion's left
        // bookend is the previous lemma, so B is not listed as agreeing.
        let f = Fixture::new(&["the cat sat", "the dog sat", "the cat big sat"]);
        let rows = f
            .render(&[
                unit(r(4, 7), &[(f.id(1), r(4, 7))]),
                unit(Range::point(7), &[(f.id(2), r(8, 11))]),
            ])
            .expect("render");
        assert_eq!(rows[0].same_as_base, vec!["C".to_owned()]);
        assert_eq!(rows[1].lemma, "cat sat");
        assert!(rows[1].same_as_base.is_empty());
    }

    #[test]
    fn unknown_witness_is_inconsistent() {
        let f = Fixture::new(&["the cat", "the dog"]);
        let err = f
            .render(&[unit(r(4, 7), &[(WitnessId(999), r(4, 7))])])
            .expect_err("unknown witness");
        assert!(matches!(err, CollationError::InconsistentMergeState(_)));
    }
}
