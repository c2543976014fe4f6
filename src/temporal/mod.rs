//! Bitemporal value store.
//!
//! A name's value history is a sequence of non-overlapping effective-date
//! spans. The history is never edited in place: base clauses, amendments,
//! and repeals are all *overlay operations*, each tagged with the date it
//! became known and its declaration order. Assembling a history for a given
//! `known_as_of` filters out operations not yet enacted and applies the rest
//! in `(knowledge_date, declaration_order)` order, so resolution is a pure
//! function of (operations, effective_as_of, known_as_of).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A half-open effective interval `[from, to)`. `to == None` is open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span<T> {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    pub payload: T,
}

impl<T> Span<T> {
    fn contains(&self, at: NaiveDate) -> bool {
        at >= self.from && self.to.map_or(true, |to| at < to)
    }
}

/// One interval-modification operation.
///
/// `payload == None` clears the range (a repeal); `Some` writes a value over
/// it. `known == None` means the operation has always been known (base
/// clauses, undated amendments).
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay<T> {
    pub known: Option<NaiveDate>,
    /// Declaration order across all merged modules; ties on `known` are
    /// broken by this, later declarations winning.
    pub seq: usize,
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    pub payload: Option<T>,
}

/// Ordered, non-overlapping spans for one name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temporal<T> {
    spans: Vec<Span<T>>,
}

impl<T: Clone> Temporal<T> {
    pub fn new() -> Self {
        Temporal { spans: Vec::new() }
    }

    /// Builds a history from overlay operations as known at `known_as_of`.
    ///
    /// Operations whose `known` date is after `known_as_of` are dropped; the
    /// rest apply in ascending `(known, seq)` order, each patching whatever
    /// the earlier ones left in its range.
    pub fn assemble(mut overlays: Vec<Overlay<T>>, known_as_of: NaiveDate) -> Self {
        overlays.retain(|op| op.known.map_or(true, |k| k <= known_as_of));
        overlays.sort_by_key(|op| (op.known, op.seq));

        let mut history = Temporal::new();
        for op in overlays {
            history.overlay(op.from, op.to, op.payload);
        }
        history
    }

    /// Patches `[from, to)`: existing spans are truncated or split around the
    /// range, then `payload` (if any) is written into it.
    pub fn overlay(&mut self, from: NaiveDate, to: Option<NaiveDate>, payload: Option<T>) {
        let mut next = Vec::with_capacity(self.spans.len() + 2);

        for span in self.spans.drain(..) {
            let before_ends = from; // surviving head: [span.from, from)
            if span.from < before_ends {
                let head_to = match span.to {
                    Some(t) => Some(t.min(before_ends)),
                    None => Some(before_ends),
                };
                next.push(Span { from: span.from, to: head_to, payload: span.payload.clone() });
            }
            // Surviving tail: [to, span.to) — only when the overlay is bounded.
            if let Some(cut) = to {
                let tail_from = span.from.max(cut);
                let survives = match span.to {
                    Some(t) => tail_from < t,
                    None => true,
                };
                if survives && tail_from >= cut {
                    next.push(Span { from: tail_from, to: span.to, payload: span.payload });
                }
            }
        }

        if let Some(value) = payload {
            next.push(Span { from, to, payload: value });
        }

        next.sort_by_key(|s| s.from);
        next.retain(|s| s.to.map_or(true, |t| s.from < t));
        self.spans = next;
    }

    /// The unique span containing `at`, or `None` (e.g. after a repeal).
    pub fn resolve(&self, at: NaiveDate) -> Option<&T> {
        self.spans.iter().find(|s| s.contains(at)).map(|s| &s.payload)
    }

    pub fn spans(&self) -> &[Span<T>] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}
