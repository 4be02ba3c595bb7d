// crates/traildb-core/src/db/filter.rs
//
// Event filters are CNF: a filter is an AND of clauses, a clause an OR of
// terms. A term either matches an item (optionally negated) or a half-open
// timestamp range. Filters are plain values; they attach to a reader, to a
// single trail, or to a cursor, and the most specific one wins.

use crate::error::{Result, TdbError};
use crate::item::Item;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterTerm {
    /// Matches when the event's item of this field equals `item` (differs,
    /// when negated). The null item (field 0) matches nothing; negated, it
    /// matches everything.
    Match { item: Item, negated: bool },
    /// Matches when start <= timestamp < end.
    TimeRange { start: u64, end: u64 },
}

#[derive(Debug, Clone, Default)]
struct Clause {
    terms: Vec<FilterTerm>,
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    clauses: Vec<Clause>,
}

impl Default for EventFilter {
    fn default() -> EventFilter {
        EventFilter::new()
    }
}

impl EventFilter {
    /// A fresh filter holds one empty clause, so it matches nothing until
    /// terms are added.
    pub fn new() -> EventFilter {
        EventFilter {
            clauses: vec![Clause::default()],
        }
    }

    /// A filter that matches every event: a single negated-null term.
    pub fn match_all() -> EventFilter {
        let mut f = EventFilter::new();
        f.add_term(Item::from_raw(0), true);
        f
    }

    /// A filter that matches no event.
    pub fn match_none() -> EventFilter {
        EventFilter::new()
    }

    /// Start a new clause; subsequent terms land in it. Clauses AND
    /// together.
    pub fn new_clause(&mut self) {
        self.clauses.push(Clause::default());
    }

    /// Add a match term to the current clause. Terms within a clause OR
    /// together.
    pub fn add_term(&mut self, item: Item, negated: bool) {
        self.clauses
            .last_mut()
            .expect("filter always has a clause")
            .terms
            .push(FilterTerm::Match { item, negated });
    }

    /// Add a time-range term [start, end) to the current clause.
    pub fn add_time_range(&mut self, start: u64, end: u64) {
        self.clauses
            .last_mut()
            .expect("filter always has a clause")
            .terms
            .push(FilterTerm::TimeRange { start, end });
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    pub fn num_terms(&self, clause: usize) -> Result<usize> {
        self.clauses
            .get(clause)
            .map(|c| c.terms.len())
            .ok_or(TdbError::NoSuchItem)
    }

    pub fn get_item(&self, clause: usize, term: usize) -> Result<(Item, bool)> {
        match self.term(clause, term)? {
            FilterTerm::Match { item, negated } => Ok((item, negated)),
            FilterTerm::TimeRange { .. } => Err(TdbError::IncorrectTermType),
        }
    }

    pub fn get_time_range(&self, clause: usize, term: usize) -> Result<(u64, u64)> {
        match self.term(clause, term)? {
            FilterTerm::TimeRange { start, end } => Ok((start, end)),
            FilterTerm::Match { .. } => Err(TdbError::IncorrectTermType),
        }
    }

    fn term(&self, clause: usize, term: usize) -> Result<FilterTerm> {
        self.clauses
            .get(clause)
            .and_then(|c| c.terms.get(term))
            .copied()
            .ok_or(TdbError::NoSuchItem)
    }

    /// Evaluate against a fully assembled event: `items[field]` is the
    /// current item of every field. A filter with no clauses at all
    /// matches nothing.
    pub(crate) fn matches(&self, timestamp: u64, items: &[u64]) -> bool {
        if self.clauses.is_empty() {
            return false;
        }
        'clauses: for clause in &self.clauses {
            for term in &clause.terms {
                match *term {
                    FilterTerm::Match { item, negated } => {
                        let field = item.field() as usize;
                        if field == 0 {
                            if negated {
                                continue 'clauses;
                            }
                        } else {
                            let current = items.get(field).copied().unwrap_or(0);
                            if (current == item.raw()) != negated {
                                continue 'clauses;
                            }
                        }
                    }
                    FilterTerm::TimeRange { start, end } => {
                        if start <= timestamp && timestamp < end {
                            continue 'clauses;
                        }
                    }
                }
            }
            return false;
        }
        true
    }
}
