//! Per-element offsets table for ragged ("at points") restrictions.
//!
//! `PointOffsets` maps element `e` to the slot range
//! `offsets[e]..offsets[e + 1]` in a flat index arena, the compressed
//! sparse row layout. Keeping one arena plus one offsets table (rather
//! than one allocation per element) preserves cache locality in the apply
//! hot path and makes validation a single linear scan.
//!
//! # Invariants
//!
//! - `offsets` has `num_elements + 1` entries and `offsets[0] == 0`.
//! - `offsets` is non-decreasing, so every span is well-formed (possibly
//!   empty: zero-point elements are legal).
//! - `min_points`/`max_points` equal the true extrema of the span lengths,
//!   computed once in the validation scan and served in O(1) thereafter.
//!
//! These hold from successful construction on; the table is immutable.

use std::ops::Range;

use itertools::Itertools;

use super::{IndexBuf, IndexSource};
use crate::error::QuadrilleError;

/// Validated offsets table with cached per-element extrema.
#[derive(Clone, Debug)]
pub(crate) struct PointOffsets {
    buf: IndexBuf,
    min_points: usize,
    max_points: usize,
}

impl PointOffsets {
    /// Validate `source` as an offsets table for `num_elem` elements and
    /// cache the per-element extrema.
    ///
    /// # Errors
    /// - [`QuadrilleError::OffsetsLength`] if there are not `num_elem + 1` entries
    /// - [`QuadrilleError::FirstOffsetNonzero`] if `offsets[0] != 0`
    /// - [`QuadrilleError::NonMonotoneOffsets`] at the first decreasing pair
    ///
    /// # Complexity
    /// One O(`num_elem`) scan; no allocation beyond the copy policy of
    /// `source`.
    pub(crate) fn new(num_elem: usize, source: IndexSource<'_>) -> Result<Self, QuadrilleError> {
        let buf = IndexBuf::from(source);
        let offsets = buf.as_slice();
        if offsets.len() != num_elem + 1 {
            return Err(QuadrilleError::OffsetsLength {
                expected: num_elem + 1,
                found: offsets.len(),
            });
        }
        if offsets[0] != 0 {
            return Err(QuadrilleError::FirstOffsetNonzero { found: offsets[0] });
        }
        let mut min_points = usize::MAX;
        let mut max_points = 0usize;
        for (element, (&lo, &hi)) in offsets.iter().tuple_windows().enumerate() {
            if hi < lo {
                return Err(QuadrilleError::NonMonotoneOffsets {
                    element,
                    prev: lo,
                    next: hi,
                });
            }
            let count = hi - lo;
            min_points = min_points.min(count);
            max_points = max_points.max(count);
        }
        if num_elem == 0 {
            min_points = 0;
        }
        Ok(Self {
            buf,
            min_points,
            max_points,
        })
    }

    /// Number of elements described by the table.
    #[inline]
    pub(crate) fn num_elements(&self) -> usize {
        self.buf.as_slice().len() - 1
    }

    /// Total number of slots across all elements.
    #[inline]
    pub(crate) fn total_points(&self) -> usize {
        let offsets = self.buf.as_slice();
        offsets[offsets.len() - 1]
    }

    /// Slot range of element `e` in the flat index arena.
    ///
    /// Callers must have bounds-checked `e`.
    #[inline]
    pub(crate) fn span(&self, e: usize) -> Range<usize> {
        let offsets = self.buf.as_slice();
        offsets[e]..offsets[e + 1]
    }

    /// Number of points in element `e`.
    #[inline]
    pub(crate) fn count(&self, e: usize) -> usize {
        let span = self.span(e);
        span.end - span.start
    }

    /// Iterate over every element's slot range in element order.
    pub(crate) fn spans(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.buf
            .as_slice()
            .iter()
            .tuple_windows()
            .map(|(&lo, &hi)| lo..hi)
    }

    /// Smallest per-element point count.
    #[inline]
    pub(crate) fn min_points(&self) -> usize {
        self.min_points
    }

    /// Largest per-element point count.
    #[inline]
    pub(crate) fn max_points(&self) -> usize {
        self.max_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_and_extrema() {
        let table = PointOffsets::new(3, IndexSource::Copy(&[0, 2, 5, 6])).unwrap();
        assert_eq!(table.num_elements(), 3);
        assert_eq!(table.total_points(), 6);
        assert_eq!(table.span(0), 0..2);
        assert_eq!(table.span(1), 2..5);
        assert_eq!(table.span(2), 5..6);
        assert_eq!(table.min_points(), 1);
        assert_eq!(table.max_points(), 3);
        let counts: Vec<_> = table.spans().map(|s| s.len()).collect();
        assert_eq!(counts, vec![2, 3, 1]);
    }

    #[test]
    fn extrema_bracket_every_count() {
        let table = PointOffsets::new(4, IndexSource::Copy(&[0, 3, 3, 7, 8])).unwrap();
        for e in 0..table.num_elements() {
            assert!(table.min_points() <= table.count(e));
            assert!(table.count(e) <= table.max_points());
        }
        assert_eq!(table.min_points(), 0);
        assert_eq!(table.max_points(), 4);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = PointOffsets::new(3, IndexSource::Copy(&[0, 2, 5])).unwrap_err();
        assert_eq!(
            err,
            QuadrilleError::OffsetsLength {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn nonzero_start_rejected() {
        let err = PointOffsets::new(2, IndexSource::Copy(&[1, 2, 3])).unwrap_err();
        assert_eq!(err, QuadrilleError::FirstOffsetNonzero { found: 1 });
    }

    #[test]
    fn non_monotone_rejected() {
        let err = PointOffsets::new(3, IndexSource::Copy(&[0, 4, 2, 6])).unwrap_err();
        assert_eq!(
            err,
            QuadrilleError::NonMonotoneOffsets {
                element: 1,
                prev: 4,
                next: 2
            }
        );
    }

    #[test]
    fn empty_table() {
        let table = PointOffsets::new(0, IndexSource::Copy(&[0])).unwrap();
        assert_eq!(table.num_elements(), 0);
        assert_eq!(table.total_points(), 0);
        assert_eq!(table.min_points(), 0);
        assert_eq!(table.max_points(), 0);
        assert_eq!(table.spans().count(), 0);
    }
}
