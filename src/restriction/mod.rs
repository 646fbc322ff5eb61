//! ElemRestriction: the index map between a global vector and per-element
//! local layouts.
//!
//! A restriction describes, for every element, which entries of an
//! L-vector (one slot per global point times the component count) feed
//! that element. Applying it `NoTranspose` gathers global values into the
//! element-major E-vector layout; applying it `Transpose` scatter-adds
//! per-element contributions back, accumulating wherever elements share a
//! global index. Two index representations exist:
//!
//! - *fixed*: every element has the same number of slots, indices stored
//!   as one flat `num_elem * elem_size` array;
//! - *at points*: per-element counts vary, encoded as a CSR-style
//!   offsets table over a flat index arena.
//!
//! Index values are validated once at creation; `apply` is the hot path
//! and performs only shape checks.
//!
//! # E-vector layout
//!
//! Element-major, slot-major, component-innermost: the value for element
//! `e`, slot `j`, component `c` lives at `(e * stride + j) * num_comp + c`
//! where `stride` is `elem_size` for fixed restrictions and the maximum
//! per-element point count for at-points restrictions. Slots past an
//! element's own count are never written by a gather.

mod offsets;

use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use num_traits::{One, Zero};

use crate::error::QuadrilleError;
use crate::vector::{MemSpace, Vector, VectorValue};

pub(crate) use offsets::PointOffsets;

/// Whether a restriction application gathers or scatter-adds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransposeMode {
    /// Gather: L-vector to E-vector.
    NoTranspose,
    /// Scatter-add: E-vector accumulated into the L-vector.
    Transpose,
}

/// How components of one global point are laid out in the L-vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ComponentLayout {
    /// Components of a point are adjacent: position `idx * num_comp + c`.
    Interleaved,
    /// Components form separate blocks: position `c * l_size + idx`.
    Blocked,
}

/// Ownership policy for index data handed to a restriction at creation.
///
/// The restriction is immutable for its lifetime, so the only question is
/// who owns the backing allocation.
#[derive(Clone, Debug)]
pub enum IndexSource<'a> {
    /// The restriction copies the caller's data.
    Copy(&'a [usize]),
    /// The restriction takes ownership of the allocation.
    Own(Vec<usize>),
    /// The restriction shares the allocation; the caller keeps its own
    /// handle alive independently.
    Shared(Arc<[usize]>),
}

/// Index storage after the creation-time ownership decision.
#[derive(Clone, Debug)]
pub(crate) enum IndexBuf {
    Owned(Vec<usize>),
    Shared(Arc<[usize]>),
}

impl IndexBuf {
    #[inline]
    pub(crate) fn as_slice(&self) -> &[usize] {
        match self {
            IndexBuf::Owned(v) => v,
            IndexBuf::Shared(a) => a,
        }
    }
}

impl From<IndexSource<'_>> for IndexBuf {
    fn from(source: IndexSource<'_>) -> Self {
        match source {
            IndexSource::Copy(s) => IndexBuf::Owned(s.to_vec()),
            IndexSource::Own(v) => IndexBuf::Owned(v),
            IndexSource::Shared(a) => IndexBuf::Shared(a),
        }
    }
}

/// Index representation of a restriction.
#[derive(Clone, Debug)]
enum RestrictionKind {
    Fixed {
        elem_size: usize,
        indices: IndexBuf,
    },
    AtPoints {
        offsets: PointOffsets,
        indices: IndexBuf,
    },
}

#[derive(Debug)]
struct Inner {
    num_elem: usize,
    num_comp: usize,
    layout: ComponentLayout,
    l_size: usize,
    kind: RestrictionKind,
}

impl Inner {
    /// L-vector position of component `c` of global point `idx`.
    #[inline]
    fn l_index(&self, idx: usize, c: usize) -> usize {
        match self.layout {
            ComponentLayout::Interleaved => idx * self.num_comp + c,
            ComponentLayout::Blocked => c * self.l_size + idx,
        }
    }

    /// Slots per element in the E-vector layout.
    #[inline]
    fn stride(&self) -> usize {
        match &self.kind {
            RestrictionKind::Fixed { elem_size, .. } => *elem_size,
            RestrictionKind::AtPoints { offsets, .. } => offsets.max_points(),
        }
    }
}

/// Immutable, shared index-mapping operator between a global vector and
/// per-element local arrays. Cloning shares the handle; the index storage
/// is freed when the last handle drops.
#[derive(Clone, Debug)]
pub struct ElemRestriction {
    inner: Arc<Inner>,
}

static_assertions::assert_impl_all!(ElemRestriction: Send, Sync, Clone);

fn validate_indices(indices: &[usize], l_size: usize) -> Result<(), QuadrilleError> {
    for (position, &index) in indices.iter().enumerate() {
        if index >= l_size {
            return Err(QuadrilleError::IndexOutOfRange {
                position,
                index,
                l_size,
            });
        }
    }
    Ok(())
}

impl ElemRestriction {
    /// Create a fixed-degree restriction: every element has `elem_size`
    /// slots, with `indices[e * elem_size + j]` naming the global point of
    /// element `e`'s slot `j`.
    ///
    /// All validation happens here, in one pass; on error no object is
    /// created and owned storage is released.
    ///
    /// # Errors
    /// - [`QuadrilleError::ZeroComponents`] if `num_comp == 0`
    /// - [`QuadrilleError::IndexCountMismatch`] if the index array length
    ///   is not `num_elem * elem_size`
    /// - [`QuadrilleError::IndexOutOfRange`] on the first index `>= l_size`
    pub fn new(
        num_elem: usize,
        elem_size: usize,
        num_comp: usize,
        layout: ComponentLayout,
        l_size: usize,
        indices: IndexSource<'_>,
    ) -> Result<Self, QuadrilleError> {
        if num_comp == 0 {
            return Err(QuadrilleError::ZeroComponents);
        }
        let indices = IndexBuf::from(indices);
        let expected = num_elem * elem_size;
        if indices.as_slice().len() != expected {
            return Err(QuadrilleError::IndexCountMismatch {
                expected,
                found: indices.as_slice().len(),
            });
        }
        validate_indices(indices.as_slice(), l_size)?;
        log::debug!(
            "created fixed restriction: {num_elem} elements x {elem_size} slots, \
             {num_comp} comps over {l_size} points"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                num_elem,
                num_comp,
                layout,
                l_size,
                kind: RestrictionKind::Fixed { elem_size, indices },
            }),
        })
    }

    /// Create a ragged ("at points") restriction from a CSR-style offsets
    /// table and flat index arena: element `e` owns slots
    /// `offsets[e]..offsets[e + 1]` of `indices`.
    ///
    /// The per-element point-count extrema are computed here, in the same
    /// linear scan that validates the table, and served in O(1) by
    /// [`ElemRestriction::min_points_in_element`] /
    /// [`ElemRestriction::max_points_in_element`]. Elements with zero
    /// points are accepted and contribute nothing under either apply
    /// direction.
    ///
    /// # Errors
    /// Offsets-table violations as documented on the error variants, plus
    /// [`QuadrilleError::IndexCountMismatch`] if the arena length differs
    /// from `offsets[num_elem]`, and [`QuadrilleError::IndexOutOfRange`]
    /// on the first index `>= l_size`.
    pub fn new_at_points(
        num_elem: usize,
        num_comp: usize,
        layout: ComponentLayout,
        l_size: usize,
        offsets: IndexSource<'_>,
        indices: IndexSource<'_>,
    ) -> Result<Self, QuadrilleError> {
        if num_comp == 0 {
            return Err(QuadrilleError::ZeroComponents);
        }
        let offsets = PointOffsets::new(num_elem, offsets)?;
        debug_assert_eq!(offsets.num_elements(), num_elem);
        let indices = IndexBuf::from(indices);
        if indices.as_slice().len() != offsets.total_points() {
            return Err(QuadrilleError::IndexCountMismatch {
                expected: offsets.total_points(),
                found: indices.as_slice().len(),
            });
        }
        validate_indices(indices.as_slice(), l_size)?;
        log::debug!(
            "created at-points restriction: {num_elem} elements, {} points \
             (per-element {}..={}), {num_comp} comps over {l_size} points",
            offsets.total_points(),
            offsets.min_points(),
            offsets.max_points(),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                num_elem,
                num_comp,
                layout,
                l_size,
                kind: RestrictionKind::AtPoints { offsets, indices },
            }),
        })
    }

    /// Number of elements.
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.inner.num_elem
    }

    /// Number of components per global point.
    #[inline]
    pub fn num_components(&self) -> usize {
        self.inner.num_comp
    }

    /// Component layout of the L-vector side.
    #[inline]
    pub fn layout(&self) -> ComponentLayout {
        self.inner.layout
    }

    /// Total addressable global size (number of global points).
    #[inline]
    pub fn l_size(&self) -> usize {
        self.inner.l_size
    }

    /// Slots per element in the E-vector layout: `elem_size` for fixed
    /// restrictions, the maximum per-element point count for at-points.
    #[inline]
    pub fn elem_size(&self) -> usize {
        self.inner.stride()
    }

    /// Total number of `(element, slot)` pairs.
    #[inline]
    pub fn num_points(&self) -> usize {
        match &self.inner.kind {
            RestrictionKind::Fixed { elem_size, .. } => self.inner.num_elem * elem_size,
            RestrictionKind::AtPoints { offsets, .. } => offsets.total_points(),
        }
    }

    /// True for the ragged representation.
    #[inline]
    pub fn is_at_points(&self) -> bool {
        matches!(self.inner.kind, RestrictionKind::AtPoints { .. })
    }

    /// Smallest per-element point count, cached at creation.
    ///
    /// # Errors
    /// [`QuadrilleError::NotAtPoints`] for fixed restrictions.
    #[inline]
    pub fn min_points_in_element(&self) -> Result<usize, QuadrilleError> {
        match &self.inner.kind {
            RestrictionKind::AtPoints { offsets, .. } => Ok(offsets.min_points()),
            RestrictionKind::Fixed { .. } => Err(QuadrilleError::NotAtPoints),
        }
    }

    /// Largest per-element point count, cached at creation.
    ///
    /// # Errors
    /// [`QuadrilleError::NotAtPoints`] for fixed restrictions.
    #[inline]
    pub fn max_points_in_element(&self) -> Result<usize, QuadrilleError> {
        match &self.inner.kind {
            RestrictionKind::AtPoints { offsets, .. } => Ok(offsets.max_points()),
            RestrictionKind::Fixed { .. } => Err(QuadrilleError::NotAtPoints),
        }
    }

    /// Length of the L-vector this restriction addresses.
    #[inline]
    pub fn l_vector_len(&self) -> usize {
        self.inner.l_size * self.inner.num_comp
    }

    /// Length of the E-vector this restriction produces.
    #[inline]
    pub fn e_vector_len(&self) -> usize {
        self.inner.num_elem * self.inner.stride() * self.inner.num_comp
    }

    /// Allocate a zero-filled vector sized to the global extent, so
    /// callers obtain correctly sized buffers without recomputing layout.
    pub fn create_lvector<V: VectorValue>(&self) -> Vector<V> {
        Vector::new(self.l_vector_len())
    }

    /// Allocate a zero-filled vector sized to the per-element extent.
    pub fn create_evector<V: VectorValue>(&self) -> Vector<V> {
        Vector::new(self.e_vector_len())
    }

    /// Apply the restriction.
    ///
    /// `NoTranspose` gathers: for every element `e`, slot `j`, component
    /// `c`, `v[e][j][c] = u[index(e, j)][c]`. E-vector slots past an
    /// element's own count are left unwritten; callers must not read them
    /// without separate initialization.
    ///
    /// `Transpose` scatter-adds: `v[index(e, j)][c] += u[e][j][c]`. This
    /// accumulates; zero `v` first for a non-additive result. Elements
    /// sharing a global index each contribute to the same entry; the
    /// result is the mathematical sum of all contributions, independent of
    /// element traversal order within floating-point tolerance. A failure
    /// part-way through a transpose apply may leave some but not all
    /// contributions applied; this layer does not promise all-or-nothing
    /// application across elements.
    ///
    /// # Errors
    /// [`QuadrilleError::VectorSizeMismatch`] if `u`/`v` lengths do not
    /// match the L/E extents for `mode`, and access-control errors from
    /// the vectors' views.
    pub fn apply<V>(
        &self,
        mode: TransposeMode,
        u: &Vector<V>,
        v: &Vector<V>,
    ) -> Result<(), QuadrilleError>
    where
        V: VectorValue + AddAssign,
    {
        let (expect_u, expect_v) = match mode {
            TransposeMode::NoTranspose => (self.l_vector_len(), self.e_vector_len()),
            TransposeMode::Transpose => (self.e_vector_len(), self.l_vector_len()),
        };
        check_len("source", expect_u, u.len())?;
        check_len("destination", expect_v, v.len())?;
        match mode {
            TransposeMode::NoTranspose => {
                let src = u.read(MemSpace::Host)?;
                let mut dst = v.write_only(MemSpace::Host)?;
                self.gather_into(&src, &mut dst);
            }
            TransposeMode::Transpose => {
                let src = u.read(MemSpace::Host)?;
                let mut dst = v.write(MemSpace::Host)?;
                self.scatter_add_into(&src, &mut dst);
            }
        }
        Ok(())
    }

    /// Apply the restriction for a single element of an at-points
    /// restriction, against a local vector covering just that element's
    /// slots (`local[j * num_comp + c]`, `j < count(element)`).
    ///
    /// `NoTranspose`: `u` is the L-vector, `v` the local vector.
    /// `Transpose`: `u` is the local vector, `v` the L-vector,
    /// accumulated. The local vector may be longer than the element needs
    /// (e.g. sized for `max_points_in_element`); extra slots are ignored.
    ///
    /// # Errors
    /// - [`QuadrilleError::NotAtPoints`] for fixed restrictions
    /// - [`QuadrilleError::ElementOutOfRange`] if `element >= num_elements`
    /// - [`QuadrilleError::VectorSizeMismatch`] on shape violations
    pub fn apply_at_points_in_element<V>(
        &self,
        element: usize,
        mode: TransposeMode,
        u: &Vector<V>,
        v: &Vector<V>,
    ) -> Result<(), QuadrilleError>
    where
        V: VectorValue + AddAssign,
    {
        let inner = &*self.inner;
        let RestrictionKind::AtPoints { offsets, indices } = &inner.kind else {
            return Err(QuadrilleError::NotAtPoints);
        };
        if element >= inner.num_elem {
            return Err(QuadrilleError::ElementOutOfRange {
                element,
                num_elem: inner.num_elem,
            });
        }
        let local_len = offsets.count(element) * inner.num_comp;
        let points = &indices.as_slice()[offsets.span(element)];
        match mode {
            TransposeMode::NoTranspose => {
                check_len("source", self.l_vector_len(), u.len())?;
                check_min_len("destination", local_len, v.len())?;
                let src = u.read(MemSpace::Host)?;
                let mut dst = v.write_only(MemSpace::Host)?;
                for (j, &g) in points.iter().enumerate() {
                    for c in 0..inner.num_comp {
                        dst[j * inner.num_comp + c] = src[inner.l_index(g, c)];
                    }
                }
            }
            TransposeMode::Transpose => {
                check_min_len("source", local_len, u.len())?;
                check_len("destination", self.l_vector_len(), v.len())?;
                let src = u.read(MemSpace::Host)?;
                let mut dst = v.write(MemSpace::Host)?;
                for (j, &g) in points.iter().enumerate() {
                    for c in 0..inner.num_comp {
                        dst[inner.l_index(g, c)] += src[j * inner.num_comp + c];
                    }
                }
            }
        }
        Ok(())
    }

    /// Count, per L-vector entry, how many `(element, slot)` pairs
    /// reference it. Overwrites `mult` (it is not accumulated into).
    ///
    /// # Errors
    /// [`QuadrilleError::VectorSizeMismatch`] if `mult` is not L-sized,
    /// plus access-control errors.
    pub fn multiplicity<V>(&self, mult: &Vector<V>) -> Result<(), QuadrilleError>
    where
        V: VectorValue + Zero + One + AddAssign,
    {
        check_len("multiplicity", self.l_vector_len(), mult.len())?;
        let inner = &*self.inner;
        let indices = match &inner.kind {
            RestrictionKind::Fixed { indices, .. } => indices.as_slice(),
            RestrictionKind::AtPoints { indices, .. } => indices.as_slice(),
        };
        let mut view = mult.write_only(MemSpace::Host)?;
        view.fill(V::zero());
        for &g in indices {
            for c in 0..inner.num_comp {
                view[inner.l_index(g, c)] += V::one();
            }
        }
        Ok(())
    }

    /// Gather `src` (L-layout) into `dst` (E-layout).
    fn gather_into<V: VectorValue>(&self, src: &[V], dst: &mut [V]) {
        let inner = &*self.inner;
        let nc = inner.num_comp;
        let chunk = inner.stride() * nc;
        if chunk == 0 || inner.num_elem == 0 {
            return;
        }
        match &inner.kind {
            RestrictionKind::Fixed { elem_size, indices } => {
                let es = *elem_size;
                let idx = indices.as_slice();
                let fill = |e: usize, out: &mut [V]| {
                    for (j, &g) in idx[e * es..(e + 1) * es].iter().enumerate() {
                        for c in 0..nc {
                            out[j * nc + c] = src[inner.l_index(g, c)];
                        }
                    }
                };
                for_each_chunk(dst, chunk, fill);
            }
            RestrictionKind::AtPoints { offsets, indices } => {
                let idx = indices.as_slice();
                let fill = |e: usize, out: &mut [V]| {
                    for (j, &g) in idx[offsets.span(e)].iter().enumerate() {
                        for c in 0..nc {
                            out[j * nc + c] = src[inner.l_index(g, c)];
                        }
                    }
                };
                for_each_chunk(dst, chunk, fill);
            }
        }
    }

    /// Scatter-add `src` (E-layout) into `dst` (L-layout).
    ///
    /// Distinct elements may alias the same global index; accumulation
    /// stays single-threaded so each destination entry receives the exact
    /// sum of its contributions.
    fn scatter_add_into<V>(&self, src: &[V], dst: &mut [V])
    where
        V: VectorValue + AddAssign,
    {
        let inner = &*self.inner;
        let nc = inner.num_comp;
        let stride = inner.stride();
        if stride == 0 {
            return;
        }
        match &inner.kind {
            RestrictionKind::Fixed { elem_size, indices } => {
                let es = *elem_size;
                for (e, elem_indices) in indices.as_slice().chunks_exact(es).enumerate() {
                    for (j, &g) in elem_indices.iter().enumerate() {
                        for c in 0..nc {
                            dst[inner.l_index(g, c)] += src[(e * stride + j) * nc + c];
                        }
                    }
                }
            }
            RestrictionKind::AtPoints { offsets, indices } => {
                let idx = indices.as_slice();
                for (e, span) in offsets.spans().enumerate() {
                    for (j, &g) in idx[span].iter().enumerate() {
                        for c in 0..nc {
                            dst[inner.l_index(g, c)] += src[(e * stride + j) * nc + c];
                        }
                    }
                }
            }
        }
    }
}

/// Run `fill(e, chunk)` over consecutive `chunk_len` windows of `dst`,
/// one per element, in parallel when the `rayon` feature is enabled.
#[cfg(feature = "rayon")]
fn for_each_chunk<V, F>(dst: &mut [V], chunk_len: usize, fill: F)
where
    V: VectorValue,
    F: Fn(usize, &mut [V]) + Sync,
{
    use rayon::prelude::*;
    dst.par_chunks_mut(chunk_len)
        .enumerate()
        .for_each(|(e, chunk)| fill(e, chunk));
}

#[cfg(not(feature = "rayon"))]
fn for_each_chunk<V, F>(dst: &mut [V], chunk_len: usize, fill: F)
where
    V: VectorValue,
    F: Fn(usize, &mut [V]) + Sync,
{
    for (e, chunk) in dst.chunks_mut(chunk_len).enumerate() {
        fill(e, chunk);
    }
}

fn check_len(role: &'static str, expected: usize, found: usize) -> Result<(), QuadrilleError> {
    if expected != found {
        return Err(QuadrilleError::VectorSizeMismatch {
            role,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_min_len(role: &'static str, expected: usize, found: usize) -> Result<(), QuadrilleError> {
    if found < expected {
        return Err(QuadrilleError::VectorSizeMismatch {
            role,
            expected,
            found,
        });
    }
    Ok(())
}

impl fmt::Display for TransposeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransposeMode::NoTranspose => write!(f, "notranspose"),
            TransposeMode::Transpose => write!(f, "transpose"),
        }
    }
}
