//! # quadrille
//!
//! quadrille provides the indexing and evaluation primitives that
//! finite-element and point-cloud assembly engines are built from: vectors
//! with host/device residency tracking, element restrictions that gather
//! global values into per-element layouts and scatter-accumulate them back,
//! and the field contract for pointwise quadrature kernels.
//!
//! ## Components
//! - [`vector::Vector`]: flat scalar storage with lazy host/device
//!   synchronization and fail-fast scoped access
//! - [`restriction::ElemRestriction`]: the global-to-local index map, in
//!   fixed-degree and ragged ("at points") forms, applied as a gather
//!   (`NoTranspose`) or a scatter-add (`Transpose`)
//! - [`qfunction::QFunction`]: declaration and batched invocation of pure
//!   pointwise kernels over named fields with evaluation modes
//! - [`operator::Operator`]: composition glue sequencing
//!   restriction → basis → QFunction → restriction
//!
//! The basis stage is an external collaborator consumed through the
//! [`operator::Basis`] trait; only the trivial collocated basis ships here.
//!
//! ## Determinism
//!
//! Gather is a pure function of its inputs. Scatter-add accumulates
//! contributions whose mathematical sum is independent of element traversal
//! order; bitwise reproducibility across differing parallel orderings is
//! not promised, only numerical agreement within floating-point tolerance.
//! This implementation accumulates single-threaded, so repeated runs on the
//! same build are additionally bit-stable.
//!
//! ## Features
//! - `rayon`: data-parallel gather across elements
//! - `wgpu`: a GPU-resident [`vector::DeviceBuffer`] implementation

pub mod error;
pub mod operator;
pub mod qfunction;
pub mod restriction;
pub mod vector;

pub use error::QuadrilleError;

/// Scalar type consumed and produced by pointwise kernels and operators.
pub type Scalar = f64;

/// Machine epsilon for [`Scalar`], used by conformance tolerances.
pub const EPSILON: Scalar = Scalar::EPSILON;

/// A convenient prelude importing the most-used traits and types.
pub mod prelude {
    pub use crate::error::QuadrilleError;
    pub use crate::operator::{Basis, CollocatedBasis, FieldSlot, Operator};
    pub use crate::qfunction::{
        EvalMode, PointwiseQFunction, QFunction, QFunctionField, MAX_QFUNCTION_FIELDS,
    };
    pub use crate::restriction::{ComponentLayout, ElemRestriction, IndexSource, TransposeMode};
    pub use crate::vector::{DeviceBuffer, MemSpace, NormType, Vector, VectorValue};
    pub use crate::{Scalar, EPSILON};
}
