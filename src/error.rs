//! QuadrilleError: unified error type for quadrille public APIs.
//!
//! Every fallible public operation in the crate reports through this enum so
//! callers match on one type. Creation-time validation errors carry enough
//! context (positions, expected/found sizes) to identify the offending entry
//! without re-scanning the input.

use thiserror::Error;

use crate::qfunction::EvalMode;

/// Unified error type for quadrille operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuadrilleError {
    /// A vector view was requested while a conflicting view is outstanding.
    #[error("vector access conflict: a conflicting view is outstanding while requesting {requested} access")]
    AccessConflict {
        /// Kind of view that was requested (`"read"`, `"read-write"` or `"write"`).
        requested: &'static str,
    },
    /// A device-space view was requested on a vector with no attached device buffer.
    #[error("no device buffer attached to this vector")]
    NoDeviceBackend,
    /// A host/device transfer did not complete.
    #[error("device transfer failed: {0}")]
    DeviceTransfer(String),
    /// A supplied vector does not match the length the operation requires.
    #[error("vector length mismatch for {role}: expected {expected}, found {found}")]
    VectorSizeMismatch {
        /// Role of the vector in the failed call (e.g. `"source"`).
        role: &'static str,
        /// Length the operation requires.
        expected: usize,
        /// Length of the vector actually supplied.
        found: usize,
    },
    /// An offsets array does not have `num_elem + 1` entries.
    #[error("offsets array must have {expected} entries, found {found}")]
    OffsetsLength {
        /// Required number of entries (`num_elem + 1`).
        expected: usize,
        /// Number of entries supplied.
        found: usize,
    },
    /// The first entry of an offsets array is not zero.
    #[error("offsets[0] must be 0, found {found}")]
    FirstOffsetNonzero {
        /// Value found at `offsets[0]`.
        found: usize,
    },
    /// An offsets array decreases between two consecutive elements.
    #[error("offsets must be non-decreasing: element {element} has bounds {prev} > {next}")]
    NonMonotoneOffsets {
        /// Element at which the table decreases.
        element: usize,
        /// Offset at the start of the element.
        prev: usize,
        /// Offset at the end of the element.
        next: usize,
    },
    /// An index value lies outside the addressable global range `[0, l_size)`.
    #[error("index {index} at position {position} is out of range for L-vector size {l_size}")]
    IndexOutOfRange {
        /// Position of the offending entry in the flat index array.
        position: usize,
        /// The out-of-range index value.
        index: usize,
        /// Total addressable global size of the restriction.
        l_size: usize,
    },
    /// The flat index array does not have the advertised number of entries.
    #[error("index array must have {expected} entries, found {found}")]
    IndexCountMismatch {
        /// Number of entries the restriction shape requires.
        expected: usize,
        /// Number of entries supplied.
        found: usize,
    },
    /// A restriction was created with zero components.
    #[error("a restriction must carry at least one component")]
    ZeroComponents,
    /// An element index is out of range for the restriction.
    #[error("element {element} out of range for restriction with {num_elem} elements")]
    ElementOutOfRange {
        /// Requested element index.
        element: usize,
        /// Number of elements in the restriction.
        num_elem: usize,
    },
    /// A per-element-count query was made on a fixed-size restriction.
    #[error("operation requires an at-points restriction")]
    NotAtPoints,
    /// An evaluation mode is not supported by the component it was handed to.
    #[error("evaluation mode {0:?} is not supported here")]
    UnsupportedEvalMode(EvalMode),
    /// A QFunction declared more fields than the fixed per-direction limit.
    #[error("a QFunction may declare at most {max} fields per direction, got {found}")]
    TooManyFields {
        /// The per-direction field limit.
        max: usize,
        /// Number of fields declared.
        found: usize,
    },
    /// An operator field name matches no declared QFunction field.
    #[error("operator field `{name}` does not match any declared QFunction field")]
    UnknownField {
        /// The unmatched field name.
        name: String,
    },
    /// A declared QFunction field has no operator wiring.
    #[error("QFunction field `{name}` is missing from the operator wiring")]
    MissingField {
        /// The unwired field name.
        name: String,
    },
    /// A non-weight operator field was wired without an element restriction.
    #[error("field `{name}` requires an element restriction")]
    MissingRestriction {
        /// The field name.
        name: String,
    },
    /// Component counts disagree between a QFunction declaration and its wiring.
    #[error("field `{name}`: QFunction declares {declared} components, wiring provides {provided}")]
    FieldComponentMismatch {
        /// The field name.
        name: String,
        /// Components declared on the QFunction field.
        declared: usize,
        /// Components provided by the wired restriction.
        provided: usize,
    },
    /// Per-element or per-point extents disagree between wired stages.
    #[error("field `{name}`: expected extent {expected}, found {found}")]
    FieldSizeMismatch {
        /// The field name.
        name: String,
        /// Extent required by the surrounding wiring.
        expected: usize,
        /// Extent actually provided.
        found: usize,
    },
    /// Wired restrictions disagree on the number of elements.
    #[error("field `{name}`: expected {expected} elements, found {found}")]
    ElementCountMismatch {
        /// The field name.
        name: String,
        /// Element count established by earlier fields.
        expected: usize,
        /// Element count of this field's restriction.
        found: usize,
    },
    /// The operator does not have exactly one active input and one active output.
    #[error("operator requires exactly one active input and one active output, found {inputs} and {outputs}")]
    ActiveFieldCount {
        /// Number of active input fields.
        inputs: usize,
        /// Number of active output fields.
        outputs: usize,
    },
    /// A by-name registry lookup found no QFunction.
    #[error("no registered QFunction named `{0}`")]
    UnknownQFunction(String),
    /// A QFunction name is already taken in the registry.
    #[error("a QFunction named `{0}` is already registered")]
    DuplicateQFunction(String),
    /// A pointwise kernel body reported a failure.
    #[error("pointwise kernel `{name}` failed: {message}")]
    Kernel {
        /// Name of the failing QFunction.
        name: String,
        /// Kernel-supplied failure description.
        message: String,
    },
}
