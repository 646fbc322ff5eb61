//! QFunction: declaration and batched invocation of pointwise kernels.
//!
//! A QFunction is a pure function applied uniformly and independently to
//! every point of a batch. It is registered once with an ordered list of
//! named input and output fields, each carrying a component count and an
//! [`EvalMode`] that fixes the per-point array shape. At evaluation time
//! the kernel receives the batch size `q` and one contiguous array per
//! field, laid out point-major: the slice for field `f` has length
//! `q * size(f)` and point `p`'s values occupy
//! `[p * size(f), (p + 1) * size(f))`.
//!
//! Kernels must not introduce data dependencies between points within a
//! batch; that independence is what permits arbitrary partitioning of the
//! batch across parallel workers or vector lanes. Kernels are pure with
//! respect to their declared fields and context: no hidden mutable state,
//! no I/O. Field mismatches against a call site are a configuration error
//! caught once, when an operator assembling the QFunction is finalized,
//! not per invocation.
//!
//! Physical parameters travel in a typed context value owned by the
//! [`QFunction`]; type erasure to [`PointwiseQFunction`] happens at the
//! operator boundary, so kernel bodies never downcast.

pub mod gallery;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::Scalar;
use crate::error::QuadrilleError;

/// Maximum number of fields a QFunction may declare per direction.
pub const MAX_QFUNCTION_FIELDS: usize = 16;

/// Per-point shape and semantics of a field's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EvalMode {
    /// Values used directly at points, no basis action.
    None,
    /// Values interpolated to quadrature points.
    Interp,
    /// Gradients at quadrature points.
    Grad,
    /// Divergence at quadrature points.
    Div,
    /// Curl at quadrature points.
    Curl,
    /// Quadrature weights; produced by the basis, never restricted.
    Weight,
}

impl EvalMode {
    /// Per-point array size for a field with `num_comp` components in
    /// `dim` reference dimensions.
    pub fn q_size(&self, num_comp: usize, dim: usize) -> usize {
        match self {
            EvalMode::None | EvalMode::Interp => num_comp,
            EvalMode::Grad => num_comp * dim,
            EvalMode::Div => num_comp,
            EvalMode::Curl => num_comp * if dim < 3 { 1 } else { dim },
            EvalMode::Weight => 1,
        }
    }
}

/// One declared QFunction field.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QFunctionField {
    /// Field name, matched against operator wiring.
    pub name: String,
    /// Number of components before the evaluation-mode shape rule.
    pub num_comp: usize,
    /// Shape rule for the per-point data.
    pub eval_mode: EvalMode,
}

impl QFunctionField {
    /// Declare a field.
    pub fn new(name: impl Into<String>, num_comp: usize, eval_mode: EvalMode) -> Self {
        Self {
            name: name.into(),
            num_comp,
            eval_mode,
        }
    }

    /// Per-point array size of this field in `dim` dimensions.
    #[inline]
    pub fn q_size(&self, dim: usize) -> usize {
        self.eval_mode.q_size(self.num_comp, dim)
    }
}

/// Batched, type-erased pointwise kernel.
///
/// `inputs` and `outputs` follow the declared field order; each slice is
/// point-major as described in the module docs.
pub trait PointwiseQFunction: fmt::Debug + Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Declared input fields, in kernel order.
    fn inputs(&self) -> &[QFunctionField];

    /// Declared output fields, in kernel order.
    fn outputs(&self) -> &[QFunctionField];

    /// Evaluate the kernel over `q` points.
    fn apply(
        &self,
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError>;
}

/// Kernel body signature for [`QFunction`].
pub type KernelFn<Ctx> =
    fn(&Ctx, usize, &[&[Scalar]], &mut [&mut [Scalar]]) -> Result<(), QuadrilleError>;

/// A pointwise kernel with a typed context and declared fields.
///
/// The context carries the kernel's physical parameters as an ordinary
/// value the kernel body receives by reference; there is no untyped
/// payload to cast at the call site.
#[derive(Debug)]
pub struct QFunction<Ctx = ()> {
    name: String,
    inputs: Vec<QFunctionField>,
    outputs: Vec<QFunctionField>,
    context: Ctx,
    kernel: KernelFn<Ctx>,
}

impl<Ctx> QFunction<Ctx> {
    /// Create a QFunction with no fields declared yet.
    pub fn new(name: impl Into<String>, context: Ctx, kernel: KernelFn<Ctx>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            context,
            kernel,
        }
    }

    /// Declare the next input field.
    ///
    /// # Errors
    /// [`QuadrilleError::TooManyFields`] past [`MAX_QFUNCTION_FIELDS`].
    pub fn input(
        mut self,
        name: impl Into<String>,
        num_comp: usize,
        eval_mode: EvalMode,
    ) -> Result<Self, QuadrilleError> {
        if self.inputs.len() == MAX_QFUNCTION_FIELDS {
            return Err(QuadrilleError::TooManyFields {
                max: MAX_QFUNCTION_FIELDS,
                found: self.inputs.len() + 1,
            });
        }
        self.inputs.push(QFunctionField::new(name, num_comp, eval_mode));
        Ok(self)
    }

    /// Declare the next output field.
    ///
    /// # Errors
    /// [`QuadrilleError::TooManyFields`] past [`MAX_QFUNCTION_FIELDS`].
    pub fn output(
        mut self,
        name: impl Into<String>,
        num_comp: usize,
        eval_mode: EvalMode,
    ) -> Result<Self, QuadrilleError> {
        if self.outputs.len() == MAX_QFUNCTION_FIELDS {
            return Err(QuadrilleError::TooManyFields {
                max: MAX_QFUNCTION_FIELDS,
                found: self.outputs.len() + 1,
            });
        }
        self.outputs
            .push(QFunctionField::new(name, num_comp, eval_mode));
        Ok(self)
    }

    /// The kernel's typed context.
    pub fn context(&self) -> &Ctx {
        &self.context
    }
}

impl<Ctx> PointwiseQFunction for QFunction<Ctx>
where
    Ctx: fmt::Debug + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[QFunctionField] {
        &self.inputs
    }

    fn outputs(&self) -> &[QFunctionField] {
        &self.outputs
    }

    fn apply(
        &self,
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        (self.kernel)(&self.context, q, inputs, outputs)
    }
}

/// Global by-name registry, seeded with the gallery kernels.
static REGISTRY: Lazy<DashMap<String, Arc<dyn PointwiseQFunction>>> = Lazy::new(|| {
    let map = DashMap::new();
    gallery::register_all(&map);
    map
});

/// Register a QFunction under its name for later [`by_name`] lookup.
///
/// # Errors
/// [`QuadrilleError::DuplicateQFunction`] if the name is taken.
pub fn register(qf: Arc<dyn PointwiseQFunction>) -> Result<(), QuadrilleError> {
    use dashmap::mapref::entry::Entry;
    let name = qf.name().to_owned();
    match REGISTRY.entry(name.clone()) {
        Entry::Occupied(_) => Err(QuadrilleError::DuplicateQFunction(name)),
        Entry::Vacant(slot) => {
            slot.insert(qf);
            Ok(())
        }
    }
}

/// Look up a registered QFunction by name.
///
/// # Errors
/// [`QuadrilleError::UnknownQFunction`] if nothing is registered under
/// `name`.
pub fn by_name(name: &str) -> Result<Arc<dyn PointwiseQFunction>, QuadrilleError> {
    REGISTRY
        .get(name)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or_else(|| QuadrilleError::UnknownQFunction(name.to_owned()))
}
