//! Operator: composition glue for the restriction → basis → QFunction →
//! restriction pipeline.
//!
//! An operator wires a [`PointwiseQFunction`]'s declared fields to element
//! restrictions, basis actions, and vectors. Its action is
//!
//! 1. gather each input field's global values into element layout
//!    (`ElemRestriction::apply`, `NoTranspose`),
//! 2. map them to quadrature-point values per the field's [`EvalMode`]
//!    (the [`Basis`] seam, an external collaborator),
//! 3. evaluate the QFunction over the whole batch of points,
//! 4. map outputs back through the basis transpose and scatter-add them
//!    into the global output (`Transpose`).
//!
//! All field-contract checking (names, component counts, extents) happens
//! once, at [`Operator::finalize`] (or lazily on the first apply), never
//! per batched call.
//!
//! Only [`CollocatedBasis`] ships in this crate: tensor-product and
//! simplex bases, backend selection and kernel compilation live with the
//! external basis/backend layer, which this module consumes strictly
//! through the [`Basis`] trait and the declared evaluation modes.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::Scalar;
use crate::error::QuadrilleError;
use crate::qfunction::{EvalMode, PointwiseQFunction, QFunctionField};
use crate::restriction::{ElemRestriction, TransposeMode};
use crate::vector::{MemSpace, Vector};

/// Basis action over a batch of elements.
///
/// `u` holds `num_elem * num_nodes * num_comp` element-major nodal values
/// (matching the restriction's E-vector layout) and `v` holds
/// `num_elem * num_quadrature_points * q_size` point-major quadrature
/// values; `Transpose` maps the other way. `Weight` is produced from
/// nothing (`u` is empty) and only in the `NoTranspose` direction.
pub trait Basis: fmt::Debug + Send + Sync {
    /// Nodes per element on the input side.
    fn num_nodes(&self) -> usize;

    /// Quadrature points per element on the output side.
    fn num_quadrature_points(&self) -> usize;

    /// Reference dimension, entering evaluation-mode shape rules.
    fn dim(&self) -> usize;

    /// Apply the basis action for one evaluation mode.
    fn apply(
        &self,
        num_elem: usize,
        mode: TransposeMode,
        eval_mode: EvalMode,
        num_comp: usize,
        u: &[Scalar],
        v: &mut [Scalar],
    ) -> Result<(), QuadrilleError>;
}

/// The identity basis: nodes and quadrature points coincide.
///
/// This is the degenerate basis of collocated and meshfree methods, where
/// field values are already carried at the evaluation points. It supports
/// `None`/`Interp` (copy) and `Weight` (unit weights); differential modes
/// belong to real bases outside this crate.
#[derive(Clone, Debug)]
pub struct CollocatedBasis {
    num_points: usize,
    dim: usize,
}

impl CollocatedBasis {
    /// A collocated basis over `num_points` points per element in `dim`
    /// reference dimensions.
    pub fn new(num_points: usize, dim: usize) -> Self {
        Self { num_points, dim }
    }
}

impl Basis for CollocatedBasis {
    fn num_nodes(&self) -> usize {
        self.num_points
    }

    fn num_quadrature_points(&self) -> usize {
        self.num_points
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn apply(
        &self,
        num_elem: usize,
        mode: TransposeMode,
        eval_mode: EvalMode,
        num_comp: usize,
        u: &[Scalar],
        v: &mut [Scalar],
    ) -> Result<(), QuadrilleError> {
        match eval_mode {
            EvalMode::None | EvalMode::Interp => {
                debug_assert_eq!(u.len(), num_elem * self.num_points * num_comp);
                debug_assert_eq!(v.len(), u.len());
                v.copy_from_slice(u);
                Ok(())
            }
            EvalMode::Weight => match mode {
                TransposeMode::NoTranspose => {
                    debug_assert_eq!(v.len(), num_elem * self.num_points);
                    v.fill(1.0);
                    Ok(())
                }
                TransposeMode::Transpose => Err(QuadrilleError::UnsupportedEvalMode(eval_mode)),
            },
            EvalMode::Grad | EvalMode::Div | EvalMode::Curl => {
                Err(QuadrilleError::UnsupportedEvalMode(eval_mode))
            }
        }
    }
}

/// Data wiring for one operator field.
#[derive(Clone, Debug)]
pub enum FieldSlot {
    /// The operator's active vector at apply time.
    Active,
    /// A fixed vector bound at wiring time.
    Passive(Vector<Scalar>),
    /// No vector; legal only for fields the basis produces (weights).
    None,
}

#[derive(Debug)]
struct OperatorField {
    name: String,
    restriction: Option<ElemRestriction>,
    basis: Arc<dyn Basis>,
    slot: FieldSlot,
}

/// Extents and field wiring resolved by the one-time finalize check.
#[derive(Debug)]
struct Plan {
    num_elem: usize,
    total_q: usize,
    dim: usize,
    x_len: usize,
    y_len: usize,
    /// Index into `Operator::inputs` for each declared QFunction input.
    in_wiring: Vec<usize>,
    /// Index into `Operator::outputs` for each declared QFunction output.
    out_wiring: Vec<usize>,
}

/// A discrete operator assembled from a QFunction and per-field wiring.
pub struct Operator {
    qf: Arc<dyn PointwiseQFunction>,
    inputs: Vec<OperatorField>,
    outputs: Vec<OperatorField>,
    plan: OnceCell<Plan>,
}

static_assertions::assert_impl_all!(Operator: Send, Sync);

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("qfunction", &self.qf.name())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("finalized", &self.plan.get().is_some())
            .finish()
    }
}

impl Operator {
    /// Start wiring an operator around `qf`.
    pub fn new(qf: Arc<dyn PointwiseQFunction>) -> Self {
        Self {
            qf,
            inputs: Vec::new(),
            outputs: Vec::new(),
            plan: OnceCell::new(),
        }
    }

    /// Wire an input field. `restriction` is `None` only for fields the
    /// basis produces (weights).
    pub fn input(
        mut self,
        name: impl Into<String>,
        restriction: Option<ElemRestriction>,
        basis: Arc<dyn Basis>,
        slot: FieldSlot,
    ) -> Self {
        self.inputs.push(OperatorField {
            name: name.into(),
            restriction,
            basis,
            slot,
        });
        self
    }

    /// Wire an output field.
    pub fn output(
        mut self,
        name: impl Into<String>,
        restriction: Option<ElemRestriction>,
        basis: Arc<dyn Basis>,
        slot: FieldSlot,
    ) -> Self {
        self.outputs.push(OperatorField {
            name: name.into(),
            restriction,
            basis,
            slot,
        });
        self
    }

    /// Run the one-time field-contract check.
    ///
    /// Verifies that every declared QFunction field is wired exactly once,
    /// that component counts and per-element extents agree across
    /// restriction and basis, and that there is exactly one active input
    /// and one active output. Idempotent; `apply` runs it lazily if the
    /// caller has not.
    pub fn finalize(&self) -> Result<(), QuadrilleError> {
        self.plan_ref().map(|_| ())
    }

    fn plan_ref(&self) -> Result<&Plan, QuadrilleError> {
        self.plan.get_or_try_init(|| self.build_plan())
    }

    fn build_plan(&self) -> Result<Plan, QuadrilleError> {
        let in_wiring = match_fields(self.qf.inputs(), &self.inputs)?;
        let out_wiring = match_fields(self.qf.outputs(), &self.outputs)?;

        let mut num_elem: Option<usize> = None;
        let mut q_per_elem: Option<usize> = None;
        let mut dim: Option<usize> = None;
        let mut active_inputs = 0usize;
        let mut active_outputs = 0usize;
        let mut x_len = 0usize;
        let mut y_len = 0usize;

        let declared = self
            .qf
            .inputs()
            .iter()
            .zip(in_wiring.iter().map(|&w| (&self.inputs[w], false)))
            .chain(
                self.qf
                    .outputs()
                    .iter()
                    .zip(out_wiring.iter().map(|&w| (&self.outputs[w], true))),
            );
        for (decl, (field, is_output)) in declared {
            check_extent(&mut q_per_elem, decl, field.basis.num_quadrature_points())?;
            check_extent(&mut dim, decl, field.basis.dim())?;
            if decl.eval_mode == EvalMode::Weight {
                if is_output {
                    return Err(QuadrilleError::UnsupportedEvalMode(EvalMode::Weight));
                }
                continue;
            }
            let restriction =
                field
                    .restriction
                    .as_ref()
                    .ok_or_else(|| QuadrilleError::MissingRestriction {
                        name: decl.name.clone(),
                    })?;
            if restriction.num_components() != decl.num_comp {
                return Err(QuadrilleError::FieldComponentMismatch {
                    name: decl.name.clone(),
                    declared: decl.num_comp,
                    provided: restriction.num_components(),
                });
            }
            if field.basis.num_nodes() != restriction.elem_size() {
                return Err(QuadrilleError::FieldSizeMismatch {
                    name: decl.name.clone(),
                    expected: restriction.elem_size(),
                    found: field.basis.num_nodes(),
                });
            }
            match num_elem {
                None => num_elem = Some(restriction.num_elements()),
                Some(expected) if expected != restriction.num_elements() => {
                    return Err(QuadrilleError::ElementCountMismatch {
                        name: decl.name.clone(),
                        expected,
                        found: restriction.num_elements(),
                    });
                }
                Some(_) => {}
            }
            match &field.slot {
                FieldSlot::Active => {
                    if is_output {
                        active_outputs += 1;
                        y_len = restriction.l_vector_len();
                    } else {
                        active_inputs += 1;
                        x_len = restriction.l_vector_len();
                    }
                }
                FieldSlot::Passive(vector) => {
                    check_passive_len(decl, restriction, vector)?;
                }
                FieldSlot::None => {
                    return Err(QuadrilleError::MissingField {
                        name: decl.name.clone(),
                    });
                }
            }
        }

        if active_inputs != 1 || active_outputs != 1 {
            return Err(QuadrilleError::ActiveFieldCount {
                inputs: active_inputs,
                outputs: active_outputs,
            });
        }
        // A lone weight input cannot anchor the element count, and the
        // active-output check above guarantees at least one restriction.
        let num_elem = num_elem.unwrap_or(0);
        let q_per_elem = q_per_elem.unwrap_or(0);
        let plan = Plan {
            num_elem,
            total_q: num_elem * q_per_elem,
            dim: dim.unwrap_or(0),
            x_len,
            y_len,
            in_wiring,
            out_wiring,
        };
        log::debug!(
            "finalized operator `{}`: {} elements, {} quadrature points",
            self.qf.name(),
            plan.num_elem,
            plan.total_q,
        );
        Ok(plan)
    }

    /// Apply the operator: zero the active output, then accumulate.
    pub fn apply(&self, x: &Vector<Scalar>, y: &Vector<Scalar>) -> Result<(), QuadrilleError> {
        let plan = self.plan_ref()?;
        check_active_len("active output", plan.y_len, y.len())?;
        y.set_value(0.0)?;
        self.apply_add(x, y)
    }

    /// Apply the operator, accumulating into the active output's existing
    /// contents.
    pub fn apply_add(&self, x: &Vector<Scalar>, y: &Vector<Scalar>) -> Result<(), QuadrilleError> {
        let plan = self.plan_ref()?;
        check_active_len("active input", plan.x_len, x.len())?;
        check_active_len("active output", plan.y_len, y.len())?;

        // Stage 1 and 2: gather and basis action per input field.
        let mut qin: Vec<Vec<Scalar>> = Vec::with_capacity(self.qf.inputs().len());
        for (decl, &w) in self.qf.inputs().iter().zip(&plan.in_wiring) {
            let field = &self.inputs[w];
            let mut qbuf = vec![0.0; plan.total_q * decl.q_size(plan.dim)];
            match decl.eval_mode {
                EvalMode::Weight => {
                    field.basis.apply(
                        plan.num_elem,
                        TransposeMode::NoTranspose,
                        EvalMode::Weight,
                        1,
                        &[],
                        &mut qbuf,
                    )?;
                }
                eval_mode => {
                    let restriction = field.restriction.as_ref().ok_or_else(|| {
                        QuadrilleError::MissingRestriction {
                            name: decl.name.clone(),
                        }
                    })?;
                    let source = match &field.slot {
                        FieldSlot::Active => x,
                        FieldSlot::Passive(vector) => vector,
                        FieldSlot::None => {
                            return Err(QuadrilleError::MissingField {
                                name: decl.name.clone(),
                            });
                        }
                    };
                    let evec = restriction.create_evector::<Scalar>();
                    restriction.apply(TransposeMode::NoTranspose, source, &evec)?;
                    let eview = evec.read(MemSpace::Host)?;
                    field.basis.apply(
                        plan.num_elem,
                        TransposeMode::NoTranspose,
                        eval_mode,
                        decl.num_comp,
                        &eview,
                        &mut qbuf,
                    )?;
                }
            }
            qin.push(qbuf);
        }

        // Stage 3: batched pointwise evaluation.
        let mut qout: Vec<Vec<Scalar>> = self
            .qf
            .outputs()
            .iter()
            .map(|decl| vec![0.0; plan.total_q * decl.q_size(plan.dim)])
            .collect();
        {
            let in_refs: Vec<&[Scalar]> = qin.iter().map(|b| b.as_slice()).collect();
            let mut out_refs: Vec<&mut [Scalar]> =
                qout.iter_mut().map(|b| b.as_mut_slice()).collect();
            self.qf.apply(plan.total_q, &in_refs, &mut out_refs)?;
        }

        // Stage 4: basis transpose and scatter-add per output field.
        for ((decl, &w), qbuf) in self.qf.outputs().iter().zip(&plan.out_wiring).zip(&qout) {
            let field = &self.outputs[w];
            let restriction = field.restriction.as_ref().ok_or_else(|| {
                QuadrilleError::MissingRestriction {
                    name: decl.name.clone(),
                }
            })?;
            let evec = restriction.create_evector::<Scalar>();
            {
                let mut eview = evec.write(MemSpace::Host)?;
                field.basis.apply(
                    plan.num_elem,
                    TransposeMode::Transpose,
                    decl.eval_mode,
                    decl.num_comp,
                    qbuf,
                    &mut eview,
                )?;
            }
            let destination = match &field.slot {
                FieldSlot::Active => y,
                FieldSlot::Passive(vector) => vector,
                FieldSlot::None => {
                    return Err(QuadrilleError::MissingField {
                        name: decl.name.clone(),
                    });
                }
            };
            restriction.apply(TransposeMode::Transpose, &evec, destination)?;
        }
        Ok(())
    }
}

/// Resolve each declared field to its wiring index by name, rejecting
/// unwired declarations and unmatched wirings.
fn match_fields(
    declared: &[QFunctionField],
    wired: &[OperatorField],
) -> Result<Vec<usize>, QuadrilleError> {
    let mut used = vec![false; wired.len()];
    let mut wiring = Vec::with_capacity(declared.len());
    for decl in declared {
        let index = wired
            .iter()
            .position(|field| field.name == decl.name)
            .ok_or_else(|| QuadrilleError::MissingField {
                name: decl.name.clone(),
            })?;
        used[index] = true;
        wiring.push(index);
    }
    if let Some(stray) = used.iter().position(|&u| !u) {
        return Err(QuadrilleError::UnknownField {
            name: wired[stray].name.clone(),
        });
    }
    Ok(wiring)
}

fn check_extent(
    established: &mut Option<usize>,
    decl: &QFunctionField,
    found: usize,
) -> Result<(), QuadrilleError> {
    match *established {
        None => {
            *established = Some(found);
            Ok(())
        }
        Some(expected) if expected != found => Err(QuadrilleError::FieldSizeMismatch {
            name: decl.name.clone(),
            expected,
            found,
        }),
        Some(_) => Ok(()),
    }
}

fn check_passive_len(
    decl: &QFunctionField,
    restriction: &ElemRestriction,
    vector: &Vector<Scalar>,
) -> Result<(), QuadrilleError> {
    if vector.len() != restriction.l_vector_len() {
        return Err(QuadrilleError::FieldSizeMismatch {
            name: decl.name.clone(),
            expected: restriction.l_vector_len(),
            found: vector.len(),
        });
    }
    Ok(())
}

fn check_active_len(
    role: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), QuadrilleError> {
    if expected != found {
        return Err(QuadrilleError::VectorSizeMismatch {
            role,
            expected,
            found,
        });
    }
    Ok(())
}
