//! Reference pointwise kernels.
//!
//! These are the stock QFunctions seeded into the by-name registry: the
//! mass pipeline (geometry setup plus apply) and the Poisson geometry
//! build / apply pair. They double as examples of the field contract:
//! every kernel is a plain function over point-major slices with no state
//! beyond its typed context.
//!
//! Jacobian fields are row-major per point: the 2D `dx` slice for point
//! `p` is `[J00, J01, J10, J11]`, and 3D likewise with nine entries.

use std::sync::Arc;

use dashmap::DashMap;

use super::{EvalMode, PointwiseQFunction, QFunction};
use crate::Scalar;
use crate::error::QuadrilleError;

/// Build the geometric factor for a 2D mass operator:
/// `rho[p] = weight[p] * det(J[p])`.
pub fn mass_setup_2d() -> QFunction<()> {
    fn kernel(
        _: &(),
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        let (weight, dx) = (inputs[0], inputs[1]);
        let rho = &mut *outputs[0];
        for p in 0..q {
            let j = &dx[p * 4..(p + 1) * 4];
            rho[p] = weight[p] * (j[0] * j[3] - j[1] * j[2]);
        }
        Ok(())
    }
    QFunction::new("MassSetup2D", (), kernel)
        .input("weight", 1, EvalMode::Weight)
        .and_then(|qf| qf.input("dx", 4, EvalMode::Grad))
        .and_then(|qf| qf.output("rho", 1, EvalMode::None))
        .expect("gallery kernel stays within the field limit")
}

/// Apply a mass operator: `v[p] = rho[p] * u[p]`.
pub fn mass() -> QFunction<()> {
    fn kernel(
        _: &(),
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        let (rho, u) = (inputs[0], inputs[1]);
        let v = &mut *outputs[0];
        for p in 0..q {
            v[p] = rho[p] * u[p];
        }
        Ok(())
    }
    QFunction::new("Mass", (), kernel)
        .input("rho", 1, EvalMode::None)
        .and_then(|qf| qf.input("u", 1, EvalMode::Interp))
        .and_then(|qf| qf.output("v", 1, EvalMode::Interp))
        .expect("gallery kernel stays within the field limit")
}

/// Build the geometric data for a 3D Poisson operator.
///
/// Produces, per point, the six upper-triangle entries (row-wise:
/// `A00, A01, A02, A11, A12, A22`) of
/// `A = weight * det(J) * J^{-1} J^{-T}`, computed through the adjugate so
/// only one division by `det(J)` is needed.
pub fn poisson3d_build() -> QFunction<()> {
    fn kernel(
        _: &(),
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        let (dx, weight) = (inputs[0], inputs[1]);
        let qdata = &mut *outputs[0];
        for p in 0..q {
            let j = &dx[p * 9..(p + 1) * 9];
            // Adjugate of the row-major 3x3 Jacobian.
            let b = [
                j[4] * j[8] - j[5] * j[7],
                j[2] * j[7] - j[1] * j[8],
                j[1] * j[5] - j[2] * j[4],
                j[5] * j[6] - j[3] * j[8],
                j[0] * j[8] - j[2] * j[6],
                j[2] * j[3] - j[0] * j[5],
                j[3] * j[7] - j[4] * j[6],
                j[1] * j[6] - j[0] * j[7],
                j[0] * j[4] - j[1] * j[3],
            ];
            let det = j[0] * b[0] + j[1] * b[3] + j[2] * b[6];
            let scale = weight[p] / det;
            let qd = &mut qdata[p * 6..(p + 1) * 6];
            let mut slot = 0;
            for r in 0..3 {
                for c in r..3 {
                    qd[slot] = scale
                        * (b[r * 3] * b[c * 3] + b[r * 3 + 1] * b[c * 3 + 1]
                            + b[r * 3 + 2] * b[c * 3 + 2]);
                    slot += 1;
                }
            }
        }
        Ok(())
    }
    QFunction::new("Poisson3DBuild", (), kernel)
        .input("dx", 9, EvalMode::Grad)
        .and_then(|qf| qf.input("weight", 1, EvalMode::Weight))
        .and_then(|qf| qf.output("qdata", 6, EvalMode::None))
        .expect("gallery kernel stays within the field limit")
}

/// Apply the 1D Poisson operator on a three-component vector system:
/// `dv[p][c] = qdata[p] * du[p][c]`.
pub fn vector3_poisson_1d_apply() -> QFunction<()> {
    fn kernel(
        _: &(),
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        let (du, qdata) = (inputs[0], inputs[1]);
        let dv = &mut *outputs[0];
        for p in 0..q {
            for c in 0..3 {
                dv[p * 3 + c] = qdata[p] * du[p * 3 + c];
            }
        }
        Ok(())
    }
    QFunction::new("Vector3Poisson1DApply", (), kernel)
        .input("du", 3, EvalMode::Grad)
        .and_then(|qf| qf.input("qdata", 1, EvalMode::None))
        .and_then(|qf| qf.output("dv", 3, EvalMode::Grad))
        .expect("gallery kernel stays within the field limit")
}

/// Seed `map` with every gallery kernel under its registered name.
pub(crate) fn register_all(map: &DashMap<String, Arc<dyn PointwiseQFunction>>) {
    let kernels: [Arc<dyn PointwiseQFunction>; 4] = [
        Arc::new(mass()),
        Arc::new(mass_setup_2d()),
        Arc::new(poisson3d_build()),
        Arc::new(vector3_poisson_1d_apply()),
    ];
    for qf in kernels {
        map.insert(qf.name().to_owned(), qf);
    }
}
