//! End-to-end operator composition: gather, collocated basis, pointwise
//! kernel, scatter-add.

use std::sync::Arc;

use quadrille::prelude::*;
use quadrille::qfunction;

fn point_cloud_restriction() -> ElemRestriction {
    // 3 clusters over 6 points, each point owned by exactly one cluster.
    ElemRestriction::new_at_points(
        3,
        1,
        ComponentLayout::Interleaved,
        6,
        IndexSource::Copy(&[0, 2, 5, 6]),
        IndexSource::Copy(&[3, 4, 5, 0, 1, 2]),
    )
    .unwrap()
}

#[test]
fn meshfree_mass_through_registry() {
    let restriction = point_cloud_restriction();
    let max_points = restriction.max_points_in_element().unwrap();
    let basis: Arc<dyn Basis> = Arc::new(CollocatedBasis::new(max_points, 1));

    let rho = Vector::from_slice(&[2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let op = Operator::new(qfunction::by_name("Mass").unwrap())
        .input(
            "rho",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Passive(rho),
        )
        .input(
            "u",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Active,
        )
        .output("v", Some(restriction.clone()), basis, FieldSlot::Active);
    op.finalize().unwrap();

    let x = Vector::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let y = restriction.create_lvector::<Scalar>();
    op.apply(&x, &y).unwrap();

    // Every point appears in exactly one cluster, so y = rho .* x even
    // though the clusters are ragged and padded to max_points internally.
    let view = y.read(MemSpace::Host).unwrap();
    let expected = [2.0, 6.0, 12.0, 20.0, 30.0, 42.0];
    for (got, want) in view.iter().zip(expected) {
        assert!((got - want).abs() <= 10.0 * EPSILON, "got {got}, want {want}");
    }
}

/// Physical parameters for the scaled mass kernel below; the context is a
/// typed value, not a payload cast at the call site.
#[derive(Debug)]
struct ScaledMassContext {
    scale: Scalar,
}

fn scaled_mass(scale: Scalar) -> QFunction<ScaledMassContext> {
    fn kernel(
        ctx: &ScaledMassContext,
        q: usize,
        inputs: &[&[Scalar]],
        outputs: &mut [&mut [Scalar]],
    ) -> Result<(), QuadrilleError> {
        let (rho, u) = (inputs[0], inputs[1]);
        let v = &mut *outputs[0];
        for p in 0..q {
            v[p] = ctx.scale * rho[p] * u[p];
        }
        Ok(())
    }
    QFunction::new("ScaledMass", ScaledMassContext { scale }, kernel)
        .input("rho", 1, EvalMode::None)
        .and_then(|qf| qf.input("u", 1, EvalMode::Interp))
        .and_then(|qf| qf.output("v", 1, EvalMode::Interp))
        .unwrap()
}

#[test]
fn typed_context_kernel_with_shared_points() {
    // 2 elements x 2 nodes over 3 points; point 1 is shared.
    let restriction = ElemRestriction::new(
        2,
        2,
        1,
        ComponentLayout::Interleaved,
        3,
        IndexSource::Copy(&[0, 1, 1, 2]),
    )
    .unwrap();
    let basis: Arc<dyn Basis> = Arc::new(CollocatedBasis::new(2, 1));

    let rho = Vector::from_slice(&[1.0, 1.0, 1.0]);
    let op = Operator::new(Arc::new(scaled_mass(10.0)))
        .input(
            "rho",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Passive(rho),
        )
        .input(
            "u",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Active,
        )
        .output("v", Some(restriction), basis, FieldSlot::Active);

    let x = Vector::from_slice(&[1.0, 2.0, 3.0]);
    let y = Vector::<Scalar>::new(3);
    op.apply(&x, &y).unwrap();
    let view = y.read(MemSpace::Host).unwrap();
    // The shared point contributes from both elements: 10 * 2 * 2.
    assert_eq!(&*view, &[10.0, 40.0, 30.0]);
}

#[test]
fn wiring_errors_surface_at_finalize_not_apply() {
    let restriction = point_cloud_restriction();
    let max_points = restriction.max_points_in_element().unwrap();
    let basis: Arc<dyn Basis> = Arc::new(CollocatedBasis::new(max_points, 1));

    // Passive vector sized to the wrong extent.
    let rho = Vector::from_slice(&[1.0, 1.0]);
    let op = Operator::new(qfunction::by_name("Mass").unwrap())
        .input(
            "rho",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Passive(rho),
        )
        .input(
            "u",
            Some(restriction.clone()),
            Arc::clone(&basis),
            FieldSlot::Active,
        )
        .output("v", Some(restriction), basis, FieldSlot::Active);
    assert!(matches!(
        op.finalize().unwrap_err(),
        QuadrilleError::FieldSizeMismatch { .. }
    ));
}
