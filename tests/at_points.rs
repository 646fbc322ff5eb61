//! Conformance tests for the at-points restriction: creation, per-element
//! transpose application, and release of a ragged restriction whose
//! elements draw a varying number of shared points from a small cloud.

use quadrille::prelude::*;

/// Element `i` of `num_elem` owns `((i + 1) % num_elem) + 1` points, drawn
/// cyclically from the cloud starting at point index `num_elem`.
fn cyclic_layout(num_elem: usize) -> (Vec<usize>, Vec<usize>) {
    let num_points = num_elem * 2;
    let mut offsets = vec![0usize; num_elem + 1];
    let mut indices = Vec::new();
    let mut point_index = num_elem;
    for i in 0..num_elem {
        let points_in_elem = (i + 1) % num_elem + 1;
        for _ in 0..points_in_elem {
            indices.push(point_index);
            point_index = (point_index + 1) % num_points;
        }
        offsets[i + 1] = offsets[i] + points_in_elem;
    }
    (offsets, indices)
}

#[test]
fn min_max_points_cached_at_creation() {
    let num_elem = 3;
    let (offsets, indices) = cyclic_layout(num_elem);
    let restriction = ElemRestriction::new_at_points(
        num_elem,
        1,
        ComponentLayout::Interleaved,
        num_elem * 2,
        IndexSource::Copy(&offsets),
        IndexSource::Copy(&indices),
    )
    .unwrap();
    assert_eq!(restriction.min_points_in_element().unwrap(), 1);
    assert_eq!(restriction.max_points_in_element().unwrap(), num_elem);
}

#[test]
fn transpose_apply_in_single_elements() {
    let num_elem = 3;
    let num_points = num_elem * 2;
    let (offsets, indices) = cyclic_layout(num_elem);
    let restriction = ElemRestriction::new_at_points(
        num_elem,
        1,
        ComponentLayout::Interleaved,
        num_points,
        IndexSource::Copy(&offsets),
        IndexSource::Copy(&indices),
    )
    .unwrap();

    let x = restriction.create_lvector::<Scalar>();
    let max_points = restriction.max_points_in_element().unwrap();
    let y = Vector::<Scalar>::new(max_points);
    y.set_value(1.0).unwrap();

    for i in 0..num_elem {
        x.set_value(0.0).unwrap();
        restriction
            .apply_at_points_in_element(i, TransposeMode::Transpose, &y, &x)
            .unwrap();

        let read = x.read(MemSpace::Host).unwrap();
        let mut point_index = num_elem;
        for j in 0..num_elem {
            let points_in_elem = (j + 1) % num_elem + 1;
            for _ in 0..points_in_elem {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (read[point_index] - expected).abs() <= 10.0 * EPSILON,
                    "element {i}: restricted value x[{point_index}] = {}",
                    read[point_index]
                );
                point_index = (point_index + 1) % num_points;
            }
        }
    }
}

#[test]
fn create_vector_matches_global_extent() {
    let num_elem = 3;
    let (offsets, indices) = cyclic_layout(num_elem);
    let restriction = ElemRestriction::new_at_points(
        num_elem,
        1,
        ComponentLayout::Interleaved,
        num_elem * 2,
        IndexSource::Copy(&offsets),
        IndexSource::Copy(&indices),
    )
    .unwrap();
    assert_eq!(restriction.create_lvector::<Scalar>().len(), num_elem * 2);
    assert_eq!(
        restriction.create_evector::<Scalar>().len(),
        num_elem * restriction.max_points_in_element().unwrap()
    );
}

#[test]
fn handles_share_and_release_index_storage() {
    let num_elem = 3;
    let (offsets, indices) = cyclic_layout(num_elem);
    let first = ElemRestriction::new_at_points(
        num_elem,
        1,
        ComponentLayout::Interleaved,
        num_elem * 2,
        IndexSource::Own(offsets),
        IndexSource::Own(indices),
    )
    .unwrap();
    let second = first.clone();
    drop(first);
    // The second handle still works after the first is released.
    assert_eq!(second.num_points(), 6);
    assert_eq!(second.min_points_in_element().unwrap(), 1);
}
