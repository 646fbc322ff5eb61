//! Property tests over randomized ragged restrictions: the cached
//! extrema are exact, and a gather followed by a scatter-add reproduces
//! the multiplicity-weighted input at every global point.

use proptest::prelude::*;

use quadrille::prelude::*;

#[derive(Clone, Debug)]
struct Case {
    l_size: usize,
    counts: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<Scalar>,
}

fn case() -> impl Strategy<Value = Case> {
    (1usize..8, prop::collection::vec(0usize..5, 0..6)).prop_flat_map(|(l_size, counts)| {
        let total: usize = counts.iter().sum();
        (
            prop::collection::vec(0..l_size, total),
            prop::collection::vec(-100.0f64..100.0, l_size),
        )
            .prop_map(move |(indices, values)| Case {
                l_size,
                counts: counts.clone(),
                indices,
                values,
            })
    })
}

fn build(case: &Case) -> ElemRestriction {
    let mut offsets = vec![0usize];
    for &count in &case.counts {
        offsets.push(offsets[offsets.len() - 1] + count);
    }
    ElemRestriction::new_at_points(
        case.counts.len(),
        1,
        ComponentLayout::Interleaved,
        case.l_size,
        IndexSource::Own(offsets),
        IndexSource::Copy(&case.indices),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn cached_extrema_are_exact(case in case()) {
        let restriction = build(&case);
        let min = case.counts.iter().copied().min().unwrap_or(0);
        let max = case.counts.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(restriction.min_points_in_element().unwrap(), min);
        prop_assert_eq!(restriction.max_points_in_element().unwrap(), max);
        for &count in &case.counts {
            prop_assert!(min <= count && count <= max);
        }
    }

    #[test]
    fn gather_scatter_roundtrip_sums_contributions(case in case()) {
        let restriction = build(&case);
        let u = Vector::from_slice(&case.values);
        let e = restriction.create_evector::<Scalar>();
        let out = restriction.create_lvector::<Scalar>();
        restriction.apply(TransposeMode::NoTranspose, &u, &e).unwrap();
        restriction.apply(TransposeMode::Transpose, &e, &out).unwrap();

        let mut multiplicity = vec![0usize; case.l_size];
        for &g in &case.indices {
            multiplicity[g] += 1;
        }
        let out = out.read(MemSpace::Host).unwrap();
        for g in 0..case.l_size {
            let expected = multiplicity[g] as Scalar * case.values[g];
            let tolerance = 10.0 * EPSILON * (1.0 + expected.abs());
            prop_assert!(
                (out[g] - expected).abs() <= tolerance,
                "point {}: got {}, expected {}",
                g,
                out[g],
                expected
            );
        }
    }
}
