use criterion::{criterion_group, criterion_main, Criterion};

use quadrille::prelude::*;

fn hex_mesh_restriction(num_elem: usize, nodes_per_elem: usize) -> ElemRestriction {
    // Overlapping bands of global points, so neighbouring elements share
    // indices the way mesh cells share nodes.
    let l_size = num_elem + nodes_per_elem;
    let indices: Vec<usize> = (0..num_elem)
        .flat_map(|e| (0..nodes_per_elem).map(move |j| e + j))
        .collect();
    ElemRestriction::new(
        num_elem,
        nodes_per_elem,
        1,
        ComponentLayout::Interleaved,
        l_size,
        IndexSource::Own(indices),
    )
    .unwrap()
}

fn bench_gather(c: &mut Criterion) {
    let restriction = hex_mesh_restriction(4096, 8);
    let u = restriction.create_lvector::<Scalar>();
    u.set_value(1.0).unwrap();
    let v = restriction.create_evector::<Scalar>();
    c.bench_function("gather 4096x8", |b| {
        b.iter(|| restriction.apply(TransposeMode::NoTranspose, &u, &v).unwrap())
    });
}

fn bench_scatter_add(c: &mut Criterion) {
    let restriction = hex_mesh_restriction(4096, 8);
    let e = restriction.create_evector::<Scalar>();
    e.set_value(1.0).unwrap();
    let l = restriction.create_lvector::<Scalar>();
    c.bench_function("scatter-add 4096x8", |b| {
        b.iter(|| restriction.apply(TransposeMode::Transpose, &e, &l).unwrap())
    });
}

criterion_group!(benches, bench_gather, bench_scatter_add);
criterion_main!(benches);
