use {
    criterion::{black_box, criterion_group, criterion_main, Benchmark, Criterion},
    fully_compressible::{
        atmosphere::AtmosphereParameters,
        bvp::structure_bvp,
        domain::Chebyshev,
        newton::NewtonSettings,
        statistics::{ProfileSet, ScalarSet},
    },
    std::f64::consts::PI,
};

fn statistics(nz: usize) -> (ProfileSet, ScalarSet) {
    let column = Chebyshev::new(nz, (0.0, 1.0)).unwrap();

    let mut profiles = ProfileSet::new();
    profiles.insert("UdotGradw", column.profile(|z| 0.05 * (PI * z).sin()));
    profiles.insert("T1", column.profile(|z| 0.02 * z * (1.0 - z)));

    let mut scalars = ScalarSet::new();
    scalars.insert("Nu", 2.0);
    scalars.insert("s_over_cp_z", -0.5);

    (profiles, scalars)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for &(nz, samples) in &[(32, 20), (64, 10)] {
        c.bench(
            "bvp",
            Benchmark::new(format!("nz{}", nz), move |b| {
                let (profiles, scalars) = statistics(nz);
                let atmosphere = AtmosphereParameters::default();

                b.iter(|| {
                    structure_bvp(
                        black_box(&atmosphere),
                        black_box(&profiles),
                        black_box(&scalars),
                        NewtonSettings::default(),
                    )
                    .unwrap()
                })
            })
            .sample_size(samples),
        );
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
