//! Benchmarks for weighted parameter averaging and the wire codec
//!
//! Run with: cargo bench --bench aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fedround::client::ClientResponse;
use fedround::core::{ClientId, Metrics};
use fedround::federated::{weighted_average, ClientContribution, FitRes};
use fedround::models::{CnnConfig, ModelConfig};
use fedround::params::{ParameterSet, Tensor};
use fedround::transport::WireCodec;

/// Contributions shaped like the default CNN, with distinct values per client
fn generate_contributions(clients: usize) -> Vec<ClientContribution> {
    let shapes = CnnConfig::default().parameter_shapes();
    (0..clients)
        .map(|c| {
            let tensors = shapes
                .iter()
                .map(|shape| {
                    let len: usize = shape.iter().product();
                    let data = (0..len).map(|i| ((i + c) % 17) as f32 * 0.01).collect();
                    Tensor::new(shape.clone(), data).unwrap()
                })
                .collect();
            ClientContribution {
                client_id: ClientId::new(&format!("client-{}", c)),
                parameters: ParameterSet::new(tensors),
                num_examples: 100 + c as u64,
                metrics: Metrics::new(),
            }
        })
        .collect()
}

/// Benchmark FedAvg over a growing cohort
fn bench_weighted_average(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_average");
    group.sample_size(20);

    for clients in [2, 8, 32].iter() {
        let contributions = generate_contributions(*clients);
        let elements = contributions[0].parameters.num_elements() * clients;

        group.throughput(Throughput::Elements(elements as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), clients, |b, _| {
            b.iter(|| weighted_average(black_box(&contributions)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark encoding and decoding one fit reply
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_codec");
    let codec = WireCodec::new();

    for model in [
        ModelConfig::Linear { n_features: 1_000 },
        ModelConfig::Cnn(CnnConfig::default()),
    ] {
        let parameters = model.initial_parameters(0).unwrap();
        let response = ClientResponse::Fit(FitRes {
            parameters,
            num_examples: 100,
            metrics: Metrics::new(),
        });

        group.bench_function(BenchmarkId::new("roundtrip", model.kind()), |b| {
            b.iter(|| {
                let frame = codec.encode(black_box(&response)).unwrap();
                let decoded: ClientResponse = codec.decode(&frame).unwrap();
                decoded
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_weighted_average, bench_codec);
criterion_main!(benches);
