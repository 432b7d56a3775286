use criterion::{criterion_group, BatchSize, Criterion};
use prometheus_client::registry::Registry;
use quay_queue::{
    ring::{Config, Ring},
    Message, Queue,
};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::num::NonZeroUsize;

/// Number of slots in the ring.
const RING_SIZE: usize = 4_096;

/// Size of each payload in bytes.
const PAYLOAD_SIZE: usize = 128;

/// Number of messages queued and taken in each iteration.
const MESSAGES: usize = 4_096;

fn payloads() -> Vec<Message<u64>> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..MESSAGES)
        .map(|_| {
            let mut payload = vec![0; PAYLOAD_SIZE];
            rng.fill_bytes(&mut payload);
            Message::new(payload)
        })
        .collect()
}

fn bench_ring_put_take(c: &mut Criterion) {
    let messages = payloads();
    c.bench_function(module_path!(), |b| {
        b.iter_batched(
            || {
                let mut registry = Registry::default();
                Ring::<u64>::init(
                    &mut registry,
                    Config {
                        ring_size: NonZeroUsize::new(RING_SIZE).unwrap(),
                        ephemeral: Default::default(),
                    },
                )
                .unwrap()
            },
            |queue| {
                for message in &messages {
                    queue.queue(message).unwrap();
                }
                while let Some(message) = queue.take().unwrap() {
                    queue.finish(&message).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_ring_put_take
}
