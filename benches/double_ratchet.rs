use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand_core::OsRng;
use relay_ratchet::config::{BundleConfig, KdfParams, RatchetConfig};
use relay_ratchet::crypto::derive_password_key;
use relay_ratchet::keys::IdentityKeyPair;
use relay_ratchet::ratchet::RatchetState;
use relay_ratchet::x3dh::{initiate, respond};
use relay_ratchet::KeyBundleManager;

fn setup_ratchet() -> (RatchetState, RatchetState) {
    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let (mut bob_keys, bundle) =
        KeyBundleManager::initialize(&mut OsRng, &BundleConfig::default()).unwrap();

    let alice_x3dh = initiate(&mut OsRng, &alice_identity, &bundle).unwrap();
    let bob_x3dh = respond(&mut bob_keys, &alice_x3dh.handshake, alice_identity.public_key()).unwrap();

    let alice = RatchetState::seed(
        &mut OsRng,
        &alice_x3dh.master_secret,
        alice_x3dh.role,
        alice_x3dh.associated_data,
        RatchetConfig::default(),
    )
    .unwrap();
    let bob = RatchetState::seed(
        &mut OsRng,
        &bob_x3dh.master_secret,
        bob_x3dh.role,
        bob_x3dh.associated_data,
        RatchetConfig::default(),
    )
    .unwrap();

    (alice, bob)
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    for size in [128usize, 1024, 4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &size, |b, &size| {
            let (mut alice, _) = setup_ratchet();
            let message = vec![0u8; size];

            b.iter(|| black_box(alice.encrypt(&mut OsRng, &message).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decrypt", size), &size, |b, &size| {
            let message = vec![0u8; size];

            b.iter_batched(
                || {
                    let (mut alice, bob) = setup_ratchet();
                    let envelope = alice.encrypt(&mut OsRng, &message).unwrap();
                    (bob, envelope)
                },
                |(mut bob, envelope)| black_box(bob.decrypt(&mut OsRng, &envelope).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_message_sequence(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_sequence");

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::new("messages", count), &count, |b, &count| {
            b.iter(|| {
                let (mut alice, mut bob) = setup_ratchet();
                let message = vec![0u8; 256];

                for _ in 0..count {
                    let envelope = alice.encrypt(&mut OsRng, &message).unwrap();
                    bob.decrypt(&mut OsRng, &envelope).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_bidirectional(c: &mut Criterion) {
    let mut group = c.benchmark_group("bidirectional");

    group.bench_function("ping_pong_10", |b| {
        b.iter(|| {
            let (mut alice, mut bob) = setup_ratchet();
            let message = vec![0u8; 256];

            for _ in 0..5 {
                let envelope = alice.encrypt(&mut OsRng, &message).unwrap();
                bob.decrypt(&mut OsRng, &envelope).unwrap();

                let envelope = bob.encrypt(&mut OsRng, &message).unwrap();
                alice.decrypt(&mut OsRng, &envelope).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_out_of_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_order");

    group.bench_function("skip_5_messages", |b| {
        b.iter(|| {
            let (mut alice, mut bob) = setup_ratchet();
            let message = vec![0u8; 256];

            let envelopes: Vec<_> = (0..6)
                .map(|_| alice.encrypt(&mut OsRng, &message).unwrap())
                .collect();

            // Deliver 5 first, then 0..4 from the skipped cache
            bob.decrypt(&mut OsRng, &envelopes[5]).unwrap();
            for envelope in envelopes.iter().take(5) {
                bob.decrypt(&mut OsRng, envelope).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_storage_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_kdf");
    group.sample_size(10);

    let params = KdfParams::default();
    group.bench_function("argon2id_default", |b| {
        b.iter(|| black_box(derive_password_key(b"user secret", &[0u8; 16], &params).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_throughput,
    bench_message_sequence,
    bench_bidirectional,
    bench_out_of_order,
    bench_storage_key_derivation
);

criterion_main!(benches);
