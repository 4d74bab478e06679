// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};
use std::convert::Infallible;
use tokio::runtime::Runtime;
use txstm::{atomically, Stm, TRef};

/// Uncontended commit of a single TRef read-modify-write.
fn bench_uncontended_commit(c: &mut Criterion) {
    c.bench_function("commit_uncontended", |b| {
        let cell: TRef<i64> = TRef::new(0);

        b.to_async(Runtime::new().expect("runtime")).iter(|| {
            let cell = cell.clone();
            atomically(move || -> Stm<Infallible, ()> {
                let cell = cell.clone();
                cell.update(|v| v + 1)
            })
        })
    });
}

/// A transfer between two TRefs, the shape spec.md §8 uses for its
/// atomicity property.
fn bench_transfer(c: &mut Criterion) {
    c.bench_function("commit_transfer", |b| {
        let a: TRef<i64> = TRef::new(1_000_000);
        let b_ref: TRef<i64> = TRef::new(0);

        b.to_async(Runtime::new().expect("runtime")).iter(|| {
            let (a, b_ref) = (a.clone(), b_ref.clone());
            atomically(move || -> Stm<Infallible, ()> {
                let (a, b) = (a.clone(), b_ref.clone());
                a.update(|v| v - 1).zip_right(b.update(|v| v + 1))
            })
        })
    });
}

/// A chain of 1,000 `flatMap`s, exercising the trampoline's steady-state
/// cost rather than its worst-case stack depth.
fn bench_flat_map_chain(c: &mut Criterion) {
    c.bench_function("commit_flat_map_chain", |b| {
        b.to_async(Runtime::new().expect("runtime")).iter(|| {
            atomically(|| {
                let mut program: Stm<Infallible, i64> = Stm::succeed(0);
                for _ in 0..1_000 {
                    program = program.flat_map(|n| Stm::succeed(n + 1));
                }
                program
            })
        })
    });
}

criterion_group!(benches, bench_uncontended_commit, bench_transfer, bench_flat_map_chain);
criterion_main!(benches);
