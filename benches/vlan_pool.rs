//! Benchmarks for VLAN leasing and switch reconciliation
//!
//! Target: lease/release well under 1µs; a 64-port batch across 4 switches
//! in the low milliseconds on the in-memory driver.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use haas_control_plane::domain::ports::SwitchDriverRef;
use haas_control_plane::{PortId, Reconciler, SwitchTopology, TestSwitch, VlanId, VlanPool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn bench_lease_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("vlan_pool");
    group.throughput(Throughput::Elements(1));

    let pool = VlanPool::from_spec("1-4094").unwrap();

    group.bench_function("lease_and_reclaim", |b| {
        b.iter(|| {
            let lease = pool.lease().unwrap();
            black_box(lease.vlan());
        });
    });

    group.bench_function("commit_and_release", |b| {
        b.iter(|| {
            let vlan = pool.lease().unwrap().commit();
            black_box(pool.release(vlan));
        });
    });

    group.finish();
}

fn bench_concurrent_leases(c: &mut Criterion) {
    let mut group = c.benchmark_group("vlan_pool");
    group.throughput(Throughput::Elements(100));

    let pool = VlanPool::from_spec("1-4094").unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_100_leases", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..100 {
                    let pool = pool.clone();
                    handles.push(tokio::spawn(async move {
                        let vlan = pool.lease().unwrap().commit();
                        pool.release(vlan);
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

fn bench_apply_networking(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    group.throughput(Throughput::Elements(64));

    let mut topology = SwitchTopology::new(Vec::<PortId>::new());
    for switch in 0..4 {
        topology = topology.with_switch(
            switch.to_string(),
            Arc::new(TestSwitch::new()) as SwitchDriverRef,
        );
    }
    let reconciler = Reconciler::new(Arc::new(topology), Duration::from_secs(5));
    let rt = tokio::runtime::Runtime::new().unwrap();

    let assign: BTreeMap<String, Option<VlanId>> = (0..64)
        .map(|i| {
            let vlan = VlanId::new(100 + (i % 8) as u16).unwrap();
            (format!("{}::{}", i % 4, i), Some(vlan))
        })
        .collect();
    let clear: BTreeMap<String, Option<VlanId>> =
        assign.keys().map(|port| (port.clone(), None)).collect();

    group.bench_function("assign_then_clear_64_ports", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(reconciler.apply_networking(&assign).await.unwrap());
                black_box(reconciler.apply_networking(&clear).await.unwrap());
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_lease_release,
    bench_concurrent_leases,
    bench_apply_networking,
);
criterion_main!(benches);
