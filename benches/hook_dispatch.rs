//! Hook Dispatch Benchmarks
//!
//! Run with: cargo bench --bench hook_dispatch

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio::runtime::Runtime;

use clusterplug::cluster::{Cluster, ClusterKey, PluginReference};
use clusterplug::context::ReconcileContext;
use clusterplug::controller::ClusterReconciler;
use clusterplug::hooks::{HookResponse, HookResult};
use clusterplug::plugins::{load_plugin_client, InProcessConnector, PluginDescriptor, ReconcilerHooks};
use clusterplug::store::MemoryStore;

struct Fixed {
    name: String,
    delay_secs: u64,
}

#[async_trait::async_trait]
impl ReconcilerHooks for Fixed {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(self.name.clone(), "1.0.0")
    }

    async fn pre_reconcile(
        &self,
        _cluster: &Cluster,
        _parameters: &std::collections::BTreeMap<String, String>,
    ) -> clusterplug::error::Result<HookResponse> {
        Ok(HookResponse::requeue_after(Duration::from_secs(self.delay_secs)))
    }
}

fn setup(n: usize) -> (InProcessConnector, Cluster) {
    let mut connector = InProcessConnector::new();
    let mut references = Vec::with_capacity(n);
    for i in 0..n {
        let name = format!("plugin-{}", i);
        connector
            .register(Arc::new(Fixed {
                name: name.clone(),
                delay_secs: (n - i) as u64,
            }))
            .unwrap();
        references.push(PluginReference::new(name));
    }
    (connector, Cluster::new(&ClusterKey::new("bench", "pg"), references))
}

fn benchmark_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("hook_result");
    group.throughput(Throughput::Elements(100));

    let responses: Vec<HookResponse> = (1..=100)
        .map(|i| HookResponse::requeue_after(Duration::from_secs(i)))
        .collect();

    group.bench_function("absorb_100", |b| {
        b.iter(|| {
            let mut result = HookResult::noop();
            for response in &responses {
                result.absorb(black_box(response));
            }
            result.into_decision().unwrap()
        });
    });

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("pre_reconcile_dispatch");

    for n in [1usize, 8, 32] {
        let (connector, cluster) = setup(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("{}_plugins", n), |b| {
            b.to_async(&rt).iter(|| async {
                let ctx = ReconcileContext::new();
                let mut client = load_plugin_client(&ctx, &connector, &cluster).await.unwrap();
                let result = client.pre_reconcile(&ctx, black_box(&cluster)).await;
                client.close().await;
                result.into_decision().unwrap()
            });
        });
    }

    group.finish();
}

fn benchmark_status_refresh(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (connector, cluster) = setup(8);
    let store = Arc::new(MemoryStore::new());
    rt.block_on(store.put(cluster.clone()));
    let reconciler = ClusterReconciler::new(Arc::new(connector), store);

    c.bench_function("update_plugins_status", |b| {
        b.to_async(&rt).iter(|| async {
            let ctx = ReconcileContext::new();
            let mut cluster = cluster.clone();
            cluster.status.plugin_status = Vec::new();
            reconciler.update_plugins_status(&ctx, &mut cluster).await.unwrap()
        });
    });
}

criterion_group!(benches, benchmark_merge, benchmark_dispatch, benchmark_status_refresh);
criterion_main!(benches);
