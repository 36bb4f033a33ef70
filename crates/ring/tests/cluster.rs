//! Loopback integration of the tcp ring.

use gridmesh_api::builder::Builder;
use gridmesh_api::config::Config;
use gridmesh_api::discovery::DynDiscovery;
use gridmesh_api::*;
use gridmesh_core::factories::*;
use gridmesh_ring::TcpRingFactory;
use gridmesh_test_utils::enable_tracing;
use std::sync::Arc;
use std::time::Duration;

fn builder(seeds: Vec<String>, join_timeout_ms: u32) -> Arc<Builder> {
    // short intervals keep these loopback tests fast
    let config: Config = serde_json::from_value(serde_json::json!({
        "tcpRing": {
            "tcpRing": {
                "seedAddrs": seeds,
                "heartbeatIntervalMs": 100,
                "connectTimeoutMs": 500,
                "joinTimeoutMs": join_timeout_ms,
            },
        },
    }))
    .unwrap();

    let builder = Builder {
        config,
        affinity_mapper: IdentAffinityMapperFactory::create(),
        affinity: PartitionedAffinityFactory::create(),
        discovery: TcpRingFactory::create(),
        load_balancer: RoundRobinBalancerFactory::create(),
    };
    builder.validate_config().unwrap();
    builder.build()
}

async fn spawn_member(seeds: Vec<String>) -> DynDiscovery {
    let builder = builder(seeds, 10_000);
    builder
        .discovery
        .create(builder.clone(), NodeInfo::new(NodeId::new()))
        .await
        .unwrap()
}

async fn await_members(discovery: &DynDiscovery, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if discovery.topology().len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {count} members, have {:?}",
            discovery.topology(),
        )
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn solo_bootstrap() {
    enable_tracing();

    let d1 = spawn_member(vec![]).await;
    let topo = d1.join().await.unwrap();

    assert_eq!(1, topo.version());
    assert_eq!(1, topo.len());
    assert!(topo.contains(&d1.local_node().id));
    assert_eq!(1, d1.local_node().order);
}

#[tokio::test(flavor = "multi_thread")]
async fn three_members_converge() {
    enable_tracing();

    let d1 = spawn_member(vec![]).await;
    d1.join().await.unwrap();
    let seed = d1.local_node().addr.unwrap().to_string();

    let d2 = spawn_member(vec![seed.clone()]).await;
    let t2 = d2.join().await.unwrap();
    assert!(t2.contains(&d2.local_node().id));

    let d3 = spawn_member(vec![seed]).await;
    d3.join().await.unwrap();

    for d in [&d1, &d2, &d3] {
        await_members(d, 3).await;
    }

    // every member converged on the same snapshot
    assert_eq!(d1.topology(), d2.topology());
    assert_eq!(d1.topology(), d3.topology());
    assert_eq!(
        vec![1, 2, 3],
        d1.topology()
            .nodes()
            .iter()
            .map(|n| n.order)
            .collect::<Vec<_>>(),
    );
    assert_eq!(Some(d2.local_node()), d1.node(&d2.local_node().id));
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriber_sees_current_then_changes() {
    enable_tracing();

    let d1 = spawn_member(vec![]).await;
    d1.join().await.unwrap();

    let (send, mut recv) = tokio::sync::mpsc::unbounded_channel();
    d1.subscribe(Arc::new(move |topo: Arc<Topology>| {
        let _ = send.send(topo);
    }));

    // invoked immediately with the current snapshot
    let first = recv.recv().await.unwrap();
    assert_eq!(1, first.version());

    let seed = d1.local_node().addr.unwrap().to_string();
    let d2 = spawn_member(vec![seed]).await;
    d2.join().await.unwrap();

    // then again as membership changes, versions increasing
    let next = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let topo = recv.recv().await.unwrap();
            assert!(topo.version() > first.version());
            if topo.len() == 2 {
                return topo;
            }
        }
    })
    .await
    .unwrap();
    assert!(next.contains(&d2.local_node().id));
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_leave_shrinks_topology() {
    enable_tracing();

    let d1 = spawn_member(vec![]).await;
    d1.join().await.unwrap();
    let seed = d1.local_node().addr.unwrap().to_string();

    let d2 = spawn_member(vec![seed.clone()]).await;
    d2.join().await.unwrap();
    let d3 = spawn_member(vec![seed]).await;
    d3.join().await.unwrap();
    for d in [&d1, &d2, &d3] {
        await_members(d, 3).await;
    }

    let left = d3.local_node().id;
    d3.leave().await.unwrap();
    drop(d3);

    await_members(&d1, 2).await;
    await_members(&d2, 2).await;
    assert!(!d1.topology().contains(&left));
    assert_eq!(d1.topology(), d2.topology());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_member_evicted() {
    enable_tracing();

    let d1 = spawn_member(vec![]).await;
    d1.join().await.unwrap();
    let seed = d1.local_node().addr.unwrap().to_string();

    let d2 = spawn_member(vec![seed.clone()]).await;
    d2.join().await.unwrap();
    let d3 = spawn_member(vec![seed]).await;
    d3.join().await.unwrap();
    for d in [&d1, &d2, &d3] {
        await_members(d, 3).await;
    }

    // kill the third member without a leave announcement
    let failed = d3.local_node().id;
    drop(d3);

    // heartbeat delivery to the dead member fails, the probe fails,
    // and the ring evicts it
    await_members(&d1, 2).await;
    await_members(&d2, 2).await;
    assert!(!d1.topology().contains(&failed));
    assert_eq!(d1.topology().version(), d2.topology().version());
}

#[tokio::test(flavor = "multi_thread")]
async fn join_times_out_without_reachable_seed() {
    enable_tracing();

    // a port nothing listens on
    let d1 = {
        let builder = builder(vec!["127.0.0.1:9".into()], 700);
        builder
            .discovery
            .create(builder.clone(), NodeInfo::new(NodeId::new()))
            .await
            .unwrap()
    };

    let err = d1.join().await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
}
