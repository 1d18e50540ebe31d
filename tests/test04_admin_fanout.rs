#![cfg(feature = "memory")]

mod common;

use std::time::Duration;

use common::{UPDATE_ONE, open_three, staged_driver};
use sql_rw_router::memory::MemoryDriver;
use sql_rw_router::{Context, RwRouter, SqlRouterError};

const DESCRIPTORS: [&str; 3] = ["primary", "replicaA", "replicaB"];

#[tokio::test]
async fn ping_reaches_every_connection() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = open_three(driver).await;

    router.ping().await?;
    for name in DESCRIPTORS {
        assert_eq!(stats.stats(name).pings, 1, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn failed_ping_still_waits_for_the_rest() {
    let driver = staged_driver().with_ping_failure("replicaA");
    let stats = driver.clone();
    let router = open_three(driver).await;

    let err = router.ping().await.unwrap_err();
    assert_eq!(err.to_string(), "ping to replicaA failed");
    for name in DESCRIPTORS {
        assert_eq!(stats.stats(name).pings, 1, "{name}");
    }
}

#[tokio::test]
async fn close_shuts_every_connection() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = open_three(driver).await;

    router.close().await?;
    for name in DESCRIPTORS {
        assert_eq!(stats.stats(name).closes, 1, "{name}");
    }

    let res = router.query("SELECT 1", &[]).await;
    assert!(matches!(res, Err(SqlRouterError::Driver(_))));
    let res = router.execute(UPDATE_ONE, &[]).await;
    assert!(matches!(res, Err(SqlRouterError::Driver(_))));
    Ok(())
}

#[tokio::test]
async fn close_failure_does_not_skip_other_connections() {
    let driver = staged_driver().with_close_failure("primary");
    let stats = driver.clone();
    let router = open_three(driver).await;

    assert!(router.close().await.is_err());
    for name in DESCRIPTORS {
        assert_eq!(stats.stats(name).closes, 1, "{name}");
    }
}

#[tokio::test]
async fn limit_setters_reach_current_and_future_connections() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = open_three(driver).await;

    router.set_max_idle_conns(4);
    router.set_max_open_conns(16);
    router.set_conn_max_lifetime(None);
    for name in DESCRIPTORS {
        let s = stats.stats(name);
        assert_eq!(s.max_idle_conns, Some(4), "{name}");
        assert_eq!(s.max_open_conns, Some(16), "{name}");
        assert_eq!(s.conn_max_lifetime, Some(None), "{name}");
    }

    // a sibling handle sets, a reader opened later inherits
    router.new_handle().set_max_open_conns(32);
    let index = router.open_reader("replicaC").await?;
    assert_eq!(index, 3);
    let s = stats.stats("replicaC");
    assert_eq!(s.max_idle_conns, Some(4));
    assert_eq!(s.max_open_conns, Some(32));
    assert_eq!(s.conn_max_lifetime, Some(None));
    Ok(())
}

#[tokio::test]
async fn begin_runs_on_the_writer() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = open_three(driver).await;

    let tx = router.begin().await?;
    assert_eq!(tx.descriptor(), "primary");
    tx.commit().await?;
    assert_eq!(stats.stats("primary").begins, 1);
    assert_eq!(stats.stats("replicaA").begins, 0);

    // a transaction alone does not mark the handle
    assert!(!router.is_modified());
    Ok(())
}

#[tokio::test]
async fn cancelled_context_is_passed_through() -> Result<(), SqlRouterError> {
    let router = open_three(staged_driver()).await;
    let ctx = Context::background();
    ctx.cancel();

    assert!(matches!(
        router.query_with(&ctx, "SELECT 1", &[]).await,
        Err(SqlRouterError::Cancelled)
    ));
    assert!(matches!(
        router.execute_with(&ctx, UPDATE_ONE, &[]).await,
        Err(SqlRouterError::Cancelled)
    ));
    assert!(matches!(router.ping_with(&ctx).await, Err(SqlRouterError::Cancelled)));
    assert!(!router.is_modified());
    Ok(())
}

#[tokio::test]
async fn deadline_bounds_a_slow_prepare() {
    let driver = MemoryDriver::new().with_prepare_delay("primary", Duration::from_millis(200));
    let router = RwRouter::open(driver, &["primary"]).await.unwrap();

    let ctx = Context::with_timeout(Duration::from_millis(10));
    let res = router.prepare_with(&ctx, "SELECT 1").await;
    assert!(matches!(res, Err(SqlRouterError::DeadlineExceeded)));
}

#[tokio::test]
async fn explicit_zero_idle_limit_reaches_late_readers() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = open_three(driver).await;

    router.open_reader("replicaC").await?;
    assert_eq!(stats.stats("replicaC").max_idle_conns, None);

    router.set_max_idle_conns(0);
    assert_eq!(stats.stats("primary").max_idle_conns, Some(0));
    router.open_reader("replicaD").await?;
    assert_eq!(stats.stats("replicaD").max_idle_conns, Some(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limit_setter_races_with_joining_readers() -> Result<(), SqlRouterError> {
    const READERS: usize = 32;
    let mut driver = MemoryDriver::new();
    for i in 0..READERS {
        driver = driver.with_open_delay(&format!("r{i}"), Duration::from_millis((i % 6) as u64));
    }
    let stats = driver.clone();
    let router = RwRouter::open(driver, &["primary"]).await?;

    let mut opens = tokio::task::JoinSet::new();
    for i in 0..READERS {
        let handle = router.new_handle();
        opens.spawn(async move { handle.open_reader(&format!("r{i}")).await });
    }

    let setter = router.new_handle();
    let sweeps = tokio::spawn(async move {
        for n in 1..=50 {
            setter.set_max_open_conns(n);
            tokio::task::yield_now().await;
        }
        setter.set_max_open_conns(99);
    });

    sweeps.await?;
    while let Some(joined) = opens.join_next().await {
        joined??;
    }

    assert_eq!(router.pool().size(), READERS + 1);
    assert_eq!(stats.stats("primary").max_open_conns, Some(99));
    for i in 0..READERS {
        let name = format!("r{i}");
        assert_eq!(stats.stats(&name).max_open_conns, Some(99), "{name}");
    }
    Ok(())
}
