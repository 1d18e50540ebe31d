#![cfg(feature = "memory")]

mod common;

use std::time::Duration;

use common::{served_by, staged_driver, wait_for_pool_size};
use sql_rw_router::memory::MemoryDriver;
use sql_rw_router::{RouterOptions, RwRouter, SqlRouterError};

#[tokio::test]
async fn open_without_descriptors_fails() {
    let res = RwRouter::open(MemoryDriver::new(), &[] as &[&str]).await;
    assert!(matches!(res, Err(SqlRouterError::NoDataSource)));
}

#[tokio::test]
async fn blank_descriptors_are_left_to_the_driver() -> Result<(), SqlRouterError> {
    let router = RwRouter::open(MemoryDriver::new(), &["primary", "  "]).await?;
    // the blank reader is still opening, so the writer serves
    assert_eq!(served_by(&router.query("SELECT 1", &[]).await?), "primary");

    wait_for_pool_size(&router, 2).await;
    assert_eq!(served_by(&router.query("SELECT 1", &[]).await?), "  ");

    let router = RwRouter::open(MemoryDriver::new(), &[""]).await?;
    assert_eq!(served_by(&router.query("SELECT 1", &[]).await?), "");
    Ok(())
}

#[tokio::test]
async fn blank_writer_fails_with_the_driver_error() {
    let driver = MemoryDriver::new().with_open_failure("");
    let err = RwRouter::open(driver, &["", "replicaA"]).await.unwrap_err();
    assert!(matches!(err, SqlRouterError::WriterOpenFailed(_)));
}

#[tokio::test]
async fn blank_reader_failure_does_not_abort_open() -> Result<(), SqlRouterError> {
    let driver = MemoryDriver::new().with_open_failure("  ");
    let router = RwRouter::open(driver, &["primary", "  "]).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(router.pool().size(), 1);
    assert_eq!(served_by(&router.query("SELECT 1", &[]).await?), "primary");
    Ok(())
}

#[tokio::test]
async fn writer_failure_is_fatal() {
    let driver = MemoryDriver::new().with_open_failure("primary");
    let err = RwRouter::open(driver, &["primary", "replicaA"])
        .await
        .unwrap_err();
    match err {
        SqlRouterError::WriterOpenFailed(source) => {
            assert!(matches!(*source, SqlRouterError::Driver(_)));
        }
        other => panic!("expected WriterOpenFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn readers_join_in_the_background_and_rotate() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = RwRouter::open(driver, &["primary", "replicaA", "replicaB"]).await?;

    // current-thread runtime: the reader tasks have not run yet
    assert_eq!(router.pool().size(), 1);

    wait_for_pool_size(&router, 3).await;
    assert!(router.is_sticky());
    assert!(!router.is_modified());

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(served_by(&router.query("SELECT 1", &[]).await?));
    }
    assert_eq!(order, ["replicaA", "replicaB", "replicaA"]);
    assert_eq!(stats.stats("primary").queries, 0);
    Ok(())
}

#[tokio::test]
async fn writer_only_router_serves_reads_from_the_writer() -> Result<(), SqlRouterError> {
    let router = RwRouter::open(MemoryDriver::new(), &["primary"]).await?;
    let set = router.query("SELECT 1", &[]).await?;
    assert_eq!(served_by(&set), "primary");
    Ok(())
}

#[tokio::test]
async fn unreachable_reader_is_left_out() -> Result<(), SqlRouterError> {
    let driver = MemoryDriver::new()
        .with_open_failure("replicaA")
        .with_open_delay("replicaB", Duration::from_millis(5));
    let router = RwRouter::open(driver, &["primary", "replicaA", "replicaB"]).await?;
    wait_for_pool_size(&router, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(router.pool().size(), 2);
    for _ in 0..4 {
        assert_eq!(served_by(&router.query("SELECT 1", &[]).await?), "replicaB");
    }
    Ok(())
}

#[tokio::test]
async fn builder_limits_reach_late_readers() -> Result<(), SqlRouterError> {
    let driver = staged_driver();
    let stats = driver.clone();
    let router = RwRouter::builder(driver, &["primary", "replicaA"])
        .max_open_conns(12)
        .conn_max_lifetime(Duration::from_secs(300))
        .open()
        .await?;
    wait_for_pool_size(&router, 2).await;

    for name in ["primary", "replicaA"] {
        let s = stats.stats(name);
        assert_eq!(s.max_open_conns, Some(12), "{name}");
        assert_eq!(s.conn_max_lifetime, Some(Some(Duration::from_secs(300))), "{name}");
        // never requested, so never pushed
        assert_eq!(s.max_idle_conns, None, "{name}");
    }
    Ok(())
}

#[tokio::test]
async fn options_struct_controls_stickiness() -> Result<(), SqlRouterError> {
    let opts = RouterOptions {
        sticky: false,
        ..Default::default()
    };
    let router = RwRouter::builder(MemoryDriver::new(), &["primary"])
        .options(opts)
        .open()
        .await?;
    assert!(!router.is_sticky());
    assert!(!router.new_handle().is_sticky());
    Ok(())
}

#[tokio::test]
async fn driver_is_shared_by_every_handle() -> Result<(), SqlRouterError> {
    use sql_rw_router::Driver;

    let router = RwRouter::open(MemoryDriver::new(), &["primary"]).await?;
    assert_eq!(router.driver().name(), "memory");
    assert_eq!(router.clone().driver().name(), "memory");
    Ok(())
}
