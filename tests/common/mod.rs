#![allow(dead_code)]

use std::time::Duration;

use sql_rw_router::memory::{MemoryDriver, SERVER_COLUMN};
use sql_rw_router::{Driver, ResultSet, RowValues, RwRouter};

pub const UPDATE_ONE: &str = "UPDATE users SET name = 'x' WHERE id = 1";
pub const UPDATE_NONE: &str = "UPDATE users SET name = 'x' WHERE id = -1";

/// Memory driver whose replicas land in a fixed order: replicaA before replicaB.
pub fn staged_driver() -> MemoryDriver {
    MemoryDriver::new()
        .with_rows_affected(UPDATE_ONE, 1)
        .with_rows_affected(UPDATE_NONE, 0)
        .with_open_delay("replicaA", Duration::from_millis(5))
        .with_open_delay("replicaB", Duration::from_millis(30))
}

pub async fn wait_for_pool_size<D: Driver>(router: &RwRouter<D>, size: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while router.pool().size() < size {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("readers did not open in time");
}

pub fn served_by(set: &ResultSet) -> String {
    set.results[0]
        .get(SERVER_COLUMN)
        .and_then(RowValues::as_text)
        .expect("memory rows carry a server column")
        .to_string()
}

pub async fn open_three(driver: MemoryDriver) -> RwRouter<MemoryDriver> {
    let router = RwRouter::open(driver, &["primary", "replicaA", "replicaB"])
        .await
        .expect("writer opens");
    wait_for_pool_size(&router, 3).await;
    router
}
