//! Redis integration tests
//!
//! These tests start a Redis container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p lock-manager --test redis_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use lock_manager::{LockError, LockManager, LockOptions, RedisLockManager};
use serial_test::serial;
use testcontainers::{
    ContainerAsync, GenericImage,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<GenericImage>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = GenericImage::new("redis", "7-alpine")
                .with_exposed_port(6379.tcp())
                .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
                .start()
                .await
                .unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("redis://{}:{}", host, port),
            })
        })
        .await
        .clone()
}

async fn get_manager() -> RedisLockManager {
    let info = get_container_info().await;
    RedisLockManager::connect(&info.url)
        .await
        .unwrap()
        .with_key_prefix(format!("test:{}:", AggregateId::generate()))
}

fn fast_options() -> LockOptions {
    LockOptions {
        ttl: Duration::from_secs(30),
        max_attempts: 3,
        retry_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn lock_is_exclusive_until_unlocked() {
    let manager = get_manager().await;
    let id = AggregateId::generate();

    manager.lock(&id, &fast_options()).await.unwrap();

    let second = manager.lock(&id, &fast_options()).await;
    assert!(matches!(second, Err(LockError::Contended { attempts: 3, .. })));

    manager.unlock(&id).await.unwrap();
    manager.lock(&id, &fast_options()).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn lease_expires_after_ttl() {
    let manager = get_manager().await;
    let id = AggregateId::generate();

    assert!(manager.try_lock(&id, Duration::from_secs(1)).await.unwrap());
    assert!(!manager.try_lock(&id, Duration::from_secs(1)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(manager.try_lock(&id, Duration::from_secs(1)).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn sub_second_lease_is_not_rounded_up() {
    let manager = get_manager().await;
    let id = AggregateId::generate();

    assert!(manager.try_lock(&id, Duration::from_millis(200)).await.unwrap());
    assert!(!manager.try_lock(&id, Duration::from_millis(200)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manager.try_lock(&id, Duration::from_millis(200)).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires a Docker daemon for testcontainers"]
async fn unlock_without_lease_succeeds() {
    let manager = get_manager().await;
    manager.unlock(&AggregateId::generate()).await.unwrap();
}
