//! Configuration wiring tests

use std::time::Duration;

use pledge_config::PledgeConfig;
use pledge_core::{Executor, WorkerPool};
use pledge_retry::RetryPolicy;
use pretty_assertions::assert_eq;

#[test]
fn config_file_drives_pool_and_retry_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[pool]
worker_threads = 2
thread_name = "suite-pool"

[retry]
max_retries = 4
initial_delay_ms = 50
"#,
    )
    .unwrap();

    let config = PledgeConfig::load_from(&path).unwrap();
    let pool = WorkerPool::from_config(&config.pool()).unwrap();
    assert_eq!(pool.name(), "suite-pool");

    let policy = RetryPolicy::from_config(&config.retry());
    assert_eq!(policy.max_retries, 4);
    assert_eq!(policy.initial_delay, Duration::from_millis(50));
    assert_eq!(policy.max_delay, Duration::from_secs(8));
    assert_eq!(config.wait().default_timeout(), None);
}
