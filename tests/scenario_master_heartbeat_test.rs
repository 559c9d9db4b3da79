// tests/scenario_master_heartbeat_test.rs

//! Black-box coverage of the single-machine heartbeat cycle: the lone
//! master-eligible machine in a cluster claims the master lease on its
//! first heartbeat and produces a checkpoint once the configured interval
//! has elapsed.

use locusd::config::Config;
use locusd::core::clock::TestClock;
use locusd::core::election::Role;
use locusd::core::state::ServerState;
use std::time::Duration as StdDuration;

fn test_config(data_dir: &str) -> Config {
    let mut config = Config::default();
    config.data_dir = data_dir.to_string();
    config.machine_location = "127.0.0.1:7200".to_string();
    config.create_checkpoint_interval = StdDuration::from_secs(1);
    config
}

#[tokio::test]
async fn lone_machine_becomes_master_and_checkpoints_on_heartbeat() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_str().unwrap());
    let clock = TestClock::new(chrono::Utc::now());
    let state = ServerState::initialize_with_clock(config, clock.clone()).await.unwrap();

    assert_eq!(state.elector.role(), Role::Unassigned);

    state.heartbeat().await.unwrap();
    assert_eq!(state.elector.role(), Role::Master);

    clock.advance(chrono::Duration::seconds(2));
    state.heartbeat().await.unwrap();
    assert_eq!(state.elector.role(), Role::Master);
}

#[tokio::test]
async fn non_eligible_machine_never_claims_the_master_role() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path().to_str().unwrap());
    config.is_master_eligible = false;
    let state = ServerState::initialize(config).await.unwrap();

    state.heartbeat().await.unwrap();
    assert_ne!(state.elector.role(), Role::Master);
}
