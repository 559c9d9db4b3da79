// tests/scenario_pin_ttl_test.rs

//! Black-box coverage of the pin positive-answer cache: a content hash
//! pinned once keeps answering "present" from cache for up to
//! `content_hash_bump_time` even after every machine has dropped it, and
//! observes the removal on the first pin once the cache entry expires.

use bytes::Bytes;
use chrono::Duration;
use locusd::config::Config;
use locusd::core::clock::TestClock;
use locusd::core::hash::{ContentHash, HashType};
use locusd::core::state::ServerState;
use std::time::Duration as StdDuration;

fn test_config(data_dir: &str) -> Config {
    let mut config = Config::default();
    config.data_dir = data_dir.to_string();
    config.content_hash_bump_time = StdDuration::from_secs(60);
    config.machine_location = "127.0.0.1:7100".to_string();
    config
}

#[tokio::test]
async fn pin_cache_survives_a_trim_until_ttl_then_observes_removal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_str().unwrap());
    let clock = TestClock::new(chrono::Utc::now());
    let state = ServerState::initialize_with_clock(config, clock.clone()).await.unwrap();

    let hash = ContentHash::of(HashType::Sha256, b"pin me");
    state.put_local(hash, Bytes::from_static(b"pin me")).await.unwrap();

    assert!(state.pin(hash).await.unwrap());

    state.record_local_remove(hash.to_short()).await.unwrap();

    // Still within content_hash_bump_time: the cache masks the remote trim.
    clock.advance(Duration::seconds(30));
    assert!(state.pin(hash).await.unwrap());

    // Past the TTL: the next pin re-queries and observes the removal.
    clock.advance(Duration::seconds(31));
    assert!(!state.pin(hash).await.unwrap());
}

#[tokio::test]
async fn pin_of_unknown_content_is_a_plain_miss() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_str().unwrap());
    let state = ServerState::initialize(config).await.unwrap();

    let hash = ContentHash::of(HashType::Sha256, b"never seen");
    assert!(!state.pin(hash).await.unwrap());
}
