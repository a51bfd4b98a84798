//! Tests for utility functions

use std::time::Duration;

use meeting_bot_scheduler::util::{minutes, now_ms, now_secs};

#[test]
fn test_minutes() {
    assert_eq!(minutes(1), Duration::from_secs(60));
    assert_eq!(minutes(90), Duration::from_secs(5_400));
}

#[test]
fn test_clock_units_agree() {
    let ms = now_ms();
    let secs = now_secs();
    assert!(ms > 0);
    assert!((ms / 1_000).abs_diff(u128::from(secs)) <= 1);
}
