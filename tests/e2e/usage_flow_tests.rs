use anyhow::Result;
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde_json::json;

use super::{random_user_id, TestHarness};

#[tokio::test(flavor = "multi_thread")]
async fn test_free_plan_quota_over_http() -> Result<()> {
    let mut harness = TestHarness::new().await?;
    harness.start().await?;
    let user_id = random_user_id("e2e-free");

    for expected_remaining in [4, 3, 2, 1, 0] {
        let (status, body) = harness.consume(&user_id, "analyses", "free").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["decision"]["usage"]["remaining"], expected_remaining);
    }

    let (status, body) = harness.consume(&user_id, "analyses", "free").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["decision"]["usage"]["count"], 5);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("resets on"));

    harness.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_counts_survive_restart() -> Result<()> {
    let mut harness = TestHarness::new().await?;
    harness.start().await?;
    let user_id = random_user_id("e2e-restart");

    for _ in 0..2 {
        let (status, _) = harness.consume(&user_id, "backtests", "free").await?;
        assert_eq!(status, StatusCode::OK);
    }

    harness.restart().await?;

    let (status, body) = harness.consume(&user_id, "backtests", "free").await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["allowed"], false);

    let (status, body) = harness
        .get_json(&format!("/api/usage/{user_id}/features/backtests?plan=free"))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usage"]["count"], 2);

    harness.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_requests_share_last_slots() -> Result<()> {
    let mut harness = TestHarness::new().await?;
    harness.use_policy(&json!({
        "plans": {
            "starter": { "analyses": 3 }
        }
    }))?;
    harness.start().await?;
    let user_id = random_user_id("e2e-race");

    let requests = (0..15).map(|_| harness.consume(&user_id, "analyses", "starter"));
    let mut allowed = 0;
    for result in join_all(requests).await {
        let (status, _) = result?;
        if status == StatusCode::OK {
            allowed += 1;
        } else {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(allowed, 3);

    let (_, body) = harness
        .get_json(&format!("/api/usage/{user_id}?plan=starter"))
        .await?;
    assert_eq!(body["features"][0]["count"], 3);

    harness.stop().await?;
    Ok(())
}
