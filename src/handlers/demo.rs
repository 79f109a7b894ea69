//! Demonstration endpoints exercising the monitor

use axum::response::Json;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "System Operational" }))
}

/// GET /users - simulated work of 100-300 ms
pub async fn list_users() -> Json<Value> {
    let delay_ms = rand::thread_rng().gen_range(100..=300);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    Json(json!([
        { "id": 1, "name": "Alice" },
        { "id": 2, "name": "Bob" },
    ]))
}

/// GET /error - simulated handler fault
pub async fn trigger_error() -> Json<Value> {
    panic!("Something went wrong!")
}

/// GET /slow - simulated high latency
pub async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(1500)).await;
    Json(json!({ "message": "That was slow" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root() {
        let Json(body) = root().await;
        assert_eq!(body, json!({"message": "System Operational"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_users_returns_two_users() {
        let Json(body) = list_users().await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["name"], "Alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_takes_a_second_and_a_half() {
        let start = tokio::time::Instant::now();
        let Json(body) = slow().await;
        assert_eq!(body["message"], "That was slow");
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    #[should_panic(expected = "Something went wrong!")]
    async fn test_error_panics() {
        trigger_error().await;
    }
}
