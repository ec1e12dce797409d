//! Shared helpers for sono-eval integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use sono_eval::{build_router, AppState};
use tower::util::ServiceExt; // for `oneshot` method

/// Router over a fresh in-memory database
pub struct TestApp {
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        let pool = sono_common::db::init_memory_database()
            .await
            .expect("Should create in-memory database");
        Self {
            state: AppState::new(pool),
        }
    }

    /// Send one request; `user` becomes the `x-user-id` header
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user {
            builder = builder.header("x-user-id", user_id.to_string());
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = build_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Should read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    pub async fn get(&self, uri: &str, user: Option<i64>) -> (StatusCode, Value) {
        self.request("GET", uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: Option<i64>, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, user, Some(body)).await
    }

    pub async fn seed_user(&self, display_name: &str, role: &str) -> i64 {
        sqlx::query_scalar("INSERT INTO users (display_name, role) VALUES (?, ?) RETURNING id")
            .bind(display_name)
            .bind(role)
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }

    pub async fn seed_study(&self, student_id: i64) -> i64 {
        sqlx::query_scalar("INSERT INTO studies (student_id, title) VALUES (?, 'FAST exam') RETURNING id")
            .bind(student_id)
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }

    pub async fn seed_clip(&self, study_id: i64) -> i64 {
        sqlx::query_scalar("INSERT INTO clips (study_id, title) VALUES (?, 'RUQ view') RETURNING id")
            .bind(study_id)
            .fetch_one(&self.state.db)
            .await
            .unwrap()
    }
}

/// Error code from a `{"error":{"code":..}}` body
pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
