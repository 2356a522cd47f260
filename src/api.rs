//! HTTP control surface for the log streamer

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use procstream_logs::{LogLevel, LogRecord, LogStreamer, StreamerStatus};
use procstream_types::{META_ORIGINAL_LINE, META_PROCESS_NAME};

const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct ApiState {
    pub streamer: LogStreamer,
    pub max_recent: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/logs/status", get(status))
        .route("/api/logs/recent", get(recent))
        .route("/api/logs/start", post(start))
        .route("/api/logs/stop", post(stop))
        .route("/api/logs/enable", post(enable))
        .route("/api/logs/disable", post(disable))
        .route("/api/logs/test", post(test_entry))
        .route("/api/logs/stream", get(stream))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<ApiState>) -> Json<StreamerStatus> {
    Json(state.streamer.status())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RecentResponse {
    logs: Vec<LogRecord>,
    count: usize,
}

async fn recent(
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> Json<RecentResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(state.max_recent);
    let logs = state.streamer.recent_logs(limit).await;
    Json(RecentResponse {
        count: logs.len(),
        logs,
    })
}

async fn start(State(state): State<ApiState>) -> Json<StreamerStatus> {
    state.streamer.start().await;
    Json(state.streamer.status())
}

async fn stop(State(state): State<ApiState>) -> Json<StreamerStatus> {
    state.streamer.stop().await;
    Json(state.streamer.status())
}

async fn enable(State(state): State<ApiState>) -> Json<StreamerStatus> {
    state.streamer.enable();
    Json(state.streamer.status())
}

async fn disable(State(state): State<ApiState>) -> Json<StreamerStatus> {
    state.streamer.disable().await;
    Json(state.streamer.status())
}

/// Either a complete record or just a level and message
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TestEntryRequest {
    Record(LogRecord),
    Simple {
        #[serde(default = "default_test_level")]
        level: LogLevel,
        message: String,
    },
}

fn default_test_level() -> LogLevel {
    LogLevel::Error
}

impl TestEntryRequest {
    fn into_record(self, streamer: &LogStreamer) -> LogRecord {
        match self {
            Self::Record(record) => record,
            Self::Simple { level, message } => {
                let settings = streamer.settings();
                let mut metadata = HashMap::new();
                metadata.insert(META_PROCESS_NAME.to_string(), json!(settings.process_name));
                metadata.insert(META_ORIGINAL_LINE.to_string(), json!(message));
                metadata.insert("test".to_string(), json!(true));

                let mut record = LogRecord::new(
                    level,
                    message,
                    settings.process_name.clone(),
                    settings.category.clone(),
                );
                record.metadata = metadata;
                record
            }
        }
    }
}

async fn test_entry(
    State(state): State<ApiState>,
    Json(request): Json<TestEntryRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let record = request.into_record(&state.streamer);
    if record.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message must not be empty" })),
        );
    }

    state.streamer.test_log_entry(record.clone()).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "record": record })),
    )
}

/// Live records as server-sent events; lagging clients skip what they missed
async fn stream(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.streamer.subscribe();
    tracing::debug!(
        subscribers = state.streamer.broadcaster().subscriber_count(),
        "live log subscriber connected"
    );
    let records = BroadcastStream::new(receiver).filter_map(|item| {
        let record = item.ok()?;
        Event::default().event("log").json_data(&record).ok().map(Ok)
    });
    Sse::new(records).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    use procstream_logs::{
        Attachment, LogBroadcaster, LogPipeline, LogSource, SourceError, StreamerSettings,
    };
    use procstream_sinks::{DisabledNotifier, MemoryLogStore};

    struct NeverAttaches;

    #[async_trait]
    impl LogSource for NeverAttaches {
        async fn attach(&self) -> Result<Attachment, SourceError> {
            Err(SourceError::Other("no process in tests".into()))
        }

        fn describe(&self) -> String {
            "none".to_string()
        }
    }

    fn streamer(enabled: bool) -> (LogStreamer, MemoryLogStore) {
        let store = MemoryLogStore::new();
        let pipeline = LogPipeline::new(
            Arc::new(store.clone()),
            Arc::new(DisabledNotifier),
            LogBroadcaster::default(),
        );
        let mut settings = StreamerSettings::new("api");
        settings.enabled = enabled;
        let streamer = LogStreamer::new(settings, Arc::new(NeverAttaches), pipeline);
        (streamer, store)
    }

    fn app(enabled: bool) -> (Router, MemoryLogStore) {
        let (streamer, store) = streamer(enabled);
        let router = router(ApiState {
            streamer,
            max_recent: 100,
        });
        (router, store)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_status_and_toggles() {
        let (router, _) = app(false);

        let (code, body) = call(&router, "GET", "/api/logs/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["phase"], "disabled");

        let (_, body) = call(&router, "POST", "/api/logs/enable", None).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["phase"], "idle");

        let (_, body) = call(&router, "POST", "/api/logs/disable", None).await;
        assert_eq!(body["enabled"], false);
        assert_eq!(body["streaming"], false);
    }

    #[tokio::test]
    async fn test_start_failure_reports_reconnecting() {
        let (router, _) = app(true);
        let (_, body) = call(&router, "POST", "/api/logs/start", None).await;
        assert_eq!(body["reconnectAttempts"], 1);
        assert_eq!(body["streaming"], true);

        let (_, body) = call(&router, "POST", "/api/logs/stop", None).await;
        assert_eq!(body["streaming"], false);
        assert_eq!(body["phase"], "idle");
    }

    #[tokio::test]
    async fn test_test_entry_then_recent() {
        let (router, store) = app(true);

        let (code, body) = call(
            &router,
            "POST",
            "/api/logs/test",
            Some(r#"{"level":"critical","message":"pipeline check"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(body["record"]["source"], "api");
        assert_eq!(store.len(), 1);

        let (code, body) = call(&router, "GET", "/api/logs/recent?limit=5", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["logs"][0]["level"], "critical");
        assert_eq!(body["logs"][0]["metadata"]["test"], true);
    }

    #[tokio::test]
    async fn test_full_record_is_accepted() {
        let (router, store) = app(true);
        let record = r#"{
            "timestamp": "2024-01-01T12:00:00Z",
            "level": "warning",
            "message": "disk at 85%",
            "source": "api",
            "category": "process-stream",
            "metadata": {}
        }"#;

        let (code, _) = call(&router, "POST", "/api/logs/test", Some(record)).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (router, store) = app(true);
        let (code, _) = call(&router, "POST", "/api/logs/test", Some(r#"{"message":"  "}"#)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_recent_limit_zero_and_upper_bound() {
        let (router, _) = app(true);
        for i in 0..3 {
            let body = format!(r#"{{"level":"info","message":"entry {i}"}}"#);
            call(&router, "POST", "/api/logs/test", Some(&body)).await;
        }

        let (code, body) = call(&router, "GET", "/api/logs/recent?limit=0", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["logs"], serde_json::json!([]));

        let (_, body) = call(&router, "GET", "/api/logs/recent?limit=100000", None).await;
        assert_eq!(body["count"], 3);
    }

    #[tokio::test]
    async fn test_stream_delivers_log_events() {
        let (streamer, _) = streamer(true);
        let router = router(ApiState {
            streamer: streamer.clone(),
            max_recent: 100,
        });

        let request = Request::builder()
            .uri("/api/logs/stream")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        assert_eq!(streamer.broadcaster().subscriber_count(), 1);

        let record = LogRecord::new(LogLevel::Error, "stream check", "api", "process-stream");
        streamer.test_log_entry(record).await;

        let mut body = response.into_body().into_data_stream();
        let mut received = String::new();
        while !received.contains("\n\n") {
            let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
                .await
                .expect("no event before timeout")
                .expect("stream ended")
                .unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }

        assert!(received.starts_with("event: log\n"), "unexpected frame: {received}");
        let data = received
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .unwrap();
        let record: LogRecord = serde_json::from_str(data).unwrap();
        assert_eq!(record.message, "stream check");
        assert_eq!(record.level, LogLevel::Error);
    }
}
