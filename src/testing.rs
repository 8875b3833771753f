//! Scripted transport shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::executor::{Transport, TransportError, TransportResponse};
use crate::models::{GraphqlRequest, GraphqlResponse};

struct Step {
    delay: Duration,
    result: Result<TransportResponse, TransportError>,
}

/// Replays queued responses in order; errors once the script runs dry.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, response: TransportResponse) -> Self {
        self.push(Duration::ZERO, Ok(response))
    }

    pub(crate) fn respond_after(self, delay: Duration, response: TransportResponse) -> Self {
        self.push(delay, Ok(response))
    }

    pub(crate) fn fail(self, message: &str) -> Self {
        self.push(Duration::ZERO, Err(TransportError(message.to_string())))
    }

    fn push(self, delay: Duration, result: Result<TransportResponse, TransportError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Step { delay, result });
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: &GraphqlRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.result
            }
            None => Err(TransportError("script exhausted".to_string())),
        }
    }
}

pub(crate) fn cost_extension(requested: f64, actual: f64, max: f64, current: f64, rate: f64) -> Value {
    json!({"cost": {
        "requestedQueryCost": requested,
        "actualQueryCost": actual,
        "throttleStatus": {
            "maximumAvailable": max,
            "currentlyAvailable": current,
            "restoreRate": rate
        }
    }})
}

/// HTTP 200 carrying `data` and no cost extension.
pub(crate) fn data(data: Value) -> TransportResponse {
    TransportResponse::ok(GraphqlResponse {
        data: Some(data),
        errors: None,
        extensions: None,
    })
}

/// HTTP 200 carrying `data` and a cost extension.
pub(crate) fn data_with_cost(data: Value, actual: f64, current: f64) -> TransportResponse {
    TransportResponse::ok(GraphqlResponse {
        data: Some(data),
        errors: None,
        extensions: Some(cost_extension(actual, actual, 1000.0, current, 50.0)),
    })
}

/// HTTP 200 throttle response identified only by its error code.
pub(crate) fn throttled_by_code() -> TransportResponse {
    TransportResponse::ok(
        serde_json::from_value(json!({
            "errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]
        }))
        .unwrap(),
    )
}

/// HTTP 200 throttle response whose cost extension says the bucket is short.
pub(crate) fn throttled_with_cost(requested: f64, current: f64) -> TransportResponse {
    TransportResponse::ok(GraphqlResponse {
        data: None,
        errors: Some(vec![serde_json::from_value(json!({
            "message": "Throttled", "extensions": {"code": "THROTTLED"}
        }))
        .unwrap()]),
        extensions: Some(cost_extension(requested, 0.0, 1000.0, current, 50.0)),
    })
}

/// HTTP 200 with a validation error.
pub(crate) fn validation_error(message: &str) -> TransportResponse {
    TransportResponse::ok(
        serde_json::from_value(json!({
            "errors": [{"message": message, "path": ["product", "titel"]}]
        }))
        .unwrap(),
    )
}

pub(crate) fn status(code: u16) -> TransportResponse {
    TransportResponse {
        status: code,
        body: GraphqlResponse::default(),
    }
}
