//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use gqlgate::executor::{Transport, TransportError, TransportResponse};
use gqlgate::models::{GraphqlRequest, GraphqlResponse};

/// Upstream stand-in that replays queued responses in order.
#[derive(Clone, Default)]
pub struct FakeUpstream {
    script: Arc<Mutex<VecDeque<(Duration, TransportResponse)>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: TransportResponse) -> Self {
        self.respond_after(Duration::ZERO, response)
    }

    pub fn respond_after(self, delay: Duration, response: TransportResponse) -> Self {
        self.script.lock().unwrap().push_back((delay, response));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Transport for FakeUpstream {
    async fn send(&self, _request: &GraphqlRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some((delay, response)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            None => Err(TransportError("no scripted response left".to_string())),
        }
    }
}

/// HTTP 200 carrying `data`.
pub fn data(data: Value) -> TransportResponse {
    TransportResponse::ok(GraphqlResponse {
        data: Some(data),
        errors: None,
        extensions: None,
    })
}

/// HTTP 200 carrying `data` and a cost extension for a 1000 point bucket restoring 50/s.
pub fn data_with_cost(data: Value, actual: f64, current: f64) -> TransportResponse {
    TransportResponse::ok(GraphqlResponse {
        data: Some(data),
        errors: None,
        extensions: Some(json!({"cost": {
            "requestedQueryCost": actual,
            "actualQueryCost": actual,
            "throttleStatus": {
                "maximumAvailable": 1000.0,
                "currentlyAvailable": current,
                "restoreRate": 50.0
            }
        }})),
    })
}

/// Bare HTTP status with an empty envelope.
pub fn status(code: u16) -> TransportResponse {
    TransportResponse {
        status: code,
        body: GraphqlResponse::default(),
    }
}

pub fn product(id: u32, title: &str) -> Value {
    json!({"product": {"__typename": "Product", "id": id.to_string(), "title": title}})
}
