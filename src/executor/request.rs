//! Request Executor
//!
//! Sends one operation at a time through the transport while respecting the
//! quota: admission before sending, backoff on transport failures, wait and
//! retry on throttles, and exactly one usage record per call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::executor::classify::{classify, Outcome};
use crate::executor::{RetryConfig, Transport, TransportError, TransportResponse};
use crate::models::{CostReport, GraphqlRequest, GraphqlResponse};
use crate::throttle::{ThrottleTracker, UpdateOutcome};
use crate::usage::{UsageRecord, UsageRecorder};

// == Executor Settings ==
/// The part of [`Config`] the executor reads.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub max_throttle_retries: usize,
    pub default_estimated_cost: f64,
    pub throttle_codes: Vec<String>,
}

impl From<&Config> for ExecutorSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            retry: config.retry.clone(),
            max_throttle_retries: config.max_throttle_retries,
            default_estimated_cost: config.default_estimated_cost,
            throttle_codes: config.throttle_codes.clone(),
        }
    }
}

// == Request Executor ==
/// Cheap to clone; all clones share the same quota, history and transport.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    transport: Arc<dyn Transport>,
    tracker: Arc<RwLock<ThrottleTracker>>,
    usage: Arc<RwLock<UsageRecorder>>,
    events: EventBus,
    clock: SharedClock,
    settings: ExecutorSettings,
}

type SendTask = JoinHandle<std::result::Result<TransportResponse, TransportError>>;

/// Per-call bookkeeping that ends up in the usage record.
#[derive(Debug, Default)]
struct CallState {
    throttled: bool,
    cost: Option<CostReport>,
    /// Send still in flight when the deadline hit; its cost lands in the record.
    late: Option<SendTask>,
}

enum Dispatch {
    Response(TransportResponse),
    Failed(TransportError),
    TimedOut(SendTask),
}

impl RequestExecutor {
    // == Constructor ==
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                transport,
                tracker: Arc::new(RwLock::new(ThrottleTracker::new(
                    config.default_maximum_available,
                    config.threshold_pct,
                ))),
                usage: Arc::new(RwLock::new(UsageRecorder::new(config.history_capacity))),
                events,
                clock,
                settings: ExecutorSettings::from(config),
            }),
        }
    }

    // == Execute ==
    /// Sends `document` with `variables`, returning the full response envelope.
    ///
    /// The call runs on its own task: if the caller stops waiting, the quota
    /// update and the usage record still happen when the response lands.
    pub async fn execute(
        &self,
        document: &str,
        variables: Value,
        estimated_cost: Option<f64>,
    ) -> Result<GraphqlResponse> {
        let request = GraphqlRequest::new(document, variables);
        let estimate = estimated_cost.unwrap_or(self.inner.settings.default_estimated_cost);
        let inner = Arc::clone(&self.inner);

        let mut handle = tokio::spawn(async move { inner.run(request, estimate).await });
        match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(ApiError::Network {
                message: format!("executor task failed: {}", join_error),
                attempts: 0,
            }),
        }
    }

    pub fn tracker(&self) -> &Arc<RwLock<ThrottleTracker>> {
        &self.inner.tracker
    }

    pub fn usage(&self) -> &Arc<RwLock<UsageRecorder>> {
        &self.inner.usage
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

impl ExecutorInner {
    async fn run(self: Arc<Self>, request: GraphqlRequest, estimate: f64) -> Result<GraphqlResponse> {
        let started = Instant::now();
        let deadline = started + self.settings.request_timeout;
        let mut call = CallState::default();

        let result = self.attempt(&request, estimate, started, deadline, &mut call).await;
        self.finish(request, estimate, call, &result).await;
        result
    }

    async fn attempt(
        self: &Arc<Self>,
        request: &GraphqlRequest,
        estimate: f64,
        started: Instant,
        deadline: Instant,
        call: &mut CallState,
    ) -> Result<GraphqlResponse> {
        let mut failures = 0usize;
        let mut throttle_events = 0usize;
        // Raised to the server's requested cost once a throttle reports it.
        let mut needed = estimate;

        loop {
            self.wait_for_admission(needed, started, deadline).await?;

            let response = match self.dispatch(request, deadline).await {
                Dispatch::Response(response) => response,
                Dispatch::TimedOut(pending) => {
                    call.late = Some(pending);
                    return Err(timeout_error(started));
                }
                Dispatch::Failed(err) => {
                    failures += 1;
                    self.backoff(failures, err.to_string(), started, deadline).await?;
                    continue;
                }
            };

            if let Some(cost) = response.body.cost() {
                call.cost = Some(cost);
            }

            match classify(&response, &self.settings.throttle_codes) {
                Outcome::Success => return Ok(response.body),
                Outcome::Throttled => {
                    call.throttled = true;
                    throttle_events += 1;
                    if let Some(requested) = call.cost.as_ref().and_then(|c| c.requested_query_cost) {
                        if requested.is_finite() {
                            needed = needed.max(requested);
                        }
                    }
                    self.on_throttled(needed, throttle_events, started, deadline).await?;
                }
                Outcome::ServerError => {
                    failures += 1;
                    let message = format!("upstream returned HTTP {}", response.status);
                    self.backoff(failures, message, started, deadline).await?;
                }
                Outcome::Validation => {
                    let body = response.body;
                    return Err(ApiError::GraphqlValidation {
                        errors: body.errors.unwrap_or_default(),
                        data: body.data,
                    });
                }
                Outcome::SecurityRejection => {
                    return Err(ApiError::SecurityRejection {
                        status: response.status,
                        body: serde_json::to_value(&response.body).ok(),
                    });
                }
                Outcome::UnexpectedStatus => {
                    return Err(ApiError::HttpStatus {
                        status: response.status,
                        body: serde_json::to_value(&response.body).ok(),
                    });
                }
            }
        }
    }

    /// Blocks until the tracker admits `estimate`, or the deadline makes waiting pointless.
    async fn wait_for_admission(&self, estimate: f64, started: Instant, deadline: Instant) -> Result<()> {
        loop {
            let (admission, exceeds, state) = {
                let tracker = self.tracker.read().await;
                (
                    tracker.admit(estimate, self.clock.now_ms()),
                    tracker.exceeds_capacity(estimate),
                    tracker.state(),
                )
            };

            if exceeds {
                return Err(ApiError::Throttled {
                    message: format!(
                        "estimated cost {} exceeds bucket capacity {}",
                        estimate, state.maximum_available
                    ),
                    status: Some(state),
                });
            }
            if admission.allow {
                return Ok(());
            }

            debug!(wait_ms = admission.wait_ms, estimate, "Waiting for quota before sending");
            sleep_within(Duration::from_millis(admission.wait_ms), started, deadline).await?;
        }
    }

    /// Sends on a detached task so a late response still updates the quota.
    async fn dispatch(self: &Arc<Self>, request: &GraphqlRequest, deadline: Instant) -> Dispatch {
        let inner = Arc::clone(self);
        let request = request.clone();

        let mut handle = tokio::spawn(async move {
            let result = inner.transport.send(&request).await;
            if let Ok(response) = &result {
                inner.observe_cost(&response.body).await;
            }
            result
        });

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Err(_) => Dispatch::TimedOut(handle),
            Ok(Err(join_error)) => Dispatch::Failed(TransportError(join_error.to_string())),
            Ok(Ok(Err(err))) => Dispatch::Failed(err),
            Ok(Ok(Ok(response))) => Dispatch::Response(response),
        }
    }

    /// Feeds `extensions.cost.throttleStatus` into the tracker.
    async fn observe_cost(&self, body: &GraphqlResponse) {
        let Some(status) = body.cost().and_then(|c| c.throttle_status) else {
            return;
        };

        let observed_at = self.clock.now_ms();
        let (outcome, state, used) = {
            let mut tracker = self.tracker.write().await;
            let outcome = tracker.update(status, observed_at);
            (outcome, tracker.state(), tracker.used_fraction())
        };

        match outcome {
            UpdateOutcome::Applied {
                threshold_crossed: true,
            } => {
                warn!(
                    available = state.currently_available,
                    maximum = state.maximum_available,
                    "Rate limit approaching"
                );
                self.events.emit(ClientEvent::RateLimitApproaching {
                    status: state,
                    pct: used,
                });
            }
            UpdateOutcome::Stale => debug!(observed_at, "Ignoring out-of-order quota observation"),
            UpdateOutcome::Applied { .. } => {}
        }
    }

    /// Waits out a throttle before the next attempt.
    ///
    /// `needed` is the larger of the caller's estimate and the cost the server
    /// reported for the rejected request, so the wait covers a real refill.
    async fn on_throttled(
        &self,
        needed: f64,
        throttle_events: usize,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        let (status, admission) = {
            let tracker = self.tracker.read().await;
            let status = tracker.has_observation().then(|| tracker.state());
            (status, tracker.admit(needed, self.clock.now_ms()))
        };
        self.events.emit(ClientEvent::Throttled { status });

        if throttle_events > self.settings.max_throttle_retries {
            return Err(ApiError::Throttled {
                message: format!("still throttled after {} retries", self.settings.max_throttle_retries),
                status,
            });
        }

        // With cost data the bucket says how long to wait; code-only throttles back off.
        let wait = if admission.allow {
            self.settings.retry.delay_for(throttle_events - 1)
        } else {
            Duration::from_millis(admission.wait_ms)
        };
        info!(wait_ms = wait.as_millis() as u64, needed, attempt = throttle_events, "Throttled, retrying");
        sleep_within(wait, started, deadline).await
    }

    async fn backoff(&self, failures: usize, message: String, started: Instant, deadline: Instant) -> Result<()> {
        if failures >= self.settings.retry.max_attempts {
            return Err(ApiError::Network {
                message,
                attempts: failures,
            });
        }
        let delay = self.settings.retry.delay_for(failures - 1);
        warn!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %message, "Retrying after transport failure");
        sleep_within(delay, started, deadline).await
    }

    /// Appends the call's single usage record and reports surfaced errors.
    ///
    /// A call that timed out with a send still in flight records once that
    /// send settles, so the late response's cost is not lost. The wait for it
    /// is bounded by one more request timeout.
    async fn finish(
        self: &Arc<Self>,
        request: GraphqlRequest,
        estimate: f64,
        mut call: CallState,
        result: &Result<GraphqlResponse>,
    ) {
        let success = result.is_ok();
        if let Err(error) = result {
            debug!(kind = error.kind(), "Request failed: {}", error);
            self.events.emit(ClientEvent::ApiError { error: error.clone() });
        }

        let Some(pending) = call.late.take() else {
            self.record_usage(&request, estimate, &call, success).await;
            return;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::time::timeout(inner.settings.request_timeout, pending).await {
                Ok(Ok(Ok(response))) => {
                    if let Some(cost) = response.body.cost() {
                        call.cost = Some(cost);
                    }
                }
                Ok(_) => debug!("Late send failed; recording without its cost"),
                Err(_) => warn!("Late send never settled; recording without its cost"),
            }
            inner.record_usage(&request, estimate, &call, success).await;
        });
    }

    async fn record_usage(&self, request: &GraphqlRequest, estimate: f64, call: &CallState, success: bool) {
        let cost = call.cost.as_ref();
        let record = UsageRecord {
            timestamp: self.clock.now_ms(),
            requested_cost: cost.and_then(|c| c.requested_query_cost).unwrap_or(estimate),
            actual_cost: cost.and_then(|c| c.actual_query_cost).unwrap_or(0.0),
            success,
            throttled: call.throttled,
            endpoint: request.operation_name(),
        };
        self.usage.write().await.record(record);
    }
}

/// Sleeps for `delay` unless that would overrun the deadline, in which case the
/// call times out right away.
async fn sleep_within(delay: Duration, started: Instant, deadline: Instant) -> Result<()> {
    if Instant::now() + delay > deadline {
        return Err(timeout_error(started));
    }
    tokio::time::sleep(delay).await;
    Ok(())
}

fn timeout_error(started: Instant) -> ApiError {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    warn!(elapsed_ms, "Request deadline exceeded");
    ApiError::Timeout { elapsed_ms }
}
