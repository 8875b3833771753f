//! Outcome classification for upstream responses.

use crate::executor::TransportResponse;
use crate::models::GraphqlResponse;

/// HTTP status the API uses for security-layer rejections.
pub const SECURITY_REJECTION_STATUS: u16 = 430;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Throttled,
    Validation,
    SecurityRejection,
    /// 5xx: retried with the same backoff as transport failures
    ServerError,
    UnexpectedStatus,
}

pub(crate) fn classify(response: &TransportResponse, throttle_codes: &[String]) -> Outcome {
    match response.status {
        SECURITY_REJECTION_STATUS => Outcome::SecurityRejection,
        429 => Outcome::Throttled,
        500..=599 => Outcome::ServerError,
        200..=299 if response.body.has_errors() => {
            if is_throttled(&response.body, throttle_codes) {
                Outcome::Throttled
            } else {
                Outcome::Validation
            }
        }
        200..=299 => Outcome::Success,
        _ => Outcome::UnexpectedStatus,
    }
}

/// Cost extension first: an errored response whose reported availability is
/// below its requested cost was throttled. Without usable cost data, fall back
/// to the error codes.
fn is_throttled(body: &GraphqlResponse, throttle_codes: &[String]) -> bool {
    let from_cost = body.cost().and_then(|cost| {
        let requested = cost.requested_query_cost?;
        let status = cost.throttle_status?;
        Some(status.currently_available < requested)
    });

    match from_cost {
        Some(throttled) => throttled,
        None => body
            .error_codes()
            .any(|code| throttle_codes.iter().any(|t| t == code)),
    }
}
