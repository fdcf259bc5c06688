use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer = GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, Body>;

fn layer(name: &str, replenish_ms: u64, burst: u32) -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap_or_else(|| panic!("invalid governor config for {name}")),
    )
    .error_handler(json_error_handler)
}

/// Reads (homes, systems, forecasts, chat mode): 120 requests/minute per IP.
pub fn read_layer() -> RateLimitLayer {
    layer("read", 500, 30)
}

/// Writes (install updates, chat messages, decisions): 60 requests/minute per IP.
pub fn write_layer() -> RateLimitLayer {
    layer("write", 1000, 20)
}

/// Intervention evaluation runs the model for every system: 12 requests/minute per IP.
pub fn evaluate_layer() -> RateLimitLayer {
    layer("evaluate", 5000, 5)
}

/// JSON body in `ApiError` shape with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = serde_json::json!({
        "error": hearth_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(wait) = retry_after {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(wait));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configs_are_valid() {
        let _ = read_layer();
        let _ = write_layer();
        let _ = evaluate_layer();
    }

    #[test]
    fn too_many_requests_sets_retry_after() {
        let response = json_error_handler(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "7");
    }
}
