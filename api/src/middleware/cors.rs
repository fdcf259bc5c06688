use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

/// Build a CORS layer from `HEARTH_CORS_ORIGINS` (comma-separated,
/// default `http://localhost:3000`). Unparseable origins are skipped.
pub fn build_cors_layer() -> CorsLayer {
    let raw = std::env::var("HEARTH_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());

    CorsLayer::new()
        .allow_origin(parse_origins(&raw))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_invalid_origins() {
        let origins = parse_origins(" https://app.hearth.example , ,bad\norigin,http://localhost:5173");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://app.hearth.example");
    }
}
