//! Cross-origin policy for the browser frontend

use crate::config::CorsConfig;
use crate::error::Result;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// Build the CORS layer from configuration
///
/// Methods and request headers are mirrored back, which allows all of them
/// while staying valid together with credentials.
///
/// # Errors
/// - Invalid origin list (see [`CorsConfig::origin_header_values`])
pub fn build_cors_layer(cors: &CorsConfig) -> Result<CorsLayer> {
    let origins = cors.origin_header_values()?;

    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors.allow_credentials))
}
