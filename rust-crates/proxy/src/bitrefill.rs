use crate::server::AppState;
use actix_web::{
    HttpRequest,
    HttpResponse,
    http::StatusCode,
    web,
};
use serde_json::json;

pub const API_KEY_HEADER: &str = "x-bitrefill-api-key";
const MISSING_KEY_MESSAGE: &str =
    "Bitrefill API key not provided in x-bitrefill-api-key header";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/bitrefill/{path:.*}")
            .route(web::get().to(forward))
            .route(web::post().to(forward))
            .route(web::put().to(forward))
            .route(web::delete().to(forward)),
    );
}

/// Builds `<base><path>[?<query>]` for the upstream request.
fn upstream_url(base: &str, path: &str, query: &str) -> String {
    let mut url = format!("{base}{}", path.trim_start_matches('/'));
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn error_body(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "error": message }))
}

async fn forward(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some(api_key) = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
    else {
        return error_body(StatusCode::UNAUTHORIZED, MISSING_KEY_MESSAGE);
    };
    let Ok(method) = reqwest::Method::from_bytes(req.method().as_str().as_bytes()) else {
        return error_body(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method");
    };
    let url = upstream_url(&state.bitrefill_base, &path, req.query_string());
    tracing::info!(%method, path = %path.as_str(), "forwarding Bitrefill request");

    let mut upstream = state
        .http
        .request(method.clone(), &url)
        .bearer_auth(api_key)
        .header(reqwest::header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
    if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
        upstream = upstream.body(body.to_vec());
    }

    let res = match upstream.send().await {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(error = %e, "Bitrefill unreachable");
            return error_body(StatusCode::BAD_GATEWAY, "Failed to reach Bitrefill");
        }
    };
    let status =
        StatusCode::from_u16(res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    match res.bytes().await {
        Ok(bytes) => HttpResponse::build(status)
            .content_type(content_type)
            .body(bytes.to_vec()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read Bitrefill response");
            error_body(StatusCode::BAD_GATEWAY, "Failed to read Bitrefill response")
        }
    }
}
