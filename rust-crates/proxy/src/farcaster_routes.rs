use crate::server::AppState;
use actix_web::{
    HttpResponse,
    web,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};

const DEFAULT_FOLLOWERS_LIMIT: u32 = 25;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/followers/me", web::get().to(followers_me))
        .route("/api/users", web::get().to(users));
}

#[derive(Debug, Deserialize)]
struct FollowersQuery {
    limit: Option<u32>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersQuery {
    fids: Option<String>,
}

/// Parses `1,2, 3` into FIDs. Empty input or any non-numeric entry is rejected.
fn parse_fids(raw: &str) -> Option<Vec<u64>> {
    let fids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    (!fids.is_empty()).then_some(fids)
}

async fn followers_me(
    query: web::Query<FollowersQuery>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let FollowersQuery { limit, cursor } = query.into_inner();
    let limit = limit.unwrap_or(DEFAULT_FOLLOWERS_LIMIT);
    match state
        .neynar
        .followers(state.followers_fid, limit, cursor.as_deref())
        .await
    {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            tracing::warn!(error = %e, fid = state.followers_fid, "followers lookup failed");
            HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to fetch followers" }))
        }
    }
}

async fn users(query: web::Query<UsersQuery>, state: web::Data<AppState>) -> HttpResponse {
    let Some(raw) = query.fids.as_deref() else {
        return HttpResponse::BadRequest()
            .json(json!({ "error": "fids query parameter is required" }));
    };
    let Some(fids) = parse_fids(raw) else {
        return HttpResponse::BadRequest().json(json!({ "error": "Invalid fids" }));
    };
    match state.neynar.bulk_users(&fids).await {
        Ok(body) => {
            let users = body.get("users").cloned().unwrap_or(Value::Array(Vec::new()));
            HttpResponse::Ok().json(json!({ "users": users }))
        }
        Err(e) => {
            tracing::warn!(error = %e, ?fids, "user lookup failed");
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to fetch users" }))
        }
    }
}
