use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::IntoResponse,
    routing::get,
};
use futures::future::join_all;
use tracing::warn;

use crate::db::services::{server_service, subscription_service};
use crate::state::AppState;
use crate::web::error::AppError;

pub fn router() -> Router<AppState> {
    Router::new().route("/guards/{key}", get(serve_subscription))
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Serve the aggregated link list for one subscription. This is the first
/// external touch point of a subscription, so a pending expiry clock is
/// started here.
async fn serve_subscription(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let sub_state = subscription_service::get_by_access_key(&state.db, &key)
        .await?
        .ok_or(AppError::NotFound)?;

    let sub = subscription_service::touch_last_sub_update(
        &state.db,
        sub_state.subscription.clone(),
    )
    .await?;
    let sub = subscription_service::activate_expire(&state.db, sub).await?;

    let targets = server_service::get_available_targets(&state.db, &state.cipher).await?;
    let urls: Vec<String> = targets
        .iter()
        .filter_map(|target| {
            target.sub_host.as_ref().map(|base| {
                format!("{}/{}", base.trim_end_matches('/'), sub.server_key)
            })
        })
        .collect();

    let mut links: Vec<String> = Vec::new();
    for (url, fetched) in urls
        .iter()
        .zip(join_all(urls.iter().map(|url| state.panel.fetch_links(url))).await)
    {
        match fetched {
            Ok(mut batch) => links.append(&mut batch),
            Err(err) => warn!(url = %url, error = %err, "failed to fetch link list"),
        }
    }

    let config = state.config.get();
    let userinfo = format!(
        "upload=0; download={}; total={}; expire={}",
        sub_state.current_usage(),
        sub.limit_usage,
        sub.expire.max(0),
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(""));
    headers.insert(
        "profile-web-page-url",
        header_value(&sub.link(&config.subscription_domain_prefix)),
    );
    headers.insert("support-url", HeaderValue::from_static(""));
    headers.insert("profile-title", HeaderValue::from_static("Subnexus"));
    headers.insert("profile-update-interval", HeaderValue::from_static("1"));
    headers.insert("subscription-userinfo", header_value(&userinfo));

    Ok((headers, links.join("\n")))
}
