//! Administrative HTTP surface.
//!
//! Lets an editor look up the devices behind an account before and after it
//! is deployed.

use crate::error::{BridgeError, Result};
use crate::registry::AccountRegistry;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Credentials of an account that has not been deployed yet.
#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub id: String,
    pub user: String,
    pub pass: String,
    pub webapi: String,
}

pub fn router(registry: Arc<AccountRegistry>) -> Router {
    Router::new()
        .route("/api/accounts", post(new_account))
        .route("/api/accounts/:id/refresh", post(refresh))
        .route("/api/accounts/:id/devices", get(devices))
        .with_state(registry)
}

pub async fn serve(bind: &str, registry: Arc<AccountRegistry>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("[Admin] Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

async fn new_account(
    State(registry): State<Arc<AccountRegistry>>,
    Json(account): Json<NewAccount>,
) -> Response {
    match registry
        .directory()
        .refresh(&account.id, &account.webapi, &account.user, &account.pass)
        .await
    {
        Ok(count) => Json(json!({ "devices": count })).into_response(),
        Err(e) => lookup_failed(&account.id, e),
    }
}

async fn refresh(State(registry): State<Arc<AccountRegistry>>, Path(id): Path<String>) -> Response {
    match registry.refresh(&id).await {
        Ok(count) => Json(json!({ "devices": count })).into_response(),
        Err(BridgeError::AccountNotFound(_)) => {
            warn!("[Admin] Can't refresh devices of {} until deployed", id);
            StatusCode::NOT_FOUND.into_response()
        }
        Err(BridgeError::Config(reason)) => {
            (StatusCode::CONFLICT, Json(json!({ "error": reason }))).into_response()
        }
        Err(e) => lookup_failed(&id, e),
    }
}

async fn devices(State(registry): State<Arc<AccountRegistry>>, Path(id): Path<String>) -> Response {
    match registry.directory().devices(&id) {
        Some(entry) => Json(entry).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn lookup_failed(id: &str, e: BridgeError) -> Response {
    warn!("[Admin] Device lookup for {} failed: {}", id, e);
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::{Device, DeviceDirectory};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Map, Value};
    use tower::ServiceExt;

    fn registry() -> Arc<AccountRegistry> {
        Arc::new(AccountRegistry::new(Arc::new(DeviceDirectory::new())))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_devices_not_cached() {
        let response = router(registry())
            .oneshot(
                Request::get("/api/accounts/acct/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_devices_returns_cached_list() {
        let registry = registry();
        registry.directory().store(
            "acct",
            vec![Device {
                endpoint_id: "lamp-1".to_string(),
                friendly_name: "Desk Lamp".to_string(),
                attributes: Map::new(),
            }],
        );

        let response = router(registry)
            .oneshot(
                Request::get("/api/accounts/acct/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["devices"][0]["endpointId"], "lamp-1");
        assert_eq!(body["devices"][0]["friendlyName"], "Desk Lamp");
        assert!(body["fetched_at"].is_string());
    }

    #[tokio::test]
    async fn test_refresh_undeployed_account() {
        let response = router(registry())
            .oneshot(
                Request::post("/api/accounts/acct/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_without_web_api() {
        let registry = registry();
        let mut config = Config::default();
        config.account.id = "acct".to_string();
        registry.configure(config.account, config.mqtt);

        let response = router(registry)
            .oneshot(
                Request::post("/api/accounts/acct/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_new_account_rejects_bad_body() {
        let response = router(registry())
            .oneshot(
                Request::post("/api/accounts")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"id":"acct"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_new_account_unreachable_web_api() {
        let registry = registry();
        let response = router(registry.clone())
            .oneshot(
                Request::post("/api/accounts")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"id":"acct","user":"alice","pass":"secret","webapi":"http://127.0.0.1:1"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(registry.directory().devices("acct").is_none());
    }
}
