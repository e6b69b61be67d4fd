// src/http.rs
//
// Minimal GET-only JSON HTTP surface: one registered endpoint per
// configured device, everything else falls through to a 404. Ported
// from http.go's single mux with per-path handler functions and its
// `unknownURLs` miss-dedup map; the handler registry itself (rather than
// `http.HandleFunc` against a package-level mux) is grounded in the
// teacher's `EndpointRegistry`-style `Arc<RwLock<HashMap<...>>>` pattern
// (catalog.rs).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};

use crate::logging::glog;

pub type EndpointFuture = Pin<Box<dyn Future<Output = JsonValue> + Send>>;
pub type EndpointHandler = Arc<dyn Fn() -> EndpointFuture + Send + Sync>;

/// Path (without leading slash) to handler, shared by every request.
/// Built once at startup and never mutated afterwards — registration
/// happens before the server starts accepting connections, so a plain
/// `RwLock` (rather than anything fancier) is enough.
#[derive(Clone)]
pub struct EndpointRegistry {
    handlers: Arc<RwLock<HashMap<String, EndpointHandler>>>,
    unknown_paths: Arc<Mutex<HashSet<String>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        EndpointRegistry {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            unknown_paths: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn register<F, Fut>(&self, path: impl Into<String>, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JsonValue> + Send + 'static,
    {
        let path = path.into();
        let boxed: EndpointHandler = Arc::new(move || Box::pin(handler()) as EndpointFuture);
        self.handlers.write().await.insert(path, boxed);
    }

    pub fn into_router(self) -> Router {
        Router::new().route("/*path", get(dispatch)).with_state(self)
    }
}

async fn dispatch(State(registry): State<EndpointRegistry>, Path(path): Path<String>) -> impl IntoResponse {
    let handler = registry.handlers.read().await.get(&path).cloned();
    match handler {
        Some(handler) => Json(handler().await).into_response(),
        None => {
            let mut seen = registry.unknown_paths.lock().await;
            if seen.insert(path.clone()) {
                glog!("[http] unknown path requested: /{}", path);
            }
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_endpoint_serves_its_handler_output() {
        let registry = EndpointRegistry::new();
        registry.register("meter", || async { serde_json::json!({"voltage": 230}) }).await;

        let handler = registry.handlers.read().await.get("meter").cloned().unwrap();
        let value = handler().await;
        assert_eq!(value, serde_json::json!({"voltage": 230}));
    }

    #[tokio::test]
    async fn unknown_path_is_recorded_once() {
        let registry = EndpointRegistry::new();
        {
            let mut seen = registry.unknown_paths.lock().await;
            assert!(seen.insert("nope".to_string()));
            assert!(!seen.insert("nope".to_string()));
        }
    }
}
