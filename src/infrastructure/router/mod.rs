//! In-process route table backing the `Router` façade
//!
//! Paths are matched segment by segment; a `:name` segment captures into
//! `ApiRequest::params`.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::traits::{ApiRequest, ApiResponse, HttpMethod, RouteHandler, Router};

struct Route {
    method: HttpMethod,
    path: String,
    handler: RouteHandler,
}

type Routes = Arc<RwLock<Vec<Route>>>;

/// Registered route, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: HttpMethod,
    pub path: String,
}

/// Root of the route tree
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Routes,
}

/// View of the table that prefixes every path
struct RouteGroup {
    prefix: String,
    routes: Routes,
}

fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{}/{}", prefix, path)
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern = segments(pattern);
    let path = segments(path);
    if pattern.len() != path.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (p, s) in pattern.iter().zip(path.iter()) {
        match p.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), s.to_string());
            }
            None if p == s => {}
            None => return None,
        }
    }
    Some(params)
}

fn add(routes: &Routes, method: HttpMethod, path: String, handler: RouteHandler) {
    match routes.write() {
        Ok(mut routes) => {
            routes.retain(|r| !(r.method == method && r.path == path));
            tracing::debug!(method = %method, path = %path, "Route registered");
            routes.push(Route { method, path, handler });
        }
        Err(_) => tracing::error!(path = %path, "Route table lock poisoned, route dropped"),
    }
}

fn remove_prefix(routes: &Routes, prefix: &str) {
    let prefix = prefix.trim_end_matches('/');
    if let Ok(mut routes) = routes.write() {
        let before = routes.len();
        routes.retain(|r| r.path != prefix && !r.path.starts_with(&format!("{}/", prefix)));
        tracing::debug!(prefix, removed = before - routes.len(), "Route group removed");
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a request; unknown routes answer 404
    pub async fn dispatch(
        &self,
        method: HttpMethod,
        path: &str,
        query: HashMap<String, String>,
        body: Value,
    ) -> ApiResponse {
        let found = self.routes.read().ok().and_then(|routes| {
            routes
                .iter()
                .filter(|r| r.method == method)
                .find_map(|r| match_path(&r.path, path).map(|params| (r.handler.clone(), params)))
        });

        match found {
            Some((handler, params)) => {
                handler(ApiRequest {
                    path: path.to_string(),
                    params,
                    query,
                    body,
                })
                .await
            }
            None => ApiResponse::not_found(),
        }
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut infos: Vec<RouteInfo> = self
            .routes
            .read()
            .map(|routes| {
                routes
                    .iter()
                    .map(|r| RouteInfo {
                        method: r.method,
                        path: r.path.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        infos.sort_by(|a, b| a.path.cmp(&b.path).then(a.method.as_str().cmp(b.method.as_str())));
        infos
    }

    pub fn len(&self) -> usize {
        self.routes.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Router for RouteTable {
    fn route(&self, method: HttpMethod, path: &str, handler: RouteHandler) {
        add(&self.routes, method, join("", path), handler);
    }

    fn group(&self, prefix: &str) -> Arc<dyn Router> {
        Arc::new(RouteGroup {
            prefix: join("", prefix),
            routes: self.routes.clone(),
        })
    }

    fn remove_group(&self, prefix: &str) {
        remove_prefix(&self.routes, &join("", prefix));
    }
}

impl Router for RouteGroup {
    fn route(&self, method: HttpMethod, path: &str, handler: RouteHandler) {
        add(&self.routes, method, join(&self.prefix, path), handler);
    }

    fn group(&self, prefix: &str) -> Arc<dyn Router> {
        Arc::new(RouteGroup {
            prefix: join(&self.prefix, prefix),
            routes: self.routes.clone(),
        })
    }

    fn remove_group(&self, prefix: &str) {
        remove_prefix(&self.routes, &join(&self.prefix, prefix));
    }
}
