use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            body: serde_json::json!({ "error": "not found" }),
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message.into() }),
        }
    }
}

pub type RouteFuture = Pin<Box<dyn Future<Output = ApiResponse> + Send>>;

pub type RouteHandler = Arc<dyn Fn(ApiRequest) -> RouteFuture + Send + Sync>;

/// Router façade for API extensions; the host owns the actual transport
pub trait Router: Send + Sync {
    fn route(&self, method: HttpMethod, path: &str, handler: RouteHandler);

    /// Router whose routes are all mounted under `prefix`
    fn group(&self, prefix: &str) -> Arc<dyn Router>;

    /// Drop every route mounted under `prefix`
    fn remove_group(&self, prefix: &str);

    fn get(&self, path: &str, handler: RouteHandler) {
        self.route(HttpMethod::Get, path, handler);
    }

    fn post(&self, path: &str, handler: RouteHandler) {
        self.route(HttpMethod::Post, path, handler);
    }

    fn put(&self, path: &str, handler: RouteHandler) {
        self.route(HttpMethod::Put, path, handler);
    }

    fn delete(&self, path: &str, handler: RouteHandler) {
        self.route(HttpMethod::Delete, path, handler);
    }

    fn patch(&self, path: &str, handler: RouteHandler) {
        self.route(HttpMethod::Patch, path, handler);
    }
}
