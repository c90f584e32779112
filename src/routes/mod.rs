//! HTTP routing for the repository API
//!
//! Routes are an explicit, ordered table matched top-down; the first rule
//! whose literals and parameter positions fit the request path wins:
//! - GET /metrics - Prometheus metrics (when enabled)
//! - HEAD|GET|POST /config - repository config object
//! - GET /{type}/ - list ids of a type
//! - HEAD|GET|POST|DELETE /{type}/{name} - single object
//!
//! `/config` is registered before `/:type/:name` so the parameterised rules
//! never shadow it.

mod handlers;

use axum::http::Method;
use axum::Router;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::storage::StorageBackend;

/// Operation a route resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Metrics,
    CheckConfig,
    GetConfig,
    SaveConfig,
    ListBlobs,
    CheckBlob,
    GetBlob,
    SaveBlob,
    DeleteBlob,
}

impl Handler {
    pub fn name(self) -> &'static str {
        match self {
            Handler::Metrics => "metrics",
            Handler::CheckConfig => "check_config",
            Handler::GetConfig => "get_config",
            Handler::SaveConfig => "save_config",
            Handler::ListBlobs => "list_blobs",
            Handler::CheckBlob => "check_blob",
            Handler::GetBlob => "get_blob",
            Handler::SaveBlob => "save_blob",
            Handler::DeleteBlob => "delete_blob",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

/// Path pattern such as `/config` or `/:type/:name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: &'static str,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &'static str) -> Self {
        let segments = raw
            .strip_prefix('/')
            .unwrap_or(raw)
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Param(name),
                None => Segment::Literal(segment),
            })
            .collect();
        Self { raw, segments }
    }

    /// Match `path` segment by segment, capturing parameters
    ///
    /// Parameters never match an empty segment, so `/data/` does not fit
    /// `/:type/:name`.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = Params::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if *literal == part => {}
                Segment::Param(name) if !part.is_empty() => {
                    params.0.push((*name, part.to_string()));
                }
                _ => return None,
            }
        }
        Some(params)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw)
    }
}

/// Parameters captured from a matched path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(&'static str, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: Pattern,
    pub handler: Handler,
}

/// Ordered route rules, evaluated in registration order
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: Method, pattern: &'static str, handler: Handler) -> Self {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        });
        self
    }

    pub fn head(self, pattern: &'static str, handler: Handler) -> Self {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn get(self, pattern: &'static str, handler: Handler) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &'static str, handler: Handler) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    pub fn delete(self, pattern: &'static str, handler: Handler) -> Self {
        self.route(Method::DELETE, pattern, handler)
    }

    /// The repository API, optionally with the metrics endpoint in front
    pub fn standard(metrics_enabled: bool) -> Self {
        let mut table = Self::new();
        if metrics_enabled {
            table = table.get("/metrics", Handler::Metrics);
        }
        table
            .head("/config", Handler::CheckConfig)
            .get("/config", Handler::GetConfig)
            .post("/config", Handler::SaveConfig)
            .get("/:type/", Handler::ListBlobs)
            .head("/:type/:name", Handler::CheckBlob)
            .get("/:type/:name", Handler::GetBlob)
            .post("/:type/:name", Handler::SaveBlob)
            .delete("/:type/:name", Handler::DeleteBlob)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// First rule matching `method` and `path`
    pub fn resolve(&self, method: &Method, path: &str) -> Option<(Handler, Params)> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route
                    .pattern
                    .matches(path)
                    .map(|params| (route.handler, params))
            })
    }
}

/// State shared by every request
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub routes: Arc<RouteTable>,
}

/// Create the repository API router
pub fn create_router(storage: Arc<dyn StorageBackend>, metrics_enabled: bool) -> Router {
    let table = RouteTable::standard(metrics_enabled);
    for route in table.routes() {
        debug!(
            method = %route.method,
            pattern = %route.pattern,
            handler = route.handler.name(),
            "Route registered"
        );
    }

    let state = AppState {
        storage,
        routes: Arc::new(table),
    };
    Router::new().fallback(handlers::dispatch).with_state(state)
}
