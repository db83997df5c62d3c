//! Route tree and request routing.
//!
//! Routes are declared as a tree: each [`Route`] has a pattern, a map from
//! HTTP method to handler, and child routes whose patterns are relative to
//! the parent. [`Router::from_routes`] flattens the tree into a lookup table.
//!
//! Patterns use `{name}` for path parameters. Literal segments take
//! precedence over parameters, so `/orders/latest` wins over `/orders/{id}`.
//!
//! # Example
//!
//! ```rust
//! use keystone_core::{not_implemented, HandlerResult, Request, Response};
//! use keystone_server::{Route, RouteLookup, Router};
//! use http::Method;
//!
//! async fn list_orders(_req: Request) -> HandlerResult {
//!     Ok(Response::ok(serde_json::json!([])))
//! }
//!
//! let router = Router::from_routes(vec![
//!     Route::new("/orders")
//!         .action(Method::GET, list_orders)
//!         .sub_route(Route::new("/{id}").action(Method::DELETE, not_implemented)),
//! ]);
//!
//! assert!(matches!(router.lookup(&Method::GET, "/orders"), RouteLookup::Matched { .. }));
//! assert!(matches!(router.lookup(&Method::DELETE, "/orders/7"), RouteLookup::Matched { .. }));
//! assert!(matches!(router.lookup(&Method::GET, "/orders/7"), RouteLookup::MethodNotAllowed { .. }));
//! assert!(matches!(router.lookup(&Method::GET, "/users"), RouteLookup::NotFound));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use keystone_core::{BoxHandler, Handler, PathParams};

/// A node of the route tree.
pub struct Route {
    pattern: String,
    actions: HashMap<Method, BoxHandler>,
    sub_routes: Vec<Route>,
}

impl Route {
    /// Creates a route with no actions.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            actions: HashMap::new(),
            sub_routes: Vec::new(),
        }
    }

    /// Registers the handler for `method`, replacing any previous one.
    #[must_use]
    pub fn action(mut self, method: Method, handler: impl Handler) -> Self {
        self.actions.insert(method, Arc::new(handler));
        self
    }

    /// Adds a child route whose pattern is relative to this one.
    #[must_use]
    pub fn sub_route(mut self, route: Route) -> Self {
        self.sub_routes.push(route);
        self
    }

    /// Returns the pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.actions.keys().map(Method::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("methods", &methods)
            .field("sub_routes", &self.sub_routes)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

fn parse_segments(pattern: &str) -> Vec<PathSegment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => PathSegment::Param(name.to_string()),
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

fn join_patterns(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_matches('/');
    if child.is_empty() {
        if parent.is_empty() {
            "/".to_string()
        } else {
            parent.to_string()
        }
    } else {
        format!("{parent}/{child}")
    }
}

struct CompiledRoute {
    pattern: String,
    segments: Vec<PathSegment>,
    actions: HashMap<Method, BoxHandler>,
}

impl CompiledRoute {
    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Literal(_)))
            .count()
    }

    fn match_path(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(path) {
            match segment {
                PathSegment::Literal(expected) if expected.as_str() == *actual => {}
                PathSegment::Literal(_) => return None,
                PathSegment::Param(name) => {
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }
}

/// Outcome of routing a request.
pub enum RouteLookup<'a> {
    /// A handler was found.
    Matched {
        /// The selected handler.
        handler: &'a BoxHandler,
        /// Extracted path parameters.
        params: PathParams,
    },
    /// The path exists but not for this method.
    MethodNotAllowed {
        /// Methods registered for the path, sorted.
        allowed: Vec<Method>,
    },
    /// No route matches the path.
    NotFound,
}

/// Flattened routing table.
#[derive(Default)]
pub struct Router {
    routes: Vec<CompiledRoute>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a route tree into a router.
    #[must_use]
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut router = Self::new();
        for route in routes {
            router.mount("", route);
        }
        router
    }

    /// Adds a route tree under `prefix`.
    pub fn mount(&mut self, prefix: &str, route: Route) {
        let pattern = join_patterns(prefix, &route.pattern);

        for child in route.sub_routes {
            self.mount(&pattern, child);
        }

        if route.actions.is_empty() {
            return;
        }

        if let Some(existing) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            existing.actions.extend(route.actions);
            return;
        }

        self.routes.push(CompiledRoute {
            segments: parse_segments(&pattern),
            pattern,
            actions: route.actions,
        });
        // Stable sort keeps registration order among equally specific routes.
        self.routes
            .sort_by_key(|r| std::cmp::Reverse(r.literal_count()));
    }

    /// Returns the number of distinct patterns.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns the registered patterns.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
    }

    /// Routes a request by method and path.
    #[must_use]
    pub fn lookup(&self, method: &Method, path: &str) -> RouteLookup<'_> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.match_path(&segments) else {
                continue;
            };
            if let Some(handler) = route.actions.get(method) {
                return RouteLookup::Matched {
                    handler,
                    params: PathParams::new(params),
                };
            }
            for m in route.actions.keys() {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if allowed.is_empty() {
            RouteLookup::NotFound
        } else {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            RouteLookup::MethodNotAllowed { allowed }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}
