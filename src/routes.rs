//! Ordered route registration.
//!
//! Controllers register routes in order and lookups try them in that order.
//! A catch-all (`*`) may be registered at any point but is held back and
//! appended when the table is finalised, so it can never shadow a route
//! registered after it.
//!
//! ```text
//! register GET /cart          → /shop/cart
//! register *   *              → (held)
//! register GET /cart/:id      → /shop/cart/:id
//! finalize                    → [/shop/cart, /shop/cart/:id, /shop/*]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouteError {
    #[error("route table is finalized; cannot register {0}")]
    Finalized(String),
    #[error("invalid route pattern \"{0}\": patterns start with '/' or are \"*\"")]
    InvalidPattern(String),
    #[error("unknown HTTP method \"{0}\"")]
    UnknownMethod(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Any,
}

impl Method {
    pub fn parse(s: &str) -> Result<Self, RouteError> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "*" | "ANY" | "ALL" => Ok(Method::Any),
            _ => Err(RouteError::UnknownMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Any => "*",
        }
    }

    fn matches(&self, other: Method) -> bool {
        *self == Method::Any || *self == other
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    /// Full pattern, route prefix included.
    pub pattern: String,
    /// Name of the controller that registered the route.
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    prefix: String,
    routes: Vec<Route>,
    held: Vec<Route>,
    finalized: bool,
}

impl RouteTable {
    /// `prefix` is a normalised route prefix: empty or `/name`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn register(&mut self, method: Method, pattern: &str, handler: &str) -> Result<&mut Self, RouteError> {
        if self.finalized {
            return Err(RouteError::Finalized(format!("{method} {pattern}")));
        }
        let catch_all = pattern == "*";
        if !catch_all && !pattern.starts_with('/') {
            return Err(RouteError::InvalidPattern(pattern.to_string()));
        }
        let route = Route {
            method,
            pattern: self.prefixed(if catch_all { "/*" } else { pattern }),
            handler: handler.to_string(),
        };
        if catch_all {
            self.held.push(route);
        } else {
            self.routes.push(route);
        }
        Ok(self)
    }

    fn prefixed(&self, pattern: &str) -> String {
        match (self.prefix.is_empty(), pattern) {
            (true, _) => pattern.to_string(),
            (false, "/") => self.prefix.clone(),
            (false, _) => format!("{}{pattern}", self.prefix),
        }
    }

    /// Append held catch-all routes and close the table.
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.routes.append(&mut self.held);
            self.finalized = true;
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Registered routes in lookup order. Catch-alls appear only once the
    /// table is finalised.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The first route matching `method` and `path`.
    pub fn find(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            if !route.method.matches(method) {
                return None;
            }
            match_pattern(&route.pattern, path).map(|params| RouteMatch { route, params })
        })
    }
}

/// Match `/a/:id/*` style patterns. Empty segments are ignored.
fn match_pattern(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    for part in pattern.split('/').filter(|s| !s.is_empty()) {
        if part == "*" {
            return Some(params);
        }
        let segment = segments.next()?;
        match part.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_string(), segment.to_string());
            }
            None if part == segment => {}
            None => return None,
        }
    }
    segments.next().is_none().then_some(params)
}
