//! Host and path matching of inbound requests to API endpoints
//!
//! Hosts match `*` (any), `*.example.com` (any subdomain) or an exact name,
//! ignoring case and port. Paths are literal prefixes: `/foo` matches `/foo`
//! and `/foo/...` but not `/foobar`; a trailing `*` (`/foo*`, `/foo/*`) drops
//! the segment boundary check, and `*` alone matches every path. Among all
//! matching endpoints the longest literal prefix wins, and ties go to the
//! endpoint configured first.

use super::BuildError;
use crate::config::ApiEndpointConfig;
use http::Method;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum HostPattern {
    Any,
    /// Suffix including the leading dot, e.g. `.example.com`
    Subdomain(String),
    Exact(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" {
            Self::Any
        } else if let Some(domain) = pattern.strip_prefix("*.") {
            Self::Subdomain(format!(".{domain}"))
        } else {
            Self::Exact(normalize_host(&pattern))
        }
    }

    /// `host` must already be normalized with [`normalize_host`]
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Subdomain(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
            Self::Exact(expected) => host == expected.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    prefix: String,
    segment_boundary: bool,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self {
                prefix: prefix.to_string(),
                segment_boundary: false,
            },
            None => Self {
                prefix: pattern.to_string(),
                segment_boundary: true,
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        if !path.starts_with(&self.prefix) {
            return false;
        }
        if !self.segment_boundary || self.prefix.ends_with('/') {
            return true;
        }
        path.len() == self.prefix.len() || path.as_bytes()[self.prefix.len()] == b'/'
    }
}

/// A configured API endpoint with its patterns compiled
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEndpoint {
    pub name: String,
    host: HostPattern,
    paths: Vec<PathPattern>,
    methods: Vec<Method>,
    /// Scopes a token must carry to reach this endpoint
    pub scopes: Vec<String>,
}

impl ApiEndpoint {
    pub fn from_config(config: &ApiEndpointConfig) -> Result<Self, BuildError> {
        if config.paths.is_empty() {
            return Err(BuildError::InvalidEndpoint {
                endpoint: config.name.clone(),
                reason: "at least one path is required".to_string(),
            });
        }

        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_str(&m.to_ascii_uppercase()).map_err(|_| BuildError::InvalidEndpoint {
                    endpoint: config.name.clone(),
                    reason: format!("invalid method '{m}'"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            host: HostPattern::parse(&config.host),
            paths: config.paths.iter().map(|p| PathPattern::parse(p)).collect(),
            methods,
            scopes: config.scopes.clone(),
        })
    }

    /// The longest matching path pattern, if host and method also match
    fn match_request(&self, host: &str, path: &str, method: &Method) -> Option<&PathPattern> {
        if !self.host.matches(host) {
            return None;
        }
        if !self.methods.is_empty() && !self.methods.contains(method) {
            return None;
        }
        self.paths
            .iter()
            .filter(|pattern| pattern.matches(path))
            .max_by_key(|pattern| pattern.prefix.len())
    }
}

/// Result of a successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub endpoint: Arc<ApiEndpoint>,
    pub matched_prefix: String,
    /// Index of the pipeline bound to the endpoint
    pub pipeline: usize,
}

#[derive(Debug)]
struct Route {
    endpoint: Arc<ApiEndpoint>,
    pipeline: usize,
}

/// Immutable routing table, in configuration order
#[derive(Debug, Default)]
pub struct EndpointMatcher {
    routes: Vec<Route>,
}

impl EndpointMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, endpoint: Arc<ApiEndpoint>, pipeline: usize) {
        self.routes.push(Route { endpoint, pipeline });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn resolve(&self, host: &str, path: &str, method: &Method) -> Option<RouteMatch> {
        let host = normalize_host(host);
        let mut best: Option<(&Route, &PathPattern)> = None;

        for route in &self.routes {
            let Some(pattern) = route.endpoint.match_request(&host, path, method) else {
                continue;
            };
            // Strictly longer only, so the earlier route keeps ties
            let better = match best {
                Some((_, current)) => pattern.prefix.len() > current.prefix.len(),
                None => true,
            };
            if better {
                best = Some((route, pattern));
            }
        }

        best.map(|(route, pattern)| RouteMatch {
            endpoint: route.endpoint.clone(),
            matched_prefix: pattern.prefix.clone(),
            pipeline: route.pipeline,
        })
    }
}

/// Lowercases a host and strips any port, keeping IPv6 brackets
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if raw.starts_with('[') {
        match raw.find(']') {
            Some(end) => &raw[..=end],
            None => raw,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, host: &str, paths: &[&str], methods: &[&str]) -> Arc<ApiEndpoint> {
        Arc::new(
            ApiEndpoint::from_config(&ApiEndpointConfig {
                name: name.to_string(),
                host: host.to_string(),
                paths: paths.iter().map(|p| p.to_string()).collect(),
                methods: methods.iter().map(|m| m.to_string()).collect(),
                scopes: Vec::new(),
            })
            .unwrap(),
        )
    }

    fn resolve_name(matcher: &EndpointMatcher, host: &str, path: &str) -> Option<String> {
        matcher
            .resolve(host, path, &Method::GET)
            .map(|m| m.endpoint.name.clone())
    }

    #[test]
    fn test_host_patterns() {
        assert!(HostPattern::parse("*").matches("anything.local"));

        let sub = HostPattern::parse("*.Example.com");
        assert!(sub.matches("api.example.com"));
        assert!(sub.matches("a.b.example.com"));
        assert!(!sub.matches("example.com"));
        assert!(!sub.matches("badexample.com"));

        let exact = HostPattern::parse("API.example.com");
        assert!(exact.matches("api.example.com"));
        assert!(!exact.matches("www.example.com"));
    }

    #[test]
    fn test_path_segment_boundary() {
        let pattern = PathPattern::parse("/foo");
        assert!(pattern.matches("/foo"));
        assert!(pattern.matches("/foo/bar"));
        assert!(!pattern.matches("/foobar"));
        assert!(!pattern.matches("/fo"));

        let raw = PathPattern::parse("/foo*");
        assert!(raw.matches("/foobar"));

        let slash = PathPattern::parse("/foo/*");
        assert!(slash.matches("/foo/bar"));
        assert!(!slash.matches("/foo"));

        let root = PathPattern::parse("/");
        assert!(root.matches("/anything"));

        let all = PathPattern::parse("*");
        assert_eq!(all.prefix(), "");
        assert!(all.matches("/whatever"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut matcher = EndpointMatcher::new();
        matcher.add(endpoint("catchall", "*", &["*"], &[]), 0);
        matcher.add(endpoint("api", "*", &["/api"], &[]), 1);
        matcher.add(endpoint("users", "*", &["/api/users"], &[]), 2);

        assert_eq!(resolve_name(&matcher, "localhost", "/api/users/7").as_deref(), Some("users"));
        assert_eq!(resolve_name(&matcher, "localhost", "/api/orders").as_deref(), Some("api"));
        assert_eq!(resolve_name(&matcher, "localhost", "/other").as_deref(), Some("catchall"));

        let found = matcher.resolve("localhost", "/api/users", &Method::GET).unwrap();
        assert_eq!(found.matched_prefix, "/api/users");
        assert_eq!(found.pipeline, 2);
    }

    #[test]
    fn test_ties_go_to_configuration_order() {
        let mut matcher = EndpointMatcher::new();
        matcher.add(endpoint("first", "*", &["/same"], &[]), 0);
        matcher.add(endpoint("second", "*.example.com", &["/same"], &[]), 1);

        for _ in 0..10 {
            assert_eq!(
                resolve_name(&matcher, "api.example.com", "/same").as_deref(),
                Some("first")
            );
        }
    }

    #[test]
    fn test_host_and_method_filters() {
        let mut matcher = EndpointMatcher::new();
        matcher.add(endpoint("read", "api.example.com:8443", &["/items"], &["get"]), 0);

        assert!(matcher
            .resolve("API.example.com:8443", "/items", &Method::GET)
            .is_some());
        assert!(matcher
            .resolve("api.example.com", "/items", &Method::POST)
            .is_none());
        assert!(matcher
            .resolve("other.example.com", "/items", &Method::GET)
            .is_none());
    }

    #[test]
    fn test_no_match() {
        let mut matcher = EndpointMatcher::new();
        matcher.add(endpoint("api", "*", &["/api"], &[]), 0);
        assert!(resolve_name(&matcher, "localhost", "/nope").is_none());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.COM:8080"), "example.com");
        assert_eq!(normalize_host("localhost"), "localhost");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
    }

    #[test]
    fn test_invalid_endpoint_config() {
        let result = ApiEndpoint::from_config(&ApiEndpointConfig {
            name: "empty".to_string(),
            host: "*".to_string(),
            paths: Vec::new(),
            methods: Vec::new(),
            scopes: Vec::new(),
        });
        assert!(matches!(result, Err(BuildError::InvalidEndpoint { .. })));

        let result = ApiEndpoint::from_config(&ApiEndpointConfig {
            name: "bad-method".to_string(),
            host: "*".to_string(),
            paths: vec!["/x".to_string()],
            methods: vec!["GE T".to_string()],
            scopes: Vec::new(),
        });
        assert!(matches!(result, Err(BuildError::InvalidEndpoint { .. })));
    }
}
