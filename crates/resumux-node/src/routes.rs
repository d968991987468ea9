//! Static route table.
//!
//! Requests name their route in UTF-8 metadata. Routes are `.`-separated
//! segments; a `{name}` segment matches any single segment and captures it.
//! An exact literal registration always wins over a pattern, and patterns
//! are tried in registration order.

use std::collections::HashMap;

use thiserror::Error;

/// Route table construction failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Two registrations match exactly the same routes
    #[error("route {0:?} is already registered")]
    Duplicate(String),

    /// Empty route or empty segment
    #[error("route {0:?} has an empty segment")]
    EmptySegment(String),

    /// Unbalanced or nested braces, or an empty capture name
    #[error("route {0:?} has a malformed capture")]
    MalformedCapture(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

impl Segment {
    fn parse(pattern: &str, raw: &str) -> Result<Self, RouteError> {
        if raw.is_empty() {
            return Err(RouteError::EmptySegment(pattern.to_string()));
        }
        match raw.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            Some(name) if !name.is_empty() && !name.contains(['{', '}']) => Ok(Self::Capture(name.to_string())),
            Some(_) => Err(RouteError::MalformedCapture(pattern.to_string())),
            None if raw.contains(['{', '}']) => Err(RouteError::MalformedCapture(pattern.to_string())),
            None => Ok(Self::Literal(raw.to_string())),
        }
    }
}

#[derive(Debug)]
struct Pattern<H> {
    source: String,
    segments: Vec<Segment>,
    handler: H,
}

impl<H> Pattern<H> {
    /// Shape with capture names erased, for duplicate detection.
    fn shape(&self) -> Vec<Option<&str>> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Capture(_) => None,
            })
            .collect()
    }

    fn matches(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captures = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(text) if text == part => {},
                Segment::Literal(_) => return None,
                Segment::Capture(name) => {
                    captures.insert(name.clone(), (*part).to_string());
                },
            }
        }
        Some(captures)
    }
}

/// A resolved route: the handler and the captured segments.
#[derive(Debug)]
pub struct Resolved<'a, H> {
    /// Handler registered for the route
    pub handler: &'a H,
    /// Values of `{name}` segments, by name
    pub captures: HashMap<String, String>,
}

impl<H> Resolved<'_, H> {
    /// Captured value for `name`.
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// Immutable mapping from route strings to handlers.
#[derive(Debug)]
pub struct RouteTable<H> {
    literals: HashMap<String, H>,
    patterns: Vec<Pattern<H>>,
}

impl<H> RouteTable<H> {
    /// Start building a table.
    pub fn builder() -> RouteTableBuilder<H> {
        RouteTableBuilder { routes: Vec::new() }
    }

    /// Find the handler for `route`.
    pub fn resolve(&self, route: &str) -> Option<Resolved<'_, H>> {
        if let Some(handler) = self.literals.get(route) {
            return Some(Resolved { handler, captures: HashMap::new() });
        }
        let parts: Vec<&str> = route.split('.').collect();
        self.patterns.iter().find_map(|pattern| {
            pattern.matches(&parts).map(|captures| Resolved { handler: &pattern.handler, captures })
        })
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.literals.len() + self.patterns.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered route patterns, literals first.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.literals.keys().map(String::as_str).chain(self.patterns.iter().map(|pattern| pattern.source.as_str()))
    }
}

/// Collects registrations; validation happens in [`Self::build`].
#[derive(Debug)]
pub struct RouteTableBuilder<H> {
    routes: Vec<(String, H)>,
}

impl<H> RouteTableBuilder<H> {
    /// Register `handler` for `pattern`.
    #[must_use]
    pub fn route(mut self, pattern: impl Into<String>, handler: H) -> Self {
        self.routes.push((pattern.into(), handler));
        self
    }

    /// Validate every pattern and freeze the table.
    pub fn build(self) -> Result<RouteTable<H>, RouteError> {
        let mut table = RouteTable { literals: HashMap::new(), patterns: Vec::new() };

        for (source, handler) in self.routes {
            let segments =
                source.split('.').map(|raw| Segment::parse(&source, raw)).collect::<Result<Vec<_>, _>>()?;

            if segments.iter().all(|segment| matches!(segment, Segment::Literal(_))) {
                if table.literals.contains_key(&source) {
                    return Err(RouteError::Duplicate(source));
                }
                table.literals.insert(source, handler);
                continue;
            }

            let pattern = Pattern { source, segments, handler };
            if table.patterns.iter().any(|existing| existing.shape() == pattern.shape()) {
                return Err(RouteError::Duplicate(pattern.source));
            }
            table.patterns.push(pattern);
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable<&'static str> {
        RouteTable::builder()
            .route("echo", "echo")
            .route("count.{n}", "count")
            .route("count.all", "count-all")
            .route("user.{id}.events.{kind}", "events")
            .build()
            .unwrap()
    }

    #[test]
    fn literal_route_resolves_without_captures() {
        let table = table();
        let resolved = table.resolve("echo").unwrap();
        assert_eq!(*resolved.handler, "echo");
        assert!(resolved.captures.is_empty());
    }

    #[test]
    fn pattern_captures_segments() {
        let table = table();
        let resolved = table.resolve("count.12").unwrap();
        assert_eq!(*resolved.handler, "count");
        assert_eq!(resolved.capture("n"), Some("12"));

        let resolved = table.resolve("user.7.events.login").unwrap();
        assert_eq!(resolved.capture("id"), Some("7"));
        assert_eq!(resolved.capture("kind"), Some("login"));
    }

    #[test]
    fn literal_beats_pattern_regardless_of_order() {
        let table = table();
        assert_eq!(*table.resolve("count.all").unwrap().handler, "count-all");
    }

    #[test]
    fn unmatched_routes_resolve_to_nothing() {
        let table = table();
        assert!(table.resolve("count").is_none());
        assert!(table.resolve("count.1.2").is_none());
        assert!(table.resolve("nope").is_none());
        assert!(table.resolve("").is_none());
    }

    #[test]
    fn duplicates_are_rejected() {
        let literal = RouteTable::builder().route("echo", 1).route("echo", 2).build();
        assert_eq!(literal.unwrap_err(), RouteError::Duplicate("echo".to_string()));

        let pattern = RouteTable::builder().route("count.{n}", 1).route("count.{m}", 2).build();
        assert_eq!(pattern.unwrap_err(), RouteError::Duplicate("count.{m}".to_string()));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(matches!(RouteTable::builder().route("a..b", ()).build(), Err(RouteError::EmptySegment(_))));
        assert!(matches!(RouteTable::builder().route("", ()).build(), Err(RouteError::EmptySegment(_))));
        assert!(matches!(RouteTable::builder().route("a.{}", ()).build(), Err(RouteError::MalformedCapture(_))));
        assert!(matches!(RouteTable::builder().route("a.{b", ()).build(), Err(RouteError::MalformedCapture(_))));
        assert!(matches!(RouteTable::builder().route("a.x{b}", ()).build(), Err(RouteError::MalformedCapture(_))));
    }

    #[test]
    fn len_counts_both_kinds() {
        let table = table();
        assert_eq!(table.len(), 4);
        assert!(!table.is_empty());
        assert_eq!(table.routes().count(), 4);
    }
}
