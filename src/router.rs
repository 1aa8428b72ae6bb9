//! Segment trie mapping `(method, path)` to handlers.
//!
//! Paths are split on `/` with empty segments dropped, so `/a//b/` and `a/b`
//! have the same shape. A segment written as `{name}` matches any single
//! segment and captures it under `name`; anything else matches literally.
//!
//! Each node has any number of literal children and at most one wildcard
//! child. Lookup prefers the literal child at every level and falls back to
//! the wildcard without backtracking, so two routes can never both match a
//! path.
//!
//! ```
//! use trellis::{Method, Request, Response, Router, Status};
//!
//! let mut router = Router::new();
//! router
//!     .get("/echo/{str}", |req: &Request| {
//!         Response::new(Status::Ok).with_body(req.param("str").unwrap_or_default())
//!     })
//!     .unwrap();
//!
//! let found = router.find(&Method::Get, "/echo/hi").ok().unwrap();
//! assert_eq!(found.params["str"], "hi");
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::RouteError;
use crate::http::{Method, PathParams, Request, Response};

/// A request handler bound to a route.
///
/// Any `Fn(&Request) -> Response` closure that is `Send + Sync` is a handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn call(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Index of a node in the router's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One parsed path segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Segment {
        match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(raw.to_string()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(text) => f.write_str(text),
            Segment::Param(name) => write!(f, "{{{}}}", name),
        }
    }
}

struct Node {
    /// `None` only for the root
    segment: Option<Segment>,
    handlers: HashMap<Method, Box<dyn Handler>>,
    literals: HashMap<String, NodeId>,
    wildcard: Option<NodeId>,
}

impl Node {
    fn new(segment: Option<Segment>) -> Self {
        Node {
            segment,
            handlers: HashMap::new(),
            literals: HashMap::new(),
            wildcard: None,
        }
    }

    fn param_name(&self) -> Option<&str> {
        match &self.segment {
            Some(Segment::Param(name)) => Some(name),
            _ => None,
        }
    }
}

/// The node a path resolved to, with its captured parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub node: NodeId,
    pub params: PathParams,
}

/// A handler resolved for a method and path.
pub struct Found<'r> {
    pub handler: &'r dyn Handler,
    pub params: PathParams,
}

impl fmt::Debug for Found<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Found")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Why a lookup produced no handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMiss {
    /// No registered path has this shape
    NotFound,
    /// The path shape exists but not for this method
    MethodNotAllowed,
}

/// Arena-backed route trie.
///
/// Built once before serving and only read afterwards, so it can be shared
/// behind an `Arc` without locking.
pub struct Router {
    nodes: Vec<Node>,
}

const ROOT: NodeId = NodeId(0);

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl Router {
    pub fn new() -> Self {
        Router {
            nodes: vec![Node::new(None)],
        }
    }

    /// Bind `handler` to `method` at `path`.
    ///
    /// # Errors
    /// - `DuplicateRoute` if `method` is already bound at this path shape
    /// - `ConflictingParam` if a wildcard with another name sits at one of
    ///   the positions this path passes through
    /// - `EmptyParamName` / `RepeatedParam` for malformed patterns
    ///
    /// The tree is left untouched when an error is returned.
    pub fn register<H>(&mut self, method: Method, path: &str, handler: H) -> Result<(), RouteError>
    where
        H: Handler,
    {
        let segments = Self::parse_pattern(path)?;

        let mut current = ROOT;
        for segment in segments {
            current = self.child_for(current, segment, path)?;
        }

        let node = &mut self.nodes[current.0];
        if node.handlers.contains_key(&method) {
            return Err(RouteError::DuplicateRoute {
                method,
                path: path.to_string(),
            });
        }
        node.handlers.insert(method, Box::new(handler));
        Ok(())
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.register(Method::Get, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.register(Method::Post, path, handler)
    }

    fn parse_pattern(path: &str) -> Result<Vec<Segment>, RouteError> {
        let mut segments = Vec::new();
        for raw in split_path(path) {
            let segment = Segment::parse(raw);
            if let Segment::Param(name) = &segment {
                if name.is_empty() {
                    return Err(RouteError::EmptyParamName {
                        path: path.to_string(),
                    });
                }
                let repeated = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(other) if other == name));
                if repeated {
                    return Err(RouteError::RepeatedParam {
                        name: name.clone(),
                        path: path.to_string(),
                    });
                }
            }
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Find or create the child of `parent` for `segment`.
    ///
    /// Conflicts can only be found on existing nodes, and a freshly created
    /// node has no children, so an error is always raised before any node
    /// is added.
    fn child_for(&mut self, parent: NodeId, segment: Segment, path: &str) -> Result<NodeId, RouteError> {
        let existing = match &segment {
            Segment::Literal(text) => self.nodes[parent.0].literals.get(text).copied(),
            Segment::Param(name) => match self.nodes[parent.0].wildcard {
                Some(id) => {
                    let existing = self.nodes[id.0].param_name().unwrap_or_default();
                    if existing != name.as_str() {
                        return Err(RouteError::ConflictingParam {
                            existing: existing.to_string(),
                            requested: name.clone(),
                            path: path.to_string(),
                        });
                    }
                    Some(id)
                }
                None => None,
            },
        };
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = NodeId(self.nodes.len());
        match &segment {
            Segment::Literal(text) => {
                self.nodes[parent.0].literals.insert(text.clone(), id);
            }
            Segment::Param(_) => self.nodes[parent.0].wildcard = Some(id),
        }
        self.nodes.push(Node::new(Some(segment)));
        Ok(id)
    }

    /// Resolve `path` to a node, capturing wildcard segments along the way.
    pub fn match_path(&self, path: &str) -> Option<PathMatch> {
        let mut params = PathParams::new();
        let mut current = ROOT;

        for segment in split_path(path) {
            let node = &self.nodes[current.0];
            current = match node.literals.get(segment) {
                Some(&id) => id,
                None => {
                    let id = node.wildcard?;
                    if let Some(name) = self.nodes[id.0].param_name() {
                        params.insert(name.to_string(), segment.to_string());
                    }
                    id
                }
            };
        }

        Some(PathMatch {
            node: current,
            params,
        })
    }

    /// Resolve the handler for `method` at `path`.
    pub fn find(&self, method: &Method, path: &str) -> Result<Found<'_>, RouteMiss> {
        let PathMatch { node, params } = self.match_path(path).ok_or(RouteMiss::NotFound)?;
        let handler = self.nodes[node.0]
            .handlers
            .get(method)
            .ok_or(RouteMiss::MethodNotAllowed)?;

        Ok(Found {
            handler: handler.as_ref(),
            params,
        })
    }

    /// Methods bound at `node`, sorted by name.
    pub fn methods_at(&self, node: NodeId) -> Vec<&Method> {
        let mut methods: Vec<_> = self
            .nodes
            .get(node.0)
            .map(|node| node.handlers.keys().collect())
            .unwrap_or_default();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let node = &self.nodes[id.0];
        let indent = "  ".repeat(depth);
        match &node.segment {
            Some(segment) => write!(f, "{}{}", indent, segment)?,
            None => write!(f, "{}/", indent)?,
        }

        let methods = self.methods_at(id);
        if !methods.is_empty() {
            let names: Vec<_> = methods.iter().map(|m| m.as_str()).collect();
            write!(f, " [{}]", names.join(", "))?;
        }
        writeln!(f)?;

        let mut literals: Vec<_> = node.literals.iter().collect();
        literals.sort_by(|a, b| a.0.cmp(b.0));
        for (_, &child) in literals {
            self.write_node(f, child, depth + 1)?;
        }
        if let Some(child) = node.wildcard {
            self.write_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the tree one node per line, indented by depth, with the bound
/// methods in brackets.
impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, ROOT, 0)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
