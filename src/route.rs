// src/route.rs
//
// Route resolution core: three disjoint tries instead of the source's
// single unified tree (`RouteNode` with `is_param`/`is_wildcard` children).
// Splitting them lets each trie use the traversal strategy suited to its
// key shape, and makes the match-precedence order (literal, then
// parameterized, then dynamic-prefix) an explicit property of
// `RouteRegistry::resolve` rather than something buried in recursive
// backtracking.
//
// Each trie is behind its own `RwLock`: registration (rare, usually only
// at startup) takes a write lock; resolution (hot path, every request)
// takes a read lock. `std::sync::RwLock` already gives concurrent readers
// with an exclusive writer, which is what spec.md's "optimistic read,
// write under exclusive lock" concurrency discipline actually wants —
// there's no need to hand-roll a seqlock on top of it.

use crate::error::ChopinError;
use crate::handler_pool::HandlerPool;
use crate::parser::Method;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A registered route's bound handler pool plus enough metadata for the
/// dispatcher to decide what kind of response to build.
pub struct RouteEntry {
    pub method: Method,
    pub pattern: String,
    pub is_websocket: bool,
    pub pool: Arc<HandlerPool>,
    /// Set by `RouteRegistry::register_redirect`; the dispatcher answers
    /// these routes with a 302 directly, without acquiring a handler.
    pub redirect_to: Option<String>,
}

/// Parameters captured during a successful trie match, plus the route's
/// full original pattern (used for diagnostics and for `redirect()`).
pub struct Matched {
    pub entry: Arc<RouteEntry>,
    pub params: HashMap<String, String>,
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn classify(path: &str) -> RouteClass {
    if path == "/*" || path.ends_with("/*") {
        RouteClass::Dynamic
    } else if path.split('/').any(|seg| seg.starts_with(':')) {
        RouteClass::Parameterized
    } else {
        RouteClass::Literal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Literal,
    Parameterized,
    Dynamic,
}

// ---------------------------------------------------------------------
// Literal trie: exact `METHOD:path` key, character-edge trie with sorted
// (binary-searched) children — no segment splitting, no parameters.
// ---------------------------------------------------------------------

struct LiteralNode {
    byte: u8,
    children: Vec<LiteralNode>,
    entry: Option<Arc<RouteEntry>>,
}

impl LiteralNode {
    fn root() -> Self {
        Self { byte: 0, children: Vec::new(), entry: None }
    }

    fn child_idx(&self, byte: u8) -> Result<usize, usize> {
        self.children.binary_search_by_key(&byte, |c| c.byte)
    }

    fn insert(&mut self, key: &[u8], entry: Arc<RouteEntry>) -> Result<(), ChopinError> {
        let mut node = self;
        for &b in key {
            match node.child_idx(b) {
                Ok(idx) => node = &mut node.children[idx],
                Err(idx) => {
                    node.children.insert(idx, LiteralNode { byte: b, children: Vec::new(), entry: None });
                    node = &mut node.children[idx];
                }
            }
        }
        if node.entry.is_some() {
            return Err(ChopinError::DuplicateRoute(String::from_utf8_lossy(key).into_owned()));
        }
        node.entry = Some(entry);
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        let mut node = self;
        for &b in key {
            match node.child_idx(b) {
                Ok(idx) => node = &mut node.children[idx],
                Err(_) => return false,
            }
        }
        node.entry.take().is_some()
    }

    fn lookup(&self, key: &[u8]) -> Option<&Arc<RouteEntry>> {
        let mut node = self;
        for &b in key {
            match node.child_idx(b) {
                Ok(idx) => node = &node.children[idx],
                Err(_) => return None,
            }
        }
        node.entry.as_ref()
    }
}

struct LiteralTrie {
    root: LiteralNode,
}

impl LiteralTrie {
    fn new() -> Self {
        Self { root: LiteralNode::root() }
    }

    fn key(method: Method, path: &str) -> Vec<u8> {
        let mut k = method.as_str().as_bytes().to_vec();
        k.push(b':');
        k.extend_from_slice(path.as_bytes());
        k
    }

    fn insert(&mut self, method: Method, path: &str, entry: Arc<RouteEntry>) -> Result<(), ChopinError> {
        self.root.insert(&Self::key(method, path), entry)
    }

    fn remove(&mut self, method: Method, path: &str) -> bool {
        self.root.remove(&Self::key(method, path))
    }

    fn lookup(&self, method: Method, path: &str) -> Option<&Arc<RouteEntry>> {
        self.root.lookup(&Self::key(method, path))
    }
}

// ---------------------------------------------------------------------
// Parameterized trie: segment-keyed, literal children in a map, `:name`
// children tried in insertion order after literal children fail.
// ---------------------------------------------------------------------

struct ParamNode {
    literal_children: HashMap<String, ParamNode>,
    param_children: Vec<(String, ParamNode)>,
    handlers: HashMap<Method, Arc<RouteEntry>>,
}

impl ParamNode {
    fn new() -> Self {
        Self { literal_children: HashMap::new(), param_children: Vec::new(), handlers: HashMap::new() }
    }
}

struct ParamTrie {
    root: ParamNode,
}

impl ParamTrie {
    fn new() -> Self {
        Self { root: ParamNode::new() }
    }

    fn insert(&mut self, method: Method, path: &str, entry: Arc<RouteEntry>) -> Result<(), ChopinError> {
        let segments = split_segments(path);
        let mut node = &mut self.root;
        for seg in &segments {
            if let Some(name) = seg.strip_prefix(':') {
                let idx = node.param_children.iter().position(|(n, _)| n == name);
                let idx = match idx {
                    Some(i) => i,
                    None => {
                        node.param_children.push((name.to_string(), ParamNode::new()));
                        node.param_children.len() - 1
                    }
                };
                node = &mut node.param_children[idx].1;
            } else {
                node = node
                    .literal_children
                    .entry(seg.to_string())
                    .or_insert_with(ParamNode::new);
            }
        }
        if node.handlers.contains_key(&method) {
            return Err(ChopinError::DuplicateRoute(path.to_string()));
        }
        node.handlers.insert(method, entry);
        Ok(())
    }

    fn remove(&mut self, method: Method, path: &str) -> bool {
        let segments = split_segments(path);
        let mut node = &mut self.root;
        for seg in &segments {
            if let Some(name) = seg.strip_prefix(':') {
                match node.param_children.iter().position(|(n, _)| n == name) {
                    Some(i) => node = &mut node.param_children[i].1,
                    None => return false,
                }
            } else {
                match node.literal_children.get_mut(*seg) {
                    Some(n) => node = n,
                    None => return false,
                }
            }
        }
        node.handlers.remove(&method).is_some()
    }

    fn lookup(&self, method: Method, path: &str) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let segments = split_segments(path);
        let mut params = HashMap::new();
        Self::walk(&self.root, method, &segments, 0, &mut params)
            .map(|entry| (entry, params.clone()))
    }

    fn walk(
        node: &ParamNode,
        method: Method,
        segments: &[&str],
        depth: usize,
        params: &mut HashMap<String, String>,
    ) -> Option<Arc<RouteEntry>> {
        if depth == segments.len() {
            return node.handlers.get(&method).cloned();
        }
        let seg = segments[depth];

        if let Some(child) = node.literal_children.get(seg) {
            if let Some(found) = Self::walk(child, method, segments, depth + 1, params) {
                return Some(found);
            }
        }

        for (name, child) in &node.param_children {
            params.insert(name.clone(), seg.to_string());
            if let Some(found) = Self::walk(child, method, segments, depth + 1, params) {
                return Some(found);
            }
            params.remove(name);
        }

        None
    }
}

// ---------------------------------------------------------------------
// Dynamic-prefix trie: routes registered as `/some/prefix/*`. Longest
// matching literal prefix wins; the unmatched tail is bound to `path`.
// ---------------------------------------------------------------------

struct DynamicNode {
    literal_children: HashMap<String, DynamicNode>,
    handlers: HashMap<Method, Arc<RouteEntry>>,
}

impl DynamicNode {
    fn new() -> Self {
        Self { literal_children: HashMap::new(), handlers: HashMap::new() }
    }
}

struct DynamicTrie {
    root: DynamicNode,
}

impl DynamicTrie {
    fn new() -> Self {
        Self { root: DynamicNode::new() }
    }

    fn prefix_segments(path: &str) -> Vec<&str> {
        let trimmed = path.strip_suffix("/*").or_else(|| path.strip_suffix('*')).unwrap_or(path);
        split_segments(trimmed)
    }

    fn insert(&mut self, method: Method, path: &str, entry: Arc<RouteEntry>) -> Result<(), ChopinError> {
        let segments = Self::prefix_segments(path);
        let mut node = &mut self.root;
        for seg in segments {
            node = node.literal_children.entry(seg.to_string()).or_insert_with(DynamicNode::new);
        }
        if node.handlers.contains_key(&method) {
            return Err(ChopinError::DuplicateRoute(path.to_string()));
        }
        node.handlers.insert(method, entry);
        Ok(())
    }

    fn remove(&mut self, method: Method, path: &str) -> bool {
        let segments = Self::prefix_segments(path);
        let mut node = &mut self.root;
        for seg in segments {
            match node.literal_children.get_mut(seg) {
                Some(n) => node = n,
                None => return false,
            }
        }
        node.handlers.remove(&method).is_some()
    }

    /// Walks as deep as literal segments allow, remembering the deepest
    /// node seen with a handler for `method` — since traversal only ever
    /// goes deeper, the last recorded candidate is the longest match.
    fn lookup(&self, method: Method, path: &str) -> Option<(Arc<RouteEntry>, HashMap<String, String>)> {
        let segments = split_segments(path);
        let mut node = &self.root;
        let mut best: Option<(Arc<RouteEntry>, usize)> = None;

        if let Some(entry) = node.handlers.get(&method) {
            best = Some((entry.clone(), 0));
        }
        for (depth, seg) in segments.iter().enumerate() {
            match node.literal_children.get(*seg) {
                Some(child) => {
                    node = child;
                    if let Some(entry) = node.handlers.get(&method) {
                        best = Some((entry.clone(), depth + 1));
                    }
                }
                None => break,
            }
        }

        best.map(|(entry, matched_depth)| {
            let tail = segments[matched_depth..].join("/");
            let mut params = HashMap::new();
            params.insert("path".to_string(), tail);
            (entry, params)
        })
    }
}

// ---------------------------------------------------------------------
// Registry facade: method-aware precedence — literal, then
// parameterized, then dynamic-prefix. A registered route never falls
// back across methods (a 405 is surfaced by the dispatcher as
// `Unmatched`, identical to a 404 at this layer).
// ---------------------------------------------------------------------

pub struct RouteRegistry {
    literal: RwLock<LiteralTrie>,
    param: RwLock<ParamTrie>,
    dynamic: RwLock<DynamicTrie>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            literal: RwLock::new(LiteralTrie::new()),
            param: RwLock::new(ParamTrie::new()),
            dynamic: RwLock::new(DynamicTrie::new()),
        }
    }

    pub fn register(
        &self,
        method: Method,
        path: &str,
        pool: Arc<HandlerPool>,
        is_websocket: bool,
    ) -> Result<(), ChopinError> {
        let entry = Arc::new(RouteEntry { method, pattern: path.to_string(), is_websocket, pool, redirect_to: None });
        match classify(path) {
            RouteClass::Literal => self.literal.write().unwrap().insert(method, path, entry),
            RouteClass::Parameterized => self.param.write().unwrap().insert(method, path, entry),
            RouteClass::Dynamic => self.dynamic.write().unwrap().insert(method, path, entry),
        }
    }

    /// Installs a handler-free redirect route: the dispatcher answers it
    /// with a 302 and `Location: to` directly, per spec.md §6's
    /// `redirect(from, to, method=GET)`.
    pub fn register_redirect(
        &self,
        method: Method,
        from: &str,
        to: &str,
        pool: Arc<HandlerPool>,
    ) -> Result<(), ChopinError> {
        let entry = Arc::new(RouteEntry {
            method,
            pattern: from.to_string(),
            is_websocket: false,
            pool,
            redirect_to: Some(to.to_string()),
        });
        match classify(from) {
            RouteClass::Literal => self.literal.write().unwrap().insert(method, from, entry),
            RouteClass::Parameterized => self.param.write().unwrap().insert(method, from, entry),
            RouteClass::Dynamic => self.dynamic.write().unwrap().insert(method, from, entry),
        }
    }

    pub fn unregister(&self, method: Method, path: &str) -> bool {
        match classify(path) {
            RouteClass::Literal => self.literal.write().unwrap().remove(method, path),
            RouteClass::Parameterized => self.param.write().unwrap().remove(method, path),
            RouteClass::Dynamic => self.dynamic.write().unwrap().remove(method, path),
        }
    }

    pub fn resolve(&self, method: Method, path: &str) -> Option<Matched> {
        if let Some(entry) = self.literal.read().unwrap().lookup(method, path) {
            return Some(Matched { entry: entry.clone(), params: HashMap::new() });
        }
        if let Some((entry, params)) = self.param.read().unwrap().lookup(method, path) {
            return Some(Matched { entry, params });
        }
        if let Some((entry, params)) = self.dynamic.read().unwrap().lookup(method, path) {
            return Some(Matched { entry, params });
        }
        None
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_pool::{Handler, HandlerOutcome};
    use crate::http::Request;

    struct NoopHandler;
    impl Handler for NoopHandler {
        fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
            Ok(HandlerOutcome::Empty)
        }
    }
    fn make_noop() -> Box<dyn Handler> {
        Box::new(NoopHandler)
    }
    fn pool() -> Arc<HandlerPool> {
        Arc::new(HandlerPool::new(make_noop, 1, 1, 4))
    }

    #[test]
    fn literal_route_matches_exact_path_only() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/hello/world", pool(), false).unwrap();
        assert!(reg.resolve(Method::Get, "/hello/world").is_some());
        assert!(reg.resolve(Method::Get, "/hello").is_none());
        assert!(reg.resolve(Method::Post, "/hello/world").is_none());
    }

    #[test]
    fn parameterized_route_binds_segment_values() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/users/:id", pool(), false).unwrap();
        reg.register(Method::Post, "/users/:id/posts/:post_id", pool(), false).unwrap();

        let m = reg.resolve(Method::Get, "/users/123").unwrap();
        assert_eq!(m.params.get("id").map(String::as_str), Some("123"));

        let m2 = reg.resolve(Method::Post, "/users/123/posts/abc").unwrap();
        assert_eq!(m2.params.get("id").map(String::as_str), Some("123"));
        assert_eq!(m2.params.get("post_id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn dynamic_prefix_matches_longest_registered_prefix() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/assets/*", pool(), false).unwrap();
        reg.register(Method::Get, "/assets/js/*", pool(), false).unwrap();

        let m = reg.resolve(Method::Get, "/assets/js/app.js").unwrap();
        assert_eq!(m.params.get("path").map(String::as_str), Some("app.js"));

        let m2 = reg.resolve(Method::Get, "/assets/css/app.css").unwrap();
        assert_eq!(m2.params.get("path").map(String::as_str), Some("css/app.css"));
    }

    #[test]
    fn literal_takes_precedence_over_parameterized() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/users/me", pool(), false).unwrap();
        reg.register(Method::Get, "/users/:id", pool(), false).unwrap();

        let m = reg.resolve(Method::Get, "/users/me").unwrap();
        assert!(m.params.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/x", pool(), false).unwrap();
        assert!(reg.register(Method::Get, "/x", pool(), false).is_err());
    }

    #[test]
    fn unregister_removes_the_route() {
        let reg = RouteRegistry::new();
        reg.register(Method::Get, "/x", pool(), false).unwrap();
        assert!(reg.unregister(Method::Get, "/x"));
        assert!(reg.resolve(Method::Get, "/x").is_none());
    }
}
