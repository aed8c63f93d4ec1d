// src/middleware.rs
//
// Global and path-prefixed filters, run in registration order before the
// matched route's handler. Any filter returning `false` short-circuits the
// chain — the request never reaches the handler, and whatever the filter
// already wrote onto the response is what goes out. Grounded on the
// source's single `global_middleware: Option<MiddlewareFn>` slot
// (`router.rs`), generalized to an ordered list plus path-prefix scoping
// per spec.md §4.9.

use crate::http::{Request, Response};
use std::sync::Arc;

/// Returns `true` to continue the chain, `false` to short-circuit.
///
/// An `Arc<dyn Fn>` rather than a bare `fn` pointer: built-ins like
/// `cors_filter` close over configuration (the allowed origin), which a
/// non-capturing function pointer can't hold.
pub type MiddlewareFn = Arc<dyn Fn(&Request, &mut Response) -> bool + Send + Sync>;

struct PathMiddleware {
    prefix: String,
    filter: MiddlewareFn,
}

pub struct MiddlewareChain {
    global: Vec<MiddlewareFn>,
    scoped: Vec<PathMiddleware>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self { global: Vec::new(), scoped: Vec::new() }
    }

    pub fn use_global(&mut self, filter: impl Fn(&Request, &mut Response) -> bool + Send + Sync + 'static) {
        self.global.push(Arc::new(filter));
    }

    pub fn use_path(
        &mut self,
        prefix: impl Into<String>,
        filter: impl Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    ) {
        self.scoped.push(PathMiddleware { prefix: prefix.into(), filter: Arc::new(filter) });
    }

    /// Runs global filters first (registration order), then path-scoped
    /// filters whose prefix matches the request path (also registration
    /// order). Stops at the first filter that returns `false`.
    pub fn run(&self, req: &Request, res: &mut Response) -> bool {
        for filter in &self.global {
            if !(filter)(req, res) {
                return false;
            }
        }
        for pm in &self.scoped {
            if req.path.starts_with(pm.prefix.as_str()) && !(pm.filter)(req, res) {
                return false;
            }
        }
        true
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in CORS filter: answers preflight `OPTIONS` requests directly and
/// stamps `Access-Control-Allow-*` headers on every other response. Kept
/// as ordinary middleware rather than a special server mode, per spec.md's
/// "CORS is middleware plus a catch-all OPTIONS route" design note.
pub fn cors_filter(origin: &'static str) -> impl Fn(&Request, &mut Response) -> bool {
    move |req: &Request, res: &mut Response| {
        let _ = res.set_header("Access-Control-Allow-Origin", origin);
        let _ = res.set_header("Access-Control-Allow-Methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS");
        let _ = res.set_header("Access-Control-Allow-Headers", "Content-Type, Authorization");
        if req.method == crate::parser::Method::Options {
            let _ = res.status(204);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn req(path: &str, method: crate::parser::Method) -> Request {
        Request::new(method, path, HashMap::new(), HashMap::new(), Vec::new(), "127.0.0.1")
    }

    fn deny(_req: &Request, res: &mut Response) -> bool {
        let _ = res.status(401);
        false
    }
    fn allow(_req: &Request, _res: &mut Response) -> bool {
        true
    }

    #[test]
    fn global_filter_short_circuits() {
        let mut chain = MiddlewareChain::new();
        chain.use_global(deny);
        let request = req("/x", crate::parser::Method::Get);
        let mut response = Response::new();
        assert!(!chain.run(&request, &mut response));
        assert_eq!(response.status_code(), 401);
    }

    #[test]
    fn path_scoped_filter_only_runs_under_prefix() {
        let mut chain = MiddlewareChain::new();
        chain.use_path("/admin", deny);

        let public = req("/public", crate::parser::Method::Get);
        let mut res1 = Response::new();
        assert!(chain.run(&public, &mut res1));

        let admin = req("/admin/users", crate::parser::Method::Get);
        let mut res2 = Response::new();
        assert!(!chain.run(&admin, &mut res2));
    }

    #[test]
    fn filters_run_in_registration_order() {
        let mut chain = MiddlewareChain::new();
        chain.use_global(allow);
        chain.use_global(deny);
        let request = req("/x", crate::parser::Method::Get);
        let mut response = Response::new();
        assert!(!chain.run(&request, &mut response));
    }
}
