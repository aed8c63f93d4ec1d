// src/dispatcher.rs
//
// Glues the route registry, middleware chain, expected-input validation
// and handler pool together into the single call the connection loop
// makes per parsed request (spec.md §4.10):
//
//   1. resolve the route (method + path), binding any captured params
//   2. run the middleware chain unconditionally, matched or not; a
//      `false` short-circuits here — a genuinely unmatched path still
//      gets a chance to be rejected (or otherwise handled) by global
//      middleware such as CORS or auth before 404 is ever considered
//   3. on miss, now that middleware has permitted continuation,
//      synthesize a 404 (or 405-shaped Unmatched) response
//   4. acquire a handler from the route's pool
//   5. on pool exhaustion, synthesize a 503
//   6. validate the handler's declared expected inputs
//   7. on validation failure, synthesize a 400 and still release the
//      handler (it was never touched, no need to discard it)
//   8. run the handler inside `catch_unwind` so a panicking handler
//      still returns to the pool and the connection gets a 500
//   9. convert the handler's outcome into the response body
//  10. finalize the response and release the handler back to its pool

use crate::error::ChopinError;
use crate::handler_pool::HandlerOutcome;
use crate::http::{Request, Response};
use crate::metrics::WorkerMetrics;
use crate::middleware::MiddlewareChain;
use crate::route::RouteRegistry;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

pub struct Dispatcher<'a> {
    pub routes: &'a RouteRegistry,
    pub middleware: &'a MiddlewareChain,
    pub metrics: &'a WorkerMetrics,
    pub chunk_threshold: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        routes: &'a RouteRegistry,
        middleware: &'a MiddlewareChain,
        metrics: &'a WorkerMetrics,
        chunk_threshold: usize,
    ) -> Self {
        Self { routes, middleware, metrics, chunk_threshold }
    }

    pub fn dispatch(&self, mut req: Request) -> Response {
        let mut res = Response::new();

        let matched = self.routes.resolve(req.method, &req.path);
        if let Some(m) = &matched {
            req.params = m.params.clone();
        }

        if !self.middleware.run(&req, &mut res) {
            let _ = res.finalize(self.chunk_threshold);
            return res;
        }

        let Some(matched) = matched else {
            return self.error_response(
                &mut res,
                ChopinError::Unmatched { method: req.method.as_str().to_string(), path: req.path.clone() },
            );
        };

        if let Some(target) = &matched.entry.redirect_to {
            let _ = res.status(302);
            let _ = res.set_header("Location", target.clone());
            let _ = res.content_type("text/plain");
            let _ = res.set_body("");
            let _ = res.finalize(self.chunk_threshold);
            return res;
        }

        let Some(mut handler) = matched.entry.pool.acquire() else {
            warn!(path = %req.path, "handler pool exhausted");
            return self.error_response(&mut res, ChopinError::Handler("handler pool exhausted".into()));
        };

        let uploaded_files = match req.header("Content-Type") {
            Some(ct) if ct.starts_with("multipart/form-data") => {
                match crate::multipart::parse(ct, &req.body) {
                    Ok(fields) => fields
                        .into_iter()
                        .filter_map(|f| match f {
                            crate::multipart::MultipartField::File { name, .. } => Some(name),
                            crate::multipart::MultipartField::Text { .. } => None,
                        })
                        .collect(),
                    Err(e) => {
                        matched.entry.pool.release(handler);
                        return self.error_response(&mut res, e);
                    }
                }
            }
            _ => Vec::new(),
        };

        if let Err(e) = crate::expected_inputs::validate(&handler.expected_inputs(), &req, &uploaded_files) {
            matched.entry.pool.release(handler);
            return self.error_response(&mut res, e);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&req)));
        matched.entry.pool.release(handler);

        match outcome {
            Ok(Ok(outcome)) => self.apply_outcome(&mut res, outcome),
            Ok(Err(e)) => return self.error_response(&mut res, e),
            Err(panic_payload) => {
                let msg = panic_message(&panic_payload);
                self.metrics.inc_panic();
                error!(error = %msg, path = %req.path, "handler panicked");
                return self.error_response(&mut res, ChopinError::WorkerPanic(msg));
            }
        }

        if let Err(e) = res.finalize(self.chunk_threshold) {
            return self.error_response(&mut res, e);
        }
        res
    }

    fn apply_outcome(&self, res: &mut Response, outcome: HandlerOutcome) {
        let content_type = match &outcome {
            HandlerOutcome::Json(_) => "application/json",
            HandlerOutcome::Bytes(_) => "application/octet-stream",
            _ => "text/plain",
        };
        let _ = res.content_type(content_type);
        let _ = res.set_body(outcome);
    }

    /// Builds the taxonomy-standard `{"error": "<code>", "message": "..."}`
    /// JSON body for any error surfaced before or during handling.
    fn error_response(&self, res: &mut Response, err: ChopinError) -> Response {
        let mut res = std::mem::replace(res, Response::new());
        let _ = res.status(err.status_code());
        let _ = res.content_type("application/json");
        let body = serde_json::json!({ "error": err.error_code(), "message": err.to_string() });
        let _ = res.set_body(body);
        let _ = res.finalize(self.chunk_threshold);
        res
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_pool::{Handler, HandlerPool};
    use std::sync::Arc;

    struct OkHandler;
    impl Handler for OkHandler {
        fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
            Ok(HandlerOutcome::Text("hi".into()))
        }
    }
    fn make_ok() -> Box<dyn Handler> {
        Box::new(OkHandler)
    }

    struct PanicHandler;
    impl Handler for PanicHandler {
        fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
            panic!("boom");
        }
    }
    fn make_panic() -> Box<dyn Handler> {
        Box::new(PanicHandler)
    }

    fn registry_with(method: crate::parser::Method, path: &str, factory: crate::handler_pool::HandlerFactory) -> RouteRegistry {
        let reg = RouteRegistry::new();
        reg.register(method, path, Arc::new(HandlerPool::new(factory, 1, 1, 2)), false).unwrap();
        reg
    }

    fn get_req(path: &str) -> Request {
        Request::new(crate::parser::Method::Get, path, Default::default(), Default::default(), Vec::new(), "127.0.0.1")
    }

    #[test]
    fn unmatched_route_yields_404() {
        let reg = RouteRegistry::new();
        let mw = MiddlewareChain::new();
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/nope"));
        assert_eq!(res.status_code(), 404);
    }

    #[test]
    fn matched_route_runs_handler() {
        let reg = registry_with(crate::parser::Method::Get, "/hi", make_ok);
        let mw = MiddlewareChain::new();
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/hi"));
        assert_eq!(res.status_code(), 200);
        assert_eq!(res.body_bytes(), b"hi");
    }

    #[test]
    fn panicking_handler_yields_500_and_returns_to_pool() {
        let reg = registry_with(crate::parser::Method::Get, "/boom", make_panic);
        let mw = MiddlewareChain::new();
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/boom"));
        assert_eq!(res.status_code(), 500);
        assert_eq!(metrics.snapshot().handler_panics, 1);

        // Pool still has its single handler available for reuse.
        let matched = reg.resolve(crate::parser::Method::Get, "/boom").unwrap();
        assert!(matched.entry.pool.acquire().is_some());
    }

    #[test]
    fn middleware_short_circuit_skips_handler() {
        let reg = registry_with(crate::parser::Method::Get, "/secure", make_ok);
        let mut mw = MiddlewareChain::new();
        mw.use_global(|_req, res| {
            let _ = res.status(401);
            false
        });
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/secure"));
        assert_eq!(res.status_code(), 401);
    }

    #[test]
    fn middleware_runs_even_when_route_is_unmatched() {
        let reg = RouteRegistry::new();
        let mut mw = MiddlewareChain::new();
        mw.use_global(|_req, res| {
            let _ = res.set_header("Access-Control-Allow-Origin", "*");
            true
        });
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/nope"));
        assert_eq!(res.status_code(), 404);
        assert_eq!(res.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn middleware_short_circuit_on_unmatched_route_preempts_404() {
        let reg = RouteRegistry::new();
        let mut mw = MiddlewareChain::new();
        mw.use_global(|_req, res| {
            let _ = res.status(401);
            false
        });
        let metrics = WorkerMetrics::new();
        let dispatcher = Dispatcher::new(&reg, &mw, &metrics, 8192);
        let res = dispatcher.dispatch(get_req("/nope"));
        assert_eq!(res.status_code(), 401);
    }
}
