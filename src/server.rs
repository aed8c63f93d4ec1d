// src/server.rs
//
// Thread-per-core + SO_REUSEPORT server, grounded on the source
// `Server::bind().workers().serve()` builder. What changed: the route
// registry and middleware chain are shared (`Arc<RwLock<..>>`-backed
// internally) across every worker instead of `Router::clone()`d per
// thread, so `register_route`/`unregister_route` calls are visible to
// every worker immediately — see DESIGN.md on why this departs from the
// source's per-thread clone.

use crate::config::Config;
use crate::error::{ChopinError, ChopinResult};
use crate::handler_pool::{Handler, HandlerFactory, HandlerOutcome, HandlerPool};
use crate::http::Request;
use crate::metrics::WorkerMetrics;
use crate::middleware::{cors_filter, MiddlewareChain};
use crate::parser::Method;
use crate::route::RouteRegistry;
use crate::syscalls;
use crate::worker::Worker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub struct Server {
    config: Config,
    routes: Arc<RouteRegistry>,
    middleware: MiddlewareChain,
}

impl Server {
    pub fn bind(host_port: &str) -> Self {
        let mut config = Config::default();
        if let Some((host, port)) = host_port.split_once(':') {
            config.host = host.to_string();
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        Self {
            config,
            routes: Arc::new(RouteRegistry::new()),
            middleware: MiddlewareChain::new(),
        }
    }

    pub fn with_config(config: Config) -> Self {
        Self { config, routes: Arc::new(RouteRegistry::new()), middleware: MiddlewareChain::new() }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    pub fn register_route(&self, method: Method, path: &str, factory: HandlerFactory) -> ChopinResult<()> {
        let pool = Arc::new(HandlerPool::with_resize_interval(
            factory,
            self.config.handler_pool_default_initial,
            self.config.handler_pool_default_min,
            self.config.handler_pool_default_max,
            self.config.handler_pool_resize_interval_seconds,
        ));
        self.routes.register(method, path, pool, false)
    }

    pub fn websocket(&self, path: &str, factory: HandlerFactory) -> ChopinResult<()> {
        let pool = Arc::new(HandlerPool::with_resize_interval(
            factory,
            1,
            1,
            self.config.handler_pool_default_max,
            self.config.handler_pool_resize_interval_seconds,
        ));
        self.routes.register(Method::Get, path, pool, true)
    }

    pub fn unregister_route(&self, method: Method, path: &str) -> bool {
        self.routes.unregister(method, path)
    }

    /// Installs a handler at `from` that answers with `302 Found` and a
    /// `Location: to` header. A dedicated `RouteEntry.redirect_to` field
    /// rather than a closure-capturing `HandlerFactory`, since the latter
    /// is a bare `fn() -> Box<dyn Handler>` with no way to close over `to`.
    pub fn redirect(&self, from: &str, to: &str, method: Method) -> ChopinResult<()> {
        fn make_noop() -> Box<dyn Handler> {
            struct Noop;
            impl Handler for Noop {
                fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
                    Ok(HandlerOutcome::Empty)
                }
            }
            Box::new(Noop)
        }
        let pool = Arc::new(HandlerPool::new(make_noop, 1, 1, 1));
        self.routes.register_redirect(method, from, to, pool)
    }

    /// Registers a global CORS filter and a catch-all `OPTIONS /*` route.
    /// The catch-all is necessary because route resolution runs before the
    /// middleware chain (spec.md §4.10) — without it, a preflight request
    /// to a path with no registered `OPTIONS` handler would 404 before the
    /// CORS filter ever got a chance to answer it with 204.
    pub fn enable_cors(&mut self, origin: &'static str) -> ChopinResult<()> {
        self.middleware.use_global(cors_filter(origin));

        fn make_noop() -> Box<dyn Handler> {
            struct Noop;
            impl Handler for Noop {
                fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
                    Ok(HandlerOutcome::Empty)
                }
            }
            Box::new(Noop)
        }
        let pool = Arc::new(HandlerPool::new(make_noop, 1, 1, 1));
        self.routes.register(Method::Options, "/*", pool, false)
    }

    pub fn use_middleware(&mut self, filter: impl Fn(&Request, &mut crate::http::Response) -> bool + Send + Sync + 'static) {
        self.middleware.use_global(filter);
    }

    pub fn use_path_middleware(
        &mut self,
        prefix: &str,
        filter: impl Fn(&Request, &mut crate::http::Response) -> bool + Send + Sync + 'static,
    ) {
        self.middleware.use_path(prefix, filter);
    }

    pub fn serve(self) -> ChopinResult<()> {
        crate::logging::init();

        let worker_count = self.config.effective_worker_count();
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let shutdown_signal = shutdown_flag.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal, draining active connections");
            shutdown_signal.store(true, Ordering::Release);
        })
        .expect("error setting Ctrl-C handler");

        let mut worker_metrics = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            worker_metrics.push(Arc::new(WorkerMetrics::new()));
        }

        spawn_metrics_reporter(worker_metrics.clone(), shutdown_flag.clone());

        info!(workers = worker_count, addr = %self.config.server_addr(), "starting server");

        let config = Arc::new(self.config);
        let routes = self.routes;
        let middleware = Arc::new(self.middleware);
        let mut handles = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            let routes = routes.clone();
            let middleware = middleware.clone();
            let metrics = worker_metrics[i].clone();
            let cfg = config.clone();
            let shutdown = shutdown_flag.clone();

            let handle = thread::Builder::new()
                .name(format!("chopin-worker-{i}"))
                .spawn(move || {
                    if let Some(id) = core_id {
                        core_affinity::set_for_current(id);
                    }
                    match syscalls::create_listen_socket_reuseport(&cfg.host, cfg.port) {
                        Ok(listen_fd) => {
                            let mut worker = Worker::new(i, routes, middleware, metrics, cfg);
                            worker.run(listen_fd, shutdown);
                        }
                        Err(e) => warn!(worker = i, error = %e, "failed to create SO_REUSEPORT socket"),
                    }
                })
                .map_err(ChopinError::from)?;

            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.join();
        }

        Ok(())
    }
}

fn spawn_metrics_reporter(metrics: Vec<Arc<WorkerMetrics>>, shutdown: Arc<AtomicBool>) {
    thread::Builder::new()
        .name("chopin-metrics".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                thread::sleep(Duration::from_secs(5));
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                let mut total_reqs = 0u64;
                let mut total_active = 0u64;
                for m in &metrics {
                    let snap = m.snapshot();
                    total_reqs += snap.req_count;
                    total_active += snap.active_conns;
                }
                info!(active_connections = total_active, total_requests = total_reqs, "metrics");
            }
        })
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    struct Echo;
    impl Handler for Echo {
        fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
            Ok(HandlerOutcome::Text("ok".into()))
        }
    }
    fn make_echo() -> Box<dyn Handler> {
        Box::new(Echo)
    }

    #[test]
    fn bind_parses_host_and_port() {
        let server = Server::bind("0.0.0.0:9090");
        assert_eq!(server.config.host, "0.0.0.0");
        assert_eq!(server.config.port, 9090);
    }

    #[test]
    fn register_route_then_resolve_succeeds() {
        let server = Server::bind("127.0.0.1:8080");
        server.register_route(Method::Get, "/hi", make_echo).unwrap();
        assert!(server.routes.resolve(Method::Get, "/hi").is_some());
    }

    #[test]
    fn duplicate_route_registration_errors() {
        let server = Server::bind("127.0.0.1:8080");
        server.register_route(Method::Get, "/x", make_echo).unwrap();
        assert!(server.register_route(Method::Get, "/x", make_echo).is_err());
    }

    #[test]
    fn redirect_route_resolves_with_location_set() {
        let server = Server::bind("127.0.0.1:8080");
        server.redirect("/old", "/new", Method::Get).unwrap();
        let matched = server.routes.resolve(Method::Get, "/old").unwrap();
        assert_eq!(matched.entry.redirect_to.as_deref(), Some("/new"));
    }

    #[test]
    fn enable_cors_registers_middleware_and_options_catchall() {
        let mut server = Server::bind("127.0.0.1:8080");
        server.enable_cors("*").unwrap();
        assert!(server.routes.resolve(Method::Options, "/anything").is_some());

        let req = Request::new(
            Method::Options,
            "/anything",
            Default::default(),
            Default::default(),
            Vec::new(),
            "127.0.0.1",
        );
        let mut res = crate::http::Response::new();
        assert!(!server.middleware.run(&req, &mut res));
        assert_eq!(res.status_code(), 204);
    }
}
