// src/lib.rs

pub mod buffer_pool;
pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod error;
pub mod expected_inputs;
pub mod handler_pool;
pub mod http;
pub mod json;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod multipart;
pub mod parser;
pub mod route;
pub mod server;
pub mod slab;
pub mod syscalls;
pub mod websocket;
pub mod worker;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{ChopinError, ChopinResult};
pub use expected_inputs::{ExpectedInput, InputKind, InputSource};
pub use handler_pool::{Handler, HandlerFactory, HandlerOutcome, HandlerPool};
pub use http::{Method, Request, Response};
pub use middleware::{cors_filter, MiddlewareChain, MiddlewareFn};
pub use route::RouteRegistry;
pub use server::Server;
