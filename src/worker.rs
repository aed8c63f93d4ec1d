// src/worker.rs
//
// Per-core connection loop: accept, read, parse/dispatch (or websocket
// frame/session), write, close. Shape (edge-triggered epoll, slab-indexed
// connections, accept-drain loop, periodic stale-connection prune) is
// kept from the source `worker.rs`; what changed is everything the loop
// does with a connection once it has bytes — pool-acquired buffers
// instead of embedded arrays, full HTTP dispatch through
// `dispatcher::Dispatcher` instead of an inline fixed-format response
// write, and a websocket branch the source never had.

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::conn::ConnState;
use crate::dispatcher::Dispatcher;
use crate::metrics::WorkerMetrics;
use crate::middleware::MiddlewareChain;
use crate::parser::{self, ParseError};
use crate::route::RouteRegistry;
use crate::slab::ConnectionSlab;
use crate::syscalls::{self, epoll_event, Epoll, EPOLLIN, EPOLLOUT};
use crate::websocket::{self, session::{Session, SessionEvent}};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const LISTEN_TOKEN: u64 = u64::MAX;
const MAX_KEEP_ALIVE_REQUESTS: u32 = 10_000;

pub struct Worker {
    id: usize,
    routes: Arc<RouteRegistry>,
    middleware: Arc<MiddlewareChain>,
    metrics: Arc<WorkerMetrics>,
    config: Arc<Config>,
}

impl Worker {
    pub fn new(
        id: usize,
        routes: Arc<RouteRegistry>,
        middleware: Arc<MiddlewareChain>,
        metrics: Arc<WorkerMetrics>,
        config: Arc<Config>,
    ) -> Self {
        Self { id, routes, middleware, metrics, config }
    }

    pub fn run(&mut self, listen_fd: i32, shutdown: Arc<AtomicBool>) {
        let epoll = Epoll::new().expect("failed to create epoll instance");
        epoll.add(listen_fd, LISTEN_TOKEN, EPOLLIN).expect("failed to register listen socket");

        let mut slab = ConnectionSlab::new(self.config.max_connections_per_worker);
        let mut read_pool = BufferPool::new(self.config.request_buffer_size, self.config.request_buffer_pool_size);
        let mut write_pool = BufferPool::new(self.config.websocket_buffer_size, self.config.request_buffer_pool_size);
        let mut ws_sessions: HashMap<usize, Session> = HashMap::new();

        info!(worker = self.id, "entering event loop");

        let mut events = vec![epoll_event { events: 0, u64: 0 }; 1024];
        let mut timeout = 1000;
        let mut now = unix_secs();
        let mut last_prune = now;

        while !shutdown.load(Ordering::Acquire) {
            now = unix_secs();

            if now - last_prune >= 1 {
                self.prune_idle(&mut slab, &epoll, &mut ws_sessions, &mut read_pool, &mut write_pool, now);
                last_prune = now;
            }

            let n = match epoll.wait(&mut events, timeout) {
                Ok(n) => n,
                Err(_) => continue,
            };

            for event in events.iter().take(n) {
                let token = event.u64;
                let is_read = (event.events & EPOLLIN as u32) != 0;
                let is_write = (event.events & EPOLLOUT as u32) != 0;

                if token == LISTEN_TOKEN {
                    if !shutdown.load(Ordering::Acquire) {
                        self.accept_loop(listen_fd, &epoll, &mut slab, &mut read_pool, &mut write_pool, now);
                    }
                    continue;
                }

                let idx = token as usize;
                self.service_connection(
                    idx,
                    is_read,
                    is_write,
                    &epoll,
                    &mut slab,
                    &mut ws_sessions,
                    &mut read_pool,
                    &mut write_pool,
                    &shutdown,
                    now,
                );
            }

            if shutdown.load(Ordering::Acquire) {
                timeout = 100;
            }
        }

        info!(worker = self.id, "exiting gracefully");
        unsafe { libc::close(listen_fd) };
        for i in 0..slab.capacity() {
            if let Some(conn) = slab.get(i) {
                if conn.state != ConnState::Free {
                    unsafe { libc::close(conn.fd) };
                }
            }
        }
    }

    fn accept_loop(
        &self,
        listen_fd: i32,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        read_pool: &mut BufferPool,
        write_pool: &mut BufferPool,
        now: u32,
    ) {
        loop {
            match syscalls::accept_connection(listen_fd) {
                Ok(Some(client_fd)) => {
                    let Some(idx) = slab.allocate(client_fd) else {
                        unsafe { libc::close(client_fd) };
                        warn!(worker = self.id, "connection slab full, dropping connection");
                        continue;
                    };
                    if let Err(_e) = epoll.add(client_fd, idx as u64, EPOLLIN) {
                        slab.free(idx);
                        unsafe { libc::close(client_fd) };
                        continue;
                    }
                    if let Some(conn) = slab.get_mut(idx) {
                        conn.reset_for_accept(client_fd, now);
                        conn.read_buf = Some(read_pool.acquire());
                        conn.write_buf = Some(write_pool.acquire());
                    }
                    self.metrics.inc_conn();
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    fn prune_idle(
        &self,
        slab: &mut ConnectionSlab,
        epoll: &Epoll,
        ws_sessions: &mut HashMap<usize, Session>,
        read_pool: &mut BufferPool,
        write_pool: &mut BufferPool,
        now: u32,
    ) {
        for i in 0..slab.capacity() {
            let stale = matches!(slab.get(i), Some(conn) if conn.state != ConnState::Free
                && now.saturating_sub(conn.last_active) > self.config.idle_timeout_secs);
            if stale {
                let fd = slab.get(i).map(|c| c.fd).unwrap_or(-1);
                epoll.delete(fd).ok();
                if fd >= 0 {
                    unsafe { libc::close(fd) };
                }
                let (rbuf, wbuf) = slab.free(i);
                if let Some(b) = rbuf {
                    read_pool.release(b);
                }
                if let Some(b) = wbuf {
                    write_pool.release(b);
                }
                ws_sessions.remove(&i);
                self.metrics.dec_conn();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn service_connection(
        &self,
        idx: usize,
        is_read: bool,
        is_write: bool,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        ws_sessions: &mut HashMap<usize, Session>,
        read_pool: &mut BufferPool,
        write_pool: &mut BufferPool,
        shutdown: &Arc<AtomicBool>,
        now: u32,
    ) {
        let Some(fd) = slab.get(idx).map(|c| c.fd) else { return };

        if is_read {
            self.handle_read(idx, fd, epoll, slab, ws_sessions, now);
        }

        if matches!(slab.get(idx).map(|c| c.state), Some(ConnState::Writing | ConnState::WsWriting)) || is_write {
            self.handle_write(idx, fd, epoll, slab, shutdown, now);
        }

        match slab.get(idx).map(|c| c.state) {
            Some(ConnState::Closing) => {
                epoll.delete(fd).ok();
                unsafe { libc::close(fd) };
                let (rbuf, wbuf) = slab.free(idx);
                if let Some(b) = rbuf {
                    read_pool.release(b);
                }
                if let Some(b) = wbuf {
                    write_pool.release(b);
                }
                ws_sessions.remove(&idx);
                self.metrics.dec_conn();
            }
            Some(_) => {
                if let Some(conn) = slab.get_mut(idx) {
                    conn.last_active = now;
                }
            }
            None => {}
        }
    }

    fn handle_read(
        &self,
        idx: usize,
        fd: i32,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        ws_sessions: &mut HashMap<usize, Session>,
        now: u32,
    ) {
        let read_result = {
            let Some(conn) = slab.get_mut(idx) else { return };
            let Some(buf) = conn.read_buf.as_mut() else { return };
            if conn.parse_pos >= buf.len() {
                buf.resize(buf.len() * 2, 0);
            }
            syscalls::read_nonblocking(fd, &mut buf[conn.parse_pos..])
        };

        match read_result {
            Ok(0) => {
                if let Some(conn) = slab.get_mut(idx) {
                    conn.state = ConnState::Closing;
                }
                return;
            }
            Ok(n) => {
                if let Some(conn) = slab.get_mut(idx) {
                    conn.parse_pos += n;
                }
            }
            Err(_) => {
                if let Some(conn) = slab.get_mut(idx) {
                    conn.state = ConnState::Closing;
                }
                return;
            }
        }

        let is_ws = slab.get(idx).map(|c| c.is_websocket).unwrap_or(false);
        if is_ws {
            self.process_websocket_bytes(idx, epoll, fd, slab, ws_sessions);
        } else {
            self.process_http_bytes(idx, epoll, fd, slab, ws_sessions, now);
        }
    }

    fn process_http_bytes(
        &self,
        idx: usize,
        epoll: &Epoll,
        fd: i32,
        slab: &mut ConnectionSlab,
        ws_sessions: &mut HashMap<usize, Session>,
        _now: u32,
    ) {
        let parsed = {
            let Some(conn) = slab.get(idx) else { return };
            let Some(buf) = conn.read_buf.as_ref() else { return };
            let slice = &buf[..conn.parse_pos];
            if slice.len() > self.config.max_request_size {
                Err(ParseError::TooLarge)
            } else {
                parser::parse_request(slice)
            }
        };

        match parsed {
            Ok(parsed) => {
                let client_addr = format!("worker-{}", self.id);
                let req = crate::http::Request::new(
                    parsed.method,
                    parsed.path,
                    parsed.headers,
                    parsed.query,
                    parsed.body,
                    client_addr,
                );

                self.metrics.inc_req();

                let keep_alive_requested = req
                    .header("Connection")
                    .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                    .unwrap_or(false);

                let wants_upgrade = req.is_websocket_upgrade();
                let matched = self.routes.resolve(req.method, &req.path);

                let (out_bytes, keep_alive, become_ws) = if wants_upgrade
                    && matched.as_ref().map(|m| m.entry.is_websocket).unwrap_or(false)
                {
                    match websocket::validate_and_accept_key(&req) {
                        Ok(accept) => {
                            self.metrics.inc_ws_upgrade();
                            (build_upgrade_response(&accept), true, true)
                        }
                        Err(e) => (build_plain_error(400, &e.to_string()), false, false),
                    }
                } else {
                    let dispatcher =
                        Dispatcher::new(&self.routes, &self.middleware, &self.metrics, self.config.chunked_threshold_bytes);
                    let res = dispatcher.dispatch(req);
                    let keep_alive = keep_alive_requested && res.status_code() < 500;
                    (
                        if res.is_chunked() {
                            let mut head = res.serialize_head();
                            head.extend_from_slice(
                                &crate::http::encode_chunks(res.body_bytes(), self.config.max_chunk_bytes),
                            );
                            head
                        } else {
                            res.serialize()
                        },
                        keep_alive,
                        false,
                    )
                };

                let requests_served = slab.get(idx).map(|c| c.requests_served).unwrap_or(0) + 1;
                let keep_alive = keep_alive && requests_served < MAX_KEEP_ALIVE_REQUESTS;

                let Some(conn) = slab.get_mut(idx) else { return };
                conn.requests_served = requests_served;
                write_into_conn(conn, &out_bytes);
                conn.keep_alive = keep_alive;
                conn.is_websocket = become_ws;
                if become_ws {
                    ws_sessions.insert(idx, Session::new());
                }
                conn.state = ConnState::Writing;
                let _ = epoll.modify(fd, idx as u64, EPOLLIN | EPOLLOUT);
            }
            Err(ParseError::Incomplete) => {
                if let Some(conn) = slab.get_mut(idx) {
                    conn.state = ConnState::Reading;
                }
            }
            Err(_) => {
                if let Some(conn) = slab.get_mut(idx) {
                    let out = build_plain_error(400, "malformed request");
                    write_into_conn(conn, &out);
                    conn.keep_alive = false;
                    conn.state = ConnState::Writing;
                }
                let _ = epoll.modify(fd, idx as u64, EPOLLIN | EPOLLOUT);
            }
        }
    }

    fn process_websocket_bytes(
        &self,
        idx: usize,
        epoll: &Epoll,
        fd: i32,
        slab: &mut ConnectionSlab,
        ws_sessions: &mut HashMap<usize, Session>,
    ) {
        let Some(session) = ws_sessions.get_mut(&idx) else { return };
        let Some(conn) = slab.get_mut(idx) else { return };
        let Some(buf) = conn.read_buf.as_ref() else { return };

        let events = match session.feed(&buf[..conn.parse_pos], self.config.max_ws_message_size) {
            Ok((consumed, events)) => {
                let remaining = conn.parse_pos - consumed;
                if let Some(rb) = conn.read_buf.as_mut() {
                    rb.copy_within(consumed..consumed + remaining, 0);
                }
                conn.parse_pos = remaining;
                events
            }
            Err(e) => {
                debug!(error = %e, "websocket protocol error, closing");
                conn.state = ConnState::Closing;
                return;
            }
        };

        let mut outbound = Vec::new();
        let mut should_close = false;
        for event in events {
            match event {
                SessionEvent::Text(text) => outbound.extend_from_slice(&Session::encode_text(&text)),
                SessionEvent::Binary(data) => outbound.extend_from_slice(&Session::encode_binary(&data)),
                SessionEvent::ReplyWithPong(payload) => outbound.extend_from_slice(&Session::encode_pong(&payload)),
                SessionEvent::Close { code, reason, echo } => {
                    debug!(code, reason = %reason, "websocket close received");
                    outbound.extend_from_slice(&echo);
                    should_close = true;
                }
                SessionEvent::None => {}
            }
        }

        if !outbound.is_empty() {
            write_into_conn(conn, &outbound);
            conn.state = ConnState::WsWriting;
            let _ = epoll.modify(fd, idx as u64, EPOLLIN | EPOLLOUT);
        }
        if should_close {
            conn.keep_alive = false;
        }
    }

    fn handle_write(
        &self,
        idx: usize,
        fd: i32,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        shutdown: &Arc<AtomicBool>,
        _now: u32,
    ) {
        let Some(conn) = slab.get_mut(idx) else { return };
        let Some(buf) = conn.write_buf.as_ref() else { return };
        if conn.write_pos >= conn.write_len {
            return;
        }
        match syscalls::write_nonblocking(fd, &buf[conn.write_pos..conn.write_len]) {
            Ok(n) => {
                self.metrics.add_bytes(n);
                conn.write_pos += n;
                if conn.write_pos >= conn.write_len {
                    let was_ws = conn.state == ConnState::WsWriting;
                    if was_ws {
                        conn.write_pos = 0;
                        conn.write_len = 0;
                        if conn.keep_alive {
                            conn.state = ConnState::WsReading;
                            let _ = epoll.modify(fd, idx as u64, EPOLLIN);
                        } else {
                            conn.state = ConnState::Closing;
                        }
                    } else if conn.keep_alive && !shutdown.load(Ordering::Acquire) {
                        conn.parse_pos = 0;
                        conn.write_pos = 0;
                        conn.write_len = 0;
                        conn.state = ConnState::Reading;
                        let _ = epoll.modify(fd, idx as u64, EPOLLIN);
                    } else {
                        conn.state = ConnState::Closing;
                    }
                }
            }
            Err(_) => {
                conn.state = ConnState::Closing;
            }
        }
    }
}

fn write_into_conn(conn: &mut crate::conn::Conn, bytes: &[u8]) {
    let Some(wbuf) = conn.write_buf.as_mut() else { return };
    if wbuf.len() < bytes.len() {
        wbuf.resize(bytes.len(), 0);
    }
    wbuf[..bytes.len()].copy_from_slice(bytes);
    conn.write_pos = 0;
    conn.write_len = bytes.len();
}

fn build_plain_error(status: u16, message: &str) -> Vec<u8> {
    let body = serde_json::json!({ "error": "Error", "message": message }).to_string();
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        crate::http::reason_phrase(status),
        body.len(),
        body,
    )
    .into_bytes()
}

fn build_upgrade_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key
    )
    .into_bytes()
}

fn unix_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32
}
