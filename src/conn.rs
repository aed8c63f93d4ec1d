// src/conn.rs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Free = 0,
    Accepted = 1,
    Reading = 2,
    Parsing = 3,
    Handling = 4,
    Writing = 5,
    WsHandshake = 6,
    WsReading = 7,
    WsWriting = 8,
    Closing = 9,
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState::Free
    }
}

/// Per-connection state. 64-byte aligned so the hot scalar fields of
/// neighbouring slab entries don't share a cache line. The read/write
/// buffers are pool-allocated (see [`crate::buffer_pool`]) rather than
/// embedded inline, since their size is a runtime config value, not a
/// compile-time constant.
#[repr(C, align(64))]
pub struct Conn {
    pub fd: i32, // file descriptor, or free-list next index when `state == Free`
    pub state: ConnState,
    pub keep_alive: bool,
    pub is_websocket: bool,
    pub parse_pos: usize,
    pub write_pos: usize,
    pub write_len: usize,
    pub route_id: u16,
    pub last_active: u32,
    pub requests_served: u32,
    pub read_buf: Option<Vec<u8>>,
    pub write_buf: Option<Vec<u8>>,
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            state: ConnState::Free,
            keep_alive: false,
            is_websocket: false,
            parse_pos: 0,
            write_pos: 0,
            write_len: 0,
            route_id: 0,
            last_active: 0,
            requests_served: 0,
            read_buf: None,
            write_buf: None,
        }
    }

    /// Reset the fields that matter for a freshly-accepted connection,
    /// keeping the pool-acquired buffers the caller already installed.
    pub fn reset_for_accept(&mut self, fd: i32, now: u32) {
        self.fd = fd;
        self.state = ConnState::Reading;
        self.keep_alive = false;
        self.is_websocket = false;
        self.parse_pos = 0;
        self.write_pos = 0;
        self.write_len = 0;
        self.route_id = 0;
        self.last_active = now;
        self.requests_served = 0;
    }

    /// Take ownership of both buffers, leaving `None` behind, for the
    /// caller to release back into the [`crate::buffer_pool::BufferPool`].
    pub fn take_buffers(&mut self) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        (self.read_buf.take(), self.write_buf.take())
    }
}

impl Default for Conn {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_conn_alignment() {
        assert_eq!(std::mem::align_of::<Conn>(), 64);
    }

    #[test]
    fn reset_for_accept_clears_request_counters() {
        let mut conn = Conn::empty();
        conn.requests_served = 5;
        conn.parse_pos = 10;
        conn.reset_for_accept(7, 100);
        assert_eq!(conn.fd, 7);
        assert_eq!(conn.requests_served, 0);
        assert_eq!(conn.parse_pos, 0);
        assert_eq!(conn.state, ConnState::Reading);
    }

    #[test]
    fn take_buffers_empties_the_slot() {
        let mut conn = Conn::empty();
        conn.read_buf = Some(vec![1, 2, 3]);
        let (r, w) = conn.take_buffers();
        assert_eq!(r, Some(vec![1, 2, 3]));
        assert_eq!(w, None);
        assert!(conn.read_buf.is_none());
    }
}
