// src/config.rs
//
// Runtime configuration loaded from environment variables (with `.env`
// support), grounded on chopin-core's `Config::from_env()`. Every knob
// named in spec.md §6 gets an environment variable and a documented
// default here, instead of scattering magic numbers through the reactor
// and buffer-pool code.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the listener binds (default: 127.0.0.1).
    pub host: String,
    /// Port the listener binds (default: 8080).
    pub port: u16,
    /// Worker threads; 0 means one per available core (default: 0).
    pub worker_threads: usize,
    /// Max simultaneous connections per worker's slab (default: 65536).
    pub max_connections_per_worker: usize,
    /// Buffers pre-allocated per worker's read pool at startup (default: 64).
    pub request_buffer_pool_size: usize,
    /// Read buffer size handed out by the buffer pool (default: 262144).
    pub request_buffer_size: usize,
    /// Write/websocket buffer size handed out by the buffer pool (default: 65536).
    pub websocket_buffer_size: usize,
    /// Handlers a freshly-created route pool starts with (default: 5).
    pub handler_pool_default_initial: usize,
    /// Minimum idle handlers kept warm per route (default: 2).
    pub handler_pool_default_min: usize,
    /// Maximum handlers a route's pool may grow to (default: 20).
    pub handler_pool_default_max: usize,
    /// Wall-clock interval, in seconds, between adaptive pool resize
    /// passes (default: 30).
    pub handler_pool_resize_interval_seconds: u64,
    /// Response bodies larger than this switch to chunked encoding
    /// (default: 1048576, 1MiB).
    pub chunked_threshold_bytes: usize,
    /// Max size of a single chunk when chunked encoding is used (default:
    /// 65536, 64KiB).
    pub max_chunk_bytes: usize,
    /// Idle-connection timeout in seconds before the reactor closes it
    /// (default: 60).
    pub idle_timeout_secs: u32,
    /// Max request head + body size accepted before `TooLarge` (default:
    /// 10485760, 10MB).
    pub max_request_size: usize,
    /// Max WebSocket message size, post-reassembly (default: 16777216).
    pub max_ws_message_size: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// documented defaults. Reads a `.env` file if present; a missing
    /// `.env` is not an error.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        Ok(Config {
            host: env_or("CHOPIN_HOST", "127.0.0.1"),
            port: env_parsed("CHOPIN_PORT", 8080),
            worker_threads: env_parsed("CHOPIN_WORKER_THREADS", 0),
            max_connections_per_worker: env_parsed("CHOPIN_MAX_CONNECTIONS_PER_WORKER", 65536),
            request_buffer_pool_size: env_parsed("CHOPIN_REQUEST_BUFFER_POOL_SIZE", 64),
            request_buffer_size: env_parsed("CHOPIN_REQUEST_BUFFER_SIZE", 262_144),
            websocket_buffer_size: env_parsed("CHOPIN_WEBSOCKET_BUFFER_SIZE", 65_536),
            handler_pool_default_initial: env_parsed("CHOPIN_HANDLER_POOL_DEFAULT_INITIAL", 5),
            handler_pool_default_min: env_parsed("CHOPIN_HANDLER_POOL_DEFAULT_MIN", 2),
            handler_pool_default_max: env_parsed("CHOPIN_HANDLER_POOL_DEFAULT_MAX", 20),
            handler_pool_resize_interval_seconds: env_parsed("CHOPIN_HANDLER_POOL_RESIZE_INTERVAL_SECONDS", 30),
            chunked_threshold_bytes: env_parsed("CHOPIN_CHUNKED_THRESHOLD_BYTES", 1_048_576),
            max_chunk_bytes: env_parsed("CHOPIN_MAX_CHUNK_BYTES", 65_536),
            idle_timeout_secs: env_parsed("CHOPIN_IDLE_TIMEOUT_SECS", 60),
            max_request_size: env_parsed("CHOPIN_MAX_REQUEST_SIZE", 10_485_760),
            max_ws_message_size: env_parsed("CHOPIN_MAX_WS_MESSAGE_SIZE", 16_777_216),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves `worker_threads == 0` to the available parallelism.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            worker_threads: 0,
            max_connections_per_worker: 65_536,
            request_buffer_pool_size: 64,
            request_buffer_size: 262_144,
            websocket_buffer_size: 65_536,
            handler_pool_default_initial: 5,
            handler_pool_default_min: 2,
            handler_pool_default_max: 20,
            handler_pool_resize_interval_seconds: 30,
            chunked_threshold_bytes: 1_048_576,
            max_chunk_bytes: 65_536,
            idle_timeout_secs: 60,
            max_request_size: 10_485_760,
            max_ws_message_size: 16_777_216,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.request_buffer_size, 262_144);
        assert_eq!(cfg.websocket_buffer_size, 65_536);
        assert_eq!(cfg.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn zero_worker_threads_resolves_to_available_parallelism() {
        let mut cfg = Config::default();
        cfg.worker_threads = 0;
        assert!(cfg.effective_worker_count() >= 1);
        cfg.worker_threads = 4;
        assert_eq!(cfg.effective_worker_count(), 4);
    }

    #[test]
    fn env_parsed_falls_back_on_missing_or_invalid_var() {
        std::env::remove_var("CHOPIN_TEST_PARSE_VAR");
        assert_eq!(env_parsed::<u16>("CHOPIN_TEST_PARSE_VAR", 42), 42);
    }
}
