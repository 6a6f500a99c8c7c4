//! Bounded-retry health verification for the application service.
//!
//! The service supervisor offers no readiness notification, so readiness is
//! polled: the predicate is evaluated up to a fixed number of times with a
//! fixed pause in between.

use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};

use thiserror::Error as ThisError;
use tracing::{debug, info};

/// Default number of predicate evaluations before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default pause between two evaluations.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6);
/// Timeout for a single TCP connect probe.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// How often and how patiently to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// The service was started but never became healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("Service not responding on port {port} after {attempts} attempts")]
pub struct ServiceNotResponding {
    pub port: u16,
    pub attempts: u32,
}

/// Polls `is_healthy` until it returns `true` or the policy's attempts are used up.
///
/// `sleep` is called between attempts only, never after the final one.
/// Returns the 1-based attempt that succeeded.
pub fn wait_until_responding<P, S>(
    port: u16,
    policy: HealthPolicy,
    mut is_healthy: P,
    mut sleep: S,
) -> Result<u32, ServiceNotResponding>
where
    P: FnMut() -> bool,
    S: FnMut(Duration),
{
    for attempt in 1..=policy.max_attempts {
        info!("Waiting for service on port {port} (attempt {attempt})");
        if is_healthy() {
            info!("Service responded on port {port}");
            return Ok(attempt);
        }
        if attempt < policy.max_attempts {
            sleep(policy.interval);
        }
    }
    Err(ServiceNotResponding {
        port,
        attempts: policy.max_attempts,
    })
}

/// Returns `true` if something accepts TCP connections on `127.0.0.1:port`.
#[must_use]
pub fn is_port_open(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let open = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok();
    debug!("Probed {addr} - open: {open}");
    open
}
