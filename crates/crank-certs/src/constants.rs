//! Fixed parameters of the certificate bootstrap protocol.

use std::time::Duration;

pub const RSA_KEY_BITS: usize = 4096;
pub const CERTIFICATE_VALIDITY_DAYS: u32 = 365;

pub const CA_HEALTH_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const CA_HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(16);

pub const GENERAL_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEARTBEAT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub const CA_CERT_FILE: &str = "ca.crt";
pub const CLIENT_CERT_FILE: &str = "client.crt";
pub const CLIENT_KEY_FILE: &str = "client.key";
pub const PLATFORM_CERT_FILE: &str = "platform.crt";
pub const PLATFORM_KEY_FILE: &str = "platform.key";

pub const CERT_FILE_MODE: u32 = 0o644;
pub const KEY_FILE_MODE: u32 = 0o600;

/// Returns the exponential backoff for attempt `n` (0-based), capped at
/// `MAX_BACKOFF`: 1, 2, 4, 8, 16, 16, ...
pub fn backoff_for_attempt(attempt: u32) -> Duration {
	let secs = INITIAL_BACKOFF.as_secs().saturating_mul(1u64 << attempt.min(16));
	Duration::from_secs(secs).min(MAX_BACKOFF)
}
