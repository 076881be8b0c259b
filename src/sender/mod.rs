//! The knocking side: plays a sequence against one host, strictly in order.

pub mod simple;
pub mod stealth;

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use rand::Rng;
use tracing::{debug, info, warn};
use crate::errors::KnockError;
use crate::knock::Knock;

pub use simple::SimpleSender;
pub use stealth::StealthSender;

/// Delivers a single knock to a host.
///
/// Implementations must return only once the knock is fully on the wire and
/// any connection it opened is torn down.
pub trait Sender {
    fn knock(&mut self, host: Ipv4Addr, knock: &Knock) -> Result<(), KnockError>;
}

/// How many times a failed knock is tried, and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Fail on the first error.
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Keep trying through transient failures, backing off up to `max_delay`.
    pub fn persistent() -> Self {
        RetryPolicy {
            max_attempts: 8,
            ..Default::default()
        }
    }

    pub fn with_attempts(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    /// Exponential delay after failed `attempt` (1-based), before jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent).min(self.max_delay)
    }

    /// `delay` plus up to a quarter of it at random, so retries don't march in lockstep.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let jitter_ms = (delay.as_millis() / 4) as u64;
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Knock `knocks` on `host` with a [`SimpleSender`], failing on the first error.
pub fn send(host: &str, knocks: &[Knock]) -> Result<(), KnockError> {
    send_with(host, knocks, &mut SimpleSender::default(), &RetryPolicy::default())
}

/// Knock `knocks` on `host` in order through `sender`.
///
/// Each knock completes before the next starts. A knock that still fails after
/// the retry policy is exhausted aborts the sequence.
pub fn send_with(host: &str, knocks: &[Knock], sender: &mut dyn Sender, retry: &RetryPolicy) -> Result<(), KnockError> {
    if knocks.is_empty() {
        return Err(KnockError::EmptySequence);
    }

    let target = resolve_hostname(host)?;
    for (step, knock) in knocks.iter().enumerate() {
        knock_with_retry(sender, target, knock, retry)?;
        debug!(%target, step, %knock, "knocked");
    }

    info!(%target, steps = knocks.len(), "knock sequence sent");
    Ok(())
}

fn knock_with_retry(sender: &mut dyn Sender, target: Ipv4Addr, knock: &Knock, retry: &RetryPolicy) -> Result<(), KnockError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match sender.knock(target, knock) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_attempts => {
                let delay = retry.jittered_delay(attempt);
                warn!(%target, %knock, attempt, error = %e, ?delay, "knock failed, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolve hostname to an IPv4 address.
pub fn resolve_hostname(hostname: &str) -> Result<Ipv4Addr, KnockError> {
    // DNS lookup, port is irrelevant
    let socket_addrs = (hostname, 0u16)
        .to_socket_addrs()
        .map_err(|e| KnockError::Resolve(format!("{}: {}", hostname, e)))?;

    socket_addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4_addr) => Some(*v4_addr.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| KnockError::Resolve(format!("{}: IPv4 address not found", hostname)))
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Records knocks, failing the first `failures` calls.
    struct Recorder {
        failures: u32,
        calls: u32,
        knocked: Vec<(Ipv4Addr, u16)>,
    }

    impl Recorder {
        fn new(failures: u32) -> Self {
            Recorder { failures, calls: 0, knocked: Vec::new() }
        }
    }

    impl Sender for Recorder {
        fn knock(&mut self, host: Ipv4Addr, knock: &Knock) -> Result<(), KnockError> {
            self.calls += 1;
            if self.calls <= self.failures {
                return Err(KnockError::Send {
                    port: knock.port,
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }
            self.knocked.push((host, knock.port));
            Ok(())
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_knocks_in_order() {
        let knocks = crate::knock::demo_sequence();
        let mut recorder = Recorder::new(0);
        send_with("127.0.0.1", &knocks, &mut recorder, &RetryPolicy::default()).unwrap();

        let ports: Vec<u16> = recorder.knocked.iter().map(|(_, port)| *port).collect();
        assert_eq!(ports, vec![8081, 8082, 8080, 8083, 8084]);
        assert!(recorder.knocked.iter().all(|(host, _)| *host == Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_default_policy_fails_fast() {
        let mut recorder = Recorder::new(1);
        let result = send_with("127.0.0.1", &[Knock::port(1)], &mut recorder, &RetryPolicy::default());
        assert!(matches!(result, Err(KnockError::Send { port: 1, .. })));
        assert_eq!(recorder.calls, 1);
    }

    #[test]
    fn test_retry_recovers() {
        let mut recorder = Recorder::new(2);
        send_with("127.0.0.1", &[Knock::port(1), Knock::port(2)], &mut recorder, &fast_retry(3)).unwrap();
        assert_eq!(recorder.calls, 4);
        assert_eq!(recorder.knocked.len(), 2);
    }

    #[test]
    fn test_retry_is_bounded() {
        let mut recorder = Recorder::new(u32::MAX);
        let result = send_with("127.0.0.1", &[Knock::port(1), Knock::port(2)], &mut recorder, &fast_retry(5));
        assert!(result.is_err());

        // Never got to the second knock
        assert_eq!(recorder.calls, 5);
        assert!(recorder.knocked.is_empty());
    }

    #[test]
    fn test_backoff() {
        let retry = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
        assert_eq!(retry.delay(4), Duration::from_millis(800));
        assert_eq!(retry.delay(5), Duration::from_secs(1));
        assert_eq!(retry.delay(u32::MAX), Duration::from_secs(1));

        for attempt in 1..10 {
            let jittered = retry.jittered_delay(attempt);
            assert!(jittered >= retry.delay(attempt));
            assert!(jittered <= retry.delay(attempt) * 5 / 4);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let mut recorder = Recorder::new(0);
        assert!(matches!(
            send_with("127.0.0.1", &[], &mut recorder, &RetryPolicy::default()),
            Err(KnockError::EmptySequence)
        ));
    }

    #[test]
    fn test_resolve_hostname() {
        assert_eq!(resolve_hostname("127.0.0.1").unwrap(), Ipv4Addr::LOCALHOST);
        assert_eq!(resolve_hostname("10.0.0.2").unwrap(), Ipv4Addr::new(10, 0, 0, 2));
        assert!(matches!(resolve_hostname("::1"), Err(KnockError::Resolve(_))));
    }
}
