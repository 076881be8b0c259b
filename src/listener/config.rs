use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default capacity of the success queue. Successes beyond it are dropped.
pub const SUCCESS_CAPACITY: usize = 16;

/// Tuning for a running knock listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: IpAddr,
    pub read_timeout: Duration,     // Max wait for a step's payload
    pub poll_interval: Duration,    // How often accept loops look at the stop flag
    pub success_capacity: usize,
    pub max_in_flight: usize,       // Concurrent connection handlers across all steps
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            read_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            success_capacity: SUCCESS_CAPACITY,
            max_in_flight: 256,
        }
    }
}

impl ListenerConfig {
    /// `poll_interval`, kept above zero. A zero socket timeout is rejected by
    /// the OS and a zero sleep turns the accept loop into a spin.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_never_zero() {
        let config = ListenerConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(ListenerConfig::default().poll_interval(), Duration::from_millis(50));
    }
}
