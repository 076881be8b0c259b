use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use crate::knock::Knock;
use crate::listener::progress::{Outcome, ProgressTable};

/// State shared by every accept loop and connection handler of one listener.
#[derive(Debug)]
pub struct Matcher {
    steps: Vec<Knock>,
    table: Mutex<ProgressTable>,
    successes: Mutex<Option<SyncSender<IpAddr>>>, // Taken on stop
    stopped: AtomicBool,
}

impl Matcher {
    /// New matcher for `steps`, with the receiving end of its success queue.
    pub fn new(steps: Vec<Knock>, success_capacity: usize) -> (Self, Receiver<IpAddr>) {
        // A zero capacity channel would make every publish a rendezvous
        let (successes, rx) = mpsc::sync_channel(success_capacity.max(1));
        let matcher = Matcher {
            table: Mutex::new(ProgressTable::new(steps.len())),
            steps,
            successes: Mutex::new(Some(successes)),
            stopped: AtomicBool::new(false),
        };
        (matcher, rx)
    }

    pub fn steps(&self) -> &[Knock] {
        &self.steps
    }

    /// Payload of `step`, `None` past the end of the sequence.
    pub fn expected(&self, step: usize) -> Option<&[u8]> {
        self.steps.get(step).map(|knock| knock.payload.as_slice())
    }

    /// Record an attempt by `source` at `step`. `received` is `None` when the
    /// payload could not be read in full. A step outside the sequence counts
    /// as a mismatch.
    pub fn observe(&self, source: IpAddr, step: usize, received: Option<&[u8]>) -> Outcome {
        let matched = match (received, self.expected(step)) {
            (Some(received), Some(expected)) => received == expected,
            _ => false,
        };

        let mut table = self.lock_table();
        let outcome = table.record(source, step, matched);

        match outcome {
            Outcome::Advanced(stage) => {
                debug!(%source, step, stage, "knock accepted");
            }
            Outcome::Reset => {
                debug!(%source, step, matched, "knock rejected, progress reset");
            }
            Outcome::Completed => self.publish(source),
        }

        outcome
    }

    /// Stop publishing successes. Anything observed after this returns is dropped.
    ///
    /// The success queue is closed too, so a blocked receiver sees the
    /// disconnect once it has drained what was already published.
    pub fn stop(&self) {
        // Taken so no handler can be between its stop check and its publish
        let _table = self.lock_table();
        self.stopped.store(true, Ordering::SeqCst);
        self.lock_successes().take();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Called with the table lock held.
    fn publish(&self, source: IpAddr) {
        if self.is_stopped() {
            debug!(%source, "sequence completed after stop, ignoring");
            return;
        }

        let successes = self.lock_successes();
        let Some(successes) = successes.as_ref() else {
            return;
        };

        match successes.try_send(source) {
            Ok(()) => info!(%source, "knock sequence completed"),
            Err(TrySendError::Full(_)) => {
                warn!(%source, "success queue full, dropping completed sequence");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(%source, "no one waiting for successes");
            }
        }
    }

    fn lock_successes(&self) -> MutexGuard<'_, Option<SyncSender<IpAddr>>> {
        self.successes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_table(&self) -> MutexGuard<'_, ProgressTable> {
        // Every table update is a single insert or remove, a poisoned table is still consistent
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knock::demo_sequence;
    use rayon::prelude::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    /// Play every step of the demo sequence from `source`.
    fn knock_all(matcher: &Matcher, source: IpAddr) -> Vec<Outcome> {
        (0..matcher.steps().len())
            .map(|step| {
                let payload = matcher.expected(step).unwrap().to_vec();
                matcher.observe(source, step, Some(payload.as_slice()))
            })
            .collect()
    }

    #[test]
    fn test_success_published_once() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 4);
        let outcomes = knock_all(&matcher, ip(7));

        assert_eq!(outcomes.last(), Some(&Outcome::Completed));
        assert_eq!(rx.try_recv(), Ok(ip(7)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_payload_must_match_exactly() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 4);
        let source = ip(7);

        assert_eq!(matcher.observe(source, 0, Some(&[][..])), Outcome::Advanced(1));
        assert_eq!(matcher.observe(source, 1, Some(&[][..])), Outcome::Advanced(2));
        assert_eq!(matcher.observe(source, 2, Some(&b":("[..])), Outcome::Reset);

        // A step without payload does not accept stray bytes either
        assert_eq!(matcher.observe(source, 0, Some(&b"x"[..])), Outcome::Reset);

        // Unreadable payload
        assert_eq!(matcher.observe(source, 0, Some(&[][..])), Outcome::Advanced(1));
        assert_eq!(matcher.observe(source, 1, Some(&[][..])), Outcome::Advanced(2));
        assert_eq!(matcher.observe(source, 2, None), Outcome::Reset);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_nothing_published_after_stop() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 4);
        matcher.stop();

        let outcomes = knock_all(&matcher, ip(7));
        assert_eq!(outcomes.last(), Some(&Outcome::Completed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_closes_success_queue() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 4);
        knock_all(&matcher, ip(7));
        matcher.stop();

        // Published before stop, then disconnected
        assert_eq!(rx.recv(), Ok(ip(7)));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_unknown_step_is_a_mismatch() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 4);
        let source = ip(7);
        let steps = matcher.steps().len();

        assert_eq!(matcher.expected(steps), None);
        assert_eq!(matcher.observe(source, 0, Some(&[][..])), Outcome::Advanced(1));
        assert_eq!(matcher.observe(source, steps, Some(&[][..])), Outcome::Reset);
        assert_eq!(matcher.observe(source, usize::MAX, None), Outcome::Reset);
        assert_eq!(matcher.lock_table().stage(&source), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 1);

        knock_all(&matcher, ip(1));
        knock_all(&matcher, ip(2));

        assert_eq!(rx.try_recv(), Ok(ip(1)));
        assert!(rx.try_recv().is_err());

        // Dropped success still leaves the table clean
        assert_eq!(matcher.lock_table().stage(&ip(2)), 0);
    }

    #[test]
    fn test_interleaved_sources_do_not_interfere() {
        let (matcher, rx) = Matcher::new(demo_sequence(), 64);
        let matcher = Arc::new(matcher);

        // Half of the sources knock correctly, the rest skip the payload step
        let results: Vec<(IpAddr, bool)> = (1..=32u8)
            .into_par_iter()
            .map(|last| {
                let source = ip(last);
                let honest = last % 2 == 0;
                let mut completed = false;
                for step in 0..matcher.steps().len() {
                    if !honest && step == 2 {
                        continue;
                    }
                    let payload = matcher.expected(step).unwrap().to_vec();
                    completed = matcher.observe(source, step, Some(payload.as_slice())) == Outcome::Completed;
                }
                (source, completed)
            })
            .collect();

        for (source, completed) in &results {
            let honest = matches!(source, IpAddr::V4(v4) if v4.octets()[3] % 2 == 0);
            assert_eq!(*completed, honest, "{}", source);
        }

        let mut published: Vec<IpAddr> = rx.try_iter().collect();
        published.sort();
        let mut expected: Vec<IpAddr> = (1..=32u8).filter(|n| n % 2 == 0).map(ip).collect();
        expected.sort();
        assert_eq!(published, expected);
    }

    #[test]
    fn test_concurrent_duplicates_never_double_advance() {
        let (matcher, _rx) = Matcher::new(demo_sequence(), 4);
        let source = ip(9);

        // The first attempt to get the lock advances, every other one resets
        let outcomes: Vec<Outcome> = (0..16)
            .into_par_iter()
            .map(|_| matcher.observe(source, 0, Some(&[][..])))
            .collect();

        let stage = matcher.lock_table().stage(&source);
        assert!(stage <= 1);
        assert!(outcomes.iter().all(|o| matches!(o, Outcome::Advanced(1) | Outcome::Reset)));
    }
}
