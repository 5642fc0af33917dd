//! Debounced operation scheduling
//!
//! [`OperationScheduler`] keeps at most one pending timer per operation id.
//! Scheduling an id that already has a timer cancels that timer first, so a
//! burst of file events collapses into a single callback. The scheduler never
//! runs anything concurrently: a [`TimerHost`] reports expired timers, and the
//! owner of the event loop hands them back through [`OperationScheduler::take`]
//! or [`OperationScheduler::fire`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Identifies one timer registered with a [`TimerHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

/// Host timer primitive
pub trait TimerHost {
    /// Arrange for `token` to be reported once `delay` has elapsed
    fn set_timeout(&mut self, token: TimerToken, delay: Duration);
    /// Forget `token`; it must not be reported afterwards
    fn clear_timeout(&mut self, token: TimerToken);
}

/// Hook run by the idle reclamation trigger
pub trait Reclaim {
    fn reclaim(&mut self);

    /// Current memory usage in bytes, if known
    fn memory_usage(&self) -> Option<u64> {
        None
    }
}

type Callback<C> = Box<dyn FnOnce(&mut C)>;

/// A timer that came due
pub enum Fired<C> {
    Operation { id: String, callback: Callback<C> },
    Reclaim,
}

struct Pending<C> {
    token: TimerToken,
    callback: Callback<C>,
}

/// One pending timer per operation id, plus a single reclamation timer
pub struct OperationScheduler<C, H> {
    host: H,
    next_token: u64,
    pending: HashMap<String, Pending<C>>,
    ids: HashMap<TimerToken, String>,
    reclaim: Option<TimerToken>,
}

impl<C, H: TimerHost> OperationScheduler<C, H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            next_token: 0,
            pending: HashMap::new(),
            ids: HashMap::new(),
            reclaim: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Run `callback` after `delay`, replacing any timer pending for `id`
    ///
    /// Time already waited by a replaced timer is not credited.
    pub fn schedule(
        &mut self,
        id: impl Into<String>,
        delay: Duration,
        callback: impl FnOnce(&mut C) + 'static,
    ) {
        let id = id.into();
        if let Some(previous) = self.pending.remove(&id) {
            self.ids.remove(&previous.token);
            self.host.clear_timeout(previous.token);
            trace!(operation = %id, "superseded pending operation");
        }

        let token = self.allocate();
        self.host.set_timeout(token, delay);
        self.ids.insert(token, id.clone());
        self.pending.insert(
            id,
            Pending {
                token,
                callback: Box::new(callback),
            },
        );
    }

    /// Whether a timer is pending for `id`
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending operations, not counting reclamation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Request an idle reclamation after `delay`
    ///
    /// Returns `false` and does nothing if one is already pending.
    pub fn request_reclaim(&mut self, delay: Duration) -> bool {
        if self.reclaim.is_some() {
            return false;
        }
        let token = self.allocate();
        self.host.set_timeout(token, delay);
        self.reclaim = Some(token);
        true
    }

    pub fn reclaim_pending(&self) -> bool {
        self.reclaim.is_some()
    }

    /// Claim the work for an expired timer
    ///
    /// The pending entry is removed before the callback is handed out, so the
    /// callback may schedule the same id again. Unknown or superseded tokens
    /// yield `None`.
    pub fn take(&mut self, token: TimerToken) -> Option<Fired<C>> {
        if let Some(id) = self.ids.remove(&token) {
            let pending = self.pending.remove(&id)?;
            return Some(Fired::Operation {
                id,
                callback: pending.callback,
            });
        }
        if self.reclaim == Some(token) {
            self.reclaim = None;
            return Some(Fired::Reclaim);
        }
        trace!(?token, "ignoring stale timer");
        None
    }

    /// Run whatever `token` was for against `context`
    ///
    /// Returns whether anything ran.
    pub fn fire(&mut self, token: TimerToken, context: &mut C) -> bool
    where
        C: Reclaim,
    {
        match self.take(token) {
            Some(Fired::Operation { id, callback }) => {
                debug!(operation = %id, "running scheduled operation");
                callback(context);
                true
            }
            Some(Fired::Reclaim) => {
                run_reclaim(context);
                true
            }
            None => false,
        }
    }

    fn allocate(&mut self) -> TimerToken {
        self.next_token += 1;
        TimerToken(self.next_token)
    }
}

/// Run the reclamation hook, logging memory before and after
pub fn run_reclaim<R: Reclaim + ?Sized>(target: &mut R) {
    let before = target.memory_usage();
    target.reclaim();
    let after = target.memory_usage();
    match (before, after) {
        (Some(before), Some(after)) => debug!(before, after, "reclaimed session memory"),
        _ => debug!("reclaimed session memory"),
    }
}

#[derive(Debug, Default)]
struct Clock {
    now: Duration,
    timers: BTreeMap<TimerToken, Duration>,
}

/// Virtual clock for deterministic tests
///
/// Clones share the same clock, so a test can keep one handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTimerHost {
    clock: Rc<RefCell<Clock>>,
}

impl ManualTimerHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.clock.borrow().now
    }

    /// Number of timers still pending
    pub fn pending(&self) -> usize {
        self.clock.borrow().timers.len()
    }

    /// Move the clock forward and return the timers that expired, earliest first
    pub fn advance(&self, by: Duration) -> Vec<TimerToken> {
        let mut clock = self.clock.borrow_mut();
        clock.now += by;
        let now = clock.now;

        let mut due: Vec<(Duration, TimerToken)> = clock
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(token, deadline)| (*deadline, *token))
            .collect();
        due.sort();
        for (_, token) in &due {
            clock.timers.remove(token);
        }
        due.into_iter().map(|(_, token)| token).collect()
    }
}

impl TimerHost for ManualTimerHost {
    fn set_timeout(&mut self, token: TimerToken, delay: Duration) {
        let mut clock = self.clock.borrow_mut();
        let deadline = clock.now + delay;
        clock.timers.insert(token, deadline);
    }

    fn clear_timeout(&mut self, token: TimerToken) {
        self.clock.borrow_mut().timers.remove(&token);
    }
}

/// Real timers that post expirations into an event inbox
///
/// Each timer sleeps on its own thread and sends `wrap(token)` unless it was
/// cleared first. A timer cleared while its message is in flight can still be
/// delivered; [`OperationScheduler::take`] ignores such tokens.
pub struct ThreadTimerHost<M> {
    inbox: Sender<M>,
    wrap: fn(TimerToken) -> M,
    cancelled: HashMap<TimerToken, Arc<AtomicBool>>,
}

impl<M: Send + 'static> ThreadTimerHost<M> {
    pub fn new(inbox: Sender<M>, wrap: fn(TimerToken) -> M) -> Self {
        Self {
            inbox,
            wrap,
            cancelled: HashMap::new(),
        }
    }
}

impl<M: Send + 'static> TimerHost for ThreadTimerHost<M> {
    fn set_timeout(&mut self, token: TimerToken, delay: Duration) {
        // Flags whose timer thread has exited are only referenced from here
        self.cancelled.retain(|_, flag| Arc::strong_count(flag) > 1);

        let flag = Arc::new(AtomicBool::new(false));
        self.cancelled.insert(token, Arc::clone(&flag));
        let inbox = self.inbox.clone();
        let message = (self.wrap)(token);

        thread::spawn(move || {
            thread::sleep(delay);
            if !flag.load(Ordering::SeqCst) {
                // The receiver is gone once the session shut down
                let _ = inbox.send(message);
            }
        });
    }

    fn clear_timeout(&mut self, token: TimerToken) {
        if let Some(flag) = self.cancelled.remove(&token) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Log {
        calls: Vec<&'static str>,
        reclaimed: usize,
    }

    impl Reclaim for Log {
        fn reclaim(&mut self) {
            self.reclaimed += 1;
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn run_due(scheduler: &mut OperationScheduler<Log, ManualTimerHost>, log: &mut Log, by: Duration) {
        let due = scheduler.host().advance(by);
        for token in due {
            scheduler.fire(token, log);
        }
    }

    #[test]
    fn test_reschedule_replaces_pending_callback() {
        let clock = ManualTimerHost::new();
        let mut scheduler = OperationScheduler::new(clock.clone());
        let mut log = Log::default();

        scheduler.schedule("X", ms(100), |log: &mut Log| log.calls.push("cb1"));
        scheduler.schedule("X", ms(50), |log: &mut Log| log.calls.push("cb2"));
        assert_eq!(clock.pending(), 1);

        run_due(&mut scheduler, &mut log, ms(200));
        assert_eq!(log.calls, vec!["cb2"]);
        assert!(!scheduler.is_pending("X"));
    }

    #[test]
    fn test_elapsed_wait_is_not_credited() {
        let clock = ManualTimerHost::new();
        let mut scheduler = OperationScheduler::new(clock.clone());
        let mut log = Log::default();

        scheduler.schedule("build", ms(100), |log: &mut Log| log.calls.push("first"));
        run_due(&mut scheduler, &mut log, ms(90));
        scheduler.schedule("build", ms(100), |log: &mut Log| log.calls.push("second"));

        run_due(&mut scheduler, &mut log, ms(20));
        assert!(log.calls.is_empty());

        run_due(&mut scheduler, &mut log, ms(80));
        assert_eq!(log.calls, vec!["second"]);
    }

    #[test]
    fn test_ids_are_independent() {
        let clock = ManualTimerHost::new();
        let mut scheduler = OperationScheduler::new(clock.clone());
        let mut log = Log::default();

        scheduler.schedule("build", ms(30), |log: &mut Log| log.calls.push("build"));
        scheduler.schedule("reload", ms(10), |log: &mut Log| log.calls.push("reload"));
        assert_eq!(scheduler.pending_count(), 2);

        run_due(&mut scheduler, &mut log, ms(50));
        assert_eq!(log.calls, vec!["reload", "build"]);
    }

    #[test]
    fn test_callback_can_reschedule_its_own_id() {
        let clock = ManualTimerHost::new();
        let mut scheduler: OperationScheduler<Log, _> = OperationScheduler::new(clock.clone());

        scheduler.schedule("X", ms(10), |log: &mut Log| log.calls.push("once"));
        let token = clock.advance(ms(10))[0];

        match scheduler.take(token) {
            Some(Fired::Operation { id, callback }) => {
                assert_eq!(id, "X");
                assert!(!scheduler.is_pending("X"));
                // rescheduling from inside the callback must survive
                scheduler.schedule("X", ms(10), |log: &mut Log| log.calls.push("again"));
                let mut log = Log::default();
                callback(&mut log);
                assert_eq!(log.calls, vec!["once"]);
            }
            _ => panic!("Expected a scheduled operation"),
        }
        assert!(scheduler.is_pending("X"));
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let clock = ManualTimerHost::new();
        let mut scheduler = OperationScheduler::new(clock.clone());
        let mut log = Log::default();

        scheduler.schedule("X", ms(10), |log: &mut Log| log.calls.push("cb"));
        let token = clock.advance(ms(10))[0];
        assert!(scheduler.fire(token, &mut log));
        assert!(!scheduler.fire(token, &mut log));
        assert_eq!(log.calls.len(), 1);
    }

    #[test]
    fn test_reclaim_has_single_pending_request() {
        let clock = ManualTimerHost::new();
        let mut scheduler = OperationScheduler::new(clock.clone());
        let mut log = Log::default();

        assert!(scheduler.request_reclaim(ms(100)));
        assert!(!scheduler.request_reclaim(ms(10)));
        assert_eq!(clock.pending(), 1);

        run_due(&mut scheduler, &mut log, ms(100));
        assert_eq!(log.reclaimed, 1);
        assert!(!scheduler.reclaim_pending());

        assert!(scheduler.request_reclaim(ms(100)));
    }

    #[test]
    fn test_thread_host_delivers_to_inbox() {
        let (tx, rx) = mpsc::channel();
        let mut host = ThreadTimerHost::new(tx, |token| token);

        host.set_timeout(TimerToken(1), ms(50));
        host.set_timeout(TimerToken(2), ms(1));
        host.clear_timeout(TimerToken(1));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(TimerToken(2)));
        assert!(rx.recv_timeout(ms(200)).is_err());
    }
}
