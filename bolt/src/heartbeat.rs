use std::time::Duration;

/// Which heartbeat deadline a timer tracks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Time to send the next ping.
    Ping,
    /// Deadline for the pong answering the last ping.
    Grace,
}

/// Identifies one scheduled timer.
///
/// Every timer gets a new id, so an expiry that was already on its way when the timer was
/// cancelled can be told apart from the live timer and ignored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId {
    kind: TimerKind,
    generation: u64,
}

impl TimerId {
    /// Returns which heartbeat deadline this timer tracks.
    pub fn kind(self) -> TimerKind {
        self.kind
    }
}

/// The event loop's one-shot timer facility.
pub trait Timers {
    /// Arranges for [`Connection::on_timer`](struct.Connection.html#method.on_timer) to be called with `id` once
    /// `after` has elapsed.
    fn schedule(&mut self, id: TimerId, after: Duration);

    /// Cancels a timer scheduled earlier. Cancelling a timer that has already fired must be harmless.
    fn cancel(&mut self, id: TimerId);
}

/// What the connection must do after a timer fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing; the timer was stale.
    Ignore,
    /// Send a ping. The grace timer is already running.
    SendPing,
    /// No pong arrived in time.
    Lost,
}

/// Sends periodic pings and watches for the pongs that answer them.
///
/// At most one ping timer and one grace timer are live at a time. Arming either one cancels its
/// predecessor first.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    grace: Duration,
    generation: u64,
    running: bool,
    ping_timer: Option<TimerId>,
    grace_timer: Option<TimerId>,
}

impl HeartbeatMonitor {
    /// Creates a monitor that pings every `interval` and allows `grace` for each pong.
    #[must_use]
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self {
            interval,
            grace,
            generation: 0,
            running: false,
            ping_timer: None,
            grace_timer: None,
        }
    }

    /// Returns the interval between pings.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns how long a pong may take.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Returns `true` between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns `true` if a ping has been sent and its pong has not arrived.
    pub fn is_awaiting_pong(&self) -> bool {
        self.grace_timer.is_some()
    }

    fn arm<M: Timers + ?Sized>(&mut self, kind: TimerKind, timers: &mut M) {
        self.generation += 1;
        let id = TimerId {
            kind,
            generation: self.generation,
        };

        let (slot, after) = match kind {
            TimerKind::Ping => (&mut self.ping_timer, self.interval),
            TimerKind::Grace => (&mut self.grace_timer, self.grace),
        };

        if let Some(old) = slot.replace(id) {
            timers.cancel(old);
        }

        timers.schedule(id, after);
    }

    /// Schedules the first ping.
    pub fn start<M: Timers + ?Sized>(&mut self, timers: &mut M) {
        tracing::debug!(interval = ?self.interval, grace = ?self.grace, "starting heartbeat");
        self.running = true;
        self.arm(TimerKind::Ping, timers);
    }

    /// Handles an expired timer.
    pub fn on_timer<M: Timers + ?Sized>(&mut self, id: TimerId, timers: &mut M) -> HeartbeatAction {
        match id.kind {
            TimerKind::Ping if self.ping_timer == Some(id) => {
                self.ping_timer = None;
                self.arm(TimerKind::Grace, timers);
                HeartbeatAction::SendPing
            }
            TimerKind::Grace if self.grace_timer == Some(id) => {
                self.grace_timer = None;
                HeartbeatAction::Lost
            }
            _ => {
                tracing::trace!(?id, "ignoring stale heartbeat timer");
                HeartbeatAction::Ignore
            }
        }
    }

    /// Handles a pong: the grace timer is cancelled and the next ping scheduled a full interval from now.
    ///
    /// Does nothing once the monitor has been stopped.
    pub fn on_pong<M: Timers + ?Sized>(&mut self, timers: &mut M) {
        if !self.running {
            tracing::trace!("ignoring pong while heartbeat is stopped");
            return;
        }

        if let Some(id) = self.grace_timer.take() {
            timers.cancel(id);
        }

        self.arm(TimerKind::Ping, timers);
    }

    /// Cancels all timers.
    pub fn stop<M: Timers + ?Sized>(&mut self, timers: &mut M) {
        self.running = false;
        for id in self.ping_timer.take().into_iter().chain(self.grace_timer.take()) {
            timers.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor, TimerKind};
    use crate::testing::ManualTimers;

    const INTERVAL: Duration = Duration::from_secs(30);
    const GRACE: Duration = Duration::from_secs(2);

    fn started() -> (HeartbeatMonitor, ManualTimers) {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE);
        let mut timers = ManualTimers::default();
        monitor.start(&mut timers);
        (monitor, timers)
    }

    #[test]
    fn start_schedules_ping() {
        let (_, timers) = started();
        let pending = timers.pending();
        assert_eq!(1, pending.len());
        assert_eq!(TimerKind::Ping, pending[0].1.kind());
        assert_eq!(INTERVAL, pending[0].0);
    }

    #[test]
    fn ping_arms_grace_timer() {
        let (mut monitor, mut timers) = started();
        let expired = timers.advance(INTERVAL);
        assert_eq!(1, expired.len());

        assert_eq!(HeartbeatAction::SendPing, monitor.on_timer(expired[0], &mut timers));
        assert!(monitor.is_awaiting_pong());

        let pending = timers.pending();
        assert_eq!(1, pending.len());
        assert_eq!(TimerKind::Grace, pending[0].1.kind());
        assert_eq!(INTERVAL + GRACE, pending[0].0);
    }

    #[test]
    fn missing_pong_is_lost() {
        let (mut monitor, mut timers) = started();
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);

        let grace = timers.advance(GRACE)[0];
        assert_eq!(HeartbeatAction::Lost, monitor.on_timer(grace, &mut timers));
        assert!(timers.pending().is_empty());
    }

    #[test]
    fn pong_cancels_grace_and_reschedules_ping() {
        let (mut monitor, mut timers) = started();
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);

        timers.advance(GRACE - Duration::from_millis(1));
        monitor.on_pong(&mut timers);
        assert!(!monitor.is_awaiting_pong());

        let pending = timers.pending();
        assert_eq!(1, pending.len());
        assert_eq!(TimerKind::Ping, pending[0].1.kind());
        assert_eq!(INTERVAL * 2 + GRACE - Duration::from_millis(1), pending[0].0);
    }

    #[test]
    fn stale_grace_timer_is_ignored() {
        let (mut monitor, mut timers) = started();
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);
        let grace = timers.pending()[0].1;

        monitor.on_pong(&mut timers);
        assert_eq!(HeartbeatAction::Ignore, monitor.on_timer(grace, &mut timers));
    }

    #[test]
    fn unsolicited_pong_replaces_ping_timer() {
        let (mut monitor, mut timers) = started();
        let first = timers.pending()[0].1;

        monitor.on_pong(&mut timers);
        let pending = timers.pending();
        assert_eq!(1, pending.len());
        assert_ne!(first, pending[0].1);
        assert_eq!(HeartbeatAction::Ignore, monitor.on_timer(first, &mut timers));
    }

    #[test]
    fn stop_cancels_everything() {
        let (mut monitor, mut timers) = started();
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);
        monitor.on_pong(&mut timers);
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);

        monitor.stop(&mut timers);
        assert!(timers.pending().is_empty());
        assert!(!monitor.is_awaiting_pong());
        assert!(!monitor.is_running());
    }

    #[test]
    fn pong_after_stop_does_not_restart() {
        let (mut monitor, mut timers) = started();
        let ping = timers.advance(INTERVAL)[0];
        monitor.on_timer(ping, &mut timers);
        monitor.stop(&mut timers);

        monitor.on_pong(&mut timers);
        assert!(timers.pending().is_empty());
        assert!(timers.advance(INTERVAL * 2).is_empty());
    }

    #[test]
    fn pong_before_start_is_ignored() {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, GRACE);
        let mut timers = ManualTimers::default();
        monitor.on_pong(&mut timers);
        assert!(!monitor.is_running());
        assert!(timers.pending().is_empty());
    }
}
