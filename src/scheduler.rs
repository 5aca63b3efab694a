use crate::config::Policy;
use crate::host::{Clock, Error, Lifecycle};
use crate::net::Transport;
use crate::wol::{self, MacAddress, ParseError};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use prometheus::{register_int_counter, IntCounter};
use serde_json::Value;

lazy_static! {
    static ref PACKETS_SENT: IntCounter =
        register_int_counter!("wol_packets_sent_total", "Magic packets put on the wire").unwrap();
    static ref SEND_FAILURES: IntCounter = register_int_counter!(
        "wol_send_failures_total",
        "Due packets that could not be sent"
    )
    .unwrap();
    static ref SESSIONS_STARTED: IntCounter =
        register_int_counter!("wol_sessions_started_total", "Wake sessions started").unwrap();
    static ref SESSIONS_EXPIRED: IntCounter = register_int_counter!(
        "wol_sessions_expired_total",
        "Wake sessions abandoned after the timeout"
    )
    .unwrap();
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Active,
}

/// One activation-to-timeout run of retries. Times come from the scheduler's
/// clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WakeSession {
    pub started_at: u64,
    /// Last time a send was attempted, successful or not.
    pub last_send: u64,
}

/// What an evaluation of the scheduler did.
#[derive(Debug)]
pub enum Outcome {
    /// A magic packet went out.
    Sent,
    /// Nothing was due.
    Waiting,
    /// The trigger does not apply in the current state.
    Ignored,
    /// The session ran past its timeout and was dropped.
    Expired,
    /// The session was dropped because the feature is disabled.
    Cancelled,
    /// A send was due but did not happen.
    Skipped(Error),
}

impl Outcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Outcome::Sent)
    }
}

pub struct Scheduler {
    policy: Policy,
    clock: Box<dyn Clock>,
    transport: Box<dyn Transport>,
    session: Option<WakeSession>,
    last_sent: Option<u64>,
    initialized: bool,
}

impl Scheduler {
    pub fn new(policy: Policy, clock: Box<dyn Clock>, transport: Box<dyn Transport>) -> Self {
        Scheduler {
            policy,
            clock,
            transport,
            session: None,
            last_sent: None,
            initialized: false,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn state(&self) -> State {
        match self.session {
            Some(_) => State::Active,
            None => State::Idle,
        }
    }

    pub fn session(&self) -> Option<WakeSession> {
        self.session
    }

    /// Clock time of the last successful send.
    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_connected(&self) -> bool {
        self.transport.link().is_some()
    }

    /// Replaces the policy. Disabling the feature or changing the target
    /// drops the running session without a final packet.
    pub fn set_policy(&mut self, policy: Policy) {
        let cancel = !policy.enabled || policy.target != self.policy.target;
        self.policy = policy;
        if cancel {
            self.cancel();
        }
    }

    /// Parses and installs a new target. On error the old target stays.
    pub fn set_target(&mut self, s: &str) -> Result<(), ParseError> {
        let target: MacAddress = s.parse()?;
        let mut policy = self.policy.clone();
        policy.target = target;
        self.set_policy(policy);
        Ok(())
    }

    pub fn read_from_config(&mut self, root: &Value) -> bool {
        let mut policy = self.policy.clone();
        let complete = policy.read_from_config(root);
        self.set_policy(policy);
        complete
    }

    pub fn add_to_config(&self, root: &mut serde_json::Map<String, Value>) {
        self.policy.add_to_config(root)
    }

    fn cancel(&mut self) {
        if self.session.take().is_some() {
            info!("wake session cancelled");
        }
    }

    fn send(&mut self, now: u64) -> Result<(), Error> {
        if !self.policy.enabled {
            return Err(Error::Disabled);
        }
        let target = self.policy.target;
        if target.is_unconfigured() {
            return Err(Error::UnconfiguredTarget);
        }
        let link = self.transport.link().ok_or(Error::NotConnected)?;
        let dest = link.wol_destination();
        let packet = wol::magic_packet(&target);
        let written = self.transport.send_to(&packet, dest)?;
        if written != packet.len() {
            return Err(Error::ShortWrite(written));
        }
        self.last_sent = Some(now);
        PACKETS_SENT.inc();
        info!("magic packet sent to {} via {}", target, dest);
        Ok(())
    }

    fn report(&self, result: Result<(), Error>) -> Outcome {
        match result {
            Ok(()) => Outcome::Sent,
            Err(e) if e.is_transport_unavailable() => {
                SEND_FAILURES.inc();
                warn!("{}", e);
                Outcome::Skipped(e)
            }
            Err(e) => {
                debug!("not sending: {}", e);
                Outcome::Skipped(e)
            }
        }
    }

    // Starts (or restarts) a session with an immediate send. The session is
    // only opened when the send preconditions hold; a transport error after
    // that leaves it open so the next retry picks it up.
    fn activate(&mut self) -> Outcome {
        let now = self.clock.now_ms();
        let ready = if !self.policy.enabled {
            Err(Error::Disabled)
        } else if self.policy.target.is_unconfigured() {
            Err(Error::UnconfiguredTarget)
        } else if !self.is_connected() {
            Err(Error::NotConnected)
        } else {
            Ok(())
        };
        if let Err(e) = ready {
            return self.report(Err(e));
        }
        self.session = Some(WakeSession {
            started_at: now,
            last_send: now,
        });
        SESSIONS_STARTED.inc();
        let result = self.send(now);
        self.report(result)
    }

    /// Evaluates retries and the timeout at clock time `now`.
    pub fn tick_at(&mut self, now: u64) -> Outcome {
        if !self.initialized {
            return Outcome::Waiting;
        }
        if !self.policy.enabled {
            return match self.session.take() {
                Some(_) => {
                    info!("wake session cancelled, disabled");
                    Outcome::Cancelled
                }
                None => Outcome::Waiting,
            };
        }
        let session = match self.session {
            Some(session) => session,
            None => return Outcome::Waiting,
        };
        let timeout = self.policy.timeout_ms;
        if timeout > 0 && now.saturating_sub(session.started_at) > timeout {
            self.session = None;
            SESSIONS_EXPIRED.inc();
            info!("wake session timed out after {} ms", timeout);
            return Outcome::Expired;
        }
        if !self.policy.periodic_retry
            || now.saturating_sub(session.last_send) < self.policy.retry_interval_ms
        {
            return Outcome::Waiting;
        }
        self.session = Some(WakeSession {
            last_send: now,
            ..session
        });
        let result = self.send(now);
        self.report(result)
    }
}

impl Lifecycle for Scheduler {
    fn on_init(&mut self) {
        info!("Wake-on-LAN initialized, target {}", self.policy.target);
        self.initialized = true;
    }

    fn on_network_up(&mut self) -> Outcome {
        if !self.initialized {
            return Outcome::Ignored;
        }
        debug!("network connected");
        if !self.policy.send_on_network_up || self.session.is_some() {
            return Outcome::Ignored;
        }
        self.activate()
    }

    fn on_tick(&mut self) -> Outcome {
        let now = self.clock.now_ms();
        self.tick_at(now)
    }

    fn on_command(&mut self) -> Outcome {
        if !self.initialized {
            return Outcome::Ignored;
        }
        self.activate()
    }
}


#[cfg(test)]
mod tests {
    use crate::scheduler::fakes::{ManualClock, RecordingTransport};
    use crate::scheduler::*;
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;

    const TARGET: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    fn policy() -> Policy {
        Policy {
            target: MacAddress::new(TARGET),
            ..Policy::default()
        }
    }

    fn scheduler(policy: Policy) -> (Scheduler, ManualClock, RecordingTransport) {
        let clock = ManualClock::default();
        let transport = RecordingTransport::new();
        let mut s = Scheduler::new(policy, Box::new(clock.clone()), Box::new(transport.clone()));
        s.on_init();
        (s, clock, transport)
    }

    #[test]
    fn test_network_up_sends_once() {
        let (mut s, clock, transport) = scheduler(policy());
        clock.set(1_000);
        assert!(s.on_network_up().is_sent());
        assert_eq!(s.state(), State::Active);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(s.last_sent(), Some(1_000));

        clock.set(2_000);
        assert!(matches!(s.on_network_up(), Outcome::Ignored));
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_packet_and_destination() {
        let (mut s, _clock, transport) = scheduler(policy());
        s.on_command();
        let sent = transport.sent.lock().unwrap();
        let (payload, dest) = &sent[0];
        assert_eq!(payload.as_slice(), &wol::magic_packet(&MacAddress::new(TARGET))[..]);
        assert_eq!(*dest, "192.168.1.255:9".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_network_up_respects_policy() {
        let (mut s, _clock, transport) = scheduler(Policy {
            send_on_network_up: false,
            ..policy()
        });
        assert!(matches!(s.on_network_up(), Outcome::Ignored));
        assert_eq!(s.state(), State::Idle);
        assert!(s.on_command().is_sent());
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_triggers_before_init_are_ignored() {
        let clock = ManualClock::default();
        let transport = RecordingTransport::new();
        let mut s = Scheduler::new(policy(), Box::new(clock), Box::new(transport.clone()));
        assert!(matches!(s.on_network_up(), Outcome::Ignored));
        assert!(matches!(s.on_command(), Outcome::Ignored));
        assert!(matches!(s.on_tick(), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 0);
        assert!(!s.is_initialized());
    }

    #[test]
    fn test_retry_interval() {
        let (mut s, clock, transport) = scheduler(policy());
        assert!(s.on_network_up().is_sent());
        assert!(matches!(s.tick_at(10_000), Outcome::Waiting));
        assert!(matches!(s.tick_at(29_999), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 1);

        assert!(s.tick_at(30_000).is_sent());
        assert_eq!(transport.sent_count(), 2);
        assert_eq!(s.session().unwrap().last_send, 30_000);
        assert_eq!(s.last_sent(), Some(30_000));

        // Next retry is measured from the resend.
        assert!(matches!(s.tick_at(59_999), Outcome::Waiting));
        clock.set(60_000);
        assert!(s.on_tick().is_sent());
        assert_eq!(transport.sent_count(), 3);
    }

    #[test]
    fn test_late_tick_sends_once() {
        let (mut s, _clock, transport) = scheduler(policy());
        s.on_command();
        assert!(s.tick_at(45_000).is_sent());
        assert!(matches!(s.tick_at(45_001), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_no_periodic_retry() {
        let (mut s, _clock, transport) = scheduler(Policy {
            periodic_retry: false,
            ..policy()
        });
        s.on_command();
        assert!(matches!(s.tick_at(100_000), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(s.state(), State::Active);
    }

    #[test]
    fn test_timeout_from_session_start() {
        let (mut s, clock, transport) = scheduler(policy());
        // Starting long after boot still gets the full timeout window.
        clock.set(1_000_000);
        assert!(s.on_command().is_sent());
        assert!(s.tick_at(1_030_000).is_sent());
        assert!(s.tick_at(1_300_000).is_sent());
        assert_eq!(s.state(), State::Active);
        assert!(matches!(s.tick_at(1_300_001), Outcome::Expired));
        assert_eq!(s.state(), State::Idle);
        assert!(matches!(s.tick_at(1_400_000), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 3);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let (mut s, _clock, transport) = scheduler(Policy {
            timeout_ms: 0,
            ..policy()
        });
        s.on_command();
        assert!(s.tick_at(10_000_000).is_sent());
        assert_eq!(s.state(), State::Active);
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_session_restarts_after_expiry() {
        let (mut s, clock, transport) = scheduler(policy());
        s.on_network_up();
        assert!(matches!(s.tick_at(300_001), Outcome::Expired));
        clock.set(400_000);
        assert!(s.on_network_up().is_sent());
        assert_eq!(s.session().unwrap().started_at, 400_000);
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_command_restarts_active_session() {
        let (mut s, clock, transport) = scheduler(policy());
        s.on_command();
        clock.set(200_000);
        assert!(s.on_command().is_sent());
        assert_eq!(
            s.session(),
            Some(WakeSession {
                started_at: 200_000,
                last_send: 200_000
            })
        );
        assert!(s.tick_at(450_000).is_sent());
        assert_eq!(transport.sent_count(), 3);
    }

    #[test]
    fn test_unconfigured_target() {
        let (mut s, _clock, transport) = scheduler(Policy::default());
        assert!(matches!(
            s.on_network_up(),
            Outcome::Skipped(Error::UnconfiguredTarget)
        ));
        assert!(matches!(
            s.on_command(),
            Outcome::Skipped(Error::UnconfiguredTarget)
        ));
        assert_eq!(s.state(), State::Idle);
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_disconnected() {
        let (mut s, _clock, transport) = scheduler(policy());
        transport.set_connected(false);
        assert!(!s.is_connected());
        assert!(matches!(s.on_command(), Outcome::Skipped(Error::NotConnected)));
        assert_eq!(s.state(), State::Idle);

        transport.set_connected(true);
        assert!(s.on_network_up().is_sent());
        transport.set_connected(false);
        assert!(matches!(
            s.tick_at(30_000),
            Outcome::Skipped(Error::NotConnected)
        ));
        assert_eq!(s.state(), State::Active);
        // The failed attempt still paces the next retry.
        transport.set_connected(true);
        assert!(matches!(s.tick_at(45_000), Outcome::Waiting));
        assert!(s.tick_at(60_000).is_sent());
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_send_failure_keeps_session() {
        let (mut s, _clock, transport) = scheduler(policy());
        transport.fail.store(true, Ordering::SeqCst);
        assert!(matches!(s.on_command(), Outcome::Skipped(Error::Transport(_))));
        assert_eq!(s.state(), State::Active);
        assert_eq!(s.last_sent(), None);

        transport.fail.store(false, Ordering::SeqCst);
        assert!(s.tick_at(30_000).is_sent());
        assert_eq!(s.last_sent(), Some(30_000));
    }

    #[test]
    fn test_disable_cancels_and_does_not_resume() {
        let (mut s, _clock, transport) = scheduler(policy());
        s.on_command();
        s.set_policy(Policy {
            enabled: false,
            ..policy()
        });
        assert_eq!(s.state(), State::Idle);
        assert!(matches!(s.tick_at(30_000), Outcome::Waiting));
        assert!(matches!(s.on_command(), Outcome::Skipped(Error::Disabled)));

        s.set_policy(policy());
        assert!(matches!(s.tick_at(60_000), Outcome::Waiting));
        assert_eq!(s.state(), State::Idle);
        assert_eq!(transport.sent_count(), 1);

        assert!(s.on_command().is_sent());
        assert_eq!(transport.sent_count(), 2);
    }

    #[test]
    fn test_disabled_at_tick_cancels() {
        let (mut s, _clock, transport) = scheduler(policy());
        s.on_command();
        // Flip the flag without going through set_policy's cancellation.
        s.policy.enabled = false;
        assert!(matches!(s.tick_at(30_000), Outcome::Cancelled));
        assert_eq!(s.state(), State::Idle);
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_retarget_cancels_session() {
        let (mut s, _clock, transport) = scheduler(policy());
        s.on_command();
        s.set_target("01:02:03:04:05:06").unwrap();
        assert_eq!(s.state(), State::Idle);
        assert!(matches!(s.tick_at(30_000), Outcome::Waiting));
        assert_eq!(transport.sent_count(), 1);
    }

    #[test]
    fn test_bad_target_keeps_previous() {
        let (mut s, _clock, _transport) = scheduler(policy());
        s.on_command();
        assert!(s.set_target("not-a-mac").is_err());
        assert_eq!(s.policy().target, MacAddress::new(TARGET));
        assert_eq!(s.state(), State::Active);
    }

    #[test]
    fn test_same_config_keeps_session() {
        let (mut s, _clock, _transport) = scheduler(policy());
        s.on_command();
        let mut root = serde_json::Map::new();
        s.add_to_config(&mut root);
        assert!(s.read_from_config(&Value::Object(root)));
        assert_eq!(s.state(), State::Active);
    }
}
