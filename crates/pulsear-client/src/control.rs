/// Control channel state.
///
/// The socket itself is driven by [`crate::client::Client`]; this module holds
/// the parts that decide what to send and when to retry, so they can be
/// exercised without a network.

use std::time::Duration;

use tracing::{info, warn};

use pulsear_types::{ClientRef, Envelope, HeartBeat, MessageClass, UserConfig};

/// Heartbeat period while established.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
/// First reconnect delay.
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
/// Reconnect delay ceiling.
pub const BACKOFF_MAX: Duration = Duration::from_secs(600);

/// Doubling reconnect delay, reset once a connection is established.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt. Doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_INITIAL, BACKOFF_MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Reconnecting,
    Established,
    /// Logged out; never reconnects.
    Left,
}

/// Connection lifecycle of the control channel.
#[derive(Debug)]
pub struct ChannelMachine {
    state: ChannelState,
    backoff: Backoff,
    ever_established: bool,
}

impl ChannelMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ChannelState::Disconnected,
            backoff,
            ever_established: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ChannelState::Established
    }

    pub fn has_left(&self) -> bool {
        self.state == ChannelState::Left
    }

    /// A connection attempt is starting. False once the session has left.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ChannelState::Left => false,
            _ => {
                self.state = if self.ever_established {
                    ChannelState::Reconnecting
                } else {
                    ChannelState::Connecting
                };
                true
            }
        }
    }

    /// The socket opened. Returns the greeting to send: `Establish` the first
    /// time, `Reconnect` afterwards.
    pub fn on_open(&mut self) -> MessageClass {
        let greeting = if self.ever_established {
            MessageClass::Reconnect
        } else {
            MessageClass::Establish
        };
        self.state = ChannelState::Established;
        self.ever_established = true;
        self.backoff.reset();
        info!("control channel established ({})", greeting.tag());
        greeting
    }

    /// The socket closed or an attempt failed. Returns how long to wait
    /// before the next attempt, or `None` after a logout.
    pub fn on_close(&mut self) -> Option<Duration> {
        if self.state == ChannelState::Left {
            return None;
        }
        self.state = ChannelState::Disconnected;
        let delay = self.backoff.next_delay();
        warn!("control channel down, retrying in {:?}", delay);
        Some(delay)
    }

    pub fn on_leave(&mut self) {
        self.state = ChannelState::Left;
    }
}

impl Default for ChannelMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

/// Periodic liveness message carrying the current user configuration.
pub fn heartbeat(me: &ClientRef, config: UserConfig) -> Envelope {
    Envelope::to_server(
        me,
        MessageClass::HeartBeat(HeartBeat {
            config,
            dashboard: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..10).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 320, 600, 600, 600]);
    }

    #[test]
    fn test_first_greeting_is_establish() {
        let mut machine = ChannelMachine::default();
        assert!(machine.begin_connect());
        assert_eq!(machine.state(), ChannelState::Connecting);
        assert_eq!(machine.on_open(), MessageClass::Establish);
        assert!(machine.is_established());
    }

    #[test]
    fn test_reconnect_cycle() {
        let mut machine = ChannelMachine::default();
        machine.begin_connect();
        machine.on_open();

        assert_eq!(machine.on_close(), Some(Duration::from_secs(5)));
        assert!(machine.begin_connect());
        assert_eq!(machine.state(), ChannelState::Reconnecting);
        assert_eq!(machine.on_close(), Some(Duration::from_secs(10)));

        machine.begin_connect();
        assert_eq!(machine.on_open(), MessageClass::Reconnect);
        assert_eq!(machine.on_close(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_leave_is_terminal() {
        let mut machine = ChannelMachine::default();
        machine.begin_connect();
        machine.on_open();
        machine.on_leave();
        assert_eq!(machine.on_close(), None);
        assert!(!machine.begin_connect());
        assert!(machine.has_left());
    }

    #[test]
    fn test_heartbeat_has_no_dashboard() {
        let me = ClientRef::new("alice", "1");
        let env = heartbeat(&me, UserConfig::default());
        match env.msg {
            MessageClass::HeartBeat(hb) => assert!(hb.dashboard.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
