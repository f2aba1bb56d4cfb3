// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.E Session: per-client audio/spectrum state, modeled as an explicit
//! state machine rather than a loose bag of flags so that invalid
//! transitions (e.g. streaming before the back-end confirms the SSRC)
//! are caught at the type level instead of as a runtime surprise.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::band::band_name;
use crate::queue::BoundedDropOldest;

/// Events that drive a session's state machine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The back-end confirmed it accepted the session's SSRC/params.
    StatusConfirmed,
    /// No status confirmation arrived within the configure timeout.
    ConfirmTimeout,
    /// The client (or SessionManager, on reap) asked the session to close.
    CloseRequested,
    /// The back-end's teardown datagram was sent and acknowledged.
    CloseComplete,
}

/// The current state of a session's lifecycle (§3's lifecycle: Init →
/// Configuring → Streaming → Closing → Closed).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Init,
    Configuring { since: Instant },
    Streaming,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Configuring { .. } => write!(f, "Configuring"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Configuring { .. } | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// §3/§9 "Polymorphism over Session kinds is expressed as a tagged
/// variant" rather than a class hierarchy; kind-specific fields live on
/// the variant that needs them (only Spectrum needs bin geometry).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionKind {
    Audio,
    Iq,
    Spectrum { bin_count: u32, bin_bandwidth_hz: f64 },
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Audio => "audio",
            SessionKind::Iq => "iq",
            SessionKind::Spectrum { .. } => "spectrum",
        }
    }
}

/// Parameters a session was created with (§3 Session attributes).
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub ssrc: u32,
    pub kind: SessionKind,
    pub center_freq_hz: u64,
    pub mode: String,
    pub low_edge_hz: i32,
    pub high_edge_hz: i32,
    pub sample_rate_hz: u32,
}

impl SessionParams {
    pub fn band_name(&self) -> Option<&'static str> {
        band_name(self.center_freq_hz)
    }
}

/// Unique identifier for a registered `SessionListener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Components that want to observe a session's lifecycle without owning
/// it (e.g. a metrics sink, or the owning `UserSessionAggregate`). All
/// methods default to no-ops so listeners override only what they need.
pub trait SessionListener: Send + Sync {
    fn on_state_change(&self, _old: &SessionState, _new: &SessionState) {}
    fn on_closed(&self, _ssrc: u32) {}
}

/// Dispatches lifecycle notifications to registered `SessionListener`s.
#[derive(Default)]
pub struct SessionEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn SessionListener>)>,
}

impl SessionEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn SessionListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn notify_state_change(&self, old: &SessionState, new: &SessionState) {
        for (_, listener) in &self.listeners {
            listener.on_state_change(old, new);
        }
    }

    pub fn notify_closed(&self, ssrc: u32) {
        for (_, listener) in &self.listeners {
            listener.on_closed(ssrc);
        }
    }
}

/// Configure handshakes that don't confirm within this window are
/// treated as failed (§4.E / §7).
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bounded-queue depths (§5 "Resource bounds"), overridden by
/// `ServerConfig` at construction.
pub const DEFAULT_QUEUE_DEPTH_AUDIO: usize = 256;
pub const DEFAULT_QUEUE_DEPTH_SPECTRUM: usize = 16;

/// A single client's view onto one receiver: the SSRC it was allocated,
/// its state machine, its outbound delivery queue, and the listeners
/// watching its lifecycle. Owned by `SessionManager` behind an `Arc` so
/// adapters and the reaper can share it without cloning the machine
/// itself.
pub struct Session {
    pub id: String,
    pub params: SessionParams,
    pub user_session_id: String,
    pub client_ip: IpAddr,
    pub source_ip: Option<IpAddr>,
    pub channel_name: String,
    pub bypass_password: Option<String>,
    pub created_at: Instant,
    last_active: Mutex<Instant>,
    machine: Mutex<SessionMachine>,
    emitter: Mutex<SessionEventEmitter>,
    queue: BoundedDropOldest<Vec<u8>>,
    drop_count: AtomicU64,
    bands_seen: Mutex<HashSet<String>>,
    modes_seen: Mutex<HashSet<String>>,
}

/// Parameters needed to construct a `Session` beyond its radio params,
/// kept as a small struct so `SessionManager::create` doesn't grow an
/// ever-longer positional argument list.
pub struct SessionIdentity {
    pub id: String,
    pub user_session_id: String,
    pub client_ip: IpAddr,
    pub source_ip: Option<IpAddr>,
    pub channel_name: String,
    pub bypass_password: Option<String>,
    pub queue_depth: usize,
}

impl Session {
    pub fn new(params: SessionParams, identity: SessionIdentity) -> Self {
        let now = Instant::now();
        let mut bands_seen = HashSet::new();
        if let Some(band) = params.band_name() {
            bands_seen.insert(band.to_string());
        }
        let mut modes_seen = HashSet::new();
        if !params.mode.is_empty() {
            modes_seen.insert(params.mode.clone());
        }

        Self {
            id: identity.id,
            user_session_id: identity.user_session_id,
            client_ip: identity.client_ip,
            source_ip: identity.source_ip,
            channel_name: identity.channel_name,
            bypass_password: identity.bypass_password,
            created_at: now,
            last_active: Mutex::new(now),
            machine: Mutex::new(SessionMachine::new()),
            emitter: Mutex::new(SessionEventEmitter::new()),
            queue: BoundedDropOldest::new(identity.queue_depth.max(1)),
            drop_count: AtomicU64::new(0),
            bands_seen: Mutex::new(bands_seen),
            modes_seen: Mutex::new(modes_seen),
            params,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.params.ssrc
    }

    pub fn kind(&self) -> SessionKind {
        self.params.kind
    }

    pub fn state(&self) -> SessionState {
        self.machine.lock().expect("session machine poisoned").state().clone()
    }

    pub fn register_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.emitter
            .lock()
            .expect("session emitter poisoned")
            .register(listener)
    }

    pub fn begin_configuring(&self) {
        let mut machine = self.machine.lock().expect("session machine poisoned");
        let old = machine.state().clone();
        machine.begin_configuring(Instant::now());
        let new = machine.state().clone();
        drop(machine);
        self.emitter
            .lock()
            .expect("session emitter poisoned")
            .notify_state_change(&old, &new);
    }

    /// Applies an event to the session's state machine, notifying
    /// listeners if the state actually changed. Returns the resulting
    /// state.
    pub fn apply(&self, event: SessionEvent) -> SessionState {
        let mut machine = self.machine.lock().expect("session machine poisoned");
        let old = machine.state().clone();
        let changed = machine.process_event(event);
        let new = machine.state().clone();
        drop(machine);

        if changed {
            let emitter = self.emitter.lock().expect("session emitter poisoned");
            emitter.notify_state_change(&old, &new);
            if matches!(new, SessionState::Closed) {
                emitter.notify_closed(self.params.ssrc);
            }
        }
        new
    }

    /// Marks the session as having been touched by activity (a Deliver()
    /// call, a received packet, or a state transition) — §4.E
    /// "every transition updates last_active; every Deliver() call
    /// updates it".
    pub fn touch(&self) {
        *self.last_active.lock().expect("last_active poisoned") = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock().expect("last_active poisoned")
    }

    pub fn is_idle(&self, keepalive_timeout: Duration) -> bool {
        self.last_active().elapsed() >= keepalive_timeout && self.queue.is_empty()
    }

    /// §4.D: receivers enqueue a raw payload (already demultiplexed by
    /// SSRC); on overflow the oldest entry is dropped and the drop
    /// counter incremented (I5). Never blocks.
    pub fn enqueue(&self, payload: Vec<u8>) {
        if self.queue.push(payload).is_some() {
            self.drop_count.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    /// Consumer-side read (§4.E `Deliver()`), waiting for data if the
    /// queue is currently empty.
    pub async fn deliver(&self) -> Vec<u8> {
        let payload = self.queue.pop().await;
        self.touch();
        payload
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Records a band/mode this session has touched (§3 `bands_seen`,
    /// `modes_seen`: "sets; monotonically grow during lifetime"). Called
    /// on creation and again after every successful `Retune`.
    pub fn record_band_mode(&self, band: Option<&str>, mode: &str) {
        if let Some(band) = band {
            self.bands_seen
                .lock()
                .expect("bands_seen poisoned")
                .insert(band.to_string());
        }
        if !mode.is_empty() {
            self.modes_seen
                .lock()
                .expect("modes_seen poisoned")
                .insert(mode.to_string());
        }
    }

    pub fn bands_seen(&self) -> Vec<String> {
        self.bands_seen
            .lock()
            .expect("bands_seen poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn modes_seen(&self) -> Vec<String> {
        self.modes_seen
            .lock()
            .expect("modes_seen poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// Drives `SessionState` transitions in response to `SessionEvent`s.
/// Kept separate from `Session` itself so the transition table can be
/// unit tested without any I/O.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    transition_count: u64,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Init,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Begin the configure handshake; called once the SessionManager has
    /// sent the Create command to the back-end.
    pub fn begin_configuring(&mut self, now: Instant) {
        self.state = SessionState::Configuring { since: now };
        self.transition_count += 1;
    }

    /// Process an event, returning true if the state changed.
    pub fn process_event(&mut self, event: SessionEvent) -> bool {
        if let Some(next) = self.next_state(event) {
            self.state = next;
            self.transition_count += 1;
            true
        } else {
            false
        }
    }

    fn next_state(&self, event: SessionEvent) -> Option<SessionState> {
        match (&self.state, event) {
            (SessionState::Configuring { .. }, SessionEvent::StatusConfirmed) => {
                Some(SessionState::Streaming)
            }
            (SessionState::Configuring { .. }, SessionEvent::ConfirmTimeout) => {
                Some(SessionState::Closing)
            }
            (SessionState::Streaming, SessionEvent::CloseRequested) => {
                Some(SessionState::Closing)
            }
            (SessionState::Configuring { .. }, SessionEvent::CloseRequested) => {
                Some(SessionState::Closing)
            }
            (SessionState::Closing, SessionEvent::CloseComplete) => Some(SessionState::Closed),
            // Already closed, or an event that doesn't apply to the
            // current state: no transition.
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicBool;

    fn test_params() -> SessionParams {
        SessionParams {
            ssrc: 7,
            kind: SessionKind::Audio,
            center_freq_hz: 14_074_000,
            mode: "usb".to_string(),
            low_edge_hz: -1500,
            high_edge_hz: 1500,
            sample_rate_hz: 12000,
        }
    }

    fn test_identity(queue_depth: usize) -> SessionIdentity {
        SessionIdentity {
            id: "session-1".to_string(),
            user_session_id: "user-abc".to_string(),
            client_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            source_ip: None,
            channel_name: "audio".to_string(),
            bypass_password: None,
            queue_depth,
        }
    }

    #[test]
    fn starts_in_init() {
        let m = SessionMachine::new();
        assert_eq!(*m.state(), SessionState::Init);
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut m = SessionMachine::new();
        m.begin_configuring(Instant::now());
        assert!(matches!(m.state(), SessionState::Configuring { .. }));

        assert!(m.process_event(SessionEvent::StatusConfirmed));
        assert_eq!(*m.state(), SessionState::Streaming);

        assert!(m.process_event(SessionEvent::CloseRequested));
        assert_eq!(*m.state(), SessionState::Closing);

        assert!(m.process_event(SessionEvent::CloseComplete));
        assert_eq!(*m.state(), SessionState::Closed);
    }

    #[test]
    fn confirm_timeout_goes_straight_to_closing() {
        let mut m = SessionMachine::new();
        m.begin_configuring(Instant::now());
        assert!(m.process_event(SessionEvent::ConfirmTimeout));
        assert_eq!(*m.state(), SessionState::Closing);
    }

    #[test]
    fn closed_state_rejects_all_events() {
        let mut m = SessionMachine::new();
        m.begin_configuring(Instant::now());
        m.process_event(SessionEvent::StatusConfirmed);
        m.process_event(SessionEvent::CloseRequested);
        m.process_event(SessionEvent::CloseComplete);

        assert!(!m.process_event(SessionEvent::StatusConfirmed));
        assert!(!m.process_event(SessionEvent::CloseRequested));
        assert_eq!(*m.state(), SessionState::Closed);
    }

    #[test]
    fn session_drives_its_machine_and_notifies_on_close() {
        struct Flag(AtomicBool);
        impl SessionListener for Flag {
            fn on_closed(&self, _ssrc: u32) {
                self.0.store(true, Ordering::Relaxed);
            }
        }

        let session = Session::new(test_params(), test_identity(8));
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        session.register_listener(flag.clone());

        assert_eq!(session.state(), SessionState::Init);
        session.begin_configuring();
        assert!(matches!(session.state(), SessionState::Configuring { .. }));

        session.apply(SessionEvent::StatusConfirmed);
        assert_eq!(session.state(), SessionState::Streaming);

        session.apply(SessionEvent::CloseRequested);
        session.apply(SessionEvent::CloseComplete);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(flag.0.load(Ordering::Relaxed));
    }

    #[test]
    fn listener_is_notified_and_can_be_unregistered() {
        struct Flag(AtomicBool);
        impl SessionListener for Flag {
            fn on_closed(&self, _ssrc: u32) {
                self.0.store(true, Ordering::Relaxed);
            }
        }

        let mut emitter = SessionEventEmitter::new();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let id = emitter.register(flag.clone());

        emitter.notify_closed(42);
        assert!(flag.0.load(Ordering::Relaxed));

        emitter.unregister(id);
        flag.0.store(false, Ordering::Relaxed);
        emitter.notify_closed(42);
        assert!(!flag.0.load(Ordering::Relaxed));
    }

    #[test]
    fn enqueue_past_capacity_drops_oldest_and_counts() {
        let session = Session::new(test_params(), test_identity(2));
        session.enqueue(vec![1]);
        session.enqueue(vec![2]);
        session.enqueue(vec![3]);
        assert_eq!(session.drop_count(), 1);
        assert_eq!(session.queue_len(), 2);
    }

    #[tokio::test]
    async fn deliver_returns_payloads_in_order() {
        let session = Session::new(test_params(), test_identity(8));
        session.enqueue(vec![1]);
        session.enqueue(vec![2]);
        assert_eq!(session.deliver().await, vec![1]);
        assert_eq!(session.deliver().await, vec![2]);
    }

    #[test]
    fn new_session_seeds_bands_and_modes_from_params() {
        let session = Session::new(test_params(), test_identity(8));
        assert_eq!(session.bands_seen(), vec!["20m".to_string()]);
        assert_eq!(session.modes_seen(), vec!["usb".to_string()]);
    }

    #[test]
    fn is_idle_requires_both_timeout_and_empty_queue() {
        let session = Session::new(test_params(), test_identity(8));
        assert!(!session.is_idle(Duration::from_secs(3600)));
        assert!(session.is_idle(Duration::from_secs(0)));
        session.enqueue(vec![1]);
        assert!(!session.is_idle(Duration::from_secs(0)));
    }
}
