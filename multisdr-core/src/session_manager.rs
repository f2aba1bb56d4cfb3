// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.F SessionManager: the single authority over session lifetime and
//! SSRC allocation (I1, I2). All mutation flows through one internal
//! task so that "allocate an SSRC" and "insert into the registry" happen
//! as one atomic step, instead of needing a lock held across an await.
//!
//! The hot per-packet SSRC lookup that `AudioReceiver`/`SpectrumReceiver`
//! perform on every datagram does NOT go through this task: it reads a
//! separate `ReceiverRegistry`, a plain `RwLock<HashMap>` kept in sync
//! with the manager's own map, so a receiver is never one `.await` away
//! from a session it needs right now.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::aggregate::UserSessionAggregate;
use crate::error::{SessionError, SessionResult};
use crate::session::{Session, SessionIdentity, SessionKind, SessionParams};

/// Parameters a client supplies when requesting a new session (§3).
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub user_session_id: String,
    pub remote_addr: IpAddr,
    pub source_ip: Option<IpAddr>,
    pub channel_name: String,
    pub kind: SessionKind,
    pub mode: String,
    pub center_freq_hz: u64,
    pub low_edge_hz: i32,
    pub high_edge_hz: i32,
    pub sample_rate_hz: u32,
    /// Present and valid bypass tokens exempt the caller from the
    /// per-IP session cap (§3 "sessions created with a valid bypass
    /// password are exempt from the per-IP limit, never the global
    /// one").
    pub bypass_password: Option<String>,
}

/// Commands accepted by the SessionManager's internal task.
pub enum ManagerCommand {
    Create(CreateRequest),
    Lookup { ssrc: u32 },
    ListByUser { user_session_id: String },
    Close { ssrc: u32 },
    AggregateForUser { user_session_id: String },
    Reap,
}

enum ManagerReply {
    Created(Arc<Session>),
    Found(Option<Arc<Session>>),
    List(Vec<Arc<Session>>),
    Aggregate(Option<UserSessionAggregate>),
    Closed,
    Reaped(Vec<u32>),
}

struct ManagerRequest {
    cmd: ManagerCommand,
    respond_to: oneshot::Sender<SessionResult<ManagerReply>>,
}

/// Per-manager limits (§3 invariants, §5 resource model).
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_sessions_total: u32,
    pub max_sessions_per_ip: u32,
    /// A session with an empty outbound queue that hasn't been touched
    /// within this window is eligible for reaping (§4.F "Reaping").
    pub keepalive_timeout: Duration,
    /// How often the background reaper sweeps for idle sessions.
    pub reap_interval: Duration,
    pub audio_queue_depth: usize,
    pub spectrum_queue_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions_total: 200,
            max_sessions_per_ip: 8,
            keepalive_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(10),
            audio_queue_depth: crate::session::DEFAULT_QUEUE_DEPTH_AUDIO,
            spectrum_queue_depth: crate::session::DEFAULT_QUEUE_DEPTH_SPECTRUM,
        }
    }
}

/// A plain, synchronous SSRC → Session map kept in lockstep with the
/// manager's authoritative map, so receive-path code never has to go
/// through the manager's async request/response channel (§4.D "must
/// never block on the SessionManager").
#[derive(Clone)]
pub struct ReceiverRegistry {
    inner: Arc<RwLock<HashMap<u32, Arc<Session>>>>,
}

impl ReceiverRegistry {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Synchronous, lock-only lookup — safe to call from the datagram
    /// receive loop.
    pub fn lookup(&self, ssrc: u32) -> Option<Arc<Session>> {
        self.inner
            .read()
            .expect("receiver registry poisoned")
            .get(&ssrc)
            .cloned()
    }

    fn insert(&self, ssrc: u32, session: Arc<Session>) {
        self.inner
            .write()
            .expect("receiver registry poisoned")
            .insert(ssrc, session);
    }

    fn remove(&self, ssrc: u32) {
        self.inner
            .write()
            .expect("receiver registry poisoned")
            .remove(&ssrc);
    }
}

/// Handle held by callers (adapters, the reaper). Cloning is cheap; all
/// handles share the same backing task.
#[derive(Clone)]
pub struct SessionManager {
    tx: mpsc::Sender<ManagerRequest>,
    registry: ReceiverRegistry,
}

impl SessionManager {
    /// Spawns the manager's backing task and its reaper, returning a
    /// handle to both.
    pub fn spawn(limits: Limits) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let registry = ReceiverRegistry::new();
        tokio::spawn(run_manager_task(rx, limits, registry.clone()));

        let reap_tx = tx.clone();
        let reap_interval = limits.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reap_interval);
            loop {
                ticker.tick().await;
                let (respond_to, rx) = oneshot::channel();
                if reap_tx
                    .send(ManagerRequest {
                        cmd: ManagerCommand::Reap,
                        respond_to,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                let _ = rx.await;
            }
        });

        Self { tx, registry }
    }

    /// The synchronous registry receivers should use for their per-packet
    /// SSRC lookups.
    pub fn receiver_registry(&self) -> ReceiverRegistry {
        self.registry.clone()
    }

    pub async fn create(&self, req: CreateRequest) -> SessionResult<Arc<Session>> {
        match self.call(ManagerCommand::Create(req)).await? {
            ManagerReply::Created(s) => Ok(s),
            _ => unreachable!("create always replies Created or an error"),
        }
    }

    pub async fn lookup(&self, ssrc: u32) -> SessionResult<Option<Arc<Session>>> {
        match self.call(ManagerCommand::Lookup { ssrc }).await? {
            ManagerReply::Found(s) => Ok(s),
            _ => unreachable!("lookup always replies Found or an error"),
        }
    }

    pub async fn list_by_user(&self, user_session_id: String) -> SessionResult<Vec<Arc<Session>>> {
        match self
            .call(ManagerCommand::ListByUser { user_session_id })
            .await?
        {
            ManagerReply::List(v) => Ok(v),
            _ => unreachable!("list_by_user always replies List or an error"),
        }
    }

    pub async fn aggregate_for_user(
        &self,
        user_session_id: String,
    ) -> SessionResult<Option<UserSessionAggregate>> {
        match self
            .call(ManagerCommand::AggregateForUser { user_session_id })
            .await?
        {
            ManagerReply::Aggregate(a) => Ok(a),
            _ => unreachable!("aggregate_for_user always replies Aggregate or an error"),
        }
    }

    pub async fn close(&self, ssrc: u32) -> SessionResult<()> {
        match self.call(ManagerCommand::Close { ssrc }).await? {
            ManagerReply::Closed => Ok(()),
            _ => unreachable!("close always replies Closed or an error"),
        }
    }

    /// Forces an immediate reap sweep; mainly useful for tests. Returns
    /// the SSRCs that were reaped.
    pub async fn reap_now(&self) -> SessionResult<Vec<u32>> {
        match self.call(ManagerCommand::Reap).await? {
            ManagerReply::Reaped(v) => Ok(v),
            _ => unreachable!("reap always replies Reaped or an error"),
        }
    }

    async fn call(&self, cmd: ManagerCommand) -> SessionResult<ManagerReply> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(ManagerRequest { cmd, respond_to })
            .await
            .map_err(|_| SessionError::CanceledByShutdown)?;
        rx.await.map_err(|_| SessionError::CanceledByShutdown)?
    }
}

struct ManagerState {
    sessions: HashMap<u32, Arc<Session>>,
    by_ip: HashMap<IpAddr, u32>,
    ip_of: HashMap<u32, IpAddr>,
    aggregates: HashMap<String, UserSessionAggregate>,
    limits: Limits,
    registry: ReceiverRegistry,
}

impl ManagerState {
    fn new(limits: Limits, registry: ReceiverRegistry) -> Self {
        Self {
            sessions: HashMap::new(),
            by_ip: HashMap::new(),
            ip_of: HashMap::new(),
            aggregates: HashMap::new(),
            limits,
            registry,
        }
    }

    /// Allocates a nonzero, non-0xFFFFFFFF SSRC not already in use (I1),
    /// retrying on collision (I2).
    fn allocate_ssrc(&self) -> SessionResult<u32> {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let candidate: u32 = rng.gen();
            if candidate == 0 || candidate == u32::MAX {
                continue;
            }
            if !self.sessions.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(SessionError::CapacityExceeded {
            limit: self.limits.max_sessions_total,
        })
    }

    fn create(&mut self, req: CreateRequest) -> SessionResult<Arc<Session>> {
        if req.low_edge_hz >= req.high_edge_hz {
            return Err(SessionError::InvalidParams(
                "low_edge_hz must be less than high_edge_hz".into(),
            ));
        }
        if req.sample_rate_hz == 0 {
            return Err(SessionError::InvalidParams(
                "sample_rate_hz must be nonzero".into(),
            ));
        }

        if self.sessions.len() as u32 >= self.limits.max_sessions_total {
            return Err(SessionError::CapacityExceeded {
                limit: self.limits.max_sessions_total,
            });
        }

        let bypassed = req.bypass_password.is_some();
        if !bypassed {
            let per_ip = self.by_ip.get(&req.remote_addr).copied().unwrap_or(0);
            if per_ip >= self.limits.max_sessions_per_ip {
                return Err(SessionError::CapacityExceeded {
                    limit: self.limits.max_sessions_per_ip,
                });
            }
        }

        let ssrc = self.allocate_ssrc()?;
        let queue_depth = match req.kind {
            SessionKind::Spectrum { .. } => self.limits.spectrum_queue_depth,
            SessionKind::Audio | SessionKind::Iq => self.limits.audio_queue_depth,
        };
        let params = SessionParams {
            ssrc,
            kind: req.kind,
            center_freq_hz: req.center_freq_hz,
            mode: req.mode.clone(),
            low_edge_hz: req.low_edge_hz,
            high_edge_hz: req.high_edge_hz,
            sample_rate_hz: req.sample_rate_hz,
        };
        let identity = SessionIdentity {
            id: format!("sess-{ssrc:08x}"),
            user_session_id: req.user_session_id.clone(),
            client_ip: req.remote_addr,
            source_ip: req.source_ip,
            channel_name: req.channel_name,
            bypass_password: req.bypass_password,
            queue_depth,
        };
        let band = params.band_name().map(str::to_string);
        let session = Arc::new(Session::new(params, identity));

        self.sessions.insert(ssrc, session.clone());
        self.registry.insert(ssrc, session.clone());
        if !bypassed {
            *self.by_ip.entry(req.remote_addr).or_insert(0) += 1;
        }
        self.ip_of.insert(ssrc, req.remote_addr);

        let aggregate = self
            .aggregates
            .entry(req.user_session_id.clone())
            .or_insert_with(|| UserSessionAggregate::new(req.user_session_id));
        if let Some(band) = &band {
            aggregate.record_band(band);
        }
        if !req.mode.is_empty() {
            aggregate.record_mode(&req.mode);
        }

        info!(ssrc, "session created");
        Ok(session)
    }

    fn close(&mut self, ssrc: u32) -> SessionResult<()> {
        match self.remove_session(ssrc) {
            Some(_) => {
                info!(ssrc, "session closed");
                Ok(())
            }
            None => Err(SessionError::AlreadyClosed),
        }
    }

    /// Removes a session from every index, applying the Closing →
    /// Closed transition and rolling its final bands/modes into the
    /// owning user's aggregate before it's dropped (§4.F "record into
    /// the aggregate before unlinking").
    fn remove_session(&mut self, ssrc: u32) -> Option<Arc<Session>> {
        let session = self.sessions.remove(&ssrc)?;
        self.registry.remove(ssrc);
        session.apply(crate::session::SessionEvent::CloseRequested);
        session.apply(crate::session::SessionEvent::CloseComplete);

        if let Some(ip) = self.ip_of.remove(&ssrc) {
            if let Some(count) = self.by_ip.get_mut(&ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.by_ip.remove(&ip);
                }
            }
        }

        if let Some(aggregate) = self.aggregates.get_mut(&session.user_session_id) {
            for band in session.bands_seen() {
                aggregate.record_band(&band);
            }
            for mode in session.modes_seen() {
                aggregate.record_mode(&mode);
            }
        }

        Some(session)
    }

    /// Sweeps for sessions idle longer than `keepalive_timeout` with an
    /// empty outbound queue and closes them (§4.F "Reaping").
    fn reap(&mut self) -> Vec<u32> {
        let idle: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.is_idle(self.limits.keepalive_timeout))
            .map(|s| s.ssrc())
            .collect();

        for ssrc in &idle {
            self.remove_session(*ssrc);
            warn!(ssrc, "reaped idle session");
        }
        idle
    }
}

async fn run_manager_task(
    mut rx: mpsc::Receiver<ManagerRequest>,
    limits: Limits,
    registry: ReceiverRegistry,
) {
    let mut state = ManagerState::new(limits, registry);

    while let Some(req) = rx.recv().await {
        let reply = match req.cmd {
            ManagerCommand::Create(create_req) => state.create(create_req).map(ManagerReply::Created),
            ManagerCommand::Lookup { ssrc } => {
                Ok(ManagerReply::Found(state.sessions.get(&ssrc).cloned()))
            }
            ManagerCommand::ListByUser { user_session_id } => Ok(ManagerReply::List(
                state
                    .sessions
                    .values()
                    .filter(|s| s.user_session_id == user_session_id)
                    .cloned()
                    .collect(),
            )),
            ManagerCommand::AggregateForUser { user_session_id } => Ok(ManagerReply::Aggregate(
                state.aggregates.get(&user_session_id).cloned(),
            )),
            ManagerCommand::Close { ssrc } => state.close(ssrc).map(|_| ManagerReply::Closed),
            ManagerCommand::Reap => Ok(ManagerReply::Reaped(state.reap())),
        };
        if req.respond_to.send(reply).is_err() {
            warn!("session manager caller dropped its response channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_request(user: &str, ip: IpAddr) -> CreateRequest {
        CreateRequest {
            user_session_id: user.to_string(),
            remote_addr: ip,
            source_ip: None,
            channel_name: "audio".to_string(),
            kind: SessionKind::Audio,
            mode: "usb".to_string(),
            center_freq_hz: 14_074_000,
            low_edge_hz: -1500,
            high_edge_hz: 1500,
            sample_rate_hz: 12000,
            bypass_password: None,
        }
    }

    #[tokio::test]
    async fn create_lookup_and_close_roundtrip() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let session = mgr.create(sample_request("alice", ip)).await.unwrap();
        let ssrc = session.ssrc();

        let found = mgr.lookup(ssrc).await.unwrap();
        assert!(found.is_some());
        assert!(mgr.receiver_registry().lookup(ssrc).is_some());

        mgr.close(ssrc).await.unwrap();
        let found_after = mgr.lookup(ssrc).await.unwrap();
        assert!(found_after.is_none());
        assert!(mgr.receiver_registry().lookup(ssrc).is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_edges() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let mut req = sample_request("bob", ip);
        req.low_edge_hz = 2000;
        req.high_edge_hz = 1000;

        let err = mgr.create(req).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn enforces_per_ip_limit() {
        let mgr = SessionManager::spawn(Limits {
            max_sessions_total: 100,
            max_sessions_per_ip: 2,
            ..Limits::default()
        });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        mgr.create(sample_request("u1", ip)).await.unwrap();
        mgr.create(sample_request("u2", ip)).await.unwrap();
        let err = mgr.create(sample_request("u3", ip)).await.unwrap_err();
        assert!(matches!(err, SessionError::CapacityExceeded { limit: 2 }));
    }

    #[tokio::test]
    async fn bypass_password_exempts_from_per_ip_limit() {
        let mgr = SessionManager::spawn(Limits {
            max_sessions_total: 100,
            max_sessions_per_ip: 1,
            ..Limits::default()
        });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        mgr.create(sample_request("u1", ip)).await.unwrap();
        let mut bypassed = sample_request("u2", ip);
        bypassed.bypass_password = Some("letmein".to_string());
        mgr.create(bypassed).await.unwrap();
    }

    #[tokio::test]
    async fn list_by_user_only_returns_that_users_sessions() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip1 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        mgr.create(sample_request("alice", ip1)).await.unwrap();
        mgr.create(sample_request("alice", ip2)).await.unwrap();
        mgr.create(sample_request("bob", ip2)).await.unwrap();

        let alice_sessions = mgr.list_by_user("alice".to_string()).await.unwrap();
        assert_eq!(alice_sessions.len(), 2);
    }

    #[tokio::test]
    async fn aggregate_tracks_bands_across_sessions() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        let mut req = sample_request("alice", ip);
        req.center_freq_hz = 14_074_000; // 20m
        mgr.create(req).await.unwrap();

        let mut req2 = sample_request("alice", ip);
        req2.center_freq_hz = 7_074_000; // 40m
        mgr.create(req2).await.unwrap();

        let aggregate = mgr
            .aggregate_for_user("alice".to_string())
            .await
            .unwrap()
            .expect("aggregate should exist");
        let mut bands: Vec<&str> = aggregate.bands_seen().collect();
        bands.sort_unstable();
        assert_eq!(bands, vec!["20m", "40m"]);
    }

    #[tokio::test]
    async fn closing_unknown_ssrc_is_already_closed() {
        let mgr = SessionManager::spawn(Limits::default());
        let err = mgr.close(999).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyClosed));
    }

    #[tokio::test]
    async fn reap_closes_idle_sessions_with_empty_queues() {
        let mgr = SessionManager::spawn(Limits {
            keepalive_timeout: Duration::from_secs(0),
            ..Limits::default()
        });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let session = mgr.create(sample_request("alice", ip)).await.unwrap();
        let ssrc = session.ssrc();

        let reaped = mgr.reap_now().await.unwrap();
        assert_eq!(reaped, vec![ssrc]);
        assert!(mgr.lookup(ssrc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reap_leaves_sessions_with_pending_data_alone() {
        let mgr = SessionManager::spawn(Limits {
            keepalive_timeout: Duration::from_secs(0),
            ..Limits::default()
        });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let session = mgr.create(sample_request("alice", ip)).await.unwrap();
        session.enqueue(vec![1, 2, 3]);

        let reaped = mgr.reap_now().await.unwrap();
        assert!(reaped.is_empty());
        assert!(mgr.lookup(session.ssrc()).await.unwrap().is_some());
    }
}
