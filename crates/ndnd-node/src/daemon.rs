//! The daemon: faces, strategy engine and the event loop gluing them.
//!
//! One task owns all forwarding state. Face receive bridges and the
//! interface observer feed it through channels; strategy timers reduce
//! to sleeping until the engine's next deadline. Every strategy
//! callback and timer fire therefore runs on this single task, in
//! arrival order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use ndnd_core::{Interest, Nack, Name, Packet};
use ndnd_face::{
    MulticastUdpConfig, MulticastUdpTransport, NetifEvent, NetifMonitor, UdpUnicastConfig,
    UnicastUdpTransport,
};
use ndnd_fw::{
    Candidate, FaceId, PreferredPolicy, RetryEngine, SelectionPolicy, StrategyAction,
    StrategyConfig, TransportState, UnroutableAction, WeightedRandomPolicy,
};

use crate::config::{DaemonConfig, PolicyChoice};
use crate::error::DaemonError;
use crate::fib::Fib;
use crate::pit::Pit;
use crate::telemetry_sink;

const PIT_CULL_PERIOD: Duration = Duration::from_secs(5);

/// Either of the configured selection policies.
pub enum PolicyKind {
    WeightedRandom(WeightedRandomPolicy),
    Preferred(PreferredPolicy),
}

impl SelectionPolicy for PolicyKind {
    fn name(&self) -> &'static str {
        match self {
            PolicyKind::WeightedRandom(p) => p.name(),
            PolicyKind::Preferred(p) => p.name(),
        }
    }

    fn select(&mut self, candidates: &[Candidate]) -> Option<FaceId> {
        match self {
            PolicyKind::WeightedRandom(p) => p.select(candidates),
            PolicyKind::Preferred(p) => p.select(candidates),
        }
    }

    fn weight_of(&self, interface: &str) -> u32 {
        match self {
            PolicyKind::WeightedRandom(p) => p.weight_of(interface),
            PolicyKind::Preferred(p) => p.weight_of(interface),
        }
    }

    fn is_main_interface(&self, interface: &str) -> bool {
        match self {
            PolicyKind::WeightedRandom(p) => p.is_main_interface(interface),
            PolicyKind::Preferred(p) => p.is_main_interface(interface),
        }
    }
}

/// A face's transport, as a tagged variant with a thin dispatch
/// surface.
#[derive(Clone)]
pub enum FaceKind {
    Unicast(Arc<UnicastUdpTransport>),
    Multicast(Arc<MulticastUdpTransport>),
}

impl FaceKind {
    async fn send(&self, packet: &[u8]) -> Result<(), ndnd_face::TransportError> {
        match self {
            FaceKind::Unicast(t) => t.send(packet).await,
            FaceKind::Multicast(t) => t.send(packet).await,
        }
    }

    fn interface(&self) -> &str {
        match self {
            FaceKind::Unicast(t) => t.interface(),
            FaceKind::Multicast(t) => t.interface(),
        }
    }

    fn state(&self) -> TransportState {
        match self {
            FaceKind::Unicast(t) => t.state(),
            FaceKind::Multicast(t) => t.state(),
        }
    }

    async fn close(&self) {
        match self {
            FaceKind::Unicast(t) => t.close().await,
            FaceKind::Multicast(t) => t.close().await,
        }
    }
}

/// Events delivered to the central loop from face bridges.
#[derive(Debug)]
enum DaemonEvent {
    InboundPacket { face: FaceId, raw: Vec<u8> },
    FaceState { face: FaceId, state: TransportState },
}

/// The ndnd forwarding daemon.
pub struct Daemon {
    engine: RetryEngine<PolicyKind>,
    fib: Fib,
    pit: Pit,
    faces: HashMap<FaceId, FaceKind>,
    face_configs: Vec<(FaceId, crate::config::UdpFaceEntry)>,
    multicast_configs: Vec<(FaceId, crate::config::MulticastFaceEntry)>,
    monitor: Arc<NetifMonitor>,
    rng: StdRng,
    event_tx: mpsc::Sender<DaemonEvent>,
    event_rx: mpsc::Receiver<DaemonEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    bridge_handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Handle for requesting daemon shutdown from signal handlers.
#[derive(Clone)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let policy = match config.strategy.policy {
            PolicyChoice::WeightedRandom => {
                PolicyKind::WeightedRandom(WeightedRandomPolicy::new(
                    config.strategy.interfaces.clone(),
                ))
            }
            PolicyChoice::Preferred => {
                PolicyKind::Preferred(PreferredPolicy::new(config.strategy.interfaces.clone()))
            }
        };
        let strategy_config = StrategyConfig {
            zombie_grace: config.strategy.zombie_grace(),
            on_unroutable: if config.strategy.nack_unroutable {
                UnroutableAction::NackAndReject
            } else {
                UnroutableAction::Hold
            },
            schedule_retries: config.strategy.retries,
        };
        let mut engine = RetryEngine::new(policy, strategy_config);

        // Face ids are positional: udp entries first, multicast after.
        let mut next_id = 1u64;
        let mut face_configs = Vec::new();
        for entry in &config.faces.udp {
            face_configs.push((FaceId(next_id), entry.clone()));
            next_id += 1;
        }
        let mut multicast_configs = Vec::new();
        for entry in &config.faces.multicast {
            multicast_configs.push((FaceId(next_id), entry.clone()));
            next_id += 1;
        }

        for interface in config.strategy.interfaces.keys() {
            engine.handle_interface_added(interface);
        }

        let mut fib = Fib::new();
        for route in &config.routes {
            let next_hops = route.faces.iter().map(|&id| FaceId(id)).collect();
            fib.insert(Name::from_uri(&route.prefix), next_hops);
        }

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            engine,
            fib,
            pit: Pit::new(),
            faces: HashMap::new(),
            face_configs,
            multicast_configs,
            monitor: Arc::new(NetifMonitor::new()),
            rng: StdRng::from_entropy(),
            event_tx,
            event_rx,
            shutdown_tx,
            shutdown_rx,
            bridge_handles: Vec::new(),
        })
    }

    /// The interface observer registry; external watchers feed it.
    pub fn monitor(&self) -> Arc<NetifMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Open all configured faces and spawn their receive bridges.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        for (id, entry) in self.face_configs.clone() {
            let transport = Arc::new(UnicastUdpTransport::new(UdpUnicastConfig {
                interface: entry.interface.clone(),
                local_port: entry.local_port,
                remote: entry.remote,
                persistency: entry.persistency.into(),
                idle_timeout: entry.idle_timeout(),
            }));
            match entry.local_address {
                Some(ip) => {
                    transport
                        .start_bound(SocketAddr::new(ip, entry.local_port))
                        .await?;
                }
                None => {
                    transport.start(&self.monitor).await?;
                }
            }
            self.register_unicast(id, transport);
        }

        for (id, entry) in self.multicast_configs.clone() {
            let local = entry
                .local_address
                .unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
            let transport = Arc::new(MulticastUdpTransport::new(MulticastUdpConfig {
                interface: entry.interface.clone(),
                group: entry.group,
                port: entry.port,
                local_address: local,
                bind_device: entry.bind_device,
            })?);
            transport.start().await?;
            self.register_multicast(id, transport);
        }

        info!(faces = self.faces.len(), routes = self.fib.len(), "daemon started");
        Ok(())
    }

    fn register_unicast(&mut self, id: FaceId, transport: Arc<UnicastUdpTransport>) {
        self.engine
            .handle_face_added(id, transport.interface(), transport.state());

        let tx = self.event_tx.clone();
        let bridge = Arc::clone(&transport);
        let mut state_rx = transport.state_watch();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = bridge.recv() => match result {
                        Ok(raw) => {
                            if tx.send(DaemonEvent::InboundPacket { face: id, raw }).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => {
                            let _ = tx.send(DaemonEvent::FaceState {
                                face: id,
                                state: TransportState::Closed,
                            })
                            .await;
                            return;
                        }
                    },
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let state = *state_rx.borrow();
                        if tx.send(DaemonEvent::FaceState { face: id, state }).await.is_err() {
                            return;
                        }
                        if state == TransportState::Closed {
                            return;
                        }
                    }
                }
            }
        });
        self.bridge_handles.push(handle);
        self.faces.insert(id, FaceKind::Unicast(transport));
    }

    fn register_multicast(&mut self, id: FaceId, transport: Arc<MulticastUdpTransport>) {
        self.engine
            .handle_face_added(id, transport.interface(), transport.state());

        let tx = self.event_tx.clone();
        let bridge = Arc::clone(&transport);
        let mut state_rx = transport.state_watch();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = bridge.recv() => match result {
                        Ok((raw, _sender)) => {
                            if tx.send(DaemonEvent::InboundPacket { face: id, raw }).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => return,
                    },
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let state = *state_rx.borrow();
                        if tx.send(DaemonEvent::FaceState { face: id, state }).await.is_err() {
                            return;
                        }
                        if state == TransportState::Closed {
                            return;
                        }
                    }
                }
            }
        });
        self.bridge_handles.push(handle);
        self.faces.insert(id, FaceKind::Multicast(transport));
    }

    /// Run the event loop until shutdown is requested.
    pub async fn run(&mut self) {
        let mut netif_rx = self.monitor.subscribe();
        let mut cull_interval = tokio::time::interval(PIT_CULL_PERIOD);
        cull_interval.tick().await;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            let deadline = self
                .engine
                .next_deadline()
                .map(tokio::time::Instant::from_std);
            let timer = tokio::time::sleep_until(
                deadline.unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600)),
            );

            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }
                Ok(event) = netif_rx.recv() => {
                    self.handle_netif_event(event).await;
                }
                () = timer, if deadline.is_some() => {
                    let now = Instant::now();
                    let actions = self.engine.poll_timers(&self.pit, now);
                    self.execute(actions).await;
                }
                _ = cull_interval.tick() => {
                    let culled = self.pit.cull(Instant::now());
                    if culled > 0 {
                        trace!(culled, "culled expired pit entries");
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("shutting down");
                    break;
                }
            }
        }
    }

    /// Close every face and drain the bridges.
    pub async fn shutdown(&mut self) {
        for face in self.faces.values() {
            face.close().await;
        }
        for handle in self.bridge_handles.drain(..) {
            let _ = handle.await;
        }
    }

    async fn handle_event(&mut self, event: DaemonEvent) {
        match event {
            DaemonEvent::InboundPacket { face, raw } => {
                self.handle_packet(face, &raw).await;
            }
            DaemonEvent::FaceState { face, state } => {
                debug!(%face, ?state, "face state change");
                self.engine.handle_face_state(face, state);
            }
        }
    }

    async fn handle_packet(&mut self, face: FaceId, raw: &[u8]) {
        let now = Instant::now();
        let packet = match Packet::decode(raw) {
            Ok(packet) => packet,
            Err(error) => {
                // The transports already framed the datagram; anything
                // failing here is an unknown packet kind.
                debug!(%face, %error, "dropping undecodable packet");
                return;
            }
        };

        match packet {
            Packet::Interest(interest) => self.handle_interest(face, interest, now).await,
            Packet::Data(data) => self.handle_data(face, &data.name, raw, now).await,
            Packet::Nack(nack) => {
                debug!(%face, name = %nack.interest.name, reason = ?nack.reason, "nack received");
            }
        }
    }

    async fn handle_interest(&mut self, in_face: FaceId, interest: Interest, now: Instant) {
        trace!(%in_face, name = %interest.name, "interest in");
        self.pit.insert_in_record(&interest, in_face, now);

        let Some(fib_snapshot) = self.fib.lookup(&interest.name) else {
            debug!(name = %interest.name, "no route");
            self.pit.reject(&interest.name);
            return;
        };

        let actions =
            self.engine
                .after_receive_interest(in_face, &interest, &fib_snapshot, &self.pit, now);
        self.execute(actions).await;
    }

    async fn handle_data(&mut self, in_face: FaceId, name: &Name, raw: &[u8], now: Instant) {
        trace!(%in_face, %name, "data in");
        let actions = self
            .engine
            .before_satisfy_interest(name, in_face, &self.pit, now);
        self.execute(actions).await;

        // Forward the Data to every downstream still waiting.
        for downstream in self.pit.satisfy(name) {
            if downstream == in_face {
                continue;
            }
            self.send_on_face(downstream, raw).await;
        }
    }

    async fn execute(&mut self, actions: Vec<StrategyAction>) {
        for action in actions {
            match action {
                StrategyAction::SendInterest {
                    name,
                    face,
                    new_nonce,
                } => {
                    let Some(mut interest) = self.pit.interest(&name).cloned() else {
                        debug!(%name, "interest gone from pit before send");
                        continue;
                    };
                    if new_nonce {
                        interest.refresh_nonce(&mut self.rng);
                    }
                    self.send_on_face(face, &interest.encode()).await;
                    self.pit.add_out_record(&name, face);
                }
                StrategyAction::RejectInterest { name } => {
                    self.pit.reject(&name);
                }
                StrategyAction::SendNack { name, face, reason } => {
                    let interest = self
                        .pit
                        .interest(&name)
                        .cloned()
                        .unwrap_or_else(|| Interest::new(name.clone()));
                    self.send_on_face(face, &Nack::new(reason, interest).encode())
                        .await;
                }
                StrategyAction::Telemetry(event) => telemetry_sink::emit(&event),
            }
        }
    }

    /// Send, logging failures. A failed send never cancels strategy
    /// timers; the next retry re-issues the packet.
    async fn send_on_face(&self, face: FaceId, packet: &[u8]) {
        let Some(kind) = self.faces.get(&face) else {
            warn!(%face, "send on unknown face");
            return;
        };
        if let Err(error) = kind.send(packet).await {
            warn!(%face, %error, "send failed");
        }
    }

    async fn handle_netif_event(&mut self, event: NetifEvent) {
        for kind in self.faces.values() {
            if let FaceKind::Unicast(transport) = kind {
                transport.handle_netif_event(&event, &self.monitor).await;
            }
        }

        let now = Instant::now();
        match &event {
            NetifEvent::Added(info) => {
                self.engine.handle_interface_added(&info.name);
            }
            NetifEvent::Removed(name) => {
                self.engine.handle_interface_removed(name);
            }
            NetifEvent::StateChanged { interface, new, .. } => {
                // Face state first, so resends see fresh transport states.
                for (id, kind) in &self.faces {
                    if kind.interface() == interface {
                        self.engine.handle_face_state(*id, kind.state());
                    }
                }
                let actions = self
                    .engine
                    .handle_interface_state(interface, *new, &self.pit, now);
                self.execute(actions).await;
            }
            NetifEvent::AddressAdded { .. } | NetifEvent::AddressRemoved { .. } => {}
        }
    }
}
