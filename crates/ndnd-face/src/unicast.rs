//! Point-to-point UDP transport.
//!
//! Owns one connected UDP socket, frames every received datagram, and
//! follows its interface's addresses: when the bound local address
//! disappears the transport unbinds and goes `Down`, and rebinds (with
//! `SO_REUSEADDR`) as soon as a suitable address is back.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ndnd_core::{MAX_PACKET_SIZE, TlvError};
use ndnd_fw::{Persistency, TransportState};

use crate::error::TransportError;
use crate::framing::{check_datagram, FramingErrors};
use crate::netif::{pick_local_address, NetifEvent, NetifMonitor};
use crate::state::StateCell;

/// Configuration of a unicast UDP face.
#[derive(Debug, Clone)]
pub struct UdpUnicastConfig {
    /// Kernel interface this face follows for addresses and state.
    pub interface: String,
    /// Local port to bind; kept stable across rebinds.
    pub local_port: u16,
    /// Remote endpoint the socket connects to.
    pub remote: SocketAddr,
    pub persistency: Persistency,
    /// Idle timeout for `OnDemand` faces.
    pub idle_timeout: Option<Duration>,
}

/// A point-to-point datagram transport over UDP.
pub struct UnicastUdpTransport {
    config: UdpUnicastConfig,
    state: Arc<StateCell>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: StdMutex<Option<SocketAddr>>,
    used_recently: Arc<AtomicBool>,
    framing_errors: Arc<FramingErrors>,
    rx_tx: mpsc::Sender<Vec<u8>>,
    rx_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    /// Cancellation for the current receive loop; replaced on rebind.
    receive_task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    /// Cancellation for everything on close (idle checker included).
    stop_tx: watch::Sender<bool>,
}

impl UnicastUdpTransport {
    pub fn new(config: UdpUnicastConfig) -> Self {
        let (rx_tx, rx_rx) = mpsc::channel(256);
        let (stop_tx, _) = watch::channel(false);
        let name = format!("udp4://{}:{}", config.interface, config.local_port);
        Self {
            config,
            state: Arc::new(StateCell::new(name, TransportState::Down)),
            socket: Mutex::new(None),
            local_addr: StdMutex::new(None),
            used_recently: Arc::new(AtomicBool::new(false)),
            framing_errors: Arc::new(FramingErrors::default()),
            rx_tx,
            rx_rx: Mutex::new(rx_rx),
            receive_task: Mutex::new(None),
            stop_tx,
        }
    }

    /// Start by picking a local address from the interface snapshot.
    ///
    /// With no suitable address the transport stays `Down` and waits
    /// for an address-added event; that is not an error.
    pub async fn start(self: &Arc<Self>, monitor: &NetifMonitor) -> Result<(), TransportError> {
        match monitor.get(&self.config.interface) {
            Some(info) => {
                match pick_local_address(&info, self.config.remote.is_ipv6()) {
                    Some(ip) => {
                        self.rebind(SocketAddr::new(ip, self.config.local_port))
                            .await?;
                    }
                    None => {
                        warn!(
                            interface = %self.config.interface,
                            "no usable address yet, face stays down"
                        );
                    }
                }
            }
            None => {
                warn!(interface = %self.config.interface, "interface not known yet");
            }
        }
        self.spawn_idle_checker();
        Ok(())
    }

    /// Start on an explicit local endpoint (faces created around an
    /// already-chosen address, and tests).
    pub async fn start_bound(self: &Arc<Self>, local: SocketAddr) -> Result<(), TransportError> {
        self.rebind(local).await?;
        self.spawn_idle_checker();
        Ok(())
    }

    /// Tear down the current socket and bind a fresh one.
    pub async fn rebind(&self, local: SocketAddr) -> Result<(), TransportError> {
        self.stop_receive_loop().await;
        *self.socket.lock().await = None;

        let std_socket = bind_reuse_addr(local)?;
        let socket = UdpSocket::from_std(std_socket)?;
        #[cfg(target_os = "linux")]
        disable_pmtu_discovery(&socket);
        socket.connect(self.config.remote).await?;

        let socket = Arc::new(socket);
        *self.local_addr.lock().expect("local addr lock") = Some(socket.local_addr()?);
        *self.socket.lock().await = Some(Arc::clone(&socket));
        self.spawn_receive_loop(socket).await;
        self.state.transition(TransportState::Up);
        info!(%local, remote = %self.config.remote, "udp face bound");
        Ok(())
    }

    /// Send one packet to the connected remote.
    pub async fn send(&self, packet: &[u8]) -> Result<(), TransportError> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(TransportError::Framing(TlvError::Oversized {
                len: packet.len(),
                max: MAX_PACKET_SIZE,
            }));
        }
        if self.state.get() != TransportState::Up {
            return Err(TransportError::NotUp);
        }
        let socket = {
            let guard = self.socket.lock().await;
            guard.as_ref().ok_or(TransportError::NotUp)?.clone()
        };

        match socket.send(packet).await {
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(%error, "packet send failed");
                if self.state.on_socket_error(self.config.persistency) {
                    self.teardown().await;
                }
                Err(TransportError::Io(error))
            }
        }
    }

    /// Receive the next well-framed packet.
    pub async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.rx_rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    /// React to an interface observer event.
    pub async fn handle_netif_event(&self, event: &NetifEvent, monitor: &NetifMonitor) {
        match event {
            NetifEvent::StateChanged { interface, new, .. }
                if *interface == self.config.interface =>
            {
                if !self.state.is_closing_or_closed() {
                    let to = if *new == ndnd_fw::InterfaceState::Running {
                        TransportState::Up
                    } else {
                        TransportState::Down
                    };
                    self.state.transition(to);
                }
            }
            NetifEvent::AddressAdded { interface, .. }
                if *interface == self.config.interface =>
            {
                if self.bound_local_addr().is_none() {
                    self.try_rebind_from(monitor).await;
                }
            }
            NetifEvent::AddressRemoved { interface, address }
                if *interface == self.config.interface =>
            {
                if self.bound_local_addr().map(|a| a.ip()) == Some(*address) {
                    debug!(%address, "bound local address lost");
                    self.unbind().await;
                    self.try_rebind_from(monitor).await;
                }
            }
            _ => {}
        }
    }

    /// Orderly close: `Closing`, drain the receive loop, `Closed`.
    pub async fn close(&self) {
        if self.state.get() == TransportState::Closed {
            return;
        }
        self.state.transition(TransportState::Closing);
        let _ = self.stop_tx.send(true);
        self.stop_receive_loop().await;
        *self.socket.lock().await = None;
        self.state.transition(TransportState::Closed);
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    pub fn state_watch(&self) -> watch::Receiver<TransportState> {
        self.state.watch()
    }

    #[must_use]
    pub fn bound_local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr lock")
    }

    #[must_use]
    pub fn interface(&self) -> &str {
        &self.config.interface
    }

    /// Largest packet this face can carry, from the UDP payload limit
    /// of the bound endpoint's family capped at the packet maximum.
    #[must_use]
    pub fn mtu(&self) -> usize {
        let udp_payload_max = if self.config.remote.is_ipv4() {
            // 64 KiB minus maximum IPv4 header and UDP header.
            65535 - 60 - 8
        } else {
            65535 - 8
        };
        udp_payload_max.min(MAX_PACKET_SIZE)
    }

    #[must_use]
    pub fn framing_error_count(&self) -> u64 {
        self.framing_errors.count()
    }

    #[must_use]
    pub fn has_been_used_recently(&self) -> bool {
        self.used_recently.load(Ordering::Relaxed)
    }

    pub fn reset_recent_usage(&self) {
        self.used_recently.store(false, Ordering::Relaxed);
    }

    // -- internals ----------------------------------------------------

    async fn try_rebind_from(&self, monitor: &NetifMonitor) {
        let Some(info) = monitor.get(&self.config.interface) else {
            return;
        };
        match pick_local_address(&info, self.config.remote.is_ipv6()) {
            Some(ip) => {
                let local = SocketAddr::new(ip, self.config.local_port);
                if let Err(error) = self.rebind(local).await {
                    warn!(%error, %local, "rebind failed");
                }
            }
            None => {
                debug!(
                    interface = %self.config.interface,
                    "no remaining usable address, face stays down"
                );
            }
        }
    }

    async fn unbind(&self) {
        self.stop_receive_loop().await;
        *self.socket.lock().await = None;
        *self.local_addr.lock().expect("local addr lock") = None;
        self.state.transition(TransportState::Down);
    }

    async fn spawn_receive_loop(&self, socket: Arc<UdpSocket>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::receive_loop(
            socket,
            self.rx_tx.clone(),
            cancel_rx,
            Arc::clone(&self.state),
            Arc::clone(&self.framing_errors),
            Arc::clone(&self.used_recently),
            self.config.persistency,
        ));
        *self.receive_task.lock().await = Some((cancel_tx, handle));
    }

    async fn stop_receive_loop(&self) {
        if let Some((cancel_tx, handle)) = self.receive_task.lock().await.take() {
            let _ = cancel_tx.send(true);
            let _ = handle.await;
        }
    }

    async fn teardown(&self) {
        self.stop_receive_loop().await;
        *self.socket.lock().await = None;
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        tx: mpsc::Sender<Vec<u8>>,
        mut cancel_rx: watch::Receiver<bool>,
        state: Arc<StateCell>,
        framing_errors: Arc<FramingErrors>,
        used_recently: Arc<AtomicBool>,
        persistency: Persistency,
    ) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                result = socket.recv(&mut buf) => match result {
                    Ok(n) => match check_datagram(&buf[..n]) {
                        Ok(()) => {
                            used_recently.store(true, Ordering::Relaxed);
                            if tx.send(buf[..n].to_vec()).await.is_err() {
                                // Receiver dropped, transport is going away.
                                return;
                            }
                        }
                        Err(error) => {
                            // Malformed datagrams don't refresh the
                            // idle latch and don't close the face.
                            warn!(%error, bytes = n, "dropping malformed datagram");
                            framing_errors.record();
                        }
                    },
                    Err(error) => {
                        warn!(%error, "receive failed");
                        if state.on_socket_error(persistency) {
                            return;
                        }
                        // Permanent faces ride out socket errors.
                    }
                },
                _ = cancel_rx.changed() => return,
            }
        }
    }

    fn spawn_idle_checker(self: &Arc<Self>) {
        let Some(idle) = self.config.idle_timeout else {
            return;
        };
        if self.config.persistency != Persistency::OnDemand {
            return;
        }
        let weak = Arc::downgrade(self);
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(idle) => {
                        let Some(transport) = weak.upgrade() else { return };
                        if transport.has_been_used_recently() {
                            transport.reset_recent_usage();
                        } else {
                            info!("closing idle on-demand face");
                            transport.close().await;
                            return;
                        }
                    }
                    _ = stop_rx.changed() => return,
                }
            }
        });
    }
}

/// Open a UDP socket with `SO_REUSEADDR`, bound to `local`.
fn bind_reuse_addr(local: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if local.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&local.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Keep the kernel from setting the IPv4 don't-fragment bit; the
/// packet layer never fragments, routers along the path may.
#[cfg(target_os = "linux")]
fn disable_pmtu_discovery(socket: &UdpSocket) {
    use std::os::fd::AsRawFd;

    let value: libc::c_int = libc::IP_PMTUDISC_DONT;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            "failed to disable path MTU discovery"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndnd_core::encode_element;
    use std::net::Ipv4Addr;

    fn ephemeral_pair() -> (SocketAddr, SocketAddr) {
        let a = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let (addr_a, addr_b) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        drop((a, b));
        (addr_a, addr_b)
    }

    fn transport(local: SocketAddr, remote: SocketAddr) -> Arc<UnicastUdpTransport> {
        Arc::new(UnicastUdpTransport::new(UdpUnicastConfig {
            interface: "lo".into(),
            local_port: local.port(),
            remote,
            persistency: Persistency::Persistent,
            idle_timeout: None,
        }))
    }

    fn packet(fill: u8, len: usize) -> Vec<u8> {
        encode_element(0x06, &vec![fill; len])
    }

    #[tokio::test]
    async fn roundtrip_between_two_faces() {
        let (addr_a, addr_b) = ephemeral_pair();
        let a = transport(addr_a, addr_b);
        let b = transport(addr_b, addr_a);
        a.start_bound(addr_a).await.unwrap();
        b.start_bound(addr_b).await.unwrap();

        let payload = packet(0xAB, 50);
        a.send(&payload).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received, payload);

        let reply = packet(0xCD, 30);
        b.send(&reply).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), a.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received, reply);

        a.close().await;
        b.close().await;
        assert_eq!(a.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn mtu_is_capped_at_max_packet_size() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        assert_eq!(t.mtu(), MAX_PACKET_SIZE);
    }

    #[tokio::test]
    async fn send_before_start_is_not_up() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        let result = t.send(&packet(0x01, 10)).await;
        assert!(matches!(result, Err(TransportError::NotUp)));
    }

    #[tokio::test]
    async fn oversized_packet_rejected_before_send() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        t.start_bound(addr_a).await.unwrap();

        let oversized = vec![0u8; MAX_PACKET_SIZE + 1];
        let result = t.send(&oversized).await;
        assert!(matches!(
            result,
            Err(TransportError::Framing(TlvError::Oversized { .. }))
        ));
        t.close().await;
    }

    #[tokio::test]
    async fn malformed_datagram_dropped_face_stays_open() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        t.start_bound(addr_a).await.unwrap();

        // A raw socket at the remote endpoint sends garbage.
        let peer = std::net::UdpSocket::bind(addr_b).unwrap();
        peer.send_to(&[0xFF; 40], addr_a).unwrap();

        // Then a well-framed packet; only it arrives.
        let good = packet(0x11, 20);
        peer.send_to(&good, addr_a).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), t.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received, good);

        assert_eq!(t.framing_error_count(), 1);
        assert_eq!(t.state(), TransportState::Up);
        t.close().await;
    }

    #[tokio::test]
    async fn framing_error_does_not_touch_idle_latch() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        t.start_bound(addr_a).await.unwrap();
        t.reset_recent_usage();

        let peer = std::net::UdpSocket::bind(addr_b).unwrap();
        peer.send_to(&[0xFF; 40], addr_a).unwrap();
        // Wait until the malformed datagram was processed.
        while t.framing_error_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!t.has_been_used_recently());

        peer.send_to(&packet(0x22, 8), addr_a).unwrap();
        t.recv().await.unwrap();
        assert!(t.has_been_used_recently());
        t.close().await;
    }

    #[tokio::test]
    async fn rebind_to_same_endpoint_keeps_working() {
        let (addr_a, addr_b) = ephemeral_pair();
        let a = transport(addr_a, addr_b);
        let b = transport(addr_b, addr_a);
        a.start_bound(addr_a).await.unwrap();
        b.start_bound(addr_b).await.unwrap();

        a.rebind(addr_a).await.unwrap();
        assert_eq!(a.bound_local_addr(), Some(addr_a));
        assert_eq!(a.state(), TransportState::Up);

        let payload = packet(0x77, 16);
        a.send(&payload).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), b.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(received, payload);

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn lost_address_takes_face_down_and_recovery_rebinds() {
        use crate::netif::NetifInfo;

        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        t.start_bound(addr_a).await.unwrap();
        assert_eq!(t.state(), TransportState::Up);

        let monitor = NetifMonitor::new();
        let mut info = NetifInfo::new("lo");
        info.v4_addresses = vec![Ipv4Addr::LOCALHOST];
        monitor.publish(NetifEvent::Added(info));

        // Our bound address disappears; nothing suitable remains
        // (loopback never qualifies), so the face stays down.
        let removal = NetifEvent::AddressRemoved {
            interface: "lo".into(),
            address: addr_a.ip(),
        };
        monitor.publish(removal.clone());
        t.handle_netif_event(&removal, &monitor).await;
        assert_eq!(t.state(), TransportState::Down);
        assert!(t.bound_local_addr().is_none());
        assert!(matches!(
            t.send(&packet(0x01, 4)).await,
            Err(TransportError::NotUp)
        ));

        // A bindable address shows up: the face rebinds and recovers.
        let added = NetifEvent::AddressAdded {
            interface: "lo".into(),
            address: Ipv4Addr::UNSPECIFIED.into(),
        };
        monitor.publish(added.clone());
        t.handle_netif_event(&added, &monitor).await;
        assert_eq!(t.state(), TransportState::Up);
        assert!(t.bound_local_addr().is_some());
        t.close().await;
    }

    #[tokio::test]
    async fn interface_state_flaps_transport_state() {
        use ndnd_fw::InterfaceState;

        let (addr_a, addr_b) = ephemeral_pair();
        let t = transport(addr_a, addr_b);
        t.start_bound(addr_a).await.unwrap();

        let monitor = NetifMonitor::new();
        let down = NetifEvent::StateChanged {
            interface: "lo".into(),
            old: InterfaceState::Running,
            new: InterfaceState::NoCarrier,
        };
        t.handle_netif_event(&down, &monitor).await;
        assert_eq!(t.state(), TransportState::Down);

        let up = NetifEvent::StateChanged {
            interface: "lo".into(),
            old: InterfaceState::NoCarrier,
            new: InterfaceState::Running,
        };
        t.handle_netif_event(&up, &monitor).await;
        assert_eq!(t.state(), TransportState::Up);

        // Events for other interfaces are ignored.
        let other = NetifEvent::StateChanged {
            interface: "eth7".into(),
            old: InterfaceState::Running,
            new: InterfaceState::Down,
        };
        t.handle_netif_event(&other, &monitor).await;
        assert_eq!(t.state(), TransportState::Up);
        t.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_face_closes_when_idle() {
        let (addr_a, addr_b) = ephemeral_pair();
        let t = Arc::new(UnicastUdpTransport::new(UdpUnicastConfig {
            interface: "lo".into(),
            local_port: addr_a.port(),
            remote: addr_b,
            persistency: Persistency::OnDemand,
            idle_timeout: Some(Duration::from_secs(30)),
        }));
        t.start_bound(addr_a).await.unwrap();
        assert_eq!(t.state(), TransportState::Up);

        let mut state_rx = t.state_watch();
        // Paused clock: the 30 s idle period elapses without wall time.
        while *state_rx.borrow() != TransportState::Closed {
            state_rx.changed().await.unwrap();
        }
        assert_eq!(t.state(), TransportState::Closed);
    }
}
