//! IPv4 multicast UDP transport.
//!
//! Two sockets share the group port: one bound to the group for
//! receiving, one bound to the wildcard for sending with multicast
//! loopback disabled, so the face never hears its own datagrams. IPv6
//! groups are not supported.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ndnd_core::{MAX_PACKET_SIZE, TlvError};
use ndnd_fw::{Persistency, TransportState};

use crate::error::TransportError;
use crate::framing::{check_datagram, FramingErrors};
use crate::state::StateCell;

/// Configuration of a multicast UDP face.
#[derive(Debug, Clone)]
pub struct MulticastUdpConfig {
    /// Kernel interface the face belongs to.
    pub interface: String,
    /// IPv4 multicast group to join.
    pub group: Ipv4Addr,
    /// Group port; both sockets use it.
    pub port: u16,
    /// Local IPv4 address identifying the interface for the join and
    /// for outbound datagrams.
    pub local_address: Ipv4Addr,
    /// Bind the receive socket to the named device, so it only hears
    /// traffic from its own interface (Linux).
    pub bind_device: bool,
}

/// A one-to-many datagram transport over IPv4 multicast.
pub struct MulticastUdpTransport {
    config: MulticastUdpConfig,
    state: Arc<StateCell>,
    send_socket: Mutex<Option<Arc<UdpSocket>>>,
    used_recently: Arc<AtomicBool>,
    framing_errors: Arc<FramingErrors>,
    rx_tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    rx_rx: Mutex<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
    receive_task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl MulticastUdpTransport {
    pub fn new(config: MulticastUdpConfig) -> Result<Self, TransportError> {
        if !config.group.is_multicast() {
            return Err(TransportError::Configuration(format!(
                "{} is not a multicast group",
                config.group
            )));
        }
        let (rx_tx, rx_rx) = mpsc::channel(256);
        let name = format!("udp4-mcast://{}:{}", config.group, config.port);
        Ok(Self {
            config,
            state: Arc::new(StateCell::new(name, TransportState::Down)),
            send_socket: Mutex::new(None),
            used_recently: Arc::new(AtomicBool::new(false)),
            framing_errors: Arc::new(FramingErrors::default()),
            rx_tx,
            rx_rx: Mutex::new(rx_rx),
            receive_task: Mutex::new(None),
        })
    }

    /// Open both sockets, join the group, and arm the receive loop.
    pub async fn start(&self) -> Result<(), TransportError> {
        let recv_socket = self.open_receive_socket()?;
        let send_socket = self.open_send_socket()?;

        let recv_socket = Arc::new(UdpSocket::from_std(recv_socket)?);
        let send_socket = Arc::new(UdpSocket::from_std(send_socket)?);
        *self.send_socket.lock().await = Some(send_socket);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::receive_loop(
            recv_socket,
            self.rx_tx.clone(),
            cancel_rx,
            Arc::clone(&self.framing_errors),
            Arc::clone(&self.used_recently),
        ));
        *self.receive_task.lock().await = Some((cancel_tx, handle));

        self.state.transition(TransportState::Up);
        info!(
            group = %self.config.group,
            port = self.config.port,
            interface = %self.config.interface,
            "multicast face up"
        );
        Ok(())
    }

    /// Send one packet to the group.
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
            let guard = self.send_socket.lock().await;
            guard.as_ref().ok_or(TransportError::NotUp)?.clone()
        };
        let group = SocketAddr::from((self.config.group, self.config.port));
        match socket.send_to(packet, group).await {
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(%error, "multicast send failed");
                // Multicast faces are permanent by nature: socket
                // errors never fail the face.
                self.state.on_socket_error(Persistency::Permanent);
                Err(TransportError::Io(error))
            }
        }
    }

    /// Receive the next well-framed packet and its sender.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut rx = self.rx_rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    pub async fn close(&self) {
        if self.state.get() == TransportState::Closed {
            return;
        }
        self.state.transition(TransportState::Closing);
        if let Some((cancel_tx, handle)) = self.receive_task.lock().await.take() {
            let _ = cancel_tx.send(true);
            let _ = handle.await;
        }
        *self.send_socket.lock().await = None;
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
    pub fn interface(&self) -> &str {
        &self.config.interface
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

    fn open_receive_socket(&self) -> Result<std::net::UdpSocket, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        #[cfg(target_os = "linux")]
        if self.config.bind_device {
            // More than one multicast face may share the group; binding
            // to the device keeps each face to its own interface's
            // traffic. Needs privileges on some systems.
            if let Err(error) = socket.bind_device(Some(self.config.interface.as_bytes())) {
                warn!(%error, interface = %self.config.interface, "bind to device failed");
            }
        }

        let group_endpoint = SocketAddrV4::new(self.config.group, self.config.port);
        socket.bind(&SocketAddr::V4(group_endpoint).into())?;
        socket.join_multicast_v4(&self.config.group, &self.config.local_address)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    fn open_send_socket(&self) -> Result<std::net::UdpSocket, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_multicast_loop_v4(false)?;
        let any = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port);
        socket.bind(&SocketAddr::V4(any).into())?;
        if self.config.local_address != Ipv4Addr::UNSPECIFIED {
            socket.set_multicast_if_v4(&self.config.local_address)?;
        }
        socket.join_multicast_v4(&self.config.group, &self.config.local_address)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    async fn receive_loop(
        socket: Arc<UdpSocket>,
        tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
        mut cancel_rx: watch::Receiver<bool>,
        framing_errors: Arc<FramingErrors>,
        used_recently: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => match result {
                    Ok((n, sender)) => match check_datagram(&buf[..n]) {
                        Ok(()) => {
                            used_recently.store(true, Ordering::Relaxed);
                            if tx.send((buf[..n].to_vec(), sender)).await.is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            warn!(%error, bytes = n, "dropping malformed datagram");
                            framing_errors.record();
                        }
                    },
                    Err(error) => {
                        // Group sockets ride out errors like permanent
                        // unicast faces.
                        warn!(%error, "multicast receive failed");
                    }
                },
                _ = cancel_rx.changed() => return,
            }
        }
    }
}
