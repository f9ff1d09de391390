//! UDP forwarder behind the privileged DNS port
//!
//! Each (client, upstream) pair gets its own session with a dedicated
//! upstream socket, so responses from a tunnel go back to the client that
//! asked. Sessions idle for longer than the session timeout are dropped.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::dns::parse_query_name;
use crate::error::RouterError;
use crate::matcher::RouteMatcher;
use crate::table::RouteTable;

/// Idle time after which a session is dropped
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 65535;

type SessionKey = (SocketAddr, SocketAddr);

struct Session {
    socket: Arc<UdpSocket>,
    last_activity: Instant,
}

/// The DNS router
pub struct RouterServer {
    listen: String,
    matcher: Arc<RouteMatcher>,
    session_timeout: Duration,
}

impl RouterServer {
    pub fn new(table: &RouteTable) -> Result<Self, RouterError> {
        Ok(Self {
            listen: table.listen.clone(),
            matcher: Arc::new(RouteMatcher::from_table(table)?),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        })
    }

    pub fn with_session_timeout(mut self, session_timeout: Duration) -> Self {
        self.session_timeout = session_timeout;
        self
    }

    pub fn listen_address(&self) -> &str {
        &self.listen
    }

    /// Bind the table's listen address and serve forever
    pub async fn run(self) -> Result<(), RouterError> {
        let socket = UdpSocket::bind(&self.listen)
            .await
            .map_err(|source| RouterError::Bind {
                address: self.listen.clone(),
                source,
            })?;
        self.serve(socket).await
    }

    /// Serve on an already bound socket
    pub async fn serve(self, socket: UdpSocket) -> Result<(), RouterError> {
        let socket = Arc::new(socket);
        let local = socket.local_addr().map_err(RouterError::Socket)?;
        info!(
            listen = %local,
            routes = self.matcher.len(),
            default = ?self.matcher.default_upstream(),
            "DNS router listening"
        );

        let sessions: Arc<DashMap<SessionKey, Session>> = Arc::new(DashMap::new());

        let (response_tx, mut response_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(4096);

        let responder = socket.clone();
        tokio::spawn(async move {
            while let Some((data, client)) = response_rx.recv().await {
                if let Err(e) = responder.send_to(&data, client).await {
                    debug!(error = %e, client = %client, "Failed to relay response");
                }
            }
        });

        let sessions_for_cleanup = sessions.clone();
        let timeout = self.session_timeout;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeout.min(Duration::from_secs(10)));
            loop {
                interval.tick().await;
                let now = Instant::now();
                let before = sessions_for_cleanup.len();
                sessions_for_cleanup.retain(|_, s| now.duration_since(s.last_activity) < timeout);
                let after = sessions_for_cleanup.len();
                if before != after {
                    debug!(removed = before - after, remaining = after, "Expired DNS sessions");
                }
            }
        });

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, client) = socket.recv_from(&mut buf).await.map_err(RouterError::Socket)?;
            let packet = &buf[..len];

            let qname = match parse_query_name(packet) {
                Ok(name) => name,
                Err(e) => {
                    trace!(client = %client, "Dropping packet: {}", e);
                    continue;
                }
            };

            let upstream = match self.matcher.lookup(&qname) {
                Some(upstream) => upstream,
                None => {
                    debug!(client = %client, qname = %qname, "No route for query");
                    continue;
                }
            };

            let upstream_socket = match self
                .session_socket(&sessions, client, upstream, &response_tx)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    warn!(upstream = %upstream, "Failed to open upstream session: {}", e);
                    continue;
                }
            };

            if let Err(e) = upstream_socket.send(packet).await {
                debug!(error = %e, client = %client, upstream = %upstream, "Failed to forward query");
            }
        }
    }

    async fn session_socket(
        &self,
        sessions: &Arc<DashMap<SessionKey, Session>>,
        client: SocketAddr,
        upstream: SocketAddr,
        response_tx: &mpsc::Sender<(Vec<u8>, SocketAddr)>,
    ) -> std::io::Result<Arc<UdpSocket>> {
        let key = (client, upstream);
        if let Some(mut session) = sessions.get_mut(&key) {
            session.last_activity = Instant::now();
            return Ok(session.socket.clone());
        }

        let bind_addr = if upstream.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let upstream_socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        upstream_socket.connect(upstream).await?;
        debug!(client = %client, upstream = %upstream, "New DNS session");

        let receiver = upstream_socket.clone();
        let response_tx = response_tx.clone();
        let sessions_ref = sessions.clone();
        let timeout = self.session_timeout;
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match tokio::time::timeout(timeout, receiver.recv(&mut buf)).await {
                    Ok(Ok(len)) => {
                        if let Some(mut s) = sessions_ref.get_mut(&key) {
                            s.last_activity = Instant::now();
                        }
                        if response_tx.send((buf[..len].to_vec(), client)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(error = %e, upstream = %upstream, "Upstream receive error");
                        break;
                    }
                    Err(_) => {
                        if !sessions_ref.contains_key(&key) {
                            break;
                        }
                    }
                }
            }
            trace!(client = %client, upstream = %upstream, "DNS session closed");
        });

        sessions.insert(
            key,
            Session {
                socket: upstream_socket.clone(),
                last_activity: Instant::now(),
            },
        );
        Ok(upstream_socket)
    }
}
