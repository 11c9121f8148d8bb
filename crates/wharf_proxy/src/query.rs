//! The optional GameSpy-style UDP query endpoint.
//!
//! Only the bind lifecycle and the challenge handshake live in the core;
//! the stat payloads belong to the external surface. Unrecognized
//! datagrams are dropped.

use std::net::SocketAddr;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const QUERY_MAGIC: [u8; 2] = [0xfe, 0xfd];
const TYPE_HANDSHAKE: u8 = 9;

/// Binds the query port and answers challenge handshakes until aborted.
pub(crate) fn spawn(bind_ip: std::net::IpAddr, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = SocketAddr::new(bind_ip, port);

        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("failed to bind query endpoint on {addr}: {e}");
                return;
            }
        };

        info!("query endpoint listening on {addr}");

        let mut buf = [0u8; 64];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                continue;
            };

            let packet = &buf[..len];
            if packet.len() < 7 || packet[..2] != QUERY_MAGIC {
                continue;
            }

            let kind = packet[2];
            let session_id = &packet[3..7];

            if kind == TYPE_HANDSHAKE {
                // Challenge tokens are not tracked; the stat exchange is
                // handled by the external query module.
                let challenge: u16 = rand::thread_rng().gen();

                let mut reply = vec![TYPE_HANDSHAKE];
                reply.extend_from_slice(session_id);
                reply.extend_from_slice(format!("{challenge}\0").as_bytes());

                if let Err(e) = socket.send_to(&reply, peer).await {
                    debug!("query reply to {peer} failed: {e}");
                }
            }
        }
    })
}
