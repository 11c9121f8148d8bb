//! End-to-end tests driving a real proxy instance over loopback sockets,
//! with hand-rolled client and backend peers built from `wharf_protocol`.

use std::net::{IpAddr, SocketAddr};

use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;
use wharf_protocol::packets::{
    AcknowledgeConfigurationC2s, CustomPayloadC2s, CustomPayloadS2c, DisconnectS2c,
    FinishConfigurationC2s, FinishConfigurationS2c, HandshakeC2s, HandshakeNextState,
    LoginAcknowledgedC2s, LoginCompressionS2c, LoginDisconnectS2c, LoginHelloC2s, LoginHelloS2c,
    LoginKeyC2s, LoginSuccessS2c, QueryPingC2s, QueryPongS2c, QueryRequestC2s, QueryResponseS2c,
    StartConfigurationS2c,
};
use wharf_protocol::{
    CompressionThreshold, Packet, PacketDecoder, PacketEncoder, PacketFrame, PacketKind,
    PacketRegistry, PacketSide, PacketState, ProtocolVersion,
};
use wharf_proxy::event::async_trait;
use wharf_proxy::{Proxy, ProxyCallbacks, ProxyConfig, SharedProxy};

/// A minimal peer speaking the wire protocol, usable as either a client
/// or a backend in tests.
struct Peer {
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
    registry: PacketRegistry,
    version: ProtocolVersion,
    state: PacketState,
    /// The side this peer *sends* toward.
    send_side: PacketSide,
}

impl Peer {
    fn new(stream: TcpStream, version: ProtocolVersion, send_side: PacketSide) -> Self {
        Self {
            stream,
            enc: PacketEncoder::new(),
            dec: PacketDecoder::new(),
            registry: PacketRegistry::new(),
            version,
            state: PacketState::Handshaking,
            send_side,
        }
    }

    async fn send<P: Packet>(&mut self, kind: PacketKind, pkt: &P) {
        let id = self
            .registry
            .packet_id(self.version, self.state, self.send_side, kind)
            .unwrap_or_else(|| panic!("{kind:?} unregistered in {:?}", self.state));
        self.enc.append_packet(id, self.version, pkt).unwrap();
        let bytes = self.enc.take();
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn recv_frame(&mut self) -> PacketFrame {
        loop {
            if let Some(frame) = self.dec.try_next_packet().unwrap() {
                return frame;
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "peer closed while a frame was expected");
            self.dec.queue_slice(&buf[..n]);
        }
    }

    async fn recv<P: Packet>(&mut self, kind: PacketKind) -> P {
        let frame = self.recv_frame().await;
        let recv_side = match self.send_side {
            PacketSide::Serverbound => PacketSide::Clientbound,
            PacketSide::Clientbound => PacketSide::Serverbound,
        };
        let got = self
            .registry
            .packet_kind(self.version, self.state, recv_side, frame.id);
        assert_eq!(got, Some(kind), "unexpected frame ID {:#04x}", frame.id);
        frame.decode_as::<P>(self.version).unwrap()
    }

    /// Reads frames until EOF or until one decodes as the wanted kind.
    async fn recv_until<P: Packet>(&mut self, kind: PacketKind) -> P {
        let recv_side = match self.send_side {
            PacketSide::Serverbound => PacketSide::Clientbound,
            PacketSide::Clientbound => PacketSide::Serverbound,
        };

        loop {
            let frame = self.recv_frame().await;
            if self
                .registry
                .packet_kind(self.version, self.state, recv_side, frame.id)
                == Some(kind)
            {
                return frame.decode_as::<P>(self.version).unwrap();
            }
        }
    }

    fn set_compression(&mut self, threshold: i32) {
        self.enc.set_compression(CompressionThreshold(threshold));
        self.dec.set_compression(CompressionThreshold(threshold));
    }

    fn enable_encryption(&mut self, key: &[u8; 16]) {
        self.enc.enable_encryption(key);
        self.dec.enable_encryption(key);
    }
}

fn test_config(servers: &[(&str, SocketAddr)], extra: &str) -> ProxyConfig {
    let mut doc = String::from(
        "bind = \"127.0.0.1:0\"\nonline-mode = false\ncompression-threshold = 64\nlogin-ratelimit = 0\n",
    );
    doc.push_str(extra);
    doc.push_str("\n[servers]\n");
    for (name, addr) in servers {
        doc.push_str(&format!("{name} = \"{addr}\"\n"));
    }
    let names: Vec<String> = servers.iter().map(|(n, _)| format!("\"{n}\"")).collect();
    doc.push_str(&format!("try = [{}]\n", names.join(", ")));

    toml::from_str(&doc).unwrap()
}

async fn start_proxy_with(
    config: ProxyConfig,
    callbacks: impl ProxyCallbacks,
) -> (SocketAddr, SharedProxy) {
    let proxy = Proxy::bind("velocity-test.toml", config, callbacks)
        .await
        .unwrap();
    let addr = proxy.local_addr().unwrap();
    let shared = proxy.shared();
    tokio::spawn(proxy.run());
    (addr, shared)
}

async fn start_proxy(config: ProxyConfig) -> (SocketAddr, SharedProxy) {
    start_proxy_with(config, ()).await
}

async fn client(addr: SocketAddr, version: ProtocolVersion) -> Peer {
    let stream = TcpStream::connect(addr).await.unwrap();
    Peer::new(stream, version, PacketSide::Serverbound)
}

#[tokio::test]
async fn legacy_status_ping() {
    let (addr, _shared) = start_proxy(test_config(&[], "motd = \"\u{a7}3hello\"\n")).await;

    let mut peer = client(addr, ProtocolVersion::V1_8).await;

    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: 47,
            server_address: "localhost".into(),
            server_port: addr.port(),
            next_state: HandshakeNextState::Status,
        },
    )
    .await;
    peer.state = PacketState::Status;

    peer.send(PacketKind::QueryRequestC2s, &QueryRequestC2s).await;
    let response: QueryResponseS2c = peer.recv(PacketKind::QueryResponseS2c).await;

    let doc: serde_json::Value = serde_json::from_str(&response.json).unwrap();
    assert_eq!(doc["version"]["protocol"], 47);
    assert_eq!(doc["players"]["online"], 0);
    // Pre-1.16 dialect: the motd color arrives as a named color.
    assert_eq!(doc["description"]["color"], "dark_aqua");
    assert_eq!(doc["description"]["text"], "hello");

    peer.send(
        PacketKind::QueryPingC2s,
        &QueryPingC2s { payload: 0x1234 },
    )
    .await;
    let pong: QueryPongS2c = peer.recv(PacketKind::QueryPongS2c).await;
    assert_eq!(pong.payload, 0x1234);

    // The proxy closes after the pong.
    let mut buf = [0u8; 1];
    assert_eq!(peer.stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn unsupported_version_is_refused_at_login() {
    let (addr, _shared) = start_proxy(test_config(&[], "minimum-version = \"1.16\"\n")).await;

    let mut peer = client(addr, ProtocolVersion::V1_8).await;

    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: 47,
            server_address: "localhost".into(),
            server_port: addr.port(),
            next_state: HandshakeNextState::Login,
        },
    )
    .await;
    peer.state = PacketState::Login;

    let kick: LoginDisconnectS2c = peer.recv(PacketKind::LoginDisconnectS2c).await;
    assert!(
        kick.reason.flatten().contains("1.16"),
        "reason was {:?}",
        kick.reason.flatten()
    );
}

/// A fake backend that accepts one proxied player and returns the
/// handshake and login-start packets it observed.
async fn fake_backend(
    listener: TcpListener,
    version: ProtocolVersion,
) -> (Peer, HandshakeC2s, LoginHelloC2s) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut peer = Peer::new(stream, version, PacketSide::Clientbound);

    let handshake: HandshakeC2s = peer.recv(PacketKind::HandshakeC2s).await;
    peer.state = PacketState::Login;
    let hello: LoginHelloC2s = peer.recv(PacketKind::LoginHelloC2s).await;

    let uuid = hello.profile_id.unwrap_or_else(|| {
        wharf_protocol::GameProfile::offline(&hello.username)
            .unwrap()
            .uuid
    });

    peer.send(
        PacketKind::LoginSuccessS2c,
        &LoginSuccessS2c {
            uuid,
            username: hello.username.clone(),
            properties: vec![],
        },
    )
    .await;
    peer.state = PacketState::Play;

    (peer, handshake, hello)
}

/// Logs a 1.8 client in through the whole pipeline. Returns the client
/// peer (in play state) and the backend peer.
async fn join_1_8(
    proxy_addr: SocketAddr,
    backend_listener: TcpListener,
    username: &str,
) -> (Peer, Peer) {
    let backend_task =
        tokio::spawn(
            async move { fake_backend(backend_listener, ProtocolVersion::V1_8).await },
        );

    let mut peer = client(proxy_addr, ProtocolVersion::V1_8).await;

    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: 47,
            server_address: "play.example.org".into(),
            server_port: proxy_addr.port(),
            next_state: HandshakeNextState::Login,
        },
    )
    .await;
    peer.state = PacketState::Login;

    peer.send(
        PacketKind::LoginHelloC2s,
        &LoginHelloC2s {
            username: username.into(),
            key: None,
            profile_id: None,
        },
    )
    .await;

    let compression: LoginCompressionS2c = peer.recv(PacketKind::LoginCompressionS2c).await;
    peer.set_compression(compression.threshold.0);

    let success: LoginSuccessS2c = peer.recv(PacketKind::LoginSuccessS2c).await;
    assert_eq!(success.username, username);
    peer.state = PacketState::Play;

    let (backend, _, _) = backend_task.await.unwrap();
    (peer, backend)
}

#[tokio::test]
async fn offline_login_relay_and_backend_kick() {
    let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();

    let (proxy_addr, _shared) = start_proxy(test_config(&[("lobby", backend_addr)], "")).await;
    let (mut peer, mut backend) = join_1_8(proxy_addr, backend_listener, "Alice").await;

    // Client-to-backend relay: a plugin message crosses verbatim.
    peer.send(
        PacketKind::CustomPayloadC2s,
        &CustomPayloadC2s {
            channel: "MC|Brand".into(),
            data: b"vanilla".to_vec(),
        },
    )
    .await;

    let relayed: CustomPayloadC2s = backend.recv_until(PacketKind::CustomPayloadC2s).await;
    assert_eq!(relayed.channel, "MC|Brand");
    assert_eq!(relayed.data, b"vanilla");

    // A backend kick with no other fallback surfaces to the client.
    backend
        .send(
            PacketKind::DisconnectS2c,
            &DisconnectS2c {
                reason: wharf_protocol::Text::new("maintenance"),
            },
        )
        .await;

    let kick: DisconnectS2c = peer.recv_until(PacketKind::DisconnectS2c).await;
    assert_eq!(kick.reason.flatten(), "maintenance");
}

#[tokio::test]
async fn bungeeguard_forwarding_reaches_backend() {
    let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();

    let (proxy_addr, _shared) = start_proxy(test_config(
        &[("lobby", backend_addr)],
        "player-info-forwarding-mode = \"bungeeguard\"\nforwarding-secret = \"s3cret\"\n",
    ))
    .await;

    let backend_task =
        tokio::spawn(
            async move { fake_backend(backend_listener, ProtocolVersion::V1_8).await },
        );

    let mut peer = client(proxy_addr, ProtocolVersion::V1_8).await;
    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: 47,
            server_address: "play.example.org".into(),
            server_port: proxy_addr.port(),
            next_state: HandshakeNextState::Login,
        },
    )
    .await;
    peer.state = PacketState::Login;
    peer.send(
        PacketKind::LoginHelloC2s,
        &LoginHelloC2s {
            username: "Alice".into(),
            key: None,
            profile_id: None,
        },
    )
    .await;

    let (_, handshake, hello) = backend_task.await.unwrap();
    assert_eq!(hello.username, "Alice");

    let parts: Vec<&str> = handshake.server_address.split('\0').collect();
    assert_eq!(parts.len(), 4, "address was {:?}", handshake.server_address);
    assert_eq!(parts[0], "play.example.org");
    assert_eq!(parts[1], "127.0.0.1");

    let expected_uuid = wharf_protocol::GameProfile::offline("Alice").unwrap().uuid;
    assert_eq!(parts[2], expected_uuid.simple().to_string());

    let properties: serde_json::Value = serde_json::from_str(parts[3]).unwrap();
    assert_eq!(properties[0]["name"], "bungeeguard-token");
    assert_eq!(properties[0]["value"], "s3cret");
}

#[tokio::test]
async fn duplicate_login_is_refused_while_first_stays() {
    let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();

    let (proxy_addr, _shared) = start_proxy(test_config(&[("lobby", backend_addr)], "")).await;
    let (mut first, mut backend) = join_1_8(proxy_addr, backend_listener, "Alice").await;

    // Second login under the same name.
    let mut second = client(proxy_addr, ProtocolVersion::V1_8).await;
    second
        .send(
            PacketKind::HandshakeC2s,
            &HandshakeC2s {
                protocol_version: 47,
                server_address: "play.example.org".into(),
                server_port: proxy_addr.port(),
                next_state: HandshakeNextState::Login,
            },
        )
        .await;
    second.state = PacketState::Login;
    second
        .send(
            PacketKind::LoginHelloC2s,
            &LoginHelloC2s {
                username: "Alice".into(),
                key: None,
                profile_id: None,
            },
        )
        .await;

    // The newcomer is compressed too before the verdict arrives.
    let compression: LoginCompressionS2c = second.recv(PacketKind::LoginCompressionS2c).await;
    second.set_compression(compression.threshold.0);

    let kick: LoginDisconnectS2c = second.recv(PacketKind::LoginDisconnectS2c).await;
    assert!(!kick.reason.flatten().is_empty());

    // The original session still relays.
    first
        .send(
            PacketKind::CustomPayloadC2s,
            &CustomPayloadC2s {
                channel: "MC|Brand".into(),
                data: b"vanilla".to_vec(),
            },
        )
        .await;
    let relayed: CustomPayloadC2s = backend.recv_until(PacketKind::CustomPayloadC2s).await;
    assert_eq!(relayed.channel, "MC|Brand");
}

/// Accepts one proxied 1.20.2+ login on a fake backend, leaving the peer
/// in the configuration state.
async fn modern_backend_accept(
    listener: TcpListener,
    version: ProtocolVersion,
) -> (Peer, HandshakeC2s, LoginHelloC2s) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut peer = Peer::new(stream, version, PacketSide::Clientbound);

    let handshake: HandshakeC2s = peer.recv(PacketKind::HandshakeC2s).await;
    peer.state = PacketState::Login;
    let hello: LoginHelloC2s = peer.recv(PacketKind::LoginHelloC2s).await;

    peer.send(
        PacketKind::LoginSuccessS2c,
        &LoginSuccessS2c {
            uuid: hello.profile_id.expect("modern login carries a uuid"),
            username: hello.username.clone(),
            properties: vec![],
        },
    )
    .await;

    let _: LoginAcknowledgedC2s = peer.recv(PacketKind::LoginAcknowledgedC2s).await;
    peer.state = PacketState::Configuration;

    (peer, handshake, hello)
}

/// Finishes a fake backend's configuration phase, then emits a play-state
/// plugin message so the other end can observe the transition.
async fn backend_finish_config_and_probe(peer: &mut Peer, probe_channel: &str) {
    peer.send(PacketKind::FinishConfigurationS2c, &FinishConfigurationS2c)
        .await;
    let _: FinishConfigurationC2s = peer.recv_until(PacketKind::FinishConfigurationC2s).await;
    peer.state = PacketState::Play;

    peer.send(
        PacketKind::CustomPayloadS2c,
        &CustomPayloadS2c {
            channel: probe_channel.into(),
            data: vec![],
        },
    )
    .await;
}

/// Logs a modern (1.20.2+) client in up to the configuration state.
async fn modern_client_login(
    proxy_addr: SocketAddr,
    username: &str,
    version: ProtocolVersion,
) -> Peer {
    let mut peer = client(proxy_addr, version).await;

    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: version.number(),
            server_address: "play.example.org".into(),
            server_port: proxy_addr.port(),
            next_state: HandshakeNextState::Login,
        },
    )
    .await;
    peer.state = PacketState::Login;

    peer.send(
        PacketKind::LoginHelloC2s,
        &LoginHelloC2s {
            username: username.into(),
            key: None,
            profile_id: Some(Uuid::from_u128(0xa11ce)),
        },
    )
    .await;

    let compression: LoginCompressionS2c = peer.recv(PacketKind::LoginCompressionS2c).await;
    peer.set_compression(compression.threshold.0);

    let success: LoginSuccessS2c = peer.recv(PacketKind::LoginSuccessS2c).await;
    assert_eq!(success.username, username);

    peer.send(PacketKind::LoginAcknowledgedC2s, &LoginAcknowledgedC2s)
        .await;
    peer.state = PacketState::Configuration;

    peer
}

/// Drains the configuration phase client-side through the finish
/// exchange, leaving the peer in the play state.
async fn client_finish_config(peer: &mut Peer) {
    let _: FinishConfigurationS2c = peer.recv_until(PacketKind::FinishConfigurationS2c).await;
    peer.send(PacketKind::FinishConfigurationC2s, &FinishConfigurationC2s)
        .await;
    peer.state = PacketState::Play;
}

#[tokio::test]
async fn modern_transparent_switch() {
    let version = ProtocolVersion::V1_20_2;

    let lobby_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let lobby_addr = lobby_listener.local_addr().unwrap();
    let pvp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let pvp_addr = pvp_listener.local_addr().unwrap();

    let (proxy_addr, shared) =
        start_proxy(test_config(&[("lobby", lobby_addr), ("pvp", pvp_addr)], "")).await;

    let lobby_task = tokio::spawn(async move {
        let (mut backend, _, _) = modern_backend_accept(lobby_listener, version).await;

        // The client's channel registration crosses during configuration.
        let reg: CustomPayloadC2s = backend.recv_until(PacketKind::CustomPayloadC2s).await;
        assert_eq!(reg.channel, "minecraft:register");
        assert_eq!(reg.data, b"wharf:test");

        backend_finish_config_and_probe(&mut backend, "wharf:lobby").await;
        backend
    });

    let mut peer = modern_client_login(proxy_addr, "Alice", version).await;

    peer.send(
        PacketKind::CustomPayloadC2s,
        &CustomPayloadC2s {
            channel: "minecraft:register".into(),
            data: b"wharf:test".to_vec(),
        },
    )
    .await;

    client_finish_config(&mut peer).await;
    let probe: CustomPayloadS2c = peer.recv_until(PacketKind::CustomPayloadS2c).await;
    assert_eq!(probe.channel, "wharf:lobby");

    let mut lobby = lobby_task.await.unwrap();

    // The new backend sees the proxy replay the registration before
    // anything else in its configuration phase.
    let pvp_task = tokio::spawn(async move {
        let (mut backend, _, hello) = modern_backend_accept(pvp_listener, version).await;

        let replayed: CustomPayloadC2s = backend.recv(PacketKind::CustomPayloadC2s).await;

        backend_finish_config_and_probe(&mut backend, "wharf:pvp").await;
        (backend, replayed, hello)
    });

    let handle = shared.players().by_name("Alice").unwrap();
    wharf_proxy::request_switch(&shared, &handle, "pvp", false).unwrap();

    // Client view of the switch: StartConfiguration, acknowledge, a fresh
    // configuration phase, then play packets from the new backend only.
    let _: StartConfigurationS2c = peer.recv_until(PacketKind::StartConfigurationS2c).await;
    peer.send(
        PacketKind::AcknowledgeConfigurationC2s,
        &AcknowledgeConfigurationC2s,
    )
    .await;
    peer.state = PacketState::Configuration;

    client_finish_config(&mut peer).await;

    let probe: CustomPayloadS2c = peer.recv_until(PacketKind::CustomPayloadS2c).await;
    assert_eq!(probe.channel, "wharf:pvp");

    let (_pvp, replayed, hello) = pvp_task.await.unwrap();
    assert_eq!(hello.username, "Alice");
    assert_eq!(replayed.channel, "minecraft:register");
    assert_eq!(replayed.data, b"wharf:test");
    assert_eq!(handle.current_server().as_deref(), Some("pvp"));

    // The old link is released only after the new backend's first
    // play-phase packet reached the client.
    let mut buf = [0u8; 16];
    assert_eq!(lobby.stream.read(&mut buf).await.unwrap(), 0);
}

struct MockSessionService {
    base_url: String,
}

#[async_trait]
impl ProxyCallbacks for MockSessionService {
    async fn session_server(
        &self,
        username: &str,
        auth_digest: &str,
        _player_ip: &IpAddr,
    ) -> String {
        format!(
            "{}/session/minecraft/hasJoined?username={username}&serverId={auth_digest}",
            self.base_url
        )
    }
}

/// Answers one `hasJoined` request with a canned profile document.
async fn serve_profile_once(listener: TcpListener, body: &'static str) {
    let (mut stream, _) = listener.accept().await.unwrap();

    let mut buf = vec![0u8; 4096];
    let mut read = 0;
    loop {
        let n = stream.read(&mut buf[read..]).await.unwrap();
        assert_ne!(n, 0, "session service client hung up mid-request");
        read += n;
        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
}

#[tokio::test]
async fn modern_online_login_against_mocked_session_service() {
    let version = ProtocolVersion::V1_20_3; // a 1.20.4 client
    let expected_uuid: Uuid = "af74a02d-19cb-445b-b07f-6866a861f783".parse().unwrap();

    let auth_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let auth_addr = auth_listener.local_addr().unwrap();
    tokio::spawn(serve_profile_once(
        auth_listener,
        r#"{"id":"af74a02d19cb445bb07f6866a861f783","name":"Alice","properties":[]}"#,
    ));

    let backend_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend_listener.local_addr().unwrap();

    let mut config = test_config(&[("lobby", backend_addr)], "");
    config.online_mode = true;

    let (proxy_addr, shared) = start_proxy_with(
        config,
        MockSessionService {
            base_url: format!("http://{auth_addr}"),
        },
    )
    .await;

    let backend_task = tokio::spawn(async move {
        let (mut backend, _, hello) = modern_backend_accept(backend_listener, version).await;
        backend_finish_config_and_probe(&mut backend, "wharf:probe").await;
        (backend, hello)
    });

    let mut peer = client(proxy_addr, version).await;
    peer.send(
        PacketKind::HandshakeC2s,
        &HandshakeC2s {
            protocol_version: version.number(),
            server_address: "play.example.org".into(),
            server_port: proxy_addr.port(),
            next_state: HandshakeNextState::Login,
        },
    )
    .await;
    peer.state = PacketState::Login;

    peer.send(
        PacketKind::LoginHelloC2s,
        &LoginHelloC2s {
            username: "Alice".into(),
            key: None,
            profile_id: Some(expected_uuid),
        },
    )
    .await;

    // Encryption request/response with the proxy's published RSA key.
    let enc_request: LoginHelloS2c = peer.recv(PacketKind::LoginHelloS2c).await;
    assert_eq!(enc_request.server_id, "");
    assert_eq!(enc_request.verify_token.len(), 4);

    let public_key = RsaPublicKey::from_public_key_der(&enc_request.public_key).unwrap();
    let secret = [0x42u8; 16];
    let mut rng = rand::thread_rng();

    peer.send(
        PacketKind::LoginKeyC2s,
        &LoginKeyC2s {
            shared_secret: public_key.encrypt(&mut rng, Pkcs1v15Encrypt, &secret).unwrap(),
            verify_token: Some(
                public_key
                    .encrypt(&mut rng, Pkcs1v15Encrypt, &enc_request.verify_token)
                    .unwrap(),
            ),
            salted_signature: None,
        },
    )
    .await;
    peer.enable_encryption(&secret);

    let compression: LoginCompressionS2c = peer.recv(PacketKind::LoginCompressionS2c).await;
    peer.set_compression(compression.threshold.0);

    // The success carries the identity the session service vouched for.
    let success: LoginSuccessS2c = peer.recv(PacketKind::LoginSuccessS2c).await;
    assert_eq!(success.uuid, expected_uuid);
    assert_eq!(success.username, "Alice");

    peer.send(PacketKind::LoginAcknowledgedC2s, &LoginAcknowledgedC2s)
        .await;
    peer.state = PacketState::Configuration;

    client_finish_config(&mut peer).await;

    // Relay installed: a backend play frame reaches the client, and the
    // registry holds exactly one admitted session.
    let probe: CustomPayloadS2c = peer.recv_until(PacketKind::CustomPayloadS2c).await;
    assert_eq!(probe.channel, "wharf:probe");
    assert_eq!(shared.players().len(), 1);

    let (_backend, hello) = backend_task.await.unwrap();
    assert_eq!(hello.username, "Alice");
    assert_eq!(hello.profile_id, Some(expected_uuid));
}
