//! The client-side login flow: rate limiting, the online-mode encryption
//! exchange, session-service verification, and registry admission.

use std::net::SocketAddr;

use anyhow::{bail, ensure, Context};
use num_bigint::BigInt;
use reqwest::StatusCode;
use rsa::Pkcs1v15Encrypt;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tracing::{debug, info};
use wharf_protocol::packets::login::PlayerKey;
use wharf_protocol::packets::{
    LoginAcknowledgedC2s, LoginCompressionS2c, LoginDisconnectS2c, LoginHelloC2s, LoginHelloS2c,
    LoginKeyC2s, LoginSuccessS2c,
};
use wharf_protocol::profile::is_valid_username;
use wharf_protocol::{
    CompressionThreshold, GameProfile, PacketKind, PacketState, ProtocolVersion, Text, VarInt,
};

use crate::packet_io::Conn;
use crate::players::{AdmissionGuard, ControlMessage, SessionHandle};
use crate::SharedProxy;

/// How many control messages may queue against a session before senders
/// start failing fast.
const CONTROL_QUEUE_DEPTH: usize = 16;

/// Everything the session needs to proceed into the play phase.
pub(crate) struct LoginOutcome {
    pub profile: GameProfile,
    /// The 1.19-1.19.2 chat key, replayed toward backends when chat
    /// signing is enforced.
    pub key: Option<PlayerKey>,
    pub handle: std::sync::Arc<SessionHandle>,
    pub guard: AdmissionGuard,
    pub control_rx: mpsc::Receiver<ControlMessage>,
}

pub(crate) async fn kick(conn: &mut Conn, reason: Text) -> anyhow::Result<()> {
    conn.send(PacketKind::LoginDisconnectS2c, &LoginDisconnectS2c { reason })
        .await
}

/// Runs the login state to completion. `Ok(None)` means the client was
/// turned away cleanly (rate limit, auth failure, duplicate identity).
pub(crate) async fn handle_login(
    shared: &SharedProxy,
    conn: &mut Conn,
    remote: SocketAddr,
) -> anyhow::Result<Option<LoginOutcome>> {
    let config = shared.config();
    let messages = shared.messages();
    let version = conn.meta.version;

    // Overload rejection happens before any work is done on the
    // connection's behalf.
    if !shared.limiter().attempt(remote.ip()) {
        kick(conn, messages.format("disconnect.too-fast", &[])).await?;
        return Ok(None);
    }

    let hello: LoginHelloC2s = conn.recv_expect(PacketKind::LoginHelloC2s).await?;
    ensure!(is_valid_username(&hello.username), "invalid username");

    let profile = if config.online_mode {
        match login_online(shared, conn, remote, &hello.username).await? {
            Some(profile) => profile,
            None => return Ok(None),
        }
    } else {
        if config.log_offline_connections {
            info!(username = %hello.username, %remote, "offline-mode login");
        }
        GameProfile::offline(&hello.username)?
    };

    // Compression is negotiated before login success so the success packet
    // itself rides the new framing. 1.7 predates the packet.
    if config.compression_threshold >= 0 && version >= ProtocolVersion::V1_8 {
        conn.send(
            PacketKind::LoginCompressionS2c,
            &LoginCompressionS2c {
                threshold: VarInt(config.compression_threshold),
            },
        )
        .await?;
        conn.set_compression(CompressionThreshold(config.compression_threshold));
    }

    if let Err(reason) = shared.callbacks().inner.on_login(remote, &profile).await {
        info!(username = %profile.username, "disconnect at login: \"{}\"", reason.flatten());
        kick(conn, reason).await?;
        return Ok(None);
    }

    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
    let handle = SessionHandle::new(profile.clone(), remote, version, control_tx);

    let kick_existing = config.online_mode && config.online_mode_kick_existing_players;
    let guard = match shared.players().admit(
        handle.clone(),
        kick_existing,
        messages.format("disconnect.duplicate-login", &[]),
    ) {
        Ok(guard) => guard,
        Err(_) => {
            kick(conn, messages.format("disconnect.already-connected", &[])).await?;
            return Ok(None);
        }
    };

    conn.send(
        PacketKind::LoginSuccessS2c,
        &LoginSuccessS2c {
            uuid: profile.uuid,
            username: profile.username.clone(),
            properties: profile.properties.clone(),
        },
    )
    .await?;

    // Modern protocols must acknowledge before the proxy enters the
    // configuration state on their behalf.
    if version.has_config_state() {
        let _: LoginAcknowledgedC2s = conn.recv_expect(PacketKind::LoginAcknowledgedC2s).await?;
        conn.set_state(PacketState::Configuration);
    } else {
        conn.set_state(PacketState::Play);
    }

    let key = if config.enforce_chat_signing {
        hello.key
    } else {
        // Withholding the key from backends disables signed-chat
        // enforcement downstream.
        None
    };

    Ok(Some(LoginOutcome {
        profile,
        key,
        handle,
        guard,
        control_rx,
    }))
}

/// Online-mode exchange: encryption request/response, shared-secret
/// install, then session-service verification.
async fn login_online(
    shared: &SharedProxy,
    conn: &mut Conn,
    remote: SocketAddr,
    username: &str,
) -> anyhow::Result<Option<GameProfile>> {
    let my_verify_token: [u8; 4] = rand::random();

    conn.send(
        PacketKind::LoginHelloS2c,
        &LoginHelloS2c {
            server_id: String::new(), // Always empty.
            public_key: shared.public_key_der().to_vec(),
            verify_token: my_verify_token.to_vec(),
            should_authenticate: true,
        },
    )
    .await?;

    let key_response: LoginKeyC2s = conn.recv_expect(PacketKind::LoginKeyC2s).await?;

    let Some(encrypted_verify_token) = key_response.verify_token else {
        // 1.19-1.19.2 clients may sign the token with their chat key
        // instead. The proxy terminates encryption itself and has no use
        // for the signature variant.
        bail!("client sent a salted signature instead of a verify token");
    };

    let shared_secret = shared
        .rsa_key()
        .decrypt(Pkcs1v15Encrypt, &key_response.shared_secret)
        .context("failed to decrypt shared secret")?;

    let verify_token = shared
        .rsa_key()
        .decrypt(Pkcs1v15Encrypt, &encrypted_verify_token)
        .context("failed to decrypt verify token")?;

    ensure!(
        my_verify_token.as_slice() == verify_token,
        "verify tokens do not match"
    );

    let crypt_key: [u8; 16] = shared_secret
        .as_slice()
        .try_into()
        .context("shared secret has the wrong length")?;

    conn.enable_encryption(&crypt_key);

    let hash = Sha1::new()
        .chain_update(&shared_secret)
        .chain_update(shared.public_key_der())
        .finalize();

    let url = shared
        .callbacks()
        .inner
        .session_server(username, &auth_digest(&hash), &remote.ip())
        .await;

    let resp = shared.http_client().get(url).send().await?;

    match resp.status() {
        StatusCode::OK => {}
        StatusCode::NO_CONTENT => {
            debug!(username, %remote, "session server could not verify username");
            kick(
                conn,
                shared.messages().format("disconnect.auth-failed", &[]),
            )
            .await?;
            return Ok(None);
        }
        status => {
            bail!("session server GET request failed (status code {status})");
        }
    }

    let profile: GameProfile = resp.json().await.context("parsing game profile")?;

    ensure!(
        is_valid_username(&profile.username),
        "invalid game profile username"
    );
    ensure!(profile.username == username, "usernames do not match");

    Ok(Some(profile))
}

/// The Minecraft flavor of a SHA-1 digest: a signed, two's-complement
/// hex string.
fn auth_digest(bytes: &[u8]) -> String {
    BigInt::from_signed_bytes_be(bytes).to_str_radix(16)
}

#[cfg(test)]
mod tests {
    use sha1::Digest;

    use super::*;

    #[test]
    fn auth_digest_usernames() {
        assert_eq!(
            auth_digest(&Sha1::digest("Notch")),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            auth_digest(&Sha1::digest("jeb_")),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            auth_digest(&Sha1::digest("simon")),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }
}
