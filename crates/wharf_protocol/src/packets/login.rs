use std::io::Write;

use anyhow::{bail, Context};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::profile::Property;
use crate::var_int::VarInt;
use crate::version::ProtocolVersion as V;
use crate::{Bounded, Decode, Encode, Packet, ProtocolVersion, Text};

/// Byte arrays in the login state gained their varint length prefix in
/// 1.8; 1.7 used a big-endian `i16`.
fn encode_key_bytes(
    bytes: &[u8],
    mut w: impl Write,
    version: ProtocolVersion,
) -> anyhow::Result<()> {
    if version >= V::V1_8 {
        bytes.encode(w)
    } else {
        w.write_i16::<BigEndian>(bytes.len() as i16)?;
        Ok(w.write_all(bytes)?)
    }
}

fn decode_key_bytes(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Vec<u8>> {
    if version >= V::V1_8 {
        Ok(<&[u8]>::decode(r)?.to_vec())
    } else {
        let len = r.read_i16::<BigEndian>()?;
        anyhow::ensure!(len >= 0, "negative key length");
        let len = len as usize;
        anyhow::ensure!(r.len() >= len, "not enough data for key of {len} bytes");
        let (bytes, rest) = r.split_at(len);
        *r = rest;
        Ok(bytes.to_vec())
    }
}

/// The signed player key 1.19 through 1.19.2 clients attach to their
/// login. The proxy never validates it; it is carried so the backend
/// handshake can be replayed faithfully.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerKey {
    pub expires_at: i64,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Encode for PlayerKey {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.expires_at.encode(&mut w)?;
        self.public_key.as_slice().encode(&mut w)?;
        self.signature.as_slice().encode(w)
    }
}

impl Decode<'_> for PlayerKey {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            expires_at: i64::decode(r)?,
            public_key: <&[u8]>::decode(r)?.to_vec(),
            signature: <&[u8]>::decode(r)?.to_vec(),
        })
    }
}

/// Login start: the claimed username, plus whatever identity extras the
/// client's revision attaches.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginHelloC2s {
    pub username: String,
    /// Present on 1.19 through 1.19.2 only.
    pub key: Option<PlayerKey>,
    /// Optional on 1.19.1 through 1.20.1, mandatory from 1.20.2.
    pub profile_id: Option<Uuid>,
}

impl Packet for LoginHelloC2s {
    const NAME: &'static str = "LoginHelloC2s";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        Bounded::<_, 16>(self.username.as_str()).encode(&mut w)?;

        if (V::V1_19..V::V1_19_3).contains(&version) {
            self.key.encode(&mut w)?;
        }

        if version >= V::V1_20_2 {
            let id = self
                .profile_id
                .context("profile id is mandatory from 1.20.2")?;
            id.encode(w)?;
        } else if version >= V::V1_19_1 {
            self.profile_id.encode(w)?;
        }

        Ok(())
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        let username = Bounded::<String, 16>::decode(r)?.into_inner();

        let key = if (V::V1_19..V::V1_19_3).contains(&version) {
            Option::<PlayerKey>::decode(r)?
        } else {
            None
        };

        let profile_id = if version >= V::V1_20_2 {
            Some(Uuid::decode(r)?)
        } else if version >= V::V1_19_1 {
            Option::<Uuid>::decode(r)?
        } else {
            None
        };

        Ok(Self {
            username,
            key,
            profile_id,
        })
    }
}

/// Encryption request. `server_id` has been empty since 1.7.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginHelloS2c {
    pub server_id: String,
    pub public_key: Vec<u8>,
    pub verify_token: Vec<u8>,
    /// 1.20.5+: whether the client should authenticate with the session
    /// service. The proxy always requires it in online mode.
    pub should_authenticate: bool,
}

impl Packet for LoginHelloS2c {
    const NAME: &'static str = "LoginHelloS2c";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        Bounded::<_, 20>(self.server_id.as_str()).encode(&mut w)?;
        encode_key_bytes(&self.public_key, &mut w, version)?;
        encode_key_bytes(&self.verify_token, &mut w, version)?;

        if version >= V::V1_20_5 {
            self.should_authenticate.encode(w)?;
        }

        Ok(())
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            server_id: Bounded::<String, 20>::decode(r)?.into_inner(),
            public_key: decode_key_bytes(r, version)?,
            verify_token: decode_key_bytes(r, version)?,
            should_authenticate: if version >= V::V1_20_5 {
                bool::decode(r)?
            } else {
                true
            },
        })
    }
}

/// Encryption response: the shared secret and verify token, both RSA
/// encrypted under the proxy's public key.
///
/// 1.19 through 1.19.2 clients may substitute a salted signature for the
/// verify token; the proxy refuses that variant during login.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginKeyC2s {
    pub shared_secret: Vec<u8>,
    pub verify_token: Option<Vec<u8>>,
    pub salted_signature: Option<(i64, Vec<u8>)>,
}

impl Packet for LoginKeyC2s {
    const NAME: &'static str = "LoginKeyC2s";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        encode_key_bytes(&self.shared_secret, &mut w, version)?;

        if (V::V1_19..V::V1_19_3).contains(&version) {
            match (&self.verify_token, &self.salted_signature) {
                (Some(token), None) => {
                    true.encode(&mut w)?;
                    encode_key_bytes(token, w, version)?;
                }
                (None, Some((salt, signature))) => {
                    false.encode(&mut w)?;
                    salt.encode(&mut w)?;
                    signature.as_slice().encode(w)?;
                }
                _ => bail!("exactly one of verify token or salted signature must be set"),
            }
            return Ok(());
        }

        let token = self
            .verify_token
            .as_deref()
            .context("verify token is mandatory outside 1.19..1.19.2")?;
        encode_key_bytes(token, w, version)
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        let shared_secret = decode_key_bytes(r, version)?;

        if (V::V1_19..V::V1_19_3).contains(&version) {
            if bool::decode(r)? {
                return Ok(Self {
                    shared_secret,
                    verify_token: Some(decode_key_bytes(r, version)?),
                    salted_signature: None,
                });
            }

            let salt = i64::decode(r)?;
            let signature = <&[u8]>::decode(r)?.to_vec();
            return Ok(Self {
                shared_secret,
                verify_token: None,
                salted_signature: Some((salt, signature)),
            });
        }

        Ok(Self {
            shared_secret,
            verify_token: Some(decode_key_bytes(r, version)?),
            salted_signature: None,
        })
    }
}

/// Enables compression for every subsequent frame in both directions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LoginCompressionS2c {
    pub threshold: VarInt,
}

impl Packet for LoginCompressionS2c {
    const NAME: &'static str = "LoginCompressionS2c";

    fn encode(&self, w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.threshold.encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            threshold: VarInt::decode(r)?,
        })
    }
}

/// Login success. The UUID encoding and the presence of profile
/// properties both changed over the protocol's history.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginSuccessS2c {
    pub uuid: Uuid,
    pub username: String,
    pub properties: Vec<Property>,
}

impl Packet for LoginSuccessS2c {
    const NAME: &'static str = "LoginSuccessS2c";

    fn encode(&self, mut w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        if version >= V::V1_16 {
            self.uuid.encode(&mut w)?;
        } else if version >= V::V1_7_6 {
            self.uuid.hyphenated().to_string().encode(&mut w)?;
        } else {
            self.uuid.simple().to_string().encode(&mut w)?;
        }

        Bounded::<_, 16>(self.username.as_str()).encode(&mut w)?;

        if version >= V::V1_19 {
            self.properties.encode(&mut w)?;
        }

        if version >= V::V1_20_5 {
            // Lenient error handling; the proxy cannot vouch for every
            // backend's packet hygiene.
            false.encode(w)?;
        }

        Ok(())
    }

    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self> {
        let uuid = if version >= V::V1_16 {
            Uuid::decode(r)?
        } else {
            String::decode(r)?.parse().context("malformed UUID string")?
        };

        let username = Bounded::<String, 16>::decode(r)?.into_inner();

        let properties = if version >= V::V1_19 {
            Vec::<Property>::decode(r)?
        } else {
            vec![]
        };

        if version >= V::V1_20_5 {
            bool::decode(r)?;
        }

        Ok(Self {
            uuid,
            username,
            properties,
        })
    }
}

/// Kick during login. The reason stays JSON-encoded in every revision;
/// the NBT component encoding applies only to later states.
#[derive(Clone, PartialEq, Debug)]
pub struct LoginDisconnectS2c {
    pub reason: Text,
}

impl Packet for LoginDisconnectS2c {
    const NAME: &'static str = "LoginDisconnectS2c";

    fn encode(&self, w: impl Write, version: ProtocolVersion) -> anyhow::Result<()> {
        self.reason.to_json(version.json_dialect()).encode(w)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            reason: Text::from_json_lossy(<&str>::decode(r)?),
        })
    }
}

/// The modern-forwarding handshake query (1.13+).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginQueryRequestS2c {
    pub message_id: VarInt,
    pub channel: String,
    pub data: Vec<u8>,
}

impl Packet for LoginQueryRequestS2c {
    const NAME: &'static str = "LoginQueryRequestS2c";

    fn encode(&self, mut w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.message_id.encode(&mut w)?;
        self.channel.encode(&mut w)?;
        Ok(w.write_all(&self.data)?)
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            message_id: VarInt::decode(r)?,
            channel: String::decode(r)?,
            data: std::mem::take(r).to_vec(),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LoginQueryResponseC2s {
    pub message_id: VarInt,
    /// `None` when the client did not understand the query.
    pub data: Option<Vec<u8>>,
}

impl Packet for LoginQueryResponseC2s {
    const NAME: &'static str = "LoginQueryResponseC2s";

    fn encode(&self, mut w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        self.message_id.encode(&mut w)?;
        match &self.data {
            Some(data) => {
                true.encode(&mut w)?;
                Ok(w.write_all(data)?)
            }
            None => false.encode(w),
        }
    }

    fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self {
            message_id: VarInt::decode(r)?,
            data: if bool::decode(r)? {
                Some(std::mem::take(r).to_vec())
            } else {
                None
            },
        })
    }
}

/// The client's acknowledgement of login success, gating entry into the
/// configuration state on 1.20.2+.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LoginAcknowledgedC2s;

impl Packet for LoginAcknowledgedC2s {
    const NAME: &'static str = "LoginAcknowledgedC2s";

    fn encode(&self, _w: impl Write, _version: ProtocolVersion) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(_r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn round_trip<P: Packet + PartialEq>(pkt: &P, version: ProtocolVersion) -> P {
        let mut buf = vec![];
        pkt.encode(&mut buf, version).unwrap();

        let mut r = buf.as_slice();
        let out = P::decode(&mut r, version).unwrap();
        assert!(r.is_empty(), "{} left {} bytes", P::NAME, r.len());
        out
    }

    #[test]
    fn login_hello_layouts() {
        let plain = LoginHelloC2s {
            username: "Alice".into(),
            key: None,
            profile_id: None,
        };
        assert_eq!(round_trip(&plain, V::V1_8), plain);

        let keyed = LoginHelloC2s {
            username: "Alice".into(),
            key: Some(PlayerKey {
                expires_at: 1234,
                public_key: vec![1, 2, 3],
                signature: vec![4, 5],
            }),
            profile_id: None,
        };
        assert_eq!(round_trip(&keyed, V::V1_19), keyed);

        let modern = LoginHelloC2s {
            username: "Alice".into(),
            key: None,
            profile_id: Some(Uuid::from_u128(42)),
        };
        assert_eq!(round_trip(&modern, V::V1_20_2), modern);

        // Pre-1.19 encoding drops key and profile id entirely.
        let mut buf = vec![];
        keyed.encode(&mut buf, V::V1_12_2).unwrap();
        let decoded = LoginHelloC2s::decode(&mut buf.as_slice(), V::V1_12_2).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn login_key_variants() {
        let with_token = LoginKeyC2s {
            shared_secret: vec![9; 128],
            verify_token: Some(vec![1, 2, 3, 4]),
            salted_signature: None,
        };
        assert_eq!(round_trip(&with_token, V::V1_8), with_token);
        assert_eq!(round_trip(&with_token, V::V1_7_2), with_token);
        assert_eq!(round_trip(&with_token, V::V1_19), with_token);

        let with_signature = LoginKeyC2s {
            shared_secret: vec![9; 128],
            verify_token: None,
            salted_signature: Some((77, vec![5, 6])),
        };
        assert_eq!(round_trip(&with_signature, V::V1_19_1), with_signature);
    }

    #[test]
    fn login_success_uuid_encodings() {
        let pkt = LoginSuccessS2c {
            uuid: "af74a02d-19cb-445b-b07f-6866a861f783".parse().unwrap(),
            username: "Alice".into(),
            properties: vec![],
        };

        // Dashed string pre-1.16.
        let mut buf = vec![];
        pkt.encode(&mut buf, V::V1_8).unwrap();
        let mut r = buf.as_slice();
        let s = <&str>::decode(&mut r).unwrap();
        assert_eq!(s, "af74a02d-19cb-445b-b07f-6866a861f783");

        // Undashed on 1.7.2.
        let mut buf = vec![];
        pkt.encode(&mut buf, V::V1_7_2).unwrap();
        let mut r = buf.as_slice();
        let s = <&str>::decode(&mut r).unwrap();
        assert_eq!(s, "af74a02d19cb445bb07f6866a861f783");

        // Raw u128 from 1.16, and a full round trip with properties from
        // 1.19.
        assert_eq!(round_trip(&pkt, V::V1_16), pkt);

        let with_props = LoginSuccessS2c {
            properties: vec![Property {
                name: "textures".into(),
                value: "abc".into(),
                signature: None,
            }],
            ..pkt.clone()
        };
        assert_eq!(round_trip(&with_props, V::V1_19), with_props);
        assert_eq!(round_trip(&with_props, V::V1_20_5), with_props);
    }

    #[test]
    fn one_seven_key_arrays_use_short_prefix() {
        let pkt = LoginHelloS2c {
            server_id: String::new(),
            public_key: vec![7; 162],
            verify_token: vec![1, 2, 3, 4],
            should_authenticate: true,
        };

        let mut buf = vec![];
        pkt.encode(&mut buf, V::V1_7_2).unwrap();
        // server id (1 byte empty string) + i16 len + key bytes.
        assert_eq!(&buf[1..3], &[0x00, 0xa2]);

        assert_eq!(round_trip(&pkt, V::V1_7_2), pkt);
        assert_eq!(round_trip(&pkt, V::V1_20_5), pkt);
    }

    #[test]
    fn query_response_data_flag() {
        let some = LoginQueryResponseC2s {
            message_id: VarInt(0),
            data: Some(vec![1, 2, 3]),
        };
        assert_eq!(round_trip(&some, V::V1_13), some);

        let none = LoginQueryResponseC2s {
            message_id: VarInt(5),
            data: None,
        };
        assert_eq!(round_trip(&none, V::V1_13), none);
    }
}
