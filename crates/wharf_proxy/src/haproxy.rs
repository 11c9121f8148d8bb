//! PROXY protocol v1 support for deployments behind HAProxy or another
//! layer-4 balancer. When enabled, every accepted connection must lead
//! with a valid header; the advertised source address replaces the socket
//! peer for rate limiting, forwarding, and logging.

use std::net::SocketAddr;

use anyhow::{bail, Context};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const MAX_HEADER_LEN: usize = 107;

/// Reads and parses the `PROXY TCP4/TCP6 ...` line, returning the real
/// client address. Consumes exactly the header bytes.
pub(crate) async fn read_header(stream: &mut TcpStream) -> anyhow::Result<SocketAddr> {
    let mut line = Vec::with_capacity(64);

    // Byte-at-a-time keeps the framing exact; the header is tiny and read
    // once per connection.
    loop {
        let byte = stream.read_u8().await.context("reading PROXY header")?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() > MAX_HEADER_LEN {
            bail!("PROXY header too long");
        }
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }

    let line = std::str::from_utf8(&line).context("PROXY header is not ASCII")?;
    parse_header(line)
}

fn parse_header(line: &str) -> anyhow::Result<SocketAddr> {
    let mut parts = line.split(' ');

    if parts.next() != Some("PROXY") {
        bail!("missing PROXY signature");
    }

    match parts.next() {
        Some("TCP4" | "TCP6") => {}
        Some("UNKNOWN") => bail!("PROXY UNKNOWN connections are not accepted"),
        other => bail!("unsupported PROXY family {other:?}"),
    }

    let src_ip = parts.next().context("missing source address")?;
    let _dst_ip = parts.next().context("missing destination address")?;
    let src_port = parts.next().context("missing source port")?;
    let _dst_port = parts.next().context("missing destination port")?;

    if parts.next().is_some() {
        bail!("trailing data in PROXY header");
    }

    let ip = src_ip.parse().context("bad source address")?;
    let port = src_port.parse().context("bad source port")?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_tcp4_parses() {
        let addr = parse_header("PROXY TCP4 203.0.113.5 10.0.0.1 56324 25577").unwrap();
        assert_eq!(addr, "203.0.113.5:56324".parse().unwrap());
    }

    #[test]
    fn v1_tcp6_parses() {
        let addr = parse_header("PROXY TCP6 2001:db8::1 ::1 56324 25577").unwrap();
        assert_eq!(addr, "[2001:db8::1]:56324".parse().unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_header("GET / HTTP/1.1").is_err());
        assert!(parse_header("PROXY UNKNOWN").is_err());
        assert!(parse_header("PROXY TCP4 nonsense 10.0.0.1 1 2").is_err());
        assert!(parse_header("PROXY TCP4 1.2.3.4 5.6.7.8 1 2 extra").is_err());
    }
}
