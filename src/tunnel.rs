//! Per-connection tunnel state machine.
//!
//! A tunnel moves through the SOCKS5 handshake and request phases, resolves
//! and connects the upstream SSR server, delivers the encrypted initial
//! package, replies to the client, and then settles into the proxy phase
//! where it relays bytes in both directions through the cipher pipeline.
//!
//! ```text
//! handshake → req_parse ─┬→ req_udp_assoc (idle until EOF)
//!                        └→ req_lookup → req_connect → ssr_auth_sent
//!                                          → proxy → kill
//! ```
//!
//! Every await on a socket is bounded by the configured idle timeout; EOF
//! is an orderly end everywhere, an error nowhere. Pipeline failures and
//! parse errors tear the tunnel down with no retry.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::pipeline::TunnelCipher;
use crate::server::ServerEnv;
use crate::socks5::{Atyp, Cmd, Parse, Socks5Parser};
use crate::SSR_BUFF_SIZE;

/// SOCKS5 reply: request granted, echoing the destination.
const REPLY_VERSION: u8 = 5;
/// Reply code: host unreachable (resolve failure).
const REP_HOST_UNREACHABLE: u8 = 0x04;
/// Reply code: connection refused (upstream connect failure).
const REP_CONNECTION_REFUSED: u8 = 0x05;
/// Reply code: command not supported (UDP disabled).
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;

/// Ten-byte error reply with a zeroed IPv4 bind address.
fn error_reply(code: u8) -> [u8; 10] {
    [REPLY_VERSION, code, 0, 1, 0, 0, 0, 0, 0, 0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshake,
    ReqParse,
    ReqUdpAssoc,
    ReqLookup,
    ReqConnect,
    SsrAuthSent,
    Proxy,
    Kill,
}

/// Drive one client connection to completion.
pub async fn run(client: TcpStream, peer: SocketAddr, env: Arc<ServerEnv>) -> Result<()> {
    let idle = env.config().idle_timeout();
    let mut tunnel = Tunnel {
        env,
        client,
        peer,
        idle,
        parser: Socks5Parser::new(),
        init_package: None,
        cipher: None,
        upstream: None,
        upstream_addr: None,
    };

    let result = tunnel.drive().await;
    if let Err(e) = &result {
        if matches!(e, Error::Timeout) {
            tunnel.env.metrics().add_timeout();
        }
        tracing::debug!("tunnel from {} ended: {}", peer, e);
    }
    result
}

struct Tunnel {
    env: Arc<ServerEnv>,
    client: TcpStream,
    peer: SocketAddr,
    idle: Duration,
    parser: Socks5Parser,
    init_package: Option<Buffer>,
    cipher: Option<TunnelCipher>,
    upstream: Option<TcpStream>,
    upstream_addr: Option<SocketAddr>,
}

/// Bound an I/O future by the tunnel's idle timeout.
async fn with_idle<F, T>(idle: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(idle, fut).await {
        Ok(result) => result.map_err(Error::Network),
        Err(_) => Err(Error::Timeout),
    }
}

impl Tunnel {
    async fn drive(&mut self) -> Result<()> {
        let mut state = State::Handshake;
        loop {
            state = match state {
                State::Handshake => self.do_handshake().await?,
                State::ReqParse => self.do_req_parse().await?,
                State::ReqUdpAssoc => self.do_req_udp_assoc().await?,
                State::ReqLookup => self.do_req_lookup().await?,
                State::ReqConnect => self.do_req_connect().await?,
                State::SsrAuthSent => self.do_ssr_auth_sent().await?,
                State::Proxy => self.do_proxy().await?,
                State::Kill => return Ok(()),
            };
        }
    }

    /// Parse the method-selection message; accept no-auth only.
    async fn do_handshake(&mut self) -> Result<State> {
        let mut chunk = [0u8; SSR_BUFF_SIZE];
        loop {
            let n = with_idle(self.idle, self.client.read(&mut chunk)).await?;
            if n == 0 {
                return Ok(State::Kill);
            }

            let (status, used) = match self.parser.parse(&chunk[..n]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.env.metrics().add_handshake_error();
                    return Err(e);
                }
            };
            match status {
                Parse::NeedMore => continue,
                Parse::AuthSelect => {
                    if used != n {
                        self.env.metrics().add_handshake_error();
                        return Err(Error::socks5("junk in handshake"));
                    }
                    if self.parser.offers_no_auth() {
                        with_idle(self.idle, self.client.write_all(&[5, 0])).await?;
                        return Ok(State::ReqParse);
                    }
                    // no acceptable auth method
                    with_idle(self.idle, self.client.write_all(&[5, 0xFF])).await?;
                    return Ok(State::Kill);
                }
                Parse::ExecCmd => {
                    return Err(Error::socks5("request before method selection"));
                }
            }
        }
    }

    /// Parse the request and dispatch on its command.
    async fn do_req_parse(&mut self) -> Result<State> {
        let mut chunk = [0u8; SSR_BUFF_SIZE];
        loop {
            let n = with_idle(self.idle, self.client.read(&mut chunk)).await?;
            if n == 0 {
                return Ok(State::Kill);
            }

            let (status, used) = match self.parser.parse(&chunk[..n]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.env.metrics().add_handshake_error();
                    return Err(e);
                }
            };
            match status {
                Parse::NeedMore => continue,
                Parse::AuthSelect => {
                    return Err(Error::socks5("unexpected method selection"));
                }
                Parse::ExecCmd => {
                    if used != n {
                        self.env.metrics().add_handshake_error();
                        return Err(Error::socks5("junk in request"));
                    }
                    break;
                }
            }
        }

        match self.parser.cmd() {
            Some(Cmd::TcpConnect) => {
                tracing::info!(
                    "[TCP] {} --> {}:{}",
                    self.peer,
                    self.parser.daddr_display(),
                    self.parser.dport()
                );

                let init_package = build_init_package(&self.parser)?;
                self.cipher = Some(self.env.tunnel_cipher(init_package.as_slice()));
                self.init_package = Some(init_package);

                let config = self.env.config();
                match config.remote_host.parse::<IpAddr>() {
                    Ok(ip) => {
                        self.upstream_addr = Some(SocketAddr::new(ip, config.remote_port));
                        Ok(State::ReqConnect)
                    }
                    Err(_) => Ok(State::ReqLookup),
                }
            }
            Some(Cmd::UdpAssoc) => {
                let config = self.env.config();
                let reply =
                    build_udp_assoc_reply(config.udp, &config.listen_host, config.listen_port)?;
                with_idle(self.idle, self.client.write_all(&reply)).await?;
                Ok(State::ReqUdpAssoc)
            }
            Some(Cmd::TcpBind) => {
                tracing::warn!("BIND requests are not supported");
                Err(Error::socks5("BIND not supported"))
            }
            None => Err(Error::socks5("request without command")),
        }
    }

    /// After a UDP ASSOCIATE reply the TCP side just waits for the client
    /// to hang up.
    async fn do_req_udp_assoc(&mut self) -> Result<State> {
        let mut chunk = [0u8; SSR_BUFF_SIZE];
        loop {
            let n = with_idle(self.idle, self.client.read(&mut chunk)).await?;
            if n == 0 {
                tracing::debug!("UDP ASSOCIATE ended by {}", self.peer);
                return Ok(State::Kill);
            }
        }
    }

    /// Resolve the remote server hostname; the first V4/V6 result wins.
    async fn do_req_lookup(&mut self) -> Result<State> {
        let config = self.env.config();
        let host = config.remote_host.clone();
        let port = config.remote_port;

        let lookup = tokio::net::lookup_host((host.as_str(), port));
        let result = match with_idle(self.idle, lookup).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => {
                    self.upstream_addr = Some(addr);
                    Ok(State::ReqConnect)
                }
                None => self.reply_and_kill(REP_HOST_UNREACHABLE, &host).await,
            },
            Err(Error::Timeout) => Err(Error::Timeout),
            Err(e) => {
                tracing::warn!("lookup error for \"{}\": {}", host, e);
                self.reply_and_kill(REP_HOST_UNREACHABLE, &host).await
            }
        };
        result
    }

    /// Connect the upstream server and deliver the encrypted initial
    /// package before anything else goes out.
    async fn do_req_connect(&mut self) -> Result<State> {
        let addr = self
            .upstream_addr
            .expect("address populated before connect");

        match with_idle(self.idle, TcpStream::connect(addr)).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;

                let init = self
                    .init_package
                    .as_ref()
                    .expect("initial package built at request parse");
                let mut package = Buffer::from_slice(init.as_slice());
                let cipher = self.cipher.as_mut().expect("pipeline built at request parse");
                cipher.encrypt(&mut package)?;

                let mut stream = stream;
                with_idle(self.idle, stream.write_all(package.as_slice())).await?;
                self.upstream = Some(stream);
                Ok(State::SsrAuthSent)
            }
            Err(Error::Timeout) => Err(Error::Timeout),
            Err(e) => {
                tracing::warn!("upstream connection \"{}\" error: {}", addr, e);
                let addr = addr.to_string();
                self.reply_and_kill(REP_CONNECTION_REFUSED, &addr).await
            }
        }
    }

    /// Tell the client the request succeeded, echoing the destination the
    /// initial package carries.
    async fn do_ssr_auth_sent(&mut self) -> Result<State> {
        let init = self
            .init_package
            .as_ref()
            .expect("initial package built at request parse");
        let mut reply = Vec::with_capacity(3 + init.len());
        reply.extend_from_slice(&[REPLY_VERSION, 0, 0]);
        reply.extend_from_slice(init.as_slice());

        with_idle(self.idle, self.client.write_all(&reply)).await?;
        Ok(State::Proxy)
    }

    /// Relay bytes in both directions until either side hangs up.
    async fn do_proxy(&mut self) -> Result<State> {
        let upstream = self.upstream.as_mut().expect("upstream connected");
        let cipher = self.cipher.as_mut().expect("pipeline built at request parse");
        let metrics = self.env.metrics();
        let idle = self.idle;

        let (mut client_rd, mut client_wr) = self.client.split();
        let (mut upstream_rd, mut upstream_wr) = upstream.split();

        let mut client_chunk = vec![0u8; SSR_BUFF_SIZE];
        let mut upstream_chunk = vec![0u8; SSR_BUFF_SIZE];

        loop {
            enum Event {
                Client(std::io::Result<usize>),
                Upstream(std::io::Result<usize>),
            }

            let event = tokio::time::timeout(idle, async {
                tokio::select! {
                    r = client_rd.read(&mut client_chunk) => Event::Client(r),
                    r = upstream_rd.read(&mut upstream_chunk) => Event::Upstream(r),
                }
            })
            .await
            .map_err(|_| Error::Timeout)?;

            match event {
                Event::Client(Ok(0)) => return Ok(State::Kill),
                Event::Client(Ok(n)) => {
                    let mut buf = Buffer::from_slice(&client_chunk[..n]);
                    cipher.encrypt(&mut buf)?;
                    if !buf.is_empty() {
                        with_idle(idle, upstream_wr.write_all(buf.as_slice())).await?;
                    }
                    metrics.add_bytes_up(n as u64);
                }
                Event::Client(Err(e)) => return Err(Error::Network(e)),
                Event::Upstream(Ok(0)) => return Ok(State::Kill),
                Event::Upstream(Ok(n)) => {
                    let mut buf = Buffer::from_slice(&upstream_chunk[..n]);
                    let feedback = cipher.decrypt(&mut buf)?;
                    if let Some(reply) = feedback {
                        // the server expects this before any more client data
                        with_idle(idle, upstream_wr.write_all(reply.as_slice())).await?;
                    }
                    if !buf.is_empty() {
                        with_idle(idle, client_wr.write_all(buf.as_slice())).await?;
                        metrics.add_bytes_down(buf.len() as u64);
                    }
                }
                Event::Upstream(Err(e)) => return Err(Error::Network(e)),
            }
        }
    }

    /// Send a SOCKS5 error reply, then kill the tunnel.
    async fn reply_and_kill(&mut self, code: u8, what: &str) -> Result<State> {
        tracing::debug!("replying 0x{:02x} to {} for {}", code, self.peer, what);
        with_idle(self.idle, self.client.write_all(&error_reply(code))).await?;
        Ok(State::Kill)
    }
}

/// The Shadowsocks initial package: `atyp ‖ address ‖ port(BE)`.
fn build_init_package(parser: &Socks5Parser) -> Result<Buffer> {
    let atyp = parser
        .atyp()
        .ok_or_else(|| Error::socks5("request without address"))?;

    let mut bytes = Vec::with_capacity(parser.daddr().len() + 4);
    bytes.push(atyp.code());
    if atyp == Atyp::Host {
        bytes.push(parser.daddr().len() as u8);
    }
    bytes.extend_from_slice(parser.daddr());
    bytes.extend_from_slice(&parser.dport().to_be_bytes());
    Ok(Buffer::from(bytes))
}

/// The UDP ASSOCIATE reply: success (or "command not supported" when UDP
/// is disabled) with the gateway's own address and port.
fn build_udp_assoc_reply(allow: bool, listen_host: &str, listen_port: u16) -> Result<Vec<u8>> {
    let ip: IpAddr = listen_host
        .parse()
        .map_err(|_| Error::config(format!("listen_host \"{}\" is not an address", listen_host)))?;

    let code = if allow { 0 } else { REP_CMD_NOT_SUPPORTED };
    let mut reply = vec![REPLY_VERSION, code, 0];
    match ip {
        IpAddr::V4(v4) => {
            reply.push(1);
            reply.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            reply.push(4);
            reply.extend_from_slice(&v6.octets());
        }
    }
    reply.extend_from_slice(&listen_port.to_be_bytes());
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Config, Server};
    use tokio::net::TcpListener;

    fn gateway_config(remote: SocketAddr) -> Config {
        Config {
            listen_host: "127.0.0.1".into(),
            listen_port: 0,
            remote_host: remote.ip().to_string(),
            remote_port: remote.port(),
            password: "pw".into(),
            method: "none".into(),
            protocol: "plain".into(),
            protocol_param: None,
            obfs: "plain".into(),
            obfs_param: None,
            idle_timeout_ms: 5_000,
            udp: false,
        }
    }

    /// Bind the gateway on an ephemeral port and serve in the background.
    async fn start_gateway(mut config: Config) -> (SocketAddr, Arc<ServerEnv>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        config.listen_port = addr.port();

        let server = Server::new(config).unwrap();
        let env = server.env();
        tokio::spawn(async move { server.serve(listener).await });
        (addr, env)
    }

    /// A remote endpoint that hands us its first accepted socket.
    async fn start_upstream() -> (SocketAddr, tokio::sync::oneshot::Receiver<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = tx.send(stream);
            }
        });
        (addr, rx)
    }

    async fn no_auth_handshake(client: &mut TcpStream) {
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_handshake_no_auth() {
        let (upstream_addr, _rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
    }

    #[tokio::test]
    async fn test_handshake_unsupported_method_rejected() {
        let (upstream_addr, _rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);

        // and the gateway hangs up
        let mut rest = [0u8; 1];
        assert_eq!(client.read(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ipv4_connect_delivers_init_package() {
        let (upstream_addr, upstream_rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x1F, 0x90])
            .await
            .unwrap();

        // with the identity pipeline the upstream sees the raw package
        let mut upstream = upstream_rx.await.unwrap();
        let mut package = [0u8; 7];
        upstream.read_exact(&mut package).await.unwrap();
        assert_eq!(package, [0x01, 1, 2, 3, 4, 0x1F, 0x90]);

        // the client reply echoes the destination
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 1, 2, 3, 4, 0x1F, 0x90]);
    }

    #[tokio::test]
    async fn test_domain_connect_init_package() {
        let (upstream_addr, upstream_rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;

        let mut request = vec![0x05, 0x01, 0x00, 0x03, 0x0B];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&[0x01, 0xBB]);
        client.write_all(&request).await.unwrap();

        let mut upstream = upstream_rx.await.unwrap();
        let mut package = [0u8; 15];
        upstream.read_exact(&mut package).await.unwrap();

        let mut expected = vec![0x03, 0x0B];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&[0x01, 0xBB]);
        assert_eq!(&package[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_proxy_relays_both_directions_in_order() {
        let (upstream_addr, upstream_rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 9, 9, 9, 9, 0x00, 0x50])
            .await
            .unwrap();

        let mut upstream = upstream_rx.await.unwrap();
        let mut package = [0u8; 7];
        upstream.read_exact(&mut package).await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();

        // client → upstream, several chunks
        for chunk in [&b"alpha"[..], b"beta", b"gamma"] {
            client.write_all(chunk).await.unwrap();
        }
        let mut relayed = [0u8; 14];
        upstream.read_exact(&mut relayed).await.unwrap();
        assert_eq!(&relayed, b"alphabetagamma");

        // upstream → client
        upstream.write_all(b"response bytes").await.unwrap();
        let mut downstream = [0u8; 14];
        client.read_exact(&mut downstream).await.unwrap();
        assert_eq!(&downstream, b"response bytes");
    }

    #[tokio::test]
    async fn test_auth_aes128_upstream_frame_verifies() {
        use crate::crypto::{bytes_to_key, hmac_md5};

        let (upstream_addr, upstream_rx) = start_upstream().await;
        let mut config = gateway_config(upstream_addr);
        config.protocol = "auth_aes128_md5".into();
        let (addr, _env) = start_gateway(config).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x1F, 0x90])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        // the auth frame reaches the upstream as one write; with no
        // uid:key parameter its user key is the master key
        let mut upstream = upstream_rx.await.unwrap();
        let mut frame = vec![0u8; 4096];
        let n = upstream.read(&mut frame).await.unwrap();
        frame.truncate(n);

        let user_key = bytes_to_key(b"pw", 16);
        let tag = hmac_md5(&user_key, &frame[..n - 4]);
        assert_eq!(&tag[..4], &frame[n - 4..]);
    }

    #[tokio::test]
    async fn test_resolve_failure_replies_host_unreachable() {
        let (upstream_addr, _rx) = start_upstream().await;
        let mut config = gateway_config(upstream_addr);
        config.remote_host = "no.such.host.invalid".into();
        let (addr, _env) = start_gateway(config).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_connect_failure_replies_connection_refused() {
        // a listener we immediately drop: the port is very likely closed
        let doomed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = doomed.local_addr().unwrap();
        drop(doomed);

        let (addr, _env) = start_gateway(gateway_config(dead_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_idle_timeout_cleans_registry() {
        let (upstream_addr, _rx) = start_upstream().await;
        let mut config = gateway_config(upstream_addr);
        config.idle_timeout_ms = 100;
        let (addr, env) = start_gateway(config).await;

        let before = env.tunnels().len();
        let _client = TcpStream::connect(addr).await.unwrap();

        // give the accept loop a moment, then confirm the tunnel exists
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(env.tunnels().len(), before + 1);

        // stay idle past the timeout; the registry drains again
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(env.tunnels().len(), before);
        assert!(env.metrics().snapshot().timeouts >= 1);
    }

    #[tokio::test]
    async fn test_udp_assoc_reply() {
        let (upstream_addr, _rx) = start_upstream().await;
        let mut config = gateway_config(upstream_addr);
        config.udp = true;
        let (addr, env) = start_gateway(config).await;
        let listen_port = env.config().listen_port;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), listen_port);
    }

    #[tokio::test]
    async fn test_udp_assoc_denied_when_disabled() {
        let (upstream_addr, _rx) = start_upstream().await;
        let (addr, _env) = start_gateway(gateway_config(upstream_addr)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        no_auth_handshake(&mut client).await;
        client
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REP_CMD_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_shutdown_all_drains_registry() {
        let (upstream_addr, _rx) = start_upstream().await;
        let (addr, env) = start_gateway(gateway_config(upstream_addr)).await;

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(env.tunnels().len(), 2);

        env.tunnels().shutdown_all();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(env.tunnels().len(), 0);
    }

    #[test]
    fn test_build_udp_assoc_reply_shapes() {
        let v4 = build_udp_assoc_reply(true, "127.0.0.1", 1080).unwrap();
        assert_eq!(v4, vec![5, 0, 0, 1, 127, 0, 0, 1, 0x04, 0x38]);

        let v6 = build_udp_assoc_reply(false, "::1", 1080).unwrap();
        assert_eq!(v6.len(), 4 + 16 + 2);
        assert_eq!(v6[1], REP_CMD_NOT_SUPPORTED);
        assert_eq!(v6[3], 4);

        assert!(build_udp_assoc_reply(true, "localhost", 1080).is_err());
    }
}
