//! The `http_simple` obfuscator (client role).
//!
//! Disguises the first outbound packet as an HTTP GET request: a prefix of
//! the ciphertext rides percent-encoded in the request path, the remainder
//! follows the blank line raw. On ingress the first server packet is
//! expected to carry an HTTP response header, which is stripped. Everything
//! after the first packet in each direction passes through untouched.

use crate::buffer::Buffer;
use crate::crypto::SecureRandom;
use crate::error::{Error, Result};
use crate::obfs::{Plugin, ServerInfo};

/// Give up if no response header terminator shows up within this many bytes.
const MAX_RESPONSE_HEADER: usize = 8192;

static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.87 Safari/537.36",
    "Mozilla/5.0 (Windows NT 6.1; rv:50.0) Gecko/20100101 Firefox/50.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_1) AppleWebKit/602.2.14 (KHTML, like Gecko) Version/10.0.1 Safari/602.2.14",
    "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.2; Trident/6.0)",
];

/// Client-side `http_simple` state for one tunnel.
pub struct HttpSimple {
    info: Option<ServerInfo>,
    has_sent_header: bool,
    has_recv_header: bool,
    recv_pending: Vec<u8>,
}

impl HttpSimple {
    fn new() -> Self {
        Self {
            info: None,
            has_sent_header: false,
            has_recv_header: false,
            recv_pending: Vec::new(),
        }
    }

    /// Boxed factory for the registry.
    pub fn new_boxed() -> Box<dyn Plugin> {
        Box::new(Self::new())
    }

    fn info(&self) -> &ServerInfo {
        self.info.as_ref().expect("server info bound at tunnel creation")
    }

    /// The Host header value: one of the comma-separated hosts from the
    /// obfs parameter, falling back to the configured server host. The port
    /// is appended unless it is 80.
    fn host_header(&self) -> String {
        let info = self.info();
        let host = match info.param.as_deref().filter(|p| !p.is_empty()) {
            Some(param) => {
                let hosts: Vec<&str> = param.split(',').collect();
                hosts[SecureRandom::u32() as usize % hosts.len()].to_string()
            }
            None => info.host.clone(),
        };
        if info.port == 80 || host.contains(':') {
            host
        } else {
            format!("{}:{}", host, info.port)
        }
    }

    fn percent_encode(data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() * 3);
        for b in data {
            out.push('%');
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl Plugin for HttpSimple {
    fn set_server_info(&mut self, info: ServerInfo) {
        self.info = Some(info);
    }

    fn client_encode(&mut self, buf: &mut Buffer) -> Result<()> {
        if self.has_sent_header {
            return Ok(());
        }
        self.has_sent_header = true;

        let data = buf.take();
        let head_len = self.info().head_len + (SecureRandom::u32() as usize % 64);
        let head_len = head_len.min(data.len());
        let (head, body) = data.split_at(head_len);

        let ua = USER_AGENTS[SecureRandom::u32() as usize % USER_AGENTS.len()];
        let request = format!(
            "GET /{} HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: {}\r\n\
             Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
             Accept-Language: en-US,en;q=0.8\r\n\
             Accept-Encoding: gzip, deflate\r\n\
             DNT: 1\r\n\
             Connection: keep-alive\r\n\r\n",
            Self::percent_encode(head),
            self.host_header(),
            ua
        );

        let mut out = request.into_bytes();
        out.extend_from_slice(body);
        buf.store_vec(out);
        Ok(())
    }

    fn client_decode(&mut self, buf: &mut Buffer) -> Result<bool> {
        if self.has_recv_header {
            return Ok(false);
        }

        self.recv_pending.extend_from_slice(&buf.take());
        if let Some(end) = find_terminator(&self.recv_pending) {
            let payload = self.recv_pending[end..].to_vec();
            self.recv_pending.clear();
            self.has_recv_header = true;
            buf.store_vec(payload);
            Ok(false)
        } else if self.recv_pending.len() > MAX_RESPONSE_HEADER {
            Err(Error::ClientDecode)
        } else {
            // header still incomplete, emit nothing yet
            Ok(false)
        }
    }
}

/// Offset just past the `\r\n\r\n` header terminator, if present.
fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfs::PluginGlobal;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn instance(param: Option<&str>, port: u16) -> HttpSimple {
        let mut plugin = HttpSimple::new();
        plugin.set_server_info(ServerInfo {
            host: "server.example".into(),
            port,
            iv: Vec::new(),
            key: Vec::new(),
            param: param.map(str::to_owned),
            g_data: Arc::new(Mutex::new(PluginGlobal::new())),
            tcp_mss: 1452,
            buffer_size: 2048,
            overhead: 0,
            head_len: 7,
        });
        plugin
    }

    #[test]
    fn test_first_packet_wrapped_in_get() {
        let mut plugin = instance(None, 8388);
        let mut buf = Buffer::from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        plugin.client_encode(&mut buf).unwrap();

        let text = buf.as_slice();
        assert!(text.starts_with(b"GET /%de%ad%be%ef"));
        let header_end = find_terminator(text).unwrap();
        let header = String::from_utf8_lossy(&text[..header_end]);
        assert!(header.contains("Host: server.example:8388\r\n"));
        assert!(header.contains("Connection: keep-alive"));
    }

    #[test]
    fn test_port_80_host_has_no_port() {
        let mut plugin = instance(None, 80);
        let mut buf = Buffer::from_slice(&[0u8; 16]);
        plugin.client_encode(&mut buf).unwrap();
        let header = String::from_utf8_lossy(buf.as_slice()).to_string();
        assert!(header.contains("Host: server.example\r\n"));
    }

    #[test]
    fn test_obfs_param_overrides_host() {
        let mut plugin = instance(Some("cdn.example.org"), 443);
        let mut buf = Buffer::from_slice(&[0u8; 16]);
        plugin.client_encode(&mut buf).unwrap();
        let header = String::from_utf8_lossy(buf.as_slice()).to_string();
        assert!(header.contains("Host: cdn.example.org:443\r\n"));
    }

    #[test]
    fn test_second_packet_passes_through() {
        let mut plugin = instance(None, 8388);
        let mut first = Buffer::from_slice(b"first");
        plugin.client_encode(&mut first).unwrap();

        let mut second = Buffer::from_slice(b"second packet unchanged");
        plugin.client_encode(&mut second).unwrap();
        assert_eq!(second.as_slice(), b"second packet unchanged");
    }

    #[test]
    fn test_decode_strips_response_header() {
        let mut plugin = instance(None, 8388);
        let mut buf =
            Buffer::from_slice(b"HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\nencrypted-bytes");
        let sendback = plugin.client_decode(&mut buf).unwrap();
        assert!(!sendback);
        assert_eq!(buf.as_slice(), b"encrypted-bytes");

        let mut next = Buffer::from_slice(b"more-bytes");
        plugin.client_decode(&mut next).unwrap();
        assert_eq!(next.as_slice(), b"more-bytes");
    }

    #[test]
    fn test_decode_header_split_across_chunks() {
        let mut plugin = instance(None, 8388);

        let mut part1 = Buffer::from_slice(b"HTTP/1.1 200 OK\r\nServer: ngin");
        plugin.client_decode(&mut part1).unwrap();
        assert!(part1.is_empty());

        let mut part2 = Buffer::from_slice(b"x\r\n\r\npayload");
        plugin.client_decode(&mut part2).unwrap();
        assert_eq!(part2.as_slice(), b"payload");
    }

    #[test]
    fn test_decode_oversized_header_rejected() {
        let mut plugin = instance(None, 8388);
        let mut buf = Buffer::from_slice(&vec![b'x'; MAX_RESPONSE_HEADER + 1]);
        assert!(matches!(
            plugin.client_decode(&mut buf),
            Err(Error::ClientDecode)
        ));
    }

    #[test]
    fn test_encode_handles_short_first_packet() {
        let mut plugin = instance(None, 8388);
        let mut buf = Buffer::from_slice(&[0xAB]);
        plugin.client_encode(&mut buf).unwrap();
        assert!(buf.as_slice().starts_with(b"GET /%ab"));
    }
}
