//! Protocol and obfuscation plugins.
//!
//! Every SSR tunnel threads its traffic through two optional plugin
//! instances: a *protocol* (innermost — authentication framing around the
//! encrypted payload) and an *obfs* (outermost — makes the wire bytes
//! resemble another protocol). Both roles share one capability set; a
//! plugin implements the callbacks it needs and inherits identity behaviour
//! for the rest.
//!
//! Plugins are resolved by name through the built-in registry. The names
//! `origin`/`plain` (and the empty string) mean "no plugin"; unknown names
//! are a startup error rather than a silent pass-through.

mod auth_aes128;
mod http_simple;

pub use auth_aes128::AuthAes128;
pub use http_simple::HttpSimple;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::crypto::{SecureRandom, Xorshift128Plus};
use crate::error::{Error, Result};

/// Per-tunnel parameters handed to each plugin instance at creation.
#[derive(Clone)]
pub struct ServerInfo {
    /// Remote server host (as configured).
    pub host: String,
    /// Remote server port.
    pub port: u16,
    /// Egress cipher IV for this tunnel (empty for IV-less methods).
    pub iv: Vec<u8>,
    /// Master cipher key.
    pub key: Vec<u8>,
    /// Plugin parameter string from the configuration, if any.
    pub param: Option<String>,
    /// Shared plugin-global state for this plugin slot.
    pub g_data: Arc<Mutex<PluginGlobal>>,
    /// Assumed TCP maximum segment size.
    pub tcp_mss: u16,
    /// I/O buffer size the tunnel reads with.
    pub buffer_size: usize,
    /// Combined per-chunk overhead of the tunnel's plugin pair.
    pub overhead: usize,
    /// Length of the Shadowsocks address header in the first packet.
    pub head_len: usize,
}

/// State shared by every tunnel using the same plugin slot.
///
/// `connection_id` and `local_client_id` identify this client instance to
/// the server; the padding generator lives here too, so its seeding policy
/// is plugin-global.
pub struct PluginGlobal {
    pub local_client_id: [u8; 8],
    pub connection_id: u32,
    pub rng: Xorshift128Plus,
}

impl PluginGlobal {
    /// Fresh global state with random identifiers.
    pub fn new() -> Self {
        Self {
            local_client_id: SecureRandom::bytes(),
            connection_id: SecureRandom::u32() & 0xFFFFFF,
            rng: Xorshift128Plus::new(),
        }
    }

    /// Advance to the next connection, re-randomising both identifiers once
    /// the id space is nearly exhausted. Returns the (client id,
    /// connection id) pair to stamp into the auth packet.
    pub fn next_connection(&mut self) -> ([u8; 8], u32) {
        self.connection_id = self.connection_id.wrapping_add(1);
        if self.connection_id > 0xFF00_0000 {
            self.local_client_id = SecureRandom::bytes();
            self.connection_id = SecureRandom::u32() & 0xFFFFFF;
        }
        (self.local_client_id, self.connection_id)
    }
}

impl Default for PluginGlobal {
    fn default() -> Self {
        Self::new()
    }
}

/// The capability set every protocol/obfs variant honours.
///
/// Callbacks a variant does not override are identity transformations.
pub trait Plugin: Send {
    /// Bind the per-tunnel server parameters. Called exactly once, before
    /// any other callback.
    fn set_server_info(&mut self, info: ServerInfo);

    /// Per-chunk overhead this plugin adds on the wire.
    fn overhead(&self) -> usize {
        0
    }

    /// Egress, protocol role: wrap plaintext in auth framing.
    fn client_pre_encrypt(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    /// Ingress, protocol role: validate and strip auth framing.
    fn client_post_decrypt(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    /// Egress, obfs role: shape ciphertext for the wire.
    fn client_encode(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    /// Ingress, obfs role: undo the wire shaping. Returns `true` when the
    /// server expects a feedback write (produced by calling
    /// [`Plugin::client_encode`] on an empty buffer).
    fn client_decode(&mut self, _buf: &mut Buffer) -> Result<bool> {
        Ok(false)
    }

    /// Egress, protocol role, datagram flavour.
    fn client_udp_pre_encrypt(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }

    /// Ingress, protocol role, datagram flavour.
    fn client_udp_post_decrypt(&mut self, _buf: &mut Buffer) -> Result<()> {
        Ok(())
    }
}

/// Registry entry: a name and an instance factory.
pub struct PluginVtable {
    pub name: &'static str,
    pub new_instance: fn() -> Box<dyn Plugin>,
}

/// One resolved plugin slot of the server environment: the factory plus the
/// state and parameter shared by every tunnel using it.
pub struct PluginSlot {
    pub vtable: &'static PluginVtable,
    pub global: Arc<Mutex<PluginGlobal>>,
    pub param: Option<String>,
}

impl PluginSlot {
    /// Resolve a protocol slot by name. `None` means identity.
    pub fn protocol(name: &str, param: Option<String>) -> Result<Option<Self>> {
        Ok(find(PROTOCOLS, name)?.map(|vtable| Self::bind(vtable, param)))
    }

    /// Resolve an obfs slot by name. `None` means identity.
    pub fn obfs(name: &str, param: Option<String>) -> Result<Option<Self>> {
        Ok(find(OBFS, name)?.map(|vtable| Self::bind(vtable, param)))
    }

    fn bind(vtable: &'static PluginVtable, param: Option<String>) -> Self {
        Self {
            vtable,
            global: Arc::new(Mutex::new(PluginGlobal::new())),
            param,
        }
    }

    /// Create a fresh per-tunnel instance.
    pub fn new_instance(&self) -> Box<dyn Plugin> {
        (self.vtable.new_instance)()
    }
}

static PROTOCOLS: &[PluginVtable] = &[
    PluginVtable {
        name: "auth_aes128_md5",
        new_instance: AuthAes128::new_md5,
    },
    PluginVtable {
        name: "auth_aes128_sha1",
        new_instance: AuthAes128::new_sha1,
    },
];

static OBFS: &[PluginVtable] = &[PluginVtable {
    name: "http_simple",
    new_instance: HttpSimple::new_boxed,
}];

fn find(table: &'static [PluginVtable], name: &str) -> Result<Option<&'static PluginVtable>> {
    if name.is_empty() || name == "plain" || name == "origin" {
        return Ok(None);
    }
    table
        .iter()
        .find(|v| v.name == name)
        .map(Some)
        .ok_or_else(|| Error::UnknownPlugin(name.to_string()))
}

/// Length of the Shadowsocks address header at the front of `data`:
/// `atyp(1) ‖ addr ‖ port(2)`. Falls back to `default` when the header is
/// unparseable; inspects at most the bytes it needs.
pub fn ss_head_len(data: &[u8], default: usize) -> usize {
    if data.len() < 2 {
        return default;
    }
    match data[0] & 0x7 {
        1 => 7,
        4 => 19,
        3 => 4 + data[1] as usize,
        _ => default,
    }
}
