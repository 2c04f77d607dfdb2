//! Per-tunnel cipher pipeline.
//!
//! A [`TunnelCipher`] owns everything one tunnel needs to move bytes
//! between the SOCKS5 side and the SSR wire: the plugin instances bound at
//! creation and the two stream cipher contexts. Egress runs protocol →
//! cipher → obfs; ingress runs the inverse, and may additionally yield a
//! *feedback* buffer the obfs layer wants written back to the server.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::crypto::{CipherEnv, StreamContext};
use crate::error::Result;
use crate::obfs::{ss_head_len, Plugin, PluginSlot, ServerInfo};
use crate::{SSR_BUFF_SIZE, TCP_MSS};

/// Plugin instances plus stream cipher contexts for one tunnel.
pub struct TunnelCipher {
    cipher: Arc<CipherEnv>,
    protocol: Option<Box<dyn Plugin>>,
    obfs: Option<Box<dyn Plugin>>,
    enc: Option<StreamContext>,
    dec: Option<StreamContext>,
}

impl TunnelCipher {
    /// Bind a pipeline for a tunnel whose first upstream payload will be
    /// `init_package`. Stream contexts exist only for methods stronger than
    /// the trivial table cipher.
    pub fn new(
        cipher: Arc<CipherEnv>,
        protocol: Option<&PluginSlot>,
        obfs: Option<&PluginSlot>,
        host: &str,
        port: u16,
        init_package: &[u8],
    ) -> Self {
        let (enc, dec) = if cipher.method().is_stream() {
            (Some(cipher.encrypt_context()), Some(cipher.decrypt_context()))
        } else {
            (None, None)
        };

        let iv = enc.as_ref().map(|c| c.iv().to_vec()).unwrap_or_default();
        let head_len = ss_head_len(init_package, 30);

        let base_info = |slot: &PluginSlot, overhead: usize| ServerInfo {
            host: host.to_string(),
            port,
            iv: iv.clone(),
            key: cipher.key().to_vec(),
            param: slot.param.clone(),
            g_data: slot.global.clone(),
            tcp_mss: TCP_MSS,
            buffer_size: SSR_BUFF_SIZE,
            overhead,
            head_len,
        };

        let mut obfs_inst = obfs.map(|slot| {
            let mut inst = slot.new_instance();
            inst.set_server_info(base_info(slot, 0));
            inst
        });

        let protocol_inst = protocol.map(|slot| {
            let mut inst = slot.new_instance();
            let overhead = inst.overhead()
                + obfs_inst.as_mut().map(|o| o.overhead()).unwrap_or(0);
            inst.set_server_info(base_info(slot, overhead));
            inst
        });

        Self {
            cipher,
            protocol: protocol_inst,
            obfs: obfs_inst,
            enc,
            dec,
        }
    }

    /// Egress: protocol framing, then stream encryption, then obfuscation.
    pub fn encrypt(&mut self, buf: &mut Buffer) -> Result<()> {
        if let Some(protocol) = &mut self.protocol {
            protocol.client_pre_encrypt(buf)?;
        }
        self.cipher.encrypt(self.enc.as_mut(), buf)?;
        if let Some(obfs) = &mut self.obfs {
            obfs.client_encode(buf)?;
        }
        Ok(())
    }

    /// Ingress: undo obfuscation, decrypt, strip protocol framing. A
    /// returned buffer must be written back out to the upstream socket
    /// before reading resumes.
    pub fn decrypt(&mut self, buf: &mut Buffer) -> Result<Option<Buffer>> {
        let mut feedback = None;

        if let Some(obfs) = &mut self.obfs {
            let need_sendback = obfs.client_decode(buf)?;
            if need_sendback {
                let mut reply = Buffer::with_capacity(SSR_BUFF_SIZE);
                obfs.client_encode(&mut reply)?;
                feedback = Some(reply);
            }
        }

        if !buf.is_empty() {
            self.cipher.decrypt(self.dec.as_mut(), buf)?;
        }

        if let Some(protocol) = &mut self.protocol {
            protocol.client_post_decrypt(buf)?;
        }

        Ok(feedback)
    }
}
