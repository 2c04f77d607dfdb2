//! The `auth_aes128_md5` / `auth_aes128_sha1` protocol family.
//!
//! Both variants wrap the Shadowsocks-encrypted stream in authenticated
//! frames. The first outbound frame carries the connection's auth block: a
//! per-client identity (`local_client_id` + `connection_id`), a timestamp
//! and the frame geometry, AES-encrypted under a key derived from the user
//! key, then tagged with HMACs keyed off the tunnel IV and master key.
//! Every later frame is
//!
//! ```text
//! size(LE u16) ‖ HMAC(user_key‖pack_id, size)[0..2] ‖ padding ‖ payload ‖
//! HMAC(user_key‖pack_id, frame-minus-tag)[0..4]
//! ```
//!
//! where the first byte(s) of the padding region encode the padding length.
//! The two variants differ only in the digest (MD5 vs SHA-1) and the salt
//! string mixed into the AES key derivation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::buffer::Buffer;
use crate::crypto::{
    aes128_encrypt_block, bytes_to_key, hmac_md5, hmac_sha1, md5_digest, sha1_digest,
    Xorshift128Plus,
};
use crate::error::{Error, Result};
use crate::obfs::{Plugin, ServerInfo};

/// Per-chunk wire overhead of this family (size + short tag + minimum
/// padding marker + trailing tag).
const OVERHEAD: usize = 9;

/// Hard cap on the ingress reassembly buffer.
const RECV_BUFFER_LIMIT: usize = 16384;

/// Payload bytes per non-initial frame.
const UNIT_LEN: usize = 2000;

/// Most bytes the initial auth frame will carry.
const MAX_HEAD_SIZE: usize = 1200;

/// Frame length sanity bounds for the ingress parser.
const MIN_FRAME_LEN: usize = 8;
const MAX_FRAME_LEN: usize = 8192;

#[derive(Debug, Clone, Copy)]
enum MacKind {
    Md5,
    Sha1,
}

/// Client-side state for one tunnel running `auth_aes128_{md5,sha1}`.
pub struct AuthAes128 {
    mac: MacKind,
    salt: &'static str,
    hash_len: usize,
    info: Option<ServerInfo>,
    has_sent_header: bool,
    recv_buffer: Buffer,
    recv_id: u32,
    pack_id: u32,
    user_key: Option<Vec<u8>>,
    uid: [u8; 4],
    last_data_len: usize,
    unit_len: usize,
}

impl AuthAes128 {
    fn new(mac: MacKind, salt: &'static str, hash_len: usize) -> Self {
        Self {
            mac,
            salt,
            hash_len,
            info: None,
            has_sent_header: false,
            recv_buffer: Buffer::with_capacity(RECV_BUFFER_LIMIT),
            recv_id: 1,
            pack_id: 1,
            user_key: None,
            uid: [0; 4],
            last_data_len: 0,
            unit_len: UNIT_LEN,
        }
    }

    /// Factory for the MD5 variant.
    pub fn new_md5() -> Box<dyn Plugin> {
        Box::new(Self::new(MacKind::Md5, "auth_aes128_md5", 16))
    }

    /// Factory for the SHA-1 variant.
    pub fn new_sha1() -> Box<dyn Plugin> {
        Box::new(Self::new(MacKind::Sha1, "auth_aes128_sha1", 20))
    }

    fn info(&self) -> &ServerInfo {
        self.info.as_ref().expect("server info bound at tunnel creation")
    }

    fn hmac(&self, key: &[u8], msg: &[u8]) -> Vec<u8> {
        match self.mac {
            MacKind::Md5 => hmac_md5(key, msg).to_vec(),
            MacKind::Sha1 => hmac_sha1(key, msg).to_vec(),
        }
    }

    fn digest(&self, msg: &[u8]) -> Vec<u8> {
        match self.mac {
            MacKind::Md5 => md5_digest(msg).to_vec(),
            MacKind::Sha1 => sha1_digest(msg).to_vec(),
        }
    }

    /// Resolve the per-user key on first use: a `uid:key` plugin parameter
    /// selects a multi-user identity, otherwise the tunnel rides the master
    /// key under a random uid.
    fn resolve_user_key(&mut self) {
        if self.user_key.is_some() {
            return;
        }

        if let Some(param) = self.info().param.clone() {
            if let Some((uid_str, key_str)) = param.split_once(':') {
                let uid = uid_str.trim().parse::<u32>().unwrap_or(0);
                self.uid = uid.to_le_bytes();
                let digest = self.digest(key_str.as_bytes());
                self.user_key = Some(digest[..self.hash_len].to_vec());
                return;
            }
        }

        let random_uid: [u8; 4] = crate::crypto::SecureRandom::bytes();
        self.uid = random_uid;
        self.user_key = Some(self.info().key.clone());
    }

    /// Padding length for a non-initial frame. Zero when either side of the
    /// stream is running full-size chunks; otherwise drawn from a
    /// power-of-two range that shrinks as payloads grow.
    fn rand_pad_len(&self, rng: &mut Xorshift128Plus, data_len: usize, full_len: usize) -> usize {
        let buffer_size = self.info().buffer_size;
        if data_len > 1300 || self.last_data_len > 1300 || full_len >= buffer_size {
            return 0;
        }
        let r = rng.next_u64();
        if data_len > 1100 {
            (r & 0x7F) as usize
        } else if data_len > 900 {
            (r & 0xFF) as usize
        } else if data_len > 400 {
            (r & 0x1FF) as usize
        } else {
            (r & 0x3FF) as usize
        }
    }

    /// Pack one non-initial frame of `data` onto `out`. `full_len` is the
    /// length of the whole pre-encrypt call this frame belongs to.
    fn pack_data(&mut self, data: &[u8], full_len: usize, out: &mut Vec<u8>) {
        let g_data = self.info().g_data.clone();
        let (rand_len, padding) = {
            let mut global = g_data.lock();
            let rand_len = self.rand_pad_len(&mut global.rng, data.len(), full_len) + 1;
            let mut padding = vec![0u8; rand_len];
            global.rng.fill(&mut padding);
            (rand_len, padding)
        };

        let out_size = rand_len + data.len() + 8;
        let mut frame = vec![0u8; out_size];
        frame[0] = out_size as u8;
        frame[1] = (out_size >> 8) as u8;
        frame[4..4 + rand_len].copy_from_slice(&padding);
        if rand_len < 128 {
            frame[4] = rand_len as u8;
        } else {
            frame[4] = 0xFF;
            frame[5] = rand_len as u8;
            frame[6] = (rand_len >> 8) as u8;
        }
        frame[4 + rand_len..out_size - 4].copy_from_slice(data);

        let mut key = self.user_key.clone().expect("user key resolved before data frames");
        key.extend_from_slice(&self.pack_id.to_le_bytes());

        let head_tag = self.hmac(&key, &frame[..2]);
        frame[2..4].copy_from_slice(&head_tag[..2]);
        let full_tag = self.hmac(&key, &frame[..out_size - 4]);
        frame[out_size - 4..].copy_from_slice(&full_tag[..4]);

        self.pack_id = self.pack_id.wrapping_add(1);
        out.extend_from_slice(&frame);
    }

    /// Pack the initial auth frame carrying `data`, stamped with `now`
    /// (seconds since the epoch).
    fn pack_auth_data(&mut self, data: &[u8], now: u32, out: &mut Vec<u8>) {
        self.resolve_user_key();

        let g_data = self.info().g_data.clone();
        let (client_id, connection_id, rand_len, first_byte, padding) = {
            let mut global = g_data.lock();
            let (client_id, connection_id) = global.next_connection();
            let r = global.rng.next_u64();
            let rand_len = if data.len() > 400 {
                (r & 0x1FF) as usize
            } else {
                (r & 0x3FF) as usize
            };
            let mut first = [0u8; 1];
            global.rng.fill(&mut first);
            let mut padding = vec![0u8; rand_len];
            global.rng.fill(&mut padding);
            (client_id, connection_id, rand_len, first[0], padding)
        };

        let data_offset = rand_len + 31;
        let out_size = data_offset + data.len() + 4;

        // 16-byte identity block, AES-encrypted under the derived user key
        let mut plain = [0u8; 16];
        plain[0..4].copy_from_slice(&now.to_le_bytes());
        plain[4..8].copy_from_slice(&client_id[..4]);
        plain[8..12].copy_from_slice(&connection_id.to_le_bytes());
        plain[12..14].copy_from_slice(&(out_size as u16).to_le_bytes());
        plain[14..16].copy_from_slice(&(rand_len as u16).to_le_bytes());

        let user_key = self.user_key.clone().expect("resolved above");
        let mut material = BASE64.encode(&user_key).into_bytes();
        material.extend_from_slice(self.salt.as_bytes());
        let enc_key: [u8; 16] = bytes_to_key(&material, 16)
            .try_into()
            .expect("bytes_to_key yields the requested length");
        let encrypted = aes128_encrypt_block(&enc_key, &plain);

        let info = self.info();
        let mut iv_key = Vec::with_capacity(info.iv.len() + info.key.len());
        iv_key.extend_from_slice(&info.iv);
        iv_key.extend_from_slice(&info.key);

        let mut block = [0u8; 24];
        block[..4].copy_from_slice(&self.uid);
        block[4..20].copy_from_slice(&encrypted);
        let block_tag = self.hmac(&iv_key, &block[..20]);
        block[20..24].copy_from_slice(&block_tag[..4]);

        let mut frame = vec![0u8; out_size];
        frame[0] = first_byte;
        let head_tag = self.hmac(&iv_key, &frame[..1]);
        frame[1..7].copy_from_slice(&head_tag[..6]);
        frame[7..31].copy_from_slice(&block);
        frame[31..31 + rand_len].copy_from_slice(&padding);
        frame[data_offset..data_offset + data.len()].copy_from_slice(data);

        let full_tag = self.hmac(&user_key, &frame[..out_size - 4]);
        frame[out_size - 4..].copy_from_slice(&full_tag[..4]);
        out.extend_from_slice(&frame);
    }

    fn unix_time() -> u32 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

impl Plugin for AuthAes128 {
    fn set_server_info(&mut self, info: ServerInfo) {
        self.info = Some(info);
    }

    fn overhead(&self) -> usize {
        OVERHEAD
    }

    fn client_pre_encrypt(&mut self, buf: &mut Buffer) -> Result<()> {
        let src = buf.take();
        let full_len = src.len();
        let mut out = Vec::with_capacity(full_len * 2 + self.info().buffer_size * 2);

        let mut rest: &[u8] = &src;
        if !rest.is_empty() && !self.has_sent_header {
            let head = std::cmp::min(MAX_HEAD_SIZE, rest.len());
            self.pack_auth_data(&rest[..head], Self::unix_time(), &mut out);
            rest = &rest[head..];
            self.has_sent_header = true;
        }
        while rest.len() > self.unit_len {
            let unit = self.unit_len;
            self.pack_data(&rest[..unit], full_len, &mut out);
            rest = &rest[unit..];
        }
        if !rest.is_empty() {
            self.pack_data(rest, full_len, &mut out);
        }

        self.last_data_len = full_len;
        buf.store_vec(out);
        Ok(())
    }

    fn client_post_decrypt(&mut self, buf: &mut Buffer) -> Result<()> {
        if self.recv_buffer.len() + buf.len() > RECV_BUFFER_LIMIT {
            return Err(Error::BufferLimit(self.recv_buffer.len() + buf.len()));
        }
        self.recv_buffer.concatenate(buf.as_slice());

        let user_key = self
            .user_key
            .clone()
            .ok_or(Error::ClientPostDecrypt)?;

        let mut out = Vec::with_capacity(self.recv_buffer.len());
        while self.recv_buffer.len() > 4 {
            let frame = self.recv_buffer.as_slice();

            let length = u16::from_le_bytes([frame[0], frame[1]]) as usize;
            if !(MIN_FRAME_LEN..MAX_FRAME_LEN).contains(&length) {
                self.recv_buffer.clear();
                return Err(Error::ClientPostDecrypt);
            }

            let mut key = user_key.clone();
            key.extend_from_slice(&self.recv_id.to_le_bytes());
            let head_tag = self.hmac(&key, &frame[..2]);
            if head_tag[..2] != frame[2..4] {
                self.recv_buffer.clear();
                return Err(Error::ClientPostDecrypt);
            }

            if length > self.recv_buffer.len() {
                break;
            }
            let frame = self.recv_buffer.as_slice();

            let full_tag = self.hmac(&key, &frame[..length - 4]);
            if full_tag[..4] != frame[length - 4..length] {
                self.recv_buffer.clear();
                return Err(Error::ClientPostDecrypt);
            }

            let pos = if frame[4] < 255 {
                frame[4] as usize + 4
            } else {
                u16::from_le_bytes([frame[5], frame[6]]) as usize + 4
            };
            if pos > length - 4 {
                self.recv_buffer.clear();
                return Err(Error::ClientPostDecrypt);
            }

            out.extend_from_slice(&frame[pos..length - 4]);
            self.recv_buffer.consume(length);
            self.recv_id = self.recv_id.wrapping_add(1);
        }

        buf.store_vec(out);
        Ok(())
    }

    fn client_udp_pre_encrypt(&mut self, buf: &mut Buffer) -> Result<()> {
        self.resolve_user_key();
        let user_key = self.user_key.clone().expect("resolved above");

        buf.concatenate(&self.uid);
        let tag = self.hmac(&user_key, buf.as_slice());
        buf.concatenate(&tag[..4]);
        Ok(())
    }

    fn client_udp_post_decrypt(&mut self, buf: &mut Buffer) -> Result<()> {
        let n = buf.len();
        if n <= 4 {
            buf.clear();
            return Ok(());
        }
        let tag = self.hmac(&self.info().key, &buf.as_slice()[..n - 4]);
        if tag[..4] != buf.as_slice()[n - 4..] {
            // bad datagrams are dropped, not fatal
            buf.clear();
            return Ok(());
        }
        buf.truncate(n - 4);
        Ok(())
    }
}
