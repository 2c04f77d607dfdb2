//! Key derivation and keyed-digest helpers.
//!
//! Shadowsocks derives its master key from the password with OpenSSL's
//! [`EVP_BytesToKey`](https://wiki.openssl.org/index.php/Manual:EVP_BytesToKey(3))
//! over MD5, and the protocol layer authenticates frames with truncated
//! HMAC-MD5 / HMAC-SHA1 tags. Both are assembled here from the RustCrypto
//! primitives.

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

/// Derive `key_len` key bytes from a password, per `EVP_BytesToKey` with MD5
/// and no salt.
pub fn bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut last_digest: Option<[u8; 16]> = None;

    while key.len() < key_len {
        let mut m = Md5::new();
        if let Some(digest) = last_digest {
            m.update(digest);
        }
        m.update(password);
        let digest: [u8; 16] = m.finalize().into();

        let amt = std::cmp::min(key_len - key.len(), digest.len());
        key.extend_from_slice(&digest[..amt]);
        last_digest = Some(digest);
    }

    key
}

/// MD5 digest of `data`.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// SHA-1 digest of `data`.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// HMAC-MD5 of `msg` under `key`.
pub fn hmac_md5(key: &[u8], msg: &[u8]) -> [u8; 16] {
    let mut mac = Hmac::<Md5>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA1 of `msg` under `key`.
pub fn hmac_sha1(key: &[u8], msg: &[u8]) -> [u8; 20] {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Encrypt one 16-byte block with AES-128-CBC under a zero IV.
///
/// With a single block and a zero IV, CBC reduces to one raw block
/// operation; the protocol's auth header encrypts exactly one block.
pub fn aes128_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    use aes::cipher::{BlockEncrypt, KeyInit};

    let cipher = aes::Aes128::new(key.into());
    let mut out = aes::Block::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}
