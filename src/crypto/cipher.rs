//! Stream cipher environment.
//!
//! A [`CipherEnv`] is created once per process from the configured password
//! and method name; every tunnel then gets its own pair of
//! [`StreamContext`]s. The encrypt context generates its IV eagerly (the
//! protocol layer keys off it before the first byte goes out) and prepends
//! it to the first outbound chunk; the decrypt context absorbs the peer's IV
//! from the front of the inbound stream, tolerating arbitrary chunk
//! boundaries.
//!
//! The trivial `table` and `none` methods carry no per-tunnel state, which
//! is why contexts exist only for methods stronger than `table`.

use cipher::consts::U16;
use cipher::{BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::buffer::Buffer;
use crate::crypto::kdf::{bytes_to_key, md5_digest};
use crate::crypto::random::SecureRandom;
use crate::error::{Error, Result};

/// Supported cipher methods, by Shadowsocks wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    None,
    Table,
    Rc4,
    Rc4Md5,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Chacha20,
    Chacha20Ietf,
}

impl Method {
    /// Resolve a method from its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Method::None),
            "table" => Some(Method::Table),
            "rc4" => Some(Method::Rc4),
            "rc4-md5" => Some(Method::Rc4Md5),
            "aes-128-cfb" => Some(Method::Aes128Cfb),
            "aes-192-cfb" => Some(Method::Aes192Cfb),
            "aes-256-cfb" => Some(Method::Aes256Cfb),
            "aes-128-ctr" => Some(Method::Aes128Ctr),
            "aes-192-ctr" => Some(Method::Aes192Ctr),
            "aes-256-ctr" => Some(Method::Aes256Ctr),
            "chacha20" => Some(Method::Chacha20),
            "chacha20-ietf" => Some(Method::Chacha20Ietf),
            _ => None,
        }
    }

    /// Configuration name of the method.
    pub fn name(self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Table => "table",
            Method::Rc4 => "rc4",
            Method::Rc4Md5 => "rc4-md5",
            Method::Aes128Cfb => "aes-128-cfb",
            Method::Aes192Cfb => "aes-192-cfb",
            Method::Aes256Cfb => "aes-256-cfb",
            Method::Aes128Ctr => "aes-128-ctr",
            Method::Aes192Ctr => "aes-192-ctr",
            Method::Aes256Ctr => "aes-256-ctr",
            Method::Chacha20 => "chacha20",
            Method::Chacha20Ietf => "chacha20-ietf",
        }
    }

    /// Master key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Method::None | Method::Table => 16,
            Method::Rc4 | Method::Rc4Md5 | Method::Aes128Cfb | Method::Aes128Ctr => 16,
            Method::Aes192Cfb | Method::Aes192Ctr => 24,
            Method::Aes256Cfb | Method::Aes256Ctr | Method::Chacha20 | Method::Chacha20Ietf => 32,
        }
    }

    /// Per-tunnel IV length in bytes.
    pub fn iv_len(self) -> usize {
        match self {
            Method::None | Method::Table | Method::Rc4 => 0,
            Method::Chacha20 => 8,
            Method::Chacha20Ietf => 12,
            _ => 16,
        }
    }

    /// Whether the method is stronger than the trivial table cipher and so
    /// carries per-tunnel stream state.
    pub fn is_stream(self) -> bool {
        !matches!(self, Method::None | Method::Table)
    }
}

/// Master key material, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterKey(Vec<u8>);

/// Process-wide cipher environment: resolved method, derived master key and
/// (for the table method) the substitution tables.
pub struct CipherEnv {
    method: Method,
    key: MasterKey,
    enc_table: Option<Box<[u8; 256]>>,
    dec_table: Option<Box<[u8; 256]>>,
}

impl CipherEnv {
    /// Build the environment from a password and a method name.
    pub fn new(password: &str, method_name: &str) -> Result<Self> {
        let method = Method::from_name(method_name)
            .ok_or_else(|| Error::UnknownMethod(method_name.to_string()))?;

        let key = bytes_to_key(password.as_bytes(), method.key_len());

        let (enc_table, dec_table) = if method == Method::Table {
            let (enc, dec) = build_tables(password.as_bytes());
            (Some(enc), Some(dec))
        } else {
            (None, None)
        };

        Ok(Self {
            method,
            key: MasterKey(key),
            enc_table,
            dec_table,
        })
    }

    /// The resolved method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The derived master key.
    pub fn key(&self) -> &[u8] {
        &self.key.0
    }

    /// IV length of the resolved method.
    pub fn iv_len(&self) -> usize {
        self.method.iv_len()
    }

    /// Create the egress stream context. The IV is generated here so that
    /// callers can read it before the first chunk is encrypted.
    pub fn encrypt_context(&self) -> StreamContext {
        let mut iv = vec![0u8; self.method.iv_len()];
        SecureRandom::fill(&mut iv);
        let cryptor = if self.method.is_stream() {
            Some(make_cryptor(self.method, &self.key.0, &iv, Direction::Encrypt))
        } else {
            None
        };
        StreamContext {
            direction: Direction::Encrypt,
            iv,
            iv_done: false,
            cryptor,
        }
    }

    /// Create the ingress stream context. The peer IV is consumed from the
    /// front of the first inbound bytes.
    pub fn decrypt_context(&self) -> StreamContext {
        let cryptor = if self.method.is_stream() && self.method.iv_len() == 0 {
            Some(make_cryptor(self.method, &self.key.0, &[], Direction::Decrypt))
        } else {
            None
        };
        StreamContext {
            direction: Direction::Decrypt,
            iv: Vec::with_capacity(self.method.iv_len()),
            iv_done: self.method.iv_len() == 0,
            cryptor,
        }
    }

    /// Encrypt `buf` in place; on the first call of a stream context the IV
    /// is prepended to the output.
    pub fn encrypt(&self, ctx: Option<&mut StreamContext>, buf: &mut Buffer) -> Result<()> {
        match self.method {
            Method::None => Ok(()),
            Method::Table => {
                let table = self.enc_table.as_ref().ok_or(Error::InvalidPassword)?;
                apply_table(table, buf);
                Ok(())
            }
            _ => {
                let ctx = ctx.ok_or(Error::InvalidPassword)?;
                debug_assert!(matches!(ctx.direction, Direction::Encrypt));
                let mut data = buf.take();
                let cryptor = ctx.cryptor.as_mut().ok_or(Error::InvalidPassword)?;
                cryptor.process(&mut data);
                if !ctx.iv_done {
                    ctx.iv_done = true;
                    let mut out = Vec::with_capacity(ctx.iv.len() + data.len());
                    out.extend_from_slice(&ctx.iv);
                    out.extend_from_slice(&data);
                    data = out;
                }
                buf.store_vec(data);
                Ok(())
            }
        }
    }

    /// Decrypt `buf` in place; leading bytes of the stream are absorbed as
    /// the peer IV until it is complete.
    pub fn decrypt(&self, ctx: Option<&mut StreamContext>, buf: &mut Buffer) -> Result<()> {
        match self.method {
            Method::None => Ok(()),
            Method::Table => {
                let table = self.dec_table.as_ref().ok_or(Error::InvalidPassword)?;
                apply_table(table, buf);
                Ok(())
            }
            _ => {
                let ctx = ctx.ok_or(Error::InvalidPassword)?;
                debug_assert!(matches!(ctx.direction, Direction::Decrypt));
                let mut data = buf.take();
                let mut offset = 0;

                if !ctx.iv_done {
                    let want = self.method.iv_len() - ctx.iv.len();
                    let take = std::cmp::min(want, data.len());
                    ctx.iv.extend_from_slice(&data[..take]);
                    offset = take;
                    if ctx.iv.len() == self.method.iv_len() {
                        ctx.iv_done = true;
                        ctx.cryptor = Some(make_cryptor(
                            self.method,
                            &self.key.0,
                            &ctx.iv,
                            Direction::Decrypt,
                        ));
                    }
                }

                if offset < data.len() {
                    let cryptor = ctx.cryptor.as_mut().ok_or(Error::InvalidPassword)?;
                    cryptor.process(&mut data[offset..]);
                }
                buf.store_vec(data.split_off(offset));
                Ok(())
            }
        }
    }
}

/// Per-tunnel stream cipher state for one direction.
pub struct StreamContext {
    direction: Direction,
    iv: Vec<u8>,
    iv_done: bool,
    cryptor: Option<Box<dyn Cryptor + Send>>,
}

impl StreamContext {
    /// The IV bound to this context. Empty for IV-less methods; for a
    /// decrypt context, filled once the peer IV has arrived.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

trait Cryptor {
    fn process(&mut self, data: &mut [u8]);
}

struct Keystream<C: StreamCipher>(C);

impl<C: StreamCipher> Cryptor for Keystream<C> {
    fn process(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

struct CfbEnc<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufEncryptor<C>);

impl<C: BlockEncryptMut + BlockCipher> Cryptor for CfbEnc<C> {
    fn process(&mut self, data: &mut [u8]) {
        self.0.encrypt(data);
    }
}

struct CfbDec<C: BlockEncryptMut + BlockCipher>(cfb_mode::BufDecryptor<C>);

impl<C: BlockEncryptMut + BlockCipher> Cryptor for CfbDec<C> {
    fn process(&mut self, data: &mut [u8]) {
        self.0.decrypt(data);
    }
}

fn make_cryptor(method: Method, key: &[u8], iv: &[u8], dir: Direction) -> Box<dyn Cryptor + Send> {
    match method {
        Method::Rc4 => Box::new(Keystream(
            rc4::Rc4::<U16>::new_from_slice(key).expect("rc4 key length"),
        )),
        Method::Rc4Md5 => {
            // rc4-md5 keys each tunnel with MD5(master_key || iv)
            let mut seed = Vec::with_capacity(key.len() + iv.len());
            seed.extend_from_slice(key);
            seed.extend_from_slice(iv);
            let session_key = md5_digest(&seed);
            Box::new(Keystream(
                rc4::Rc4::<U16>::new_from_slice(&session_key).expect("rc4-md5 key length"),
            ))
        }
        Method::Aes128Cfb => cfb::<::aes::Aes128>(key, iv, dir),
        Method::Aes192Cfb => cfb::<::aes::Aes192>(key, iv, dir),
        Method::Aes256Cfb => cfb::<::aes::Aes256>(key, iv, dir),
        Method::Aes128Ctr => Box::new(Keystream(
            ctr::Ctr128BE::<::aes::Aes128>::new_from_slices(key, iv).expect("aes-ctr key/iv"),
        )),
        Method::Aes192Ctr => Box::new(Keystream(
            ctr::Ctr128BE::<::aes::Aes192>::new_from_slices(key, iv).expect("aes-ctr key/iv"),
        )),
        Method::Aes256Ctr => Box::new(Keystream(
            ctr::Ctr128BE::<::aes::Aes256>::new_from_slices(key, iv).expect("aes-ctr key/iv"),
        )),
        Method::Chacha20 => Box::new(Keystream(
            chacha20::ChaCha20Legacy::new_from_slices(key, iv).expect("chacha20 key/iv"),
        )),
        Method::Chacha20Ietf => Box::new(Keystream(
            chacha20::ChaCha20::new_from_slices(key, iv).expect("chacha20-ietf key/iv"),
        )),
        Method::None | Method::Table => unreachable!("table ciphers carry no stream context"),
    }
}

fn cfb<C>(key: &[u8], iv: &[u8], dir: Direction) -> Box<dyn Cryptor + Send>
where
    C: BlockEncryptMut + BlockCipher + KeyInit + Send + 'static,
{
    match dir {
        Direction::Encrypt => Box::new(CfbEnc(
            cfb_mode::BufEncryptor::<C>::new_from_slices(key, iv).expect("aes-cfb key/iv"),
        )),
        Direction::Decrypt => Box::new(CfbDec(
            cfb_mode::BufDecryptor::<C>::new_from_slices(key, iv).expect("aes-cfb key/iv"),
        )),
    }
}

fn apply_table(table: &[u8; 256], buf: &mut Buffer) {
    let mut data = buf.take();
    for b in data.iter_mut() {
        *b = table[*b as usize];
    }
    buf.store_vec(data);
}

/// Derive the classic table-cipher substitution tables from the password.
fn build_tables(password: &[u8]) -> (Box<[u8; 256]>, Box<[u8; 256]>) {
    let digest = md5_digest(password);
    let a = u64::from_le_bytes(digest[..8].try_into().expect("md5 is 16 bytes"));

    let mut table: Vec<u64> = (0..256).collect();
    for i in 1..1024u64 {
        table.sort_by_key(|&x| a % (x + i));
    }

    let mut enc = Box::new([0u8; 256]);
    let mut dec = Box::new([0u8; 256]);
    for (i, &v) in table.iter().enumerate() {
        enc[i] = v as u8;
        dec[v as usize] = i as u8;
    }
    (enc, dec)
}
