//! Symmetric stream encryption for an upgraded channel

use crate::error::ChannelError;
use aes::cipher::consts::U1;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

const IV_SIZE: usize = 16;

/// Supported cipher/mode/padding combinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transformation {
    /// `AES/CFB8/NoPadding`
    AesCfb8NoPadding,
    /// `AES/CTR/NoPadding`
    AesCtrNoPadding,
}

impl Transformation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::AesCfb8NoPadding => "AES/CFB8/NoPadding",
            Transformation::AesCtrNoPadding => "AES/CTR/NoPadding",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transformation {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Transformation::AesCfb8NoPadding, Transformation::AesCtrNoPadding]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChannelError::UnsupportedTransformation(s.to_string()))
    }
}

/// Pre-agreed AES key (16, 24 or 32 bytes)
///
/// The first 16 bytes double as the IV for both directions.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    bytes: Vec<u8>,
}

impl SessionKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ChannelError> {
        let bytes = bytes.into();
        match bytes.len() {
            16 | 24 | 32 => Ok(Self { bytes }),
            n => Err(ChannelError::InvalidKeyLength(n)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn iv(&self) -> &[u8] {
        &self.bytes[..IV_SIZE]
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({} bytes)", self.bytes.len())
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

enum Engine {
    Cfb8Enc128(cfb8::Encryptor<Aes128>),
    Cfb8Enc192(cfb8::Encryptor<Aes192>),
    Cfb8Enc256(cfb8::Encryptor<Aes256>),
    Cfb8Dec128(cfb8::Decryptor<Aes128>),
    Cfb8Dec192(cfb8::Decryptor<Aes192>),
    Cfb8Dec256(cfb8::Decryptor<Aes256>),
    Ctr128(Aes128Ctr),
    Ctr192(Aes192Ctr),
    Ctr256(Aes256Ctr),
}

fn cfb8_encrypt<E>(engine: &mut E, buf: &mut [u8])
where
    E: BlockEncryptMut + BlockSizeUser<BlockSize = U1>,
{
    for byte in buf {
        engine.encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
    }
}

fn cfb8_decrypt<D>(engine: &mut D, buf: &mut [u8])
where
    D: BlockDecryptMut + BlockSizeUser<BlockSize = U1>,
{
    for byte in buf {
        engine.decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
    }
}

impl Engine {
    fn new(
        key: &SessionKey,
        transformation: Transformation,
        direction: Direction,
    ) -> Result<Self, ChannelError> {
        let k = key.as_bytes();
        let iv = key.iv();
        let invalid = |_| ChannelError::InvalidKeyLength(k.len());

        let engine = match (transformation, direction, k.len()) {
            (Transformation::AesCfb8NoPadding, Direction::Encrypt, 16) => {
                Engine::Cfb8Enc128(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCfb8NoPadding, Direction::Encrypt, 24) => {
                Engine::Cfb8Enc192(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCfb8NoPadding, Direction::Encrypt, _) => {
                Engine::Cfb8Enc256(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCfb8NoPadding, Direction::Decrypt, 16) => {
                Engine::Cfb8Dec128(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCfb8NoPadding, Direction::Decrypt, 24) => {
                Engine::Cfb8Dec192(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCfb8NoPadding, Direction::Decrypt, _) => {
                Engine::Cfb8Dec256(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            // CTR is its own inverse
            (Transformation::AesCtrNoPadding, _, 16) => {
                Engine::Ctr128(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCtrNoPadding, _, 24) => {
                Engine::Ctr192(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
            (Transformation::AesCtrNoPadding, _, _) => {
                Engine::Ctr256(KeyIvInit::new_from_slices(k, iv).map_err(invalid)?)
            }
        };
        Ok(engine)
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Engine::Cfb8Enc128(e) => cfb8_encrypt(e, buf),
            Engine::Cfb8Enc192(e) => cfb8_encrypt(e, buf),
            Engine::Cfb8Enc256(e) => cfb8_encrypt(e, buf),
            Engine::Cfb8Dec128(d) => cfb8_decrypt(d, buf),
            Engine::Cfb8Dec192(d) => cfb8_decrypt(d, buf),
            Engine::Cfb8Dec256(d) => cfb8_decrypt(d, buf),
            Engine::Ctr128(c) => c.apply_keystream(buf),
            Engine::Ctr192(c) => c.apply_keystream(buf),
            Engine::Ctr256(c) => c.apply_keystream(buf),
        }
    }
}

/// Read half that deciphers everything it reads
pub struct CipherReader<R> {
    inner: R,
    engine: Engine,
    transformation: Transformation,
}

impl<R> CipherReader<R> {
    pub(crate) fn new(
        inner: R,
        key: &SessionKey,
        transformation: Transformation,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            inner,
            engine: Engine::new(key, transformation, Direction::Decrypt)?,
            transformation,
        })
    }

    pub fn transformation(&self) -> Transformation {
        self.transformation
    }
}

impl<R> fmt::Debug for CipherReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherReader")
            .field("transformation", &self.transformation)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.engine.apply(&mut buf.filled_mut()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// Write half that enciphers everything written to it
///
/// Bytes are enciphered as soon as they are accepted, so ciphertext the
/// inner writer has not taken yet is held back and written before anything
/// else.
pub struct CipherWriter<W> {
    inner: W,
    engine: Engine,
    transformation: Transformation,
    pending: Vec<u8>,
    written: usize,
}

impl<W> CipherWriter<W> {
    pub(crate) fn new(
        inner: W,
        key: &SessionKey,
        transformation: Transformation,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            inner,
            engine: Engine::new(key, transformation, Direction::Encrypt)?,
            transformation,
            pending: Vec::new(),
            written: 0,
        })
    }

    pub fn transformation(&self) -> Transformation {
        self.transformation
    }
}

impl<W: AsyncWrite + Unpin> CipherWriter<W> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.written < self.pending.len() {
            let pending = &self.pending[self.written..];
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.written += n;
        }
        self.pending.clear();
        self.written = 0;
        Poll::Ready(Ok(()))
    }
}

impl<W> fmt::Debug for CipherWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherWriter")
            .field("transformation", &self.transformation)
            .field("pending", &(self.pending.len() - self.written))
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CipherWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.pending.extend_from_slice(data);
        this.engine.apply(&mut this.pending);

        // The bytes are committed to the cipher stream now; a pending inner
        // write is finished by the next write, flush or shutdown.
        if let Poll::Ready(Err(err)) = this.poll_drain(cx) {
            return Poll::Ready(Err(err));
        }
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
