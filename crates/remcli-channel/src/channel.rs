use crate::cipher::{CipherReader, CipherWriter, SessionKey, Transformation};
use crate::error::ChannelError;
use crate::filter::ClassFilter;
use crate::value::Value;
use crate::MAX_ARRAY_SIZE;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Structured reads and writes over one read half and one write half
///
/// Every write method flushes before returning. Each read or write takes
/// `&mut self`, so a length and the bytes it announces are always read or
/// written together.
#[derive(Debug)]
pub struct SecureChannel<R, W> {
    reader: R,
    writer: W,
    filter: ClassFilter,
}

impl<R, W> SecureChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            filter: ClassFilter::standard(),
        }
    }

    /// Replace the filter used by [`read_object`](Self::read_object)
    pub fn with_filter(mut self, filter: ClassFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &ClassFilter {
        &self.filter
    }

    pub async fn write_byte_array(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if data.len() > MAX_ARRAY_SIZE {
            return Err(ChannelError::TooLarge(data.len()));
        }
        self.writer.write_i32(data.len() as i32).await?;
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_byte_array(&mut self) -> Result<Vec<u8>, ChannelError> {
        let len = self.reader.read_i32().await?;
        if len == 0 {
            return Ok(Vec::new());
        }
        if len < 0 {
            return Err(ChannelError::NegativeLength(len));
        }
        let len = len as usize;
        if len > MAX_ARRAY_SIZE {
            return Err(ChannelError::TooLarge(len));
        }
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).await?;
        Ok(data)
    }

    /// u16 length + UTF-8 bytes
    pub async fn write_utf(&mut self, text: &str) -> Result<(), ChannelError> {
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(ChannelError::StringTooLong(bytes.len()));
        }
        self.writer.write_u16(bytes.len() as u16).await?;
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_utf(&mut self) -> Result<String, ChannelError> {
        let len = self.reader.read_u16().await? as usize;
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).await?;
        String::from_utf8(data).map_err(|_| ChannelError::InvalidUtf8)
    }

    pub async fn write_bool(&mut self, value: bool) -> Result<(), ChannelError> {
        self.writer.write_u8(value as u8).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_bool(&mut self) -> Result<bool, ChannelError> {
        Ok(self.reader.read_u8().await? != 0)
    }

    /// Write a value as a byte array holding its tagged encoding
    pub async fn write_object(&mut self, value: &Value) -> Result<(), ChannelError> {
        self.write_byte_array(&value.encode()).await
    }

    /// Read a value; record classes are checked before their fields are decoded
    pub async fn read_object(&mut self) -> Result<Value, ChannelError> {
        let encoded = self.read_byte_array().await?;
        Value::decode(Bytes::from(encoded), &self.filter)
    }

    /// Switch both directions to `transformation` keyed by `key`
    ///
    /// The plaintext channel is consumed; nothing written after this call
    /// leaves the process unencrypted.
    pub async fn encrypt(
        mut self,
        key: &SessionKey,
        transformation: Transformation,
    ) -> Result<SecureChannel<CipherReader<R>, CipherWriter<W>>, ChannelError> {
        self.writer.flush().await?;
        debug!("upgrading channel to {}", transformation);
        Ok(SecureChannel {
            reader: CipherReader::new(self.reader, key, transformation)?,
            writer: CipherWriter::new(self.writer, key, transformation)?,
            filter: self.filter,
        })
    }

    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Give back the halves, e.g. to run the frame protocol over them
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}
