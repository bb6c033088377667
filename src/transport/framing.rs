//! Length-prefixed record framing over a byte stream.
//!
//! Every record is a 4-byte big-endian length followed by its payload. Writes
//! accumulate in a local buffer and reach the stream only on [`DataConn::flush`],
//! so one protocol step goes out as a single write sequence.

use crate::utils::{MessengerError, Result, TransportError};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest record accepted in either direction (16MB)
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Size of an integer record payload
const INT_SIZE: usize = 8;

/// Buffered record reader/writer over one connection
#[derive(Debug)]
pub struct DataConn<S> {
    stream: BufReader<S>,
    write_buf: Vec<u8>,
}

impl<S> DataConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            write_buf: Vec::new(),
        }
    }

    /// Bytes waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.write_buf.len()
    }

    /// Queue a raw byte record
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_RECORD_SIZE {
            return Err(TransportError::RecordTooLarge {
                size: data.len(),
                max: MAX_RECORD_SIZE,
            }
            .into());
        }

        // Bounded by MAX_RECORD_SIZE, fits in u32
        let len = data.len() as u32;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(data);
        Ok(())
    }

    /// Queue a UTF-8 string record
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Queue an integer record
    pub fn write_int(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Queue a bincode-encoded record
    pub fn write_struct<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let encoded = bincode::serialize(value)?;
        self.write_bytes(&encoded)
    }

    /// Push every buffered record onto the stream.
    ///
    /// The buffer is emptied whether or not the write succeeds.
    pub async fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.write_buf);
        let inner = self.stream.get_mut();
        inner.write_all(&pending).await?;
        inner.flush().await?;
        Ok(())
    }

    /// Read one raw byte record
    pub async fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_RECORD_SIZE {
            return Err(TransportError::RecordTooLarge {
                size: len,
                max: MAX_RECORD_SIZE,
            }
            .into());
        }

        let mut data = vec![0u8; len];
        self.stream.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Read one UTF-8 string record
    pub async fn read_string(&mut self) -> Result<String> {
        let data = self.read_bytes().await?;
        String::from_utf8(data).map_err(|e| MessengerError::decode(e.to_string()))
    }

    /// Read one integer record
    pub async fn read_int(&mut self) -> Result<u64> {
        let data = self.read_bytes().await?;
        let bytes: [u8; INT_SIZE] = data.as_slice().try_into().map_err(|_| {
            MessengerError::decode(format!(
                "integer record has {} bytes, expected {}",
                data.len(),
                INT_SIZE
            ))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Read one bincode-encoded record
    pub async fn read_struct<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = self.read_bytes().await?;
        Ok(bincode::deserialize(&data)?)
    }

    /// Shut the write side down and release the connection
    pub async fn close(mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}
