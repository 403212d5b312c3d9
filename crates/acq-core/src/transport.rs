//! Transport abstraction: the byte-reader boundary of the acquisition loop.
//!
//! A [`ByteSource`] hands the session whatever bytes are available *right
//! now* and never blocks the poll loop: `Ok(0)` means "no data this tick",
//! and any `Err` is a fatal transport failure. Real serial ports are wrapped
//! by [`IoByteSource`] (any `AsyncRead`, bounded by a short poll timeout);
//! tests and hardware-free development use [`MockByteSource`] with scripted
//! chunks.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Non-blocking byte input for the acquisition loop.
#[async_trait]
pub trait ByteSource: Send {
    /// Read whatever is immediately available into `buf`.
    ///
    /// Returns `Ok(0)` when no data arrived within the source's polling
    /// window. Errors are fatal to the session.
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Adapter turning any async reader into a [`ByteSource`].
///
/// Each `read_available` waits at most `poll_timeout` for data; an elapsed
/// timeout is reported as `Ok(0)`, not an error. A clean EOF from the
/// underlying reader means the device went away and is surfaced as
/// `UnexpectedEof`.
#[derive(Debug)]
pub struct IoByteSource<R> {
    inner: R,
    poll_timeout: Duration,
}

impl<R> IoByteSource<R> {
    pub fn new(inner: R, poll_timeout: Duration) -> Self {
        Self {
            inner,
            poll_timeout,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for IoByteSource<R> {
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match tokio::time::timeout(self.poll_timeout, self.inner.read(buf)).await {
            Err(_) => Ok(0), // nothing within the polling window
            Ok(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "transport closed",
            )),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Ok(Err(e)) => Err(e),
        }
    }
}

/// Serial port byte source.
#[cfg(feature = "serial")]
pub type SerialSource = IoByteSource<tokio_serial::SerialStream>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Port opening can stall on some platforms, so it is pushed off the async
/// runtime. Line settings come from [`crate::config::SerialParams`].
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    params: &crate::config::SerialParams,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();
    let params = *params;

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, params.baud)
            .data_bits(params.tokio_data_bits())
            .parity(params.tokio_parity())
            .stop_bits(params.tokio_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Scripted byte source for tests and hardware-free development.
///
/// Each queued chunk is delivered by one `read_available` call (split across
/// calls if the caller's buffer is smaller); an optional queued error fires
/// in sequence with the chunks.
#[derive(Debug, Default)]
pub struct MockByteSource {
    steps: VecDeque<Step>,
}

#[derive(Debug)]
enum Step {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

impl MockByteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk of bytes to deliver.
    pub fn push_chunk(&mut self, chunk: impl Into<Vec<u8>>) {
        self.steps.push_back(Step::Data(chunk.into()));
    }

    /// Queue an I/O error to deliver after the preceding chunks.
    pub fn push_error(&mut self, kind: io::ErrorKind) {
        self.steps.push_back(Step::Error(kind));
    }

    /// Whether all queued steps have been consumed.
    pub fn is_drained(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl ByteSource for MockByteSource {
    async fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Error(kind)) => Err(io::Error::new(kind, "scripted transport error")),
            Some(Step::Data(mut chunk)) => {
                if chunk.len() > buf.len() {
                    // Deliver what fits, requeue the rest for the next tick.
                    let rest = chunk.split_off(buf.len());
                    self.steps.push_front(Step::Data(rest));
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }
    }
}
