//! PCM endpoint: a named pipe carrying s16le samples
//!
//! The engine only opens and closes the pipe from inside a transport
//! worker; the control plane configures the path when a client attaches
//! and triggers release on disconnect.

use std::path::{Path, PathBuf};
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::unix::pipe;

use crate::error::{EngineError, Result};

/// Number of write-open attempts before giving up on a pipe with no
/// reader attached yet
const OPEN_WRITE_RETRIES: u32 = 5;
/// Delay between write-open attempts
const OPEN_WRITE_DELAY: Duration = Duration::from_millis(10);

/// An open PCM byte stream.
///
/// Production endpoints are FIFO halves; the in-memory variant backs
/// loopback and test setups.
pub enum PcmStream {
    /// Reading end of a FIFO
    Reader(pipe::Receiver),
    /// Writing end of a FIFO
    Writer(pipe::Sender),
    /// In-memory duplex stream
    Mem(DuplexStream),
}

impl PcmStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Reader(r) => r.read(buf).await,
            Self::Mem(s) => s.read(buf).await,
            Self::Writer(_) => Ok(0),
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::Reader(r) => r.read_exact(buf).await.map(|_| ()),
            Self::Mem(s) => s.read_exact(buf).await.map(|_| ()),
            Self::Writer(_) => Err(std::io::ErrorKind::UnexpectedEof.into()),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Writer(w) => w.write_all(buf).await,
            Self::Mem(s) => s.write_all(buf).await,
            Self::Reader(_) => Err(std::io::ErrorKind::BrokenPipe.into()),
        }
    }
}

struct PcmInner {
    path: Option<PathBuf>,
    stream: Option<PcmStream>,
}

/// A unidirectional PCM pipe endpoint.
pub struct Pcm {
    inner: tokio::sync::Mutex<PcmInner>,
    release: SyncMutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Pcm {
    /// Create an endpoint with no pipe configured yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(PcmInner {
                path: None,
                stream: None,
            }),
            release: SyncMutex::new(None),
        }
    }

    /// Create an endpoint bound to a pipe path.
    #[must_use]
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let pcm = Self::new();
        if let Ok(mut inner) = pcm.inner.try_lock() {
            inner.path = Some(path.as_ref().to_path_buf());
        }
        pcm
    }

    /// Configure the pipe path (control plane, on client attach).
    pub async fn set_path(&self, path: Option<PathBuf>) {
        self.inner.lock().await.path = path;
    }

    /// Install a callback fired exactly once when the endpoint is
    /// released.
    pub fn on_release(&self, callback: Box<dyn FnOnce() + Send>) {
        *self.release.lock().unwrap() = Some(callback);
    }

    /// Attach an already open stream, bypassing the pipe open path.
    pub async fn install(&self, stream: PcmStream) {
        self.inner.lock().await.stream = Some(stream);
    }

    /// Whether a stream is currently attached.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.stream.is_some()
    }

    /// Close the endpoint and fire the release callback.
    ///
    /// Safe to call more than once; later calls are no-ops. A control
    /// plane sharing the endpoint with a worker that may be blocked on
    /// it should signal the transport event before calling this.
    pub async fn release(&self) {
        self.inner.lock().await.stream = None;
        self.fire_release();
    }

    fn fire_release(&self) {
        if let Some(callback) = self.release.lock().unwrap().take() {
            callback();
        }
    }

    /// Open the pipe for reading.
    ///
    /// Parks on the blocking pool until the writing side of the FIFO is
    /// opened, matching blocking-FIFO semantics. A no-op if the endpoint
    /// is already open.
    ///
    /// # Errors
    ///
    /// [`EngineError::PcmNotRequested`] if no path is configured,
    /// [`EngineError::PcmOpen`] if the FIFO cannot be opened.
    pub async fn open_read(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.stream.is_some() {
            return Ok(());
        }
        let path = inner.path.clone().ok_or(EngineError::PcmNotRequested)?;

        tracing::debug!("Opening PCM pipe for reading: {}", path.display());
        let file = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().read(true).open(path)
        })
        .await
        .map_err(|e| EngineError::PcmOpen {
            source: std::io::Error::other(e),
        })?
        .map_err(|source| EngineError::PcmOpen { source })?;

        let receiver =
            pipe::Receiver::from_file(file).map_err(|source| EngineError::PcmOpen { source })?;
        inner.stream = Some(PcmStream::Reader(receiver));
        Ok(())
    }

    /// Open the pipe for writing.
    ///
    /// The FIFO-sender open fails while no reader is attached, so it is
    /// retried a few times before giving up. A no-op if the endpoint is
    /// already open.
    ///
    /// # Errors
    ///
    /// [`EngineError::PcmNotRequested`] if no path is configured,
    /// [`EngineError::PcmOpen`] once the retries are exhausted.
    pub async fn open_write(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.stream.is_some() {
            return Ok(());
        }
        let path = inner.path.clone().ok_or(EngineError::PcmNotRequested)?;

        tracing::debug!("Opening PCM pipe for writing: {}", path.display());
        let mut attempt = 0;
        let sender = loop {
            match pipe::OpenOptions::new().open_sender(&path) {
                Ok(sender) => break sender,
                Err(source) => {
                    // the reading endpoint is not connected yet
                    attempt += 1;
                    if attempt >= OPEN_WRITE_RETRIES {
                        return Err(EngineError::PcmOpen { source });
                    }
                    tracing::debug!("PCM write open failed: {source}");
                    tokio::time::sleep(OPEN_WRITE_DELAY).await;
                }
            }
        };

        inner.stream = Some(PcmStream::Writer(sender));
        Ok(())
    }

    /// Read exactly `buf.len()` bytes of PCM signal.
    ///
    /// Returns the number of samples read, or `0` on end of stream after
    /// releasing the endpoint. Callers may rely on the read being
    /// all-or-nothing.
    ///
    /// # Errors
    ///
    /// Any I/O error other than end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.stream.as_mut() else {
            return Ok(0);
        };

        match stream.read_exact(buf).await {
            Ok(()) => Ok(buf.len() / 2),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("PCM endpoint has been closed");
                inner.stream = None;
                drop(inner);
                self.fire_release();
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read whatever PCM signal is available, up to `buf.len()` bytes.
    ///
    /// Returns the number of bytes read; `0` means end of stream and
    /// releases the endpoint.
    ///
    /// # Errors
    ///
    /// Any I/O error.
    pub async fn read_some(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.stream.as_mut() else {
            return Ok(0);
        };

        match stream.read(buf).await {
            Ok(0) => {
                tracing::debug!("PCM endpoint has been closed");
                inner.stream = None;
                drop(inner);
                self.fire_release();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a whole PCM buffer to the pipe.
    ///
    /// Returns the number of samples written, or `0` if the reading end
    /// disappeared, in which case the endpoint is released. The write is
    /// atomic on success.
    ///
    /// # Errors
    ///
    /// Any I/O error other than a broken pipe.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.stream.as_mut() else {
            return Ok(0);
        };

        match stream.write_all(buf).await {
            Ok(()) => Ok(buf.len() / 2),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!("PCM endpoint has been closed");
                inner.stream = None;
                drop(inner);
                self.fire_release();
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for Pcm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pcm").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn read_is_all_or_nothing() {
        let (near, mut far) = tokio::io::duplex(1024);
        let pcm = Pcm::new();
        pcm.install(PcmStream::Mem(near)).await;

        far.write_all(&[1, 0, 2, 0, 3, 0, 4, 0]).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(pcm.read(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, [1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[tokio::test]
    async fn eof_releases_endpoint_once() {
        let (near, far) = tokio::io::duplex(64);
        let pcm = Pcm::new();
        pcm.install(PcmStream::Mem(near)).await;

        let released = Arc::new(AtomicUsize::new(0));
        let flag = released.clone();
        pcm.on_release(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        drop(far);

        let mut buf = [0u8; 4];
        assert_eq!(pcm.read(&mut buf).await.unwrap(), 0);
        assert!(!pcm.is_open().await);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // further reads stay at EOF without firing release again
        assert_eq!(pcm.read(&mut buf).await.unwrap(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_after_peer_close_returns_zero() {
        let (near, far) = tokio::io::duplex(64);
        let pcm = Pcm::new();
        pcm.install(PcmStream::Mem(near)).await;
        drop(far);

        let released = Arc::new(AtomicUsize::new(0));
        let flag = released.clone();
        pcm.on_release(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(pcm.write(&[0u8; 4]).await.unwrap(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_write_without_path_fails() {
        let pcm = Pcm::new();
        assert!(matches!(
            pcm.open_write().await,
            Err(EngineError::PcmNotRequested)
        ));
    }

    #[tokio::test]
    async fn open_read_missing_path_fails() {
        let pcm = Pcm::with_path("/nonexistent/pcm.fifo");
        assert!(matches!(
            pcm.open_read().await,
            Err(EngineError::PcmOpen { .. })
        ));
    }
}
