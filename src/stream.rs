/// Cancellation and progress decorators for transfer streams
use crate::error::Cancelled;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag shared between a request and whoever may cancel it
///
/// Cloning shares the flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Reader that refuses to read once its token is cancelled
///
/// The check runs before every read, so a large transfer stops at the
/// next chunk boundary after `cancel()`. It intercepts `read` only and
/// stacks with [`ProgressReader`] in either order:
///
/// ```
/// use shelfmark::stream::{CancellableReader, CancellationToken, ProgressReader};
/// use std::io::Read;
///
/// let token = CancellationToken::new();
/// let body: &[u8] = b"hello";
/// let progress = ProgressReader::new(body, Some(5), |_percent| {});
/// let mut reader = CancellableReader::new(progress, token.clone());
///
/// let mut out = String::new();
/// reader.read_to_string(&mut out).unwrap();
/// assert_eq!(out, "hello");
/// ```
#[derive(Debug)]
pub struct CancellableReader<R> {
    inner: R,
    token: CancellationToken,
    tripped: bool,
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            tripped: false,
        }
    }

    /// Whether a read was refused because of cancellation
    pub fn was_cancelled(&self) -> bool {
        self.tripped
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            self.tripped = true;
            return Err(Cancelled.into_io());
        }
        self.inner.read(buf)
    }
}

/// Callback receiving the completed percentage of a transfer
pub type ProgressListener = Arc<dyn Fn(u8) + Send + Sync>;

/// Reader that reports how much of a known-length body has been consumed
pub struct ProgressReader<R> {
    inner: R,
    total: Option<u64>,
    consumed: u64,
    listener: ProgressListener,
}

impl<R> ProgressReader<R> {
    /// Wrap `inner`, reporting against `total` bytes
    ///
    /// With an unknown or zero total nothing is ever reported.
    pub fn new(inner: R, total: Option<u64>, listener: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self::with_listener(inner, total, Arc::new(listener))
    }

    pub fn with_listener(inner: R, total: Option<u64>, listener: ProgressListener) -> Self {
        Self {
            inner,
            total: total.filter(|t| *t > 0),
            consumed: 0,
            listener,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.consumed
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.consumed += n as u64;
            if let Some(total) = self.total {
                let percent = (u128::from(self.consumed) * 100 / u128::from(total)).min(100);
                (self.listener)(percent as u8);
            }
        }
        Ok(n)
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for ProgressReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReader")
            .field("inner", &self.inner)
            .field("total", &self.total)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}
