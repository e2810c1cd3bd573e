//! Callback-to-future utilities for command completions.
//!
//! Devices report command completion through callbacks. This module turns
//! each submitted command into a oneshot channel so the submitter awaits a
//! future instead of watching a shared flag.
//!
//! # Pattern
//!
//! 1. Create a completion pair with [`completion()`]
//! 2. Hand the sender to the device (for C callbacks, via
//!    [`CompletionSender::into_raw()`] / [`CompletionSender::from_raw()`])
//! 3. The device signals the sender exactly once
//! 4. Drive the receiver with [`poll_until()`], which keeps asking the device
//!    for progress between polls
//!
//! Senders are `Send`: a completion may be signalled from a different OS
//! thread than the one waiting on it.

use std::ffi::c_void;
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use futures_channel::oneshot;

use crate::error::{Error, Result};

/// Sender half of a completion pair.
///
/// Convert to raw pointer with [`into_raw()`](Self::into_raw) to pass through
/// C callbacks, then reconstruct with [`from_raw()`](Self::from_raw).
pub struct CompletionSender<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> CompletionSender<T> {
    /// Convert sender to raw pointer for passing to C callbacks.
    ///
    /// # Safety
    ///
    /// The returned pointer must be passed to [`from_raw()`](Self::from_raw)
    /// exactly once to avoid memory leaks.
    pub fn into_raw(self) -> *mut c_void {
        Box::into_raw(Box::new(self.tx)) as *mut c_void
    }

    /// Reconstruct sender from raw pointer.
    ///
    /// # Safety
    ///
    /// The pointer must have been created by [`into_raw()`](Self::into_raw)
    /// and must not have been used already.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
        let tx = unsafe { *Box::from_raw(ptr as *mut oneshot::Sender<Result<T>>) };
        Self { tx }
    }

    /// Send a result.
    pub fn complete(self, result: Result<T>) {
        // Ignore send error - receiver may have been dropped
        let _ = self.tx.send(result);
    }

    /// Send a successful value.
    pub fn success(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Send an error.
    pub fn error(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// Receiver half of a completion pair.
///
/// Implements `Future` - resolves to [`Error::Cancelled`] if the sender is
/// dropped without signalling.
pub struct CompletionReceiver<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for CompletionReceiver<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create a completion sender/receiver pair.
pub fn completion<T>() -> (CompletionSender<T>, CompletionReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx }, CompletionReceiver { rx })
}

/// How long [`poll_until`] keeps waiting.
///
/// The default is unbounded, matching a plain busy-wait loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollLimit {
    /// Give up after this many progress calls
    pub max_polls: Option<u64>,
    /// Give up once this much time has passed
    pub timeout: Option<Duration>,
}

impl PollLimit {
    /// Never give up.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up after `max_polls` progress calls.
    pub fn polls(max_polls: u64) -> Self {
        Self {
            max_polls: Some(max_polls),
            timeout: None,
        }
    }

    /// Give up after `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            max_polls: None,
            timeout: Some(timeout),
        }
    }
}

/// A simple waker that does nothing - we poll manually.
struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Drive `future` to completion, calling `progress` whenever it is pending.
///
/// `progress` is where completions get reaped (e.g. processing a queue
/// pair); without it a device callback would never fire. Returns
/// [`Error::Timeout`] once `limit` is exhausted. Errors from `progress`
/// abort the wait.
///
/// # Example
///
/// ```
/// use spdk_dif::complete::{PollLimit, completion, poll_until};
///
/// let (tx, rx) = completion::<u32>();
/// let mut tx = Some(tx);
/// let value = poll_until(rx, || {
///     if let Some(tx) = tx.take() {
///         tx.success(7);
///     }
///     Ok(())
/// }, PollLimit::polls(10))?;
/// assert_eq!(value, 7);
/// # Ok::<(), spdk_dif::Error>(())
/// ```
pub fn poll_until<F, T>(
    future: F,
    mut progress: impl FnMut() -> Result<()>,
    limit: PollLimit,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    let deadline = limit.timeout.map(|t| Instant::now() + t);

    let mut future = pin!(future);
    let mut polls: u64 = 0;

    loop {
        if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
            return result;
        }

        let exhausted = limit.max_polls.is_some_and(|max| polls >= max)
            || deadline.is_some_and(|d| Instant::now() >= d);
        if exhausted {
            return Err(Error::Timeout { polls });
        }

        progress()?;
        polls += 1;
    }
}
