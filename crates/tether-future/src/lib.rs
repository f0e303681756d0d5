//! Cancelable futures for Tether.
//!
//! Every request in Tether returns a [`Cancelable<T>`]: a future that can
//! be told to stop waiting. Cancellation settles the future with
//! [`FutureError::Canceled`], an outcome that can never be mistaken for a
//! value or for an application failure ([`FutureError::Rejected`]).
//!
//! ```text
//!   Cancelable<T> ──await──→ Ok(T)
//!                      ├───→ Err(Rejected(reason))   the operation failed
//!                      └───→ Err(Canceled)           someone stopped waiting
//! ```
//!
//! Cancellation means "stop waiting", not "undo": a request frame that was
//! already written stays written.
//!
//! # Building blocks
//!
//! - [`Cancelable::new`] hands a [`Resolver`] to an executor closure;
//!   [`Cancelable::pair`] returns both halves directly.
//! - [`Cancelable::settled`] / [`Cancelable::failed`] are born settled.
//! - [`Cancelable::chain`] / [`Cancelable::and_then`] derive a new future
//!   whose cancel forwards *backward* to the original.
//! - [`Cancelable::with_timeout`] races the future against a timer. The
//!   loser is never canceled; both keep running and the late settlement is
//!   ignored.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures_util::FutureExt;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a [`Cancelable`] did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FutureError {
    /// The future was explicitly canceled before it settled.
    #[error("canceled")]
    Canceled,

    /// The underlying operation failed.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl FutureError {
    /// Shorthand for `FutureError::Rejected(reason.into())`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Returns `true` for the cancellation outcome.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// What a [`Cancelable<T>`] resolves to.
pub type Outcome<T> = Result<T, FutureError>;

/// Acquire a mutex guard, ignoring poisoning.
///
/// The guarded state is a single settlement slot; a panic elsewhere can at
/// worst leave it unsettled.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Core + Resolver
// ---------------------------------------------------------------------------

type Hook = Box<dyn FnOnce() + Send>;

struct Core<T> {
    result: Option<Outcome<T>>,
    settled: bool,
    canceled: bool,
    waker: Option<Waker>,
    on_cancel: Vec<Hook>,
}

impl<T> Core<T> {
    fn new() -> Self {
        Self {
            result: None,
            settled: false,
            canceled: false,
            waker: None,
            on_cancel: Vec::new(),
        }
    }
}

/// The settling half of a [`Cancelable`].
///
/// Cheap to clone; every clone settles the same future. Only the first
/// settlement counts; later calls return `false` and change nothing.
pub struct Resolver<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> Resolver<T> {
    /// Settles the future with a value.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settles the future with [`FutureError::Rejected`].
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(FutureError::Rejected(reason.into())))
    }

    /// Settles the future with an arbitrary outcome.
    ///
    /// Returns `true` if this call settled it, `false` if it was already
    /// settled. Cancel hooks run (outside the lock) when the outcome is
    /// [`FutureError::Canceled`]; otherwise they are discarded.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let (waker, hooks) = {
            let mut core = lock(&self.core);
            if core.settled {
                return false;
            }
            core.settled = true;
            core.canceled = matches!(outcome, Err(FutureError::Canceled));
            core.result = Some(outcome);
            let hooks = mem::take(&mut core.on_cancel);
            let hooks = if core.canceled { hooks } else { Vec::new() };
            (core.waker.take(), hooks)
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        for hook in hooks {
            hook();
        }
        true
    }

    /// Returns `true` once any outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        lock(&self.core).settled
    }

    /// Registers a hook that runs if (and only if) the future is canceled.
    ///
    /// If the future was already canceled the hook runs immediately; if it
    /// settled any other way the hook is dropped.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut core = lock(&self.core);
            if !core.settled {
                core.on_cancel.push(Box::new(hook));
                return;
            }
            core.canceled
        };
        if run_now {
            hook();
        }
    }
}

/// Leaf future reading the settlement slot.
struct Settlement<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Future for Settlement<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut core = lock(&self.core);
        match core.result.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                core.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CancelHandle
// ---------------------------------------------------------------------------

/// A detachable "cancel" button for a [`Cancelable`].
///
/// Lets one task cancel a future another task is awaiting.
#[derive(Clone)]
pub struct CancelHandle {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl CancelHandle {
    fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Arc::new(cancel),
        }
    }

    /// Cancels the future this handle belongs to. Idempotent.
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

// ---------------------------------------------------------------------------
// Cancelable
// ---------------------------------------------------------------------------

type BoxOutcome<T> = Pin<Box<dyn Future<Output = Outcome<T>> + Send>>;

/// A future of `T` with an explicit cancel operation.
#[must_use = "a Cancelable does nothing unless awaited or canceled"]
pub struct Cancelable<T> {
    future: BoxOutcome<T>,
    handle: CancelHandle,
}

impl<T: Send + 'static> Cancelable<T> {
    /// Creates a future and hands its [`Resolver`] to `executor`.
    ///
    /// The executor runs synchronously, before `new` returns.
    pub fn new(executor: impl FnOnce(Resolver<T>)) -> Self {
        let (future, resolver) = Self::pair();
        executor(resolver);
        future
    }

    /// Creates an unsettled future together with its resolver.
    pub fn pair() -> (Self, Resolver<T>) {
        let core = Arc::new(Mutex::new(Core::new()));
        let resolver = Resolver {
            core: Arc::clone(&core),
        };
        let canceler = resolver.clone();
        let future = Self {
            future: Box::pin(Settlement { core }),
            handle: CancelHandle::new(move || {
                canceler.settle(Err(FutureError::Canceled));
            }),
        };
        (future, resolver)
    }

    /// A future that is already settled with `value`.
    pub fn settled(value: T) -> Self {
        Self::from_outcome(Ok(value))
    }

    /// A future that is already settled with `error`.
    pub fn failed(error: FutureError) -> Self {
        Self::from_outcome(Err(error))
    }

    /// A future that is already settled with `outcome`.
    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self::new(|resolver| {
            resolver.settle(outcome);
        })
    }

    /// Forces settlement with [`FutureError::Canceled`] unless already
    /// settled. A no-op otherwise.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Returns a handle that cancels this future from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Derives a future that maps the value through `continuation`.
    ///
    /// Canceling the derived future cancels *this* one (backward
    /// propagation). Canceling this one does not touch the derived future
    /// directly; it simply observes the `Canceled` outcome.
    pub fn chain<U, F>(self, continuation: F) -> Cancelable<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Cancelable {
            future: Box::pin(self.future.map(move |outcome| outcome.map(continuation))),
            handle: self.handle,
        }
    }

    /// Like [`chain`](Self::chain) with an asynchronous, fallible
    /// continuation. The continuation only runs on success.
    pub fn and_then<U, F, Fut>(self, continuation: F) -> Cancelable<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Outcome<U>> + Send + 'static,
    {
        let future = self.future;
        Cancelable {
            future: Box::pin(async move {
                let value = future.await?;
                continuation(value).await
            }),
            handle: self.handle,
        }
    }

    /// Races this future against a timer of `timeout_ms` milliseconds.
    ///
    /// The result settles with `Some(outcome)` if this future settles first,
    /// or with `Ok(None)` once the timer fires. A negative `timeout_ms`
    /// disables the timer. Errors from this future propagate as errors.
    ///
    /// Neither side of the race is canceled by the other: the original
    /// keeps running on its own task and its late settlement is ignored.
    /// Canceling the returned future does not cancel the original either.
    ///
    /// A future that is already settled wins even against a zero timeout.
    /// Requires a Tokio runtime when the future is still pending.
    pub fn with_timeout(self, timeout_ms: i64) -> Cancelable<Option<T>> {
        let mut future = self.future;
        if let Some(outcome) = (&mut future).now_or_never() {
            return Cancelable::from_outcome(outcome.map(Some));
        }

        Cancelable::new(move |resolver| {
            let racer = resolver.clone();
            tokio::spawn(async move {
                let outcome = future.await;
                racer.settle(outcome.map(Some));
            });

            if timeout_ms == 0 {
                resolver.resolve(None);
            } else if timeout_ms > 0 {
                let after = Duration::from_millis(timeout_ms.unsigned_abs());
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    resolver.resolve(None);
                });
            }
        })
    }
}

impl<T> Future for Cancelable<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Cancelable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancelable").finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================
