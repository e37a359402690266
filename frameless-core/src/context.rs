use crate::{ErrorKind, Result};
use std::{
    any::{Any, TypeId},
    fmt,
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

/// Key under which a value is attached to a [`Context`]. Two keys are equal when they were made
/// for the same type and discriminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextKey {
    type_id: TypeId,
    discriminator: u64,
}

impl ContextKey {
    pub fn of<T: 'static>() -> Self {
        Self::with_discriminator::<T>(0)
    }
    /// Distinguish several values of the same type, e.g. one transaction per adapter.
    pub fn with_discriminator<T: 'static>(discriminator: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            discriminator,
        }
    }
}

struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<ErrorKind>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn cancel(&self, cause: ErrorKind) {
        if !self.token.is_cancelled() {
            let _ = self.cause.set(cause);
        }
        self.token.cancel();
    }
}

struct Entry {
    key: ContextKey,
    value: Arc<dyn Any + Send + Sync>,
    next: Option<Arc<Entry>>,
}

/// Request-scoped carrier of cancellation, deadline and keyed values.
///
/// Cloning is cheap and every clone observes the same cancellation scope. Deriving a context
/// never mutates the parent: values are stored in an immutable linked chain.
#[derive(Clone)]
pub struct Context {
    scope: Arc<Scope>,
    values: Option<Arc<Entry>>,
}

impl Context {
    /// Root context: never cancelled unless [`Context::cancel`] is called on it.
    pub fn background() -> Self {
        Self {
            scope: Arc::new(Scope {
                token: CancellationToken::new(),
                deadline: None,
                cause: OnceLock::new(),
                parent: None,
            }),
            values: None,
        }
    }

    /// New cancellation scope: cancelled together with `self`, and independently through
    /// [`Context::cancel`] on the returned context.
    pub fn child(&self) -> Self {
        Self {
            scope: Arc::new(Scope {
                token: self.scope.token.child_token(),
                deadline: self.scope.deadline,
                cause: OnceLock::new(),
                parent: Some(self.scope.clone()),
            }),
            values: self.values.clone(),
        }
    }

    /// Child context that gets cancelled with [`ErrorKind::DeadlineExceeded`] after `timeout`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Must be called within a Tokio runtime.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.scope.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        let scope = Arc::new(Scope {
            token: self.scope.token.child_token(),
            deadline: Some(deadline),
            cause: OnceLock::new(),
            parent: Some(self.scope.clone()),
        });
        let timer = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => timer.cancel(ErrorKind::DeadlineExceeded),
                _ = timer.token.cancelled() => {}
            }
        });
        Self {
            scope,
            values: self.values.clone(),
        }
    }

    /// Context carrying the same values but detached from the cancellation and deadline of
    /// `self`.
    pub fn without_cancel(&self) -> Self {
        Self {
            values: self.values.clone(),
            ..Self::background()
        }
    }

    /// Cancel this scope and all the contexts derived from it.
    pub fn cancel(&self) {
        self.scope.cancel(ErrorKind::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline
    }

    /// Reason of the cancellation, `None` while the context is live.
    pub fn err(&self) -> Option<ErrorKind> {
        if !self.is_cancelled() {
            return None;
        }
        let mut scope = Some(&self.scope);
        while let Some(current) = scope {
            if let Some(cause) = current.cause.get() {
                return Some(*cause);
            }
            scope = current.parent.as_ref();
        }
        Some(ErrorKind::Cancelled)
    }

    /// `Ok` while the context is live, the cancellation reason otherwise.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(kind) => Err(kind.into()),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.scope.token.cancelled().await
    }

    /// Same as [`Context::cancelled`] but not borrowing the context.
    pub fn cancelled_owned(&self) -> impl Future<Output = ()> + Send + 'static {
        self.scope.token.clone().cancelled_owned()
    }

    /// Run `f` once this context gets cancelled. Aborting the returned handle deregisters it.
    pub fn after_cancel<F, Fut>(&self, f: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancelled = self.cancelled_owned();
        tokio::spawn(async move {
            cancelled.await;
            f().await;
        })
    }

    pub fn with_value<T: Any + Send + Sync>(&self, key: ContextKey, value: T) -> Self {
        self.with_shared(key, Arc::new(value))
    }

    /// Same as [`Context::with_value`] for a value that is already shared.
    pub fn with_shared<T: Any + Send + Sync>(&self, key: ContextKey, value: Arc<T>) -> Self {
        Self {
            scope: self.scope.clone(),
            values: Some(Arc::new(Entry {
                key,
                value,
                next: self.values.clone(),
            })),
        }
    }

    /// Most recently attached value for `key`.
    pub fn value<T: Any + Send + Sync>(&self, key: ContextKey) -> Option<Arc<T>> {
        let mut entry = self.values.as_ref();
        while let Some(current) = entry {
            if current.key == key {
                return current.value.clone().downcast::<T>().ok();
            }
            entry = current.next.as_ref();
        }
        None
    }

    pub fn with<T: Any + Send + Sync>(&self, value: T) -> Self {
        self.with_value(ContextKey::of::<T>(), value)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value(ContextKey::of::<T>())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.scope.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = Context::background();
        let child = parent.child();
        let grandchild = child.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.err(), Some(ErrorKind::Cancelled));
        parent.cancel();
        assert_eq!(parent.err(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(100));
        let child = ctx.child();
        assert!(ctx.check().is_ok());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ctx.is_cancelled());
        assert_eq!(child.err(), Some(ErrorKind::DeadlineExceeded));
        child.cancel();
        assert!(child.check().is_kind(ErrorKind::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn nested_deadline_keeps_the_earliest() {
        let outer = Context::background().with_timeout(Duration::from_secs(1));
        let inner = outer.with_timeout(Duration::from_secs(10));
        assert_eq!(inner.deadline(), outer.deadline());
    }

    #[tokio::test]
    async fn without_cancel_detaches() {
        let ctx = Context::background().with(42u32);
        let detached = ctx.without_cancel();
        ctx.cancel();
        assert!(!detached.is_cancelled());
        assert_eq!(detached.get::<u32>().as_deref(), Some(&42));
    }

    #[tokio::test]
    async fn values_are_shadowed_not_mutated() {
        let key = ContextKey::with_discriminator::<String>(7);
        let a = Context::background().with_value(key, "a".to_string());
        let b = a.with_value(key, "b".to_string());
        assert_eq!(a.value::<String>(key).as_deref().map(String::as_str), Some("a"));
        assert_eq!(b.value::<String>(key).as_deref().map(String::as_str), Some("b"));
        assert!(b.value::<String>(ContextKey::of::<String>()).is_none());
        assert!(b.value::<u32>(key).is_none());
    }

    #[tokio::test]
    async fn after_cancel_runs_once_cancelled() {
        let ctx = Context::background().child();
        let flag = Arc::new(AtomicBool::new(false));
        let handle = ctx.after_cancel({
            let flag = flag.clone();
            || async move { flag.store(true, Ordering::SeqCst) }
        });
        tokio::task::yield_now().await;
        assert!(!flag.load(Ordering::SeqCst));
        ctx.cancel();
        handle.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
