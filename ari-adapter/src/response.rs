//! One-shot response handles passed to request handlers.

use crate::error::AdapterError;
use ari_protocol::Exception;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Resolver<T> = Box<dyn FnOnce(Result<T, Exception>) -> Result<(), AdapterError> + Send>;
type Check<T> = Arc<dyn Fn(&T) -> Result<(), AdapterError> + Send + Sync>;

/// Handle through which a request handler answers its request.
///
/// Exactly one of [`success`](Self::success) or [`error`](Self::error) takes
/// effect; any later call fails with [`AdapterError::AlreadyResolved`] and
/// writes nothing. Clones share the same guard.
///
/// A success value rejected by the payload check leaves the handle
/// unresolved, so the request can still be answered.
pub struct Response<T> {
    resolver: Arc<Mutex<Option<Resolver<T>>>>,
    check: Option<Check<T>>,
}

impl<T> Response<T> {
    pub(crate) fn new<F>(resolver: F) -> Self
    where
        F: FnOnce(Result<T, Exception>) -> Result<(), AdapterError> + Send + 'static,
    {
        Self {
            resolver: Arc::new(Mutex::new(Some(Box::new(resolver)))),
            check: None,
        }
    }

    /// Like [`new`](Self::new), but success values must pass `check` first.
    pub(crate) fn with_check<F, C>(resolver: F, check: C) -> Self
    where
        F: FnOnce(Result<T, Exception>) -> Result<(), AdapterError> + Send + 'static,
        C: Fn(&T) -> Result<(), AdapterError> + Send + Sync + 'static,
    {
        Self {
            check: Some(Arc::new(check)),
            ..Self::new(resolver)
        }
    }

    pub fn success(&self, value: T) -> Result<(), AdapterError> {
        self.resolve(Ok(value))
    }

    pub fn error(&self, exception: Exception) -> Result<(), AdapterError> {
        self.resolve(Err(exception))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolver.lock().is_none()
    }

    fn resolve(&self, outcome: Result<T, Exception>) -> Result<(), AdapterError> {
        // take() under the lock, run outside it
        let resolver = {
            let mut slot = self.resolver.lock();
            if slot.is_none() {
                return Err(AdapterError::AlreadyResolved);
            }
            if let (Some(check), Ok(value)) = (&self.check, &outcome) {
                check(value)?;
            }
            slot.take().ok_or(AdapterError::AlreadyResolved)?
        };
        resolver(outcome)
    }
}

impl<T> Clone for Response<T> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            check: self.check.clone(),
        }
    }
}

impl<T> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ari_protocol::ExceptionKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let response = Response::<u32>::new(move |outcome| {
            assert_eq!(outcome, Ok(7));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(!response.is_resolved());
        response.success(7).unwrap();
        assert!(response.is_resolved());

        assert!(matches!(
            response.success(8),
            Err(AdapterError::AlreadyResolved)
        ));
        assert!(matches!(
            response.error(Exception::generic("late")),
            Err(AdapterError::AlreadyResolved)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_guard() {
        let response = Response::<()>::new(|outcome| {
            let exc = outcome.unwrap_err();
            assert_eq!(exc.kind, ExceptionKind::Access);
            Ok(())
        });
        let clone = response.clone();

        clone
            .error(Exception::new(ExceptionKind::Access, "denied"))
            .unwrap();
        assert!(response.is_resolved());
        assert!(matches!(
            response.success(()),
            Err(AdapterError::AlreadyResolved)
        ));
    }

    #[test]
    fn test_rejected_payload_leaves_response_open() {
        let response = Response::<u32>::with_check(
            |outcome| {
                assert!(outcome.is_err());
                Ok(())
            },
            |value| match value {
                0 => Err(AdapterError::Protocol(ari_protocol::ProtocolError::EmptyModeSet)),
                _ => Ok(()),
            },
        );

        assert!(matches!(
            response.success(0),
            Err(AdapterError::Protocol(_))
        ));
        assert!(!response.is_resolved());
        response.error(Exception::generic("no modes")).unwrap();
        assert!(response.is_resolved());
    }

    #[test]
    fn test_resolver_error_is_returned() {
        let response = Response::<()>::new(|_| Err(AdapterError::StreamClosed));
        assert!(matches!(
            response.success(()),
            Err(AdapterError::StreamClosed)
        ));
        // still consumed
        assert!(response.is_resolved());
    }
}
