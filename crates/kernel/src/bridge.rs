//! C8: wraps a reactive computation as an at-least-latest push stream with
//! cancellation, grounded on `server/src/routes/ws_helpers.rs`'s
//! `forward_stream_to_ws` (spawn a forwarding task, give the caller a
//! handle that tears it down cleanly).
//!
//! Coalescing is delegated to `tokio::sync::watch`: a `watch::Receiver`
//! only ever observes the most recently sent value, which is exactly the
//! "most recent value MUST eventually be delivered, intermediate values MAY
//! be dropped" contract in §4.7/§8 — no hand-rolled buffering needed.

use std::{future::Future, rc::Rc};

use reactive::DepRegistry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Returned by [`SubscriptionBridge::subscribe`]. Dropping it does not
/// cancel the subscription — call [`SubscriptionHandle::unsubscribe`]
/// explicitly, matching §4.7's "unsubscribe is idempotent" (repeated calls
/// are harmless; `CancellationToken::cancel` already is).
pub struct SubscriptionHandle {
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct SubscriptionBridge;

impl SubscriptionBridge {
    /// Starts the effect and returns a handle plus a `watch::Receiver` that
    /// always observes the latest produced value. `on_error` is invoked
    /// inline for every task failure, since errors (unlike values) are not
    /// naturally "latest-wins" — callers typically forward each one to a
    /// subscriber-facing error channel.
    pub fn subscribe<T, E, F, Fut>(
        registry: Rc<DepRegistry>,
        parent: &CancellationToken,
        task: F,
        mut on_error: impl FnMut(E) + 'static,
    ) -> (SubscriptionHandle, watch::Receiver<Option<T>>)
    where
        T: Clone + 'static,
        E: 'static,
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let cancel = parent.child_token();
        let (tx, rx) = watch::channel(None);

        tokio::task::spawn_local(reactive::run_effect(
            registry,
            cancel.clone(),
            task,
            move |value: T| {
                // a receiver with no one polling just keeps the latest
                // value buffered; `send` only errors once every receiver
                // (including our own retained `rx`) has been dropped.
                let _ = tx.send(Some(value));
            },
            move |err: E| on_error(err),
        ));

        (SubscriptionHandle { cancel }, rx)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use reactive::Context;

    use super::*;

    #[tokio::test]
    async fn subscribe_delivers_latest_value_and_stops_after_unsubscribe() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let registry = DepRegistry::new();
                let dep = registry.alloc();
                let parent = CancellationToken::new();
                let run_count = Rc::new(Cell::new(0));
                let run_count_clone = run_count.clone();

                let (handle, mut rx) = SubscriptionBridge::subscribe(
                    registry.clone(),
                    &parent,
                    move || {
                        let run_count_clone = run_count_clone.clone();
                        async move {
                            run_count_clone.set(run_count_clone.get() + 1);
                            Context::record(dep);
                            Ok::<_, ()>(run_count_clone.get())
                        }
                    },
                    |_: ()| {},
                );

                rx.changed().await.unwrap();
                assert_eq!(*rx.borrow(), Some(1));

                registry.invalidate(dep);
                rx.changed().await.unwrap();
                assert_eq!(*rx.borrow(), Some(2));

                handle.unsubscribe();
                tokio::task::yield_now().await;
                registry.invalidate(dep);
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert!(rx.has_changed().is_ok_and(|changed| !changed));
            })
            .await;
    }
}
