use std::{future::Future, rc::Rc};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    context::{in_context, Context},
    registry::DepRegistry,
};

/// Drives a [`Context`]-tracked task as the asynchronous sequence of values
/// described in C4: run the task, yield its result, then wait for any
/// dependency it touched to fire before running it again. Dependencies are
/// rebuilt from scratch every run — a task that stops reading a path on some
/// runs stops depending on it.
///
/// On error the task is retried only once a dependency fires; the *last
/// successful* dependency set remains the active one (so an effect that
/// fails immediately after a file is deleted still reruns when the file
/// reappears), per §4.4.
///
/// Cancellation: dropping `cancel` or calling `cancel.cancel()` stops future
/// reruns without interrupting an in-flight run; the run's result is still
/// delivered to `on_value`/`on_error` once it completes; and exactly one
/// dependency registration from that run is skipped.
///
/// Dirty tracking: a dependency can be invalidated while this run is still
/// in flight, before any waker for it is registered (registration only
/// happens once the run returns). To not silently miss that invalidation,
/// each iteration snapshots every dependency's generation counter
/// (`DepRegistry::generation_snapshot`) before calling `task()`; once the
/// run completes, any dependency it ended up depending on whose generation
/// moved since the snapshot is treated as already dirty, and the loop reruns
/// immediately instead of registering a waker and waiting — matching
/// spec.md:94's "invalidations recorded as dirty, exactly one additional
/// run after completion."
pub async fn run_effect<T, E, F, Fut>(
    registry: Rc<DepRegistry>,
    cancel: CancellationToken,
    mut task: F,
    mut on_value: impl FnMut(T),
    mut on_error: impl FnMut(E),
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_good_deps: Vec<u64> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let gens_before = registry.generation_snapshot();

        let ctx = Context::new();
        let result = in_context(&ctx, task()).await;
        let run_deps = ctx.deps();

        if cancel.is_cancelled() {
            return;
        }

        match result {
            Ok(value) => {
                last_good_deps = run_deps;
                on_value(value);
            }
            Err(err) => {
                on_error(err);
                if last_good_deps.is_empty() {
                    last_good_deps = run_deps;
                }
            }
        }

        let dirty = last_good_deps
            .iter()
            .any(|dep| registry.generation(*dep) != *gens_before.get(dep).unwrap_or(&0));

        if dirty {
            continue;
        }

        let notify = Rc::new(Notify::new());
        for dep in &last_good_deps {
            registry.register_waker(*dep, notify.clone());
        }

        tokio::select! {
            _ = notify.notified() => {}
            _ = cancel.cancelled() => return,
        }
    }
}
