use std::{cell::RefCell, future::Future, pin::Pin, rc::Rc, task::Poll};

use pin_project_lite::pin_project;

use crate::registry::DepId;

struct ContextInner {
    deps: RefCell<Vec<DepId>>,
}

thread_local! {
    // The "who is running now?" slot from §9's design notes, implemented as
    // a native thread-local since the kernel is single-threaded cooperative.
    static CURRENT: RefCell<Option<Rc<ContextInner>>> = const { RefCell::new(None) };
}

/// Records the dependency set of one run of a [`crate::effect::run_effect`]
/// task (C4's "mutable current dependency set rebuilt on each run").
///
/// Reading a reactive source (a `reactive-fs` call, or
/// [`crate::value::ReactiveValue::get_tracked`]) while a `Context` is the
/// ambient one enlists that source's [`DepId`] via [`Context::record`].
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

impl Context {
    pub fn new() -> Self {
        Context(Rc::new(ContextInner {
            deps: RefCell::new(Vec::new()),
        }))
    }

    /// Record that the currently-running context (if any) read `dep`.
    /// A no-op outside of any context — reads made outside an effect are
    /// simply not reactive, matching reactive-fs's "consult the cache" path
    /// used for one-off reads.
    pub fn record(dep: DepId) {
        CURRENT.with(|c| {
            if let Some(ctx) = c.borrow().as_ref() {
                ctx.deps.borrow_mut().push(dep);
            }
        });
    }

    /// Snapshot of dependencies recorded so far this run.
    pub fn deps(&self) -> Vec<DepId> {
        self.0.deps.borrow().clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// Makes `ctx` the ambient context for every poll of `inner`, restoring
    /// whatever was ambient before. Needed because a task may yield across
    /// `.await` points that interleave with other effects on the same
    /// cooperative thread — a context entered once "for the whole future"
    /// would be clobbered by whichever other effect polls next. This is the
    /// same per-poll re-entry technique `tracing::Instrument` uses for spans.
    struct InContext<Fut> {
        ctx: Rc<ContextInner>,
        #[pin]
        inner: Fut,
    }
}

impl<Fut: Future> Future for InContext<Fut> {
    type Output = Fut::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let prev = CURRENT.with(|c| c.borrow_mut().replace(this.ctx.clone()));
        let res = this.inner.poll(cx);
        CURRENT.with(|c| *c.borrow_mut() = prev);
        res
    }
}

/// Run `fut` with `ctx` as the ambient [`Context`] for every individual poll.
pub fn in_context<Fut: Future>(ctx: &Context, fut: Fut) -> impl Future<Output = Fut::Output> {
    InContext {
        ctx: ctx.0.clone(),
        inner: fut,
    }
}
