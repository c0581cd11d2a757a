//! The cooperative suspension point.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspends the current [`AsyncEvent`](crate::AsyncEvent) until the next tick.
///
/// Locals of the suspended task survive; the loop resumes it right after the
/// `.await` on its next turn. A task body that loops forever must await this
/// (or another pending future) on every iteration, or it starves the loop.
pub async fn yield_now() {
    YieldNow { yielded: false }.await;
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
