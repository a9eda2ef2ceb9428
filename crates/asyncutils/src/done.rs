use futures::Stream;
use futures::stream::FusedStream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Stream for the [`on_done`](StreamDoneExt::on_done) method.
    #[must_use = "streams do nothing unless polled"]
    pub struct OnDone<S, F> {
        #[pin]
        inner: S,
        seen: usize,
        callback: Option<F>,
    }
}

impl<S, F> Stream for OnDone<S, F>
where
    S: Stream,
    F: FnOnce(usize),
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.callback.is_none() {
            // Already finished; don't poll an exhausted stream again.
            return Poll::Ready(None);
        }
        match ready!(this.inner.poll_next(cx)) {
            Some(item) => {
                *this.seen += 1;
                Poll::Ready(Some(item))
            },
            None => {
                if let Some(callback) = this.callback.take() {
                    callback(*this.seen);
                }
                Poll::Ready(None)
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.callback {
            Some(_) => self.inner.size_hint(),
            None => (0, Some(0)),
        }
    }
}

impl<S, F> FusedStream for OnDone<S, F>
where
    S: Stream,
    F: FnOnce(usize),
{
    fn is_terminated(&self) -> bool {
        self.callback.is_none()
    }
}

pub trait StreamDoneExt: Stream + Sized {
    /// Call `callback` exactly once, with the number of items that passed
    /// through, when the stream ends. Dropping the stream early never calls it.
    fn on_done<F: FnOnce(usize)>(self, callback: F) -> OnDone<Self, F> {
        OnDone {
            inner: self,
            seen: 0,
            callback: Some(callback),
        }
    }
}
impl<S: Stream> StreamDoneExt for S {}
