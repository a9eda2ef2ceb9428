use futures::Stream;
use futures::stream::FusedStream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Merges a dynamically-sized set of streams into a single stream.
///
/// Every call to [`poll_next`](Stream::poll_next) starts polling at the
/// stream *after* the one that produced the previous item, so a stream that is
/// always ready can never starve a slower sibling. Finished streams are dropped
/// from the set as soon as they report the end of their sequence, and the
/// merged stream itself ends once the set is empty.
///
/// There is no buffering of its own: an item is handed on the moment it is
/// pulled from an input. Back-pressure is therefore whatever the inputs
/// provide (a bounded channel per producer, for example).
///
/// # Examples
///
/// ```
/// use futures::{StreamExt, stream};
/// use isolate_asyncutils::fan_in;
///
/// # futures::executor::block_on(async {
/// let merged: Vec<u32> = fan_in([stream::iter(vec![1, 2]), stream::iter(vec![10, 20, 30])])
///     .collect()
///     .await;
/// assert_eq!(merged, vec![1, 10, 2, 20, 30]);
/// # });
/// ```
#[must_use = "streams do nothing unless polled"]
pub struct FanIn<S> {
    streams: Vec<Pin<Box<S>>>,
    cursor: usize,
}

/// Create a [`FanIn`] over every stream in `streams`.
///
/// Streams don't need to be [`Unpin`]; each one is pinned on the heap.
pub fn fan_in<S, I>(streams: I) -> FanIn<S>
where
    S: Stream,
    I: IntoIterator<Item = S>,
{
    FanIn {
        streams: streams.into_iter().map(Box::pin).collect(),
        cursor: 0,
    }
}

impl<S> FanIn<S> {
    /// Number of inputs that haven't finished yet.
    pub fn remaining(&self) -> usize {
        self.streams.len()
    }
}

impl<S: Stream> Stream for FanIn<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Vec<Pin<Box<_>>> is Unpin, so is FanIn.
        let this = self.get_mut();
        let mut pending = 0;
        while pending < this.streams.len() {
            let index = this.cursor % this.streams.len();
            match this.streams[index].as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    this.cursor = index + 1;
                    return Poll::Ready(Some(item));
                },
                Poll::Ready(None) => {
                    // The last stream takes its slot; poll that one next.
                    drop(this.streams.swap_remove(index));
                    this.cursor = index;
                },
                Poll::Pending => {
                    this.cursor = index + 1;
                    pending += 1;
                },
            }
        }
        match this.streams.is_empty() {
            true => Poll::Ready(None),
            // Every remaining input registered the waker.
            false => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.streams.iter().fold((0, Some(0)), |(low, high), stream| {
            let (l, h) = stream.size_hint();
            (low.saturating_add(l), high.zip(h).and_then(|(a, b)| a.checked_add(b)))
        })
    }
}

impl<S: Stream> FusedStream for FanIn<S> {
    fn is_terminated(&self) -> bool {
        self.streams.is_empty()
    }
}
