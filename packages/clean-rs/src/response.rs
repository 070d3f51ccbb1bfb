//! Response channel between a request handler and its gateway.
//!
//! A handler receives a [`ResponseSender`] and may call `send` once
//! (single-shot) or many times (streamed). The gateway side reads a
//! [`ResponseStream`] that ends once every sender is dropped.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::FailureResponse;

type ResponseItem<S> = Result<S, FailureResponse>;

/// Create a connected sender/stream pair.
pub fn response_channel<S: Send + 'static>() -> (ResponseSender<S>, ResponseStream<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResponseSender { tx }, ResponseStream::from_receiver(rx))
}

/// Handle a request handler uses to emit responses.
pub struct ResponseSender<S> {
    tx: mpsc::UnboundedSender<ResponseItem<S>>,
}

impl<S> ResponseSender<S> {
    /// Emit a successful response.
    ///
    /// Returns false if the receiving side is gone; streaming handlers
    /// should stop producing at that point.
    pub fn send(&self, response: S) -> bool {
        self.tx.send(Ok(response)).is_ok()
    }

    /// Emit a typed failure.
    pub fn fail(&self, failure: FailureResponse) -> bool {
        self.tx.send(Err(failure)).is_ok()
    }

    /// Returns true if nobody is listening anymore.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the receiving side is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl<S> Clone for ResponseSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> std::fmt::Debug for ResponseSender<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sequence of responses for one request.
pub struct ResponseStream<S> {
    inner: BoxStream<'static, ResponseItem<S>>,
}

impl<S: Send + 'static> ResponseStream<S> {
    /// Wrap any stream of responses.
    pub fn from_stream<T>(stream: T) -> Self
    where
        T: Stream<Item = ResponseItem<S>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// A stream yielding exactly one item.
    pub fn once(item: ResponseItem<S>) -> Self {
        Self::from_stream(stream::once(async move { item }))
    }

    /// A stream yielding the given items in order.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = ResponseItem<S>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(items))
    }

    pub(crate) fn from_receiver(rx: mpsc::UnboundedReceiver<ResponseItem<S>>) -> Self {
        Self::from_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}

impl<S> Stream for ResponseStream<S> {
    type Item = ResponseItem<S>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<S> std::fmt::Debug for ResponseStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_ends_when_senders_drop() {
        let (sender, mut stream) = response_channel::<u32>();
        let second = sender.clone();

        assert!(sender.send(1));
        assert!(second.fail(FailureResponse::unknown("boom")));
        drop(sender);
        drop(second);

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(
            stream.next().await,
            Some(Err(FailureResponse::unknown("boom")))
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_sender_reports_closed_receiver() {
        let (sender, stream) = response_channel::<u32>();
        assert!(!sender.is_closed());
        drop(stream);
        assert!(sender.is_closed());
        assert!(!sender.send(7));
        sender.closed().await;
    }

    #[tokio::test]
    async fn test_iter_yields_in_order() {
        let stream = ResponseStream::iter(vec![Ok(1), Ok(2), Ok(3)]);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
    }
}
