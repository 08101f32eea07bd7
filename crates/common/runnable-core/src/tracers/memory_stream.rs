//! In-memory channel between a callback handler and a stream consumer.
//!
//! Handlers send synchronously from inside callback events; the consumer
//! drains either eagerly with [`ReceiveStream::try_next`] or as a
//! [`futures::Stream`]. Items are delivered in send order.

use tokio::sync::mpsc;

/// A sender for the memory stream.
#[derive(Debug)]
pub struct SendStream<T> {
    sender: mpsc::UnboundedSender<Option<T>>,
}

impl<T> SendStream<T> {
    /// Send an item to the stream.
    ///
    /// Returns `false` if the receiver was dropped.
    pub fn send(&self, item: T) -> bool {
        self.sender.send(Some(item)).is_ok()
    }

    /// Close the stream. Items sent earlier are still delivered.
    pub fn close(&self) -> bool {
        self.sender.send(None).is_ok()
    }
}

impl<T> Clone for SendStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// A receiver for the memory stream.
#[derive(Debug)]
pub struct ReceiveStream<T> {
    receiver: mpsc::UnboundedReceiver<Option<T>>,
    closed: bool,
}

impl<T> ReceiveStream<T> {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Take the next buffered item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(Some(item)) => Some(item),
            Ok(None) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }

    /// Wait for the next item. Returns `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        match self.receiver.recv().await {
            Some(Some(item)) => Some(item),
            Some(None) | None => {
                self.closed = true;
                None
            }
        }
    }
}

impl<T: Send + 'static> ReceiveStream<T> {
    pub fn into_stream(self) -> impl futures::Stream<Item = T> + Send {
        futures::stream::unfold(self, |mut state| async move {
            let item = state.next().await?;
            Some((item, state))
        })
    }
}

/// Create a connected sender/receiver pair.
#[derive(Debug)]
pub struct MemoryStream;

impl MemoryStream {
    pub fn channel<T>() -> (SendStream<T>, ReceiveStream<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            SendStream { sender },
            ReceiveStream {
                receiver,
                closed: false,
            },
        )
    }
}
