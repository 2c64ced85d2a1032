//! Output sinks.
//!
//! The reconstruction task hands every [`OutputPacket`] to an [`OutputSink`].
//! [`channel`] provides the common case: an unbounded queue whose receiving
//! end is a [`Stream`].

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::OutputPacket;
use crate::{Result, SddsError};

/// Destination for output pushes.
#[async_trait::async_trait]
pub trait OutputSink: Send + 'static {
    /// Deliver one push. An error means the consumer is gone.
    async fn push(&mut self, packet: OutputPacket) -> Result<()>;
}

/// Sink feeding an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputPacket>,
}

#[async_trait::async_trait]
impl OutputSink for ChannelSink {
    async fn push(&mut self, packet: OutputPacket) -> Result<()> {
        self.tx.send(packet).map_err(|_| SddsError::OutputClosed)
    }
}

/// Receiving half of [`channel`].
#[derive(Debug)]
pub struct OutputReceiver {
    inner: UnboundedReceiverStream<OutputPacket>,
}

impl OutputReceiver {
    /// Wait for the next push.
    pub async fn recv(&mut self) -> Option<OutputPacket> {
        self.inner.as_mut().recv().await
    }

    /// Take a push if one is queued.
    pub fn try_recv(&mut self) -> Option<OutputPacket> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl Stream for OutputReceiver {
    type Item = OutputPacket;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Create a channel-backed sink and its receiver.
pub fn channel() -> (ChannelSink, OutputReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, OutputReceiver { inner: UnboundedReceiverStream::new(rx) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrecisionUtcTime, SampleBuffer, Sri};
    use futures::StreamExt;
    use std::sync::Arc;

    fn packet(eos: bool) -> OutputPacket {
        OutputPacket {
            samples: SampleBuffer::Short(vec![1, 2, 3]),
            timestamp: PrecisionUtcTime::now(),
            sri: Arc::new(Sri::new("s")),
            sri_changed: false,
            eos,
            frames: 1,
        }
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (mut sink, mut rx) = channel();
        sink.push(packet(false)).await.unwrap();
        sink.push(packet(true)).await.unwrap();
        drop(sink);

        assert!(!rx.recv().await.unwrap().eos);
        assert!(rx.next().await.unwrap().eos);
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn push_fails_once_receiver_is_gone() {
        let (mut sink, rx) = channel();
        drop(rx);
        assert!(matches!(sink.push(packet(false)).await, Err(SddsError::OutputClosed)));
    }
}
