//! Ending an output stream at end-of-stream

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::output::OutputPacket;

/// Extension trait to cut an output stream at its first EOS push.
pub trait UntilEosExt: Stream<Item = OutputPacket> {
    /// Yield pushes up to and including the first one marked end-of-stream.
    ///
    /// A session's output stream outlives each attachment; this turns it
    /// into the stream of a single attachment (or a single start/stop run).
    fn until_eos(self) -> UntilEos<Self>
    where
        Self: Sized,
    {
        UntilEos::new(self)
    }
}

impl<T: Stream<Item = OutputPacket>> UntilEosExt for T {}

pin_project! {
    /// A stream combinator that ends after an EOS push
    pub struct UntilEos<S> {
        #[pin]
        stream: S,
        done: bool,
    }
}

impl<S> UntilEos<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, done: false }
    }
}

impl<S: Stream<Item = OutputPacket>> Stream for UntilEos<S> {
    type Item = OutputPacket;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.stream.poll_next(cx) {
            Poll::Ready(Some(packet)) => {
                if packet.eos {
                    *this.done = true;
                }
                Poll::Ready(Some(packet))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrecisionUtcTime, SampleBuffer, Sri};
    use futures::StreamExt;
    use std::sync::Arc;

    fn packet(eos: bool) -> OutputPacket {
        OutputPacket {
            samples: SampleBuffer::Octet(vec![]),
            timestamp: PrecisionUtcTime::now(),
            sri: Arc::new(Sri::new("s")),
            sri_changed: false,
            eos,
            frames: 0,
        }
    }

    #[tokio::test]
    async fn stops_after_first_eos() {
        let items = vec![packet(false), packet(false), packet(true), packet(false)];
        let collected: Vec<_> = futures::stream::iter(items).until_eos().collect().await;
        assert_eq!(collected.len(), 3);
        assert!(collected[2].eos);
    }

    #[tokio::test]
    async fn ends_with_inner_stream() {
        let collected: Vec<_> =
            futures::stream::iter(vec![packet(false)]).until_eos().collect().await;
        assert_eq!(collected.len(), 1);
    }
}
