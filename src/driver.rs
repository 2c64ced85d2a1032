//! Driver spawns and manages the ingestion and reconstruction tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};

use crate::codec::PacketCodec;
use crate::output::{OutputPacket, OutputSink};
use crate::pipeline::Pipeline;
use crate::pool::BufferPool;
use crate::provider::Provider;
use crate::status::StatusCounters;
use crate::types::{Frame, PacketSlot, SDDS_PACKET_SIZE};

/// Output sink shared between the session and its reconstruction task.
pub type SharedSink = Arc<Mutex<Box<dyn OutputSink>>>;

/// Oversized datagrams must not be truncated into a valid-looking length.
const RECV_SCRATCH_LEN: usize = 2 * SDDS_PACKET_SIZE;

/// Handles to a running pair of tasks.
///
/// Dropping the handles cancels ingestion; the reconstruction task then
/// drains what is queued and ends the stream on its own.
pub struct DriverHandles<P> {
    guard: DropGuard,
    ingest: JoinHandle<P>,
    process: JoinHandle<Pipeline>,
}

/// What is left after [`DriverHandles::shutdown`]. A part is missing only
/// if its task panicked.
pub struct Stopped<P> {
    pub provider: Option<P>,
    pub pipeline: Option<Pipeline>,
}

impl<P: Provider> DriverHandles<P> {
    /// Stop ingestion, let reconstruction drain the pool and emit EOS, and
    /// hand back the provider and pipeline.
    pub async fn shutdown(self) -> Stopped<P> {
        let cancel = self.guard.disarm();
        cancel.cancel();

        let provider = match self.ingest.await {
            Ok(provider) => Some(provider),
            Err(e) => {
                error!("Ingest task failed: {}", e);
                None
            }
        };
        let pipeline = match self.process.await {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                error!("Reconstruction task failed: {}", e);
                None
            }
        };

        Stopped { provider, pipeline }
    }
}

/// Per-run settings for the two tasks.
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    /// Datagrams read per receive batch and frames drained per pass.
    pub batch: usize,
}

/// Driver spawns and manages the per-attachment tasks
///
/// The ingestion task owns the provider: it reads datagrams, validates
/// headers and parks frames in the pool. It never waits on the output
/// side, so a slow consumer shows up as pool exhaustion and sequence gaps
/// instead of a stalled socket. The reconstruction task owns the pipeline
/// and is the only writer to the sink.
pub struct Driver;

impl Driver {
    pub fn spawn<P>(
        provider: P,
        pipeline: Pipeline,
        pool: Arc<BufferPool>,
        sink: SharedSink,
        status: Arc<StatusCounters>,
        settings: DriverSettings,
    ) -> DriverHandles<P>
    where
        P: Provider,
    {
        let cancel = CancellationToken::new();
        let batch = settings.batch.max(1);

        let ingest =
            tokio::spawn(Self::ingest_task(provider, pool.clone(), status, batch, cancel.clone()));
        let process = tokio::spawn(Self::process_task(pipeline, pool, sink, batch));

        DriverHandles { guard: cancel.drop_guard(), ingest, process }
    }

    async fn ingest_task<P>(
        mut provider: P,
        pool: Arc<BufferPool>,
        status: Arc<StatusCounters>,
        batch: usize,
        cancel: CancellationToken,
    ) -> P
    where
        P: Provider,
    {
        info!(batch, "Ingest task started");
        let mut ingest = Ingest::new(pool.clone(), status, batch);
        let mut scratch = vec![0u8; RECV_SCRATCH_LEN];
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Ingest task cancelled");
                    break;
                }
                result = provider.recv(&mut scratch) => result,
            };

            match result {
                Ok(len) => {
                    error_count = 0;
                    ingest.place(&scratch[..len]);

                    // Drain the burst already queued, up to one batch.
                    while ingest.pending() < batch {
                        match provider.try_recv(&mut scratch) {
                            Ok(Some(len)) => ingest.place(&scratch[..len]),
                            Ok(None) => break,
                            Err(e) => {
                                warn!("Receive failed mid-batch: {}", e);
                                break;
                            }
                        }
                    }
                    ingest.commit();
                }
                Err(e) => {
                    // Socket errors are never fatal; back off and keep reading.
                    error_count = error_count.saturating_add(1);
                    error!("Provider error ({} in a row): {}", error_count, e);
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        let (received, placed) = ingest.finish();
        pool.close();
        info!(received, placed, "Ingest task ended");
        provider
    }

    async fn process_task(
        mut pipeline: Pipeline,
        pool: Arc<BufferPool>,
        sink: SharedSink,
        batch: usize,
    ) -> Pipeline {
        info!(attach_id = %pipeline.attach_id(), "Reconstruction task started");
        let mut sink_closed = false;
        let mut frames_processed = 0u64;

        loop {
            pool.wait_ready().await;
            let frames = pool.pop_full(batch);
            if frames.is_empty() {
                if pool.is_closed() {
                    break;
                }
                continue;
            }

            frames_processed += frames.len() as u64;
            let mut pushes = Vec::new();
            let mut slots = Vec::with_capacity(frames.len());
            for frame in frames {
                pushes.extend(pipeline.handle_frame(&frame));
                slots.push(frame.into_slot());
            }
            pool.recycle(slots);
            deliver(&sink, pushes, &mut sink_closed).await;
        }

        deliver(&sink, pipeline.finish(), &mut sink_closed).await;
        info!(frames_processed, "Reconstruction task ended");
        pipeline
    }
}

/// Hand pushes to the sink in order. A closed sink is reported once.
pub(crate) async fn deliver(sink: &SharedSink, pushes: Vec<OutputPacket>, sink_closed: &mut bool) {
    if pushes.is_empty() {
        return;
    }
    let mut sink = sink.lock().await;
    for packet in pushes {
        trace!(samples = packet.samples.len(), eos = packet.eos, "Pushing output");
        if let Err(e) = sink.push(packet).await {
            if !*sink_closed {
                warn!("Output sink rejected a push: {}", e);
                *sink_closed = true;
            }
        }
    }
}

/// Ingestion-side batch state: the slots in hand and the frames filled so far.
struct Ingest {
    pool: Arc<BufferPool>,
    status: Arc<StatusCounters>,
    reserve: usize,
    in_hand: Vec<PacketSlot>,
    filled: Vec<Frame>,
    arrival_index: u64,
    received: u64,
    placed: u64,
}

impl Ingest {
    fn new(pool: Arc<BufferPool>, status: Arc<StatusCounters>, reserve: usize) -> Self {
        let in_hand = pool.take_empty(reserve);
        debug!(in_hand = in_hand.len(), reserve, "Ingest reserve taken");
        Self {
            pool,
            status,
            reserve,
            in_hand,
            filled: Vec::with_capacity(reserve),
            arrival_index: 0,
            received: 0,
            placed: 0,
        }
    }

    fn pending(&self) -> usize {
        self.filled.len()
    }

    /// Validate one datagram and copy it into a slot in hand.
    fn place(&mut self, datagram: &[u8]) {
        self.received += 1;
        self.status.add_received(1);

        let header = match PacketCodec::decode_header(datagram) {
            Ok(header) => header,
            Err(e) => {
                self.status.add_malformed(1);
                debug!("Discarding datagram: {}", e);
                return;
            }
        };

        if self.in_hand.is_empty() {
            self.in_hand = self.pool.take_empty(self.reserve);
        }
        let Some(mut slot) = self.in_hand.pop() else {
            trace!(fsn = header.fsn, "No empty slot; datagram dropped");
            return;
        };
        slot[..].copy_from_slice(datagram);
        self.filled.push(Frame::new(header, slot, self.arrival_index));
        self.arrival_index += 1;
        self.placed += 1;
    }

    /// Queue filled frames for reconstruction and top the reserve back up.
    fn commit(&mut self) {
        self.pool.push_full(std::mem::take(&mut self.filled));
        let missing = self.reserve.saturating_sub(self.in_hand.len());
        if missing > 0 {
            self.in_hand.extend(self.pool.take_empty(missing));
        }
    }

    fn finish(mut self) -> (u64, u64) {
        self.commit();
        self.pool.recycle(std::mem::take(&mut self.in_hand));
        (self.received, self.placed)
    }
}
