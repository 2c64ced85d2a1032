//! Stream session: the control surface over one SDDS attachment.
//!
//! ```rust,no_run
//! use sdds_source::{EndpointDescriptor, SessionConfig, StreamSession};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> sdds_source::Result<()> {
//!     let (session, mut output) = StreamSession::with_channel(SessionConfig::default())?;
//!     let endpoint = EndpointDescriptor::new(Ipv4Addr::new(239, 1, 1, 1), 29495);
//!
//!     session.attach(endpoint, "operator").await?;
//!     session.start().await?;
//!
//!     while let Some(push) = output.recv().await {
//!         println!("{} samples, eos={}", push.samples.len(), push.eos);
//!     }
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::driver::{Driver, DriverHandles, DriverSettings, SharedSink, deliver};
use crate::net::{EndpointDescriptor, rx_queue_depth};
use crate::output::{OutputReceiver, OutputSink, channel};
use crate::pipeline::Pipeline;
use crate::pool::BufferPool;
use crate::provider::Provider;
use crate::providers::UdpProvider;
use crate::status::{Status, StatusCounters};
use crate::types::Sri;
use crate::{Result, SddsError};


/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No attachment, not started.
    Idle = 0,
    /// Started without an attachment; processing begins on attach.
    Armed = 1,
    /// Attached, never started.
    Attached = 2,
    Running = 3,
    /// Attached and stopped after running.
    Stopped = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Armed,
            2 => Self::Attached,
            3 => Self::Running,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

enum Run {
    Parked { provider: UdpProvider, pipeline: Pipeline, has_run: bool },
    Active(DriverHandles<UdpProvider>),
}

/// Stream id of the pipeline fed by `attachment_override`.
pub const OVERRIDE_STREAM_ID: &str = "attachment_override";

struct Attachment {
    id: String,
    endpoint: EndpointDescriptor,
    local_addr: Option<SocketAddr>,
    /// `None` until the endpoint is bound; attachments recorded under an
    /// override are bound on the first start without one.
    run: Option<Run>,
}

/// The stream bound from `attachment_override` while started.
struct OverrideRun {
    local_addr: Option<SocketAddr>,
    handles: DriverHandles<UdpProvider>,
}

struct Lifecycle {
    config: SessionConfig,
    started: bool,
    attachment: Option<Attachment>,
    overridden: Option<OverrideRun>,
}

/// An SDDS receiver with at most one live attachment.
///
/// Lifecycle operations serialize on an internal async mutex; [`status`]
/// and [`state`] read atomics and never wait.
///
/// [`status`]: StreamSession::status
/// [`state`]: StreamSession::state
pub struct StreamSession {
    lifecycle: Mutex<Lifecycle>,
    state: AtomicU8,
    headroom: AtomicUsize,
    status: Arc<StatusCounters>,
    pool: Arc<BufferPool>,
    sink: SharedSink,
    external_sri: watch::Sender<Option<Arc<Sri>>>,
}

impl StreamSession {
    pub fn new(config: SessionConfig, sink: impl OutputSink) -> Result<Self> {
        config.validate()?;
        let (external_sri, _) = watch::channel(None);
        let status = Arc::new(StatusCounters::new());
        status.set_endianness(config.endianness);

        Ok(Self {
            headroom: AtomicUsize::new(config.buffer_headroom()),
            lifecycle: Mutex::new(Lifecycle {
                config,
                started: false,
                attachment: None,
                overridden: None,
            }),
            state: AtomicU8::new(SessionState::Idle as u8),
            status,
            pool: Arc::new(BufferPool::new()),
            sink: Arc::new(Mutex::new(Box::new(sink))),
            external_sri,
        })
    }

    /// A session whose pushes arrive on the returned receiver.
    pub fn with_channel(config: SessionConfig) -> Result<(Self, OutputReceiver)> {
        let (sink, receiver) = channel();
        Ok((Self::new(config, sink)?, receiver))
    }

    /// Bind the endpoint and create the attachment. Returns the attach id.
    ///
    /// Fails with [`SddsError::AlreadyAttached`] while another attachment is
    /// live; that attachment is left alone. If the session is started, data
    /// flows as soon as this returns. With `attachment_override` enabled the
    /// attachment is only recorded and the overriding stream is untouched.
    pub async fn attach(&self, endpoint: EndpointDescriptor, user_id: &str) -> Result<String> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(existing) = &lifecycle.attachment {
            warn!(existing = %existing.id, "Attach rejected: already attached");
            return Err(SddsError::already_attached(existing.id.clone()));
        }

        let id = if endpoint.stream_id.is_empty() {
            generate_attach_id()
        } else {
            endpoint.stream_id.clone()
        };

        if lifecycle.config.attachment_override.enabled {
            info!(
                attach_id = %id,
                user_id,
                port = endpoint.port,
                "Attach recorded; attachment override in effect"
            );
            lifecycle.attachment =
                Some(Attachment { id: id.clone(), endpoint, local_addr: None, run: None });
            self.sync_state(&lifecycle);
            return Ok(id);
        }

        let (provider, pipeline) = self.open(&id, &endpoint, &lifecycle.config)?;
        let local_addr = provider.local_addr();

        info!(
            attach_id = %id,
            user_id,
            address = %endpoint.address,
            port = endpoint.port,
            multicast = endpoint.is_multicast(),
            "Attached"
        );

        lifecycle.attachment = Some(Attachment {
            id: id.clone(),
            endpoint,
            local_addr,
            run: Some(Run::Parked { provider, pipeline, has_run: false }),
        });

        if lifecycle.started {
            self.spawn(&mut lifecycle)?;
        }
        self.sync_state(&lifecycle);
        Ok(id)
    }

    /// Tear the attachment down: stop ingestion, flush, end the stream and
    /// release the socket. The external SRI is cleared.
    ///
    /// An end-of-stream push is always emitted, even when the attachment was
    /// stopped or never started. Attachments recorded under an override have
    /// no stream of their own and end nothing.
    pub async fn detach(&self, attach_id: &str) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let current = match &lifecycle.attachment {
            Some(attachment) => attachment.id.clone(),
            None => return Err(SddsError::NotAttached),
        };
        if current != attach_id {
            return Err(SddsError::UnknownAttachment {
                requested: attach_id.to_string(),
                current: Some(current),
            });
        }

        if let Some(mut attachment) = lifecycle.attachment.take() {
            match attachment.run.take() {
                Some(Run::Active(handles)) => {
                    handles.shutdown().await;
                    self.pool.shutdown();
                }
                Some(Run::Parked { mut pipeline, .. }) => {
                    deliver(&self.sink, pipeline.finish(), &mut false).await;
                }
                None => {}
            }
            info!(attach_id = %attachment.id, address = %attachment.endpoint.address, "Detached");
        }

        self.external_sri.send_replace(None);
        if lifecycle.overridden.is_none() {
            self.status.set_socket(None, 0);
        }
        self.sync_state(&lifecycle);
        Ok(())
    }

    /// Begin processing. Idempotent; without an attachment the session waits
    /// for one, unless `attachment_override` names an endpoint to bind.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.started {
            debug!("Start ignored: already started");
            return Ok(());
        }
        if lifecycle.config.attachment_override.enabled {
            self.start_override(&mut lifecycle)?;
        } else {
            self.spawn(&mut lifecycle)?;
        }
        lifecycle.started = true;
        info!("Session started");
        self.sync_state(&lifecycle);
        Ok(())
    }

    /// Stop processing, flush and end the stream. The attachment and its
    /// socket are kept; datagrams arriving meanwhile are discarded on restart.
    /// An overriding stream is closed and rebound on the next start.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.started {
            debug!("Stop ignored: not started");
            return Ok(());
        }
        lifecycle.started = false;

        if let Some(overridden) = lifecycle.overridden.take() {
            overridden.handles.shutdown().await;
            self.pool.shutdown();
            self.status.set_socket(None, 0);
            info!("Attachment override stream closed");
        }

        let mut lost = false;
        if let Some(attachment) = lifecycle.attachment.as_mut() {
            if let Some(Run::Active(handles)) = attachment.run.take() {
                let stopped = handles.shutdown().await;
                self.pool.shutdown();
                match (stopped.provider, stopped.pipeline) {
                    (Some(provider), Some(pipeline)) => {
                        attachment.run = Some(Run::Parked { provider, pipeline, has_run: true });
                    }
                    _ => lost = true,
                }
            }
        }
        if lost {
            if let Some(attachment) = lifecycle.attachment.take() {
                warn!(
                    attach_id = %attachment.id,
                    "Attachment lost after a task failure; attach again"
                );
            }
            self.status.set_socket(None, 0);
        }

        info!("Session stopped");
        self.sync_state(&lifecycle);
        Ok(())
    }

    /// Replace the external SRI. Applies from the next frame on.
    pub fn push_external_sri(&self, sri: Sri) {
        debug!(stream_id = %sri.stream_id, keywords = sri.keywords.len(), "External SRI pushed");
        self.external_sri.send_replace(Some(Arc::new(sri)));
    }

    /// Replace the configuration.
    ///
    /// While running, fields that shape the pipeline cannot change. Socket
    /// settings take effect on the next attach; push settings on the next
    /// start.
    pub async fn configure(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Running {
            if let Some(field) = lifecycle.config.locked_difference(&config) {
                return Err(SddsError::config(field, "cannot change while running"));
            }
        }
        if lifecycle.started && lifecycle.config.attachment_override != config.attachment_override {
            return Err(SddsError::config("attachment_override", "cannot change while started"));
        }

        debug!(?config, "Configuration updated");
        self.headroom.store(config.buffer_headroom(), Ordering::Release);
        if lifecycle.attachment.is_none() {
            self.status.set_endianness(config.endianness);
        }
        lifecycle.config = config;
        Ok(())
    }

    pub async fn config(&self) -> SessionConfig {
        self.lifecycle.lock().await.config.clone()
    }

    /// Snapshot the counters without waiting on the lifecycle lock.
    pub fn status(&self) -> Status {
        let running = self.state() == SessionState::Running;
        let empty = if running {
            self.pool.empty_available()
        } else {
            self.headroom.load(Ordering::Acquire)
        };
        let to_work = if running { self.pool.full_pending() } else { 0 };
        let queue_depth = self.status.local_port().map_or(0, rx_queue_depth);
        self.status.snapshot(empty, to_work, queue_depth)
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Address the receiving socket is bound to: the overriding stream's
    /// while one runs, the attachment's otherwise.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let lifecycle = self.lifecycle.lock().await;
        if let Some(overridden) = &lifecycle.overridden {
            return overridden.local_addr;
        }
        lifecycle.attachment.as_ref()?.local_addr
    }

    pub async fn attach_id(&self) -> Option<String> {
        self.lifecycle.lock().await.attachment.as_ref().map(|a| a.id.clone())
    }

    /// Bind `endpoint` and build a fresh pipeline; stream counters restart.
    fn open(
        &self,
        stream_id: &str,
        endpoint: &EndpointDescriptor,
        config: &SessionConfig,
    ) -> Result<(UdpProvider, Pipeline)> {
        let provider = UdpProvider::bind(endpoint, config)?;
        self.status.reset_stream();
        self.status.set_socket(
            provider.local_addr().map(|addr| addr.port()),
            provider.socket_buffer_size().unwrap_or(0),
        );
        let pipeline =
            Pipeline::new(stream_id, config, self.external_sri.subscribe(), self.status.clone());
        Ok((provider, pipeline))
    }

    /// Prepare the pool and run the tasks.
    fn launch(
        &self,
        provider: UdpProvider,
        mut pipeline: Pipeline,
        config: &SessionConfig,
    ) -> DriverHandles<UdpProvider> {
        pipeline.resume(config);
        self.pool.initialize(config.buffer_size);
        Driver::spawn(
            provider,
            pipeline,
            self.pool.clone(),
            self.sink.clone(),
            self.status.clone(),
            DriverSettings { batch: config.pkts_per_socket_read },
        )
    }

    /// Start the tasks for the attachment, binding it first if needed.
    fn spawn(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let config = lifecycle.config.clone();
        let Some(attachment) = lifecycle.attachment.as_mut() else {
            return Ok(());
        };

        let (mut provider, pipeline, has_run) = match attachment.run.take() {
            Some(Run::Parked { provider, pipeline, has_run }) => (provider, pipeline, has_run),
            Some(active @ Run::Active(_)) => {
                attachment.run = Some(active);
                return Ok(());
            }
            None => {
                let (provider, pipeline) =
                    self.open(&attachment.id, &attachment.endpoint, &config)?;
                attachment.local_addr = provider.local_addr();
                (provider, pipeline, false)
            }
        };

        if has_run {
            let discarded = provider.discard_pending();
            debug!(discarded, "Discarded datagrams queued while stopped");
        }
        attachment.run = Some(Run::Active(self.launch(provider, pipeline, &config)));
        info!(attach_id = %attachment.id, "Pipeline running");
        Ok(())
    }

    /// Bind the configured override endpoint and run a fresh pipeline on it.
    fn start_override(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let overriding = &lifecycle.config.attachment_override;
        let endpoint = overriding.endpoint();
        let config =
            SessionConfig { endianness: overriding.endianness, ..lifecycle.config.clone() };

        let (provider, pipeline) = self.open(OVERRIDE_STREAM_ID, &endpoint, &config)?;
        let local_addr = provider.local_addr();
        let handles = self.launch(provider, pipeline, &config);
        info!(
            address = %endpoint.address,
            port = endpoint.port,
            vlan = endpoint.vlan,
            "Attachment override stream running"
        );
        lifecycle.overridden = Some(OverrideRun { local_addr, handles });
        Ok(())
    }

    fn sync_state(&self, lifecycle: &Lifecycle) {
        if lifecycle.overridden.is_some() {
            self.state.store(SessionState::Running as u8, Ordering::Release);
            return;
        }
        let state = match (&lifecycle.attachment, lifecycle.started) {
            (None, false) => SessionState::Idle,
            (None, true) => SessionState::Armed,
            (Some(a), _) => match &a.run {
                Some(Run::Active(_)) => SessionState::Running,
                Some(Run::Parked { has_run: true, .. }) => SessionState::Stopped,
                _ => SessionState::Attached,
            },
        };
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Unique id for attachments whose endpoint carries no stream id.
fn generate_attach_id() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
    format!("sdds-{nanos:x}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}
