//! Edge inference client binary.
//!
//! Wires the protocol client, feeder, and ingester together and drives
//! them against a real TCP socket. The capture source itself is an
//! external collaborator; this binary accepts frames over an internal
//! channel that an embedding capture pipeline is expected to feed. When
//! run with `--demo`, a synthetic NV12 frame generator stands in for that
//! pipeline so the binary is runnable end-to-end without one.

use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use edgeinfer_client::connection::ConnectionAction;
use edgeinfer_client::feeder::{CaptureMeta, FeederAction};
use edgeinfer_client::transport::{read_envelope, write_envelope, Backoff};
use edgeinfer_client::{ClientConfig, Feeder, ProtocolClient};
use edgeinfer_core::{Environment, FrameCache, SystemEnv};
use edgeinfer_proto::{CodecKind, EnvelopeBody, PixelFormat, PlaneDescriptor};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Edge-side AI inference client.
#[derive(Parser, Debug)]
#[command(name = "edgeinfer", version, about)]
struct Args {
    /// Address of the inference worker, e.g. `127.0.0.1:9443`.
    #[arg(long)]
    worker: String,

    /// Model identifier the worker should load.
    #[arg(long, default_value = "yolov8s")]
    model: String,

    /// Target frame width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Target frame height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Max inflight frames hint sent in `Init`.
    #[arg(long, default_value_t = 4)]
    max_inflight: u32,

    /// Base URL of the ingest sink.
    #[arg(long, default_value = "http://localhost:8080")]
    ingest_base_url: String,

    /// Recording/session correlation id threaded through ingest payloads.
    #[arg(long, default_value = "session-1")]
    session_id: String,

    /// Runs a synthetic frame generator instead of waiting for an embedded
    /// capture pipeline.
    #[arg(long)]
    demo: bool,

    /// Log verbosity, e.g. `info`, `debug`, `edgeinfer_client=trace`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig {
        model: args.model,
        width: args.width,
        height: args.height,
        max_inflight: args.max_inflight,
        pixel_format: PixelFormat::Nv12,
        ingest_base_url: args.ingest_base_url.clone(),
        ..ClientConfig::default()
    };

    let (frame_tx, mut frame_rx) = mpsc::channel::<(Bytes, CaptureMeta)>(8);
    if args.demo {
        tokio::spawn(synthetic_frame_source(frame_tx, config.width, config.height));
    }

    let env = SystemEnv;
    let cache = FrameCache::new(env, config.cache_ttl);
    #[cfg(feature = "ingest")]
    let ingester = edgeinfer_client::Ingester::new(edgeinfer_client::IngesterConfig {
        base_url: args.ingest_base_url,
        request_timeout: Duration::from_secs(5),
    });

    let mut backoff = Backoff::new();
    loop {
        tracing::info!(worker = %args.worker, model = %config.model, "connecting");
        match TcpStream::connect(&args.worker).await {
            Ok(mut stream) => {
                backoff.reset();
                // A fresh protocol client and feeder per connection attempt:
                // both are Sans-IO state machines scoped to one connection's
                // handshake/window/pending-frame state, never reused across
                // a reconnect (the shared frame cache is the one exception,
                // since its entries are keyed and TTL-expired independently).
                let mut protocol = ProtocolClient::new(env, config.connection_config());
                let mut feeder =
                    Feeder::new(cache.clone(), config.capabilities(), args.session_id.clone());

                let now = env.now();
                for action in protocol.connect(now, config.capabilities())? {
                    execute_connection_action(&mut stream, action).await?;
                }
                feeder.set_stream_id(protocol.stream_id().to_string());

                let result = run_connection(
                    &mut stream,
                    &mut protocol,
                    &mut feeder,
                    &mut frame_rx,
                    #[cfg(feature = "ingest")]
                    &ingester,
                )
                .await;
                if let Err(err) = result {
                    tracing::warn!(error = %err, "connection ended");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "connect failed");
            }
        }
        let delay = backoff.next_delay(rand_unit());
        tokio::time::sleep(delay).await;
    }
}

async fn run_connection(
    stream: &mut TcpStream,
    protocol: &mut ProtocolClient<SystemEnv>,
    feeder: &mut Feeder<SystemEnv>,
    frame_rx: &mut mpsc::Receiver<(Bytes, CaptureMeta)>,
    #[cfg(feature = "ingest")] ingester: &edgeinfer_client::Ingester,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            envelope = read_envelope(stream) => {
                let envelope = envelope?;
                let now = SystemEnv.now();
                for action in protocol.handle_envelope(envelope, now)? {
                    handle_connection_action(stream, protocol, feeder, action, now, #[cfg(feature = "ingest")] ingester).await?;
                }
            }
            Some((data, meta)) = frame_rx.recv() => {
                let now = SystemEnv.now();
                for action in feeder.handle_frame(data, meta, now)? {
                    handle_feeder_action(stream, protocol, action, now, #[cfg(feature = "ingest")] ingester).await?;
                }
            }
            _ = tick.tick() => {
                let now = SystemEnv.now();
                for action in protocol.tick(now) {
                    execute_connection_action(stream, action).await?;
                }
            }
        }
    }
}

/// Signals that a [`ConnectionAction::Close`] unwound the connection loop;
/// the outer reconnect loop in `main` treats this like any other transport
/// error and retries with backoff.
#[derive(Debug)]
struct ConnectionClosed(String);

impl std::fmt::Display for ConnectionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection closed: {}", self.0)
    }
}

impl std::error::Error for ConnectionClosed {}

async fn handle_connection_action(
    stream: &mut TcpStream,
    protocol: &mut ProtocolClient<SystemEnv>,
    feeder: &mut Feeder<SystemEnv>,
    action: ConnectionAction,
    now: <SystemEnv as edgeinfer_core::Environment>::Instant,
    #[cfg(feature = "ingest")] ingester: &edgeinfer_client::Ingester,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConnectionAction::Send(envelope) => write_envelope(stream, &envelope).await?,
        ConnectionAction::Close { reason } => {
            tracing::warn!(%reason, "connection closing");
            return Err(Box::new(ConnectionClosed(reason)));
        }
        ConnectionAction::Deliver(body) => {
            let actions = match body {
                EnvelopeBody::InitOk(init_ok) => {
                    feeder.handle_init_ok(&init_ok);
                    Vec::new()
                }
                EnvelopeBody::WindowUpdate(update) => feeder.handle_window_update(update, now)?,
                EnvelopeBody::Result(result) => feeder.handle_result(result, now)?,
                EnvelopeBody::Error(error) => match feeder.handle_error(error, now) {
                    Ok(actions) => actions,
                    Err(err) => {
                        tracing::error!(error = %err, "fatal feeder error");
                        Vec::new()
                    }
                },
                _ => Vec::new(),
            };
            for action in actions {
                handle_feeder_action(stream, protocol, action, now, #[cfg(feature = "ingest")] ingester).await?;
            }
        }
    }
    Ok(())
}

async fn handle_feeder_action(
    stream: &mut TcpStream,
    protocol: &mut ProtocolClient<SystemEnv>,
    action: FeederAction,
    now: <SystemEnv as edgeinfer_core::Environment>::Instant,
    #[cfg(feature = "ingest")] ingester: &edgeinfer_client::Ingester,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        FeederAction::SendFrame(envelope) => {
            let frame_id = match &envelope.body {
                EnvelopeBody::Frame(frame) => frame.frame_id,
                _ => 0,
            };
            for action in protocol.send_frame(envelope, frame_id)? {
                execute_connection_action(stream, action).await?;
            }
        }
        FeederAction::Renegotiate(capabilities) => {
            for action in protocol.renegotiate(now, capabilities)? {
                execute_connection_action(stream, action).await?;
            }
        }
        FeederAction::DispatchIngest(job) => {
            #[cfg(feature = "ingest")]
            {
                let ingester = ingester.clone();
                tokio::spawn(async move {
                    if let Err(err) = ingester.ingest(job).await {
                        tracing::warn!(error = %err, "ingest failed");
                    }
                });
            }
            #[cfg(not(feature = "ingest"))]
            {
                let _ = job;
            }
        }
    }
    Ok(())
}

async fn execute_connection_action(
    stream: &mut TcpStream,
    action: ConnectionAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConnectionAction::Send(envelope) => write_envelope(stream, &envelope).await?,
        ConnectionAction::Close { reason } => {
            tracing::warn!(%reason, "connection closing");
            return Err(Box::new(ConnectionClosed(reason)));
        }
        ConnectionAction::Deliver(_) => {}
    }
    Ok(())
}

async fn synthetic_frame_source(tx: mpsc::Sender<(Bytes, CaptureMeta)>, width: u32, height: u32) {
    let y_size = (width * height) as usize;
    let uv_size = y_size / 2;
    let mut interval = tokio::time::interval(Duration::from_millis(33));
    loop {
        interval.tick().await;
        let data = Bytes::from(vec![128u8; y_size + uv_size]);
        let meta = CaptureMeta {
            width,
            height,
            pixel_format: PixelFormat::Nv12,
            codec: CodecKind::None,
            planes: vec![
                PlaneDescriptor { stride: width, offset: 0, size: y_size as u32 },
                PlaneDescriptor { stride: width, offset: y_size as u32, size: uv_size as u32 },
            ],
            mono_ns: 0,
            pts_ns: 0,
            wall_ns: 0,
            keyframe: true,
            color_space: "bt709".to_string(),
            color_range: "limited".to_string(),
        };
        if tx.send((data, meta)).await.is_err() {
            return;
        }
    }
}

#[allow(clippy::expect_used, reason = "OS RNG failure is unrecoverable")]
fn rand_unit() -> f64 {
    let mut buf = [0u8; 8];
    getrandom::fill(&mut buf).expect("invariant: OS RNG failure is unrecoverable");
    (u64::from_le_bytes(buf) as f64) / (u64::MAX as f64)
}
