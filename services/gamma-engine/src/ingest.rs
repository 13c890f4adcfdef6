//! Upstream WebSocket ingest
//!
//! Owns the streaming connection: authenticates, subscribes the symbol
//! universe in batches, writes quote updates straight into the quote
//! cache, and enqueues trades onto the bounded channel. Quote writes
//! happen before the next trade enqueue, so the engine never sees a trade
//! ahead of the quote that preceded it on the wire.

use crate::context::EngineContext;
use crate::metrics::EngineMetrics;
use crate::quotes::QuoteUpdate;
use common::{Quote, Trade, Ts};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Ingest failures surfaced to the supervisor
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("authentication rejected after {0} attempts")]
    AuthExhausted(u32),
    #[error("trade channel closed")]
    ChannelClosed,
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wire frames from the upstream stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ev")]
pub enum WireEvent {
    /// Option trade print
    #[serde(rename = "T")]
    Trade(TradeFrame),
    /// NBBO or index quote update
    #[serde(rename = "Q")]
    Quote(QuoteFrame),
    /// Connection / auth / subscription status
    #[serde(rename = "status")]
    Status(StatusFrame),
    /// Anything else on the wire
    #[serde(other)]
    Other,
}

/// Trade event payload
#[derive(Debug, Clone, Deserialize)]
pub struct TradeFrame {
    /// OCC-style symbol
    pub sym: String,
    /// Print price
    pub p: f64,
    /// Contracts
    pub s: u32,
    /// Epoch milliseconds
    pub t: u64,
    /// Exchange-reported aggressor side. Present on some venues; the
    /// classifier deliberately ignores it.
    #[serde(default)]
    pub side: Option<String>,
}

/// Quote event payload
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteFrame {
    /// Symbol, including index symbols such as `I:SPX`
    pub sym: String,
    /// Bid price
    pub bp: f64,
    /// Ask price
    pub ap: f64,
    /// Epoch milliseconds
    pub t: u64,
}

/// Status event payload
#[derive(Debug, Clone, Deserialize)]
pub struct StatusFrame {
    /// Status code, e.g. `connected`, `auth_success`, `auth_failed`
    pub status: String,
    /// Optional human-readable detail
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ActionFrame<'a> {
    action: &'a str,
    params: &'a str,
}

/// Parse one WebSocket text payload into events. The upstream delivers
/// either a JSON array of events or a single object.
#[must_use]
pub fn parse_frames(text: &str) -> Vec<WireEvent> {
    if let Ok(events) = serde_json::from_str::<Vec<WireEvent>>(text) {
        return events;
    }
    match serde_json::from_str::<WireEvent>(text) {
        Ok(event) => vec![event],
        Err(_) => Vec::new(),
    }
}

/// Apply one event against the shared state. Quote events update the
/// cache in place; trade events come back for the channel.
pub fn handle_event(ctx: &EngineContext, event: WireEvent) -> Option<Trade> {
    match event {
        WireEvent::Quote(frame) => {
            let quote = Quote::new(frame.bp, frame.ap, Ts::from_millis(frame.t));
            match ctx.quotes.update(&frame.sym, quote) {
                QuoteUpdate::Crossed => {
                    EngineMetrics::incr(&ctx.metrics.quote_rejected_crossed);
                    warn!("rejected crossed quote for {}", frame.sym);
                }
                QuoteUpdate::Applied | QuoteUpdate::Stale => {}
            }
            None
        }
        WireEvent::Trade(frame) => Some(Trade::new(
            frame.sym,
            frame.p,
            frame.s,
            Ts::from_millis(frame.t),
        )),
        WireEvent::Status(frame) => {
            debug!(
                "upstream status: {} {}",
                frame.status,
                frame.message.unwrap_or_default()
            );
            None
        }
        WireEvent::Other => None,
    }
}

/// WebSocket market feed for one symbol universe
pub struct WsFeed {
    symbols: Vec<String>,
}

impl WsFeed {
    /// Create a feed over the option symbols to subscribe
    #[must_use]
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    /// Connect, authenticate, subscribe and stream until the server
    /// closes, an error occurs, or shutdown is signalled.
    pub async fn run(
        &self,
        ctx: &Arc<EngineContext>,
        tx: &mpsc::Sender<Trade>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let config = &ctx.config;
        info!("connecting to {}", config.ws_url);
        let (ws_stream, _response) = connect_async(config.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        // Auth is a single frame; the server answers with a status event.
        let mut auth_attempts = 0u32;
        loop {
            let auth = serde_json::to_string(&ActionFrame {
                action: "auth",
                params: &config.api_key,
            })?;
            write.send(Message::Text(auth)).await?;

            match wait_for_auth(&mut read).await? {
                AuthResult::Ok => break,
                AuthResult::Rejected => {
                    auth_attempts += 1;
                    if auth_attempts >= config.auth_max_retries {
                        return Err(IngestError::AuthExhausted(auth_attempts));
                    }
                    warn!("auth rejected, retrying ({auth_attempts})");
                }
            }
        }
        info!("authenticated");

        self.subscribe(&mut write, ctx).await?;

        while let Some(message) = tokio::select! {
            msg = read.next() => msg,
            _ = shutdown.changed() => {
                info!("ingest shutting down");
                return Ok(());
            }
        } {
            match message {
                Ok(Message::Text(text)) => {
                    for event in parse_frames(&text) {
                        if let Some(trade) = handle_event(ctx, event) {
                            self.enqueue(ctx, tx, trade).await?;
                        }
                    }
                }
                Ok(Message::Ping(payload)) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Ok(Message::Close(_)) => {
                    info!("server closed the stream");
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => return Err(err.into()),
            }
        }

        info!("stream ended");
        Ok(())
    }

    /// Subscribe trades and quotes for the universe plus the index quote,
    /// in batches with a short inter-batch delay.
    async fn subscribe<S>(&self, write: &mut S, ctx: &EngineContext) -> Result<(), IngestError>
    where
        S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let config = &ctx.config;
        let mut channels: Vec<String> = Vec::with_capacity(self.symbols.len() * 2 + 1);
        channels.push(format!("Q.{}", config.index_symbol));
        for symbol in &self.symbols {
            channels.push(format!("T.{symbol}"));
            channels.push(format!("Q.{symbol}"));
        }

        for batch in channels.chunks(config.subscribe_batch.max(1)) {
            let params = batch.join(",");
            let frame = serde_json::to_string(&ActionFrame {
                action: "subscribe",
                params: &params,
            })?;
            write.send(Message::Text(frame)).await.map_err(IngestError::from)?;
            sleep(Duration::from_millis(config.subscribe_batch_delay_ms)).await;
        }

        info!(
            "subscribed {} channels for {} symbols",
            channels.len(),
            self.symbols.len()
        );
        Ok(())
    }

    /// Send a trade, flagging the engine to shed its backlog when the
    /// channel has been full past the backpressure budget.
    async fn enqueue(
        &self,
        ctx: &Arc<EngineContext>,
        tx: &mpsc::Sender<Trade>,
        trade: Trade,
    ) -> Result<(), IngestError> {
        match tx.send_timeout(trade, ctx.config.backpressure_max()).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(trade)) => {
                warn!("trade channel full past backpressure budget, shedding oldest");
                ctx.shed_backlog
                    .store(true, std::sync::atomic::Ordering::Release);
                tx.send(trade)
                    .await
                    .map_err(|_| IngestError::ChannelClosed)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(IngestError::ChannelClosed),
        }
    }
}

enum AuthResult {
    Ok,
    Rejected,
}

async fn wait_for_auth<S>(read: &mut S) -> Result<AuthResult, IngestError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => {
                for event in parse_frames(&text) {
                    if let WireEvent::Status(status) = event {
                        match status.status.as_str() {
                            "auth_success" => return Ok(AuthResult::Ok),
                            "auth_failed" => return Ok(AuthResult::Rejected),
                            _ => {}
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(AuthResult::Rejected)
}

/// Reconnect supervisor: keeps the feed alive with exponential backoff
/// and jitter, re-subscribing the full universe on every reconnect.
pub async fn run_supervisor(
    ctx: Arc<EngineContext>,
    symbols: Vec<String>,
    tx: mpsc::Sender<Trade>,
    mut shutdown: watch::Receiver<bool>,
) {
    let feed = WsFeed::new(symbols);
    let initial = Duration::from_secs(ctx.config.reconnect_initial_s.max(1));
    let cap = Duration::from_secs(ctx.config.reconnect_cap_s.max(1));
    let mut backoff = initial;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match feed.run(&ctx, &tx, &mut shutdown).await {
            Ok(()) => {
                if *shutdown.borrow() {
                    break;
                }
                // Clean close: the connection worked, start backoff over
                backoff = initial;
            }
            Err(IngestError::ChannelClosed) => {
                info!("trade channel closed, ingest supervisor exiting");
                break;
            }
            Err(IngestError::AuthExhausted(attempts)) => {
                error!("authentication exhausted after {attempts} attempts");
                backoff = cap;
            }
            Err(err) => {
                warn!("ingest error: {err}");
            }
        }

        EngineMetrics::incr(&ctx.metrics.reconnects);
        let delay = with_jitter(backoff);
        info!("reconnecting in {:.1}s", delay.as_secs_f64());
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        backoff = (backoff * 2).min(cap);
    }

    info!("ingest supervisor stopped");
}

/// +/-10% jitter around a delay
fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    delay.mul_f64(factor)
}
