//! Analysis progress stream.
//!
//! The orchestrator is the only producer: it owns a [`ProgressSink`] and the
//! consumer owns the matching [`ProgressStream`]. The channel is bounded, so
//! a slow consumer applies backpressure to the pipeline. A sink bound to a
//! [`RunContext`] stops waiting on a lagging consumer once the run is
//! cancelled or past its deadline, and the terminal `error` send waits at
//! most [`TERMINAL_SEND_TIMEOUT`]. Terminal events
//! (`complete`, `error`) consume the sink, which closes the channel; a run
//! therefore ends with exactly one terminal event.
//!
//! Wire format, one JSON object per line:
//!
//! ```json
//! {"type":"progress","stage":"map","progress":42,"message":"…","data":null,"timestamp":"2026-01-01T00:00:00.000000Z"}
//! ```

use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::context::RunContext;
use crate::error::PipelineError;

/// Upper bound on delivering the terminal `error` event to a stalled consumer.
pub const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Data,
    Warning,
    Complete,
    Error,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete | EventKind::Error)
    }
}

/// Classification carried in the `data` of an `error` event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Cancelled,
    Input,
    Internal,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub stage: String,
    pub progress: u8,
    pub message: String,
    pub data: Option<Value>,
    #[serde(serialize_with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
}

fn rfc3339_micros<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

impl ProgressEvent {
    /// One NDJSON line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

/// Create a bounded progress channel.
pub fn channel(capacity: usize) -> (ProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressSink {
            tx,
            last_progress: 0,
            last_timestamp: None,
            ctx: None,
        },
        ProgressStream { rx },
    )
}

/// Write side of the bus. Not `Clone`: there is exactly one producer.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    last_progress: u8,
    last_timestamp: Option<DateTime<Utc>>,
    ctx: Option<RunContext>,
}

impl ProgressSink {
    /// Bound every send by `ctx`: a send blocked on a full channel fails
    /// with [`PipelineError::Cancelled`] once `ctx` is done.
    pub fn bind(mut self, ctx: &RunContext) -> Self {
        self.ctx = Some(ctx.clone());
        self
    }

    /// Progress of the last emitted event.
    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }

    /// True once the consumer has dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn stamp(&mut self, progress: u8) -> (u8, DateTime<Utc>) {
        let progress = progress.min(100).max(self.last_progress);
        self.last_progress = progress;
        let mut ts = Utc::now();
        if let Some(last) = self.last_timestamp {
            if ts <= last {
                ts = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_timestamp = Some(ts);
        (progress, ts)
    }

    fn event(
        &mut self,
        kind: EventKind,
        stage: &str,
        progress: u8,
        message: String,
        data: Option<Value>,
    ) -> ProgressEvent {
        let (progress, timestamp) = self.stamp(progress);
        ProgressEvent {
            kind,
            stage: stage.to_string(),
            progress,
            message,
            data,
            timestamp,
        }
    }

    async fn emit(
        &mut self,
        kind: EventKind,
        stage: &str,
        progress: u8,
        message: String,
        data: Option<Value>,
    ) -> Result<(), PipelineError> {
        let event = self.event(kind, stage, progress, message, data);
        let sent = match &self.ctx {
            Some(ctx) => tokio::select! {
                biased;
                sent = self.tx.send(event) => sent,
                _ = ctx.cancelled() => return Err(PipelineError::Cancelled),
            },
            None => self.tx.send(event).await,
        };
        sent.map_err(|_| PipelineError::ProgressClosed)
    }

    pub async fn progress(
        &mut self,
        stage: &str,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<(), PipelineError> {
        self.emit(EventKind::Progress, stage, progress, message.into(), None)
            .await
    }

    pub async fn data(
        &mut self,
        stage: &str,
        progress: u8,
        message: impl Into<String>,
        data: Value,
    ) -> Result<(), PipelineError> {
        self.emit(EventKind::Data, stage, progress, message.into(), Some(data))
            .await
    }

    pub async fn warning(
        &mut self,
        stage: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), PipelineError> {
        let progress = self.last_progress;
        self.emit(EventKind::Warning, stage, progress, message.into(), data)
            .await
    }

    /// Emit the terminal `complete` event and close the channel.
    pub async fn complete(mut self, data: Value) -> Result<(), PipelineError> {
        self.emit(
            EventKind::Complete,
            "complete",
            100,
            "analysis complete".to_string(),
            Some(data),
        )
        .await
    }

    /// Emit the terminal `error` event and close the channel. The run is
    /// usually already cancelled here, so the send is bounded by
    /// [`TERMINAL_SEND_TIMEOUT`] instead of the context.
    pub async fn error(
        mut self,
        stage: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), PipelineError> {
        let progress = self.last_progress;
        let event = self.event(
            EventKind::Error,
            stage,
            progress,
            message.into(),
            Some(serde_json::json!({ "kind": kind })),
        );
        match self.tx.send_timeout(event, TERMINAL_SEND_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(PipelineError::Cancelled),
            Err(SendTimeoutError::Closed(_)) => Err(PipelineError::ProgressClosed),
        }
    }
}

/// Read side of the bus.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, `None` once the producer finished.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn into_inner(self) -> mpsc::Receiver<ProgressEvent> {
        self.rx
    }

    /// Drain every remaining event.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// Renders events for a user. Implementations write to stdout or stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: "[ 42%] map        12 / 30 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let marker = match event.kind {
            EventKind::Warning => "warn ",
            EventKind::Error => "error",
            _ => "",
        };
        let line = format!(
            "[{:>3}%] {:<10} {}{}\n",
            event.progress,
            event.stage,
            if marker.is_empty() {
                String::new()
            } else {
                format!("{}: ", marker)
            },
            event.message
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: the NDJSON wire format on stdout.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(event.to_line().as_bytes());
        let _ = out.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or NDJSON (stdout).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_is_clamped_monotonic() {
        let (mut sink, stream) = channel(16);
        sink.progress("a", 30, "x").await.unwrap();
        sink.progress("b", 10, "y").await.unwrap();
        sink.progress("c", 250, "z").await.unwrap();
        sink.complete(Value::Null).await.unwrap();

        let events = stream.collect().await;
        let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![30, 30, 100, 100]);
        for pair in events.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn error_event_carries_kind() {
        let (mut sink, stream) = channel(4);
        sink.progress("map", 20, "working").await.unwrap();
        sink.error("map", ErrorKind::Cancelled, "deadline").await.unwrap();
        let events = stream.collect().await;
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.progress, 20);
        assert_eq!(last.data.as_ref().unwrap()["kind"], "cancelled");
    }

    #[tokio::test]
    async fn wire_line_shape() {
        let (mut sink, mut stream) = channel(4);
        sink.warning("folders", "skipped src", None).await.unwrap();
        let event = stream.recv().await.unwrap();
        let line = event.to_line();
        assert!(line.ends_with('\n'));
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["type"], "warning");
        assert_eq!(v["stage"], "folders");
        assert!(v["data"].is_null());
        assert!(DateTime::parse_from_rfc3339(v["timestamp"].as_str().unwrap()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn bound_sink_gives_up_on_a_stalled_consumer() {
        let ctx = RunContext::with_timeout(
            tokio_util::sync::CancellationToken::new(),
            Duration::from_millis(200),
        );
        let (sink, _stream) = channel(1);
        let mut sink = sink.bind(&ctx);
        sink.progress("map", 10, "fills the buffer").await.unwrap();
        assert!(matches!(
            sink.progress("map", 20, "blocks").await,
            Err(PipelineError::Cancelled)
        ));

        let started = tokio::time::Instant::now();
        assert!(matches!(
            sink.error("map", ErrorKind::Cancelled, "deadline").await,
            Err(PipelineError::Cancelled)
        ));
        assert!(started.elapsed() <= TERMINAL_SEND_TIMEOUT + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn send_fails_once_consumer_dropped() {
        let (mut sink, stream) = channel(1);
        drop(stream);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.progress("a", 1, "x").await,
            Err(PipelineError::ProgressClosed)
        ));
    }
}
