use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::stage::StageEvent;
use super::tracker::StageTracker;
use super::StreamError;

pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Producer half. Records are checked for ordering before they are sent.
/// A sink without a receiver still enforces ordering and keeps the records
/// it accepted.
#[derive(Debug)]
pub struct StageSink {
    sender: Option<mpsc::Sender<StageEvent>>,
    tracker: StageTracker,
    last: Option<StageEvent>,
}

impl StageSink {
    /// A sink that delivers nowhere.
    pub fn detached() -> Self {
        Self {
            sender: None,
            tracker: StageTracker::new(),
            last: None,
        }
    }

    pub async fn emit(&mut self, event: StageEvent) -> Result<(), StreamError> {
        self.tracker.accept(event.stage)?;
        self.last = Some(event.clone());

        if let Some(sender) = &self.sender {
            if sender.send(event).await.is_err() {
                // Caller went away; the run carries on without an audience.
                debug!("Stage stream receiver dropped");
                self.sender = None;
            }
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.tracker.is_finished()
    }

    pub fn last_event(&self) -> Option<&StageEvent> {
        self.last.as_ref()
    }
}

/// Consumer half of a stage stream.
#[derive(Debug)]
pub struct StageStream {
    receiver: mpsc::Receiver<StageEvent>,
}

impl Stream for StageStream {
    type Item = StageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub fn channel(capacity: usize) -> (StageSink, StageStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        StageSink {
            sender: Some(sender),
            tracker: StageTracker::new(),
            last: None,
        },
        StageStream { receiver },
    )
}

/// Write each record as one JSON line, flushing after every record so a
/// reader sees progress as it happens. Returns the number of records written.
pub async fn write_ndjson<S, W>(mut stream: S, writer: &mut W) -> Result<usize, StreamError>
where
    S: Stream<Item = StageEvent> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = stream.next().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ItemId;
    use crate::events::Stage;
    use crate::runs::{AgentKind, RunRecord};
    use chrono::Utc;

    #[tokio::test]
    async fn test_ndjson_lines_arrive_in_order() {
        let run = RunRecord::new(ItemId::from("0003"), AgentKind::Implementation, "go", "cli", Utc::now());
        let (mut sink, stream) = channel(8);

        let producer = tokio::spawn(async move {
            for stage in [Stage::Preparing, Stage::Launching, Stage::Running, Stage::Completed] {
                sink.emit(StageEvent::for_run(&run, stage)).await.unwrap();
            }
        });

        let mut out = Vec::new();
        let written = write_ndjson(stream, &mut out).await.unwrap();
        producer.await.unwrap();

        assert_eq!(written, 4);
        let stages: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["stage"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(stages, ["preparing", "launching", "running", "completed"]);
    }

    #[tokio::test]
    async fn test_detached_sink_still_enforces_order() {
        let run = RunRecord::new(ItemId::from("0003"), AgentKind::Qa, "go", "cli", Utc::now());
        let mut sink = StageSink::detached();
        sink.emit(StageEvent::for_run(&run, Stage::Failed)).await.unwrap();
        assert!(sink.is_finished());
        assert!(sink
            .emit(StageEvent::for_run(&run, Stage::Completed))
            .await
            .is_err());
        assert_eq!(sink.last_event().unwrap().stage, Stage::Failed);
    }
}
