//! Per-station outbound queue and the writer loop draining it into the socket.

use std::{fmt::Display, sync::Arc};

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{dto::station::StationCommand, error::ChannelError, state::station::LatencyGauge};

/// Unbounded FIFO queue of frames for a single station.
///
/// Enqueueing never blocks; frames are delivered in enqueue order by the writer
/// task spawned with [`spawn_writer`]. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    tx: mpsc::UnboundedSender<Message>,
}

impl CommandChannel {
    /// Create a channel and the receiving end to hand to [`spawn_writer`].
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Serialize a command and queue it for delivery.
    pub fn enqueue(&self, command: &StationCommand) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(command)?;
        self.control(Message::Text(payload.into()))
    }

    /// Queue a raw frame (ping, pong, close).
    pub fn control(&self, message: Message) -> Result<(), ChannelError> {
        self.tx.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// Drain `outbound` into `sink` one frame at a time.
///
/// Pings are reported to `latency` once written, so queued commands ahead of
/// them do not count as network delay. The loop ends when every
/// [`CommandChannel`] clone is dropped or the sink fails; callers tearing a
/// connection down abort the returned handle instead of waiting, so a frame is
/// sent at most once.
pub fn spawn_writer<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    latency: Arc<LatencyGauge>,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let ping = matches!(message, Message::Ping(_));
            if let Err(err) = sink.send(message).await {
                warn!(error = %err, "station writer failed; dropping queued commands");
                break;
            }
            if ping {
                latency.ping_written();
            }
        }
        debug!("station writer finished");
    })
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;
    use futures::{StreamExt, channel::mpsc as futures_mpsc};
    use time::OffsetDateTime;

    use super::*;
    use crate::dto::station::{CommandKind, Pattern, Timestamp};

    fn command(n: u8) -> StationCommand {
        StationCommand::light(
            CommandKind::ButtonLed,
            Pattern::Rgb([n, 0, 0]),
            Timestamp(OffsetDateTime::UNIX_EPOCH),
        )
    }

    #[tokio::test]
    async fn delivers_commands_in_enqueue_order() {
        let (channel, outbound) = CommandChannel::new();
        let (sink, mut delivered) = futures_mpsc::unbounded::<Message>();
        let writer = spawn_writer(sink, outbound, Arc::default());

        for n in 0..32 {
            channel.enqueue(&command(n)).unwrap();
        }

        for n in 0..32u8 {
            let Some(Message::Text(text)) = delivered.next().await else {
                panic!("expected a text frame");
            };
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["pattern"][0], n);
        }

        drop(channel);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_fails_once_the_writer_is_gone() {
        let (channel, outbound) = CommandChannel::new();
        let (sink, delivered) = futures_mpsc::unbounded::<Message>();
        let writer = spawn_writer(sink, outbound, Arc::default());

        writer.abort();
        let _ = writer.await;
        drop(delivered);

        assert!(matches!(
            channel.enqueue(&command(1)),
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn only_written_pings_start_a_latency_measurement() {
        let (channel, outbound) = CommandChannel::new();
        let (sink, _delivered) = futures_mpsc::unbounded::<Message>();
        let latency = Arc::new(LatencyGauge::default());
        let writer = spawn_writer(sink, outbound, latency.clone());

        channel.enqueue(&command(1)).unwrap();
        channel.control(Message::Ping(Bytes::new())).unwrap();
        drop(channel);
        writer.await.unwrap();

        assert!(latency.pong_received().is_some());
        assert_eq!(latency.pong_received(), None);
    }

    #[tokio::test]
    async fn commands_alone_leave_latency_untouched() {
        let (channel, outbound) = CommandChannel::new();
        let (sink, _delivered) = futures_mpsc::unbounded::<Message>();
        let latency = Arc::new(LatencyGauge::default());
        let writer = spawn_writer(sink, outbound, latency.clone());

        channel.enqueue(&command(1)).unwrap();
        drop(channel);
        writer.await.unwrap();

        assert_eq!(latency.pong_received(), None);
    }
}
