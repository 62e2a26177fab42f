//! Per-connection state: conversation history plus at most one active turn.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use llm_core::{ConversationState, Turn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TurnError;
use crate::metrics::PipelineMetrics;
use crate::orchestrator::{spawn_turn, Backends, TurnEvent};
use crate::protocol::{ClientCommand, ServerMessage};

struct ActiveTurn {
    cancel: CancellationToken,
    events: mpsc::Receiver<TurnEvent>,
}

impl ActiveTurn {
    /// Signal the turn and stop listening to it; its remaining output is
    /// never forwarded.
    fn cancel(self) {
        self.cancel.cancel();
    }
}

pub struct ConnectionSession {
    backends: Arc<Backends>,
    metrics: Arc<PipelineMetrics>,
    conversation: ConversationState,
    history_limit: usize,
    active: Option<ActiveTurn>,
}

impl ConnectionSession {
    pub fn new(
        backends: Arc<Backends>,
        metrics: Arc<PipelineMetrics>,
        system_prompt: impl Into<String>,
        history_limit: usize,
    ) -> Self {
        Self {
            backends,
            metrics,
            conversation: ConversationState::new(system_prompt),
            history_limit,
            active: None,
        }
    }

    /// Serve one connection until the inbound side ends or the outbound side
    /// fails. Any active turn is cancelled on the way out.
    pub async fn run<O, I>(mut self, mut outbound: O, mut inbound: I) -> anyhow::Result<()>
    where
        O: Sink<String> + Unpin,
        O::Error: Display,
        I: Stream<Item = String> + Unpin,
    {
        let result = self.serve(&mut outbound, &mut inbound).await;
        if let Some(turn) = self.active.take() {
            debug!("connection closed with an active turn");
            turn.cancel();
        }
        result
    }

    async fn serve<O, I>(&mut self, outbound: &mut O, inbound: &mut I) -> anyhow::Result<()>
    where
        O: Sink<String> + Unpin,
        O::Error: Display,
        I: Stream<Item = String> + Unpin,
    {
        loop {
            tokio::select! {
                // drain turn output before taking new frames
                biased;
                event = next_event(&mut self.active) => {
                    self.handle_event(event, outbound).await?;
                }
                frame = inbound.next() => match frame {
                    Some(frame) => self.handle_frame(&frame, outbound).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_frame<O>(&mut self, frame: &str, outbound: &mut O) -> anyhow::Result<()>
    where
        O: Sink<String> + Unpin,
        O::Error: Display,
    {
        match ClientCommand::parse(frame) {
            Err(e) => {
                warn!("rejected client message: {e}");
                send(outbound, &ServerMessage::error(e.to_string())).await
            }
            Ok(ClientCommand::Stop) => match self.active.take() {
                Some(turn) => {
                    info!("stop requested by client");
                    turn.cancel();
                    send(outbound, &ServerMessage::stop_ack()).await
                }
                None => Ok(()),
            },
            Ok(ClientCommand::Say(text)) => {
                if let Some(turn) = self.active.take() {
                    info!("new message while a turn is active, replacing it");
                    turn.cancel();
                }
                self.start_turn(text)
            }
        }
    }

    fn start_turn(&mut self, text: String) -> anyhow::Result<()> {
        info!(chars = text.chars().count(), "turn requested");
        self.conversation.append(Turn::user(text))?;

        let cancel = CancellationToken::new();
        let events = spawn_turn(
            self.backends.clone(),
            self.metrics.clone(),
            self.conversation.snapshot(),
            cancel.clone(),
        );
        self.active = Some(ActiveTurn { cancel, events });
        Ok(())
    }

    async fn handle_event<O>(&mut self, event: Option<TurnEvent>, outbound: &mut O) -> anyhow::Result<()>
    where
        O: Sink<String> + Unpin,
        O::Error: Display,
    {
        match event {
            Some(TurnEvent::Output(output)) => send(outbound, &ServerMessage::from(output)).await,
            Some(TurnEvent::Finished(outcome)) => {
                self.active = None;
                self.finish_turn(outcome, outbound).await
            }
            None => {
                // the turn task went away without reporting
                self.active = None;
                let err = TurnError::Unknown("turn ended unexpectedly".into());
                error!("{err}");
                send(outbound, &ServerMessage::error(err.to_string())).await
            }
        }
    }

    async fn finish_turn<O>(&mut self, outcome: Result<String, TurnError>, outbound: &mut O) -> anyhow::Result<()>
    where
        O: Sink<String> + Unpin,
        O::Error: Display,
    {
        match outcome {
            Ok(reply) => {
                self.conversation.append(Turn::assistant(reply))?;
                self.conversation.trim(self.history_limit);
                debug!(turns = self.conversation.turns().len(), "history updated");
                Ok(())
            }
            Err(e) if e.is_aborted() => Ok(()),
            Err(e) => send(outbound, &ServerMessage::error(e.to_string())).await,
        }
    }
}

/// Next event of the active turn; pending forever when idle.
async fn next_event(active: &mut Option<ActiveTurn>) -> Option<TurnEvent> {
    match active {
        Some(turn) => turn.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn send<O>(outbound: &mut O, message: &ServerMessage) -> anyhow::Result<()>
where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let json = message.to_json()?;
    outbound
        .send(json)
        .await
        .map_err(|e| anyhow::anyhow!("failed to send to client: {e}"))
}
