use super::events::WsOutboundEvent;
use super::message_types::ClientCommand;
use super::ConnectionId;
use crate::config::WebSocketConfig;
use crate::error::AppError;
use crate::gateway::Gateway;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// One authenticated WebSocket connection.
///
/// Outbound events arrive on the connection's queue and are written as text
/// frames. Inbound commands are handed to a per-connection worker that runs
/// them one at a time, so a client's own commands keep their order.
pub struct WsSession {
    user_id: Uuid,
    connection_id: Option<ConnectionId>,
    commands: Option<mpsc::UnboundedSender<ClientCommand>>,
    worker: Option<JoinHandle<()>>,
    gateway: Arc<Gateway>,
    config: WebSocketConfig,
    hb: Instant,
}

impl WsSession {
    pub fn new(user_id: Uuid, gateway: Arc<Gateway>, config: WebSocketConfig) -> Self {
        Self {
            user_id,
            connection_id: None,
            commands: None,
            worker: None,
            gateway,
            config,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.config.client_timeout;
        ctx.run_interval(self.config.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn spawn_command_worker(
        &self,
        connection_id: ConnectionId,
        replies: mpsc::UnboundedSender<WsOutboundEvent>,
    ) -> (mpsc::UnboundedSender<ClientCommand>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientCommand>();
        let gateway = self.gateway.clone();
        let user_id = self.user_id;

        let handle = actix::spawn(async move {
            while let Some(command) = rx.recv().await {
                let reply = match gateway.dispatch(connection_id, user_id, command).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        debug!(user_id = %user_id, error = %err, "command rejected");
                        Some(WsOutboundEvent::from_error(&err))
                    }
                };
                if let Some(event) = reply {
                    if replies.send(event).is_err() {
                        break;
                    }
                }
            }
        });
        (tx, handle)
    }

    /// Stops the command worker, then unregisters from presence and every
    /// channel. Idempotent.
    fn cleanup(&mut self) {
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        if let Some(connection_id) = self.connection_id.take() {
            self.gateway.disconnect(connection_id);
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = self.gateway.connect(self.user_id, tx.clone());
        self.connection_id = Some(connection_id);
        let (commands, worker) = self.spawn_command_worker(connection_id, tx);
        self.commands = Some(commands);
        self.worker = Some(worker);

        ctx.add_stream(UnboundedReceiverStream::new(rx));
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.cleanup();
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl StreamHandler<WsOutboundEvent> for WsSession {
    fn handle(&mut self, event: WsOutboundEvent, ctx: &mut Self::Context) {
        match event.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(event = event.event_name(), error = %e, "failed to encode event"),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match ClientCommand::parse(&text) {
                    Ok(command) => {
                        let queued = self
                            .commands
                            .as_ref()
                            .map(|tx| tx.send(command).is_ok())
                            .unwrap_or(false);
                        if !queued {
                            ctx.stop();
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %self.user_id, error = %e, "failed to parse WS message");
                        let err = AppError::InvalidInput(format!("malformed command: {e}"));
                        if let Ok(text) = WsOutboundEvent::from_error(&err).to_json() {
                            ctx.text(text);
                        }
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(user_id = %self.user_id, ?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
