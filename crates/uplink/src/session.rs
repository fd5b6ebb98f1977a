//! Sessão de transporte: uma conexão, três atividades.
//!
//! ```text
//!   sampler ──mpsc──► feeder ──push──► RelayBuffer ──pop_batch──► writer ──► WebSocket
//!                                                          ping ──► writer
//!   WebSocket ──► reader ──► ControlHandler
//! ```
//!
//! As três atividades rodam juntas na mesma task sob um token de cancelamento
//! filho do token raiz. Qualquer uma que termine cancela o token da sessão e
//! derruba as outras duas; não existe sessão parcialmente viva.

use crate::buffer::RelayBuffer;
use crate::control::{ControlHandler, dispatch};
use crate::error::UplinkError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use telemetry_core::protocol::{ProtocolError, decode_control, encode_batch};
use telemetry_core::{LinkConfig, MAX_BATCH_SIZE, Record};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Prazos e limites de uma sessão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Prazo de cada escrita
    pub write_wait: Duration,
    /// Janela máxima sem frames recebidos
    pub pong_wait: Duration,
    /// Período do ping de heartbeat
    pub ping_period: Duration,
    /// Registros por envelope
    pub batch_size: usize,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for LinkTiming {
    fn from(config: &LinkConfig) -> Self {
        Self {
            write_wait: Duration::from_secs(config.write_wait_secs.max(1)),
            pong_wait: Duration::from_secs(config.pong_wait_secs.max(1)),
            ping_period: Duration::from_secs(config.ping_period_secs.max(1)),
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }
}

/// Como a sessão terminou.
#[derive(Debug)]
pub enum SessionEnd {
    /// Token raiz cancelado: desligamento do processo.
    Cancelled,
    /// Conexão perdida; o supervisor deve reconectar.
    Lost(UplinkError),
}

/// Dependências de uma sessão, emprestadas do supervisor.
pub struct Session<'a> {
    pub buffer: &'a RelayBuffer<Record>,
    pub control: &'a dyn ControlHandler,
    pub timing: LinkTiming,
    /// Envelope `status` já codificado, enviado antes do primeiro lote
    pub hello: Option<String>,
}

impl Session<'_> {
    /// Executa a sessão até uma falha ou até `cancel` disparar.
    pub async fn run<Io>(
        self,
        socket: WebSocketStream<Io>,
        samples: &mut mpsc::Receiver<Record>,
        cancel: &CancellationToken,
    ) -> SessionEnd
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        let session = cancel.child_token();
        let (sink, stream) = socket.split();

        let reader = async {
            let _guard = session.clone().drop_guard();
            read_loop(stream, self.control, self.timing.pong_wait, &session).await
        };
        let writer = async {
            let _guard = session.clone().drop_guard();
            write_loop(sink, self.buffer, &self.timing, self.hello.as_deref(), &session).await
        };
        let feeder = async {
            let _guard = session.clone().drop_guard();
            feed_buffer(samples, self.buffer, &session).await
        };

        let (read, write, ()) = tokio::join!(reader, writer, feeder);

        if cancel.is_cancelled() {
            return SessionEnd::Cancelled;
        }
        match (read, write) {
            (Err(e), _) | (Ok(()), Err(e)) => SessionEnd::Lost(e),
            (Ok(()), Ok(())) => SessionEnd::Lost(UplinkError::ConnectionClosed),
        }
    }
}

// ──────────────────────────────────────────────
// Reader
// ──────────────────────────────────────────────

async fn read_loop<S>(
    mut stream: S,
    control: &dyn ControlHandler,
    pong_wait: Duration,
    cancel: &CancellationToken,
) -> Result<(), UplinkError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        // O prazo recomeça a cada frame recebido, inclusive pongs.
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frame = tokio::time::timeout(pong_wait, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => return Err(UplinkError::LivenessExpired(pong_wait)),
            Ok(None) => return Err(UplinkError::ConnectionClosed),
            Ok(Some(Err(e))) => return Err(UplinkError::Read(e)),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => handle_control_frame(control, text.as_bytes()),
            Message::Binary(data) => handle_control_frame(control, &data),
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                    .unwrap_or_default();
                return Err(UplinkError::ClosedByPeer(reason));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                trace!("Frame de keepalive recebido");
            }
        }
    }
}

/// Frames inválidos são registrados e ignorados; a sessão continua.
fn handle_control_frame(control: &dyn ControlHandler, data: &[u8]) {
    match decode_control(data) {
        Ok(message) => dispatch(control, message),
        Err(ProtocolError::UnknownType(kind)) => {
            warn!(kind, "Tipo de mensagem de controle desconhecido, ignorando");
        }
        Err(e) => warn!("Mensagem de controle malformada: {e}"),
    }
}

// ──────────────────────────────────────────────
// Writer
// ──────────────────────────────────────────────

async fn write_loop<S>(
    mut sink: S,
    buffer: &RelayBuffer<Record>,
    timing: &LinkTiming,
    hello: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), UplinkError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Some(hello) = hello {
        send_within(&mut sink, Message::text(hello.to_owned()), timing.write_wait).await?;
    }

    let mut heartbeat = tokio::time::interval_at(Instant::now() + timing.ping_period, timing.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                close_normally(&mut sink, timing.write_wait).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send_within(&mut sink, Message::Ping(Default::default()), timing.write_wait).await {
                    warn!("Falha ao enviar ping: {e}");
                    return Err(e);
                }
                debug!("📡 Ping enviado");
            }
            batch = buffer.pop_batch(timing.batch_size, cancel) => {
                if batch.is_empty() {
                    continue;
                }
                // Falha de codificação encerra a sessão; o lote é perdido.
                let payload = encode_batch(&batch)?;
                send_within(&mut sink, Message::text(payload), timing.write_wait).await?;
                debug!(count = batch.len(), buffered = buffer.len(), "📤 Lote enviado");
            }
        }
    }
}

async fn send_within<S>(sink: &mut S, message: Message, wait: Duration) -> Result<(), UplinkError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(UplinkError::Write(e)),
        Err(_) => Err(UplinkError::WriteTimeout(wait)),
    }
}

/// Envia o fechamento normal (1000). Melhor esforço: a conexão pode já ter caído.
async fn close_normally<S>(sink: &mut S, wait: Duration)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Utf8Bytes::from_static(""),
    };
    match send_within(sink, Message::Close(Some(frame)), wait).await {
        Ok(()) => debug!("Fechamento normal enviado"),
        Err(e) => trace!("Fechamento não enviado: {e}"),
    }
}

// ──────────────────────────────────────────────
// Feeder
// ──────────────────────────────────────────────

async fn feed_buffer(
    samples: &mut mpsc::Receiver<Record>,
    buffer: &RelayBuffer<Record>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sample = samples.recv() => match sample {
                Some(record) => {
                    buffer.push(record);
                }
                None => {
                    // Produtor encerrado: o que já está no buffer ainda sai.
                    info!("Canal de amostras fechado");
                    cancel.cancelled().await;
                    return;
                }
            },
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
