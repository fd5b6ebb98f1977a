//! Utilitários de teste: pares WebSocket em memória e registros rotulados.

use crate::connector::socket_config;
use chrono::Utc;
use telemetry_core::Record;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;

/// Registro identificado por `proc_count`, para conferir ordem nos testes.
pub(crate) fn record(label: u64) -> Record {
    let mut record = Record::new("test-host", Utc::now());
    record.proc_count = label;
    record
}

/// Cliente e servidor WebSocket ligados por um `tokio::io::duplex`.
pub(crate) async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client =
        WebSocketStream::from_raw_socket(client_io, Role::Client, Some(socket_config(512 * 1024))).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (client, server)
}
