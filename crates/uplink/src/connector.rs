//! Abertura da conexão WebSocket com o backend.

use crate::error::UplinkError;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::debug;
use url::Url;

/// Parâmetro de query que identifica o host.
pub const HOST_ID_PARAM: &str = "hostId";

/// Estabelece conexões para o supervisor.
pub trait Connector: Send + Sync {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
    ) -> impl Future<Output = Result<WebSocketStream<Self::Io>, UplinkError>> + Send;
}

/// Monta a URL do endpoint com `hostId` na query, substituindo um valor
/// já presente e mantendo os demais parâmetros.
pub fn endpoint_url(api_url: &str, host_id: &str) -> Result<Url, UplinkError> {
    let mut url = Url::parse(api_url)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(UplinkError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != HOST_ID_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(HOST_ID_PARAM, host_id);

    Ok(url)
}

/// Limites aplicados a frames e mensagens recebidos.
pub fn socket_config(max_message_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_bytes);
    config.max_frame_size = Some(max_message_bytes);
    config
}

/// Conector real: ws:// ou wss:// (rustls) com token bearer.
///
/// Os frames saem sem compressão: o handshake não oferece
/// `permessage-deflate`.
pub struct WsConnector {
    api_url: String,
    host_id: String,
    token: String,
    max_message_bytes: usize,
}

impl WsConnector {
    pub fn new(
        api_url: impl Into<String>,
        host_id: impl Into<String>,
        token: impl Into<String>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            host_id: host_id.into(),
            token: token.into(),
            max_message_bytes,
        }
    }

    /// Requisição de upgrade com `hostId` e `Authorization: Bearer`.
    pub fn request(&self) -> Result<Request, UplinkError> {
        let url = endpoint_url(&self.api_url, &self.host_id)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(UplinkError::Dial)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| UplinkError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }
}

impl Connector for WsConnector {
    type Io = MaybeTlsStream<TcpStream>;

    async fn connect(&self) -> Result<WebSocketStream<Self::Io>, UplinkError> {
        let request = self.request()?;
        // tungstenite não suporta permessage-deflate.
        let (socket, response) = tokio_tungstenite::connect_async_with_config(
            request,
            Some(socket_config(self.max_message_bytes)),
            true,
        )
        .await
        .map_err(|e| match e {
            tungstenite::Error::Http(response) => UplinkError::Rejected {
                status: response.status().as_u16(),
            },
            other => UplinkError::Dial(other),
        })?;

        debug!(status = response.status().as_u16(), "Handshake WebSocket concluído");
        Ok(socket)
    }
}
