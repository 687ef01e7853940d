use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorCode {
    Network,
    Protocol,
    Media,
    Validation,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid value for {key}: '{value}'")]
    Config { key: &'static str, value: String },

    #[error("invalid signaling url: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("media failure: {0}")]
    Media(#[from] media::MediaError),

    #[error("signaling connection is closed")]
    Disconnected,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn code(&self) -> ClientErrorCode {
        match self {
            ClientError::Config { .. } | ClientError::Url(_) => ClientErrorCode::Validation,
            ClientError::WebSocket(_) | ClientError::Disconnected => ClientErrorCode::Network,
            ClientError::Json(_) => ClientErrorCode::Protocol,
            ClientError::Media(_) => ClientErrorCode::Media,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_codes() {
        let err = ClientError::Config {
            key: "ROOM",
            value: "lobby".to_string(),
        };
        assert_eq!(err.code(), ClientErrorCode::Validation);
        assert_eq!(err.to_string(), "invalid value for ROOM: 'lobby'");
        assert_eq!(ClientError::Disconnected.code(), ClientErrorCode::Network);

        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
        let code = serde_json::to_value(ClientError::from(json_err).code()).expect("serialize code");
        assert_eq!(code, "protocol");
    }
}
