use media::IceServerConfig;
use shared_proto::{ParticipantInfo, RoomType};
use url::Url;

use crate::error::{ClientError, ClientResult};

const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signaling_url: Url,
    pub room: RoomType,
    pub identity: ParticipantInfo,
    pub ice_servers: Vec<IceServerConfig>,
}

impl ClientConfig {
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut signaling_url = Url::parse(
            &read("SIGNALING_URL").unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string()),
        )?;
        if let Some(token) = read("AUTH_TOKEN") {
            signaling_url.query_pairs_mut().append_pair("token", &token);
        }

        let room = match read("ROOM") {
            Some(raw) => raw
                .parse::<RoomType>()
                .map_err(|_| ClientError::Config { key: "ROOM", value: raw })?,
            None => RoomType::Video,
        };

        let id = read("USER_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let name = read("USER_NAME").unwrap_or_else(|| "Stranger".to_string());
        let identity = ParticipantInfo {
            id,
            name,
            email: read("USER_EMAIL"),
        };

        Ok(Self {
            signaling_url,
            room,
            identity,
            ice_servers: load_ice_servers(&read),
        })
    }
}

fn parse_csv(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn load_ice_servers(read: &impl Fn(&str) -> Option<String>) -> Vec<IceServerConfig> {
    if let Some(raw_json) = read("ICE_SERVERS_JSON") {
        match serde_json::from_str::<Vec<IceServerConfig>>(&raw_json) {
            Ok(parsed) if !parsed.is_empty() => return parsed,
            _ => tracing::warn!(
                component = "config",
                "failed to parse ICE_SERVERS_JSON, falling back to STUN/TURN vars"
            ),
        }
    }

    let mut stun_urls = parse_csv(read("STUN_URLS"));
    if stun_urls.is_empty() {
        stun_urls.push(media::ice::DEFAULT_STUN_URL.to_string());
    }
    let mut servers = vec![IceServerConfig::stun(stun_urls)];

    let turn_urls = parse_csv(read("TURN_URLS"));
    if !turn_urls.is_empty() {
        servers.push(IceServerConfig {
            urls: turn_urls,
            username: read("TURN_USERNAME"),
            credential: read("TURN_PASSWORD").or_else(|| read("TURN_CREDENTIAL")),
        });
    }

    servers
}
