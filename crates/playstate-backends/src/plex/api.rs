use serde_json::Value;
use tracing::debug;
use crate::traits::DiscoveredServer;

pub const PLEX_TV_BASE_URL: &str = "https://plex.tv";
pub const CLIENT_IDENTIFIER: &str = "playstate";

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn is_server(resource: &Value) -> bool {
    str_field(resource, "provides").map(|p| p.split(',').any(|s| s == "server")).unwrap_or(false)
        || str_field(resource, "product") == Some("Plex Media Server")
}

/// `port` may come as a number or a string, falls back to the port in `uri`
fn connection_port(conn: &Value, uri: &str) -> Option<u16> {
    match conn.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => uri.rsplit_once(':').and_then(|(_, port)| port.trim_end_matches('/').parse().ok()),
    }
}

/// Server connections listed in a plex.tv `/api/v2/resources` response
///
/// Every connection of every server becomes one entry, in response order.
/// Connections without a uri are skipped.
pub fn parse_servers(resources: &Value) -> Vec<DiscoveredServer> {
    let Some(resources) = resources.as_array() else {
        return Vec::new();
    };

    let mut servers = Vec::new();
    for resource in resources.iter().filter(|r| is_server(r)) {
        let name = str_field(resource, "name").unwrap_or("Unknown");
        let identifier = str_field(resource, "clientIdentifier").unwrap_or("");

        let connections = resource
            .get("connections")
            .and_then(|c| c.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        if connections.is_empty() {
            debug!(server = %name, "Server has no connections, skipping");
            continue;
        }

        for conn in connections {
            let Some(uri) = str_field(conn, "uri") else {
                continue;
            };

            servers.push(DiscoveredServer {
                name: name.to_string(),
                identifier: identifier.to_string(),
                protocol: str_field(conn, "protocol").unwrap_or("").to_string(),
                address: str_field(conn, "address").unwrap_or("").to_string(),
                port: connection_port(conn, uri).unwrap_or(0),
                uri: uri.to_string(),
                local: conn.get("local").and_then(|l| l.as_bool()).unwrap_or(false),
            });
        }
    }

    servers
}

/// Access token of the server whose identifier equals `backend_id`
pub fn find_access_token(resources: &Value, backend_id: &str) -> Option<String> {
    resources
        .as_array()?
        .iter()
        .filter(|r| str_field(r, "provides") == Some("server"))
        .find(|r| str_field(r, "clientIdentifier") == Some(backend_id))
        .and_then(|r| str_field(r, "accessToken"))
        .map(String::from)
}

/// First item of a `MediaContainer.Metadata` list
pub fn first_metadata(response: &Value) -> Option<Value> {
    response
        .get("MediaContainer")?
        .get("Metadata")?
        .as_array()?
        .first()
        .cloned()
}
