//! Handshake request metadata.

use std::collections::HashMap;

/// URL argument carrying the cluster node id of a reconnecting client.
pub const ARG_UNID: &str = "unid";

/// Request line and headers captured during the opening handshake.
///
/// Header names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeader {
    path: String,
    fields: HashMap<String, String>,
    args: HashMap<String, String>,
}

impl RequestHeader {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Builds a header from a path and an optional raw query string.
    pub fn from_request(path: &str, query: Option<&str>) -> Self {
        let mut header = Self::new(path);
        if let Some(query) = query {
            header.args = parse_query(query);
        }
        header
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    pub fn remove_arg(&mut self, name: &str) -> Option<String> {
        self.args.remove(name)
    }

    pub fn origin(&self) -> Option<&str> {
        self.field("origin")
    }

    /// First subprotocol offered by the client.
    pub fn subprotocol(&self) -> Option<&str> {
        self.field("sec-websocket-protocol")
            .and_then(|value| value.split(',').map(str::trim).find(|p| !p.is_empty()))
    }

    /// Protocol version from `Sec-WebSocket-Version`.
    pub fn version(&self) -> Option<u32> {
        self.field("sec-websocket-version")
            .and_then(|value| value.trim().parse().ok())
    }
}

/// Splits `a=1&b=2` into a map. Keys without `=` map to an empty value.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
