//! Connector lookup across all engines of a server.

use std::collections::HashMap;

use serde_json::Value;

use super::Server;
use crate::connector::{ConnectorRef, VarMatcher, VAR_NODE_ID};

impl Server {
    /// Union of the connectors of every linked engine, keyed by id.
    pub fn all_connectors(&self) -> HashMap<String, ConnectorRef> {
        let mut connectors = HashMap::new();
        for engine in self.engines() {
            connectors.extend(engine.connector_map());
        }
        connectors
    }

    /// Connectors of one engine, empty if the engine is not linked.
    pub fn connectors_of(&self, engine_id: &str) -> HashMap<String, ConnectorRef> {
        self.engine(engine_id)
            .map(|engine| engine.connector_map())
            .unwrap_or_default()
    }

    pub fn connector_count(&self) -> usize {
        self.engines().iter().map(|engine| engine.connector_count()).sum()
    }

    /// Looks up a connector by id across all engines.
    pub fn connector(&self, id: &str) -> Option<ConnectorRef> {
        self.engines().iter().find_map(|engine| engine.connector(id))
    }

    /// Looks up a connector by id on one engine.
    pub fn connector_on(&self, engine_id: &str, id: &str) -> Option<ConnectorRef> {
        self.engine(engine_id)?.connector(id)
    }

    /// Connectors whose variables match every entry of `filter`.
    ///
    /// String filter values are regular expressions matched against the whole
    /// variable; other values are compared for equality. A connector missing
    /// any filtered variable is excluded.
    pub fn select_connectors(&self, filter: &HashMap<String, Value>) -> HashMap<String, ConnectorRef> {
        let matchers: Vec<(&str, VarMatcher)> = filter
            .iter()
            .map(|(key, value)| (key.as_str(), VarMatcher::new(value.clone())))
            .collect();

        self.all_connectors()
            .into_iter()
            .filter(|(_, connector)| {
                let vars = connector.core().vars();
                matchers.iter().all(|(key, matcher)| vars.matches(key, matcher))
            })
            .collect()
    }

    /// First connector whose variable `key` matches `value`.
    pub fn connector_by_var(&self, key: &str, value: impl Into<Value>) -> Option<ConnectorRef> {
        let matcher = VarMatcher::new(value);
        self.engines().iter().find_map(|engine| {
            engine
                .connectors()
                .into_iter()
                .find(|connector| connector.core().vars().matches(key, &matcher))
        })
    }

    /// Looks up a connector by its cluster node id. Plain equality, no patterns.
    pub fn node(&self, node_id: &str) -> Option<ConnectorRef> {
        let node_id = Value::String(node_id.to_string());
        self.engines().iter().find_map(|engine| {
            engine
                .connectors()
                .into_iter()
                .find(|connector| connector.core().vars().get(VAR_NODE_ID).as_ref() == Some(&node_id))
        })
    }

    /// All connectors logged in as `username`.
    pub fn connectors_by_username(&self, username: &str) -> Vec<ConnectorRef> {
        self.all_connectors()
            .into_values()
            .filter(|connector| connector.core().username().as_deref() == Some(username))
            .collect()
    }

    pub fn username(&self, connector: &ConnectorRef) -> Option<String> {
        connector.core().username()
    }

    pub fn set_username(&self, connector: &ConnectorRef, username: impl Into<String>) {
        connector.core().set_username(username);
    }

    pub fn remove_username(&self, connector: &ConnectorRef) {
        connector.core().remove_username();
    }

    pub fn node_id(&self, connector: &ConnectorRef) -> Option<String> {
        connector.core().node_id()
    }

    pub fn set_node_id(&self, connector: &ConnectorRef, node_id: impl Into<String>) {
        connector.core().set_node_id(node_id);
    }

    pub fn remove_node_id(&self, connector: &ConnectorRef) {
        connector.core().remove_node_id();
    }
}
