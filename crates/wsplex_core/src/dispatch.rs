//! Error boundary for filters, plug-ins, listeners and server fan-out.
//!
//! Every call into user code goes through [`guarded`], which turns both an
//! `Err` and a panic into a report on the [`DispatchObserver`] so one failing
//! component never stops its siblings.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use crate::error::DispatchError;

/// Where in the dispatch path a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    FilterIn,
    FilterOut,
    PlugInPacket,
    PlugInEngineStarted,
    PlugInEngineStopped,
    PlugInConnectorStarted,
    PlugInConnectorStopped,
    ListenerOpened,
    ListenerPacket,
    ListenerClosed,
    ServerEngineStarted,
    ServerEngineStopped,
    ServerConnectorStarted,
    ServerConnectorStopped,
    ServerPacket,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FilterIn => "filter_in",
            Stage::FilterOut => "filter_out",
            Stage::PlugInPacket => "plugin_packet",
            Stage::PlugInEngineStarted => "plugin_engine_started",
            Stage::PlugInEngineStopped => "plugin_engine_stopped",
            Stage::PlugInConnectorStarted => "plugin_connector_started",
            Stage::PlugInConnectorStopped => "plugin_connector_stopped",
            Stage::ListenerOpened => "listener_opened",
            Stage::ListenerPacket => "listener_packet",
            Stage::ListenerClosed => "listener_closed",
            Stage::ServerEngineStarted => "server_engine_started",
            Stage::ServerEngineStopped => "server_engine_stopped",
            Stage::ServerConnectorStarted => "server_connector_started",
            Stage::ServerConnectorStopped => "server_connector_stopped",
            Stage::ServerPacket => "server_packet",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single isolated failure.
#[derive(Debug)]
pub struct DispatchFailure<'a> {
    pub stage: Stage,
    /// Id of the filter, plug-in, listener or server that failed.
    pub component_id: &'a str,
    pub connector_id: Option<&'a str>,
    pub error: &'a DispatchError,
}

/// Receives every failure caught by the dispatch error boundary.
pub trait DispatchObserver: Send + Sync + fmt::Debug {
    fn on_failure(&self, failure: &DispatchFailure<'_>);
}

/// Default observer: logs each failure at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_failure(&self, failure: &DispatchFailure<'_>) {
        error!(
            stage = %failure.stage,
            component_id = failure.component_id,
            connector_id = failure.connector_id.unwrap_or("-"),
            "❌ {}",
            failure.error
        );
    }
}

/// Runs `task`, reporting an error or panic to `observer`.
///
/// # Returns
/// `true` if the task completed with `Ok`, `false` if a failure was reported.
pub async fn guarded<F>(
    observer: &dyn DispatchObserver,
    stage: Stage,
    component_id: &str,
    connector_id: Option<&str>,
    task: F,
) -> bool
where
    F: Future<Output = Result<(), DispatchError>>,
{
    let error = match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(())) => return true,
        Ok(Err(error)) => error,
        Err(payload) => DispatchError::Panicked(panic_message(payload.as_ref())),
    };
    observer.on_failure(&DispatchFailure {
        stage,
        component_id,
        connector_id,
        error: &error,
    });
    false
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<(Stage, String, String)>>);

    impl DispatchObserver for Recorder {
        fn on_failure(&self, failure: &DispatchFailure<'_>) {
            self.0.lock().push((
                failure.stage,
                failure.component_id.to_string(),
                failure.error.to_string(),
            ));
        }
    }

    async fn explode() -> Result<(), DispatchError> {
        panic!("filter exploded")
    }

    #[tokio::test]
    async fn test_guarded_reports_error_and_panic() {
        let recorder = Recorder::default();

        let ok = guarded(&recorder, Stage::PlugInPacket, "p1", Some("c1"), async { Ok(()) }).await;
        assert!(ok);

        let failed = guarded(&recorder, Stage::PlugInPacket, "p2", Some("c1"), async {
            Err(DispatchError::handler("boom"))
        })
        .await;
        assert!(!failed);

        let panicked = guarded(&recorder, Stage::FilterIn, "f1", None, explode()).await;
        assert!(!panicked);

        let failures = recorder.0.lock();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].1, "p2");
        assert_eq!(failures[1].0, Stage::FilterIn);
        assert!(failures[1].2.contains("filter exploded"));
    }
}
