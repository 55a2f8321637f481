//! Device sessions and reconciliation passes.
//!
//! Everything that talks to a device goes through this module. Handlers stay
//! pure; the engine here plans a pass, renders command batches, pushes them
//! through a [`Session`] and caches read responses.
//!
//! # Main Components
//!
//! - [`Session`] - Text channel to one device, supplied by the caller
//! - [`Engine`] - Registry plus device profile; starts passes
//! - [`Transaction`] - One reconciliation pass over one session
//! - [`ReadCache`] - Per-pass memo of read responses
//! - [`RecordingSession`] / [`SessionReplayer`] - Capture and offline replay

use log::{debug, trace, warn};
use moka::future::Cache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::{DeviceProfile, EngineConfig, ResponseCheck};
use crate::error::{Cause, ConfigError, SessionError, TxError};
use crate::handler::{CommandBatch, UpdatePolicy, WriteContext};
use crate::path::{Key, KeyPattern, NodePath};
use crate::registry::{Binding, Registry};
use crate::snapshot::{ConfigNode, Snapshot};

mod cache;
mod engine;
mod manager;
mod recording;
mod transaction;

pub use cache::ReadCache;
pub use engine::{Engine, Transaction};
pub use manager::{DeviceJob, DeviceOutcome, reconcile_all};
pub use recording::{
    RecordingSession, SessionEvent, SessionRecordEntry, SessionRecorder, SessionReplayer,
};
pub use transaction::{
    BatchPhase, ChangeKind, Plan, PlannedOp, RenderedBatch, TxReport, TxState, classify, plan,
};

/// Identifies a device session; part of every read-cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Stateful, single-consumer text channel to one device.
///
/// Implementations own transport, authentication, prompt handling and
/// paging. The engine awaits every call before issuing the next one.
pub trait Session: Send {
    fn id(&self) -> SessionId;

    /// Sends one command and returns its output.
    fn execute(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, SessionError>> + Send;

    /// Sends `lines` as one unit and returns the combined output.
    ///
    /// The default sends the lines one by one and concatenates the responses.
    fn execute_batch(
        &mut self,
        lines: &[String],
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move {
            let mut combined = String::new();
            for line in lines {
                let output = self.execute(line).await?;
                combined.push_str(&output);
                if !output.is_empty() && !output.ends_with('\n') {
                    combined.push('\n');
                }
            }
            Ok(combined)
        }
    }
}
