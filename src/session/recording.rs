use super::*;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session: SessionId,
    },
    CommandOutput {
        command: String,
        output: String,
    },
    CommandFailed {
        command: String,
        error: SessionError,
    },
    BatchOutput {
        lines: Vec<String>,
        output: String,
    },
    BatchFailed {
        lines: Vec<String>,
        error: SessionError,
    },
}

/// In-memory, cloneable session recorder.
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, event: SessionEvent) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SessionRecordEntry {
                ts_ms: now_ms(),
                event,
            });
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Vec<SessionRecordEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConfigError> {
        let mut lines = Vec::new();
        for entry in self.entries() {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConfigError::InvalidDocument(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines; blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConfigError> {
        let mut parsed = Vec::new();
        for (idx, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                ConfigError::InvalidDocument(format!("record decode error on line {}: {e}", idx + 1))
            })?;
            parsed.push(entry);
        }
        Ok(Self {
            entries: Arc::new(Mutex::new(parsed)),
        })
    }
}

/// Wraps a session and records every exchange.
#[derive(Debug)]
pub struct RecordingSession<S> {
    inner: S,
    recorder: SessionRecorder,
}

impl<S: Session> RecordingSession<S> {
    pub fn new(inner: S) -> Self {
        Self::with_recorder(inner, SessionRecorder::new())
    }

    pub fn with_recorder(inner: S, recorder: SessionRecorder) -> Self {
        recorder.record_event(SessionEvent::SessionStarted {
            session: inner.id(),
        });
        Self { inner, recorder }
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Session> Session for RecordingSession<S> {
    fn id(&self) -> SessionId {
        self.inner.id()
    }

    fn execute(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move {
            let result = self.inner.execute(command).await;
            let event = match &result {
                Ok(output) => SessionEvent::CommandOutput {
                    command: command.to_string(),
                    output: output.clone(),
                },
                Err(error) => SessionEvent::CommandFailed {
                    command: command.to_string(),
                    error: error.clone(),
                },
            };
            self.recorder.record_event(event);
            result
        }
    }

    fn execute_batch(
        &mut self,
        lines: &[String],
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move {
            let result = self.inner.execute_batch(lines).await;
            let event = match &result {
                Ok(output) => SessionEvent::BatchOutput {
                    lines: lines.to_vec(),
                    output: output.clone(),
                },
                Err(error) => SessionEvent::BatchFailed {
                    lines: lines.to_vec(),
                    error: error.clone(),
                },
            };
            self.recorder.record_event(event);
            result
        }
    }
}

/// Offline session replaying a recording in order.
///
/// Every exchange must match the next recorded one exactly; anything else
/// fails with [`SessionError::ReplayMismatch`].
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    id: SessionId,
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries();
        let id = entries
            .iter()
            .find_map(|entry| match &entry.event {
                SessionEvent::SessionStarted { session } => Some(session.clone()),
                _ => None,
            })
            .unwrap_or_else(|| SessionId::from("replay"));
        Self {
            id,
            entries,
            cursor: 0,
        }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConfigError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Recorded exchanges not yet replayed.
    pub fn remaining(&self) -> usize {
        self.entries[self.cursor.min(self.entries.len())..]
            .iter()
            .filter(|entry| !matches!(entry.event, SessionEvent::SessionStarted { .. }))
            .count()
    }

    fn next_exchange(&mut self, wanted: &str) -> Result<SessionEvent, SessionError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;
            if matches!(entry.event, SessionEvent::SessionStarted { .. }) {
                continue;
            }
            return Ok(entry.event.clone());
        }
        Err(SessionError::ReplayMismatch(format!(
            "recording exhausted, expected {wanted}"
        )))
    }

    fn replay_command(&mut self, command: &str) -> Result<String, SessionError> {
        match self.next_exchange(&format!("'{command}'"))? {
            SessionEvent::CommandOutput {
                command: recorded,
                output,
            } if recorded == command => Ok(output),
            SessionEvent::CommandFailed {
                command: recorded,
                error,
            } if recorded == command => Err(error),
            other => Err(mismatch(&format!("'{command}'"), &other)),
        }
    }

    fn replay_batch(&mut self, lines: &[String]) -> Result<String, SessionError> {
        let wanted = format!("batch {lines:?}");
        match self.next_exchange(&wanted)? {
            SessionEvent::BatchOutput {
                lines: recorded,
                output,
            } if recorded == lines => Ok(output),
            SessionEvent::BatchFailed {
                lines: recorded,
                error,
            } if recorded == lines => Err(error),
            other => Err(mismatch(&wanted, &other)),
        }
    }
}

fn mismatch(wanted: &str, recorded: &SessionEvent) -> SessionError {
    let found = match recorded {
        SessionEvent::CommandOutput { command, .. } | SessionEvent::CommandFailed { command, .. } => {
            format!("'{command}'")
        }
        SessionEvent::BatchOutput { lines, .. } | SessionEvent::BatchFailed { lines, .. } => {
            format!("batch {lines:?}")
        }
        SessionEvent::SessionStarted { session } => format!("session start {session}"),
    };
    SessionError::ReplayMismatch(format!("expected {wanted}, recording has {found}"))
}

impl Session for SessionReplayer {
    fn id(&self) -> SessionId {
        self.id.clone()
    }

    fn execute(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move { self.replay_command(command) }
    }

    fn execute_batch(
        &mut self,
        lines: &[String],
    ) -> impl Future<Output = Result<String, SessionError>> + Send {
        async move { self.replay_batch(lines) }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
