use super::*;

/// A built registry plus the device dialect it drives.
///
/// An engine is shared read-only between passes; each pass gets its own
/// [`Transaction`] and read cache.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<Registry>,
    profile: DeviceProfile,
    response_check: ResponseCheck,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, config: EngineConfig) -> Result<Self, ConfigError> {
        let profile = config.device_profile()?;
        let response_check = profile.response_check()?;
        debug!(
            "Engine ready: profile '{}', {} bindings",
            profile.name,
            registry.len()
        );
        Ok(Self {
            registry,
            profile,
            response_check,
            config,
        })
    }

    /// Engine for an explicit profile with default settings otherwise.
    pub fn with_profile(registry: Arc<Registry>, profile: DeviceProfile) -> Result<Self, ConfigError> {
        let config = EngineConfig {
            profile: profile.name.clone(),
            custom_profile: Some(profile),
            ..EngineConfig::default()
        };
        Self::new(registry, config)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan<'e>(&'e self, before: &Snapshot, after: &Snapshot) -> Result<Plan<'e>, TxError> {
        plan(&self.registry, before, after)
    }

    /// Renders every batch a pass would send, without a session.
    pub fn preview(&self, before: &Snapshot, after: &Snapshot) -> Result<Vec<RenderedBatch>, TxError> {
        let plan = self.plan(before, after)?;
        let ctx = WriteContext { before, after };
        let mut batches = Vec::new();
        for op in plan.iter() {
            for (phase, batch) in op.render(&ctx)? {
                if batch.is_empty() {
                    continue;
                }
                batches.push(self.rendered(op, phase, &batch));
            }
        }
        Ok(batches)
    }

    fn rendered(&self, op: &PlannedOp<'_>, phase: BatchPhase, batch: &CommandBatch) -> RenderedBatch {
        RenderedBatch {
            path: op.path.clone(),
            kind: op.kind,
            phase,
            binding: op.binding.id().to_string(),
            lines: batch.framed(&self.profile.config_enter, &self.profile.config_exit),
        }
    }

    /// Starts a pass over `session`.
    pub fn begin<'e, S: Session>(&'e self, session: &'e mut S) -> Transaction<'e, S> {
        Transaction {
            engine: self,
            session_id: session.id(),
            session,
            cache: ReadCache::new(),
            state: TxState::Planning,
        }
    }

    /// Plans and executes one pass, returning the report or the first failure.
    pub async fn reconcile<S: Session>(
        &self,
        session: &mut S,
        before: &Snapshot,
        after: &Snapshot,
    ) -> Result<TxReport, TxError> {
        self.begin(session).execute(before, after).await.into_result()
    }
}

/// One reconciliation pass over one session.
///
/// Holds the session exclusively for its lifetime and owns the pass's read
/// cache, which is dropped with the transaction.
pub struct Transaction<'e, S: Session> {
    engine: &'e Engine,
    session: &'e mut S,
    session_id: SessionId,
    cache: ReadCache,
    state: TxState,
}

impl<'e, S: Session> Transaction<'e, S> {
    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn preview(&self, before: &Snapshot, after: &Snapshot) -> Result<Vec<RenderedBatch>, TxError> {
        self.engine.preview(before, after)
    }

    /// Cached read of `command`.
    pub async fn read(&mut self, command: &str) -> Result<String, TxError> {
        self.read_at(&NodePath::root(), command).await
    }

    /// Reads `command` from the device even if cached, and caches the result.
    pub async fn read_fresh(&mut self, command: &str) -> Result<String, TxError> {
        self.cache
            .refresh(&self.session_id, command, self.session.execute(command))
            .await
            .map_err(|err| TxError::ReadFailed {
                path: NodePath::root(),
                cause: Cause::Session(err),
            })
    }

    async fn read_at(&mut self, path: &NodePath, command: &str) -> Result<String, TxError> {
        let output = self
            .cache
            .get_or_read(&self.session_id, command, self.session.execute(command))
            .await
            .map_err(|err| TxError::ReadFailed {
                path: path.clone(),
                cause: Cause::Session(err),
            })?;
        trace!("Read '{}' -> {} bytes", command, output.len());
        Ok(output)
    }

    /// Reads the device state beneath `root` through the registry's readers.
    ///
    /// Checks are evaluated against the nodes read so far. A node whose
    /// reader reports it absent is not descended into.
    pub async fn read_subtree(&mut self, root: &NodePath) -> Result<Snapshot, TxError> {
        let engine: &'e Engine = self.engine;
        let registry: &'e Registry = &engine.registry;
        let mut snapshot = Snapshot::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([root.clone()]);

        debug!("Reading subtree {} on {}", root, self.session_id);
        while let Some(path) = queue.pop_front() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let present = if path.is_root() {
                false
            } else {
                self.read_node(registry, &path, &mut snapshot).await?
            };
            if !present && path != *root {
                continue;
            }
            queue.extend(self.child_paths(registry, &path).await?);
        }
        Ok(snapshot)
    }

    async fn read_node(
        &mut self,
        registry: &Registry,
        path: &NodePath,
        snapshot: &mut Snapshot,
    ) -> Result<bool, TxError> {
        let binding = registry
            .resolve(path, snapshot)
            .into_iter()
            .find(|b| b.is_structural() || b.handler().reader().is_some());
        let Some(binding) = binding else {
            trace!("No reader for {}", path);
            return Ok(false);
        };
        let Some(reader) = binding.handler().reader() else {
            return Ok(true);
        };

        let output = match reader.read_command(path) {
            Some(command) => self.read_at(path, &command).await?,
            None => String::new(),
        };
        let node = reader
            .read_one(path, &output)
            .map_err(|err| TxError::ReadFailed {
                path: path.clone(),
                cause: Cause::Handler(err),
            })?;
        match node {
            Some(node) => {
                snapshot.insert(path.clone(), node);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Paths one level below `parent`, listing keyed entries through every
    /// list reader bound at the pattern (first seen wins).
    async fn child_paths(&mut self, registry: &Registry, parent: &NodePath) -> Result<Vec<NodePath>, TxError> {
        let mut children: Vec<NodePath> = Vec::new();
        for binding in registry.child_bindings(parent) {
            let Some(segment) = binding.pattern().last() else {
                continue;
            };
            let found: Vec<NodePath> = match &segment.key {
                KeyPattern::None => vec![parent.child(&segment.name)],
                KeyPattern::Exact(key) => vec![parent.entry(&segment.name, key.clone())],
                KeyPattern::Any => {
                    let Some(reader) = binding.handler().reader() else {
                        continue;
                    };
                    let Some(command) = reader.list_command(parent) else {
                        continue;
                    };
                    let output = self.read_at(parent, &command).await?;
                    let keys: Vec<Key> = reader
                        .read_all(parent, &output)
                        .map_err(|err| TxError::ReadFailed {
                            path: parent.clone(),
                            cause: Cause::Handler(err),
                        })?;
                    keys.into_iter()
                        .map(|key| parent.entry(&segment.name, key))
                        .collect()
                }
            };
            for child in found {
                if !children.contains(&child) {
                    children.push(child);
                }
            }
        }
        Ok(children)
    }

    /// Executes one pass converging the device from `before` to `after`.
    ///
    /// Halts at the first failure; operations already sent stay applied.
    pub async fn execute(&mut self, before: &Snapshot, after: &Snapshot) -> TxReport {
        let engine: &'e Engine = self.engine;
        self.state = TxState::Planning;
        let mut report = TxReport {
            session: self.session_id.clone(),
            state: TxState::Planning,
            executed: Vec::new(),
            skipped: 0,
            error: None,
        };

        let plan = match engine.plan(before, after) {
            Ok(plan) => plan,
            Err(err) => return self.fail(report, err),
        };
        debug!(
            "Executing pass on {}: {} operations",
            self.session_id,
            plan.len()
        );

        self.state = TxState::Executing;
        report.state = TxState::Executing;
        let ctx = WriteContext { before, after };
        for op in plan.iter() {
            if let Err(err) = self.apply(op, &ctx, &mut report).await {
                return self.fail(report, err);
            }
        }

        self.cache.invalidate_all();
        self.state = TxState::Committed;
        report.state = TxState::Committed;
        debug!(
            "Pass committed on {}: {} batches sent, {} empty",
            self.session_id,
            report.executed.len(),
            report.skipped
        );
        report
    }

    async fn apply(
        &mut self,
        op: &PlannedOp<'_>,
        ctx: &WriteContext<'_>,
        report: &mut TxReport,
    ) -> Result<(), TxError> {
        let engine: &'e Engine = self.engine;
        for (phase, batch) in op.render(ctx)? {
            if batch.is_empty() {
                trace!("Empty {:?} batch for {}, skipped", phase, op.path);
                report.skipped += 1;
                continue;
            }
            let rendered = engine.rendered(op, phase, &batch);
            let sent = self.session.execute_batch(&rendered.lines).await;
            self.cache.invalidate_all();
            report.executed.push(rendered);

            let response = sent.map_err(|err| op.failure(phase, Cause::Session(err)))?;
            trace!("Batch response for {}: {}", op.path, response);
            if let Some(line) = engine.response_check.check(&response) {
                return Err(op.failure(phase, Cause::DeviceRejected(line)));
            }
        }
        Ok(())
    }

    fn fail(&mut self, mut report: TxReport, err: TxError) -> TxReport {
        warn!("Pass on {} halted: {}", self.session_id, err);
        self.cache.invalidate_all();
        self.state = TxState::Failed;
        report.state = TxState::Failed;
        report.error = Some(err);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Handler, Reader, Writer};
    use crate::registry::Registration;

    /// Answers from a fixed table and logs every exchange.
    struct TableSession {
        answers: Vec<(&'static str, &'static str)>,
        sent: Vec<String>,
    }

    impl Session for TableSession {
        fn id(&self) -> SessionId {
            SessionId::from("lab-r1")
        }

        fn execute(
            &mut self,
            command: &str,
        ) -> impl Future<Output = Result<String, SessionError>> + Send {
            let command = command.to_string();
            async move {
                let answer = self
                    .answers
                    .iter()
                    .find(|(c, _)| *c == command)
                    .map(|(_, a)| a.to_string())
                    .unwrap_or_default();
                self.sent.push(command);
                Ok(answer)
            }
        }
    }

    struct Hostname;

    impl Reader for Hostname {
        fn read_command(&self, _path: &NodePath) -> Option<String> {
            Some("show running-config | include hostname".to_string())
        }

        fn read_one(&self, _path: &NodePath, output: &str) -> Result<Option<ConfigNode>, HandlerError> {
            Ok(output
                .lines()
                .find_map(|l| l.strip_prefix("hostname "))
                .map(|name| ConfigNode::leaf().with("name", name.trim())))
        }
    }

    impl Writer for Hostname {
        fn create(
            &self,
            _path: &NodePath,
            after: &ConfigNode,
            _ctx: &WriteContext<'_>,
        ) -> Result<CommandBatch, HandlerError> {
            Ok(CommandBatch::from_iter([format!(
                "hostname {}",
                after.get_str("name").unwrap_or_default()
            )]))
        }

        fn delete(
            &self,
            _path: &NodePath,
            _before: &ConfigNode,
            _ctx: &WriteContext<'_>,
        ) -> Result<CommandBatch, HandlerError> {
            Ok(CommandBatch::new())
        }

        fn update_policy(&self) -> UpdatePolicy {
            UpdatePolicy::Replace
        }
    }

    fn engine() -> Engine {
        let registry = Registry::builder()
            .add(Registration::structural("system", "/system"))
            .add(Registration::new(
                "hostname",
                "/system/hostname",
                Handler::read_write(Hostname),
            ))
            .build()
            .expect("registry");
        Engine::new(Arc::new(registry), EngineConfig::for_profile("cisco")).expect("engine")
    }

    fn hostname(name: &str) -> Snapshot {
        Snapshot::new().with(
            "/system/hostname".parse().expect("path"),
            ConfigNode::leaf().with("name", name),
        )
    }

    #[tokio::test]
    async fn empty_delete_batch_is_skipped() {
        let engine = engine();
        let mut session = TableSession {
            answers: Vec::new(),
            sent: Vec::new(),
        };
        let report = engine
            .reconcile(&mut session, &hostname("r1"), &hostname("r2"))
            .await
            .expect("pass");
        assert!(report.is_committed());
        assert_eq!(report.skipped, 1);
        assert_eq!(session.sent, vec!["configure terminal", "hostname r2", "end"]);
    }

    #[tokio::test]
    async fn read_subtree_uses_registry_readers() {
        let engine = engine();
        let mut session = TableSession {
            answers: vec![("show running-config | include hostname", "hostname edge-1\n")],
            sent: Vec::new(),
        };
        let mut tx = engine.begin(&mut session);
        let snapshot = tx
            .read_subtree(&"/system".parse().expect("path"))
            .await
            .expect("read");
        assert_eq!(snapshot, hostname("edge-1"));

        let again = tx
            .read("show running-config | include hostname")
            .await
            .expect("cached");
        assert_eq!(again, "hostname edge-1\n");
        tx.read_fresh("show running-config | include hostname")
            .await
            .expect("fresh");
        assert_eq!(tx.state(), TxState::Planning);
        drop(tx);
        assert_eq!(session.sent.len(), 2);
    }

    const RUNNING: &str = "hostname edge-1\nip domain name lab.example\n";

    struct RunningHostname;

    impl Reader for RunningHostname {
        fn read_command(&self, _path: &NodePath) -> Option<String> {
            Some("show running-config".to_string())
        }

        fn read_one(&self, _path: &NodePath, output: &str) -> Result<Option<ConfigNode>, HandlerError> {
            Ok(output
                .lines()
                .find_map(|l| l.strip_prefix("hostname "))
                .map(|name| ConfigNode::leaf().with("name", name)))
        }
    }

    struct RunningDomain;

    impl Reader for RunningDomain {
        fn read_command(&self, _path: &NodePath) -> Option<String> {
            Some("show running-config".to_string())
        }

        fn read_one(&self, _path: &NodePath, output: &str) -> Result<Option<ConfigNode>, HandlerError> {
            Ok(output
                .lines()
                .find_map(|l| l.strip_prefix("ip domain name "))
                .map(|name| ConfigNode::leaf().with("name", name)))
        }
    }

    #[tokio::test]
    async fn unrelated_readers_share_one_show_command() {
        let registry = Registry::builder()
            .add(Registration::structural("system", "/system"))
            .add(Registration::new(
                "hostname",
                "/system/hostname",
                Handler::Read(Arc::new(RunningHostname)),
            ))
            .add(Registration::new(
                "domain",
                "/system/domain",
                Handler::Read(Arc::new(RunningDomain)),
            ))
            .build()
            .expect("registry");
        let engine =
            Engine::new(Arc::new(registry), EngineConfig::for_profile("cisco")).expect("engine");
        let mut session = TableSession {
            answers: vec![("show running-config", RUNNING)],
            sent: Vec::new(),
        };

        let snapshot = engine
            .begin(&mut session)
            .read_subtree(&"/system".parse().expect("path"))
            .await
            .expect("read");

        assert_eq!(
            snapshot,
            hostname("edge-1").with(
                "/system/domain".parse().expect("path"),
                ConfigNode::leaf().with("name", "lab.example"),
            )
        );
        assert_eq!(session.sent, vec!["show running-config"]);
    }

    #[tokio::test]
    async fn alternating_reads_each_run_once() {
        let engine = engine();
        let mut session = TableSession {
            answers: vec![
                ("show running-config | include hostname", "hostname edge-1\n"),
                ("show version", "Cisco IOS XE Software, Version 17.03.04a\n"),
            ],
            sent: Vec::new(),
        };
        let mut tx = engine.begin(&mut session);
        for _ in 0..3 {
            tx.read("show running-config | include hostname")
                .await
                .expect("hostname");
            tx.read("show version").await.expect("version");
        }
        drop(tx);
        assert_eq!(
            session.sent,
            vec!["show running-config | include hostname", "show version"]
        );
    }

    #[test]
    fn preview_frames_batches_without_session() {
        let engine = engine();
        let batches = engine
            .preview(&Snapshot::new(), &hostname("r9"))
            .expect("preview");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].phase, BatchPhase::Create);
        assert_eq!(batches[0].lines, vec!["configure terminal", "hostname r9", "end"]);
    }
}
