use super::*;

/// Memo of read responses for one pass, keyed by `(session, command)`.
///
/// Concurrent requests for the same key share one read; read errors are
/// returned to every waiter and never stored.
#[derive(Clone)]
pub struct ReadCache {
    entries: Cache<(SessionId, String), String>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Returns the cached response, or awaits `read` and stores its result.
    ///
    /// `read` is only polled on a miss, so it must not do any work before
    /// its first poll.
    pub async fn get_or_read<Fut, E>(
        &self,
        session: &SessionId,
        command: &str,
        read: Fut,
    ) -> Result<String, E>
    where
        Fut: Future<Output = Result<String, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let key = (session.clone(), command.to_string());
        if let Some(hit) = self.entries.get(&key).await {
            trace!("Read cache hit: {} '{}'", session, command);
            return Ok(hit);
        }
        debug!("Read cache miss: {} '{}'", session, command);
        self.entries
            .try_get_with(key, read)
            .await
            .map_err(|err: Arc<E>| (*err).clone())
    }

    /// Awaits `read` unconditionally and stores a successful result.
    pub async fn refresh<Fut, E>(
        &self,
        session: &SessionId,
        command: &str,
        read: Fut,
    ) -> Result<String, E>
    where
        Fut: Future<Output = Result<String, E>>,
    {
        let fresh = read.await?;
        self.entries
            .insert((session.clone(), command.to_string()), fresh.clone())
            .await;
        Ok(fresh)
    }

    pub async fn contains(&self, session: &SessionId, command: &str) -> bool {
        self.entries
            .get(&(session.clone(), command.to_string()))
            .await
            .is_some()
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}
