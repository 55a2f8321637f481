use super::*;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One device to reconcile.
#[derive(Debug)]
pub struct DeviceJob<S> {
    pub session: S,
    pub before: Snapshot,
    pub after: Snapshot,
}

/// Result of one device's pass. The session is handed back to the caller.
#[derive(Debug)]
pub struct DeviceOutcome<S> {
    pub session_id: SessionId,
    pub session: S,
    pub result: Result<TxReport, TxError>,
}

/// Reconciles every device concurrently, one pass per device.
///
/// Passes share only the engine; each has its own session and read cache.
/// Outcomes are returned in job order. The number of passes in flight is
/// bounded by `max_concurrent_devices` when configured.
pub async fn reconcile_all<S>(engine: Arc<Engine>, jobs: Vec<DeviceJob<S>>) -> Vec<DeviceOutcome<S>>
where
    S: Session + 'static,
{
    let limit = engine
        .config()
        .max_concurrent_devices
        .unwrap_or(jobs.len())
        .max(1);
    let permits = Arc::new(Semaphore::new(limit));
    debug!("Reconciling {} devices, {} at a time", jobs.len(), limit);

    let total = jobs.len();
    let mut tasks = JoinSet::new();
    for (index, job) in jobs.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let DeviceJob {
                mut session,
                before,
                after,
            } = job;
            let session_id = session.id();
            let result = engine.reconcile(&mut session, &before, &after).await;
            if let Err(err) = &result {
                warn!("Device {} failed: {}", session_id, err);
            }
            (
                index,
                DeviceOutcome {
                    session_id,
                    session,
                    result,
                },
            )
        });
    }

    let mut outcomes: Vec<Option<DeviceOutcome<S>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => warn!("Device task cancelled: {}", err),
        }
    }
    outcomes.into_iter().flatten().collect()
}
