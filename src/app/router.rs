use crate::api::{ApiClient, ApiError};
use crate::model::{Area, Identity};
use crate::storage::PendingQueue;
use std::sync::mpsc::Sender;

use super::jobs::{JobRunner, Outcome};

/// Where a save went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SaveDisposition {
    /// Queued locally; the save is provisional until the next flush.
    QueuedLocally,
    /// Handed to a worker for the per-user collection endpoint.
    SentToServer,
}

pub(super) struct FlushReport {
    pub succeeded: usize,
    pub failed: Vec<Area>,
    pub total: usize,
}

/// Writes each pending area in its original order. A failed item does not
/// abort the rest; it is kept for the next flush, still in relative order.
pub(super) fn drain_in_order<E>(
    items: Vec<Area>,
    mut write: impl FnMut(&Area) -> Result<(), E>,
) -> FlushReport {
    let total = items.len();
    let mut failed = Vec::new();
    let mut succeeded = 0;
    for area in items {
        match write(&area) {
            Ok(()) => succeeded += 1,
            Err(_) => failed.push(area),
        }
    }
    FlushReport {
        succeeded,
        failed,
        total,
    }
}

/// Routes area writes to the correct tier per identity and reconciles the
/// pending queue into the server on the Guest -> Authenticated transition.
pub(super) struct TierRouter {
    pending: PendingQueue,
    flush_in_flight: bool,
}

impl TierRouter {
    pub fn new(pending: PendingQueue) -> Self {
        Self {
            pending,
            flush_in_flight: false,
        }
    }

    pub fn save(
        &mut self,
        area: Area,
        identity: &Identity,
        api: &ApiClient,
        jobs: &JobRunner,
    ) -> SaveDisposition {
        match identity {
            Identity::Uninitialized | Identity::Guest => {
                let mut area = area;
                area.owner = identity.clone();
                self.pending.push(area);
                SaveDisposition::QueuedLocally
            }
            Identity::Authenticated(username) => {
                let username = username.clone();
                let api = api.clone();
                jobs.run(move |tx| {
                    let result = save_for_user(&api, &username, &area);
                    let _ = tx.send(Outcome::AreaSaved { area, result });
                });
                SaveDisposition::SentToServer
            }
        }
    }

    /// Drains the queue onto one worker. Invoked exactly once per
    /// Guest -> Authenticated transition; history loads wait for the
    /// `Flushed` outcome so the first authenticated render is consistent.
    pub fn begin_flush(&mut self, username: &str, api: &ApiClient, jobs: &JobRunner) {
        let items = self.pending.take_all();
        if items.is_empty() {
            return;
        }
        self.flush_in_flight = true;
        let username = username.to_string();
        let api = api.clone();
        jobs.run(move |tx| {
            let report = drain_in_order(items, |area| {
                api.save_coord(&username, area).map(|_| ())
            });
            let _ = tx.send(Outcome::Flushed {
                succeeded: report.succeeded,
                failed: report.failed,
                total: report.total,
            });
        });
    }

    /// A server write that failed goes back to the queue for a later flush;
    /// the save is reported to the user as provisional.
    pub fn requeue(&mut self, area: Area) {
        self.pending.push(area);
    }

    /// Lands the flush outcome: failures return to the queue tail.
    pub fn finish_flush(&mut self, failed: Vec<Area>) {
        self.pending.append(failed);
        self.flush_in_flight = false;
    }

    pub fn flush_in_flight(&self) -> bool {
        self.flush_in_flight
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Ensure-user is idempotent on the server; the save must follow it on the
/// same worker so the record exists before the write.
fn save_for_user(api: &ApiClient, username: &str, area: &Area) -> Result<Area, ApiError> {
    api.ensure_user(username)?;
    api.save_coord(username, area)
}

/// Authenticated NDVI: the server derives the bbox from the user's latest
/// stored record, so the save and the raster fetch share one worker to keep
/// their order.
pub(super) fn save_then_fetch_ndvi(
    api: &ApiClient,
    username: &str,
    area: &Area,
    token: u64,
    tx: &Sender<Outcome>,
) {
    let result = save_for_user(api, username, area);
    let save_failed = result.is_err();
    let _ = tx.send(Outcome::AreaSaved {
        area: area.clone(),
        result,
    });
    if save_failed {
        // Without the stored record the server would render a stale area.
        let _ = tx.send(Outcome::OverlayFetched {
            kind: super::overlay::OverlayKind::Ndvi,
            token,
            result: Err(ApiError::Aborted("area save failed, NDVI skipped")),
        });
        return;
    }
    let result = api.ndvi_for_user(username).map(|bytes| super::jobs::OverlayPayload {
        bytes,
        report: None,
    });
    let _ = tx.send(Outcome::OverlayFetched {
        kind: super::overlay::OverlayKind::Ndvi,
        token,
        result,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn area(x1: f64) -> Area {
        Area::from_corners(x1, 45.0, x1 + 0.1, 45.1)
    }

    #[test]
    fn drain_preserves_write_order() {
        let items = vec![area(1.0), area(2.0), area(3.0)];
        let mut seen = Vec::new();
        let report = drain_in_order::<()>(items, |a| {
            seen.push(a.x1);
            Ok(())
        });
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.total, 3);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn drain_keeps_failures_without_aborting() {
        let items = vec![area(1.0), area(2.0), area(3.0)];
        let report = drain_in_order(items, |a| if a.x1 == 2.0 { Err(()) } else { Ok(()) });
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.total, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].x1, 2.0);
    }

    #[test]
    fn guest_saves_are_queued_locally() {
        let api = ApiClient::new("http://localhost:8000", std::time::Duration::from_secs(1))
            .unwrap();
        let jobs = JobRunner::new();
        let mut router = TierRouter::new(PendingQueue::new(Box::new(MemoryStore::default())));
        let disposition = router.save(area(25.0), &Identity::Guest, &api, &jobs);
        assert_eq!(disposition, SaveDisposition::QueuedLocally);
        assert_eq!(router.pending_count(), 1);
    }

    #[test]
    fn flush_failures_return_to_the_tail() {
        let mut router = TierRouter::new(PendingQueue::new(Box::new(MemoryStore::default())));
        let api = ApiClient::new("http://localhost:8000", std::time::Duration::from_secs(1))
            .unwrap();
        let jobs = JobRunner::new();
        router.save(area(25.0), &Identity::Guest, &api, &jobs);
        router.save(area(26.0), &Identity::Guest, &api, &jobs);
        let items = router.pending.take_all();
        router.flush_in_flight = true;
        let report = drain_in_order(items, |a| if a.x1 == 25.0 { Err(()) } else { Ok(()) });
        router.save(area(27.0), &Identity::Guest, &api, &jobs);
        router.finish_flush(report.failed);
        assert!(!router.flush_in_flight());
        assert_eq!(router.pending_count(), 2);
        let order: Vec<f64> = router.pending.take_all().iter().map(|a| a.x1).collect();
        assert_eq!(order, vec![27.0, 25.0]);
    }
}
