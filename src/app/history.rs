use crate::api::{ApiClient, ApiError};
use crate::model::{Area, Identity};

use super::jobs::{JobRunner, Outcome};

/// Read/select/delete over the authenticated user's stored areas. History
/// requires an authenticated identity; guest access is refused with a
/// message, not silently ignored.
#[derive(Default)]
pub(super) struct HistoryPanel {
    pub open: bool,
    pub loading: bool,
    items: Vec<Area>,
    pub selected: Option<usize>,
}

pub(super) enum HistoryAction {
    Opened,
    Closed,
    Refused(&'static str),
}

impl HistoryPanel {
    pub fn items(&self) -> &[Area] {
        &self.items
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Opening re-fetches; the list is a snapshot, not a live cursor.
    /// While a pending-queue flush is in flight the load is deferred: the
    /// flush outcome triggers the reload, so the first snapshot already
    /// includes the drained queue.
    pub fn toggle(
        &mut self,
        identity: &Identity,
        flush_in_flight: bool,
        api: &ApiClient,
        jobs: &JobRunner,
    ) -> HistoryAction {
        if self.open {
            self.open = false;
            return HistoryAction::Closed;
        }
        let Some(username) = identity.username() else {
            return HistoryAction::Refused("You cannot access history without an account.");
        };
        self.open = true;
        if flush_in_flight {
            self.loading = true;
        } else {
            self.reload(username, api, jobs);
        }
        HistoryAction::Opened
    }

    pub fn reload(&mut self, username: &str, api: &ApiClient, jobs: &JobRunner) {
        self.loading = true;
        let username = username.to_string();
        let api = api.clone();
        jobs.run(move |tx| {
            let _ = tx.send(Outcome::HistoryLoaded(api.list_coords(&username)));
        });
    }

    pub fn apply_loaded(&mut self, result: Result<Vec<Area>, ApiError>) -> Result<(), ApiError> {
        self.loading = false;
        match result {
            Ok(items) => {
                self.items = items;
                self.selected = None;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn request_delete(
        &self,
        identity: &Identity,
        id: i64,
        api: &ApiClient,
        jobs: &JobRunner,
    ) -> Result<(), &'static str> {
        let Some(username) = identity.username() else {
            return Err("You cannot delete history without an account.");
        };
        let username = username.to_string();
        let api = api.clone();
        jobs.run(move |tx| {
            let result = api.delete_coord(&username, id);
            let _ = tx.send(Outcome::AreaDeleted { id, result });
        });
        Ok(())
    }

    /// A confirmed server delete removes the row from the snapshot; a
    /// failed one leaves the list untouched.
    pub fn apply_deleted(&mut self, id: i64, result: &Result<(), ApiError>) {
        if result.is_ok() {
            self.items.retain(|item| item.id != Some(id));
            self.selected = None;
        }
    }

    /// Identity left the authenticated tier; the cache goes with it.
    pub fn clear(&mut self) {
        self.items.clear();
        self.selected = None;
        self.open = false;
        self.loading = false;
    }
}

/// "dd/mm/yy hh:mm" out of an ISO-8601 `created_at`, best effort.
pub(super) fn format_created_at(created_at: Option<&str>) -> String {
    let Some(raw) = created_at else {
        return "-".to_string();
    };
    let date = raw.get(..10).unwrap_or(raw);
    let mut parts = date.split('-');
    let (Some(year), Some(month), Some(day)) = (parts.next(), parts.next(), parts.next()) else {
        return raw.to_string();
    };
    let time = raw
        .get(11..16)
        .filter(|t| t.chars().all(|c| c.is_ascii_digit() || c == ':'))
        .unwrap_or("00:00");
    let short_year = year.get(2..).filter(|_| year.len() == 4).unwrap_or(year);
    format!("{day}/{month}/{short_year} {time}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: i64) -> Area {
        Area {
            id: Some(id),
            created_at: Some("2024-07-01T10:30:00".to_string()),
            ..Area::from_corners(25.0, 45.0, 25.1, 45.1)
        }
    }

    #[test]
    fn guest_toggle_is_refused_with_a_message() {
        let api = ApiClient::new("http://localhost:8000", std::time::Duration::from_secs(1))
            .unwrap();
        let jobs = JobRunner::new();
        let mut panel = HistoryPanel::default();
        let action = panel.toggle(&Identity::Guest, false, &api, &jobs);
        assert!(matches!(action, HistoryAction::Refused(_)));
        assert!(!panel.open);
    }

    #[test]
    fn toggle_during_a_flush_defers_the_load() {
        let api = ApiClient::new("http://localhost:8000", std::time::Duration::from_secs(1))
            .unwrap();
        let jobs = JobRunner::new();
        let mut panel = HistoryPanel::default();
        let identity = Identity::Authenticated("alice".to_string());
        let action = panel.toggle(&identity, true, &api, &jobs);
        assert!(matches!(action, HistoryAction::Opened));
        assert!(panel.open);
        assert!(panel.loading);
        // No request went out; the flush outcome drives the reload.
        assert!(jobs.poll().is_empty());
    }

    #[test]
    fn loaded_snapshot_replaces_the_list() {
        let mut panel = HistoryPanel::default();
        panel
            .apply_loaded(Ok(vec![stored(1), stored(2)]))
            .unwrap();
        assert_eq!(panel.count(), 2);
    }

    #[test]
    fn failed_load_keeps_the_previous_snapshot() {
        let mut panel = HistoryPanel::default();
        panel.apply_loaded(Ok(vec![stored(1)])).unwrap();
        let err = panel.apply_loaded(Err(ApiError::EmptyBody));
        assert!(err.is_err());
        assert_eq!(panel.count(), 1);
    }

    #[test]
    fn confirmed_delete_removes_only_that_row() {
        let mut panel = HistoryPanel::default();
        panel
            .apply_loaded(Ok(vec![stored(1), stored(2)]))
            .unwrap();
        panel.apply_deleted(1, &Ok(()));
        assert_eq!(panel.count(), 1);
        assert_eq!(panel.items()[0].id, Some(2));
    }

    #[test]
    fn failed_delete_leaves_the_list_unchanged() {
        let mut panel = HistoryPanel::default();
        panel
            .apply_loaded(Ok(vec![stored(1), stored(2)]))
            .unwrap();
        panel.apply_deleted(1, &Err(ApiError::EmptyBody));
        assert_eq!(panel.count(), 2);
    }

    #[test]
    fn created_at_renders_short_form() {
        assert_eq!(
            format_created_at(Some("2024-07-01T10:30:00")),
            "01/07/24 10:30"
        );
        assert_eq!(format_created_at(None), "-");
    }
}
