//! Destination preparation before any key is transferred.

use tracing::info;

use super::RunMode;
use crate::error::{MigrationError, Role};
use crate::session::{commands, Session};

/// What preflight does to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightAction {
    /// Drop every destination key; nothing is left to count.
    Flush,
    /// Dry run with flush requested: touch nothing, report as if flushed.
    SimulateFlush,
    /// Count the keys already on the destination.
    Count,
}

impl PreflightAction {
    /// Decide the action for a run.
    pub fn plan(mode: RunMode, flush: bool) -> Self {
        match (flush, mode) {
            (true, RunMode::Live) => PreflightAction::Flush,
            (true, RunMode::DryRun) => PreflightAction::SimulateFlush,
            (false, _) => PreflightAction::Count,
        }
    }
}

/// Prepare the destination and return how many keys it holds going in.
pub async fn preflight<D: Session + ?Sized>(
    destination: &mut D,
    action: PreflightAction,
) -> Result<u64, MigrationError> {
    match action {
        PreflightAction::Flush => {
            info!(destination = destination.label(), "flushing destination");
            commands::flush_db(destination)
                .await
                .map_err(MigrationError::Flush)?;
            Ok(0)
        }
        PreflightAction::SimulateFlush => {
            info!(
                destination = destination.label(),
                "dry run: destination flush simulated"
            );
            Ok(0)
        }
        PreflightAction::Count => {
            let existing = commands::db_size(destination)
                .await
                .map_err(|e| MigrationError::connection(Role::Destination, e))?;
            info!(destination = destination.label(), existing, "destination key count");
            Ok(existing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;

    fn seeded(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store.set_string(format!("pre:{}", i), "v");
        }
        store
    }

    #[test]
    fn test_plan() {
        assert_eq!(
            PreflightAction::plan(RunMode::Live, true),
            PreflightAction::Flush
        );
        assert_eq!(
            PreflightAction::plan(RunMode::DryRun, true),
            PreflightAction::SimulateFlush
        );
        assert_eq!(
            PreflightAction::plan(RunMode::Live, false),
            PreflightAction::Count
        );
        assert_eq!(
            PreflightAction::plan(RunMode::DryRun, false),
            PreflightAction::Count
        );
    }

    #[tokio::test]
    async fn test_flush_empties_destination() {
        let store = seeded(5);
        let existing = preflight(&mut store.session(), PreflightAction::Flush)
            .await
            .unwrap();
        assert_eq!(existing, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_simulated_flush_touches_nothing() {
        let store = seeded(5);
        let existing = preflight(&mut store.session(), PreflightAction::SimulateFlush)
            .await
            .unwrap();
        assert_eq!(existing, 0);
        assert_eq!(store.len(), 5);
        assert!(store.command_log().is_empty());
    }

    #[tokio::test]
    async fn test_count() {
        let store = seeded(3);
        let existing = preflight(&mut store.session(), PreflightAction::Count)
            .await
            .unwrap();
        assert_eq!(existing, 3);
    }

    #[tokio::test]
    async fn test_flush_failure_is_flush_error() {
        let store = seeded(1);
        store.disconnect_after(0);
        let err = preflight(&mut store.session(), PreflightAction::Flush)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Flush(_)));
    }
}
