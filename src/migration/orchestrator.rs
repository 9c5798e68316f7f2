//! Run driver: preflight, enumeration and the per-key transfer loop.

use std::time::Instant;

use bytes::Bytes;
use keyferry_client::Error as ClientError;
use tracing::{debug, error, info, warn};

use super::classifier::{classify, Ttl};
use super::preflight::{preflight, PreflightAction};
use super::replicator::replicator_for;
use super::report::{MigrationReport, SkipReason, TransferOutcome};
use super::{KeyType, RunMode, RunPhase};
use crate::config::{MigrationConfig, DEFAULT_SCAN_COUNT};
use crate::error::{KeyError, MigrationAbort, MigrationError, Role};
use crate::session::{commands, KeyScan, RemoteSession, Session};

/// Called after every key with the progress so far.
pub type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Dry run or live.
    pub mode: RunMode,
    /// Flush the destination first (simulated in a dry run).
    pub flush: bool,
    /// `COUNT` hint for each `SCAN`.
    pub scan_count: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Live,
            flush: false,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl RunOptions {
    /// Options described by a configuration.
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            mode: RunMode::from_dry_run(config.dry_run),
            flush: config.flush,
            scan_count: config.scan_count,
        }
    }
}

/// Progress so far, handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Keys handled so far.
    pub processed: u64,
    /// Source key count taken before enumeration.
    pub estimated_total: u64,
    /// Keys migrated so far.
    pub migrated: u64,
    /// Keys skipped so far.
    pub skipped: u64,
    /// Keys failed so far.
    pub failed: u64,
}

/// Migrates every key of `source` onto `destination`.
///
/// Keys are handled one at a time. A key's failure is recorded and the loop
/// moves on; only errors that leave a session unusable, a failed flush or a
/// broken enumeration stop the run.
pub struct Migrator<S, D> {
    source: S,
    destination: D,
    options: RunOptions,
    progress: Option<ProgressCallback>,
    report: MigrationReport,
}

impl<S: Session, D: Session> Migrator<S, D> {
    /// Create a migrator over two open sessions.
    pub fn new(source: S, destination: D, options: RunOptions) -> Self {
        Self {
            source,
            destination,
            options,
            progress: None,
            report: MigrationReport::new(options.mode),
        }
    }

    /// Report progress after every key.
    pub fn with_progress(mut self, callback: impl Fn(&ProgressSnapshot) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Like [`Migrator::with_progress`], for an already boxed callback.
    pub fn with_progress_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Run to completion.
    ///
    /// On a fatal error the returned [`MigrationAbort`] carries the report
    /// accumulated up to that point.
    pub async fn run(mut self) -> Result<MigrationReport, MigrationAbort> {
        let started = Instant::now();
        info!(
            mode = %self.options.mode,
            flush = self.options.flush,
            source = self.source.label(),
            destination = self.destination.label(),
            "migration starting"
        );

        let result = self.drive().await;
        self.report.duration = started.elapsed();

        match result {
            Ok(()) => {
                self.transition(RunPhase::Reporting);
                self.transition(RunPhase::Done);
                info!(
                    total = self.report.total_source_keys,
                    migrated = self.report.migrated,
                    skipped = self.report.skipped,
                    failed = self.report.failed,
                    "migration finished"
                );
                Ok(self.report)
            }
            Err(cause) => {
                error!(error = %cause, processed = self.report.total_source_keys, "migration aborted");
                self.transition(RunPhase::Aborted);
                Err(MigrationAbort {
                    cause,
                    partial: self.report,
                })
            }
        }
    }

    fn transition(&mut self, phase: RunPhase) {
        debug!(from = %self.report.phase, to = %phase, "phase change");
        self.report.phase = phase;
    }

    async fn drive(&mut self) -> Result<(), MigrationError> {
        self.transition(RunPhase::Preflight);
        let action = PreflightAction::plan(self.options.mode, self.options.flush);
        self.report.preexisting_destination_keys = preflight(&mut self.destination, action).await?;

        self.transition(RunPhase::Enumerating);
        let estimated_total = commands::db_size(&mut self.source)
            .await
            .map_err(|e| MigrationError::connection(Role::Source, e))?;
        if estimated_total == 0 {
            info!(source = self.source.label(), "no keys found on source");
            return Ok(());
        }
        info!(estimated_total, "enumerating source keys");

        let mut scan = KeyScan::new(self.options.scan_count);
        while let Some(batch) = scan
            .next_batch(&mut self.source)
            .await
            .map_err(MigrationError::Enumeration)?
        {
            for key in batch {
                let outcome = self.transfer(key).await?;
                self.report.record(&outcome);
                self.notify(estimated_total);
            }
        }
        Ok(())
    }

    fn notify(&self, estimated_total: u64) {
        if let Some(callback) = &self.progress {
            callback(&ProgressSnapshot {
                processed: self.report.total_source_keys,
                estimated_total,
                migrated: self.report.migrated,
                skipped: self.report.skipped,
                failed: self.report.failed,
            });
        }
    }

    /// Classify, read and (in a live run) write one key.
    async fn transfer(&mut self, key: Bytes) -> Result<TransferOutcome, MigrationError> {
        let record = match classify(&mut self.source, key.clone()).await {
            Ok(record) => record,
            Err(e) => {
                let e = fatal(Role::Source, e)?;
                warn!(key = %show(&key), error = %e, "classification failed, skipping");
                return Ok(TransferOutcome::skipped(
                    key,
                    KeyType::Unsupported,
                    SkipReason::Unsupported,
                )
                .with_error(KeyError::Classification(e.to_string())));
            }
        };

        // No time left: evicted or expired after SCAN handed it out.
        if record.ttl == Ttl::Expired {
            warn!(key = %show(&key), "key vanished from source before read");
            return Ok(TransferOutcome::failed(key, record.kind, KeyError::Vanished));
        }

        let Some(replicator) = replicator_for(record.kind) else {
            debug!(key = %show(&key), "unsupported type, skipping");
            return Ok(TransferOutcome::skipped(
                key,
                record.kind,
                SkipReason::Unsupported,
            ));
        };

        let value = match replicator.fetch(&mut self.source, &record.name).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!(key = %show(&key), "key vanished from source");
                return Ok(TransferOutcome::failed(key, record.kind, KeyError::Vanished));
            }
            Err(e) => {
                let e = fatal(Role::Source, e)?;
                warn!(key = %show(&key), error = %e, "read failed");
                return Ok(TransferOutcome::failed(
                    key,
                    record.kind,
                    KeyError::Read(e.to_string()),
                ));
            }
        };

        let existed = if self.options.flush {
            false
        } else {
            match commands::exists(&mut self.destination, &record.name).await {
                Ok(existed) => existed,
                Err(e) => {
                    let e = fatal(Role::Destination, e)?;
                    warn!(key = %show(&key), error = %e, "destination probe failed");
                    return Ok(TransferOutcome::failed(
                        key,
                        record.kind,
                        KeyError::Probe(e.to_string()),
                    ));
                }
            }
        };

        let ttl = match record.ttl_at(Instant::now()) {
            Ttl::Persistent => None,
            Ttl::Remaining(left) => Some(left),
            Ttl::Expired => {
                debug!(key = %show(&key), "TTL ran out before write, skipping");
                return Ok(
                    TransferOutcome::skipped(key, record.kind, SkipReason::Expired).existed(existed),
                );
            }
        };

        if self.options.mode == RunMode::DryRun {
            debug!(key = %show(&key), kind = %record.kind, elements = value.len(), "dry run: would migrate");
            return Ok(TransferOutcome::migrated(key, record.kind).existed(existed));
        }

        match replicator
            .write(&mut self.destination, &record.name, &value, ttl)
            .await
        {
            Ok(()) => {
                debug!(key = %show(&key), kind = %record.kind, ttl_ms = ttl.map(|t| t.as_millis() as u64), "migrated");
                Ok(TransferOutcome::migrated(key, record.kind).existed(existed))
            }
            Err(e) => {
                let e = fatal(Role::Destination, e)?;
                warn!(key = %show(&key), error = %e, "write failed");
                Ok(
                    TransferOutcome::failed(key, record.kind, KeyError::Write(e.to_string()))
                        .existed(existed),
                )
            }
        }
    }
}

/// Escalate errors that leave the session unusable; hand back the rest.
fn fatal(role: Role, e: ClientError) -> Result<ClientError, MigrationError> {
    if e.is_fatal() {
        Err(MigrationError::connection(role, e))
    } else {
        Ok(e)
    }
}

fn show(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Connect both endpoints described by `config` and migrate.
pub async fn run_migration(
    config: &MigrationConfig,
    progress: Option<ProgressCallback>,
) -> Result<MigrationReport, MigrationAbort> {
    let options = RunOptions::from_config(config);
    let abort = |cause| MigrationAbort {
        cause,
        partial: MigrationReport {
            phase: RunPhase::Aborted,
            ..MigrationReport::new(options.mode)
        },
    };

    config.validate().map_err(abort)?;

    let source = RemoteSession::connect(&config.source_connection())
        .await
        .map_err(|e| abort(MigrationError::connection(Role::Source, e)))?;
    info!(source = source.label(), "connected to source");

    let destination = RemoteSession::connect(&config.destination_connection())
        .await
        .map_err(|e| abort(MigrationError::connection(Role::Destination, e)))?;
    info!(destination = destination.label(), "connected to destination");

    Migrator::new(source, destination, options)
        .with_progress_callback(progress)
        .run()
        .await
}
