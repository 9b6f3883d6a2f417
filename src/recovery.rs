//! Cold-start session recovery and its graceful-shutdown counterpart.
//!
//! Recovery runs once after registration when the backend reports
//! `recoveryRequired`: restore auth material from the remote store, recreate
//! each assigned session with the recovered-session reconnect policy, and
//! report the aggregate outcome. Errors are recorded per session; recovery
//! always completes and reports.

use std::sync::Arc;

use tokio::time::Duration;

use crate::{
    auth::AuthStateStore,
    registry::{
        BackendSessionStatus,
        RecoveryOutcome,
        RecoveryReport,
        RecoveryResultEntry,
        RecoverySummary,
        RegistryClient,
        preserved_report,
    },
    session::{SessionManager, SessionState},
};

/// Runs the recovery pass against the backend's assignment list.
pub async fn run_recovery(
    manager: &SessionManager,
    registry: &Arc<RegistryClient>,
    auth: &Arc<AuthStateStore>,
    startup_delay: Duration,
) -> RecoveryReport {
    if !startup_delay.is_zero() {
        tokio::time::sleep(startup_delay).await;
    }

    let worker_id = registry.identity().worker_id.clone();
    let assignments = match registry.fetch_assignments().await {
        Ok(assignments) => assignments,
        Err(error) => {
            tracing::warn!(%error, "assignment fetch failed, skipping recovery");
            Vec::new()
        }
    };

    tracing::info!(count = assignments.len(), "session recovery started");

    let mut results = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let session_id = assignment.session_id.clone();

        if manager.status(&session_id).await.is_ok() {
            results.push(entry(&session_id, RecoveryOutcome::Skipped, "already held"));
            continue;
        }

        if !matches!(
            assignment.status,
            BackendSessionStatus::Connected
                | BackendSessionStatus::QrRequired
                | BackendSessionStatus::Reconnecting
        ) {
            results.push(entry(
                &session_id,
                RecoveryOutcome::Skipped,
                "prior status not recoverable",
            ));
            continue;
        }

        // Best-effort: a fresh session without creds falls through to QR.
        if auth.has_remote() {
            if let Err(error) = auth.restore(&session_id).await {
                tracing::warn!(%session_id, %error, "auth restore failed");
            }
        }

        match manager
            .start(&session_id, &assignment.user_id, None, true)
            .await
        {
            Ok(_) => {
                results.push(RecoveryResultEntry {
                    session_id,
                    outcome: RecoveryOutcome::Recovered,
                    detail: None,
                });
            }
            Err(error) => {
                results.push(entry(&session_id, RecoveryOutcome::Failed, &error.to_string()));
            }
        }
    }

    let summary = summarize(&results);
    tracing::info!(
        recovered = summary.recovered,
        failed = summary.failed,
        skipped = summary.skipped,
        "session recovery finished"
    );

    let report = RecoveryReport {
        worker_id,
        results,
        summary,
    };

    if let Err(error) = registry.report_recovery(&report).await {
        tracing::warn!(%error, "recovery report failed");
    }

    report
}

/// Graceful-shutdown counterpart: snapshot auth for every session worth
/// resuming, then tell the backend which sessions were preserved.
pub async fn preserve_sessions(
    manager: &SessionManager,
    auth: &Arc<AuthStateStore>,
    registry: Option<&Arc<RegistryClient>>,
) -> usize {
    let snapshots = manager.list().await;
    let mut preserved = 0;

    for snapshot in &snapshots {
        if !matches!(
            snapshot.state,
            SessionState::Connected | SessionState::QrReady
        ) {
            continue;
        }

        if auth.has_remote() {
            match auth.snapshot(&snapshot.session_id).await {
                Ok(_) => preserved += 1,
                Err(error) => {
                    tracing::warn!(
                        session_id = %snapshot.session_id,
                        %error,
                        "auth preservation failed"
                    );
                }
            }
        } else {
            preserved += 1;
        }
    }

    if let Some(registry) = registry {
        let report = preserved_report(&registry.identity().worker_id, &snapshots);
        if !report.sessions.is_empty() {
            if let Err(error) = registry.report_preserved(&report).await {
                tracing::warn!(%error, "preserved-session report failed");
            }
        }
    }

    tracing::info!(preserved, "session preservation finished");
    preserved
}

fn entry(session_id: &str, outcome: RecoveryOutcome, detail: &str) -> RecoveryResultEntry {
    RecoveryResultEntry {
        session_id: session_id.to_owned(),
        outcome,
        detail: Some(detail.to_owned()),
    }
}

fn summarize(results: &[RecoveryResultEntry]) -> RecoverySummary {
    let mut summary = RecoverySummary {
        total: results.len(),
        ..RecoverySummary::default()
    };

    for result in results {
        match result.outcome {
            RecoveryOutcome::Recovered => summary.recovered += 1,
            RecoveryOutcome::Failed => summary.failed += 1,
            RecoveryOutcome::Skipped => summary.skipped += 1,
        }
    }
    summary
}
