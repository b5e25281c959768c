//! Startup sweep of canary deployments left behind by a previous run

use crate::cluster::ClusterClient;
use crate::error::ClusterError;
use crate::models::APP_SELECTOR;
use crate::observability::StructuredLogger;
use tracing::info;

/// What the sweep found and removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every canary deployment in `namespace`
///
/// Matches on the shared `app` label, so canaries from any earlier cycle are
/// caught. Individual delete failures are logged and counted; only a failure
/// to list is returned.
pub async fn sweep_leftovers(
    cluster: &dyn ClusterClient,
    namespace: &str,
) -> Result<SweepReport, ClusterError> {
    let logger = StructuredLogger::new(namespace);
    let leftovers = cluster.list_deployments(namespace, APP_SELECTOR).await?;

    let mut report = SweepReport {
        found: leftovers.len(),
        ..Default::default()
    };

    for leftover in leftovers {
        match cluster
            .delete_deployment(&leftover.namespace, &leftover.name)
            .await
        {
            Ok(()) => {
                logger.log_leftover(&leftover.name);
                report.deleted += 1;
            }
            Err(e) => {
                logger.log_cleanup_failed(&leftover.name, &e);
                report.failed += 1;
            }
        }
    }

    info!(
        namespace = %namespace,
        found = report.found,
        deleted = report.deleted,
        failed = report.failed,
        "Leftover sweep complete"
    );
    Ok(report)
}
