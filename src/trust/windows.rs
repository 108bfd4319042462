use super::{StoreScope, TrustReport};
use crate::metrics::TRUST_PROBE_QUERIES;
use anyhow::{Context, Result, anyhow};
use std::{future::Future, time::Duration};
use tokio::{process::Command, time::timeout};

/// Attempts before settling on a negative verdict. The store updates
/// asynchronously after `mkcert -install`, so one miss proves nothing.
const ATTEMPTS: u32 = 3;

/// Fixed backoff between attempts
const BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound for a single store query
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A queryable root certificate store. The probe is generic over this so
/// tests can inject fakes and assert call counts and backoff behavior.
pub trait RootStoreQuery {
    /// Count store entries whose subject matches the authority marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query tool cannot be invoked,
    /// exits unsuccessfully, or exceeds its timeout.
    fn count_matching(
        &self,
        scope: StoreScope,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// Windows trust probe: current-user store first, local-machine store
/// second, bounded retries with a fixed backoff in between.
pub struct WindowsProbe<Q> {
    query: Q,
}

impl<Q: RootStoreQuery> WindowsProbe<Q> {
    #[must_use]
    pub const fn new(query: Q) -> Self {
        Self { query }
    }

    /// Run the probe.
    ///
    /// A current-user hit short-circuits the attempt: the local-machine
    /// store is not consulted. Query failures are logged and retried like
    /// misses; after the final attempt the verdict is `NotTrusted` -
    /// absence of evidence after retries is treated as absence of trust.
    pub async fn probe(&self) -> TrustReport {
        for attempt in 1..=ATTEMPTS {
            if let Some(report) = self.attempt(attempt).await {
                return report;
            }
            if attempt < ATTEMPTS {
                tokio::time::sleep(BACKOFF).await;
            }
        }

        TrustReport::not_trusted(
            vec![StoreScope::CurrentUser, StoreScope::LocalMachine],
            ATTEMPTS,
        )
    }

    async fn attempt(&self, attempt: u32) -> Option<TrustReport> {
        for scope in [StoreScope::CurrentUser, StoreScope::LocalMachine] {
            match self.query.count_matching(scope).await {
                Ok(count) if count > 0 => {
                    TRUST_PROBE_QUERIES
                        .with_label_values(&[&scope.to_string(), "hit"])
                        .inc();
                    let stores = match scope {
                        StoreScope::CurrentUser => vec![StoreScope::CurrentUser],
                        _ => vec![StoreScope::CurrentUser, StoreScope::LocalMachine],
                    };
                    return Some(TrustReport::trusted(count, stores, attempt));
                }
                Ok(_) => {
                    TRUST_PROBE_QUERIES
                        .with_label_values(&[&scope.to_string(), "miss"])
                        .inc();
                }
                Err(e) => {
                    TRUST_PROBE_QUERIES
                        .with_label_values(&[&scope.to_string(), "error"])
                        .inc();
                    eprintln!("trust store query failed ({scope}, attempt {attempt}): {e:#}");
                }
            }
        }
        None
    }
}

/// Queries the Windows root stores through `powershell`, counting
/// certificate subjects that contain the authority marker.
pub struct PowershellStoreQuery {
    marker: String,
}

impl PowershellStoreQuery {
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    const fn store_path(scope: StoreScope) -> &'static str {
        match scope {
            StoreScope::CurrentUser => r"Cert:\CurrentUser\Root",
            // System only exists on Linux; map it to the machine store
            StoreScope::LocalMachine | StoreScope::System => r"Cert:\LocalMachine\Root",
        }
    }
}

impl RootStoreQuery for PowershellStoreQuery {
    fn count_matching(
        &self,
        scope: StoreScope,
    ) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let command = format!(
                "Get-ChildItem -Path {} | Select-Object -ExpandProperty Subject",
                Self::store_path(scope)
            );

            let output = timeout(
                QUERY_TIMEOUT,
                Command::new("powershell")
                    .args(["-NoProfile", "-Command", &command])
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .map_err(|_| anyhow!("store query timed out after {QUERY_TIMEOUT:?} ({scope})"))?
            .with_context(|| format!("failed to invoke powershell for store query ({scope})"))?;

            if !output.status.success() {
                anyhow::bail!(
                    "store query exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout
                .lines()
                .filter(|line| line.contains(&self.marker))
                .count())
        }
    }
}
