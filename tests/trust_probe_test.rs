#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{Result, bail};
use certdash::trust::{LinuxProbe, RootStoreQuery, StoreScope, TrustStatus, WindowsProbe};
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::time::{Duration, Instant};

/// Scripted store query: one response per call, last response repeats.
/// `None` simulates a query tool failure.
#[derive(Default)]
struct FakeQuery {
    user: Vec<Option<usize>>,
    machine: Vec<Option<usize>>,
    user_calls: AtomicUsize,
    machine_calls: AtomicUsize,
}

impl FakeQuery {
    fn respond(plan: &[Option<usize>], calls: &AtomicUsize) -> Result<usize> {
        let i = calls.fetch_add(1, Ordering::SeqCst);
        match plan.get(i).or_else(|| plan.last()).copied().flatten() {
            Some(count) => Ok(count),
            None => bail!("simulated store query failure"),
        }
    }

    fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    fn machine_calls(&self) -> usize {
        self.machine_calls.load(Ordering::SeqCst)
    }
}

impl RootStoreQuery for &FakeQuery {
    fn count_matching(&self, scope: StoreScope) -> impl Future<Output = Result<usize>> + Send {
        async move {
            match scope {
                StoreScope::CurrentUser => FakeQuery::respond(&self.user, &self.user_calls),
                _ => FakeQuery::respond(&self.machine, &self.machine_calls),
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_current_user_hit_short_circuits() {
    let fake = FakeQuery {
        user: vec![Some(2)],
        ..FakeQuery::default()
    };

    let start = Instant::now();
    let report = WindowsProbe::new(&fake).probe().await;

    assert_eq!(report.status, TrustStatus::Trusted);
    assert_eq!(report.matches, Some(2));
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stores, vec![StoreScope::CurrentUser]);

    // Local-machine store never consulted, no backoff slept
    assert_eq!(fake.user_calls(), 1);
    assert_eq!(fake.machine_calls(), 0);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_local_machine_hit_after_user_miss() {
    let fake = FakeQuery {
        user: vec![Some(0)],
        machine: vec![Some(1)],
        ..FakeQuery::default()
    };

    let start = Instant::now();
    let report = WindowsProbe::new(&fake).probe().await;

    assert_eq!(report.status, TrustStatus::Trusted);
    assert_eq!(report.matches, Some(1));
    assert_eq!(report.attempts, 1);
    assert_eq!(
        report.stores,
        vec![StoreScope::CurrentUser, StoreScope::LocalMachine]
    );
    assert_eq!(fake.user_calls(), 1);
    assert_eq!(fake.machine_calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_all_misses_exhaust_attempts_with_two_backoffs() {
    let fake = FakeQuery {
        user: vec![Some(0)],
        machine: vec![Some(0)],
        ..FakeQuery::default()
    };

    let start = Instant::now();
    let report = WindowsProbe::new(&fake).probe().await;

    assert_eq!(report.status, TrustStatus::NotTrusted);
    assert_eq!(report.matches, Some(0));
    assert_eq!(report.attempts, 3);
    assert_eq!(fake.user_calls(), 3);
    assert_eq!(fake.machine_calls(), 3);

    // Backoff after attempts 1 and 2, never after attempt 3
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_query_failures_resolve_to_not_trusted() {
    let fake = FakeQuery {
        user: vec![None],
        machine: vec![None],
        ..FakeQuery::default()
    };

    let start = Instant::now();
    let report = WindowsProbe::new(&fake).probe().await;

    // Absence of evidence after retries is absence of trust; the error
    // never propagates
    assert_eq!(report.status, TrustStatus::NotTrusted);
    assert_eq!(report.attempts, 3);
    assert_eq!(fake.user_calls(), 3);
    assert_eq!(fake.machine_calls(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_after_transient_failure() {
    let fake = FakeQuery {
        user: vec![None, Some(1)],
        machine: vec![Some(0)],
        ..FakeQuery::default()
    };

    let start = Instant::now();
    let report = WindowsProbe::new(&fake).probe().await;

    assert_eq!(report.status, TrustStatus::Trusted);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.stores, vec![StoreScope::CurrentUser]);
    assert_eq!(fake.user_calls(), 2);
    assert_eq!(fake.machine_calls(), 1);

    // One backoff between the failed attempt and the successful one
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_linux_anchor_present_is_trusted() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mkcert_development_CA_42.crt"), "anchor").unwrap();

    let probe = LinuxProbe::with_anchor_dirs(vec![dir.path().to_path_buf()]);
    let report = probe.probe().await;

    assert_eq!(report.status, TrustStatus::Trusted);
    assert_eq!(report.matches, Some(1));
    assert_eq!(report.attempts, 1);
    assert_eq!(report.stores, vec![StoreScope::System]);
}

#[tokio::test(start_paused = true)]
async fn test_linux_absent_anchor_is_not_trusted_without_sleeping() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("unrelated-ca.crt"), "anchor").unwrap();

    let probe = LinuxProbe::with_anchor_dirs(vec![dir.path().to_path_buf()]);

    let start = Instant::now();
    let report = probe.probe().await;

    assert_eq!(report.status, TrustStatus::NotTrusted);
    assert_eq!(report.matches, Some(0));
    assert_eq!(report.attempts, 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_linux_counts_anchors_across_directories() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(first.path().join("mkcert_development_CA_1.crt"), "a").unwrap();
    std::fs::write(second.path().join("mkcert_development_CA_2.crt"), "b").unwrap();

    let probe = LinuxProbe::with_anchor_dirs(vec![
        first.path().to_path_buf(),
        second.path().to_path_buf(),
    ]);
    let report = probe.probe().await;

    assert_eq!(report.status, TrustStatus::Trusted);
    assert_eq!(report.matches, Some(2));
}
