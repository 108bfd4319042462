use crate::{
    cert::{ExpiryOutcome, resolve_expiry},
    metrics::{
        CA_TRUSTED, CERT_EXPIRY_DAYS, ITERATIONS_TOTAL, LAST_SUCCESS, PANICS_RECOVERED, RUNTIME,
        TRUST_PROBE_ATTEMPTS, encode_metrics,
    },
    mkcert::{Mkcert, sanitize_stem},
    store::{CertificateRecord, NewCertificate, Store},
    trust::{Platform, PlatformProbe, TrustReport, TrustStatus},
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{net::TcpListener, sync::RwLock, sync::mpsc, task, time};

/// Consecutive refresh failures tolerated before the service gives up
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

const SETTING_CERT_PATH: &str = "cert_path";

/// Shared server state, constructed once at startup
pub struct AppState {
    store: Store,
    mkcert: Mkcert,
    probe: PlatformProbe,
    certs_dir: PathBuf,
    /// Latest trust probe result, refreshed by the background loop and
    /// after CA install/uninstall so `/api/status` never pays the probe's
    /// worst-case latency
    trust: RwLock<Option<TrustReport>>,
}

#[derive(Serialize, Debug)]
struct StatusResponse {
    mkcert_version: Option<String>,
    root_ca: Option<String>,
    cert_path: String,
    platform: String,
    /// Legacy boolean view of the trust report
    installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    trust: Option<TrustReport>,
}

#[derive(Serialize, Debug)]
struct ActionResponse {
    success: bool,
    output: String,
}

#[derive(Deserialize, Debug)]
struct CreateCertRequest {
    domains: Vec<String>,
    name: Option<String>,
}

#[derive(Serialize, Debug)]
struct CreateCertResponse {
    success: bool,
    id: i64,
    cert_path: String,
    key_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry_source: Option<String>,
}

#[derive(Serialize, Debug)]
struct RenewResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

#[derive(Serialize, Debug)]
struct DeleteResponse {
    success: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct ErrorBody {
    error: String,
}

type ErrorResponse = (StatusCode, Json<ErrorBody>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ErrorResponse {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn internal_error(e: &anyhow::Error) -> ErrorResponse {
    eprintln!("{e:#}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

fn not_found(message: &str) -> ErrorResponse {
    error_response(StatusCode::NOT_FOUND, message)
}

/// Start the dashboard service
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the listener cannot
/// bind, or the refresh loop dies.
pub async fn start(
    db: PathBuf,
    certs_dir: PathBuf,
    interval: u16,
    listen: Option<IpAddr>,
    port: u16,
    mkcert_bin: PathBuf,
) -> anyhow::Result<()> {
    let store = Store::open(&db).await?;

    // Seed the certificate storage path on first run
    if store.setting(SETTING_CERT_PATH).await?.is_none() {
        tokio::fs::create_dir_all(&certs_dir)
            .await
            .with_context(|| format!("failed to create certs dir {}", certs_dir.display()))?;
        let dir = certs_dir
            .to_str()
            .context("certs dir path is not valid UTF-8")?;
        store.set_setting(SETTING_CERT_PATH, dir).await?;
    }

    let platform = Platform::current();
    let state = Arc::new(AppState {
        store: store.clone(),
        mkcert: Mkcert::new(mkcert_bin),
        probe: PlatformProbe::for_platform(platform),
        certs_dir,
        trust: RwLock::new(None),
    });

    let app = Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/install-ca", post(install_ca_handler))
        .route("/api/uninstall-ca", post(uninstall_ca_handler))
        .route("/api/ca-download", get(ca_download_handler))
        .route(
            "/api/certificates",
            get(list_certificates_handler).post(create_certificate_handler),
        )
        .route("/api/certificates/{id}", delete(delete_certificate_handler))
        .route(
            "/api/certificates/{id}/renew",
            post(renew_certificate_handler),
        )
        .route(
            "/api/certificates/{id}/download",
            get(download_certificate_handler),
        )
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    // Bind to socket with smart fallback
    let (listener, bind_addr) = match listen {
        Some(addr) => {
            // Explicit address specified - bind to it
            let socket_addr = format!("{addr}:{port}");
            let listener = TcpListener::bind(&socket_addr).await?;
            (listener, socket_addr)
        }
        None => {
            // Auto mode: try IPv6 first, fallback to IPv4
            if let Ok(l) = TcpListener::bind(format!("::0:{port}")).await {
                (l, format!("[::]:{port}"))
            } else {
                // Fallback to IPv4 if IPv6 fails
                let socket_addr = format!("0.0.0.0:{port}");
                (TcpListener::bind(&socket_addr).await?, socket_addr)
            }
        }
    };

    println!(
        "{} - Listening on {}, platform: {}, refresh interval: {}s",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        bind_addr,
        platform,
        interval
    );

    // shutdown signal
    let (tx, mut rx) = mpsc::unbounded_channel();

    // background refresh - keep JoinHandle to detect task failures
    let monitor_state = state.clone();
    let monitor_handle = task::spawn(async move { run_loop(monitor_state, interval, tx).await });

    // Race between normal operation and refresh task failure
    let server =
        axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
            tokio::select! {
                _ = rx.recv() => {}
                _ = tokio::signal::ctrl_c() => {
                    println!(
                        "{} - shutting down",
                        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
                    );
                }
            }
        });

    tokio::select! {
        result = server => {
            result?;
        }
        result = monitor_handle => {
            match result {
                Ok(()) => {
                    eprintln!("Refresh loop exited unexpectedly");
                    anyhow::bail!("Refresh loop stopped");
                }
                Err(e) => {
                    eprintln!("Refresh loop panicked: {e}");
                    anyhow::bail!("Refresh loop panicked: {e}");
                }
            }
        }
    }

    store.close().await;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(buffer) => (StatusCode::OK, buffer),
        Err(e) => {
            eprintln!("{e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mkcert_version = state.mkcert.version().await;
    let root_ca = state
        .mkcert
        .caroot()
        .await
        .map(|p| p.display().to_string());

    let cert_path = match state.store.setting(SETTING_CERT_PATH).await {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e:#}");
            String::new()
        }
    };

    let trust = state.trust.read().await.clone();

    Json(StatusResponse {
        mkcert_version,
        root_ca,
        cert_path,
        platform: Platform::current().to_string(),
        installed: trust.as_ref().is_some_and(TrustReport::installed),
        trust,
    })
}

async fn install_ca_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResponse>, ErrorResponse> {
    let output = state
        .mkcert
        .install()
        .await
        .map_err(|e| internal_error(&e))?;

    // The OS store updates asynchronously after an install; the probe's
    // retry loop exists for exactly this moment
    refresh_trust(&state).await;

    Ok(Json(ActionResponse {
        success: true,
        output,
    }))
}

async fn uninstall_ca_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActionResponse>, ErrorResponse> {
    let output = state
        .mkcert
        .uninstall()
        .await
        .map_err(|e| internal_error(&e))?;

    refresh_trust(&state).await;

    Ok(Json(ActionResponse {
        success: true,
        output,
    }))
}

async fn ca_download_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let root = state
        .mkcert
        .caroot()
        .await
        .ok_or_else(|| not_found("Root CA path not found"))?;

    let file = root.join("rootCA.pem");
    let data = tokio::fs::read(&file)
        .await
        .map_err(|_| not_found("Root CA file not found"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-pem-file".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"rootCA.pem\"".to_string(),
            ),
        ],
        data,
    ))
}

async fn list_certificates_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CertificateRecord>>, ErrorResponse> {
    let rows = state.store.list().await.map_err(|e| internal_error(&e))?;
    Ok(Json(rows))
}

async fn create_certificate_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateCertRequest>,
) -> Result<Json<CreateCertResponse>, ErrorResponse> {
    let Some(first_domain) = request.domains.first() else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid domains"));
    };
    if request.domains.iter().any(|d| d.trim().is_empty()) {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid domains"));
    }

    // Check mkcert installation first
    if state.mkcert.version().await.is_none() {
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "mkcert is not installed or not found in PATH",
        ));
    }

    let name = request
        .name
        .clone()
        .unwrap_or_else(|| first_domain.clone());
    let dir = cert_storage_dir(&state).await;

    let files = state
        .mkcert
        .generate(&request.domains, &dir, request.name.as_deref())
        .await
        .map_err(|e| internal_error(&e))?;

    let outcome = resolve_expiry(&files.cert).await;

    let record = NewCertificate {
        name,
        domains: request.domains,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        expires_at: outcome.to_rfc3339(),
        expiry_source: outcome.source().map(String::from),
        status: "Valid".to_string(),
        path_cert: files.cert.display().to_string(),
        path_key: files.key.display().to_string(),
    };

    let id = state
        .store
        .insert(&record)
        .await
        .map_err(|e| internal_error(&e))?;

    Ok(Json(CreateCertResponse {
        success: true,
        id,
        cert_path: record.path_cert,
        key_path: record.path_key,
        expires_at: record.expires_at,
        expiry_source: record.expiry_source,
    }))
}

async fn renew_certificate_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<RenewResponse>, ErrorResponse> {
    let record = state
        .store
        .get(id)
        .await
        .map_err(|e| internal_error(&e))?
        .ok_or_else(|| not_found("Not found"))?;

    let domains = record.domain_list();
    if domains.is_empty() {
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "certificate has no stored domains",
        ));
    }

    // Re-create in place with the same domains
    let dir = Path::new(&record.path_cert)
        .parent()
        .map_or_else(|| state.certs_dir.clone(), Path::to_path_buf);

    let files = state
        .mkcert
        .generate(&domains, &dir, Some(&record.name))
        .await
        .map_err(|e| internal_error(&e))?;

    let outcome = resolve_expiry(&files.cert).await;
    if let (Some(expires_at), Some(source)) = (outcome.to_rfc3339(), outcome.source()) {
        state
            .store
            .update_expiry(id, &expires_at, source)
            .await
            .map_err(|e| internal_error(&e))?;
    }

    Ok(Json(RenewResponse {
        success: true,
        expires_at: outcome.to_rfc3339(),
    }))
}

async fn delete_certificate_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<DeleteResponse>, ErrorResponse> {
    let record = state
        .store
        .get(id)
        .await
        .map_err(|e| internal_error(&e))?
        .ok_or_else(|| not_found("Not found"))?;

    // Best effort: the row goes away even if the files are already gone
    let _ = tokio::fs::remove_file(&record.path_cert).await;
    let _ = tokio::fs::remove_file(&record.path_key).await;

    state
        .store
        .delete(id)
        .await
        .map_err(|e| internal_error(&e))?;

    Ok(Json(DeleteResponse { success: true }))
}

async fn download_certificate_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let record = state
        .store
        .get(id)
        .await
        .map_err(|e| internal_error(&e))?
        .ok_or_else(|| not_found("Not found"))?;

    let missing = || not_found("Certificate files missing on disk");
    let cert = tokio::fs::read(&record.path_cert)
        .await
        .map_err(|_| missing())?;
    let key = tokio::fs::read(&record.path_key)
        .await
        .map_err(|_| missing())?;

    let mut bundle = cert;
    if bundle.last() != Some(&b'\n') {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(&key);

    let filename = format!("{}_bundle.pem", sanitize_stem(&record.name));

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-pem-file".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bundle,
    ))
}

async fn cert_storage_dir(state: &AppState) -> PathBuf {
    match state.store.setting(SETTING_CERT_PATH).await {
        Ok(Some(dir)) if !dir.is_empty() => PathBuf::from(dir),
        Ok(_) => state.certs_dir.clone(),
        Err(e) => {
            eprintln!("{e:#}");
            state.certs_dir.clone()
        }
    }
}

/// Probe trust and publish the result to the shared state and the gauge
async fn refresh_trust(state: &AppState) -> TrustReport {
    let report = state.probe.probe().await;
    CA_TRUSTED.set(match report.status {
        TrustStatus::Trusted => 1,
        TrustStatus::NotTrusted => 0,
        TrustStatus::Unknown => -1,
    });
    TRUST_PROBE_ATTEMPTS.observe(f64::from(report.attempts));
    *state.trust.write().await = Some(report.clone());
    report
}

#[derive(Serialize, Debug)]
struct Refresh {
    time: String,
    runtime_ms: i64,
    trust: TrustStatus,
    certificates: usize,
    healed: usize,
}

#[inline]
fn remaining_sleep_duration(wait_time: Duration, runtime: Duration) -> Option<time::Duration> {
    wait_time
        .checked_sub(&runtime)
        .and_then(|remaining| remaining.to_std().ok())
        .filter(|duration| !duration.is_zero())
}

fn needs_heal(row: &CertificateRecord) -> bool {
    row.expires_at.is_none() || !matches!(row.expiry_source.as_deref(), Some("parsed"))
}

async fn refresh_once(state: &AppState) -> anyhow::Result<Refresh> {
    let timer = RUNTIME.start_timer();
    let now = Utc::now();

    let report = refresh_trust(state).await;

    let rows = state.store.list().await?;
    let mut healed = 0usize;

    for row in &rows {
        let mut expires_at = row.expires_at.clone();

        // Self-heal: rows without a parsed expiry get another look at the
        // file on disk each cycle
        if needs_heal(row) {
            let outcome = resolve_expiry(Path::new(&row.path_cert)).await;
            let persist = match outcome {
                ExpiryOutcome::Parsed(_) => true,
                ExpiryOutcome::Fallback(_) => row.expires_at.is_none(),
                ExpiryOutcome::Missing => false,
            };
            if persist
                && let (Some(ts), Some(source)) = (outcome.to_rfc3339(), outcome.source())
            {
                state.store.update_expiry(row.id, &ts, source).await?;
                expires_at = Some(ts);
                healed += 1;
            }
        }

        if let Some(ts) = &expires_at
            && let Ok(parsed) = DateTime::parse_from_rfc3339(ts)
        {
            let days = (parsed.with_timezone(&Utc) - now).num_days();
            CERT_EXPIRY_DAYS.with_label_values(&[&row.name]).set(days);
        }
    }

    timer.observe_duration();

    let end = Utc::now();
    Ok(Refresh {
        time: now.to_rfc3339(),
        runtime_ms: end.signed_duration_since(now).num_milliseconds(),
        trust: report.status,
        certificates: rows.len(),
        healed,
    })
}

async fn run_loop(state: Arc<AppState>, every: u16, tx: mpsc::UnboundedSender<()>) {
    let mut consecutive_failures: u32 = 0;

    loop {
        let iter_start = Utc::now();
        let wait_time = Duration::seconds(every.into());

        // Catch panics in individual iterations to keep the loop alive
        let iteration_result = std::panic::AssertUnwindSafe(refresh_once(&state))
            .catch_unwind()
            .await;

        match iteration_result {
            Ok(Ok(summary)) => {
                consecutive_failures = 0;
                ITERATIONS_TOTAL.with_label_values(&["success"]).inc();
                LAST_SUCCESS.set(Utc::now().timestamp());
                if let Ok(serialized) = serde_json::to_string(&summary) {
                    println!("{serialized}");
                }
            }
            Ok(Err(e)) => {
                consecutive_failures += 1;
                ITERATIONS_TOTAL.with_label_values(&["error"]).inc();
                eprintln!("refresh iteration failed: {e:#}");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    eprintln!(
                        "giving up after {consecutive_failures} consecutive refresh failures"
                    );
                    let _ = tx.send(());
                    return;
                }
            }
            Err(panic_info) => {
                eprintln!("Panic in refresh loop iteration: {panic_info:?}");
                PANICS_RECOVERED.inc();
            }
        }

        // Sleep for remaining interval time to maintain fixed cadence
        let runtime = Utc::now().signed_duration_since(iter_start);
        if let Some(remaining) = remaining_sleep_duration(wait_time, runtime) {
            time::sleep(remaining).await;
        }
    }
}
