use crate::metrics::CERT_EXPIRY_FALLBACKS;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Months, SecondsFormat, Utc};
use rustls_pemfile::certs;
use std::{io::Cursor, path::Path};
use tokio::fs;
use x509_parser::prelude::{FromDer, X509Certificate};

// mkcert issues leaf certificates valid for 2 years + 3 months
const FALLBACK_YEARS_AS_MONTHS: u32 = 24;
const FALLBACK_EXTRA_MONTHS: u32 = 3;

/// Outcome of resolving a certificate expiry from a file on disk.
///
/// `Parsed` carries the certificate's actual not-after field, `Fallback`
/// carries an estimate derived from the `mkcert` default validity. The two
/// must stay distinguishable: a fallback value is bookkeeping, not ground
/// truth. A missing file is a precondition failure and never collapses
/// into a fallback timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The not-after field read from the certificate
    Parsed(DateTime<Utc>),
    /// Estimate: resolution time plus the `mkcert` default validity
    Fallback(DateTime<Utc>),
    /// The file does not exist
    Missing,
}

impl ExpiryOutcome {
    /// The resolved timestamp, if any
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Parsed(t) | Self::Fallback(t) => Some(*t),
            Self::Missing => None,
        }
    }

    /// Provenance tag persisted alongside the timestamp
    #[must_use]
    pub const fn source(&self) -> Option<&'static str> {
        match self {
            Self::Parsed(_) => Some("parsed"),
            Self::Fallback(_) => Some("fallback"),
            Self::Missing => None,
        }
    }

    /// True when the timestamp is an estimate rather than parsed fact
    #[must_use]
    pub const fn is_estimate(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// ISO-8601 rendering with millisecond precision and a `Z` suffix
    #[must_use]
    pub fn to_rfc3339(&self) -> Option<String> {
        self.timestamp()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Resolve the expiry of the PEM encoded certificate at `path`.
///
/// A missing file yields `ExpiryOutcome::Missing`. Every other failure
/// (unreadable file, malformed PEM, unparseable certificate) is recovered
/// locally into `ExpiryOutcome::Fallback` so certificate bookkeeping never
/// blocks on a broken file; the diagnostic is logged.
pub async fn resolve_expiry(path: &Path) -> ExpiryOutcome {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ExpiryOutcome::Missing;
        }
        Err(e) => {
            eprintln!("could not read certificate {}: {e}", path.display());
            CERT_EXPIRY_FALLBACKS.inc();
            return ExpiryOutcome::Fallback(fallback_expiry(Utc::now()));
        }
    };

    match not_after_from_pem(&data) {
        Ok(not_after) => ExpiryOutcome::Parsed(not_after),
        Err(e) => {
            eprintln!("could not parse certificate {}: {e:#}", path.display());
            CERT_EXPIRY_FALLBACKS.inc();
            ExpiryOutcome::Fallback(fallback_expiry(Utc::now()))
        }
    }
}

/// Estimated expiry for a certificate issued at `now` with the `mkcert`
/// default validity: add 2 years, then 3 months, in that order, clamping
/// to the last day of the month on calendar rollover.
#[must_use]
pub fn fallback_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(FALLBACK_YEARS_AS_MONTHS))
        .and_then(|t| t.checked_add_months(Months::new(FALLBACK_EXTRA_MONTHS)))
        .unwrap_or(now)
}

/// Extract the not-after field from the first certificate in a PEM bundle
fn not_after_from_pem(data: &[u8]) -> Result<DateTime<Utc>> {
    let mut reader = Cursor::new(data);
    let parsed = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid certificate PEM: {e}"))?;

    let der = parsed
        .first()
        .ok_or_else(|| anyhow!("no certificates found in PEM data"))?;

    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;

    let raw = cert.validity().not_after.to_datetime();
    DateTime::<Utc>::from_timestamp(raw.unix_timestamp(), raw.nanosecond())
        .ok_or_else(|| anyhow!("invalid certificate expiry timestamp"))
}
