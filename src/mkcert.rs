//! Wrapper around the external `mkcert` binary.
//!
//! Every invocation is argument-vector based (no shell) and bounded by a
//! timeout. The binary path is configurable so tests and non-standard
//! installs can point elsewhere.

use crate::metrics::MKCERT_ERRORS;
use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};
use tokio::{fs, process::Command, time::timeout};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Paths of a generated certificate/key pair
#[derive(Debug, Clone)]
pub struct CertFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub struct Mkcert {
    bin: PathBuf,
}

impl Mkcert {
    #[must_use]
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, operation: &str, args: &[&str]) -> Result<Output> {
        let result = timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.bin)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                MKCERT_ERRORS.with_label_values(&[operation]).inc();
                return Err(e).with_context(|| {
                    format!("failed to invoke {} for {operation}", self.bin.display())
                });
            }
            Err(_) => {
                MKCERT_ERRORS.with_label_values(&[operation]).inc();
                anyhow::bail!("mkcert {operation} timed out after {COMMAND_TIMEOUT:?}");
            }
        };

        if !output.status.success() {
            MKCERT_ERRORS.with_label_values(&[operation]).inc();
            anyhow::bail!(
                "mkcert {operation} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output)
    }

    /// `mkcert -version`, or `None` when the binary is absent or broken
    pub async fn version(&self) -> Option<String> {
        let output = self.run("version", &["-version"]).await.ok()?;
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `mkcert -CAROOT`, or `None` when the binary is absent or broken
    pub async fn caroot(&self) -> Option<PathBuf> {
        let output = self.run("caroot", &["-CAROOT"]).await.ok()?;
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path.is_empty() {
            return None;
        }
        Some(PathBuf::from(path))
    }

    /// Install the root CA into the system trust stores.
    ///
    /// # Errors
    ///
    /// Returns an error if `mkcert -install` cannot be run or fails.
    pub async fn install(&self) -> Result<String> {
        let output = self.run("install", &["-install"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Remove the root CA from the system trust stores.
    ///
    /// # Errors
    ///
    /// Returns an error if `mkcert -uninstall` cannot be run or fails.
    pub async fn uninstall(&self) -> Result<String> {
        let output = self.run("uninstall", &["-uninstall"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Generate a certificate for `domains` under `dir`.
    ///
    /// The file stem comes from `name` (falling back to the first domain),
    /// lower-cased with every non-alphanumeric byte replaced by `_`.
    ///
    /// # Errors
    ///
    /// Returns an error if `domains` is empty, the output directory cannot
    /// be created, or the `mkcert` invocation fails.
    pub async fn generate(
        &self,
        domains: &[String],
        dir: &Path,
        name: Option<&str>,
    ) -> Result<CertFiles> {
        let first = domains
            .first()
            .context("at least one domain is required")?;

        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;

        let stem = sanitize_stem(name.unwrap_or(first));
        let cert = dir.join(format!("{stem}.pem"));
        let key = dir.join(format!("{stem}-key.pem"));

        let cert_arg = path_arg(&cert)?;
        let key_arg = path_arg(&key)?;

        let mut args = vec!["-cert-file", cert_arg, "-key-file", key_arg];
        args.extend(domains.iter().map(String::as_str));

        println!(
            "{} - generating certificate: {} -> {}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            domains.join(" "),
            cert.display()
        );

        self.run("generate", &args).await?;

        Ok(CertFiles { cert, key })
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

/// Derive a file stem the way the dashboard names certificate files:
/// lowercase, every non-alphanumeric byte replaced with `_`
#[must_use]
pub fn sanitize_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("localhost"), "localhost");
        assert_eq!(sanitize_stem("My App"), "my_app");
        assert_eq!(sanitize_stem("*.example.com"), "__example_com");
        assert_eq!(sanitize_stem("127.0.0.1"), "127_0_0_1");
    }

    #[test]
    fn test_sanitize_stem_unicode() {
        assert_eq!(sanitize_stem("café.local"), "caf__local");
    }

    #[tokio::test]
    async fn test_version_missing_binary_is_none() {
        let mkcert = Mkcert::new("/nonexistent/certdash/mkcert");
        assert!(mkcert.version().await.is_none());
        assert!(mkcert.caroot().await.is_none());
    }

    #[tokio::test]
    async fn test_install_missing_binary_is_error() {
        let mkcert = Mkcert::new("/nonexistent/certdash/mkcert");
        let result = mkcert.install().await;
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("install"));
    }

    #[tokio::test]
    async fn test_generate_requires_domains() {
        let mkcert = Mkcert::new("/nonexistent/certdash/mkcert");
        let result = mkcert.generate(&[], Path::new("/tmp"), None).await;
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("at least one domain")
        );
    }
}
