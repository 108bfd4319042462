//! Root CA trust-store probing
//!
//! Determines whether the locally generated `mkcert` root authority is
//! currently trusted by the operating system. Each platform has its own
//! implementation, selected once at startup; the platform is a runtime
//! value so every implementation stays testable on any host.
//!
//! # Module Organization
//!
//! - `windows` - certificate store queries with bounded retries
//! - `linux` - system anchor directory scan
//! - `macos` - acknowledged gap, always reports unknown

pub mod linux;
pub mod macos;
pub mod windows;

use serde::Serialize;
use std::fmt;

// Re-export commonly used types
pub use linux::LinuxProbe;
pub use windows::{PowershellStoreQuery, RootStoreQuery, WindowsProbe};

/// Substring that identifies the local authority in store entries and
/// anchor file names
pub const AUTHORITY_MARKER: &str = "mkcert";

/// Host platform, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    /// The platform this process is running on
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
        }
    }
}

/// Tri-state trust verdict.
///
/// `Unknown` means the check is not supported on this platform, which is
/// deliberately distinguishable from `NotTrusted` (checked and absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    Trusted,
    NotTrusted,
    Unknown,
}

/// A trust store that was consulted during a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScope {
    /// Windows per-user root store
    CurrentUser,
    /// Windows machine-wide root store
    LocalMachine,
    /// Linux system anchor directories
    System,
}

impl fmt::Display for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentUser => write!(f, "current_user"),
            Self::LocalMachine => write!(f, "local_machine"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Result of a trust probe: the verdict plus the evidence behind it
#[derive(Debug, Clone, Serialize)]
pub struct TrustReport {
    pub status: TrustStatus,
    /// Matching store entries, when a store was actually queried
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<usize>,
    /// Stores consulted, in order
    pub stores: Vec<StoreScope>,
    /// Attempts made before settling on the verdict
    pub attempts: u32,
}

impl TrustReport {
    #[must_use]
    pub const fn trusted(matches: usize, stores: Vec<StoreScope>, attempts: u32) -> Self {
        Self {
            status: TrustStatus::Trusted,
            matches: Some(matches),
            stores,
            attempts,
        }
    }

    #[must_use]
    pub const fn not_trusted(stores: Vec<StoreScope>, attempts: u32) -> Self {
        Self {
            status: TrustStatus::NotTrusted,
            matches: Some(0),
            stores,
            attempts,
        }
    }

    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: TrustStatus::Unknown,
            matches: None,
            stores: Vec::new(),
            attempts: 0,
        }
    }

    /// Legacy boolean view: trusted or not, with `Unknown` collapsing to
    /// false the way the pre-redesign dashboard reported it
    #[must_use]
    pub const fn installed(&self) -> bool {
        matches!(self.status, TrustStatus::Trusted)
    }
}

/// Per-platform probe, selected once at startup
pub enum PlatformProbe {
    Windows(WindowsProbe<PowershellStoreQuery>),
    Linux(LinuxProbe),
    MacOs,
}

impl PlatformProbe {
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self::Windows(WindowsProbe::new(PowershellStoreQuery::new(
                AUTHORITY_MARKER,
            ))),
            Platform::Linux => Self::Linux(LinuxProbe::default()),
            Platform::MacOs => Self::MacOs,
        }
    }

    /// Run the probe. Never fails: every failure path resolves to a
    /// `TrustReport`.
    pub async fn probe(&self) -> TrustReport {
        match self {
            Self::Windows(probe) => probe.probe().await,
            Self::Linux(probe) => probe.probe().await,
            Self::MacOs => macos::probe(),
        }
    }
}
