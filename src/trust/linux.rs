use super::{AUTHORITY_MARKER, StoreScope, TrustReport};
use std::path::PathBuf;
use tokio::fs;

/// Linux trust probe: a single scan of the system anchor directories,
/// no retries. Installing into these directories is synchronous, so one
/// look is enough. A read failure counts as absence.
pub struct LinuxProbe {
    anchor_dirs: Vec<PathBuf>,
    marker: String,
}

impl Default for LinuxProbe {
    fn default() -> Self {
        Self {
            anchor_dirs: vec![
                // Debian/Ubuntu
                PathBuf::from("/usr/local/share/ca-certificates"),
                // Fedora/RHEL
                PathBuf::from("/etc/pki/ca-trust/source/anchors"),
                // Arch
                PathBuf::from("/etc/ca-certificates/trust-source/anchors"),
            ],
            marker: AUTHORITY_MARKER.to_string(),
        }
    }
}

impl LinuxProbe {
    /// Probe with explicit anchor directories, used by tests
    #[must_use]
    pub fn with_anchor_dirs(anchor_dirs: Vec<PathBuf>) -> Self {
        Self {
            anchor_dirs,
            marker: AUTHORITY_MARKER.to_string(),
        }
    }

    /// Count installed anchor files whose name carries the authority
    /// marker. Presence is trust; absence or unreadable directories are
    /// not.
    pub async fn probe(&self) -> TrustReport {
        let mut matches = 0;

        for dir in &self.anchor_dirs {
            let Ok(mut entries) = fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                if name
                    .to_string_lossy()
                    .to_lowercase()
                    .contains(&self.marker)
                {
                    matches += 1;
                }
            }
        }

        if matches > 0 {
            TrustReport::trusted(matches, vec![StoreScope::System], 1)
        } else {
            TrustReport::not_trusted(vec![StoreScope::System], 1)
        }
    }
}
