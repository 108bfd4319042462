#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rcgen::{CertificateParams, KeyPair};
use std::path::{Path, PathBuf};

/// Mint a self-signed certificate for `localhost` with the given not-after
pub fn cert_pem_expiring_at(not_after: time::OffsetDateTime) -> String {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.not_after = not_after;

    let key = KeyPair::generate().unwrap();
    params.self_signed(&key).unwrap().pem()
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
