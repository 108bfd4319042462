use super::TrustReport;

/// macOS trust probe.
///
/// Not implemented: querying the keychain for the root authority would go
/// through `security find-certificate`, which this dashboard does not do
/// yet. Reporting `Unknown` keeps the gap visible instead of passing it
/// off as a negative verdict.
#[must_use]
pub fn probe() -> TrustReport {
    TrustReport::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustStatus;

    #[test]
    fn test_probe_is_unknown_not_negative() {
        let report = probe();
        assert_eq!(report.status, TrustStatus::Unknown);
        assert!(report.stores.is_empty());
    }
}
