use super::Action;

/// Execute the action's business logic by delegating to the appropriate module
pub async fn execute(action: Action) -> anyhow::Result<()> {
    match action {
        Action::Serve {
            db,
            certs_dir,
            interval,
            listen,
            port,
            mkcert_bin,
        } => crate::server::start(db, certs_dir, interval, listen, port, mkcert_bin).await,
    }
}
