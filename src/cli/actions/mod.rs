mod run;

use std::{net::IpAddr, path::PathBuf};

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    Serve {
        db: PathBuf,
        certs_dir: PathBuf,
        interval: u16,
        listen: Option<IpAddr>,
        port: u16,
        mkcert_bin: PathBuf,
    },
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
