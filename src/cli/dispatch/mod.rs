use crate::cli::actions::Action;
use anyhow::{Context, Result};
use clap::ArgMatches;
use std::{net::IpAddr, path::PathBuf};

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if the listen address is not a valid IP address
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    let db = matches
        .get_one::<String>("db")
        .map(PathBuf::from)
        .context("database path is required")?;

    let certs_dir = matches
        .get_one::<String>("certs-dir")
        .map(PathBuf::from)
        .context("certs dir is required")?;

    // Extract interval with default
    let interval = matches.get_one::<u16>("interval").copied().unwrap_or(300);

    // Extract and validate listen address
    let listen = matches
        .get_one::<String>("listen")
        .map(|addr| {
            addr.parse::<IpAddr>()
                .with_context(|| format!("Invalid IP address: {addr}"))
        })
        .transpose()?;

    // Extract port with default
    let port = matches.get_one::<u16>("port").copied().unwrap_or(3001);

    let mkcert_bin = matches
        .get_one::<String>("mkcert-bin")
        .map_or_else(|| PathBuf::from("mkcert"), PathBuf::from);

    Ok(Action::Serve {
        db,
        certs_dir,
        interval,
        listen,
        port,
        mkcert_bin,
    })
}
