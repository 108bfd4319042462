use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Pure clap command definitions with zero business logic
#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("db")
                .default_value("certdash.sqlite")
                .env("CERTDASH_DB")
                .help("Path to the SQLite database file")
                .long("db")
                .short('d')
                .value_name("PATH"),
        )
        .arg(
            Arg::new("certs-dir")
                .default_value("certs")
                .env("CERTDASH_CERTS_DIR")
                .help("Directory where generated certificates are stored")
                .long("certs-dir")
                .short('c')
                .value_name("PATH"),
        )
        .arg(
            Arg::new("interval")
                .default_value("300")
                .env("CERTDASH_INTERVAL")
                .help("number of seconds between trust/expiry refreshes")
                .long("interval")
                .short('i')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .env("CERTDASH_LISTEN")
                .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                .long("listen")
                .long_help(
                    "IP address to bind to:\n\
                    Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                    Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                    Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                    Specific IPv6: '::', '::1'",
                )
                .short('l')
                .value_name("IP"),
        )
        .arg(
            Arg::new("port")
                .default_value("3001")
                .env("CERTDASH_PORT")
                .help("listening port for the dashboard API")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("mkcert-bin")
                .default_value("mkcert")
                .env("CERTDASH_MKCERT_BIN")
                .help("Path to the mkcert binary")
                .long("mkcert-bin")
                .value_name("PATH"),
        )
}
