//! h2d server binary.

use clap::Parser;
use server::{Config, HttpServer, logging, signal};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "h2d")]
#[command(about = "HTTP/2 static file server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.print_config {
        print!("{}", EXAMPLE_CONFIG);
        return ExitCode::SUCCESS;
    }

    let path = match &args.config {
        Some(path) => path,
        None => {
            eprintln!("no config file given; use `h2d <config.toml>` or --print-config");
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.logging);

    let server = match HttpServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    signal::install(server.shutdown_trigger());
    tracing::info!(
        "{} listening on {}",
        server::SERVER_SOFTWARE,
        server.local_addr()
    );

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

const EXAMPLE_CONFIG: &str = r#"# h2d configuration

# TCP port to listen on (required).
port = 8443

# Bind address; all interfaces when unset.
# address = "127.0.0.1"

# Document root.
htdocs = "/srv/www"

# Worker event loops.
num_worker = 1

# Per-stream liveness timeouts, in seconds.
stream_read_timeout = 60.0
stream_write_timeout = 60.0

# Pad octets added to each padded-capable HTTP/2 frame.
padding = 0

# SETTINGS_HEADER_TABLE_SIZE to advertise; omit for the protocol default.
# header_table_size = 4096

# Serve cleartext HTTP/2 instead of TLS.
no_tls = false

# Request (but never verify) a client certificate. Test use only.
verify_client = false

# gzip-encode synthesized error bodies.
error_gzip = false

# Respond as soon as request headers arrive, ignoring any body.
early_response = false

[tls]
cert_file = "/etc/h2d/cert.pem"
private_key_file = "/etc/h2d/key.pem"

# Static trailer fields appended to every file response.
# [[trailer]]
# name = "x-checksum"
# value = "..."

# Server push: when the key path is requested, the listed paths are pushed.
# [push]
# "/index.html" = ["/style.css", "/app.js"]

[logging]
level = "info"
"#;
