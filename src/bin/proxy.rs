//! `proxy <port>`: caching HTTP/1.0 forward proxy.

use std::process;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use proxykit::proxy::Proxy;

#[derive(Debug, Parser)]
#[command(name = "proxy", about = "Caching HTTP/1.0 forward proxy")]
struct Args {
    /// TCP port to listen on.
    port: u16,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let proxy = match Proxy::bind(("0.0.0.0", args.port)) {
        Ok(proxy) => proxy,
        Err(err) => {
            error!(%err, port = args.port, "failed to bind");
            process::exit(1);
        }
    };
    if let Err(err) = proxy.run() {
        error!(%err, "listener failed");
        process::exit(1);
    }
}
