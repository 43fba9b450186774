use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use sl_timetable::server;
use sl_timetable::sl_api::SlApi;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sl_timetable=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);

    // In dev the frontend runs under its own server and proxies /api here,
    // so nothing is served from disk.
    let is_dev = env::var("IS_DEV").map(|v| v == "true").unwrap_or(false);
    let static_dir = if is_dev {
        None
    } else {
        Some(PathBuf::from("static"))
    };

    let client = Arc::new(SlApi::with_default_agent());

    let server = server::init_server(&addr);
    server::run_server(server, client, static_dir);
}
