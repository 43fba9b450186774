use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::sl_api::{DeparturesQuery, SlApiError, TransitClient, TransportMode};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    message: String,
}

/// Bind an HTTP server to `addr`. The caller passes the result to
/// `run_server` to begin serving requests.
pub fn init_server(addr: &str) -> tiny_http::Server {
    let server = tiny_http::Server::http(addr).expect(&format!("failed to bind {}", addr));
    tracing::info!("listening on http://{}", addr);
    server
}

/// Serve requests forever, one thread per request. `client` is the shared
/// transit lookup client (which owns the caches); `static_dir`, when set,
/// is the directory the built frontend is served from.
pub fn run_server(
    server: tiny_http::Server,
    client: Arc<dyn TransitClient>,
    static_dir: Option<PathBuf>,
) {
    for request in server.incoming_requests() {
        let client = client.clone();
        let static_dir = static_dir.clone();
        std::thread::spawn(move || {
            handle_request(request, client.as_ref(), static_dir.as_deref());
        });
    }
}

fn handle_request(
    request: tiny_http::Request,
    client: &dyn TransitClient,
    static_dir: Option<&Path>,
) {
    let method = request.method().as_str().to_string();
    let raw_url = request.url().to_string();
    let (path, query) = match raw_url.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (raw_url, String::new()),
    };

    if method != "GET" {
        let _ = request.respond(tiny_http::Response::empty(405));
        return;
    }

    if let Some(site_id_part) = path.strip_prefix("/api/departures/") {
        handle_departures(request, client, site_id_part, &query);
    } else if path == "/api/sites" {
        handle_sites(request, client, &query);
    } else if let Some(dir) = static_dir {
        serve_static(request, dir, &path);
    } else {
        let _ = request.respond(tiny_http::Response::empty(404));
    }
}

fn handle_departures(
    request: tiny_http::Request,
    client: &dyn TransitClient,
    site_id_part: &str,
    query: &str,
) {
    let site_id = match site_id_part.parse::<i64>() {
        Ok(id) => id,
        Err(err) => {
            let message = format!("could not parse {:?} to a site id, {}", site_id_part, err);
            respond_json(request, 400, &ErrorResponse { message });
            return;
        }
    };

    let line = match parse_numeric_param::<u32>(query, "line") {
        Ok(line) => line,
        Err(message) => {
            respond_json(request, 400, &ErrorResponse { message });
            return;
        }
    };

    let direction = match parse_numeric_param::<i32>(query, "direction") {
        Ok(direction) => direction,
        Err(message) => {
            respond_json(request, 400, &ErrorResponse { message });
            return;
        }
    };

    let transport = match query_param(query, "transport").filter(|t| !t.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<TransportMode>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                let message = err.to_string();
                respond_json(request, 400, &ErrorResponse { message });
                return;
            }
        },
    };

    let args = DeparturesQuery {
        site_id,
        line,
        direction,
        transport,
    };

    match client.get_departures(&args) {
        Ok(departures) => respond_json(request, 200, &departures),
        Err(err @ SlApiError::InvalidTransportMode(_)) => {
            let message = err.to_string();
            respond_json(request, 400, &ErrorResponse { message });
        }
        Err(err) => {
            tracing::error!("error getting departures from SL: {}", err);
            let message = "Internal Server Error".to_string();
            respond_json(request, 500, &ErrorResponse { message });
        }
    }
}

fn handle_sites(request: tiny_http::Request, client: &dyn TransitClient, query: &str) {
    let term = query_param(query, "term").unwrap_or_default();

    // character count, not bytes: a two-letter Swedish term must pass
    if term.chars().count() < 2 {
        let message = "2 or more characters needed for search".to_string();
        respond_json(request, 400, &ErrorResponse { message });
        return;
    }

    match client.get_sites(&term) {
        Ok(mut sites) => {
            sites.truncate(5);
            respond_json(request, 200, &sites);
        }
        Err(err) => {
            tracing::error!("error getting sites from SL: {}", err);
            let message = "Internal Server Error".to_string();
            respond_json(request, 500, &ErrorResponse { message });
        }
    }
}

fn serve_static(request: tiny_http::Request, dir: &Path, path: &str) {
    let decoded = decode_component(path.trim_start_matches('/'));
    let relative = if decoded.is_empty() {
        "index.html".to_string()
    } else {
        decoded
    };

    if relative.split('/').any(|part| part == "..") {
        let _ = request.respond(tiny_http::Response::empty(404));
        return;
    }

    let file_path = dir.join(&relative);
    match std::fs::read(&file_path) {
        Ok(contents) => {
            let content_type = content_type_for(&file_path);
            let response = tiny_http::Response::from_data(contents).with_header(
                tiny_http::Header::from_bytes(b"Content-Type", content_type.as_bytes()).unwrap(),
            );
            let _ = request.respond(response);
        }
        Err(_) => {
            let _ = request.respond(tiny_http::Response::empty(404));
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// First value for `name` in a raw query string, percent-decoded.
fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| decode_component(value))
        })
}

fn decode_component(value: &str) -> String {
    let value = value.replace('+', " ");
    match urlencoding::decode(&value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value,
    }
}

fn parse_numeric_param<T: std::str::FromStr>(query: &str, name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    match query_param(query, name) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| format!("could not parse {} from value {:?}, {}", name, raw, err)),
    }
}

fn respond_json<T: Serialize>(request: tiny_http::Request, status: u16, body: &T) {
    let payload = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let response = tiny_http::Response::from_string(payload)
        .with_status_code(status)
        .with_header(
            tiny_http::Header::from_bytes(b"Content-Type", b"application/json; charset=utf-8")
                .unwrap(),
        );
    if let Err(err) = request.respond(response) {
        tracing::warn!("failed to write response: {}", err);
    }
}
