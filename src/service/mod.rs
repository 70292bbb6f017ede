//! Service dispatch (the shrine)
//!
//! A process-scoped HTTP listener with a late-bound route table. The first
//! activation binds the address and starts serving on a background thread
//! without blocking the declaring statement; later activations at the same
//! address add routes (subject to the seal passphrase), and a different
//! address is rejected. Each inbound request runs its handler on a blocking
//! worker against a fresh environment copied from the declaration-time
//! snapshot, with request-derived bindings injected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex, RwLock, Weak};
use std::thread;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use url::form_urlencoded;

use crate::config::Config;
use crate::interpreter::env::Env;
use crate::interpreter::errors::{RuntimeError, RuntimeResult};
use crate::interpreter::expressions::eval_value;
use crate::interpreter::statements::{RouteHandler, ShrineDecl};
use crate::interpreter::Interp;
use crate::types::Program;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

type RouteTable = Arc<RwLock<HashMap<String, RouteEntry>>>;

/// The singleton listener and its route table.
pub struct Shrine {
    inner: Mutex<Option<Bound>>,
}

struct Bound {
    declared_addr: String,
    local_addr: SocketAddr,
    passphrase: Option<String>,
    routes: RouteTable,
}

/// Everything a request needs to run its handler, captured at declaration.
#[derive(Clone)]
struct RouteEntry {
    handler: RouteHandler,
    env: Env,
    program: Arc<Program>,
    config: Config,
    shrine: Weak<Shrine>,
}

impl Shrine {
    pub fn new() -> Shrine {
        Shrine {
            inner: Mutex::new(None),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Actual bound address, once the listener is up. With a `:0` declaration
    /// this carries the kernel-assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap().as_ref().map(|b| b.local_addr)
    }

    /// Registered `METHOD PATH` route keys, sorted.
    pub fn routes(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut keys: Vec<String> = match inner.as_ref() {
            Some(bound) => bound.routes.read().unwrap().keys().cloned().collect(),
            None => Vec::new(),
        };
        keys.sort();
        keys
    }
}

impl Default for Shrine {
    fn default() -> Self {
        Shrine::new()
    }
}

/// Execute a shrine declaration: bind on first use, then register routes.
pub(crate) fn activate(interp: &Interp, decl: &ShrineDecl, env: &Env) -> RuntimeResult<()> {
    let shrine = Arc::clone(&interp.shrine);
    let mut inner = shrine.inner.lock().unwrap();

    match inner.as_ref() {
        None => {
            let routes: RouteTable = Arc::new(RwLock::new(HashMap::new()));
            let local_addr = spawn_listener(
                &decl.addr,
                Arc::clone(&routes),
                interp.config.service_worker_threads,
            )?;
            tracing::info!(target: "rite", addr = %local_addr, "shrine listening");
            *inner = Some(Bound {
                declared_addr: decl.addr.clone(),
                local_addr,
                passphrase: decl.passphrase.clone(),
                routes,
            });
        }
        Some(bound) => {
            if bound.declared_addr != decl.addr {
                return Err(RuntimeError::AddrConflict {
                    bound: bound.declared_addr.clone(),
                    requested: decl.addr.clone(),
                });
            }
            // The seal is fixed at first binding; route modification
            // afterwards requires the matching phrase.
            if bound.passphrase.is_some() && decl.passphrase != bound.passphrase {
                return Err(RuntimeError::SealedShrine);
            }
        }
    }

    let bound = inner.as_ref().unwrap();
    let mut table = bound.routes.write().unwrap();
    for route in &decl.routes {
        let key = format!("{} {}", route.method, route.path);
        if table.contains_key(&key) {
            return Err(RuntimeError::DuplicateRoute { key });
        }
        tracing::info!(target: "rite", route = %key, "shrine route registered");
        table.insert(
            key,
            RouteEntry {
                handler: route.handler.clone(),
                env: env.clone(),
                program: Arc::clone(&interp.program),
                config: interp.config.clone(),
                shrine: Arc::downgrade(&shrine),
            },
        );
    }

    Ok(())
}

/// Ports may be declared bare (`:15080`); bind all interfaces for them.
fn normalize_addr(declared: &str) -> String {
    match declared.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => declared.to_string(),
    }
}

/// Start the listener thread and wait for the bind outcome, so address
/// errors surface at the declaring statement.
fn spawn_listener(
    declared: &str,
    routes: RouteTable,
    worker_threads: usize,
) -> RuntimeResult<SocketAddr> {
    let bind_addr = normalize_addr(declared);
    let (tx, rx) = mpsc::channel::<Result<SocketAddr, String>>();

    let spawned = thread::Builder::new()
        .name("rite-shrine".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_threads.max(1))
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = tx.send(Err(err.to_string()));
                    return;
                }
            };

            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let local_addr = match listener.local_addr() {
                    Ok(addr) => addr,
                    Err(err) => {
                        let _ = tx.send(Err(err.to_string()));
                        return;
                    }
                };

                let dispatch_routes = routes;
                let app = Router::new().fallback(move |req: axum::extract::Request| {
                    let routes = Arc::clone(&dispatch_routes);
                    async move { dispatch(routes, req).await }
                });

                let _ = tx.send(Ok(local_addr));
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(target: "rite", "shrine server error: {err}");
                }
            });
        });

    if let Err(err) = spawned {
        return Err(RuntimeError::Bind {
            addr: declared.to_string(),
            message: err.to_string(),
        });
    }

    match rx.recv() {
        Ok(Ok(addr)) => Ok(addr),
        Ok(Err(message)) => Err(RuntimeError::Bind {
            addr: declared.to_string(),
            message,
        }),
        Err(_) => Err(RuntimeError::Bind {
            addr: declared.to_string(),
            message: "listener thread exited".to_string(),
        }),
    }
}

async fn dispatch(routes: RouteTable, req: axum::extract::Request) -> Response {
    let method = req.method().as_str().to_ascii_uppercase();
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().unwrap_or("").to_string();

    let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .unwrap_or_default();
    let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

    let entry = {
        let table = routes.read().unwrap();
        match table.get(&format!("{method} {path}")) {
            Some(entry) => entry.clone(),
            None => {
                let path_bound = table
                    .keys()
                    .any(|key| key.split_once(' ').map(|(_, p)| p == path).unwrap_or(false));
                return if path_bound {
                    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response()
                } else {
                    (StatusCode::NOT_FOUND, "handler not found").into_response()
                };
            }
        }
    };

    // Each request gets its own blocking worker; the interpreter is
    // synchronous.
    let outcome = tokio::task::spawn_blocking(move || {
        handle_request(entry, &method, &path, &raw_query, &body_text)
    })
    .await;

    match outcome {
        Ok(Ok(rendered)) => rendered.into_response(),
        Ok(Err(RuntimeError::UnknownRite { .. })) => {
            (StatusCode::NOT_FOUND, "handler not found").into_response()
        }
        Ok(Err(err)) => {
            tracing::error!(target: "rite", "request handler failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response(),
    }
}

struct Rendered {
    status: StatusCode,
    content_type: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl IntoResponse for Rendered {
    fn into_response(self) -> Response {
        let mut builder = Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, self.content_type.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

fn handle_request(
    entry: RouteEntry,
    method: &str,
    path: &str,
    raw_query: &str,
    body_text: &str,
) -> RuntimeResult<Rendered> {
    // Fresh request-local environment: ordinary-visibility names from the
    // declaration snapshot, plus the request bindings.
    let mut env = entry.env.child_visible();
    inject_request_bindings(&mut env, method, path, raw_query, body_text);

    let shrine = entry
        .shrine
        .upgrade()
        .ok_or_else(|| RuntimeError::eval("service state already torn down"))?;
    let mut interp = Interp::from_parts(Arc::clone(&entry.program), shrine, entry.config.clone());

    let body = match &entry.handler {
        RouteHandler::Rite(name) => {
            let program = Arc::clone(&entry.program);
            let unit = program
                .unit(name)
                .ok_or_else(|| RuntimeError::UnknownRite { name: name.clone() })?;
            let answered = interp.run_unit(unit, &mut env)?;
            answered.map(|value| value.render_redacted()).unwrap_or_default()
        }
        RouteHandler::Inline(tokens) => eval_value(&mut interp, tokens, &env)?.render_redacted(),
    };

    let body = if body.is_empty() { "OK".to_string() } else { body };
    let body = pick_body(body, &env);

    Ok(Rendered {
        status: response_status(&env),
        content_type: choose_content_type(path, &env),
        headers: collect_headers(&env),
        body: format!("{body}\n"),
    })
}

/// Request-derived bindings available to every handler.
pub(crate) fn inject_request_bindings(
    env: &mut Env,
    method: &str,
    path: &str,
    raw_query: &str,
    body: &str,
) {
    env.set("REQUEST_METHOD", method);
    env.set("REQUEST_PATH", path);
    env.set("REQUEST_QUERY", raw_query);
    env.set("REQUEST_BODY", body);

    // One Q_<NAME> binding per query parameter, first value wins.
    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        let name = format!("Q_{}", key.to_uppercase());
        if !env.contains(&name) {
            env.set(name, value.into_owned());
        }
    }
}

/// Response status from the `response_status` binding, defaulting to 200 on
/// absence or nonsense.
pub(crate) fn response_status(env: &Env) -> StatusCode {
    env.get("response_status")
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| raw.parse::<u16>().ok())
        .filter(|n| (100..=599).contains(n))
        .and_then(|n| StatusCode::from_u16(n).ok())
        .unwrap_or(StatusCode::OK)
}

/// Content type priority: explicit binding, then a `.json` path suffix, then
/// plain text.
pub(crate) fn choose_content_type(path: &str, env: &Env) -> String {
    if let Some(ct) = env.get("response_content_type") {
        let ct = ct.trim();
        if !ct.is_empty() {
            return ct.to_string();
        }
    }
    if path.ends_with(".json") {
        return "application/json; charset=utf-8".to_string();
    }
    "text/plain; charset=utf-8".to_string()
}

/// Body override from the `response_body` binding.
pub(crate) fn pick_body(default_body: String, env: &Env) -> String {
    match env.get("response_body").map(str::trim) {
        Some(body) if !body.is_empty() => body.to_string(),
        _ => default_body,
    }
}

/// `response_header_<name>` bindings become headers, underscores to dashes.
pub(crate) fn collect_headers(env: &Env) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    for (name, value) in env.iter() {
        if let Some(raw) = name.strip_prefix("response_header_") {
            let header = raw.replace('_', "-").trim().to_string();
            if header.is_empty() {
                continue;
            }
            headers.push((header, value.to_string()));
        }
    }
    headers.sort();
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use std::collections::HashMap;

    fn shaped_env(pairs: HashMap<&str, &str>) -> Env {
        let mut env = Env::new();
        for (name, value) in pairs {
            env.set(name, value);
        }
        env
    }

    #[test]
    fn request_bindings_include_query_params() {
        let mut env = Env::new();
        inject_request_bindings(&mut env, "GET", "/hello", "name=Ada&x=1", "payload");

        assert_eq!(env.get("REQUEST_METHOD"), Some("GET"));
        assert_eq!(env.get("REQUEST_PATH"), Some("/hello"));
        assert_eq!(env.get("REQUEST_QUERY"), Some("name=Ada&x=1"));
        assert_eq!(env.get("REQUEST_BODY"), Some("payload"));
        assert_eq!(env.get("Q_NAME"), Some("Ada"));
        assert_eq!(env.get("Q_X"), Some("1"));
    }

    #[test]
    fn query_params_decode_and_first_value_wins() {
        let mut env = Env::new();
        inject_request_bindings(&mut env, "GET", "/x", "who=Ada%20Lovelace&who=other", "");
        assert_eq!(env.get("Q_WHO"), Some("Ada Lovelace"));
    }

    #[test]
    fn status_defaults_and_bounds() {
        assert_eq!(response_status(&Env::new()), StatusCode::OK);
        assert_eq!(
            response_status(&shaped_env(hashmap! {"response_status" => "201"})),
            StatusCode::CREATED
        );
        assert_eq!(
            response_status(&shaped_env(hashmap! {"response_status" => "999"})),
            StatusCode::OK
        );
        assert_eq!(
            response_status(&shaped_env(hashmap! {"response_status" => "abc"})),
            StatusCode::OK
        );
    }

    #[test]
    fn content_type_priority() {
        assert_eq!(
            choose_content_type("/hello", &Env::new()),
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            choose_content_type("/data.json", &Env::new()),
            "application/json; charset=utf-8"
        );
        assert_eq!(
            choose_content_type(
                "/data.json",
                &shaped_env(hashmap! {"response_content_type" => "text/html"})
            ),
            "text/html"
        );
    }

    #[test]
    fn header_bindings_become_headers() {
        let env = shaped_env(hashmap! {
            "response_header_x_engine" => "rite",
            "response_header_cache_control" => "no-store",
            "other" => "ignored",
        });
        assert_eq!(
            collect_headers(&env),
            vec![
                ("cache-control".to_string(), "no-store".to_string()),
                ("x-engine".to_string(), "rite".to_string()),
            ]
        );
    }

    #[test]
    fn body_override() {
        assert_eq!(pick_body("default".to_string(), &Env::new()), "default");
        assert_eq!(
            pick_body(
                "default".to_string(),
                &shaped_env(hashmap! {"response_body" => "override"})
            ),
            "override"
        );
    }
}
