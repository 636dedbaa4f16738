//! Fake forecast API and InfluxDB servers for integration tests.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use reqwest::Url;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as received by one of the fake servers.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub body: String,
}

impl Request {
    fn new(method: &Method, uri: &Uri, body: String) -> Self {
        Request {
            method: method.to_string(),
            target: uri.path_and_query().map(|p| p.as_str().to_owned()).unwrap_or_else(|| uri.path().to_owned()),
            body,
        }
    }

    pub fn path(&self) -> String {
        self.url().path().to_owned()
    }

    pub fn query(&self) -> HashMap<String, String> {
        self.url().query_pairs().into_owned().collect()
    }

    fn url(&self) -> Url {
        Url::parse(&format!("http://localhost{}", self.target)).unwrap()
    }
}

type Requests = Arc<Mutex<Vec<Request>>>;

pub struct FakeServer {
    pub addr: SocketAddr,
    requests: Requests,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Address that nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn reply(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

fn record(requests: &Requests, method: &Method, uri: &Uri, body: String) -> Request {
    let req = Request::new(method, uri, body);
    requests.lock().unwrap().push(req.clone());
    req
}

/// Accept `drops` connections and close each without responding, then serve `router`.
async fn serve(router: Router, requests: Requests, drops: usize) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dropped = Arc::clone(&requests);

    let handle = tokio::spawn(async move {
        for _ in 0..drops {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let head = String::from_utf8_lossy(&buf[..n]).into_owned();
            let mut line = head.lines().next().unwrap_or_default().split(' ');
            dropped.lock().unwrap().push(Request {
                method: line.next().unwrap_or_default().to_owned(),
                target: line.next().unwrap_or_default().to_owned(),
                body: String::new(),
            });
        }

        let listener = listener.into_std().unwrap();
        let _ = axum::Server::from_tcp(listener)
            .unwrap()
            .serve(router.into_make_service())
            .await;
    });

    FakeServer { addr, requests, handle }
}

type ForecastReply = Arc<dyn Fn(&Request) -> (u16, String) + Send + Sync>;

#[derive(Clone)]
struct ProviderState {
    requests: Requests,
    reply: ForecastReply,
}

async fn forecast(State(state): State<ProviderState>, method: Method, uri: Uri, body: String) -> Response {
    let req = record(&state.requests, &method, &uri, body);
    let (status, body) = (state.reply)(&req);
    reply(status, body)
}

/// Start a fake forecast API answering every forecast request with `handler`.
pub async fn fake_provider<F>(handler: F) -> FakeServer
where
    F: Fn(&Request) -> (u16, String) + Send + Sync + 'static,
{
    flaky_provider(0, handler).await
}

/// Start a fake forecast API that drops the first `drops` connections before answering.
pub async fn flaky_provider<F>(drops: usize, handler: F) -> FakeServer
where
    F: Fn(&Request) -> (u16, String) + Send + Sync + 'static,
{
    let requests = Requests::default();
    let state = ProviderState {
        requests: Arc::clone(&requests),
        reply: Arc::new(handler),
    };

    let router = Router::new().route("/forecast/*rest", get(forecast)).with_state(state);
    serve(router, requests, drops).await
}

/// State of a fake InfluxDB server.
#[derive(Debug, Default)]
pub struct InfluxState {
    pub databases: Vec<String>,
    pub creates: usize,
    pub writes: Vec<(String, String)>,
    pub fail_writes: bool,
}

#[derive(Clone)]
struct InfluxFake {
    requests: Requests,
    state: Arc<Mutex<InfluxState>>,
}

async fn query(State(fake): State<InfluxFake>, method: Method, uri: Uri, body: String) -> Response {
    let req = record(&fake.requests, &method, &uri, body);
    let q = req.query().get("q").cloned().unwrap_or_default();
    let mut state = fake.state.lock().unwrap();

    if method == Method::GET && q == "SHOW DATABASES" {
        let values: Vec<String> = state.databases.iter().map(|d| format!("[\"{}\"]", d)).collect();
        return reply(
            200,
            format!(
                r#"{{"results":[{{"statement_id":0,"series":[{{"name":"databases","columns":["name"],"values":[{}]}}]}}]}}"#,
                values.join(",")
            ),
        );
    }

    match q.strip_prefix("CREATE DATABASE ") {
        Some(name) if method == Method::POST => {
            let name = name.trim_matches('"').to_owned();
            state.creates += 1;
            if !state.databases.contains(&name) {
                state.databases.push(name);
            }
            reply(200, r#"{"results":[{"statement_id":0}]}"#.to_owned())
        }
        _ => reply(400, r#"{"error":"unsupported statement"}"#.to_owned()),
    }
}

async fn write(State(fake): State<InfluxFake>, method: Method, uri: Uri, body: String) -> Response {
    let req = record(&fake.requests, &method, &uri, body);
    let db = req.query().get("db").cloned().unwrap_or_default();
    let mut state = fake.state.lock().unwrap();

    if state.fail_writes {
        reply(500, r#"{"error":"engine: cache maximum memory size exceeded"}"#.to_owned())
    } else if !state.databases.contains(&db) {
        reply(404, format!(r#"{{"error":"database not found: \"{}\""}}"#, db))
    } else {
        state.writes.push((db, req.body));
        StatusCode::NO_CONTENT.into_response()
    }
}

/// Start a fake InfluxDB 1.x server supporting SHOW DATABASES, CREATE DATABASE, and writes.
pub async fn fake_influx(state: Arc<Mutex<InfluxState>>) -> FakeServer {
    let requests = Requests::default();
    let fake = InfluxFake {
        requests: Arc::clone(&requests),
        state,
    };

    let router = Router::new()
        .route("/query", get(query).post(query))
        .route("/write", post(write))
        .with_state(fake);
    serve(router, requests, 0).await
}
