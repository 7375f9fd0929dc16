#[cfg(test)]
mod server_test;

use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use hyper::body::HttpBody;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::error::{Error, Result};
use crate::session::{Negotiator, Role};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// RelayService answers WHIP and WHEP requests and optionally serves a
/// directory of static files.
pub struct RelayService {
    negotiator: Arc<Negotiator>,
    static_dir: Option<PathBuf>,
}

impl RelayService {
    pub fn new(negotiator: Arc<Negotiator>, static_dir: Option<PathBuf>) -> Self {
        RelayService {
            negotiator,
            static_dir,
        }
    }

    pub fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let role = match req.uri().path() {
            "/whip" => Some(Role::Publisher),
            "/whep" => Some(Role::Subscriber),
            _ => None,
        };

        match (req.method(), role) {
            (&Method::POST, Some(role)) => self.negotiate(role, req).await,
            (_, Some(_)) => {
                let mut response = status_response(StatusCode::METHOD_NOT_ALLOWED);
                response
                    .headers_mut()
                    .insert(ALLOW, hyper::header::HeaderValue::from_static("POST"));
                response
            }
            (&Method::GET, None) | (&Method::HEAD, None) => {
                let head = req.method() == Method::HEAD;
                match &self.static_dir {
                    Some(dir) => serve_file(dir, req.uri().path(), head).await,
                    None => status_response(StatusCode::NOT_FOUND),
                }
            }
            _ => status_response(StatusCode::NOT_FOUND),
        }
    }

    async fn negotiate(&self, role: Role, req: Request<Body>) -> Response<Body> {
        let limit = self.negotiator.config().max_offer_bytes;
        let result = match read_offer(req, limit).await {
            Ok(offer) => self.negotiator.negotiate(role, &offer).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(answer) => {
                let mut response = Response::new(Body::from(answer.sdp));
                *response.status_mut() = StatusCode::CREATED;
                let headers = response.headers_mut();
                headers.insert(
                    LOCATION,
                    hyper::header::HeaderValue::from_static(answer.location),
                );
                headers.insert(
                    CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(SDP_CONTENT_TYPE),
                );
                response
            }
            Err(err) => {
                log::warn!("{} request failed: {err}", role.location());
                error_response(&err)
            }
        }
    }
}

/// read_offer collects a request body of at most `limit` bytes as text.
async fn read_offer(req: Request<Body>, limit: usize) -> Result<String> {
    if let Some(size) = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if size > limit {
            return Err(Error::ErrOfferTooLarge { size, limit });
        }
    }

    let mut body = req.into_body();
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        let size = buf.len() + chunk.len();
        if size > limit {
            return Err(Error::ErrOfferTooLarge { size, limit });
        }
        buf.extend_from_slice(&chunk);
    }

    String::from_utf8(buf)
        .map_err(|err| Error::ErrMalformedOffer(format!("offer is not valid UTF-8: {err}")))
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::default();
    *response.status_mut() = status;
    response
}

fn error_response(err: &Error) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{}: {err}", err.kind())));
    *response.status_mut() = err.status_code();
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// static_path maps a request path below `root`; None for any path that
/// would leave it.
fn static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() || relative.ends_with('/') {
        format!("{relative}index.html")
    } else {
        relative.to_owned()
    };

    let mut path = root.to_path_buf();
    for component in Path::new(&relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn serve_file(root: &Path, request_path: &str, head: bool) -> Response<Body> {
    let path = match static_path(root, request_path) {
        Some(path) => path,
        None => return status_response(StatusCode::NOT_FOUND),
    };

    match tokio::fs::read(&path).await {
        Ok(data) => {
            let len = data.len();
            let body = if head { Body::empty() } else { Body::from(data) };
            let mut response = Response::new(body);
            let headers = response.headers_mut();
            headers.insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static(content_type(&path)),
            );
            headers.insert(CONTENT_LENGTH, hyper::header::HeaderValue::from(len));
            response
        }
        Err(err) => {
            log::debug!("static file {} not served: {err}", path.display());
            status_response(StatusCode::NOT_FOUND)
        }
    }
}

/// serve runs the HTTP server on `addr` until `shutdown` resolves.
pub async fn serve<F>(service: Arc<RelayService>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(addr)?;
    serve_listener(service, listener, shutdown).await
}

/// serve_listener runs the HTTP server on an already bound listener until
/// `shutdown` resolves.
pub async fn serve_listener<F>(
    service: Arc<RelayService>,
    listener: TcpListener,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    listener.set_nonblocking(true)?;
    let make_service = make_service_fn(move |_| {
        let service = Arc::clone(&service);
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let service = Arc::clone(&service);
                async move { Ok::<_, hyper::Error>(service.handle(req).await) }
            }))
        }
    });

    let server = Server::from_tcp(listener)?.serve(make_service);
    log::info!("listening on http://{}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await?;

    Ok(())
}
