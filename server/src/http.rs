use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;

use crate::app::App;
use crate::error::ApiError;

/// Binds to `addr` (port 0 picks a free one) and returns the real address, plus a future that
/// serves until `shutdown` resolves and open connections finish.
pub fn bind<F>(
    app: Arc<App>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let make_svc = make_service_fn(move |_| {
        let app = app.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| serve_req(app.clone(), req))) }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    let addr = server.local_addr();
    info!("Listening on http://{}", addr);
    Ok((addr, server.with_graceful_shutdown(shutdown)))
}

pub async fn serve_req(app: Arc<App>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Every route is a GET with no body
    let (parts, _) = req.into_parts();
    let method = parts.method;
    let path = parts.uri.path().to_string();
    info!("Handling {} {}", method, path);

    let mut resp = if method == Method::OPTIONS {
        preflight(&parts.headers)
    } else {
        match route(&app, &method, &path, parts.uri.query()).await {
            Ok(resp) => resp,
            Err(err) => {
                error!("{} {}: {}", method, path, err);
                error_response(&err)
            }
        }
    };
    add_cors(resp.headers_mut(), &parts.headers);
    Ok(resp)
}

async fn route(
    app: &App,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Result<Response<Body>, ApiError> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let known = matches!(
        segments.as_slice(),
        ["api", "road-paths"] | ["api", "vehicles"] | ["generate-path"] | ["stream", _]
    );
    if !known {
        return Err(ApiError::NotFound("Not Found".to_string()));
    }
    if method != Method::GET {
        return Ok(json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &Detail::new("Method Not Allowed"),
        ));
    }

    match segments.as_slice() {
        ["api", "road-paths"] => Ok(json_response(StatusCode::OK, &app.get_road_paths()?)),
        ["api", "vehicles"] => Ok(json_response(StatusCode::OK, &app.get_vehicles()?)),
        ["generate-path"] => {
            let mut params = parse_query(query);
            let device_id = required(&mut params, "device_id")?;
            let coords = required(&mut params, "coords")?;
            let result = app.generate_path(&device_id, &coords).await?;
            Ok(json_response(StatusCode::OK, &result))
        }
        ["stream", raw_id] => {
            let device_id = percent_decode_str(raw_id)
                .decode_utf8()
                .map_err(|_| ApiError::BadRequest("device_id isn't valid UTF-8".to_string()))?
                .to_string();
            let body = app.start_stream(&device_id)?;
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .map_err(|err| ApiError::Internal(err.into()))
        }
        _ => Err(ApiError::NotFound("Not Found".to_string())),
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn required(params: &mut HashMap<String, String>, key: &str) -> Result<String, ApiError> {
    params
        .remove(key)
        .ok_or_else(|| ApiError::BadRequest(format!("missing query parameter {}", key)))
}

#[derive(Serialize)]
struct Detail {
    detail: String,
}

impl Detail {
    fn new<I: Into<String>>(detail: I) -> Detail {
        Detail {
            detail: detail.into(),
        }
    }
}

fn error_response(err: &ApiError) -> Response<Body> {
    json_response(err.status(), &Detail::new(err.to_string()))
}

fn json_response<T: Serialize>(status: StatusCode, obj: &T) -> Response<Body> {
    let (status, body) = match serde_json::to_string(obj) {
        Ok(body) => (status, body),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{{\"detail\":\"serializing the response failed: {}\"}}", err),
        ),
    };
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn preflight(req_headers: &HeaderMap) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        req_headers
            .get(header::ACCESS_CONTROL_REQUEST_METHOD)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        req_headers
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
    resp
}

/// Any origin may call. Credentials are allowed, which rules out a literal `*` origin whenever the
/// browser sent one, so echo it back.
fn add_cors(headers: &mut HeaderMap, req_headers: &HeaderMap) {
    let origin = req_headers
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_decoded() {
        let params = parse_query(Some("device_id=bus%201&coords=1,2%3B3,4"));
        assert_eq!(params["device_id"], "bus 1");
        assert_eq!(params["coords"], "1,2;3,4");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn missing_param_is_a_bad_request() {
        let mut params = parse_query(Some("device_id=d1"));
        assert_eq!(required(&mut params, "device_id").unwrap(), "d1");
        let err = required(&mut params, "coords").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cors_echoes_origin() {
        let mut req_headers = HeaderMap::new();
        let mut headers = HeaderMap::new();
        add_cors(&mut headers, &req_headers);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        req_headers.insert(
            header::ORIGIN,
            HeaderValue::from_static("http://localhost:3000"),
        );
        let mut headers = HeaderMap::new();
        add_cors(&mut headers, &req_headers);
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn preflight_allows_what_was_asked() {
        let mut req_headers = HeaderMap::new();
        req_headers.insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("x-custom"),
        );
        let resp = preflight(&req_headers);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "*");
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "x-custom");
    }
}
