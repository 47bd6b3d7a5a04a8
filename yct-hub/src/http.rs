use log::*;

use crate::SharedHub;

pub type HttpResult<E = std::io::Error> = Result<HttpResponse, E>;

pub type HttpResponse =
    hyper::Response<http_body_util::combinators::BoxBody<hyper::body::Bytes, std::io::Error>>;

pub async fn run_server(addr: std::net::SocketAddr, hub: SharedHub) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");
    loop {
        tokio::select! {
            val = listener.accept() => {
                match val {
                    Ok((stream, _addr)) => {
                        tokio::task::spawn(handle_connection(stream, hub.clone()));
                    },
                    Err(e) => {
                        warn!("failed to accept: {e:?}");
                        continue;
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, hub: SharedHub) {
    let io = hyper_util::rt::TokioIo::new(stream);

    let builder =
        hyper_util::server::conn::auto::Builder::new(hyper_util::rt::tokio::TokioExecutor::new());
    tokio::pin! {
        let conn = builder
            .serve_connection(
                io,
                hyper::service::service_fn(|r| handle_request(r, hub.clone())),
            );
    }

    if let Err(e) = tokio::select! {
        r = &mut conn => r,
    } {
        warn!("connection error: {e:?}");
    }
}

/// Collect the form body, then hand the request to the device pages
pub async fn handle_request<B>(r: hyper::Request<B>, hub: SharedHub) -> HttpResult
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    use http_body_util::BodyExt;

    let (parts, body) = r.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return yct_hub::bad_request!("failed to read body: {e}"),
    };
    let Ok(body) = std::str::from_utf8(&body) else {
        return yct_hub::bad_request!("body is not UTF-8");
    };

    let request =
        yct_core::Request::from_parts(parts.method.as_str(), parts.uri.path(), parts.uri.query(), body);
    let response = hub.lock().await.handle(crate::now(), &request);
    respond(response)
}

fn respond(response: yct_core::Response) -> HttpResult {
    let Ok(status) = hyper::StatusCode::from_u16(response.status) else {
        return yct_hub::server_error!("invalid status {}", response.status);
    };
    let mut r = bytes_to_resp(response.body.into_bytes(), status)?;
    r.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(response.content_type),
    );
    Ok(r)
}

pub fn server_error_(s: String) -> HttpResult {
    bytes_to_resp(s.into_bytes(), hyper::StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn bytes_to_resp(bytes: Vec<u8>, status: hyper::StatusCode) -> HttpResult {
    use http_body_util::BodyExt;

    let mut r = hyper::Response::new(
        http_body_util::Full::new(hyper::body::Bytes::from(bytes))
            .map_err(|e| match e {})
            .boxed(),
    );
    *r.status_mut() = status;
    Ok(r)
}

pub fn bad_request_(m: String) -> HttpResult {
    bytes_to_resp(m.into_bytes(), hyper::StatusCode::BAD_REQUEST)
}

#[macro_export]
macro_rules! server_error {
    ($($t:tt)*) => {{
        yct_hub::http::server_error_(format!($($t)*))
    }};
}

#[macro_export]
macro_rules! bad_request {
    ($($t:tt)*) => {{
        yct_hub::http::bad_request_(format!($($t)*))
    }};
}

#[cfg(test)]
mod tests {
    use super::handle_request;
    use crate::{Hub, Settings};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use std::sync::Arc;

    fn hub() -> (tempfile::TempDir, crate::SharedHub) {
        let home = tempfile::tempdir().unwrap();
        let hub = Hub::open(
            home.path(),
            Settings {
                device_name: "ESP32-MAXIME".to_string(),
                io_username: "alice".to_string(),
                networks: Vec::new(),
            },
        )
        .unwrap();
        (home, Arc::new(tokio::sync::Mutex::new(hub)))
    }

    fn request(method: &str, uri: &str, body: &str) -> hyper::Request<Full<Bytes>> {
        hyper::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_text(r: super::HttpResponse) -> String {
        let bytes = r.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn form_post_updates_the_device() {
        let (_home, hub) = hub();
        let r = handle_request(
            request("POST", "/contact_tracer", "contact=ESP32-NOA&positive=ESP32-NOA"),
            hub.clone(),
        )
        .await
        .unwrap();
        assert_eq!(r.status(), hyper::StatusCode::OK);
        assert_eq!(
            r.headers()[hyper::header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert!(body_text(r).await.contains("<strong>cas contact</strong>"));

        let hub = hub.lock().await;
        assert_eq!(hub.device().contacts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_arguments_reach_the_not_found_page() {
        let (_home, hub) = hub();
        let r = handle_request(request("GET", "/missing?x=1", ""), hub)
            .await
            .unwrap();
        assert_eq!(r.status(), hyper::StatusCode::NOT_FOUND);
        assert_eq!(
            body_text(r).await,
            "File Not Found\n\nURI: /missing\nMethod: GET\nArguments: 1\n x: 1\n"
        );
    }

    #[tokio::test]
    async fn bad_config_is_a_bad_request() {
        let (_home, hub) = hub();
        let r = handle_request(request("POST", "/config", "minutes_stand_by=soon"), hub)
            .await
            .unwrap();
        assert_eq!(r.status(), hyper::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn body_must_be_utf8() {
        let (_home, hub) = hub();
        let r = hyper::Request::builder()
            .method("POST")
            .uri("/config")
            .body(Full::new(Bytes::from_static(&[0xff, 0xfe])))
            .unwrap();
        let r = handle_request(r, hub).await.unwrap();
        assert_eq!(r.status(), hyper::StatusCode::BAD_REQUEST);
    }
}
