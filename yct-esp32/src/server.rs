//! Device pages on the ESP-IDF HTTP server
//!
//! One wildcard handler per method; routing happens in `yct_core::web`.

use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use log::*;

use crate::SharedState;

// Max form body length
const MAX_LEN: usize = 1024;

// Pages are built on the handler stack
const STACK_SIZE: usize = 10240;

pub fn start(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        stack_size: STACK_SIZE,
        uri_match_wildcard: true,
        ..Default::default()
    })?;

    for (method, name) in [(Method::Get, "GET"), (Method::Post, "POST")] {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/*", method, move |req| serve(req, name, &state))?;
    }
    info!("Web server started");
    Ok(server)
}

fn serve(
    mut req: Request<&mut EspHttpConnection<'_>>,
    method: &str,
    state: &SharedState,
) -> anyhow::Result<()> {
    let uri = req.uri().to_string();
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri.as_str(), None),
    };

    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_LEN {
        req.into_status_response(413)?
            .write_all("Request too big".as_bytes())?;
        return Ok(());
    }
    let mut buf = vec![0; len];
    req.read_exact(&mut buf)?;
    let body = String::from_utf8_lossy(&buf);

    let request = yct_core::Request::from_parts(method, path, query, &body);
    let response = state
        .lock()
        .map_err(|_| anyhow::anyhow!("state lock poisoned"))?
        .handle(&request);

    req.into_response(
        response.status,
        None,
        &[("Content-Type", response.content_type)],
    )?
    .write_all(response.body.as_bytes())?;
    Ok(())
}
