//! Request dispatch for the device web server
//!
//! Transport agnostic: the hub feeds it from hyper, the firmware from the
//! ESP-IDF HTTP server. Query arguments and form bodies are merged, in that
//! order, into one argument list.

use chrono::NaiveDateTime;
use log::*;

use crate::config::Config;
use crate::contacts::AddOutcome;
use crate::device::Device;
use crate::pages::{self, parse_form, FormError, Route};
use crate::storage::{Storage, StoreError};
use crate::telemetry::{Bridge, BridgeError, Broker};
use crate::wifi::NetworkScanner;

pub const HTML: &str = "text/html; charset=utf-8";
pub const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub args: Vec<(String, String)>,
}

impl Request {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            args: Vec::new(),
        }
    }

    /// Build a request from its raw query string and form body
    pub fn from_parts(method: &str, path: &str, query: Option<&str>, body: &str) -> Self {
        let mut args = query.map(parse_form).unwrap_or_default();
        args.extend(parse_form(body));
        Self {
            method: method.to_string(),
            path: path.to_string(),
            args,
        }
    }

    fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: HTML,
            body,
        }
    }

    pub fn text(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: TEXT,
            body,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WebError {
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("wifi scan failed: {0}")]
    Scan(String),
}

/// Serve one request. Never fails: errors become 400 or 500 responses.
pub fn handle_request<S, B, W>(
    device: &mut Device<S>,
    bridge: &mut Bridge<B>,
    scanner: &mut W,
    now: NaiveDateTime,
    request: &Request,
) -> Response
where
    S: Storage,
    B: Broker,
    W: NetworkScanner,
{
    debug!("{} {}", request.method, request.path);
    match dispatch(device, bridge, scanner, now, request) {
        Ok(response) => response,
        Err(WebError::Form(e)) => {
            warn!("{} {}: {e}", request.method, request.path);
            Response::text(400, format!("Bad Request: {e}\n"))
        }
        Err(e) => {
            error!("{} {}: {e}", request.method, request.path);
            Response::text(500, format!("Internal Server Error: {e}\n"))
        }
    }
}

fn dispatch<S, B, W>(
    device: &mut Device<S>,
    bridge: &mut Bridge<B>,
    scanner: &mut W,
    now: NaiveDateTime,
    request: &Request,
) -> Result<Response, WebError>
where
    S: Storage,
    B: Broker,
    W: NetworkScanner,
{
    let body = match Route::from_path(&request.path) {
        Route::Root => pages::render_root(),
        Route::Scan => {
            let networks = scanner.scan().map_err(|e| WebError::Scan(e.to_string()))?;
            info!("{} network(s) found", networks.len());
            pages::render_scan(&networks)
        }
        Route::Config => {
            let saved = !request.args.is_empty();
            if saved {
                let config = Config::from_form(&request.args).map_err(FormError::from)?;
                device.save_config(&config)?;
            }
            pages::render_config(&device.config()?, saved)
        }
        Route::Format => {
            device.format()?;
            pages::render_format()
        }
        Route::Telemetry => {
            if let Some(onoff) = request.arg("onoff") {
                bridge.publish_switch(onoff.trim() == "ON")?;
            }
            if let Some(slider) = request.arg("slider") {
                let value = slider
                    .trim()
                    .parse()
                    .map_err(|_| FormError::InvalidNumber {
                        field: "slider",
                        value: slider.to_string(),
                    })?;
                bridge.publish_slider(value)?;
            }
            pages::render_telemetry(bridge.feeds(), bridge.state())
        }
        Route::ContactTracer => {
            let notice = apply_contact_form(device, bridge, now, request)?;
            let own = device.identity().as_str().to_string();
            pages::render_contacts(
                &own,
                &device.contacts()?,
                &device.positives()?,
                device.health_status()?,
                notice.as_deref(),
            )
        }
        Route::NotFound => {
            info!("no route for {}", request.path);
            return Ok(Response::text(
                404,
                pages::render_not_found(&request.method, &request.path, &request.args),
            ));
        }
    };
    Ok(Response::html(body))
}

fn non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str, FormError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FormError::Empty { field });
    }
    Ok(value)
}

/// One field of the contact tracer form
enum ContactAction<'a> {
    Contact(&'a str),
    Positive(&'a str),
    RemovePositive(&'a str),
    SelfReport,
}

/// Check every field of the contact tracer form, nothing is applied on error
fn parse_contact_form<'a>(
    own: &str,
    request: &'a Request,
) -> Result<Vec<ContactAction<'a>>, FormError> {
    let mut actions = Vec::new();
    for (name, value) in &request.args {
        let action = match name.as_str() {
            "contact" => {
                let id = non_empty("contact", value)?;
                if id == own {
                    return Err(FormError::OwnIdentity);
                }
                ContactAction::Contact(id)
            }
            "positive" => ContactAction::Positive(non_empty("positive", value)?),
            "remove_positive" => {
                ContactAction::RemovePositive(non_empty("remove_positive", value)?)
            }
            "self_report" => ContactAction::SelfReport,
            _ => {
                debug!("ignoring form field {name}");
                continue;
            }
        };
        actions.push(action);
    }
    Ok(actions)
}

fn apply_contact_action<S: Storage, B: Broker>(
    device: &mut Device<S>,
    bridge: &mut Bridge<B>,
    now: NaiveDateTime,
    action: &ContactAction<'_>,
) -> Result<String, WebError> {
    Ok(match *action {
        ContactAction::Contact(id) => match device.record_contact(id, now)? {
            AddOutcome::Added => format!("Contact {id} ajouté"),
            AddOutcome::Duplicate => format!("{id} est déjà dans vos contacts"),
            AddOutcome::Full => "Liste de contacts pleine".to_string(),
        },
        ContactAction::Positive(id) => match device.report_partner_positive(id)? {
            Some(AddOutcome::Added) => format!("{id} ajouté aux positifs"),
            Some(AddOutcome::Duplicate) => format!("{id} est déjà positif"),
            Some(AddOutcome::Full) => "Liste des positifs pleine".to_string(),
            None => format!("{id} n'est pas dans vos contacts"),
        },
        ContactAction::RemovePositive(id) => {
            if device.remove_positive(id)? {
                format!("{id} retiré des positifs")
            } else {
                format!("{id} n'est pas dans les positifs")
            }
        }
        ContactAction::SelfReport => {
            bridge.report_self_positive(device, now)?;
            "Vous êtes déclaré positif".to_string()
        }
    })
}

/// Apply the contact tracer form, returns the message to show
///
/// The status is reclassified whenever something was attempted, even if a
/// later write failed.
fn apply_contact_form<S: Storage, B: Broker>(
    device: &mut Device<S>,
    bridge: &mut Bridge<B>,
    now: NaiveDateTime,
    request: &Request,
) -> Result<Option<String>, WebError> {
    let actions = parse_contact_form(device.identity().as_str(), request)?;
    if actions.is_empty() {
        return Ok(None);
    }

    let mut notice = None;
    let applied = actions.iter().try_for_each(|action| {
        notice = Some(apply_contact_action(device, bridge, now, action)?);
        Ok::<_, WebError>(())
    });
    bridge.refresh_status(device, now)?;
    applied?;
    Ok(notice)
}
