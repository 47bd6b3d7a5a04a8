//! HTML pages served by the device
//!
//! Every page is a complete document built as a string. Values coming from
//! storage, the broker or a form are escaped before they are interpolated.

use std::fmt::Write;

use chrono::NaiveDateTime;

use crate::config::{Config, ConfigError, MAX_DAYS_OF_HISTORIC, MAX_MINUTES_STAND_BY};
use crate::contacts::ContactList;
use crate::positives::PositiveList;
use crate::status::HealthStatus;
use crate::telemetry::{Feeds, TelemetryState};
use crate::wifi::ScanResult;

const STYLE: &str = "body { background-color: #cccccc; font-family: Arial, Helvetica, Sans-Serif; Color: #000088; }\
ul.contacts li { list-style: none; margin-bottom: 6px; padding: 8px; border: 1px solid black; background-color: #e6dfdf; }\
ul.positives li { background-color: #5d5c5c; color: #fff; }\
.notice { font-weight: bold; }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Scan,
    Config,
    Format,
    Telemetry,
    ContactTracer,
    NotFound,
}

impl Route {
    pub fn from_path(path: &str) -> Self {
        match path {
            "/" | "" => Route::Root,
            "/scan" => Route::Scan,
            "/config" => Route::Config,
            "/format" => Route::Format,
            "/adafruit" => Route::Telemetry,
            "/contact_tracer" => Route::ContactTracer,
            _ => Route::NotFound,
        }
    }
}

/// Invalid form submission
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{field} must be a number, got {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("a device cannot be its own contact")]
    OwnIdentity,
}

/// Decode an `application/x-www-form-urlencoded` query or body
pub fn parse_form(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes())
        .into_owned()
        .collect()
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, refresh: Option<u32>, body: &str) -> String {
    let refresh = refresh
        .map(|s| format!("<meta http-equiv='refresh' content='{s}'/>"))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html><html lang=\"fr\"><head><meta charset=\"UTF-8\">{refresh}\
         <title>{}</title><style>{STYLE}</style></head><body>{body}</body></html>",
        escape(title)
    )
}

pub fn render_root() -> String {
    page(
        "YNOV - Projet IoT B2",
        Some(30),
        "<h1>Bienvenue</h1><br>Depuis cette page, vous pouvez<br><ul>\
         <li><a href=\"scan\"> Scanner le WiFi</a></li>\
         <li><a href=\"adafruit\"> Adafruit</a></li>\
         <li><a href=\"format\"> Formater le SPIFFS</a></li>\
         <li><a href=\"config\"> Configuration de la carte</a></li>\
         <li><a href=\"contact_tracer\"> Vos Contacts</a></li></ul>",
    )
}

pub fn render_scan(networks: &[ScanResult]) -> String {
    let mut body = String::from("<h1>Page de scan</h1><br>");
    if networks.is_empty() {
        body.push_str("<p>Aucun réseau WiFi trouvé</p>");
    } else {
        body.push_str("<ul>");
        for network in networks {
            let _ = write!(
                body,
                "<li>{} ({} dBm, canal {}{})</li>",
                escape(&network.ssid),
                network.rssi,
                network.channel,
                if network.auth_required { ", protégé" } else { "" }
            );
        }
        body.push_str("</ul>");
    }
    page("YNOV - Projet IoT B2", Some(5), &body)
}

pub fn render_config(config: &Config, saved: bool) -> String {
    let mut body = String::from("<h1>Page de config</h1><br>");
    if saved {
        body.push_str("<p class=\"notice\">Configuration enregistrée</p>");
    }
    let text = |body: &mut String, id: &str, name: &str, label: &str, value: &str| {
        let _ = write!(
            body,
            "<label for='{id}'>{label}</label><br>\
             <input type='text' id='{id}' name='{name}' value='{}'><br><br>",
            escape(value)
        );
    };
    body.push_str("<form action='/config' method='post'>");
    text(&mut body, "ssid", "ssid", "SSID :", &config.ssid);
    text(&mut body, "password", "password", "Mot de passe :", &config.password);
    text(&mut body, "ap_ssid", "APssid", "Access point SSID :", &config.ap_ssid);
    text(&mut body, "ap_mdp", "APpassword", "Mot de passe :", &config.ap_password);
    let _ = write!(
        body,
        "<label for='minutes'>minutes</label>\
         <input type='range' id='minutes' name='minutes_stand_by' min='0' max='{MAX_MINUTES_STAND_BY}' value='{m}' step='1'>\
         <output>{m}</output> Temps proche d'une autre carte avant ajout aux contacts<br><br>\
         <label for='days'>jours</label>\
         <input type='range' id='days' name='days_of_historic' min='0' max='{MAX_DAYS_OF_HISTORIC}' value='{d}' step='1'>\
         <output>{d}</output> Nombres de jours avant suppression de la liste de contact<br><br>",
        m = config.minutes_stand_by,
        d = config.days_of_historic,
    );
    body.push_str("<input type='submit' value='Envoyer'></form>");
    page("Formulaire SSID et Mot de passe", None, &body)
}

pub fn render_format() -> String {
    page(
        "YNOV - Projet IoT B2",
        None,
        "<h1>Formatage fini</h1><br><a href=\"/\"> Retour</a>",
    )
}

pub fn render_telemetry(feeds: &Feeds, state: &TelemetryState) -> String {
    let switch = match state.switch_on {
        Some(true) => "ON",
        Some(false) => "OFF",
        None => "inconnu",
    };
    let slider = state.slider.unwrap_or(0.0);
    let report = state
        .own_report
        .map(|r| r.as_payload())
        .unwrap_or("aucun");

    let mut body = String::from("<h1>Adafruit</h1><br><ul>");
    let _ = write!(
        body,
        "<li>{} : {switch}</li><li>{} : {slider}</li><li>{} : {}</li></ul>",
        escape(&feeds.onoff),
        escape(&feeds.slider),
        escape(&feeds.health),
        escape(report),
    );
    let _ = write!(
        body,
        "<form action=\"/adafruit\" method=\"get\">\
         <label for=\"slider\">Valeur du slider :</label>\
         <input type=\"range\" id=\"slider\" name=\"slider\" min=\"0\" max=\"100\" value=\"{slider}\" step=\"10\">\
         <select name=\"onoff\"><option>ON</option><option>OFF</option></select>\
         <input type=\"submit\" value=\"Envoyer\"></form>"
    );
    page("YNOV - Projet IoT B2", Some(5), &body)
}

pub fn render_contacts(
    own: &str,
    contacts: &ContactList,
    positives: &PositiveList,
    status: HealthStatus,
    notice: Option<&str>,
) -> String {
    let mut body = String::new();
    if let Some(notice) = notice {
        let _ = write!(body, "<p class=\"notice\">{}</p>", escape(notice));
    }
    let _ = write!(
        body,
        "<h1>{}</h1><p>Statut : <strong>{status}</strong></p>",
        escape(own)
    );

    body.push_str("<h1>Liste des contacts</h1><ul class=\"contacts\">");
    for record in contacts.records() {
        let who = match record.partner_of(own) {
            Some(partner) => escape(partner),
            None => format!("{} / {}", escape(&record.id_a), escape(&record.id_b)),
        };
        let _ = write!(
            body,
            "<li><span>{who}</span> <span>{}</span></li>",
            contact_date(record.observed_at)
        );
    }
    body.push_str("</ul>");

    body.push_str("<h1>Liste des contacts positifs au COVID-19</h1><ul class=\"contacts positives\">");
    for id in positives.ids() {
        let _ = write!(body, "<li>{}</li>", escape(id));
    }
    body.push_str("</ul>");

    body.push_str(
        "<form action=\"/contact_tracer\" method=\"post\">\
         <input type=\"text\" name=\"contact\" placeholder=\"Nom du contact\">\
         <input type=\"submit\" value=\"Ajouter un contact\"></form>\
         <form action=\"/contact_tracer\" method=\"post\">\
         <input type=\"text\" name=\"positive\" placeholder=\"Identifiant positif\">\
         <input type=\"submit\" value=\"Ajouter un positif\"></form>\
         <form action=\"/contact_tracer\" method=\"post\">\
         <input type=\"text\" name=\"remove_positive\" placeholder=\"Identifiant positif\">\
         <input type=\"submit\" value=\"Retirer un positif\"></form>\
         <form action=\"/contact_tracer\" method=\"post\">\
         <input type=\"hidden\" name=\"self_report\" value=\"1\">\
         <input type=\"submit\" value=\"Je suis positif\"></form>",
    );
    page("Liste des contacts", None, &body)
}

/// Plain text diagnostic for unknown routes
pub fn render_not_found(method: &str, uri: &str, args: &[(String, String)]) -> String {
    let mut message = format!(
        "File Not Found\n\nURI: {uri}\nMethod: {method}\nArguments: {}\n",
        args.len()
    );
    for (name, value) in args {
        let _ = writeln!(message, " {name}: {value}");
    }
    message
}

/// Timestamp shown next to a saved contact
pub fn contact_date(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%d").to_string()
}
