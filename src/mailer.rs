use std::path::Path;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("bad address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP failure: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Deserialize, Serialize, Debug)]
pub struct MailerSettings {
    pub user: String,
    pub pass: String,
    pub relay: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
}

fn default_machine_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "ups".to_string())
}

impl MailerSettings {
    /// Reads the mail settings, or `None` when alerts aren't configured.
    pub fn load(path: &Path) -> Result<Option<MailerSettings>, figment::Error> {
        if !path.exists() {
            return Ok(None);
        }
        Figment::new().merge(Toml::file(path)).extract().map(Some)
    }
}

pub struct Mailer {
    from: String,
    vec_to: Vec<String>,
    machine_id: String,
    relay: SmtpTransport,
}

impl Mailer {
    pub fn new(settings: MailerSettings) -> Result<Mailer, MailError> {
        Ok(Mailer {
            from: settings.from,
            vec_to: settings.to,
            machine_id: settings.machine_id,
            relay: SmtpTransport::relay(&settings.relay)?
                .credentials(Credentials::new(settings.user, settings.pass))
                .build(),
        })
    }

    fn message(&self, subject: &str, body: &str) -> Result<Message, MailError> {
        let mut builder = Message::builder().from(self.from.parse()?);
        for to in &self.vec_to {
            builder = builder.to(to.parse()?)
        }
        Ok(builder
            .subject(format!("{}: {}", self.machine_id, subject))
            .body(body.to_string())?)
    }

    pub fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        let email = self.message(subject, body)?;
        if cfg!(debug_assertions) {
            log::info!("In debug build, not sending email {:?}.", subject);
            return Ok(());
        }
        self.relay.send(&email)?;
        Ok(())
    }

    /// Sends, logging rather than propagating failures.
    pub fn notify(&self, subject: &str, body: &str) {
        if let Err(e) = self.send(subject, body) {
            log::warn!("Failed to send email: {}", e)
        }
    }
}
