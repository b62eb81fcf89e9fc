use crate::backup::backup_set::BackupSet;
use crate::backup::function_path;
use crate::backup::notifications::{Notification, Report};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::ops::Deref;
use validator::Validate;

static DEFAULT_SMTP_HOST: &str = "localhost";

/// SMTP relay used for a set's reports.
///
/// Defaults to an unsecured relay on `localhost`, the local MTA.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    #[builder(default = default_host(), into)]
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    #[builder(default)]
    smtp_mode: SmtpMode,
    #[serde(default)]
    #[builder(into)]
    username: Option<String>,
    #[serde(default)]
    password: Option<RedactedString>,
}

fn default_host() -> String {
    DEFAULT_SMTP_HOST.to_owned()
}

impl Default for SmtpNotificationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// SMTP connection security modes
///
/// - `Unsecured`: plain text, the usual choice for a local MTA
/// - `Ssl`: TLS from the first byte
/// - `StartTls`: plain text upgraded to TLS
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    #[default]
    Unsecured,
    Ssl,
    StartTls,
}

/// Sender used when a set has no `mail_from`: `$USER@<hostname>`.
pub fn default_sender() -> Result<Mailbox> {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_owned());
    let host = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_owned());
    Ok(format!("{user}@{host}").parse::<Mailbox>()?)
}

/// Sends reports through the SMTP relay configured on each set.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmtpNotification;

impl SmtpNotification {
    #[named]
    fn build_message(&self, set: &BackupSet, report: &Report) -> Result<Message> {
        let from = match set.mail_from() {
            Some(from) => from.clone(),
            None => default_sender().add_fn_name(function_path!())?,
        };

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(report.body().clone()));
        for attachment in report.attachments() {
            let content_type = ContentType::parse(attachment.content_type())
                .map_err(|e| Error::content_type(e.to_string()))
                .add_fn_name(function_path!())?;
            multipart = multipart.singlepart(
                Attachment::new(attachment.file_name().clone())
                    .body(attachment.data().clone(), content_type),
            );
        }

        set.mail_to()
            .iter()
            .fold(Message::builder(), |email, send_to| {
                email.to(send_to.clone())
            })
            .from(from.clone())
            .subject(report.subject().clone())
            .multipart(multipart)
            .map_err(Error::from)
            .add_msg(format!(
                "Fail to build notification email from {:?} to {:?}",
                from,
                set.mail_to().deref()
            ))
            .add_fn_name(function_path!())
    }

    #[named]
    fn build_transport(&self, config: &SmtpNotificationConfig) -> Result<SmtpTransport> {
        let mut builder = match config.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(config.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(config.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(config.host.as_str()),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            config.host, config.smtp_mode
        ))
        .add_fn_name(function_path!())?;

        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        if let Some(username) = &config.username {
            let password = config
                .password
                .as_ref()
                .map(|p| p.inner().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }
        Ok(builder.build())
    }
}

impl Notification for SmtpNotification {
    #[named]
    fn send(&self, set: &BackupSet, report: &Report) -> Result<()> {
        tracing::info!(
            "Sending detailed logs of {} to {:?}",
            set.name(),
            set.mail_to().deref()
        );
        let email = self.build_message(set, report)?;
        let mailer = self.build_transport(set.smtp())?;

        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::smtp_send_error(m.to_owned()))
                .collect_vec();
            Err(Error::lots_of_error(error_vec))
        }
    }
}
