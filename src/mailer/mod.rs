//! Mailing the saved book.

use std::path::Path;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use lettre::address::AddressError;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::EmailConfig;

pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

const BODY: &str = "Here's your daily KingsRSS update. The EPUB file is attached.";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid email address: {0}")]
    Address(#[from] AddressError),

    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("SMTP error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("failed to read attachment: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Mailer {
    /// Deliver the book at `path`. Implementations that are switched off
    /// return `Ok(())` without sending anything.
    async fn send(&self, path: &Path) -> Result<(), SendError>;
}

/// `KingsRSS Daily Update - YYYY-MM-DD`
pub fn subject(date: NaiveDate) -> String {
    format!("KingsRSS Daily Update - {}", date.format("%Y-%m-%d"))
}

/// Builds the message for `path` from `config`; the book is attached under
/// its own file name.
pub fn build_message(
    config: &EmailConfig,
    date: NaiveDate,
    path: &Path,
    content: Vec<u8>,
) -> Result<Message, SendError> {
    let mut builder = Message::builder()
        .from(config.sender_email.parse::<Mailbox>()?)
        .subject(subject(date));
    for recipient in &config.recipients {
        builder = builder.to(recipient.parse::<Mailbox>()?);
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "kingsrss.epub".to_string());
    let attachment =
        Attachment::new(file_name).body(content, ContentType::parse(EPUB_MEDIA_TYPE)?);

    let message = builder.multipart(
        MultiPart::mixed()
            .singlepart(SinglePart::plain(BODY.to_string()))
            .singlepart(attachment),
    )?;
    Ok(message)
}

/// Sends through an SMTP relay with STARTTLS, logging in as the sender.
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, path: &Path) -> Result<(), SendError> {
        if !self.config.enabled {
            tracing::debug!("Email disabled, not sending {}", path.display());
            return Ok(());
        }

        let content = tokio::fs::read(path).await?;
        let message = build_message(&self.config, Local::now().date_naive(), path, content)?;

        let transport =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)?
                .port(self.config.smtp_port)
                .credentials(Credentials::new(
                    self.config.sender_email.clone(),
                    self.config.sender_password.clone(),
                ))
                .build();

        transport.send(message).await?;
        tracing::info!(
            "Email sent successfully to {} recipient(s)",
            self.config.recipients.len()
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every path it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        sent: Mutex<Vec<PathBuf>>,
    }

    impl RecordingMailer {
        pub(crate) fn sent(&self) -> Vec<PathBuf> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, path: &Path) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }
}
