use serde::Deserialize;

use super::ConfigError;

/// SMTP settings for mailing the finished book.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// Mail the book after each successful save (default: false)
    pub enabled: bool,

    pub smtp_server: String,

    /// STARTTLS submission port (default: 587)
    pub smtp_port: u16,

    /// Sender address, also used as the SMTP login
    pub sender_email: String,

    pub sender_password: String,

    pub recipients: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: 587,
            sender_email: String::new(),
            sender_password: String::new(),
            recipients: Vec::new(),
        }
    }
}

impl EmailConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.smtp_server.trim().is_empty() {
            return Err(ConfigError::Invalid("email.smtp_server is required".into()));
        }
        if self.sender_email.trim().is_empty() {
            return Err(ConfigError::Invalid("email.sender_email is required".into()));
        }
        if self.recipients.is_empty() {
            return Err(ConfigError::Invalid(
                "email.recipients must name at least one address".into(),
            ));
        }

        Ok(())
    }
}
