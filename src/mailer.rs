//! Outgoing mail.
//!
//! Handlers build a [`MailMessage`] from one of the templates below and hand it
//! to the `web::Data<dyn Mailer>` installed at startup. The shipped
//! [`LogMailer`] writes the message to the log instead of delivering it.

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), AppError>;
}

/// Logs each message at `info` level.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<(), AppError> {
        log::info!(
            "Mail from {} to {}: {}\n{}",
            message.from,
            message.to,
            message.subject,
            message.html
        );
        Ok(())
    }
}

pub fn verification_email(from: &str, to: &str, frontend_url: &str, token: &str) -> MailMessage {
    let url = format!("{}/verify-email?token={}", frontend_url, token);
    MailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        html: format!(
            "<h1>Verify your email address</h1>\n\
             <p>Please click the link below to verify your email address:</p>\n\
             <a href=\"{url}\">Verify Email</a>\n\
             <p>If the button doesn't work, copy and paste this link into your browser:</p>\n\
             <p>{url}</p>",
            url = url
        ),
    }
}

pub fn password_reset_email(from: &str, to: &str, frontend_url: &str, token: &str) -> MailMessage {
    let url = format!("{}/reset-password?token={}", frontend_url, token);
    MailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html: format!(
            "<h1>Reset your password</h1>\n\
             <p>Please click the link below to reset your password:</p>\n\
             <a href=\"{url}\">Reset Password</a>\n\
             <p>This link will expire in 1 hour.</p>",
            url = url
        ),
    }
}
