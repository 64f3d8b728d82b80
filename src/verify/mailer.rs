use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::VerifyError;

const SUBJECT: &str = "Email verification";
const SENDER_NAME: &str = "Verify Bot";

/// Sends verification codes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_code(&self, to: &str, code: &str) -> Result<(), VerifyError>;
}

/// SMTP submission with STARTTLS/TLS via `relay`, authenticated as the sender.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, user: &str, password: &str) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();
        let from = format!("{} <{}>", SENDER_NAME, user).parse()?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_code(&self, to: &str, code: &str) -> Result<(), VerifyError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| VerifyError::Mail(format!("bad recipient: {}", e)))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(code_email_html(code))
            .map_err(|e| VerifyError::Mail(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| VerifyError::Mail(e.to_string()))?;
        info!("Verification code sent");
        Ok(())
    }
}

/// HTML body carrying the code.
pub fn code_email_html(code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; padding: 24px;">
  <h2>Email verification</h2>
  <p>Enter this code in Discord to finish verifying your address:</p>
  <p style="font-size: 32px; font-weight: bold; letter-spacing: 6px;">{}</p>
  <p style="color: #888888; font-size: 12px;">
    If you did not request this, ignore this message. Do not reply.
  </p>
</body>
</html>
"#,
        code
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_appears_in_body() {
        let html = code_email_html("482913");
        assert!(html.contains(">482913<"));
    }
}
