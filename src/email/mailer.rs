use serde::Serialize;
use tracing::info;

use crate::{config::Config, AppResult};

use super::RenderedEmail;

/// Sends HTML email through the transactional email provider's HTTP API.
/// Without an API key it only logs what it would have sent.
#[derive(Clone)]
pub struct Mailer {
    http_client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct Outgoing<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl Mailer {
    pub fn new(config: &Config) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn send(&self, to: &str, email: &RenderedEmail) -> AppResult<()> {
        let Some(api_key) = self.api_key.as_deref() else {
            info!("not sending {:?} to {to}, no email provider key", email.subject);
            return Ok(());
        };

        self.http_client.post(&self.api_url)
            .bearer_auth(api_key)
            .json(&Outgoing {
                from: &self.from,
                to: [to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await?
            .error_for_status()?;

        info!("sent {:?} to {to}", email.subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_key_only_logs() {
        let mailer = Mailer::new(&Config::default());
        assert!(!mailer.is_live());

        let email = RenderedEmail {
            subject: "Hello".to_owned(),
            html: "<p>hi</p>".to_owned(),
        };
        mailer.send("ada@campus.edu", &email).await.unwrap();
    }
}
