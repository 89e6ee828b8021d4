//! Booking confirmations to the customer and the business owner over email
//! and WhatsApp.
//!
//! Delivery runs on a spawned task after the appointment is stored; the
//! booking response never waits on it and failures are only logged.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, EmailConfig, WhatsAppConfig};

const RESEND_URL: &str = "https://api.resend.com/emails";
const WHATSAPP_API: &str = "https://graph.facebook.com/v19.0";

/// Who a booking notice is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Customer,
    Owner,
}

impl Recipient {
    pub const ALL: [Recipient; 2] = [Recipient::Customer, Recipient::Owner];

    pub fn as_str(self) -> &'static str {
        match self {
            Recipient::Customer => "customer",
            Recipient::Owner => "owner",
        }
    }
}

/// Everything a channel needs to render a booking confirmation.
#[derive(Debug, Clone, Default)]
pub struct BookingNotice {
    pub appointment_id: i64,
    pub business_name: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    pub service_name: String,
    pub professional_name: String,
    pub date: String,
    pub start_time: String,
    pub deposit: i64,
    pub online: bool,
    pub cancellation_url: String,
}

impl BookingNotice {
    pub fn email(&self, recipient: Recipient) -> Option<&str> {
        match recipient {
            Recipient::Customer => self.customer_email.as_deref(),
            Recipient::Owner => self.owner_email.as_deref(),
        }
    }

    pub fn phone(&self, recipient: Recipient) -> Option<&str> {
        match recipient {
            Recipient::Customer => self.customer_phone.as_deref(),
            Recipient::Owner => self.owner_phone.as_deref(),
        }
    }

    pub fn subject(&self, recipient: Recipient) -> String {
        match recipient {
            Recipient::Customer => format!("Turno confirmado en {}", self.business_name),
            Recipient::Owner => format!("Nuevo turno #{}", self.appointment_id),
        }
    }

    pub fn text(&self, recipient: Recipient) -> String {
        match recipient {
            Recipient::Customer => self.customer_text(),
            Recipient::Owner => self.owner_text(),
        }
    }

    fn hhmm(&self) -> &str {
        self.start_time.get(..5).unwrap_or(&self.start_time)
    }

    fn customer_text(&self) -> String {
        let payment = if self.online {
            format!("Seña a abonar online: ${}", self.deposit)
        } else {
            "Pago en el local".to_string()
        };
        format!(
            "Hola {}, tu turno en {} quedó reservado.\n\
             Servicio: {} con {}\n\
             Fecha: {} a las {}\n\
             {}\n\
             Si necesitás cancelar: {}",
            self.customer_name,
            self.business_name,
            self.service_name,
            self.professional_name,
            self.date,
            self.hhmm(),
            payment,
            self.cancellation_url
        )
    }

    fn owner_text(&self) -> String {
        let payment = if self.online {
            format!("Seña pendiente: ${}", self.deposit)
        } else {
            "Pago en el local".to_string()
        };
        let contact = [self.customer_phone.as_deref(), self.customer_email.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" / ");
        format!(
            "Nuevo turno #{}\n\
             Cliente: {}{}\n\
             Servicio: {} con {}\n\
             Fecha: {} a las {}\n\
             {}",
            self.appointment_id,
            self.customer_name,
            if contact.is_empty() { String::new() } else { format!(" ({})", contact) },
            self.service_name,
            self.professional_name,
            self.date,
            self.hhmm(),
            payment
        )
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Destination for this recipient, `None` when they have none on file.
    fn address(&self, notice: &BookingNotice, recipient: Recipient) -> Option<String>;

    async fn deliver(
        &self,
        to: &str,
        notice: &BookingNotice,
        recipient: Recipient,
    ) -> anyhow::Result<()>;
}

// ── Email (Resend) ──

pub struct EmailChannel {
    http: reqwest::Client,
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(http: reqwest::Client, config: EmailConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn address(&self, notice: &BookingNotice, recipient: Recipient) -> Option<String> {
        notice
            .email(recipient)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }

    async fn deliver(
        &self,
        to: &str,
        notice: &BookingNotice,
        recipient: Recipient,
    ) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(RESEND_URL)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "from": self.config.from,
                "to": [to],
                "subject": notice.subject(recipient),
                "text": notice.text(recipient),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Resend returned {}: {}", status, body);
        }
        Ok(())
    }
}

// ── WhatsApp (Cloud API) ──

pub struct WhatsAppChannel {
    http: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppChannel {
    pub fn new(http: reqwest::Client, config: WhatsAppConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl NotificationChannel for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn address(&self, notice: &BookingNotice, recipient: Recipient) -> Option<String> {
        let digits: String = notice
            .phone(recipient)?
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        (!digits.is_empty()).then_some(digits)
    }

    async fn deliver(
        &self,
        to: &str,
        notice: &BookingNotice,
        recipient: Recipient,
    ) -> anyhow::Result<()> {
        let url = format!("{}/{}/messages", WHATSAPP_API, self.config.phone_number_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&serde_json::json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "body": notice.text(recipient) },
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("WhatsApp API returned {}: {}", status, body);
        }
        Ok(())
    }
}

// ── Dispatcher ──

#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: Arc<Vec<Box<dyn NotificationChannel>>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            channels: Arc::new(channels),
        }
    }

    /// Channels enabled by configuration.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
        if let Some(email) = &config.email {
            channels.push(Box::new(EmailChannel::new(http.clone(), email.clone())));
        }
        if let Some(whatsapp) = &config.whatsapp {
            channels.push(Box::new(WhatsAppChannel::new(http, whatsapp.clone())));
        }
        if channels.is_empty() {
            tracing::warn!("No notification channels configured, booking confirmations are disabled");
        }
        Self::new(channels)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Fire-and-forget delivery on the runtime.
    pub fn dispatch_booking(&self, notice: BookingNotice) {
        if self.channels.is_empty() {
            return;
        }
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.deliver_all(&notice).await;
        });
    }

    /// Deliver to every recipient on every channel that has an address for
    /// them. Returns the number of failed deliveries.
    pub async fn deliver_all(&self, notice: &BookingNotice) -> usize {
        let mut failures = 0;
        for channel in self.channels.iter() {
            for recipient in Recipient::ALL {
                let Some(to) = channel.address(notice, recipient) else {
                    continue;
                };
                match channel.deliver(&to, notice, recipient).await {
                    Ok(()) => tracing::info!(
                        appointment_id = notice.appointment_id,
                        recipient = recipient.as_str(),
                        "Booking confirmation sent via {}",
                        channel.name()
                    ),
                    Err(e) => {
                        failures += 1;
                        tracing::error!(
                            appointment_id = notice.appointment_id,
                            recipient = recipient.as_str(),
                            "Booking confirmation via {} failed: {}",
                            channel.name(),
                            e
                        );
                    }
                }
            }
        }
        failures
    }
}
