//! Outbound events and the notifier that delivers them.
//!
//! The [`Bank`](crate::service::Bank) never talks to a transport directly: it
//! pushes [`OutboundEvent`]s on a channel, and [`run_notifier`] renders and
//! delivers them in the background. Delivery failures are logged and dropped.

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::workflow::{FundingRequest, RequestStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundEvent {
    AccountRegistered {
        email: String,
        referred_by: Option<String>,
    },
    /// A new request waits for an admin decision.
    RequestSubmitted(FundingRequest),
    RequestSettled {
        request: FundingRequest,
        /// Why the request was settled other than by the admin's choice.
        note: Option<String>,
    },
    ReferralRewarded {
        referrer: String,
        referee: String,
        amount: i64,
    },
}

/// A link an admin can follow from the notification, e.g. "Approve".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionLink {
    pub label: String,
    pub url: String,
}

/// A rendered message, ready for a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub actions: Vec<ActionLink>,
}

/// Builds the admin approve/reject URLs embedded in notifications.
#[derive(Clone, Debug)]
pub struct AdminLinks {
    pub base_url: String,
    pub admin_token: String,
}

impl AdminLinks {
    pub fn decision_url(&self, request: &FundingRequest, action: &str) -> String {
        format!(
            "{}/api/admin/{}/{}/{}?token={}",
            self.base_url.trim_end_matches('/'),
            request.kind.route(),
            request.id,
            action,
            self.admin_token
        )
    }
}

impl OutboundEvent {
    pub fn render(&self, links: &AdminLinks) -> Notification {
        match self {
            OutboundEvent::AccountRegistered { email, referred_by } => Notification {
                message: match referred_by {
                    Some(referrer) => format!("New account {email} (referred by {referrer})"),
                    None => format!("New account {email}"),
                },
                actions: Vec::new(),
            },
            OutboundEvent::RequestSubmitted(request) => {
                let mut message = format!(
                    "New {} request\nAccount: {}\nAmount: KES {}\nPhone: {}",
                    request.kind, request.account, request.amount, request.phone
                );
                if let Some(reference) = &request.reference {
                    message.push_str(&format!("\nReference: {reference}"));
                }
                message.push_str(&format!("\nId: {}", request.id));

                Notification {
                    message,
                    actions: vec![
                        ActionLink {
                            label: "Approve".into(),
                            url: links.decision_url(request, "approve"),
                        },
                        ActionLink {
                            label: "Reject".into(),
                            url: links.decision_url(request, "reject"),
                        },
                    ],
                }
            }
            OutboundEvent::RequestSettled { request, note } => {
                let verb = match request.status {
                    RequestStatus::Approved => "approved",
                    RequestStatus::Rejected => "rejected",
                    RequestStatus::Pending => "pending",
                };
                let mut message = format!(
                    "{} of KES {} for {} {}",
                    request.kind, request.amount, request.account, verb
                );
                if let Some(note) = note {
                    message.push_str(&format!(" ({note})"));
                }
                Notification {
                    message,
                    actions: Vec::new(),
                }
            }
            OutboundEvent::ReferralRewarded {
                referrer,
                referee,
                amount,
            } => Notification {
                message: format!("Referral reward of KES {amount} paid to {referrer} for {referee}"),
                actions: Vec::new(),
            },
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            actions = notification.actions.len(),
            "notification: {}", notification.message
        );
        Ok(())
    }
}

/// Posts notifications to a Telegram chat, with action links as an inline
/// keyboard.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    fn payload(&self, notification: &Notification) -> serde_json::Value {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": notification.message,
        });
        if !notification.actions.is_empty() {
            let buttons: Vec<serde_json::Value> = notification
                .actions
                .iter()
                .map(|a| json!({ "text": a.label, "url": a.url }))
                .collect();
            body["reply_markup"] = json!({ "inline_keyboard": [buttons] });
        }
        body
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let res = self
            .client
            .post(&url)
            .json(&self.payload(notification))
            .send()
            .await
            .context("telegram request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("telegram returned {status}: {body}");
        }
        Ok(())
    }
}

pub type EventSender = mpsc::UnboundedSender<OutboundEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Delivers events until every sender is dropped.
pub async fn run_notifier(mut events: EventReceiver, notifier: Arc<dyn Notifier>, links: AdminLinks) {
    while let Some(event) = events.recv().await {
        let notification = event.render(&links);
        debug!("delivering notification: {}", notification.message);
        if let Err(e) = notifier.notify(&notification).await {
            warn!("notification failed: {e:#}");
        }
    }
    debug!("notifier stopped");
}

#[cfg(test)]
mod tests {
    use super::{AdminLinks, Notification, Notifier, OutboundEvent, TelegramNotifier, run_notifier};
    use crate::workflow::{FundingRequest, RequestKind, RequestStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn links() -> AdminLinks {
        AdminLinks {
            base_url: "https://bitfreeze.example/".into(),
            admin_token: "s3cret".into(),
        }
    }

    fn withdrawal() -> FundingRequest {
        FundingRequest::new(
            RequestKind::Withdrawal,
            "alice@example.com".into(),
            300,
            "0711".into(),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_submitted_request_has_decision_links() {
        let req = withdrawal();
        let n = OutboundEvent::RequestSubmitted(req.clone()).render(&links());

        assert!(n.message.contains("withdrawal"));
        assert!(n.message.contains("KES 300"));
        assert_eq!(2, n.actions.len());
        assert_eq!(
            format!(
                "https://bitfreeze.example/api/admin/withdrawals/{}/approve?token=s3cret",
                req.id
            ),
            n.actions[0].url
        );
        assert!(n.actions[1].url.contains("/reject?"));
    }

    #[test]
    fn test_settled_request_message() {
        let mut req = withdrawal();
        req.settle(RequestStatus::Rejected, Utc::now()).unwrap();
        let n = OutboundEvent::RequestSettled {
            request: req,
            note: Some("insufficient balance".into()),
        }
        .render(&links());

        assert_eq!(
            "withdrawal of KES 300 for alice@example.com rejected (insufficient balance)",
            n.message
        );
        assert!(n.actions.is_empty());
    }

    #[test]
    fn test_telegram_payload_keyboard() {
        let notifier = TelegramNotifier::new("token".into(), "42".into());
        let n = OutboundEvent::RequestSubmitted(withdrawal()).render(&links());
        let body = notifier.payload(&n);

        assert_eq!("42", body["chat_id"]);
        assert_eq!("Approve", body["reply_markup"]["inline_keyboard"][0][0]["text"]);

        let plain = notifier.payload(&Notification {
            message: "hi".into(),
            actions: vec![],
        });
        assert!(plain.get("reply_markup").is_none());
    }

    struct Failing {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Failing {
        async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(notification.message.clone());
            anyhow::bail!("transport down")
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_notifier() {
        let (tx, rx) = super::channel();
        let notifier = Arc::new(Failing {
            seen: Mutex::new(Vec::new()),
        });

        for referee in ["a@x.io", "b@x.io"] {
            tx.send(OutboundEvent::ReferralRewarded {
                referrer: "r@x.io".into(),
                referee: referee.into(),
                amount: 50,
            })
            .unwrap();
        }
        drop(tx);

        run_notifier(rx, notifier.clone(), links()).await;
        assert_eq!(2, notifier.seen.lock().unwrap().len());
    }
}
