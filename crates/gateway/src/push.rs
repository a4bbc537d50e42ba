//! Web Push notifications for users whose tab is backgrounded.
//!
//! The hub only decides *who* should be notified and hands a [`PushJob`] to a
//! [`PushSink`]. Delivery runs on a separate task so the hub never waits on a
//! push service, and delivery results only come back as subscription evictions.

use std::sync::Arc;

use {
    lrcom_protocol::{DecodeError, PushSubscription},
    serde::Serialize,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::{
    error::{OpError, OpResult},
    hub::Hub,
};

/// Notification body as the service worker expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub url: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub require_interaction: bool,
}

impl PushPayload {
    fn new(title: String, body: String, tag: &str) -> Self {
        Self {
            title,
            body,
            tag: tag.to_string(),
            url: "/".to_string(),
            require_interaction: false,
        }
    }

    pub fn incoming_call(caller_name: &str) -> Self {
        Self {
            require_interaction: true,
            ..Self::new("Incoming call".into(), format!("From {caller_name}"), "lrcom-call")
        }
    }

    pub fn public_chat(app_name: &str, from_name: &str, text: &str) -> Self {
        Self::new(format!("{app_name} message"), format!("{from_name}: {text}"), "lrcom-chat")
    }

    pub fn private_message(app_name: &str, from_name: &str, text: &str) -> Self {
        Self::new(
            format!("{app_name} private message"),
            format!("{from_name}: {text}"),
            "lrcom-pm",
        )
    }
}

#[derive(Debug, Clone)]
pub struct PushJob {
    pub conn_id: String,
    pub subscription: PushSubscription,
    pub payload: PushPayload,
}

/// Receives push jobs from the hub. Must not block.
pub trait PushSink: Send + Sync {
    fn dispatch(&self, job: PushJob);
}

/// Forwards jobs to a background delivery task.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PushJob>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PushJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PushSink for ChannelSink {
    fn dispatch(&self, job: PushJob) {
        if self.tx.send(job).is_err() {
            debug!("push worker gone, dropping notification");
        }
    }
}

impl Hub {
    pub(crate) fn push_subscribe(
        &mut self,
        conn_id: &str,
        subscription: Option<PushSubscription>,
    ) -> OpResult {
        if self.push.is_none() {
            return Err(OpError::PushDisabled);
        }
        let Some(subscription) = subscription.filter(|s| !s.endpoint.is_empty()) else {
            return Err(DecodeError::BadMessage.into());
        };
        debug!(conn_id, "push subscription stored");
        self.push_subscriptions
            .insert(conn_id.to_string(), subscription);
        Ok(())
    }

    pub(crate) fn push_unsubscribe(&mut self, conn_id: &str) -> OpResult {
        self.push_subscriptions.remove(conn_id);
        Ok(())
    }

    /// Queue a notification for `conn_id` if it has a subscription.
    pub(crate) fn notify_push(&self, conn_id: &str, payload: PushPayload) {
        let (Some(sink), Some(subscription)) = (&self.push, self.push_subscriptions.get(conn_id))
        else {
            return;
        };
        sink.dispatch(PushJob {
            conn_id: conn_id.to_string(),
            subscription: subscription.clone(),
            payload,
        });
    }

    /// Drop a subscription the push service reported gone, unless the client
    /// has replaced it since.
    pub fn evict_push_subscription(&mut self, conn_id: &str, endpoint: &str) -> bool {
        let stale = self
            .push_subscriptions
            .get(conn_id)
            .is_some_and(|s| s.endpoint == endpoint);
        if stale {
            self.push_subscriptions.remove(conn_id);
            info!(conn_id, "evicted expired push subscription");
        }
        stale
    }

    pub fn has_push_subscription(&self, conn_id: &str) -> bool {
        self.push_subscriptions.contains_key(conn_id)
    }
}

// ── Delivery worker ──────────────────────────────────────────────────────────

#[cfg(feature = "push-notifications")]
mod worker {
    use std::sync::Arc;

    use {
        lrcom_config::PushConfig,
        secrecy::ExposeSecret,
        tokio::{sync::mpsc, task::JoinHandle},
        tracing::{debug, warn},
        web_push::{
            ContentEncoding, IsahcWebPushClient, SubscriptionInfo, URL_SAFE_NO_PAD,
            VapidSignature, VapidSignatureBuilder, WebPushClient, WebPushError,
            WebPushMessageBuilder,
        },
    };

    use {super::PushJob, crate::state::GatewayState};

    struct Vapid {
        private_key: String,
        subject: String,
    }

    /// Start the delivery task. Returns `None` when push is not configured.
    pub fn spawn_push_worker(
        state: Arc<GatewayState>,
        mut rx: mpsc::UnboundedReceiver<PushJob>,
        config: &PushConfig,
    ) -> anyhow::Result<Option<JoinHandle<()>>> {
        let Some(private_key) = config.vapid_private_key.as_ref().filter(|_| config.is_enabled())
        else {
            return Ok(None);
        };
        let vapid = Vapid {
            private_key: private_key.expose_secret().clone(),
            subject: config.subject.clone(),
        };
        let client = IsahcWebPushClient::new()?;

        Ok(Some(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let body = match serde_json::to_vec(&job.payload) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize push payload");
                        continue;
                    },
                };
                let endpoint = job.subscription.endpoint.clone();
                match deliver(&client, &vapid, &job, &body).await {
                    Ok(()) => debug!(conn_id = %job.conn_id, "push delivered"),
                    Err(WebPushError::EndpointNotValid | WebPushError::EndpointNotFound) => {
                        state
                            .hub
                            .lock()
                            .await
                            .evict_push_subscription(&job.conn_id, &endpoint);
                    },
                    Err(e) => warn!(conn_id = %job.conn_id, error = %e, "push delivery failed"),
                }
            }
        })))
    }

    async fn deliver(
        client: &IsahcWebPushClient,
        vapid: &Vapid,
        job: &PushJob,
        body: &[u8],
    ) -> Result<(), WebPushError> {
        let info = SubscriptionInfo::new(
            &job.subscription.endpoint,
            &job.subscription.keys.p256dh,
            &job.subscription.keys.auth,
        );
        let mut message = WebPushMessageBuilder::new(&info);
        message.set_payload(ContentEncoding::Aes128Gcm, body);
        message.set_vapid_signature(sign(vapid, &info)?);
        client.send(message.build()?).await
    }

    /// VAPID keys are the URL-safe unpadded base64 form browsers use.
    fn sign(vapid: &Vapid, info: &SubscriptionInfo) -> Result<VapidSignature, WebPushError> {
        let mut signature =
            VapidSignatureBuilder::from_base64(&vapid.private_key, URL_SAFE_NO_PAD, info)?;
        signature.add_claim("sub", vapid.subject.as_str());
        signature.build()
    }

}

#[cfg(feature = "push-notifications")]
pub use worker::spawn_push_worker;
