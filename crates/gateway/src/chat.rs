//! Public chat, private messages and hub-authored system notices.

use std::time::Duration;

use {
    lrcom_protocol::{ChatMessage, SYSTEM_SENDER_NAME, ServerFrame},
    tracing::{debug, info},
};

use crate::{
    error::{OpError, OpResult},
    hub::{Hub, SendOptions, new_id, now_iso},
    presence::normalize_name,
    push::PushPayload,
    reliable::{DeliveryFailure, RetryPolicy},
};

/// Chat retransmits on a flat one-second cadence.
fn chat_policy() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_secs(1), 5)
}

/// Trim chat text and check it against the length and character rules.
/// Tab, newline and carriage return are allowed; other C0 controls and DEL
/// are not.
pub fn normalize_chat_text(raw: &str, max_chars: usize) -> Option<String> {
    let text = raw.trim();
    let len = text.chars().count();
    if len == 0 || len > max_chars {
        return None;
    }
    let forbidden = |c: char| {
        matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
    };
    if text.chars().any(forbidden) {
        return None;
    }
    Some(text.to_string())
}

fn delivery_failed_text(to_name: &str) -> String {
    format!("Delivery failed: {to_name} is offline or unreachable.")
}

impl Hub {
    pub(crate) fn chat_send(
        &mut self,
        conn_id: &str,
        text: Option<&str>,
        to_name: Option<&str>,
    ) -> OpResult {
        let max_chars = self.config.limits.chat_max_chars;
        let Some(text) = text.and_then(|t| normalize_chat_text(t, max_chars)) else {
            return self.reject(conn_id, OpError::BadChat);
        };
        let Some(from_name) = self.connections.get(conn_id).and_then(|c| c.name.clone()) else {
            return self.reject(conn_id, OpError::NoName);
        };

        // An unusable recipient name means the message is public.
        let name_max = self.config.limits.name_max_chars;
        match to_name.and_then(|n| normalize_name(n, name_max)) {
            Some(to_name) => self.private_chat(conn_id, &from_name, &to_name, text),
            None => {
                self.public_chat(conn_id, &from_name, text);
                Ok(())
            },
        }
    }

    fn public_chat(&mut self, conn_id: &str, from_name: &str, text: String) {
        let id = new_id();
        let message = ChatMessage {
            msg_id: id.clone(),
            id,
            at_iso: now_iso(),
            from: Some(conn_id.to_string()),
            from_name: from_name.to_string(),
            to: None,
            to_name: None,
            text,
            private: false,
        };
        let recipients = self.named_connection_ids();
        debug!(conn_id, recipients = recipients.len(), "public chat");
        let push = PushPayload::public_chat(&self.config.server.app_name, from_name, &message.text);
        self.fan_out_chat(message, &recipients);
        for recipient in recipients.iter().filter(|r| *r != conn_id) {
            self.notify_push(recipient, push.clone());
        }
    }

    fn private_chat(
        &mut self,
        conn_id: &str,
        from_name: &str,
        to_name: &str,
        text: String,
    ) -> OpResult {
        let recipient = self
            .names
            .get(to_name)
            .filter(|id| self.connections.get(*id).is_some_and(|c| c.is_named() && c.is_open()))
            .cloned();
        let Some(recipient_id) = recipient else {
            debug!(conn_id, to_name, "private message recipient not found");
            self.send(conn_id, &ServerFrame::error(OpError::PmNotFound.code()));
            self.notify_delivery_failed(conn_id, to_name);
            return Err(OpError::PmNotFound);
        };
        if recipient_id == conn_id {
            return self.reject(conn_id, OpError::PmSelf);
        }

        let id = new_id();
        let message = ChatMessage {
            msg_id: id.clone(),
            id,
            at_iso: now_iso(),
            from: Some(conn_id.to_string()),
            from_name: from_name.to_string(),
            to: Some(recipient_id.clone()),
            to_name: Some(to_name.to_string()),
            text,
            private: true,
        };
        let push =
            PushPayload::private_message(&self.config.server.app_name, from_name, &message.text);
        let opts = SendOptions::default()
            .with_msg_id(message.id.clone())
            .with_policy(chat_policy());

        self.send_with(conn_id, &ServerFrame::Chat(message.clone()), opts.clone());
        self.send_with(
            &recipient_id,
            &ServerFrame::Chat(message),
            opts.on_failure(DeliveryFailure::PrivateMessage {
                sender_id: conn_id.to_string(),
                recipient_name: to_name.to_string(),
            }),
        );
        self.notify_push(&recipient_id, push);
        debug!(conn_id, recipient = %recipient_id, "private message");
        Ok(())
    }
}

impl Hub {
    /// Hub-authored public notice to every named connection.
    pub(crate) fn broadcast_system(&mut self, text: &str) {
        let id = new_id();
        let message = ChatMessage {
            msg_id: id.clone(),
            id,
            at_iso: now_iso(),
            from: None,
            from_name: SYSTEM_SENDER_NAME.to_string(),
            to: None,
            to_name: None,
            text: text.to_string(),
            private: false,
        };
        let recipients = self.named_connection_ids();
        self.fan_out_chat(message, &recipients);
    }

    /// Tell a sender their private message to `to_name` could not be
    /// delivered.
    pub(crate) fn notify_delivery_failed(&mut self, sender_id: &str, to_name: &str) {
        if !self.is_named(sender_id) {
            return;
        }
        let id = new_id();
        let key = format!("pmfail:{id}");
        let message = ChatMessage {
            msg_id: id.clone(),
            id,
            at_iso: now_iso(),
            from: None,
            from_name: SYSTEM_SENDER_NAME.to_string(),
            to: Some(sender_id.to_string()),
            to_name: Some(to_name.to_string()),
            text: delivery_failed_text(to_name),
            private: true,
        };
        info!(conn_id = sender_id, to_name, "private message undeliverable");
        let opts = SendOptions::keyed(key)
            .with_msg_id(message.msg_id.clone())
            .with_policy(chat_policy());
        self.send_with(sender_id, &ServerFrame::Chat(message), opts);
    }

    fn named_connection_ids(&self) -> Vec<String> {
        self.connections
            .values()
            .filter(|c| c.is_named())
            .map(|c| c.conn_id.clone())
            .collect()
    }

    /// Acks are tracked per recipient, so every copy shares the message id.
    fn fan_out_chat(&mut self, message: ChatMessage, recipients: &[String]) {
        let opts = SendOptions::default()
            .with_msg_id(message.msg_id.clone())
            .with_policy(chat_policy());
        let frame = ServerFrame::Chat(message);
        for recipient in recipients {
            self.send_with(recipient, &frame, opts.clone());
        }
    }
}
