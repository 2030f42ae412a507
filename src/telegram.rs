//! Telegram message delivery through the Bot API `sendMessage` endpoint.

use crate::config::TelegramConfig;
use crate::gate::RateGate;
use crate::http::{GatedClient, GatewayError};
use log::debug;
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;

/// Telegram rejects messages longer than this many characters.
pub const MSG_CHAR_LIMIT: usize = 4096;
const SEND_MSG_ENDPOINT: &str = "sendMessage";
const MENTION_TEXT: &str = "@";

/// Which chat a message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// The regular updates chat (`chat_id`).
    Updates,
    /// The log chat (`log_chat_id`).
    Logs,
}

#[derive(Debug, Serialize, PartialEq)]
struct SendMessageForm {
    chat_id: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

/// Cuts `msg` down to at most `limit` characters on a char boundary.
pub fn truncate_to_char_limit(msg: &str, limit: usize) -> &str {
    match msg.char_indices().nth(limit) {
        Some((idx, _)) => &msg[..idx],
        None => msg,
    }
}

// HTML parse mode only requires `<`, `>` and `&` to be escaped.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

// No Debug: `send_path` embeds the bot secret.
#[derive(Clone)]
pub struct TelegramGateway {
    http: GatedClient,
    send_path: String,
    chat_id: i64,
    log_chat_id: i64,
}

impl TelegramGateway {
    pub const REQUIRED_METHODS: &'static [&'static str] = &["post"];

    pub fn new(cfg: &TelegramConfig, gate: Arc<RateGate>) -> Result<Self, GatewayError> {
        Ok(Self {
            http: GatedClient::new(cfg.target.clone(), gate, false)?.hide_paths(),
            send_path: format!("bot{}/{}", cfg.bot_secret, SEND_MSG_ENDPOINT),
            chat_id: cfg.chat_id,
            log_chat_id: cfg.log_chat_id,
        })
    }

    fn message_form(&self, msg: &str, dest: Destination, user_to_tag: Option<i64>) -> SendMessageForm {
        let chat_id = match dest {
            Destination::Updates => self.chat_id,
            Destination::Logs => self.log_chat_id,
        };
        match user_to_tag {
            None => SendMessageForm {
                chat_id,
                text: truncate_to_char_limit(msg, MSG_CHAR_LIMIT).to_string(),
                parse_mode: None,
            },
            Some(user) => {
                // the mention renders as "\n@", which counts against the limit
                let body = truncate_to_char_limit(msg, MSG_CHAR_LIMIT - 1 - MENTION_TEXT.len());
                SendMessageForm {
                    chat_id,
                    text: format!(
                        "{}\n<a href=\"tg://user?id={}\">{}</a>",
                        escape_html(body),
                        user,
                        MENTION_TEXT
                    ),
                    parse_mode: Some("HTML"),
                }
            }
        }
    }

    /// Sends `msg` to `dest`, optionally mentioning `user_to_tag`.
    pub async fn send_message(
        &self,
        msg: &str,
        dest: Destination,
        user_to_tag: Option<i64>,
    ) -> Result<(), GatewayError> {
        let form = self.message_form(msg, dest, user_to_tag);
        debug!("prepared telegram message for chat {} ({} chars)", form.chat_id, form.text.chars().count());
        self.http
            .send(Method::POST, &self.send_path, |req| req.form(&form))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateConfig, Target};

    fn gateway() -> TelegramGateway {
        let target = Target::new(
            "telegram",
            "https://api.telegram.org",
            10,
            RateConfig::blanket(1.0).unwrap(),
        )
        .unwrap();
        let cfg = TelegramConfig {
            bot_secret: "123:abc".into(),
            chat_id: 1,
            log_chat_id: 2,
            target: target.clone(),
        };
        TelegramGateway::new(&cfg, Arc::new(RateGate::from_targets([&target]))).unwrap()
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_char_limit("hello", 10), "hello");
        assert_eq!(truncate_to_char_limit("hello", 3), "hel");
        assert_eq!(truncate_to_char_limit("привет", 2), "пр");
        let long = "x".repeat(MSG_CHAR_LIMIT + 50);
        assert_eq!(truncate_to_char_limit(&long, MSG_CHAR_LIMIT).len(), MSG_CHAR_LIMIT);
    }

    #[test]
    fn destination_selects_chat() {
        let gw = gateway();
        assert_eq!(gw.message_form("hi", Destination::Updates, None).chat_id, 1);
        assert_eq!(gw.message_form("hi", Destination::Logs, None).chat_id, 2);
        assert_eq!(gw.send_path, "bot123:abc/sendMessage");
    }

    #[test]
    fn tagged_message_is_escaped_html() {
        let gw = gateway();
        let form = gw.message_form("a < b & c", Destination::Logs, Some(42));
        assert_eq!(form.parse_mode, Some("HTML"));
        assert_eq!(
            form.text,
            "a &lt; b &amp; c\n<a href=\"tg://user?id=42\">@</a>"
        );
    }

    #[test]
    fn tagged_message_stays_within_limit() {
        let gw = gateway();
        let long = "y".repeat(MSG_CHAR_LIMIT * 2);
        let form = gw.message_form(&long, Destination::Logs, Some(7));
        let visible = form.text.split('\n').next().unwrap().chars().count() + 1 + MENTION_TEXT.len();
        assert_eq!(visible, MSG_CHAR_LIMIT);
    }
}
