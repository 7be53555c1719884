//! Chat panel state.
//!
//! Holds the conversation in memory for one signed-in user. The first entry
//! is always the system prompt, which is sent with every request but never
//! shown. One call may be outstanding at a time; while it is, sending is
//! disabled. Failures are appended as assistant-styled error entries and are
//! not sent back to the server with later turns.

use uuid::Uuid;

use crate::config::DEFAULT_SYSTEM_PROMPT;
use crate::llm::types::{ChatMessage, Role};
use crate::net::api::{ApiClientError, ChatPayload, ChatReply, ErrorKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "ru" => Some(Self::Ru),
            _ => None,
        }
    }
}

/// Inline message shown in place of a reply when a call fails.
#[must_use]
pub fn error_message(locale: Locale, kind: ErrorKind) -> &'static str {
    match (locale, kind) {
        (Locale::En, ErrorKind::InsufficientBalance) => "Not enough tokens. Top up your balance to continue.",
        (Locale::En, ErrorKind::NotFound) => "Profile not found. Please sign in again.",
        (Locale::En, ErrorKind::Validation) => "The message could not be sent. Check it and try again.",
        (Locale::En, ErrorKind::Provider) => "The AI service is unavailable right now. Please try again.",
        (Locale::En, ErrorKind::Network) => "Network error. Check your connection.",
        (Locale::En, ErrorKind::Server) => "API error. Please try again later.",
        (Locale::Ru, ErrorKind::InsufficientBalance) => "Недостаточно токенов. Пополните баланс, чтобы продолжить.",
        (Locale::Ru, ErrorKind::NotFound) => "Профиль не найден. Войдите снова.",
        (Locale::Ru, ErrorKind::Validation) => "Не удалось отправить сообщение. Проверьте его и попробуйте снова.",
        (Locale::Ru, ErrorKind::Provider) => "Сервис ИИ сейчас недоступен. Попробуйте позже.",
        (Locale::Ru, ErrorKind::Network) => "Ошибка сети. Проверьте подключение.",
        (Locale::Ru, ErrorKind::Server) => "Ошибка API. Попробуйте позже.",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Message,
    Error,
}

/// A rendered conversation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub role: Role,
    pub content: String,
    pub kind: EntryKind,
}

impl Entry {
    fn message(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), kind: EntryKind::Message }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    user_id: Uuid,
    locale: Locale,
    entries: Vec<Entry>,
    pending: Option<Uuid>,
    /// Index into [`ChatSession::visible`] of the entry to keep in view.
    scroll_anchor: Option<usize>,
    balance: Option<i64>,
}

impl ChatSession {
    #[must_use]
    pub fn new(user_id: Uuid, locale: Locale) -> Self {
        Self::with_system_prompt(user_id, locale, DEFAULT_SYSTEM_PROMPT)
    }

    #[must_use]
    pub fn with_system_prompt(user_id: Uuid, locale: Locale, system_prompt: &str) -> Self {
        Self {
            user_id,
            locale,
            entries: vec![Entry::message(Role::System, system_prompt)],
            pending: None,
            scroll_anchor: None,
            balance: None,
        }
    }

    /// Entries shown to the user: everything except the system prompt.
    pub fn visible(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.role != Role::System)
    }

    /// Conversation sent to the relay: system prompt and real turns only.
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::Message)
            .map(|e| ChatMessage { role: e.role, content: e.content.clone() })
            .collect()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the send affordance is enabled.
    #[must_use]
    pub fn can_send(&self) -> bool {
        !self.is_pending()
    }

    #[must_use]
    pub fn scroll_anchor(&self) -> Option<usize> {
        self.scroll_anchor
    }

    /// Last balance reported by the relay.
    #[must_use]
    pub fn balance(&self) -> Option<i64> {
        self.balance
    }

    /// Start a send. Returns `None` for blank input or while a call is
    /// outstanding; otherwise appends the user turn and returns the body to
    /// post.
    pub fn begin_send(&mut self, input: &str) -> Option<ChatPayload> {
        let text = input.trim();
        if text.is_empty() || self.is_pending() {
            return None;
        }
        self.entries.push(Entry::message(Role::User, text));
        self.touch_scroll();

        let request_id = Uuid::new_v4();
        self.pending = Some(request_id);
        Some(ChatPayload { user_id: self.user_id, messages: self.history(), request_id })
    }

    /// Complete the outstanding send. Returns `false` if nothing was pending.
    pub fn finish_send(&mut self, result: Result<ChatReply, ApiClientError>) -> bool {
        if self.pending.take().is_none() {
            return false;
        }
        match result {
            Ok(reply) => {
                self.balance = Some(reply.balance);
                self.entries
                    .push(Entry::message(Role::Assistant, reply.reply));
            }
            Err(err) => {
                tracing::warn!(error = %err, "chat: send failed");
                self.entries.push(Entry {
                    role: Role::Assistant,
                    content: error_message(self.locale, err.kind()).to_owned(),
                    kind: EntryKind::Error,
                });
            }
        }
        self.touch_scroll();
        true
    }

    fn touch_scroll(&mut self) {
        self.scroll_anchor = self.visible().count().checked_sub(1);
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;
