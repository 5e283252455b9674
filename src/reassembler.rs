//! Turns the inbound control-channel stream into one assistant message.
//!
//! The reassembler only classifies and buffers. Deciding *when* a response is
//! complete (silence timer, terminal grace) belongs to the session, which then
//! calls [`Reassembler::take_message`].

use std::collections::HashSet;

use serde_json::Value;

use crate::error::Result;

mod clean;
mod extract;

pub use clean::clean;

/// What one inbound event did to the response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reassembly {
    /// An assistant fragment was buffered. `terminal` is set when the same
    /// event also marks the end of the response.
    Appended { terminal: bool },
    /// No text, but the event marks the end of the response.
    Terminal,
    /// Text spoken by the user, not accumulated.
    Echo,
    /// No text and no terminal marker.
    Ignored,
    /// An `event_id` that was already processed.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: String,
    sent: bool,
    seen_ids: HashSet<String>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one raw message. Fails only when the message is not JSON.
    pub fn on_event(&mut self, raw: &str) -> Result<Reassembly> {
        let event: Value = serde_json::from_str(raw)?;
        let event_type = extract::event_type(&event);

        if let Some(event_id) = event.get("event_id").and_then(Value::as_str) {
            if !self.seen_ids.insert(event_id.to_string()) {
                tracing::debug!(event_id, event_type, "Dropping redelivered event");
                return Ok(Reassembly::Duplicate);
            }
        }

        let terminal = extract::is_terminal(&event);
        let Some((shape, text)) = extract::extract_text(&event) else {
            return Ok(if terminal {
                Reassembly::Terminal
            } else {
                Reassembly::Ignored
            });
        };

        if extract::is_user_echo(&event) {
            tracing::debug!(event_type, shape, "User echo: {:?}", text);
            return Ok(Reassembly::Echo);
        }

        tracing::debug!(event_type, shape, "Fragment: {:?}", text);
        self.buffer.push_str(text);
        Ok(Reassembly::Appended { terminal })
    }

    /// Whether a buffered response is still waiting for delivery.
    pub fn has_pending(&self) -> bool {
        !self.sent && !self.buffer.is_empty()
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Hands out the cleaned response and latches delivery. Returns `None` once
    /// delivered, or when nothing survives cleaning. The buffer is cleared either way.
    pub fn take_message(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        if self.sent || raw.is_empty() {
            return None;
        }

        let message = clean(&raw);
        if message.is_empty() {
            tracing::debug!("Response was empty after cleaning: {:?}", raw);
            return None;
        }
        self.sent = true;
        Some(message)
    }

    /// Fresh state for a new session.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.sent = false;
        self.seen_ids.clear();
    }
}
