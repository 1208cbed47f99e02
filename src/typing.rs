//! Typing presence: local debouncing and the remote typing set.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::envelope::TypingStatus;
use crate::types::SessionId;

/// Turns keystrokes into `typing-start`/`typing-stop` signals.
///
/// One `typing-start` opens a burst. Every keystroke pushes the quiet
/// deadline out; once it passes, the burst closes with `typing-stop`.
/// Sending a message closes it immediately.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl TypingDebouncer {
    /// Creates a debouncer with the given quiet period.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    /// Whether a burst is open.
    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the open burst will close, if nothing else is typed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a keystroke. Returns `Start` when it opens a burst.
    pub fn keystroke(&mut self, now: Instant) -> Option<TypingStatus> {
        let opened = self.deadline.is_none();
        self.deadline = Some(now + self.quiet_period);
        opened.then_some(TypingStatus::Start)
    }

    /// Close the burst if the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingStatus> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(TypingStatus::Stop)
            }
            _ => None,
        }
    }

    /// A message was sent: always `Stop`, and the pending deadline is dropped.
    pub fn message_sent(&mut self) -> TypingStatus {
        self.deadline = None;
        TypingStatus::Stop
    }
}

/// Remote peers currently typing, with their display names.
#[derive(Debug, Clone, Default)]
pub struct TypingTracker {
    typing: Vec<SessionId>,
    nicknames: HashMap<SessionId, String>,
}

impl TypingTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a peer's display name.
    pub fn set_nickname(&mut self, session: SessionId, nickname: String) {
        self.nicknames.insert(session, nickname);
    }

    /// Display name announced by a peer.
    pub fn nickname(&self, session: &SessionId) -> Option<&str> {
        self.nicknames.get(session).map(String::as_str)
    }

    /// Nickname, or "User " and the first four characters of the session id.
    pub fn display_name(&self, session: &SessionId) -> String {
        match self.nickname(session) {
            Some(name) => name.to_string(),
            None => format!("User {}", session.as_str().chars().take(4).collect::<String>()),
        }
    }

    /// `typing-start` from a peer. Returns true if it was not typing before.
    pub fn on_start(&mut self, session: SessionId, nickname: Option<String>) -> bool {
        if let Some(name) = nickname {
            self.nicknames.insert(session.clone(), name);
        }
        if self.typing.contains(&session) {
            return false;
        }
        self.typing.push(session);
        true
    }

    /// `typing-stop` from a peer. Returns true if it was typing.
    pub fn on_stop(&mut self, session: &SessionId) -> bool {
        let before = self.typing.len();
        self.typing.retain(|s| s != session);
        self.typing.len() != before
    }

    /// A peer left the room.
    pub fn on_peer_left(&mut self, session: &SessionId) {
        self.on_stop(session);
        self.nicknames.remove(session);
    }

    /// Peers currently typing, in the order they started.
    pub fn typing(&self) -> &[SessionId] {
        &self.typing
    }

    /// Whether `session` is typing.
    pub fn is_typing(&self, session: &SessionId) -> bool {
        self.typing.contains(session)
    }

    /// Human-readable typing line, or `None` when nobody types.
    pub fn indicator(&self) -> Option<String> {
        let names: Vec<String> = self.typing.iter().map(|s| self.display_name(s)).collect();
        match names.as_slice() {
            [] => None,
            [one] => Some(format!("{} is typing...", one)),
            [first, second] => Some(format!("{} and {} are typing...", first, second)),
            many => Some(format!("{} people are typing...", many.len())),
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.typing.clear();
        self.nicknames.clear();
    }
}
