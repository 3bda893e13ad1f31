//! Scroll position rules for a conversation view.
//!
//! Upward infinite scroll keeps the message at the top of the viewport in
//! place while an older page is prepended, and the view follows the tail
//! only when a new message lands there. The controller only emits
//! [`ScrollCommand`]s; applying them to real widgets is up to the UI.

use chrono::{DateTime, Utc};

use super::domain::{display_key, parse_timestamp, ThreadSnapshot};
use super::error::MessagingError;
use super::store::{ConversationStore, LoadOlder};

pub const DEFAULT_TOP_TRIGGER_PX: f64 = 48.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollPhase {
    Idle,
    LoadingOlder { anchor: Viewport },
    Settling { anchor: Viewport },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    FetchOlder,
    JumpToBottom,
    AnimateToBottom,
    SetOffset(f64),
}

/// Newest message as of the last thread change.
#[derive(Debug, Clone)]
struct TailMark {
    key: String,
    at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ScrollController {
    phase: ScrollPhase,
    top_trigger_px: f64,
    tail: Option<TailMark>,
    mounted: bool,
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollController {
    pub fn new() -> Self {
        Self {
            phase: ScrollPhase::Idle,
            top_trigger_px: DEFAULT_TOP_TRIGGER_PX,
            tail: None,
            mounted: false,
        }
    }

    pub fn with_top_trigger(mut self, px: f64) -> Self {
        self.top_trigger_px = px.max(0.0);
        self
    }

    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    /// Forgets everything about the previous thread, e.g. on conversation switch.
    pub fn reset(&mut self) {
        self.phase = ScrollPhase::Idle;
        self.tail = None;
        self.mounted = false;
    }

    pub fn on_scroll(&mut self, viewport: Viewport, has_more: bool) -> Option<ScrollCommand> {
        if viewport.scroll_top > self.top_trigger_px {
            return None;
        }
        self.request_older(viewport, has_more)
    }

    /// Idle -> LoadingOlder. Ignored while a load or a settle is running.
    pub fn request_older(&mut self, viewport: Viewport, has_more: bool) -> Option<ScrollCommand> {
        if self.phase != ScrollPhase::Idle || !has_more {
            return None;
        }
        self.phase = ScrollPhase::LoadingOlder { anchor: viewport };
        Some(ScrollCommand::FetchOlder)
    }

    /// LoadingOlder -> Settling, or straight back to Idle when nothing was added.
    pub fn older_loaded(&mut self, outcome: LoadOlder) {
        if let ScrollPhase::LoadingOlder { anchor } = self.phase {
            self.phase = if outcome.inserted() > 0 {
                ScrollPhase::Settling { anchor }
            } else {
                ScrollPhase::Idle
            };
        }
    }

    /// LoadingOlder -> Idle. The scroll position is left alone.
    pub fn older_failed(&mut self) {
        if matches!(self.phase, ScrollPhase::LoadingOlder { .. }) {
            self.phase = ScrollPhase::Idle;
        }
    }

    /// Settling -> Idle once the prepended content has been laid out.
    ///
    /// The offset moves by exactly the height that was added above the
    /// anchor, so the same message stays at the top of the viewport.
    pub fn on_layout(&mut self, viewport: Viewport) -> Option<ScrollCommand> {
        let ScrollPhase::Settling { anchor } = self.phase else {
            return None;
        };
        self.phase = ScrollPhase::Idle;
        let added = viewport.scroll_height - anchor.scroll_height;
        Some(ScrollCommand::SetOffset(anchor.scroll_top + added))
    }

    /// Scrolls to the bottom when a message was appended after the tail.
    ///
    /// Status changes and prepended history keep the tail identity and do
    /// not scroll. Neither does a tail that went away (dismissed) or moved
    /// up (reconciled to an earlier server timestamp). The first non-empty
    /// thread jumps, later arrivals animate.
    pub fn on_thread_changed(&mut self, snapshot: &ThreadSnapshot) -> Option<ScrollCommand> {
        let Some(newest) = snapshot.newest() else {
            self.tail = None;
            return None;
        };
        let key = display_key(newest);
        let at = parse_timestamp(&newest.created_on);
        let previous = self.tail.replace(TailMark {
            key: key.to_string(),
            at,
        });

        if !self.mounted {
            self.mounted = true;
            return Some(ScrollCommand::JumpToBottom);
        }

        match previous {
            Some(prev) if prev.key == key => None,
            Some(prev) => {
                let prev_still_shown = snapshot
                    .messages
                    .iter()
                    .any(|m| display_key(m) == prev.key);
                (prev_still_shown && at >= prev.at).then_some(ScrollCommand::AnimateToBottom)
            }
            None => Some(ScrollCommand::AnimateToBottom),
        }
    }

    /// Runs a full older-page cycle against `store`.
    ///
    /// Returns `Ok(None)` when the request was ignored (already loading or no
    /// more history). Fetch errors are returned after moving back to Idle.
    /// Dropping the future mid-fetch also moves back to Idle.
    pub async fn load_older(
        &mut self,
        store: &ConversationStore,
        viewport: Viewport,
    ) -> Result<Option<LoadOlder>, MessagingError> {
        let has_more = store.snapshot().has_more;
        if self.request_older(viewport, has_more).is_none() {
            return Ok(None);
        }

        let mut pending = PendingOlder {
            controller: self,
            settled: false,
        };
        let result = store.load_older().await;
        pending.settled = true;

        match result {
            Ok(outcome) => {
                pending.controller.older_loaded(outcome);
                Ok(Some(outcome))
            }
            Err(err) => {
                tracing::debug!(component = "messaging.scroll", error = %err, "older page failed");
                pending.controller.older_failed();
                Err(err)
            }
        }
    }
}

/// Returns the controller to Idle if an older-page cycle is abandoned.
struct PendingOlder<'a> {
    controller: &'a mut ScrollController,
    settled: bool,
}

impl Drop for PendingOlder<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.controller.older_failed();
        }
    }
}
