//! Ordered, deduplicated message thread for one conversation view.
//!
//! Three sources feed the thread: paged history (newest page first, then
//! older pages), refreshes of the newest window, and optimistic local sends.
//! After every mutation the entries are unique by id and sorted by
//! `created_on`, ties broken by arrival. History pages fetched backwards get
//! arrival numbers below everything already present, so they never reorder
//! newer messages.
//!
//! State sits behind a mutex that is never held across an await. A fetch
//! records the store epoch before suspending and its result is dropped if the
//! epoch moved (reload) or the store was closed in the meantime.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::clock::Clock;
use super::domain::{
    format_timestamp, parse_timestamp, Direction, HistoryPage, Message, MessageStatus,
    SendFailure, StatusDelta, ThreadSnapshot,
};
use super::error::MessagingError;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    /// Number of server messages already held, counted from the newest.
    pub offset: u64,
    /// Id of the oldest message held, for APIs that page by cursor.
    pub before: Option<String>,
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        page: &PageRequest,
    ) -> Result<HistoryPage, MessagingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOlder {
    Loaded { inserted: usize },
    /// The API reported no older page; nothing was fetched.
    Exhausted,
    /// Another older-page fetch is running; this call did nothing.
    InFlight,
}

impl LoadOlder {
    pub fn inserted(&self) -> usize {
        match self {
            LoadOlder::Loaded { inserted } => *inserted,
            LoadOlder::Exhausted | LoadOlder::InFlight => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Unchanged,
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl MergeSummary {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted => self.inserted += 1,
            Applied::Updated => self.updated += 1,
            Applied::Unchanged | Applied::Ignored => {}
        }
    }

    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

#[derive(Debug)]
struct Entry {
    message: Message,
    at: Option<DateTime<Utc>>,
    seq: i64,
    /// Optimistic send not yet confirmed by the server.
    local_only: bool,
}

#[derive(Debug)]
struct StoreState {
    conversation_id: Option<String>,
    epoch: u64,
    closed: bool,
    entries: Vec<Entry>,
    next_head_seq: i64,
    next_tail_seq: i64,
    has_more: bool,
    older_in_flight: bool,
    version: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            conversation_id: None,
            epoch: 0,
            closed: false,
            entries: Vec::new(),
            next_head_seq: -1,
            next_tail_seq: 0,
            has_more: false,
            older_in_flight: false,
            version: 0,
        }
    }

    fn reset(&mut self, conversation_id: &str) {
        self.conversation_id = Some(conversation_id.to_string());
        self.entries.clear();
        self.next_head_seq = -1;
        self.next_tail_seq = 0;
        self.has_more = false;
    }

    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.closed {
            return Err(MessagingError::Detached);
        }
        Ok(())
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), MessagingError> {
        self.ensure_open()?;
        if self.epoch != epoch {
            return Err(MessagingError::Superseded);
        }
        Ok(())
    }

    fn loaded_conversation(&self) -> Result<String, MessagingError> {
        self.conversation_id
            .clone()
            .ok_or_else(|| MessagingError::InvalidOperation("no conversation loaded".to_string()))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.message.id == id)
    }

    fn placeholder_position(&self, local_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.local_only && e.message.id == local_id)
    }

    fn server_count(&self) -> u64 {
        self.entries.iter().filter(|e| !e.local_only).count() as u64
    }

    fn newest_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.at).max()
    }

    fn push_tail(&mut self, message: Message, local_only: bool) {
        let seq = self.next_tail_seq;
        self.next_tail_seq += 1;
        self.push(message, seq, local_only);
    }

    fn push_head(&mut self, message: Message) {
        let seq = self.next_head_seq;
        self.next_head_seq -= 1;
        self.push(message, seq, false);
    }

    fn push(&mut self, message: Message, seq: i64, local_only: bool) {
        let at = parse_timestamp(&message.created_on);
        self.entries.push(Entry {
            message,
            at,
            seq,
            local_only,
        });
    }

    /// Folds a server copy of a message into the entry at `idx`.
    fn merge_into(&mut self, idx: usize, incoming: Message) -> bool {
        let entry = &mut self.entries[idx];
        let previous = &entry.message;

        let mut next = incoming;
        next.status = if entry.local_only {
            next.status
        } else {
            previous.status.merge(next.status)
        };
        if next.client_id.is_none() {
            next.client_id = previous.client_id.clone();
        }
        if next.status == MessageStatus::Failed {
            if next.error_code.is_none() {
                next.error_code = previous.error_code.clone();
            }
            if next.error_message.is_none() {
                next.error_message = previous.error_message.clone();
            }
        } else {
            next.error_code = None;
            next.error_message = None;
        }

        let changed = entry.local_only || next != entry.message;
        entry.at = parse_timestamp(&next.created_on);
        entry.message = next;
        entry.local_only = false;
        changed
    }

    fn upsert(&mut self, message: Message) -> Applied {
        if let Some(idx) = self.position(&message.id) {
            return if self.merge_into(idx, message) {
                Applied::Updated
            } else {
                Applied::Unchanged
            };
        }

        let placeholder = message
            .client_id
            .as_deref()
            .and_then(|client_id| self.placeholder_position(client_id));
        if let Some(idx) = placeholder {
            self.merge_into(idx, message);
            return Applied::Updated;
        }

        self.push_tail(message, false);
        Applied::Inserted
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.at.cmp(&b.at).then(a.seq.cmp(&b.seq)));
    }

    fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: self.entries.iter().map(|e| e.message.clone()).collect(),
            has_more: self.has_more,
            version: self.version,
        }
    }
}

/// Releases the older-page slot when a `load_older` future is dropped
/// before its fetch resolves.
struct OlderFetchGuard<'a> {
    store: &'a ConversationStore,
    epoch: u64,
    armed: bool,
}

impl Drop for OlderFetchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.store.lock();
        if state.epoch == self.epoch {
            state.older_in_flight = false;
        }
    }
}

pub struct ConversationStore {
    source: Arc<dyn HistorySource>,
    clock: Arc<dyn Clock>,
    page_size: u32,
    state: Mutex<StoreState>,
    snapshots: watch::Sender<Arc<ThreadSnapshot>>,
}

impl ConversationStore {
    pub fn new(source: Arc<dyn HistorySource>, clock: Arc<dyn Clock>) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(ThreadSnapshot::default()));
        Self {
            source,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
            state: Mutex::new(StoreState::new()),
            snapshots,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Latest published thread. Never blocks on an in-flight fetch.
    pub fn snapshot(&self) -> Arc<ThreadSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ThreadSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &mut StoreState) -> Arc<ThreadSnapshot> {
        state.sort();
        state.version += 1;
        let snapshot = Arc::new(state.snapshot());
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }

    /// Replaces the thread with the newest page of `conversation_id`.
    ///
    /// Unconfirmed sends of the same conversation are kept. Any older-page
    /// fetch still running against the previous baseline is discarded.
    pub async fn load_initial(
        &self,
        conversation_id: &str,
    ) -> Result<Arc<ThreadSnapshot>, MessagingError> {
        let epoch = {
            let mut state = self.lock();
            state.ensure_open()?;
            state.epoch += 1;
            state.older_in_flight = false;
            if state.conversation_id.as_deref() != Some(conversation_id) {
                state.reset(conversation_id);
                self.publish(&mut state);
            }
            state.epoch
        };

        let request = PageRequest {
            limit: self.page_size,
            offset: 0,
            before: None,
        };
        let result = self.source.fetch_page(conversation_id, &request).await;

        let mut state = self.lock();
        state.ensure_current(epoch)?;
        let page = result?;

        let pending: Vec<Message> = state
            .entries
            .drain(..)
            .filter(|e| e.local_only)
            .map(|e| e.message)
            .collect();
        state.reset(conversation_id);
        for message in page.data {
            state.upsert(message);
        }
        for message in pending {
            if state.position(&message.id).is_none() {
                state.push_tail(message, true);
            }
        }
        state.has_more = page.pagination.has_more;

        tracing::debug!(
            component = "messaging.store",
            conversation_id,
            loaded = state.entries.len(),
            has_more = state.has_more,
            "initial page loaded"
        );
        Ok(self.publish(&mut state))
    }

    /// Fetches the page just older than the oldest loaded message.
    ///
    /// At most one such fetch runs at a time; overlapping calls return
    /// [`LoadOlder::InFlight`] without touching the network. A failed fetch
    /// changes nothing and can simply be retried.
    pub async fn load_older(&self) -> Result<LoadOlder, MessagingError> {
        let (epoch, conversation_id, request) = {
            let mut state = self.lock();
            state.ensure_open()?;
            let conversation_id = state.loaded_conversation()?;
            if state.older_in_flight {
                tracing::debug!(component = "messaging.store", "older page already in flight");
                return Ok(LoadOlder::InFlight);
            }
            if !state.has_more {
                return Ok(LoadOlder::Exhausted);
            }
            state.older_in_flight = true;

            let request = PageRequest {
                limit: self.page_size,
                offset: state.server_count(),
                before: state
                    .entries
                    .iter()
                    .find(|e| !e.local_only)
                    .map(|e| e.message.id.clone()),
            };
            (state.epoch, conversation_id, request)
        };

        let mut guard = OlderFetchGuard {
            store: self,
            epoch,
            armed: true,
        };
        let result = self.source.fetch_page(&conversation_id, &request).await;

        let mut state = self.lock();
        guard.armed = false;
        state.ensure_current(epoch)?;
        state.older_in_flight = false;
        let page = result?;

        let mut inserted = 0;
        for message in page.data.into_iter().rev() {
            match state.position(&message.id) {
                Some(idx) => {
                    state.merge_into(idx, message);
                }
                None => {
                    state.push_head(message);
                    inserted += 1;
                }
            }
        }
        state.has_more = page.pagination.has_more;
        self.publish(&mut state);

        Ok(LoadOlder::Loaded { inserted })
    }

    /// Re-fetches the newest window and merges it into the thread.
    pub async fn refresh(&self) -> Result<MergeSummary, MessagingError> {
        let (epoch, conversation_id) = {
            let state = self.lock();
            state.ensure_open()?;
            (state.epoch, state.loaded_conversation()?)
        };

        let request = PageRequest {
            limit: self.page_size,
            offset: 0,
            before: None,
        };
        let result = self.source.fetch_page(&conversation_id, &request).await;

        let mut state = self.lock();
        state.ensure_current(epoch)?;
        let page = result?;

        let mut summary = MergeSummary::default();
        for message in page.data {
            summary.record(state.upsert(message));
        }
        if summary.changed() {
            self.publish(&mut state);
        }
        Ok(summary)
    }

    /// Adds a `sending` placeholder at the end of the thread.
    pub fn append_optimistic(
        &self,
        local_id: &str,
        body: &str,
    ) -> Result<Message, MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let conversation_id = state.loaded_conversation()?;
        if state.position(local_id).is_some() {
            return Err(MessagingError::DuplicateMessage(local_id.to_string()));
        }

        let now = self.clock.now();
        let at = state.newest_at().map_or(now, |newest| newest.max(now));
        let message = Message {
            id: local_id.to_string(),
            conversation_id,
            direction: Direction::Outbound,
            body: body.to_string(),
            status: MessageStatus::Sending,
            created_on: format_timestamp(at),
            error_code: None,
            error_message: None,
            client_id: Some(local_id.to_string()),
        };

        state.push_tail(message.clone(), true);
        self.publish(&mut state);
        Ok(message)
    }

    /// Swaps the placeholder `local_id` for the server-confirmed message.
    ///
    /// The confirmed message is placed by its server timestamp, which may
    /// move it away from the tail. Fails with `UnknownMessage` when neither
    /// the placeholder nor the server id is in the thread.
    pub fn reconcile_sent(&self, local_id: &str, server: Message) -> Result<(), MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;

        let mut confirmed = server;
        confirmed.status = MessageStatus::Sent.merge(confirmed.status);
        confirmed.client_id = Some(local_id.to_string());

        let placeholder = state.placeholder_position(local_id);
        let existing = state.position(&confirmed.id);
        match (placeholder, existing) {
            (Some(p), Some(e)) if p != e => {
                // The server copy already arrived through a refresh.
                state.merge_into(e, confirmed);
                state.entries.remove(p);
            }
            (Some(p), _) => {
                state.merge_into(p, confirmed);
            }
            (None, Some(e)) => {
                state.merge_into(e, confirmed);
            }
            (None, None) => {
                return Err(MessagingError::UnknownMessage(local_id.to_string()));
            }
        }

        self.publish(&mut state);
        Ok(())
    }

    /// Marks the placeholder `local_id` as failed. It stays in the thread.
    pub fn mark_failed(&self, local_id: &str, failure: SendFailure) -> Result<(), MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let idx = state
            .position(local_id)
            .ok_or_else(|| MessagingError::UnknownMessage(local_id.to_string()))?;
        if !state.entries[idx].local_only {
            return Err(MessagingError::InvalidOperation(format!(
                "message {local_id} was already confirmed by the server"
            )));
        }

        let message = &mut state.entries[idx].message;
        message.status = MessageStatus::Failed;
        message.error_code = failure.code;
        message.error_message = Some(failure.message);

        self.publish(&mut state);
        Ok(())
    }

    /// Puts a failed send back into `sending` so it can be posted again.
    pub fn mark_resending(&self, local_id: &str) -> Result<Message, MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let idx = Self::failed_position(&state, local_id)?;

        let message = &mut state.entries[idx].message;
        message.status = MessageStatus::Sending;
        message.error_code = None;
        message.error_message = None;
        let message = message.clone();

        self.publish(&mut state);
        Ok(message)
    }

    /// Removes a failed send the user gave up on.
    pub fn dismiss(&self, local_id: &str) -> Result<Message, MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let idx = Self::failed_position(&state, local_id)?;
        let entry = state.entries.remove(idx);
        self.publish(&mut state);
        Ok(entry.message)
    }

    fn failed_position(state: &StoreState, local_id: &str) -> Result<usize, MessagingError> {
        let idx = state
            .placeholder_position(local_id)
            .ok_or_else(|| MessagingError::UnknownMessage(local_id.to_string()))?;
        if state.entries[idx].message.status != MessageStatus::Failed {
            return Err(MessagingError::InvalidOperation(format!(
                "message {local_id} has not failed"
            )));
        }
        Ok(idx)
    }

    /// Applies a pushed or polled copy of a message. Unknown ids are inserted.
    pub fn ingest_update(&self, message: Message) -> Result<Applied, MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        if state.conversation_id.as_deref() != Some(message.conversation_id.as_str()) {
            return Ok(Applied::Ignored);
        }

        let applied = state.upsert(message);
        if matches!(applied, Applied::Inserted | Applied::Updated) {
            self.publish(&mut state);
        }
        Ok(applied)
    }

    /// Applies a status delta. Deltas for messages not in the thread are ignored.
    pub fn apply_status(&self, delta: StatusDelta) -> Result<Applied, MessagingError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let Some(idx) = state.position(&delta.id) else {
            tracing::debug!(
                component = "messaging.store",
                message_id = %delta.id,
                "status delta for unknown message ignored"
            );
            return Ok(Applied::Ignored);
        };

        let mut next = state.entries[idx].message.clone();
        next.status = next.status.merge(delta.status);
        if next.status == MessageStatus::Failed {
            next.error_code = delta.error_code.or(next.error_code);
            next.error_message = delta.error_message.or(next.error_message);
        }
        if next == state.entries[idx].message {
            return Ok(Applied::Unchanged);
        }

        tracing::debug!(
            component = "messaging.store",
            message_id = %delta.id,
            status = next.status.as_str(),
            terminal = next.status.is_terminal(),
            "status delta applied"
        );
        state.entries[idx].message = next;
        self.publish(&mut state);
        Ok(Applied::Updated)
    }

    /// Detaches the store from its view. Later results and mutations are dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.epoch += 1;
        state.older_in_flight = false;
    }
}
