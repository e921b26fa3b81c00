//! Per-topic FIFO waiting pool.
//!
//! Each topic bucket is kept sorted by a global sequence number, so the front
//! of a bucket is always its longest waiter. Requeued entries keep their
//! original sequence number and slot back into their original position.

use crate::errors::ScError;
use common::types::ParticipantId;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

/// A participant waiting for a partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEntry {
    pub participant_id: ParticipantId,
    pub topic: String,
    pub waiting_since: Instant,
    /// Global FIFO position; lower waited longer.
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct MatchQueue {
    buckets: HashMap<String, VecDeque<WaitingEntry>>,
    index: HashMap<ParticipantId, String>,
    next_seq: u64,
}

impl MatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a participant to the back of its topic bucket.
    ///
    /// # Errors
    ///
    /// Returns `ScError::DuplicateRequest` if the participant is already waiting.
    pub fn enqueue(
        &mut self,
        participant_id: ParticipantId,
        topic: String,
        now: Instant,
    ) -> Result<u64, ScError> {
        if self.index.contains_key(&participant_id) {
            return Err(ScError::DuplicateRequest(
                "Already searching for a match".to_string(),
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.index.insert(participant_id, topic.clone());
        self.buckets.entry(topic.clone()).or_default().push_back(WaitingEntry {
            participant_id,
            topic,
            waiting_since: now,
            seq,
        });
        Ok(seq)
    }

    /// Put a previously dequeued entry back at its original position.
    ///
    /// # Errors
    ///
    /// Returns `ScError::DuplicateRequest` if the participant is already waiting.
    pub fn requeue(&mut self, entry: WaitingEntry) -> Result<(), ScError> {
        if self.index.contains_key(&entry.participant_id) {
            return Err(ScError::DuplicateRequest(
                "Already searching for a match".to_string(),
            ));
        }

        self.index.insert(entry.participant_id, entry.topic.clone());
        let bucket = self.buckets.entry(entry.topic.clone()).or_default();
        let position = bucket.partition_point(|e| e.seq < entry.seq);
        bucket.insert(position, entry);
        Ok(())
    }

    /// Remove a participant's entry. No-op if it is not waiting.
    pub fn dequeue(&mut self, participant_id: ParticipantId) -> Option<WaitingEntry> {
        let topic = self.index.remove(&participant_id)?;
        let bucket = self.buckets.get_mut(&topic)?;
        let position = bucket
            .iter()
            .position(|e| e.participant_id == participant_id)?;
        let entry = bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&topic);
        }
        entry
    }

    /// Pair `newcomer` with the longest-waiting other participant on `topic`.
    ///
    /// Both entries are removed together. The pair is returned ordered by
    /// waiting position (longer waiter first).
    pub fn try_pair(
        &mut self,
        topic: &str,
        newcomer: ParticipantId,
    ) -> Option<(WaitingEntry, WaitingEntry)> {
        let bucket = self.buckets.get(topic)?;
        if !bucket.iter().any(|e| e.participant_id == newcomer) {
            return None;
        }
        let candidate = bucket
            .iter()
            .find(|e| e.participant_id != newcomer)?
            .participant_id;

        let a = self.dequeue(newcomer)?;
        let b = self.dequeue(candidate)?;
        if a.seq < b.seq {
            Some((a, b))
        } else {
            Some((b, a))
        }
    }

    #[must_use]
    pub fn contains(&self, participant_id: ParticipantId) -> bool {
        self.index.contains_key(&participant_id)
    }

    #[must_use]
    pub fn topic_of(&self, participant_id: ParticipantId) -> Option<&str> {
        self.index.get(&participant_id).map(String::as_str)
    }

    #[must_use]
    pub fn waiting_in(&self, topic: &str) -> usize {
        self.buckets.get(topic).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WaitingEntry> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }
}
