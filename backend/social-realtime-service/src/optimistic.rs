//! Optimistic state merge for client-visible counters.
//!
//! A mutation is applied locally before the server confirms it and moves
//! through `Tentative -> Committed | RolledBack`. Each pending mutation keeps
//! one snapshot of the state it was applied to; rollback restores that
//! snapshot verbatim. Mutations on the same entity stack: the second one is
//! applied to the first one's tentative state.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use uuid::Uuid;

/// Resolved outcomes remembered for `status`; older ones are forgotten.
pub const RESOLVED_HISTORY: usize = 64;

pub trait Mutation<S> {
    fn apply(&self, state: &S) -> S;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Tentative,
    Committed,
    RolledBack,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// The mutation was already superseded or resolved.
    #[error("mutation {0:?} is no longer pending")]
    NotPending(MutationId),
}

struct Pending<S, M> {
    id: MutationId,
    snapshot: S,
    mutation: M,
}

pub struct OptimisticState<S, M> {
    confirmed: S,
    current: S,
    pending: VecDeque<Pending<S, M>>,
    resolved: VecDeque<(MutationId, MutationStatus)>,
    next_id: u64,
}

impl<S, M> OptimisticState<S, M>
where
    S: Clone,
    M: Mutation<S>,
{
    pub fn new(initial: S) -> Self {
        Self {
            confirmed: initial.clone(),
            current: initial,
            pending: VecDeque::new(),
            resolved: VecDeque::new(),
            next_id: 1,
        }
    }

    /// State the UI should render.
    pub fn current(&self) -> &S {
        &self.current
    }

    /// Last server-confirmed state.
    pub fn confirmed(&self) -> &S {
        &self.confirmed
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn status(&self, id: MutationId) -> Option<MutationStatus> {
        if self.pending.iter().any(|p| p.id == id) {
            return Some(MutationStatus::Tentative);
        }
        self.resolved
            .iter()
            .find(|(resolved_id, _)| *resolved_id == id)
            .map(|(_, status)| *status)
    }

    fn resolve(&mut self, id: MutationId, status: MutationStatus) {
        if self.resolved.len() == RESOLVED_HISTORY {
            self.resolved.pop_front();
        }
        self.resolved.push_back((id, status));
    }

    pub fn apply_optimistic(&mut self, mutation: M) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;

        let snapshot = self.current.clone();
        self.current = mutation.apply(&snapshot);
        self.pending.push_back(Pending {
            id,
            snapshot,
            mutation,
        });
        id
    }

    /// Accepts the server's state for `id`. Earlier pending mutations are
    /// settled by it; later ones are re-applied on top of it. A response for
    /// a mutation that is no longer pending is stale and ignored.
    pub fn commit(&mut self, id: MutationId, server_state: S) -> Result<&S, MergeError> {
        let position = self
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(MergeError::NotPending(id))?;

        let settled: Vec<MutationId> = self.pending.drain(..=position).map(|p| p.id).collect();
        for settled_id in settled {
            self.resolve(settled_id, MutationStatus::Committed);
        }

        let mut state = server_state.clone();
        for later in self.pending.iter_mut() {
            later.snapshot = state.clone();
            state = later.mutation.apply(&state);
        }
        self.confirmed = server_state;
        self.current = state;
        Ok(&self.current)
    }

    /// Restores the state from before `id` was applied. Mutations stacked on
    /// top of it are discarded with it; their ids are returned.
    pub fn rollback(&mut self, id: MutationId) -> Result<Vec<MutationId>, MergeError> {
        let position = self
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(MergeError::NotPending(id))?;

        let mut discarded: Vec<Pending<S, M>> = self.pending.drain(position..).collect();
        let target = discarded.remove(0);
        self.current = target.snapshot;
        self.resolve(target.id, MutationStatus::RolledBack);

        let dropped: Vec<MutationId> = discarded.iter().map(|p| p.id).collect();
        for id in &dropped {
            self.resolve(*id, MutationStatus::RolledBack);
        }
        Ok(dropped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPreview {
    /// Client-generated until the server assigns the real id.
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
}

/// Like and comment state of one post as seen by the viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEngagement {
    pub post_id: Uuid,
    pub liked_by_viewer: bool,
    pub like_count: u64,
    pub comment_count: u64,
    pub comments: Vec<CommentPreview>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementMutation {
    ToggleLike,
    AddComment(CommentPreview),
    RemoveComment(Uuid),
}

impl Mutation<PostEngagement> for EngagementMutation {
    fn apply(&self, state: &PostEngagement) -> PostEngagement {
        let mut next = state.clone();
        match self {
            EngagementMutation::ToggleLike => {
                if next.liked_by_viewer {
                    next.liked_by_viewer = false;
                    next.like_count = next.like_count.saturating_sub(1);
                } else {
                    next.liked_by_viewer = true;
                    next.like_count += 1;
                }
            }
            EngagementMutation::AddComment(comment) => {
                next.comments.push(comment.clone());
                next.comment_count += 1;
            }
            EngagementMutation::RemoveComment(comment_id) => {
                let before = next.comments.len();
                next.comments.retain(|c| c.id != *comment_id);
                if next.comments.len() < before {
                    next.comment_count = next.comment_count.saturating_sub(1);
                }
            }
        }
        next
    }
}

/// Unread badges: per-conversation counts plus unread notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadBadges {
    pub conversations: HashMap<Uuid, u64>,
    pub notifications: u64,
}

impl UnreadBadges {
    pub fn total_messages(&self) -> u64 {
        self.conversations.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BadgeMutation {
    ConversationRead(Uuid),
    NotificationRead,
    AllNotificationsRead,
}

impl Mutation<UnreadBadges> for BadgeMutation {
    fn apply(&self, state: &UnreadBadges) -> UnreadBadges {
        let mut next = state.clone();
        match self {
            BadgeMutation::ConversationRead(conversation_id) => {
                if let Some(count) = next.conversations.get_mut(conversation_id) {
                    *count = 0;
                }
            }
            BadgeMutation::NotificationRead => {
                next.notifications = next.notifications.saturating_sub(1);
            }
            BadgeMutation::AllNotificationsRead => next.notifications = 0,
        }
        next
    }
}

pub type EngagementState = OptimisticState<PostEngagement, EngagementMutation>;
pub type BadgeState = OptimisticState<UnreadBadges, BadgeMutation>;

#[cfg(test)]
mod tests {
    use super::*;

    fn post(likes: u64, liked: bool) -> PostEngagement {
        PostEngagement {
            post_id: Uuid::nil(),
            liked_by_viewer: liked,
            like_count: likes,
            ..Default::default()
        }
    }

    #[test]
    fn test_rollback_restores_exact_snapshot() {
        let initial = post(10, false);
        let mut state = EngagementState::new(initial.clone());

        let id = state.apply_optimistic(EngagementMutation::ToggleLike);
        assert_eq!(state.current().like_count, 11);
        assert!(state.current().liked_by_viewer);

        state.rollback(id).unwrap();
        assert_eq!(state.current(), &initial);
        assert_eq!(state.status(id), Some(MutationStatus::RolledBack));
    }

    #[test]
    fn test_rapid_toggles_stack_and_last_response_wins() {
        let mut state = EngagementState::new(post(10, false));

        let first = state.apply_optimistic(EngagementMutation::ToggleLike);
        let second = state.apply_optimistic(EngagementMutation::ToggleLike);
        assert_eq!(state.current(), &post(10, false));

        // Server processed both toggles; its answer for the second is final.
        state.commit(second, post(10, false)).unwrap();
        assert_eq!(state.status(first), Some(MutationStatus::Committed));

        // A late response for the first toggle is stale and ignored.
        assert_eq!(
            state.commit(first, post(11, true)).unwrap_err(),
            MergeError::NotPending(first)
        );
        assert_eq!(state.current(), &post(10, false));
        assert!(!state.has_pending());
    }

    #[test]
    fn test_commit_replays_later_mutations_on_server_state() {
        let mut state = EngagementState::new(post(10, false));
        let like = state.apply_optimistic(EngagementMutation::ToggleLike);
        let comment = CommentPreview {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            text: "congrats".into(),
        };
        state.apply_optimistic(EngagementMutation::AddComment(comment.clone()));

        // Someone else liked concurrently.
        state.commit(like, post(12, true)).unwrap();
        assert_eq!(state.confirmed().like_count, 12);
        assert_eq!(state.current().like_count, 12);
        assert_eq!(state.current().comments, vec![comment]);
        assert_eq!(state.current().comment_count, 1);
    }

    #[test]
    fn test_rollback_discards_stacked_mutations() {
        let mut state = EngagementState::new(post(3, false));
        let like = state.apply_optimistic(EngagementMutation::ToggleLike);
        let unlike = state.apply_optimistic(EngagementMutation::ToggleLike);

        let dropped = state.rollback(like).unwrap();
        assert_eq!(dropped, vec![unlike]);
        assert_eq!(state.current(), &post(3, false));
        assert!(state.commit(unlike, post(3, false)).is_err());
    }

    #[test]
    fn test_badge_rollback_is_complete() {
        let conversation = Uuid::new_v4();
        let initial = UnreadBadges {
            conversations: [(conversation, 4)].into_iter().collect(),
            notifications: 2,
        };
        let mut state = BadgeState::new(initial.clone());

        state.apply_optimistic(BadgeMutation::ConversationRead(conversation));
        let all = state.apply_optimistic(BadgeMutation::AllNotificationsRead);
        assert_eq!(state.current().total_messages(), 0);
        assert_eq!(state.current().notifications, 0);

        state.rollback(all).unwrap();
        assert_eq!(state.current().notifications, 2);
        assert_eq!(state.current().total_messages(), 0);
        assert_ne!(state.current(), &initial);
    }

    #[test]
    fn test_resolved_history_is_bounded() {
        let mut state = EngagementState::new(post(0, false));
        let first = state.apply_optimistic(EngagementMutation::ToggleLike);
        state.commit(first, post(1, true)).unwrap();

        let mut last = first;
        for i in 0..RESOLVED_HISTORY as u64 {
            last = state.apply_optimistic(EngagementMutation::ToggleLike);
            state.commit(last, post(i % 2, i % 2 == 1)).unwrap();
        }

        assert_eq!(state.resolved.len(), RESOLVED_HISTORY);
        assert_eq!(state.status(first), None);
        assert_eq!(state.status(last), Some(MutationStatus::Committed));
    }
}
