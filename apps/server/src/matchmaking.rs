//! Waiting pool and pairing table for a single room type.

use chrono::{DateTime, Utc};
use shared_proto::signaling::Response;
use shared_proto::{is_initiator, CallState, ConnId};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub initiator: ConnId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Pairing {
    pub id: Uuid,
    pub members: [ConnId; 2],
    replies: [Reply; 2],
    pub created_at: DateTime<Utc>,
    pub call: Option<ActiveCall>,
}

impl Pairing {
    fn new(a: ConnId, b: ConnId) -> Self {
        Self {
            id: Uuid::new_v4(),
            members: [a, b],
            replies: [Reply::Pending, Reply::Pending],
            created_at: Utc::now(),
            call: None,
        }
    }

    fn slot(&self, conn: &ConnId) -> Option<usize> {
        self.members.iter().position(|member| member == conn)
    }

    pub fn peer_of(&self, conn: &ConnId) -> Option<&ConnId> {
        self.slot(conn).map(|slot| &self.members[1 - slot])
    }

    pub fn reply_of(&self, conn: &ConnId) -> Option<Reply> {
        self.slot(conn).map(|slot| self.replies[slot])
    }

    pub fn is_active(&self) -> bool {
        self.call.is_some()
    }

    pub fn pending_members(&self) -> Vec<ConnId> {
        self.members
            .iter()
            .zip(self.replies.iter())
            .filter(|(_, reply)| **reply == Reply::Pending)
            .map(|(member, _)| member.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("participant is already waiting")]
    AlreadyWaiting,
    #[error("participant is already paired")]
    AlreadyPaired,
    #[error("unknown pairing")]
    UnknownPairing,
    #[error("participant is not a member of the pairing")]
    NotMember,
    #[error("participant already responded")]
    AlreadyResponded,
    #[error("pairing is already an active call")]
    AlreadyActive,
}

#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// Responder accepted, counterpart has not yet.
    AwaitingPeer { peer: ConnId },
    /// Both accepted; the pairing is now an active call.
    Activated(Pairing),
    /// Responder skipped; the pairing has been removed.
    Declined(Pairing),
}

#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: VecDeque<ConnId>,
    pairings: HashMap<Uuid, Pairing>,
    member_of: HashMap<ConnId, Uuid>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, conn: ConnId) -> Result<(), QueueError> {
        if self.member_of.contains_key(&conn) {
            return Err(QueueError::AlreadyPaired);
        }
        if self.waiting.contains(&conn) {
            return Err(QueueError::AlreadyWaiting);
        }
        self.waiting.push_back(conn);
        Ok(())
    }

    /// Forms a pairing from the two longest-waiting entries, if there are two.
    pub fn pair_next(&mut self) -> Option<Pairing> {
        if self.waiting.len() < 2 {
            return None;
        }
        let a = self.waiting.pop_front()?;
        let b = self.waiting.pop_front()?;
        debug_assert_ne!(a, b, "waiting pool holds each participant once");

        let pairing = Pairing::new(a, b);
        for member in &pairing.members {
            self.member_of.insert(member.clone(), pairing.id);
        }
        self.pairings.insert(pairing.id, pairing.clone());
        Some(pairing)
    }

    pub fn respond(
        &mut self,
        pairing_id: Uuid,
        conn: &ConnId,
        response: Response,
    ) -> Result<ResponseOutcome, QueueError> {
        let pairing = self
            .pairings
            .get_mut(&pairing_id)
            .ok_or(QueueError::UnknownPairing)?;
        let slot = pairing.slot(conn).ok_or(QueueError::NotMember)?;
        if pairing.is_active() {
            return Err(QueueError::AlreadyActive);
        }
        if pairing.replies[slot] != Reply::Pending {
            return Err(QueueError::AlreadyResponded);
        }

        match response {
            Response::Skip => {
                pairing.replies[slot] = Reply::Declined;
                let pairing = self
                    .remove_pairing(pairing_id)
                    .ok_or(QueueError::UnknownPairing)?;
                Ok(ResponseOutcome::Declined(pairing))
            }
            Response::Connect => {
                pairing.replies[slot] = Reply::Accepted;
                if pairing.replies[1 - slot] == Reply::Accepted {
                    let [a, b] = &pairing.members;
                    let initiator = if is_initiator(a, b) { a.clone() } else { b.clone() };
                    pairing.call = Some(ActiveCall {
                        initiator,
                        started_at: Utc::now(),
                    });
                    Ok(ResponseOutcome::Activated(pairing.clone()))
                } else {
                    Ok(ResponseOutcome::AwaitingPeer {
                        peer: pairing.members[1 - slot].clone(),
                    })
                }
            }
        }
    }

    pub fn remove_waiting(&mut self, conn: &ConnId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|waiting| waiting != conn);
        self.waiting.len() != before
    }

    /// Tears down whatever pairing `conn` belongs to.
    pub fn dissolve(&mut self, conn: &ConnId) -> Option<Pairing> {
        let pairing_id = *self.member_of.get(conn)?;
        self.remove_pairing(pairing_id)
    }

    pub fn remove_pairing(&mut self, pairing_id: Uuid) -> Option<Pairing> {
        let pairing = self.pairings.remove(&pairing_id)?;
        for member in &pairing.members {
            self.member_of.remove(member);
        }
        Some(pairing)
    }

    pub fn pairing(&self, pairing_id: Uuid) -> Option<&Pairing> {
        self.pairings.get(&pairing_id)
    }

    pub fn pairing_of(&self, conn: &ConnId) -> Option<&Pairing> {
        self.member_of
            .get(conn)
            .and_then(|pairing_id| self.pairings.get(pairing_id))
    }

    /// Counterpart in an active call, if `conn` is in one.
    pub fn active_peer(&self, conn: &ConnId) -> Option<&ConnId> {
        self.pairing_of(conn)
            .filter(|pairing| pairing.is_active())
            .and_then(|pairing| pairing.peer_of(conn))
    }

    pub fn state_of(&self, conn: &ConnId) -> CallState {
        if self.waiting.contains(conn) {
            return CallState::Searching;
        }
        match self.pairing_of(conn) {
            Some(pairing) if pairing.is_active() => CallState::Chatting,
            Some(pairing) => match pairing.reply_of(conn) {
                Some(Reply::Accepted) => CallState::Waiting,
                _ => CallState::Matched,
            },
            None => CallState::Idle,
        }
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn pairing_count(&self) -> usize {
        self.pairings.len()
    }

    /// Waiting entries plus pairings containing `conn`. Never above one.
    #[cfg(test)]
    pub fn memberships(&self, conn: &ConnId) -> usize {
        let waiting = self.waiting.iter().filter(|waiting| *waiting == conn).count();
        let paired = self
            .pairings
            .values()
            .filter(|pairing| pairing.slot(conn).is_some())
            .count();
        waiting + paired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnId {
        ConnId::from(id)
    }

    #[test]
    fn pairs_the_two_longest_waiting() {
        let mut queue = MatchQueue::new();
        for id in ["c-1", "c-2", "c-3"] {
            queue.enqueue(conn(id)).expect("enqueue");
        }

        let pairing = queue.pair_next().expect("pairing formed");
        assert_eq!(pairing.members, [conn("c-1"), conn("c-2")]);
        assert_eq!(queue.waiting_len(), 1);
        assert!(queue.pair_next().is_none());
        assert_eq!(queue.state_of(&conn("c-3")), CallState::Searching);
    }

    #[test]
    fn rejects_duplicate_membership() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("c-1")).expect("enqueue");
        assert_eq!(queue.enqueue(conn("c-1")), Err(QueueError::AlreadyWaiting));

        queue.enqueue(conn("c-2")).expect("enqueue");
        queue.pair_next().expect("pairing formed");
        assert_eq!(queue.enqueue(conn("c-1")), Err(QueueError::AlreadyPaired));
        assert_eq!(queue.memberships(&conn("c-1")), 1);
    }

    #[test]
    fn single_participant_is_never_paired() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("c-1")).expect("enqueue");
        let _ = queue.enqueue(conn("c-1"));

        assert!(queue.pair_next().is_none());
    }

    #[test]
    fn activates_only_after_both_accept() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("b")).expect("enqueue");
        queue.enqueue(conn("a")).expect("enqueue");
        let pairing = queue.pair_next().expect("pairing formed");

        let first = queue.respond(pairing.id, &conn("b"), Response::Connect).expect("respond");
        assert!(matches!(first, ResponseOutcome::AwaitingPeer { ref peer } if *peer == conn("a")));
        assert_eq!(queue.state_of(&conn("b")), CallState::Waiting);
        assert_eq!(queue.state_of(&conn("a")), CallState::Matched);
        assert!(queue.active_peer(&conn("b")).is_none());

        let second = queue.respond(pairing.id, &conn("a"), Response::Connect).expect("respond");
        let active = match second {
            ResponseOutcome::Activated(active) => active,
            other => panic!("expected activation, got {other:?}"),
        };
        assert_eq!(active.call.map(|call| call.initiator), Some(conn("a")));
        assert_eq!(queue.state_of(&conn("a")), CallState::Chatting);
        assert_eq!(queue.active_peer(&conn("b")), Some(&conn("a")));
    }

    #[test]
    fn double_response_is_rejected() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("a")).expect("enqueue");
        queue.enqueue(conn("b")).expect("enqueue");
        let pairing = queue.pair_next().expect("pairing formed");

        queue.respond(pairing.id, &conn("a"), Response::Connect).expect("respond");
        assert_eq!(
            queue.respond(pairing.id, &conn("a"), Response::Skip).err(),
            Some(QueueError::AlreadyResponded)
        );
        assert_eq!(
            queue.respond(pairing.id, &conn("z"), Response::Connect).err(),
            Some(QueueError::NotMember)
        );
    }

    #[test]
    fn skip_removes_the_pairing_for_both() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("a")).expect("enqueue");
        queue.enqueue(conn("b")).expect("enqueue");
        let pairing = queue.pair_next().expect("pairing formed");

        let outcome = queue.respond(pairing.id, &conn("a"), Response::Skip).expect("respond");
        assert!(matches!(outcome, ResponseOutcome::Declined(_)));
        assert!(queue.pairing_of(&conn("a")).is_none());
        assert!(queue.pairing_of(&conn("b")).is_none());
        assert_eq!(queue.state_of(&conn("b")), CallState::Idle);
        assert_eq!(queue.pairing_count(), 0);
    }

    #[test]
    fn dissolve_and_remove_waiting() {
        let mut queue = MatchQueue::new();
        queue.enqueue(conn("a")).expect("enqueue");
        queue.enqueue(conn("b")).expect("enqueue");
        queue.enqueue(conn("c")).expect("enqueue");
        queue.pair_next().expect("pairing formed");

        assert!(queue.remove_waiting(&conn("c")));
        assert!(!queue.remove_waiting(&conn("c")));

        let dissolved = queue.dissolve(&conn("b")).expect("pairing dissolved");
        assert_eq!(dissolved.peer_of(&conn("b")), Some(&conn("a")));
        assert!(queue.dissolve(&conn("a")).is_none());
    }
}
