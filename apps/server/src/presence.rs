use chrono::{DateTime, Utc};
use shared_proto::{ConnId, ParticipantInfo};

#[derive(Debug, Clone)]
struct Member {
    conn: ConnId,
    info: ParticipantInfo,
    joined_at: DateTime<Utc>,
}

/// Connections currently joined to one room, in join order.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    members: Vec<Member>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the connection was already present; the stored
    /// display info is kept as-is in that case.
    pub fn join(&mut self, conn: ConnId, info: ParticipantInfo) -> bool {
        if self.contains(&conn) {
            return false;
        }
        self.members.push(Member {
            conn,
            info,
            joined_at: Utc::now(),
        });
        true
    }

    pub fn leave(&mut self, conn: &ConnId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| &member.conn != conn);
        self.members.len() != before
    }

    pub fn contains(&self, conn: &ConnId) -> bool {
        self.members.iter().any(|member| &member.conn == conn)
    }

    pub fn info(&self, conn: &ConnId) -> Option<&ParticipantInfo> {
        self.members
            .iter()
            .find(|member| &member.conn == conn)
            .map(|member| &member.info)
    }

    pub fn joined_at(&self, conn: &ConnId) -> Option<DateTime<Utc>> {
        self.members
            .iter()
            .find(|member| &member.conn == conn)
            .map(|member| member.joined_at)
    }

    /// Roster for display, ordered by join time.
    pub fn list_present(&self) -> Vec<ParticipantInfo> {
        self.members.iter().map(|member| member.info.clone()).collect()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnId> {
        self.members.iter().map(|member| &member.conn)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
