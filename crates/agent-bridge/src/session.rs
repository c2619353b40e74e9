//! Sessions: one open logical conversation per connected agent. Sessions
//! carry the role ruleset and counters and are never persisted.

use std::collections::VecDeque;

use uuid::Uuid;

use anvil_types::{AgentId, RoleRuleset, WorkspaceId};

/// Depth of the recent-error ring buffer.
const ERROR_RING: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct SessionCounters {
    pub attempts: u64,
    pub successes: u64,
    pub errors: u64,
}

/// One remembered failure.
#[derive(Debug, Clone)]
pub struct RecentError {
    pub method: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub agent_id: AgentId,
    pub active_workspace: WorkspaceId,
    pub ruleset: RoleRuleset,
    pub counters: SessionCounters,
    recent_errors: VecDeque<RecentError>,
}

impl Session {
    pub fn new(agent_id: AgentId, ruleset: RoleRuleset) -> Self {
        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            agent_id,
            active_workspace: WorkspaceId::root(),
            ruleset,
            counters: SessionCounters::default(),
            recent_errors: VecDeque::with_capacity(ERROR_RING),
        }
    }

    pub fn record_attempt(&mut self) {
        self.counters.attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.counters.successes += 1;
    }

    pub fn record_error(&mut self, method: &str, code: &str, message: &str) {
        self.counters.errors += 1;
        if self.recent_errors.len() == ERROR_RING {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(RecentError {
            method: method.to_string(),
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &RecentError> {
        self.recent_errors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_ring_is_bounded() {
        let mut s = Session::new(AgentId::new("a"), RoleRuleset::unrestricted());
        for i in 0..40 {
            s.record_error("m", "InvalidParameter", &format!("e{i}"));
        }
        assert_eq!(s.recent_errors().count(), 16);
        assert_eq!(s.counters.errors, 40);
        assert!(s.recent_errors().next().unwrap().message.ends_with("24"));
    }
}
