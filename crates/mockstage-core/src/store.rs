//! In-memory session store with per-session turn exclusivity.
//!
//! Session data sits under a std mutex (never held across an await), so
//! reads stay fast while a turn is streaming. A separate async mutex per
//! session serializes turns: holding its guard for the life of a stream
//! is what keeps two `send` calls from interleaving one transcript.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::sync::Arc;

use mockstage_schema::{
    EngineError, EvaluationReport, InterviewConfig, Message, Session, SessionState,
    SessionSummary,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    data: StdMutex<Session>,
    turn: Arc<AsyncMutex<()>>,
}

/// Held for the duration of one turn (stream or evaluation). Dropping it
/// releases the session for the next call.
pub struct TurnGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct SessionStore {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    idle_ttl: chrono::Duration,
}

fn lock(data: &StdMutex<Session>) -> MutexGuard<'_, Session> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new(idle_ttl: chrono::Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            idle_ttl,
        }
    }

    fn slot(&self, session_id: &str) -> Result<Arc<Slot>, EngineError> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    pub fn create(&self, config: InterviewConfig) -> Session {
        let session = Session::new(config);
        let slot = Arc::new(Slot {
            data: StdMutex::new(session.clone()),
            turn: Arc::new(AsyncMutex::new(())),
        });
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id.clone(), slot);
        session
    }

    pub fn get(&self, session_id: &str) -> Result<Session, EngineError> {
        let slot = self.slot(session_id)?;
        let session = lock(&slot.data).clone();
        Ok(session)
    }

    pub fn append(&self, session_id: &str, message: Message) -> Result<(), EngineError> {
        let slot = self.slot(session_id)?;
        let mut session = lock(&slot.data);
        if session.state == SessionState::Closed {
            return Err(EngineError::InvalidState(format!(
                "session {session_id} is closed"
            )));
        }
        session.transcript.push(message);
        session.touch();
        Ok(())
    }

    pub fn transition(&self, session_id: &str, to: SessionState) -> Result<(), EngineError> {
        let slot = self.slot(session_id)?;
        let mut session = lock(&slot.data);
        if !session.state.can_transition(to) {
            return Err(EngineError::InvalidState(format!(
                "session {session_id}: cannot transition {:?} -> {to:?}",
                session.state
            )));
        }
        session.state = to;
        session.touch();
        Ok(())
    }

    pub fn attach_report(
        &self,
        session_id: &str,
        report: EvaluationReport,
    ) -> Result<(), EngineError> {
        let slot = self.slot(session_id)?;
        let mut session = lock(&slot.data);
        if session.report.is_some() {
            return Err(EngineError::InvalidState(format!(
                "session {session_id} already has a report"
            )));
        }
        session.report = Some(report);
        session.touch();
        Ok(())
    }

    /// Acquire turn exclusivity, or fail with `SessionBusy` when another
    /// turn is in flight. Never queues behind an in-flight turn.
    pub fn begin_turn(&self, session_id: &str) -> Result<TurnGuard, EngineError> {
        let slot = self.slot(session_id)?;
        let guard = slot.turn.clone().try_lock_owned().map_err(|_| {
            EngineError::SessionBusy(format!("a turn is already in flight for {session_id}"))
        })?;
        Ok(TurnGuard { _guard: guard })
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|slot| lock(&slot.data).summary())
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    /// Evict sessions idle past the TTL. A session whose turn lock is
    /// held stays put, so the sweep never races an in-flight mutation;
    /// the victims' locks are held until removal is done.
    pub fn sweep(&self) -> usize {
        let mut victims: Vec<(String, OwnedMutexGuard<()>)> = Vec::new();
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            for (id, slot) in slots.iter() {
                let Ok(guard) = slot.turn.clone().try_lock_owned() else {
                    continue;
                };
                if lock(&slot.data).is_idle_longer_than(self.idle_ttl) {
                    victims.push((id.clone(), guard));
                }
            }
        }
        if victims.is_empty() {
            return 0;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for (id, _guard) in &victims {
            slots.remove(id);
            tracing::debug!(session_id = %id, "expired idle session");
        }
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockstage_schema::{Difficulty, InterviewType};

    fn store() -> SessionStore {
        SessionStore::new(chrono::Duration::seconds(1800))
    }

    fn config() -> InterviewConfig {
        InterviewConfig {
            interview_type: InterviewType::Mixed,
            difficulty: Difficulty::Medium,
            question_count: 3,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = store();
        let session = store.create(config());
        let loaded = store.get(&session.session_id).unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.state, SessionState::Active);
        assert!(loaded.transcript.is_empty());
    }

    #[test]
    fn get_unknown_session_fails() {
        let err = store().get("int_missing00000").unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[test]
    fn append_grows_transcript_in_order() {
        let store = store();
        let id = store.create(config()).session_id;
        store.append(&id, Message::interviewer("Q1")).unwrap();
        store.append(&id, Message::candidate("A1")).unwrap();
        let session = store.get(&id).unwrap();
        assert_eq!(session.transcript.len(), 2);
        assert_eq!(session.transcript[0].content, "Q1");
        assert_eq!(session.transcript[1].content, "A1");
    }

    #[test]
    fn append_to_closed_session_fails() {
        let store = store();
        let id = store.create(config()).session_id;
        store.transition(&id, SessionState::Evaluating).unwrap();
        store.transition(&id, SessionState::Closed).unwrap();
        let err = store.append(&id, Message::candidate("late")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let store = store();
        let id = store.create(config()).session_id;
        let err = store.transition(&id, SessionState::Active).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        store.transition(&id, SessionState::Evaluating).unwrap();
        store.transition(&id, SessionState::Closed).unwrap();
        let err = store.transition(&id, SessionState::Evaluating).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn report_attaches_once() {
        let store = store();
        let id = store.create(config()).session_id;
        let report = EvaluationReport {
            overall_score: 7.0,
            correctness: 8.0,
            depth: 6.0,
            communication: 7.0,
            strengths: vec![],
            areas_to_improve: vec![],
            recommendations: vec![],
        };
        store.attach_report(&id, report.clone()).unwrap();
        assert!(store.attach_report(&id, report).is_err());
    }

    #[tokio::test]
    async fn second_turn_on_busy_session_is_rejected() {
        let store = store();
        let id = store.create(config()).session_id;
        let _held = store.begin_turn(&id).unwrap();
        let err = store.begin_turn(&id).err().unwrap();
        assert!(matches!(err, EngineError::SessionBusy(_)));
    }

    #[tokio::test]
    async fn turn_guard_release_allows_next_turn() {
        let store = store();
        let id = store.create(config()).session_id;
        let guard = store.begin_turn(&id).unwrap();
        drop(guard);
        assert!(store.begin_turn(&id).is_ok());
    }

    #[test]
    fn list_is_newest_first() {
        let store = store();
        let first = store.create(config()).session_id;
        let second = store.create(config()).session_id;
        let ids: Vec<String> = store.list().into_iter().map(|s| s.session_id).collect();
        let pos_first = ids.iter().position(|i| *i == first).unwrap();
        let pos_second = ids.iter().position(|i| *i == second).unwrap();
        assert!(pos_second <= pos_first);
    }

    #[tokio::test]
    async fn sweep_removes_idle_but_spares_busy_sessions() {
        let store = SessionStore::new(chrono::Duration::zero());
        let idle = store.create(config()).session_id;
        let busy = store.create(config()).session_id;
        let _held = store.begin_turn(&busy).unwrap();

        let removed = store.sweep();
        assert_eq!(removed, 1);
        assert!(store.get(&idle).is_err());
        assert!(store.get(&busy).is_ok());
    }

    #[test]
    fn sweep_spares_recently_active_sessions() {
        let store = store();
        let id = store.create(config()).session_id;
        assert_eq!(store.sweep(), 0);
        assert!(store.get(&id).is_ok());
    }
}
