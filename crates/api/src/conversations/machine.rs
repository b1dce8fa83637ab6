//! Conversation claim state machine
//!
//! Every transition is evaluated against a freshly loaded record and written
//! back with a versioned compare-and-swap. A lost race reloads and evaluates
//! the guard again, so the loser of a claim race sees the winner and is
//! rejected with `AlreadyClaimed`.

use std::sync::Arc;

use serde_json::json;
use supportdesk_shared::{
    Actor, Conversation, ConversationId, ConversationMode, ConversationStatus, DeskError, Role,
};
use time::OffsetDateTime;

use super::store::ConversationStore;
use crate::regions::RegionDirectory;
use crate::stream::{BroadcastHub, Cohort, StreamEvent, Targets};

/// CAS attempts before giving up with `Conflict`
pub const MAX_CAS_ATTEMPTS: usize = 5;

const MIN_RATING: i16 = 1;
const MAX_RATING: i16 = 5;
const MAX_RATING_COMMENT: usize = 2000;

/// Result of evaluating a transition against the current record
#[derive(Debug)]
enum Step {
    /// Guard passed but nothing changes
    Keep,
    Write(Conversation),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub before: Conversation,
    pub after: Conversation,
    pub changed: bool,
}

fn next_version(current: &Conversation, now: OffsetDateTime, apply: impl FnOnce(&mut Conversation)) -> Step {
    let mut next = current.clone();
    apply(&mut next);
    next.version = current.version + 1;
    next.updated_at = now;
    Step::Write(next)
}

fn claim_step(current: &Conversation, actor: &Actor, now: OffsetDateTime) -> Result<Step, DeskError> {
    if current.status == ConversationStatus::Closed {
        return Err(DeskError::InvalidTransition("conversation is closed".to_string()));
    }
    match current.staff_id {
        Some(staff_id) if staff_id != actor.user_id => Err(DeskError::AlreadyClaimed {
            conversation_id: current.id,
            staff_id,
        }),
        Some(_) if current.status == ConversationStatus::Active && current.mode == ConversationMode::Human => {
            Ok(Step::Keep)
        }
        _ => Ok(next_version(current, now, |c| {
            c.staff_id = Some(actor.user_id);
            c.status = ConversationStatus::Active;
            c.mode = ConversationMode::Human;
        })),
    }
}

fn switch_to_ai_step(current: &Conversation, actor: &Actor, now: OffsetDateTime) -> Result<Step, DeskError> {
    if current.status == ConversationStatus::Closed {
        return Err(DeskError::InvalidTransition("conversation is closed".to_string()));
    }
    if !current.is_participant(actor) {
        return Err(DeskError::Forbidden("not a participant of this conversation".to_string()));
    }
    if current.mode == ConversationMode::Ai {
        return Ok(Step::Keep);
    }
    Ok(next_version(current, now, |c| {
        c.mode = ConversationMode::Ai;
        c.staff_id = None;
        c.status = ConversationStatus::Waiting;
    }))
}

fn region_step(current: &Conversation, new_region: &str, now: OffsetDateTime) -> Step {
    if current.region == new_region {
        return Step::Keep;
    }
    next_version(current, now, |c| c.region = new_region.to_string())
}

fn rating_step(
    current: &Conversation,
    actor: &Actor,
    score: i16,
    comment: Option<&str>,
    now: OffsetDateTime,
) -> Result<Step, DeskError> {
    if actor.user_id != current.customer_id {
        return Err(DeskError::Forbidden("only the customer can rate a conversation".to_string()));
    }
    if current.status != ConversationStatus::Closed {
        return Err(DeskError::InvalidTransition("conversation is not closed".to_string()));
    }
    if current.rating_submitted_at.is_some() {
        return Err(DeskError::InvalidTransition("rating already submitted".to_string()));
    }
    Ok(next_version(current, now, |c| {
        c.rating_submitted_at = Some(now);
        c.rating_score = Some(score);
        c.rating_comment = comment.map(str::to_string);
    }))
}

#[derive(Clone)]
pub struct ConversationMachine {
    store: Arc<dyn ConversationStore>,
    hub: BroadcastHub,
    regions: Arc<RegionDirectory>,
}

impl ConversationMachine {
    pub fn new(store: Arc<dyn ConversationStore>, hub: BroadcastHub, regions: Arc<RegionDirectory>) -> Self {
        Self { store, hub, regions }
    }

    async fn load(&self, id: ConversationId) -> Result<Conversation, DeskError> {
        self.store
            .load_conversation(id)
            .await?
            .ok_or(DeskError::ConversationNotFound(id))
    }

    async fn transition<F>(&self, id: ConversationId, mut step: F) -> Result<Transition, DeskError>
    where
        F: FnMut(&Conversation) -> Result<Step, DeskError>,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load(id).await?;
            match step(&current)? {
                Step::Keep => {
                    return Ok(Transition {
                        before: current.clone(),
                        after: current,
                        changed: false,
                    })
                }
                Step::Write(next) => {
                    if self.store.save_conversation(&next, current.version).await? {
                        return Ok(Transition {
                            before: current,
                            after: next,
                            changed: true,
                        });
                    }
                    tracing::debug!(
                        conversation_id = %id,
                        attempt,
                        expected_version = current.version,
                        "Conversation changed underneath, retrying"
                    );
                }
            }
        }

        tracing::warn!(conversation_id = %id, attempts = MAX_CAS_ATTEMPTS, "Giving up on contended conversation");
        Err(DeskError::Conflict(format!("conversation {id} is being modified concurrently")))
    }

    /// Side effects run after the write is committed; a failed system
    /// message is logged, not returned.
    async fn system_message(&self, conversation: &Conversation, content: &str, metadata: serde_json::Value) {
        if let Err(e) = self.store.append_system_message(conversation.id, content, metadata).await {
            tracing::error!(
                conversation_id = %conversation.id,
                error = %e,
                "Failed to append system message"
            );
        }
    }

    async fn publish_to_customer_and_staff(&self, conversation: &Conversation, event: StreamEvent) {
        self.hub.publish(&event, &Targets::user(conversation.customer_id)).await;
        self.hub.publish(&event, &Targets::Cohort(Cohort::Staff)).await;
    }

    /// Staff takes over a waiting conversation.
    pub async fn claim(&self, id: ConversationId, actor: Actor) -> Result<Conversation, DeskError> {
        if !actor.role.is_staff() {
            return Err(DeskError::Forbidden("only staff can claim conversations".to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let transition = self.transition(id, |current| claim_step(current, &actor, now)).await?;
        let conversation = transition.after;

        if transition.changed {
            tracing::info!(
                conversation_id = %id,
                staff_id = %actor.user_id,
                version = conversation.version,
                "Conversation claimed"
            );
            self.system_message(
                &conversation,
                "A support agent has joined the conversation",
                json!({ "event": "staff_joined", "staff_id": actor.user_id }),
            )
            .await;
            self.publish_to_customer_and_staff(&conversation, StreamEvent::conversation_claimed(&conversation))
                .await;
        }

        Ok(conversation)
    }

    /// Hand a human conversation back to the AI assistant.
    pub async fn switch_to_ai(&self, id: ConversationId, actor: Actor) -> Result<Conversation, DeskError> {
        let now = OffsetDateTime::now_utc();
        let transition = self.transition(id, |current| switch_to_ai_step(current, &actor, now)).await?;
        let conversation = transition.after;

        if transition.changed {
            tracing::info!(
                conversation_id = %id,
                actor_id = %actor.user_id,
                previous_staff = ?transition.before.staff_id,
                "Conversation switched to AI"
            );
            self.system_message(
                &conversation,
                "The conversation was handed back to the AI assistant",
                json!({ "event": "switched_to_ai", "actor_id": actor.user_id }),
            )
            .await;
            self.publish_to_customer_and_staff(&conversation, StreamEvent::conversation_updated(&conversation))
                .await;
        }

        Ok(conversation)
    }

    /// Admin moves a conversation to another region.
    pub async fn reassign_region(
        &self,
        id: ConversationId,
        actor: Actor,
        new_region: &str,
        reason: Option<&str>,
    ) -> Result<Conversation, DeskError> {
        if actor.role != Role::Admin {
            return Err(DeskError::Forbidden("only admins can reassign regions".to_string()));
        }
        self.regions.group_id_for(new_region)?;

        let now = OffsetDateTime::now_utc();
        let transition = self
            .transition(id, |current| Ok(region_step(current, new_region, now)))
            .await?;
        let conversation = transition.after;

        if transition.changed {
            let previous = transition.before.region.as_str();
            tracing::info!(
                conversation_id = %id,
                from = previous,
                to = new_region,
                admin_id = %actor.user_id,
                "Conversation region reassigned"
            );

            let mut content = format!("Conversation moved from {previous} to {new_region}");
            if let Some(reason) = reason {
                content.push_str(&format!(". Reason: {reason}"));
            }
            self.system_message(
                &conversation,
                &content,
                json!({
                    "event": "region_changed",
                    "from": previous,
                    "to": new_region,
                    "reason": reason,
                    "admin_id": actor.user_id,
                }),
            )
            .await;
            self.hub
                .publish(
                    &StreamEvent::region_changed(&conversation, previous, reason),
                    &Targets::Cohort(Cohort::Staff),
                )
                .await;
        }

        Ok(conversation)
    }

    /// Move the actor's read cursor and push their new unread total.
    pub async fn mark_read(&self, id: ConversationId, actor: Actor) -> Result<i64, DeskError> {
        let conversation = self.load(id).await?;
        if !conversation.is_participant(&actor) {
            return Err(DeskError::Forbidden("not a participant of this conversation".to_string()));
        }
        if conversation.status != ConversationStatus::Active {
            return Err(DeskError::InvalidTransition(format!(
                "conversation is {}, only active conversations can be marked read",
                conversation.status.as_str()
            )));
        }

        let read_at = OffsetDateTime::now_utc();
        self.store.mark_read(id, actor.user_id, read_at).await?;
        let unread = self.store.unread_count(actor.user_id).await?;

        self.hub
            .publish(
                &StreamEvent::unread_count(id, actor.user_id, unread, read_at),
                &Targets::user(actor.user_id),
            )
            .await;

        Ok(unread)
    }

    /// Customer rates a closed conversation, once.
    pub async fn submit_rating(
        &self,
        id: ConversationId,
        actor: Actor,
        score: i16,
        comment: Option<&str>,
    ) -> Result<Conversation, DeskError> {
        if !(MIN_RATING..=MAX_RATING).contains(&score) {
            return Err(DeskError::Validation(format!(
                "score must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if comment.map_or(false, |c| c.chars().count() > MAX_RATING_COMMENT) {
            return Err(DeskError::Validation(format!(
                "comment is longer than {MAX_RATING_COMMENT} characters"
            )));
        }

        let now = OffsetDateTime::now_utc();
        let transition = self
            .transition(id, |current| rating_step(current, &actor, score, comment, now))
            .await?;
        let conversation = transition.after;

        tracing::info!(conversation_id = %id, score, "Conversation rated");
        self.hub
            .publish(
                &StreamEvent::conversation_updated(&conversation),
                &Targets::Cohort(Cohort::Staff),
            )
            .await;

        Ok(conversation)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::conversations::memory::MemoryConversationStore;
    use crate::stream::{EventKind, HubConfig, HubFrame};
    use supportdesk_shared::{Region, GroupId, UserId};
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryConversationStore>,
        hub: BroadcastHub,
        machine: ConversationMachine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryConversationStore::new());
        let hub = BroadcastHub::new(HubConfig::default());
        let regions = RegionDirectory::new([
            Region { code: "asia-pacific".into(), backend_group_id: GroupId(1) },
            Region { code: "europe-zone-1".into(), backend_group_id: GroupId(2) },
        ])
        .unwrap();
        let machine = ConversationMachine::new(store.clone(), hub.clone(), Arc::new(regions));
        Fixture { store, hub, machine }
    }

    fn staff() -> Actor {
        Actor::new(UserId::new(), Role::Staff)
    }

    async fn waiting_conversation(fx: &Fixture) -> Conversation {
        let conversation = Conversation::new(UserId::new(), "asia-pacific");
        fx.store.insert_conversation(&conversation).await.unwrap();
        conversation
    }

    fn drain(rx: &mut mpsc::Receiver<HubFrame>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let HubFrame::Event(event) = frame {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_claim_then_second_agent_rejected() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let (s1, s2) = (staff(), staff());

        let claimed = fx.machine.claim(conversation.id, s1).await.unwrap();
        assert_eq!(claimed.staff_id, Some(s1.user_id));
        assert_eq!(claimed.status, ConversationStatus::Active);
        assert_eq!(claimed.mode, ConversationMode::Human);

        match fx.machine.claim(conversation.id, s2).await {
            Err(DeskError::AlreadyClaimed { staff_id, .. }) => assert_eq!(staff_id, s1.user_id),
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }

        let stored = fx.store.load_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(stored.staff_id, Some(s1.user_id));
        assert_eq!(fx.store.system_messages(conversation.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_by_same_agent_is_noop() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let s1 = staff();

        let first = fx.machine.claim(conversation.id, s1).await.unwrap();
        let again = fx.machine.claim(conversation.id, s1).await.unwrap();

        assert_eq!(first.version, again.version);
        assert_eq!(fx.store.system_messages(conversation.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_customer_cannot_claim() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let customer = Actor::new(conversation.customer_id, Role::Customer);

        assert!(matches!(
            fx.machine.claim(conversation.id, customer).await,
            Err(DeskError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_conversation_cannot_be_claimed() {
        let fx = fixture();
        let mut conversation = Conversation::new(UserId::new(), "asia-pacific");
        conversation.status = ConversationStatus::Closed;
        fx.store.insert_conversation(&conversation).await.unwrap();

        assert!(matches!(
            fx.machine.claim(conversation.id, staff()).await,
            Err(DeskError::InvalidTransition(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;

        let contenders: Vec<Actor> = (0..16).map(|_| staff()).collect();
        let handles: Vec<_> = contenders
            .iter()
            .map(|actor| {
                let machine = fx.machine.clone();
                let actor = *actor;
                tokio::spawn(async move { machine.claim(conversation.id, actor).await })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(claimed) => winners.push(claimed.staff_id),
                Err(DeskError::AlreadyClaimed { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = fx.store.load_conversation(conversation.id).await.unwrap().unwrap();
        assert_eq!(stored.staff_id, winners[0]);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_claim_broadcasts_to_customer_and_staff() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;

        let (customer_tx, mut customer_rx) = fx.hub.channel();
        fx.hub.register(conversation.customer_id, Role::Customer, customer_tx).await;
        let watcher = staff();
        let (staff_tx, mut staff_rx) = fx.hub.channel();
        fx.hub.register(watcher.user_id, Role::Staff, staff_tx).await;

        fx.machine.claim(conversation.id, staff()).await.unwrap();

        let customer_events = drain(&mut customer_rx);
        assert!(customer_events.iter().any(|e| e.kind == EventKind::ConversationClaimed));
        let staff_events = drain(&mut staff_rx);
        assert!(staff_events.iter().any(|e| e.kind == EventKind::ConversationClaimed));
    }

    #[tokio::test]
    async fn test_switch_to_ai_clears_staff_and_allows_reclaim() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let (s1, s2) = (staff(), staff());
        fx.machine.claim(conversation.id, s1).await.unwrap();

        let switched = fx.machine.switch_to_ai(conversation.id, s1).await.unwrap();
        assert_eq!(switched.mode, ConversationMode::Ai);
        assert_eq!(switched.staff_id, None);
        assert_eq!(switched.status, ConversationStatus::Waiting);

        let reclaimed = fx.machine.claim(conversation.id, s2).await.unwrap();
        assert_eq!(reclaimed.staff_id, Some(s2.user_id));
    }

    #[tokio::test]
    async fn test_outsider_cannot_switch_to_ai() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let stranger = Actor::new(UserId::new(), Role::Customer);

        assert!(matches!(
            fx.machine.switch_to_ai(conversation.id, stranger).await,
            Err(DeskError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_region_reassignment() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let admin = Actor::new(UserId::new(), Role::Admin);

        let (staff_tx, mut staff_rx) = fx.hub.channel();
        fx.hub.register(UserId::new(), Role::Staff, staff_tx).await;

        let moved = fx
            .machine
            .reassign_region(conversation.id, admin, "europe-zone-1", Some("customer relocated"))
            .await
            .unwrap();
        assert_eq!(moved.region, "europe-zone-1");

        let messages = fx.store.system_messages(conversation.id).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0.contains("asia-pacific"));
        assert!(messages[0].0.contains("europe-zone-1"));
        assert!(messages[0].0.contains("customer relocated"));

        let events = drain(&mut staff_rx);
        let changed = events
            .iter()
            .find(|e| e.kind == EventKind::ConversationRegionChanged)
            .unwrap();
        assert_eq!(changed.data["previous_region"], "asia-pacific");
        assert_eq!(changed.data["region"], "europe-zone-1");
    }

    #[tokio::test]
    async fn test_region_reassignment_guards() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let admin = Actor::new(UserId::new(), Role::Admin);

        assert!(matches!(
            fx.machine.reassign_region(conversation.id, staff(), "europe-zone-1", None).await,
            Err(DeskError::Forbidden(_))
        ));
        assert!(matches!(
            fx.machine.reassign_region(conversation.id, admin, "mars", None).await,
            Err(DeskError::UnknownRegion(_))
        ));

        let same = fx
            .machine
            .reassign_region(conversation.id, admin, "asia-pacific", None)
            .await
            .unwrap();
        assert_eq!(same.version, conversation.version);
        assert!(fx.store.system_messages(conversation.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_pushes_unread_count() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let customer = Actor::new(conversation.customer_id, Role::Customer);
        fx.machine.claim(conversation.id, staff()).await.unwrap();
        let (tx, mut rx) = fx.hub.channel();
        fx.hub.register(customer.user_id, Role::Customer, tx).await;

        let unread = fx.machine.mark_read(conversation.id, customer).await.unwrap();
        assert_eq!(unread, 0);

        let events = drain(&mut rx);
        let update = events
            .iter()
            .find(|e| e.kind == EventKind::UnreadCountUpdated)
            .unwrap();
        assert_eq!(update.data["unread_count"], 0);

        let stranger = Actor::new(UserId::new(), Role::Customer);
        assert!(matches!(
            fx.machine.mark_read(conversation.id, stranger).await,
            Err(DeskError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_requires_active_conversation() {
        let fx = fixture();
        let conversation = waiting_conversation(&fx).await;
        let customer = Actor::new(conversation.customer_id, Role::Customer);

        assert!(matches!(
            fx.machine.mark_read(conversation.id, customer).await,
            Err(DeskError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_repeated_unread_count_still_reaches_client() {
        let fx = fixture();
        let agent = staff();
        let customer_id = UserId::new();
        let customer = Actor::new(customer_id, Role::Customer);

        let first = Conversation::new(customer_id, "asia-pacific");
        let second = Conversation::new(customer_id, "asia-pacific");
        for conversation in [&first, &second] {
            fx.store.insert_conversation(conversation).await.unwrap();
            fx.machine.claim(conversation.id, agent).await.unwrap();
        }
        fx.store.append_message(second.id, agent.user_id, "Any update?").await.unwrap();

        let (tx, mut rx) = fx.hub.channel();
        fx.hub.register(customer_id, Role::Customer, tx).await;

        let mut returned = Vec::new();
        returned.push(fx.machine.mark_read(first.id, customer).await.unwrap());
        returned.push(fx.machine.mark_read(second.id, customer).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        fx.store.append_message(second.id, agent.user_id, "Still there?").await.unwrap();
        returned.push(fx.machine.mark_read(first.id, customer).await.unwrap());
        assert_eq!(returned, vec![1, 0, 1]);

        let seen: Vec<i64> = drain(&mut rx)
            .iter()
            .filter(|e| e.kind == EventKind::UnreadCountUpdated)
            .map(|e| e.data["unread_count"].as_i64().unwrap())
            .collect();
        assert_eq!(seen, vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_rating_only_once_after_close() {
        let fx = fixture();
        let mut conversation = Conversation::new(UserId::new(), "asia-pacific");
        let customer = Actor::new(conversation.customer_id, Role::Customer);
        fx.store.insert_conversation(&conversation).await.unwrap();

        assert!(matches!(
            fx.machine.submit_rating(conversation.id, customer, 5, None).await,
            Err(DeskError::InvalidTransition(_))
        ));

        conversation.status = ConversationStatus::Closed;
        conversation.version = 1;
        assert!(fx.store.save_conversation(&conversation, 0).await.unwrap());

        assert!(matches!(
            fx.machine.submit_rating(conversation.id, customer, 9, None).await,
            Err(DeskError::Validation(_))
        ));

        let rated = fx
            .machine
            .submit_rating(conversation.id, customer, 4, Some("quick help"))
            .await
            .unwrap();
        assert_eq!(rated.rating_score, Some(4));
        assert!(rated.rating_submitted_at.is_some());

        assert!(matches!(
            fx.machine.submit_rating(conversation.id, customer, 5, None).await,
            Err(DeskError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let fx = fixture();
        assert!(matches!(
            fx.machine.claim(ConversationId::new(), staff()).await,
            Err(DeskError::ConversationNotFound(_))
        ));
    }
}
