// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios driven through the full interaction pipeline with a
//! scripted model, a capturing messenger and in-memory storage.

use parley_agent::prompts::{
    CLASSIFIER_PROMPT, NOTIFICATION_PROMPT, PROMPT_CANARY, SUMMARY_PROMPT,
};
use parley_core::{
    ConversationState, DenialReason, InsertOutcome, InteractionStatus, JobKind, TicketStatus,
    TicketStore,
};
use parley_test_utils::TestHarness;
use parley_test_utils::harness::WORKSPACE_ID;
use serde_json::json;
use std::time::Duration;

const EXTRACTION_NEEDLE: &str = "reusable knowledge-base facts";

fn classification(intent: &str, confidence: f32) -> String {
    json!({
        "intent": intent,
        "confidence": confidence,
        "rationale": "scripted",
        "language": "en"
    })
    .to_string()
}

fn answer(reply: &str, confidence: f32, used: &[&str], actions: &[&str]) -> String {
    json!({
        "reply": reply,
        "confidence": confidence,
        "used_knowledge_ids": used,
        "detected_categories": ["product"],
        "needs_clarification": false,
        "suggested_actions": actions
    })
    .to_string()
}

async fn scarf_shop() -> (TestHarness, String) {
    let harness = TestHarness::builder()
        .with_knowledge("Red Scarf", "The red wool scarf costs $25.", "product")
        .build()
        .await
        .unwrap();
    let scarf = harness.knowledge_id("Red Scarf").await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("price_check", 0.95))
        .await;
    harness
        .provider
        .route(
            PROMPT_CANARY,
            answer("The red scarf is $25.", 0.93, &[scarf.as_str()], &[]),
        )
        .await;
    (harness, scarf)
}

#[tokio::test]
async fn price_question_is_answered_from_knowledge() {
    let (harness, scarf) = scarf_shop().await;

    let outcome = harness.receive("How much is the red scarf?").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::Processed);
    assert_eq!(outcome.reply.as_deref(), Some("The red scarf is $25."));
    assert!(outcome.ticket_id.is_none());
    assert_eq!(
        harness.messenger.last_text().await.as_deref(),
        Some("The red scarf is $25.")
    );

    let stored = harness.interaction(&outcome.interaction_id).await.unwrap();
    assert_eq!(stored.response.as_deref(), Some("The red scarf is $25."));
    assert_eq!(stored.meta.get("intent"), Some(&json!("price_check")));
    assert_eq!(stored.meta.get("used_knowledge_ids"), Some(&json!([scarf])));

    let sent = harness.messenger.sent_messages().await;
    assert_eq!(sent[0].reply_to_message_id.as_deref(), Some(stored.external_id.as_str()));
}

#[tokio::test]
async fn question_without_knowledge_opens_a_ticket() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("delivery_question", 0.9))
        .await;
    harness
        .provider
        .route(PROMPT_CANARY, answer("Delivery takes two days.", 0.9, &[], &[]))
        .await;

    let outcome = harness.receive("Do you deliver to Lagos?").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::NeedsReview);
    let ticket_id = outcome.ticket_id.expect("ticket opened");
    let ticket = harness.store.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);
    assert_eq!(ticket.customer_message, "Do you deliver to Lagos?");

    let notes = harness.store.notifications(WORKSPACE_ID).await;
    assert!(notes
        .iter()
        .any(|n| n.kind == "clarification_needed" && n.related_id.as_deref() == Some(ticket_id.as_str())));
    // holding messages are off by default
    assert_eq!(harness.messenger.sent_count().await, 0);
}

#[tokio::test]
async fn holding_message_is_sent_when_enabled() {
    let harness = TestHarness::builder()
        .with_config(|c| c.escalation.notify_customer = true)
        .build()
        .await
        .unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("complaint", 0.9))
        .await;
    harness
        .provider
        .route(PROMPT_CANARY, answer("Sorry about that.", 0.3, &[], &[]))
        .await;

    let outcome = harness.receive("My parcel arrived broken").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::NeedsReview);
    assert_eq!(
        harness.messenger.last_text().await,
        Some(harness.config.escalation.holding_message.clone())
    );
}

#[tokio::test]
async fn resolving_a_ticket_teaches_and_relays_the_answer() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("product_inquiry", 0.9))
        .await;
    harness
        .provider
        .route(PROMPT_CANARY, answer("Let me check.", 0.2, &[], &[]))
        .await;
    harness
        .provider
        .route(
            EXTRACTION_NEEDLE,
            json!({"items": [{
                "name": "Gift wrapping",
                "content": "Gift wrapping is available for $3.",
                "category": "service",
                "meta": {"price": "3"}
            }]})
            .to_string(),
        )
        .await;

    let outcome = harness.receive("Do you gift wrap?").await.unwrap();
    let ticket_id = outcome.ticket_id.unwrap();

    let resolution = harness
        .processor
        .resolve_ticket(&ticket_id, "Yes, gift wrapping is $3.")
        .await
        .unwrap();

    assert_eq!(resolution.ticket.status, TicketStatus::Resolved);
    assert_eq!(resolution.taught.created.len(), 1);
    assert!(harness.knowledge_id("Gift wrapping").await.is_some());
    assert_eq!(
        harness.messenger.last_text().await.as_deref(),
        Some("Yes, gift wrapping is $3.")
    );
    let interaction = harness.interaction(&outcome.interaction_id).await.unwrap();
    assert_eq!(interaction.status, InteractionStatus::Resolved);

    // a resolved ticket cannot be answered twice
    assert!(harness.processor.resolve_ticket(&ticket_id, "again").await.is_err());
}

#[tokio::test]
async fn booking_flow_creates_exactly_one_order() {
    let harness = TestHarness::builder()
        .with_knowledge(
            "Haircut",
            "Haircut appointments cost $30 and take 45 minutes.",
            "service",
        )
        .build()
        .await
        .unwrap();
    let haircut = harness.knowledge_id("Haircut").await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("appointment_request", 0.95))
        .await;
    harness
        .provider
        .route(
            PROMPT_CANARY,
            answer(
                "A haircut is $30.",
                0.92,
                &[haircut.as_str()],
                &["appointment_request"],
            ),
        )
        .await;

    let first = harness.receive("Can I book a haircut?").await.unwrap();
    assert_eq!(first.status, InteractionStatus::Processed);
    assert!(first.reply.unwrap().contains("Which service would you like to book?"));
    assert_eq!(
        harness.customer().await.unwrap().state,
        ConversationState::CollectingService
    );

    harness.receive("Haircut").await.unwrap();
    harness.receive("Friday at 3pm").await.unwrap();
    assert_eq!(
        harness.customer().await.unwrap().state,
        ConversationState::ConfirmingBooking {
            service_type: "Haircut".into(),
            preferred_time: "Friday at 3pm".into(),
        }
    );

    let chat_calls_before = harness.provider.chat_calls();
    let confirmed = harness.receive("yes").await.unwrap();
    assert_eq!(confirmed.status, InteractionStatus::Processed);
    let order = confirmed.order.expect("booking recorded");
    assert!(confirmed.reply.unwrap().contains(&order.reference));
    // "yes" is resolved by the lexicon, not the model
    assert_eq!(harness.provider.chat_calls(), chat_calls_before);

    assert_eq!(harness.store.orders(WORKSPACE_ID).await.len(), 1);
    assert_eq!(harness.customer().await.unwrap().state, ConversationState::Idle);
}

#[tokio::test]
async fn cancel_leaves_the_flow_without_an_order() {
    let harness = TestHarness::builder()
        .with_knowledge("Callback", "We call customers back within a day.", "contact")
        .build()
        .await
        .unwrap();
    let callback = harness.knowledge_id("Callback").await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("call_request", 0.95))
        .await;
    harness
        .provider
        .route(
            PROMPT_CANARY,
            answer("Happy to call you back.", 0.9, &[callback.as_str()], &["call_request"]),
        )
        .await;

    harness.receive("Can someone call me back?").await.unwrap();
    assert_eq!(
        harness.customer().await.unwrap().state,
        ConversationState::CollectingPhone
    );

    let cancelled = harness.receive("cancel").await.unwrap();
    assert_eq!(cancelled.status, InteractionStatus::Processed);
    assert!(cancelled.order.is_none());
    assert_eq!(harness.customer().await.unwrap().state, ConversationState::Idle);
    assert!(harness.store.orders(WORKSPACE_ID).await.is_empty());
}

#[tokio::test]
async fn replayed_message_is_stored_and_queued_once() {
    let harness = TestHarness::builder().build().await.unwrap();
    let message = harness.inbound("customer-1", "hello");

    let first = harness.processor.accept_inbound(message.clone()).await.unwrap();
    let second = harness.processor.accept_inbound(message).await.unwrap();

    assert!(first.is_created());
    assert!(matches!(second, InsertOutcome::Duplicate(_)));
    assert_eq!(first.id(), second.id());
    assert_eq!(harness.store.pending_jobs(JobKind::Process).await, 1);
}

#[tokio::test]
async fn processing_twice_does_not_reply_twice() {
    let (harness, _) = scarf_shop().await;
    let outcome = harness.receive("How much is the red scarf?").await.unwrap();

    let again = harness
        .processor
        .process_interaction(&outcome.interaction_id)
        .await
        .unwrap();

    assert_eq!(again.status, InteractionStatus::Processed);
    assert_eq!(harness.messenger.sent_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runs_of_one_interaction_reply_once() {
    let (harness, _) = scarf_shop().await;
    harness.provider.set_latency(Duration::from_millis(100));
    let accepted = harness
        .processor
        .accept_inbound(harness.inbound("customer-1", "How much is the red scarf?"))
        .await
        .unwrap();
    let id = accepted.id().to_string();

    let (first, second) = tokio::join!(
        harness.processor.process_interaction(&id),
        harness.processor.process_interaction(&id),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(harness.messenger.sent_count().await, 1);
    let stored = harness.interaction(&id).await.unwrap();
    assert_eq!(stored.status, InteractionStatus::Processed);
}

#[tokio::test]
async fn seller_proposal_enters_negotiation() {
    let (harness, _) = scarf_shop().await;
    let customer = harness.customer().await.unwrap();

    harness
        .processor
        .offer_proposal(&customer.id, "Red Scarf", 20.0, "usd")
        .await
        .unwrap();

    assert_eq!(harness.messenger.sent_count().await, 1);
    assert!(matches!(
        harness.customer().await.unwrap().state,
        ConversationState::AwaitingProposalResponse { ref currency, .. } if currency == "USD"
    ));
}

#[tokio::test]
async fn undelivered_proposal_leaves_the_conversation_alone() {
    let (harness, _) = scarf_shop().await;
    let customer = harness.customer().await.unwrap();
    harness.messenger.set_failing(true);

    let err = harness
        .processor
        .offer_proposal(&customer.id, "Red Scarf", 20.0, "usd")
        .await
        .unwrap_err();

    assert!(matches!(err, parley_core::ParleyError::Dispatch { .. }));
    assert_eq!(harness.customer().await.unwrap().state, ConversationState::Idle);
}

#[tokio::test]
async fn failed_delivery_marks_the_interaction_failed() {
    let (harness, _) = scarf_shop().await;
    harness.messenger.set_failing(true);

    let outcome = harness.receive("How much is the red scarf?").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::Failed);
    assert!(outcome.reply.is_none());
    let stored = harness.interaction(&outcome.interaction_id).await.unwrap();
    assert_eq!(stored.meta.get("error_kind"), Some(&json!("dispatch")));
}

#[tokio::test]
async fn paused_workspace_ignores_messages_without_model_calls() {
    let harness = TestHarness::builder()
        .with_workspace(|w| w.ai_paused = true)
        .build()
        .await
        .unwrap();

    let outcome = harness.receive("hello?").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::Ignored);
    assert_eq!(harness.provider.chat_calls(), 0);
    assert_eq!(harness.messenger.sent_count().await, 0);
    let stored = harness.interaction(&outcome.interaction_id).await.unwrap();
    assert_eq!(stored.meta.get("skip_reason"), Some(&json!("workspace_paused")));
    assert!(stored.customer_id.is_some());
}

#[tokio::test]
async fn denied_workspace_gets_the_unavailable_notice() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.provider.deny(Some(DenialReason::AiBlocked));

    let outcome = harness.receive("Is the shop open?").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::Failed);
    let notice = DenialReason::AiBlocked.customer_message();
    assert_eq!(outcome.reply.as_deref(), Some(notice));
    assert_eq!(harness.messenger.last_text().await.as_deref(), Some(notice));
    let stored = harness.interaction(&outcome.interaction_id).await.unwrap();
    assert_eq!(stored.meta.get("denial_reason"), Some(&json!("ai_blocked")));
}

#[tokio::test]
async fn greeting_is_answered_without_escalation() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness
        .provider
        .route(CLASSIFIER_PROMPT, classification("greeting", 0.98))
        .await;
    harness
        .provider
        .route(PROMPT_CANARY, answer("Hi! How can I help?", 0.4, &[], &[]))
        .await;

    let outcome = harness.receive("hey there").await.unwrap();

    assert_eq!(outcome.status, InteractionStatus::Processed);
    assert!(outcome.ticket_id.is_none());
    assert!(harness.store.tickets(WORKSPACE_ID).await.is_empty());
}

#[tokio::test]
async fn seller_updates_are_relayed_into_the_conversation() {
    let (harness, _) = scarf_shop().await;
    let outcome = harness.receive("How much is the red scarf?").await.unwrap();
    harness
        .provider
        .route(NOTIFICATION_PROMPT, "Good news, your scarf has shipped!")
        .await;

    let sent = harness
        .processor
        .handle_system_notification(&outcome.interaction_id, "order_shipped", Some("tracking 123"))
        .await
        .unwrap();

    assert_eq!(sent, "Good news, your scarf has shipped!");
    assert_eq!(harness.messenger.last_text().await.as_deref(), Some(sent.as_str()));
}

#[tokio::test]
async fn worker_drains_processing_and_profile_jobs() {
    let (harness, _) = scarf_shop().await;
    harness
        .provider
        .route(SUMMARY_PROMPT, "Interested in wool scarves.")
        .await;

    let accepted = harness
        .processor
        .accept_inbound(harness.inbound("customer-1", "How much is the red scarf?"))
        .await
        .unwrap();

    let ran = harness.worker.run_pending().await.unwrap();

    assert_eq!(ran, 2);
    let stored = harness.interaction(accepted.id()).await.unwrap();
    assert_eq!(stored.status, InteractionStatus::Processed);
    assert_eq!(
        harness.customer().await.unwrap().preference_summary.as_deref(),
        Some("Interested in wool scarves.")
    );
    assert_eq!(harness.store.pending_jobs(JobKind::Process).await, 0);
}
