// ABOUTME: Platform-to-framework flow tests: history-first, idempotency, loopback, attachments
// ABOUTME: Exercises the incoming processor through the full adapter

mod common;

use common::start_adapter;
use serde_json::json;
use skiff_core::traits::{RawEvent, RawMessage};

#[tokio::test]
async fn test_new_conversation_bootstrap_history_first() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "U1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    // The first two framework-visible events for the conversation are
    // conversation_started (with history) then the triggering message
    let requests: Vec<serde_json::Value> = harness
        .transport
        .by_name("bot_request")
        .into_iter()
        .filter(|data| data["event_type"] != "connect")
        .collect();
    assert_eq!(requests[0]["event_type"], json!("conversation_started"));
    assert!(requests[0]["data"]["history"].is_array());
    assert_eq!(requests[1]["event_type"], json!("message_received"));
    assert_eq!(requests[1]["data"]["message_id"], json!("m1"));
    assert_eq!(requests[1]["data"]["text"], json!("hi"));
    assert_eq!(requests[1]["data"]["sender"]["user_id"], json!("U1"));

    // Both carry the same canonical conversation id, never the platform id
    let conversation_id = requests[0]["data"]["conversation_id"].as_str().unwrap();
    assert_eq!(
        requests[1]["data"]["conversation_id"].as_str().unwrap(),
        conversation_id
    );
    assert_ne!(conversation_id, "g/c");
}

#[tokio::test]
async fn test_conversation_started_inlines_platform_history() {
    let dir = tempfile::tempdir().unwrap();
    let harness = common::start_adapter_with(dir.path(), |client| {
        client.push_history_page(vec![
            RawMessage::text_message("g/c", "h1", "u2", "older", 100),
            RawMessage::text_message("g/c", "h2", "u2", "old", 200),
        ]);
    })
    .await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("conversation_started", 1)
            .await
    );

    let started = &harness.transport.bot_requests("conversation_started")[0];
    let history = started["data"]["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["message_id"], json!("h1"));
    // Backfilled messages are not re-announced as message_received
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );
    let received = harness.transport.bot_requests("message_received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["data"]["message_id"], json!("m1"));
}

#[tokio::test]
async fn test_redelivered_event_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    let message = RawMessage::text_message("g/c", "m1", "u1", "hi", 1_000);
    harness
        .client
        .push_event(RawEvent::NewMessage(message.clone()))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    harness.client.push_event(RawEvent::NewMessage(message)).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(harness.transport.bot_requests("message_received").len(), 1);
    assert_eq!(harness.transport.bot_requests("conversation_started").len(), 1);
}

#[tokio::test]
async fn test_loopback_echo_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    // Seed so the conversation exists
    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );
    let conversation_id = common::canonical_id(&harness, "g/c");

    // Framework sends, platform echoes the bot's own message back
    harness
        .adapter
        .bus()
        .enqueue_bot_response(json!({
            "request_id": "R1",
            "event_type": "send_message",
            "data": { "conversation_id": conversation_id, "text": "reply" }
        }))
        .await;
    let (event, data) = harness.transport.wait_for_request_result("R1").await.unwrap();
    assert_eq!(event, "request_success");
    let echoed_id = data["data"]["message_ids"][0].as_str().unwrap().to_string();

    let mut echo = RawMessage::text_message("g/c", &echoed_id, "mock-bot", "reply", 2_000);
    echo.from_self = true;
    harness.client.push_event(RawEvent::NewMessage(echo)).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let received = harness.transport.bot_requests("message_received");
    assert!(
        received.iter().all(|r| r["data"]["message_id"] != json!(echoed_id)),
        "echo of our own send must not become message_received"
    );
}

#[tokio::test]
async fn test_oversize_attachment_not_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    let mut message = RawMessage::text_message("g/c", "m1", "u1", "here's a file", 1_000);
    message.attachments.push(skiff_core::traits::RawAttachment {
        source_id: "big-file".to_string(),
        filename: Some("movie.mp4".to_string()),
        content_type: None,
        size: Some(20 * 1024 * 1024),
    });
    harness.client.push_event(RawEvent::NewMessage(message)).await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    let received = &harness.transport.bot_requests("message_received")[0];
    let attachment = &received["data"]["attachments"][0];
    assert_eq!(attachment["size"], json!(20 * 1024 * 1024));
    assert_eq!(attachment["processable"], json!(false));
    assert!(attachment["content"].is_null());

    // No download may occur
    assert!(harness.client.calls().iter().all(|call| {
        !matches!(call, skiff::platform::mock::RecordedCall::DownloadAttachment { .. })
    }));
}

#[tokio::test]
async fn test_attachment_downloaded_and_inlined() {
    let dir = tempfile::tempdir().unwrap();
    let harness = common::start_adapter_with(dir.path(), |client| {
        client.set_attachment_bytes("f1", b"image-bytes".to_vec());
    })
    .await;

    let mut message = RawMessage::text_message("g/c", "m1", "u1", "pic", 1_000);
    message.attachments.push(skiff_core::traits::RawAttachment {
        source_id: "f1".to_string(),
        filename: Some("photo.png".to_string()),
        content_type: None,
        size: Some(11),
    });
    harness.client.push_event(RawEvent::NewMessage(message)).await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    let received = &harness.transport.bot_requests("message_received")[0];
    let attachment = &received["data"]["attachments"][0];
    assert_eq!(attachment["attachment_type"], json!("image"));
    assert_eq!(attachment["processable"], json!(true));
    assert_eq!(
        attachment["content"].as_str().unwrap(),
        skiff_core::attachments::encode_base64(b"image-bytes")
    );
}

#[tokio::test]
async fn test_edit_becomes_message_updated() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    let mut edit = RawMessage::text_message("g/c", "m1", "u1", "hi, edited", 1_000);
    edit.edit_timestamp_ms = Some(2_000);
    harness.client.push_event(RawEvent::EditedMessage(edit)).await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_updated", 1)
            .await
    );

    let updated = &harness.transport.bot_requests("message_updated")[0];
    assert_eq!(updated["data"]["new_text"], json!("hi, edited"));
    assert_eq!(updated["data"]["message_id"], json!("m1"));
    assert_eq!(updated["data"]["timestamp"], json!(2_000));
}

#[tokio::test]
async fn test_reaction_change_standardizes_emoji() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    harness
        .client
        .push_event(RawEvent::ReactionChange {
            platform_conversation_id: "g/c".to_string(),
            message_id: "m1".to_string(),
            user_id: Some("u2".to_string()),
            added: vec!["👍".to_string()],
            removed: vec![],
        })
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("reaction_added", 1)
            .await
    );

    let reaction = &harness.transport.bot_requests("reaction_added")[0];
    assert_eq!(reaction["data"]["emoji"], json!("+1"));
    assert_eq!(reaction["data"]["message_id"], json!("m1"));
}

#[tokio::test]
async fn test_pin_and_delete_events() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    harness
        .client
        .push_event(RawEvent::PinChange {
            platform_conversation_id: "g/c".to_string(),
            message_id: "m1".to_string(),
            pinned: true,
        })
        .await;
    assert!(harness.transport.wait_for_bot_request("message_pinned", 1).await);

    harness
        .client
        .push_event(RawEvent::DeletedMessages {
            platform_conversation_id: "g/c".to_string(),
            message_ids: vec!["m1".to_string()],
        })
        .await;
    assert!(harness.transport.wait_for_bot_request("message_deleted", 1).await);

    let deleted = &harness.transport.bot_requests("message_deleted")[0];
    assert_eq!(deleted["data"]["message_id"], json!("m1"));
}

#[tokio::test]
async fn test_rename_becomes_conversation_updated() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    harness
        .client
        .push_event(RawEvent::NewMessage(RawMessage::text_message(
            "g/c", "m1", "u1", "hi", 1_000,
        )))
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    harness
        .client
        .push_event(RawEvent::ConversationRenamed {
            platform_conversation_id: "g/c".to_string(),
            conversation_name: Some("general".to_string()),
            server_id: None,
            server_name: None,
        })
        .await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("conversation_updated", 1)
            .await
    );

    let updated = &harness.transport.bot_requests("conversation_updated")[0];
    assert_eq!(updated["data"]["conversation_name"], json!("general"));
}

#[tokio::test]
async fn test_mentions_normalized_to_display_names() {
    let dir = tempfile::tempdir().unwrap();
    let harness = start_adapter(dir.path()).await;

    // First message teaches the cache who u2 is
    let mut first = RawMessage::text_message("g/c", "m1", "u2", "hello", 1_000);
    first.sender.display_name = Some("Quinn Rivers".to_string());
    harness.client.push_event(RawEvent::NewMessage(first)).await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 1)
            .await
    );

    let mut second = RawMessage::text_message("g/c", "m2", "u1", "ping <@u2>", 2_000);
    second.mentions = vec!["u2".to_string()];
    harness.client.push_event(RawEvent::NewMessage(second)).await;
    assert!(
        harness
            .transport
            .wait_for_bot_request("message_received", 2)
            .await
    );

    let received = harness.transport.bot_requests("message_received");
    let second = received
        .iter()
        .find(|r| r["data"]["message_id"] == json!("m2"))
        .unwrap();
    assert_eq!(second["data"]["text"], json!("ping <@Quinn Rivers>"));
    assert_eq!(second["data"]["mentions"], json!(["Quinn Rivers"]));
}
