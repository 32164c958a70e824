mod common;

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use tracing::Level;
use futures_util::future::FutureExt;
use widgets_base::{
    AttrValue, AttributeSerializer, CommMessage, ModelCreateOptions, ModelEvent, ModelType, StatusMessage,
    SyncMethod, SyncOptions, WidgetError, WidgetManager, WidgetModel,
};

#[tokio::test]
async fn saves_are_throttled_and_coalesced() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;

        model.set("value", 1);
        model.save_changes(None);
        assert_eq!(comm.updates(), vec![json!({"value": 1})]);
        assert_eq!(model.pending_msgs(), 1);

        model.set("value", 2);
        model.set("description", "x");
        model.save_changes(None);
        model.set("description", "y");
        model.save_changes(None);
        assert_eq!(comm.updates().len(), 1, "held back while the first sync is unacknowledged");

        assert!(comm.ack());
        assert_eq!(
            comm.updates(),
            vec![json!({"value": 1}), json!({"value": 2, "description": "y"})]
        );
        assert_eq!(model.pending_msgs(), 1);

        assert!(comm.ack());
        assert_eq!(model.pending_msgs(), 0);
        assert_eq!(comm.updates().len(), 2);
        assert!(model.buffered_message().is_none());
    })
    .await;
}

#[tokio::test]
async fn full_sync_replaces_held_message() {
    local(async {
        let fx = fixture();
        let (model, _comm) = open_model(&fx, "m1", json!({})).await;
        model.set("value", 1);
        model.save_changes(None);

        model.set("value", 2);
        model.save_changes(None);
        model
            .sync(SyncMethod::Update, SyncOptions::default())
            .unwrap();
        let held = model.buffered_message().unwrap();
        assert!(held.contains_key("_model_name"));
        assert!(held.contains_key("description"));
    })
    .await;
}

#[tokio::test]
async fn echo_of_an_older_message_is_dropped() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        model.set("value", 1);
        model.save_changes(None);
        let sent_id = comm.last_msg_id();
        assert_eq!(model.expected_echo("value"), Some(sent_id.clone()));

        comm.deliver(echo_msg("m1", "some-older-msg", json!({"value": 99})));
        model.state_change().await;
        assert_eq!(model.get("value"), Some(AttrValue::from(1)));

        comm.deliver(echo_msg("m1", &sent_id, json!({"value": 1})));
        model.state_change().await;
        assert_eq!(model.expected_echo("value"), None);
        assert_eq!(model.get("value"), Some(AttrValue::from(1)));

        comm.deliver(update_msg("m1", json!({"value": 5})));
        model.state_change().await;
        assert_eq!(model.get("value"), Some(AttrValue::from(5)));
    })
    .await;
}

#[tokio::test]
async fn echo_does_not_override_a_newer_held_value() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        model.set("value", 1);
        model.save_changes(None);
        let first = comm.last_msg_id();

        model.set("value", 2);
        model.save_changes(None);
        assert!(model.buffered_message().is_some());

        model
            .handle_comm_msg(echo_msg("m1", &first, json!({"value": 1})))
            .await;
        assert_eq!(model.get("value"), Some(AttrValue::from(2)));

        comm.ack();
        assert_eq!(comm.updates().last(), Some(&json!({"value": 2})));
    })
    .await;
}

#[tokio::test]
async fn uncorrelated_echo_does_not_override_a_sent_value() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        model.set("value", 1);
        model.save_changes(None);
        let sent_id = comm.last_msg_id();

        let no_parent = CommMessage::new(
            "m1",
            json!({"method": "echo_update", "state": {"value": 99}, "buffer_paths": []}),
        );
        comm.deliver(no_parent);
        comm.deliver(echo_msg("m1", "", json!({"value": 98})));
        model.state_change().await;

        assert_eq!(model.get("value"), Some(AttrValue::from(1)));
        assert_eq!(model.expected_echo("value"), Some(sent_id));
    })
    .await;
}

#[tokio::test]
async fn echo_for_unsent_attribute_is_applied() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        comm.deliver(echo_msg("m1", "other-frontend", json!({"description": "hi"})));
        model.state_change().await;
        assert_eq!(model.get("description"), Some(AttrValue::from("hi")));
    })
    .await;
}

#[tokio::test]
async fn inbound_state_is_not_echoed_back() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        let m = model.clone();
        model.on_change("value", move |value| {
            let doubled = value.as_i64().unwrap_or_default() * 2;
            m.set("description", format!("{doubled}"));
        });

        comm.deliver(update_msg("m1", json!({"value": 7})));
        model.state_change().await;
        assert_eq!(model.get("value"), Some(AttrValue::from(7)));

        let diff = model.buffered_state_diff();
        assert!(!diff.contains_key("value"));
        assert_eq!(diff.get("description"), Some(&AttrValue::from("14")));

        model.save_changes(None);
        assert_eq!(comm.updates(), vec![json!({"description": "14"})]);
    })
    .await;
}

#[tokio::test]
async fn state_lock_filters_full_syncs_while_applying() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        let m = model.clone();
        model.on_change("value", move |_| {
            m.sync(SyncMethod::Update, SyncOptions::default()).unwrap();
        });
        model.set_state(attrs(json!({"value": 3})));
        let updates = comm.updates();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].get("value").is_none());
        assert!(updates[0].get("description").is_some());
    })
    .await;
}

#[tokio::test]
async fn binary_attributes_travel_as_buffers() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        model.set("data", Bytes::from_static(&[1, 2, 3]));
        model.save_changes(None);

        let sent = comm.sent();
        let last = sent.last().unwrap();
        assert_eq!(last.data["state"], json!({}));
        assert_eq!(last.data["buffer_paths"], json!([["data"]]));
        assert_eq!(last.buffers, vec![Bytes::from_static(&[1, 2, 3])]);

        let msg = CommMessage::new(
            "m1",
            json!({"method": "update", "state": {"value": 4}, "buffer_paths": [["blob"]]}),
        )
        .with_buffers(vec![Bytes::from_static(&[9, 9]), Bytes::from_static(&[0])]);
        model.handle_comm_msg(msg).await;
        assert_eq!(model.get("blob"), Some(AttrValue::Binary(Bytes::from_static(&[9, 9]))));
        assert_eq!(model.get("value"), Some(AttrValue::from(4)));
    })
    .await;
}

#[tokio::test]
async fn bad_update_is_logged_and_does_not_stall_the_mailbox() {
    let logs = LogCapture::start();
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        let broken = CommMessage::new(
            "m1",
            json!({"method": "update", "state": {}, "buffer_paths": [["a"], ["b"]]}),
        );
        comm.deliver(broken);
        comm.deliver(update_msg("m1", json!({"value": 11})));
        model.state_change().await;
        assert_eq!(model.get("value"), Some(AttrValue::from(11)));
    })
    .await;
    assert!(logs.contains(Level::ERROR, "could not process update msg"));
}

#[tokio::test]
async fn idle_without_pending_message_is_clamped() {
    let logs = LogCapture::start();
    local(async {
        let fx = fixture();
        let (model, _comm) = open_model(&fx, "m1", json!({})).await;
        model.handle_status(&StatusMessage::idle());
        assert_eq!(model.pending_msgs(), 0);
        model.handle_status(&StatusMessage::busy());
        assert_eq!(model.pending_msgs(), 0);
    })
    .await;
    assert!(logs.contains(Level::ERROR, "pending message count went negative"));
}

#[tokio::test]
async fn send_failure_leaves_pending_count_alone() {
    let logs = LogCapture::start();
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        comm.set_fail_sends(true);
        model.set("value", 1);
        model.save_changes(None);
        assert_eq!(model.pending_msgs(), 0);
        assert_eq!(model.expected_echo("value"), None);

        comm.set_fail_sends(false);
        model.set("value", 2);
        model.save_changes(None);
        assert_eq!(model.pending_msgs(), 1);
        assert_eq!(comm.updates(), vec![json!({"value": 2})]);
    })
    .await;
    assert!(logs.contains(Level::ERROR, "could not send model state"));
}

#[tokio::test]
async fn models_without_comm_do_not_sync() {
    local(async {
        let fx = fixture();
        let options = ModelCreateOptions::new(TEST_MODULE, TEST_MODEL, VERSION).with_model_id("offline");
        let model = fx.manager.new_model(options, attrs(json!({}))).await.unwrap();
        assert!(!model.comm_live());
        assert_eq!(
            model.sync(SyncMethod::Patch, SyncOptions::default()),
            Err(WidgetError::NoComm)
        );

        model.set("value", 3);
        model.save_changes(None);
        assert_eq!(model.buffered_state_diff().get("value"), Some(&AttrValue::from(3)));
    })
    .await;
}

#[tokio::test]
async fn custom_messages_are_published() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        model.on(move |event| {
            if let ModelEvent::Custom { content, buffers } = event {
                sink.borrow_mut().push((content.clone(), buffers.len()));
            }
        });
        comm.deliver(
            CommMessage::new("m1", json!({"method": "custom", "content": {"event": "click"}}))
                .with_buffers(vec![Bytes::from_static(&[1])]),
        );
        assert_eq!(*seen.borrow(), vec![(json!({"event": "click"}), 1)]);

        model.send(json!({"reply": true}), None, Vec::new());
        assert_eq!(
            comm.sent().last().map(|s| s.data.clone()),
            Some(json!({"method": "custom", "content": {"reply": true}}))
        );
    })
    .await;
}

#[tokio::test]
async fn user_status_callback_still_runs() {
    local(async {
        let fx = fixture();
        let (model, comm) = open_model(&fx, "m1", json!({})).await;
        let idles = Rc::new(RefCell::new(0));
        let counter = idles.clone();
        let callbacks = widgets_base::CommCallbacks::on_status(move |_| *counter.borrow_mut() += 1);
        model.set("value", 1);
        model.save_changes(Some(callbacks));
        comm.ack();
        assert_eq!(*idles.borrow(), 1);
        assert_eq!(model.pending_msgs(), 0);
    })
    .await;
}

/// `value` takes `value` scheduler turns to deserialize.
fn slow_model_type() -> ModelType {
    let deserialize = |value: AttrValue, _manager: WidgetManager| {
        async move {
            let turns = value.as_i64().unwrap_or_default();
            for _ in 0..turns {
                tokio::task::yield_now().await;
            }
            Ok(value)
        }
        .boxed_local()
    };
    ModelType::new(TEST_MODULE, "SlowModel", VERSION)
        .with_defaults(attrs(json!({"value": 0})))
        .with_serializer(
            "value",
            AttributeSerializer {
                deserialize: Some(Rc::new(deserialize)),
                ..AttributeSerializer::default()
            },
        )
}

#[tokio::test]
async fn updates_apply_in_arrival_order_whatever_their_decode_time() {
    local(async {
        let fx = fixture_with(|registry| registry.register_model(TEST_MODULE, "SlowModel", slow_model_type()));
        let (model, comm) = open_model_of(&fx, "m1", "SlowModel", json!({})).await;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        model.on(move |event: &ModelEvent| {
            if let ModelEvent::ChangeAttr { name, value } = event {
                if name == "value" {
                    log.borrow_mut().push(value.as_i64().unwrap_or_default());
                }
            }
        });

        comm.deliver(update_msg("m1", json!({"value": 50})));
        comm.deliver(update_msg("m1", json!({"value": 1})));
        model.state_change().await;

        assert_eq!(model.get("value"), Some(AttrValue::from(1)));
        assert_eq!(*seen.borrow(), vec![50, 1]);
    })
    .await;
}

/// Refuses to put negative numbers on the wire.
fn picky_model_type() -> ModelType {
    let serialize = |value: &AttrValue, _model: &WidgetModel| match value.as_i64() {
        Some(n) if n < 0 => Err(WidgetError::Message(format!("{n} is negative"))),
        _ => Ok(value.clone()),
    };
    ModelType::new(TEST_MODULE, "PickyModel", VERSION)
        .with_defaults(attrs(json!({"value": 0, "description": ""})))
        .with_serializer(
            "value",
            AttributeSerializer {
                serialize: Some(Rc::new(serialize)),
                ..AttributeSerializer::default()
            },
        )
}

#[tokio::test]
async fn failed_serialization_does_not_tag_the_next_message() {
    let logs = LogCapture::start();
    local(async {
        let fx = fixture_with(|registry| registry.register_model(TEST_MODULE, "PickyModel", picky_model_type()));
        let (model, comm) = open_model_of(&fx, "m1", "PickyModel", json!({})).await;

        model.set("value", -1);
        model.save_changes(None);
        assert!(comm.updates().is_empty());

        model.set("description", "x");
        model.save_changes(None);
        assert_eq!(comm.updates(), vec![json!({"description": "x"})]);
        assert_eq!(model.expected_echo("description"), Some(comm.last_msg_id()));
        assert_eq!(model.expected_echo("value"), None);
    })
    .await;
    assert!(logs.contains(Level::ERROR, "could not save changes"));
}
