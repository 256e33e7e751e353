//! End-to-end scenarios exercising the full worker, commit pipeline, and
//! view subscriptions.

use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use postbox_core::{
    ChatListTotalUnreadCounters, ChatListTotalUnreadState, ItemCollectionId, ItemCollectionInfo,
    ItemCollectionItem, PeerId, Postbox, ValueBoxKey,
};

fn collection(namespace: i32, id: i64) -> ItemCollectionId {
    ItemCollectionId { namespace, id }
}

fn info(label: &str) -> ItemCollectionInfo {
    ItemCollectionInfo(json!({ "label": label }))
}

fn item(key: i64) -> ItemCollectionItem {
    ItemCollectionItem {
        key,
        value: json!({ "key": key }),
    }
}

#[test]
fn s1_fresh_counter_and_restart_monotonicity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("postbox");

    {
        let postbox = Postbox::open(&path).unwrap();
        let first = postbox
            .transaction(|m| m.get_next_message_id(PeerId(7), 0))
            .wait()
            .unwrap();
        let second = postbox
            .transaction(|m| m.get_next_message_id(PeerId(7), 0))
            .wait()
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    // Across a restart the next id continues past every committed id.
    let postbox = Postbox::open(&path).unwrap();
    let third = postbox
        .transaction(|m| m.get_next_message_id(PeerId(7), 0))
        .wait()
        .unwrap();
    assert_eq!(third.id, 3);

    // Other slots are unaffected.
    let other = postbox
        .transaction(|m| m.get_next_message_id(PeerId(8), 0))
        .wait()
        .unwrap();
    assert_eq!(other.id, 1);
}

#[test]
fn s2_unread_state_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("postbox");

    let mut state = ChatListTotalUnreadState::default();
    state.absolute_counters.insert(
        1,
        ChatListTotalUnreadCounters {
            message_count: 5,
            chat_count: 2,
        },
    );

    {
        let postbox = Postbox::open(&path).unwrap();
        let written = state.clone();
        postbox
            .transaction(move |m| m.set_chat_list_total_unread_state(written))
            .wait()
            .unwrap();
    }

    let postbox = Postbox::open(&path).unwrap();
    let loaded = postbox
        .transaction(|m| m.get_chat_list_total_unread_state())
        .wait()
        .unwrap();
    assert_eq!(loaded, state);
}

#[test]
fn s3_view_replays_info_replacement() {
    let postbox = Postbox::in_memory();
    let namespace = 0;
    let stream = postbox.item_collection_infos_view(vec![namespace]);

    let initial = stream.recv().unwrap();
    assert_eq!(initial.entries[&namespace], Vec::new());

    let a = collection(namespace, 1);
    let b = collection(namespace, 2);
    postbox
        .transaction(move |m| {
            m.replace_item_collection_infos(
                namespace,
                vec![(a, info("a")), (b, info("b"))],
            );
            m.replace_item_collection_items(a, vec![item(1), item(2)]);
        })
        .wait()
        .unwrap();

    let snapshot = stream.recv().unwrap();
    let entries = &snapshot.entries[&namespace];
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, a);
    assert_eq!(entries[0].info, info("a"));
    assert_eq!(entries[0].first_item.as_ref().unwrap().key, 1);
    assert_eq!(entries[1].id, b);
    assert_eq!(entries[1].info, info("b"));
    assert!(entries[1].first_item.is_none());

    // Snapshot consistency: a fresh view of the same parameters sees the
    // same state the stream just emitted.
    let fresh = postbox.item_collection_infos_view(vec![namespace]);
    assert_eq!(fresh.recv().unwrap(), snapshot);
}

#[test]
fn s4_view_replays_item_only_update() {
    let postbox = Postbox::in_memory();
    let namespace = 0;
    let a = collection(namespace, 1);
    let b = collection(namespace, 2);

    postbox
        .transaction(move |m| {
            m.replace_item_collection_infos(
                namespace,
                vec![(a, info("a")), (b, info("b"))],
            );
            m.replace_item_collection_items(a, vec![item(1), item(2)]);
        })
        .wait()
        .unwrap();

    let stream = postbox.item_collection_infos_view(vec![namespace]);
    let initial = stream.recv().unwrap();

    postbox
        .transaction(move |m| {
            m.replace_item_collection_items(a, vec![item(0), item(1), item(2)]);
        })
        .wait()
        .unwrap();

    let snapshot = stream.recv().unwrap();
    let entries = &snapshot.entries[&namespace];
    assert_eq!(entries[0].first_item.as_ref().unwrap().key, 0);
    // The second entry and the order are untouched.
    assert_eq!(entries[1], initial.entries[&namespace][1]);
    assert_eq!(entries[0].id, a);
    assert_eq!(entries[0].info, initial.entries[&namespace][0].info);
}

#[test]
fn s5_noop_transaction_emits_nothing() {
    let postbox = Postbox::in_memory();
    let infos = postbox.item_collection_infos_view(vec![0]);
    let records = postbox.account_records();
    infos.recv().unwrap();
    records.recv().unwrap();

    postbox
        .transaction(|m| {
            m.get_records();
            m.get_item_collection_infos(0);
            m.get_chat_list_total_unread_state();
        })
        .wait()
        .unwrap();

    assert!(infos.try_recv().is_none());
    assert!(records.try_recv().is_none());
}

#[test]
fn s6_shared_data_equality_short_circuit() {
    let postbox = Postbox::in_memory();
    let key = ValueBoxKey::from_bytes(b"app-config".to_vec());

    let write_key = key.clone();
    postbox
        .transaction(move |m| m.set_shared_data(&write_key, Some(json!({ "theme": "dark" }))))
        .wait()
        .unwrap();

    let stream = postbox.shared_data(vec![key.clone()]);
    let initial = stream.recv().unwrap();
    assert_eq!(initial.entries[&key], json!({ "theme": "dark" }));

    // Writing back the current value is equality-gated: no emission.
    let noop_key = key.clone();
    postbox
        .transaction(move |m| m.update_shared_data(&noop_key, |current| current))
        .wait()
        .unwrap();
    assert!(stream.try_recv().is_none());

    // A real change is observed.
    let change_key = key.clone();
    postbox
        .transaction(move |m| m.set_shared_data(&change_key, Some(json!({ "theme": "light" }))))
        .wait()
        .unwrap();
    let snapshot = stream
        .recv_timeout(Duration::from_secs(5))
        .expect("changed value should emit");
    assert_eq!(snapshot.entries[&key], json!({ "theme": "light" }));
}

#[test]
fn current_account_id_allocation_is_observed_by_earlier_subscribers() {
    let postbox = Postbox::in_memory();

    let passive = postbox.current_account_id(false);
    assert_eq!(passive.recv().unwrap(), None);

    let allocating = postbox.current_account_id(true);
    let allocated = allocating.recv().unwrap().expect("id should be allocated");

    // The passive stream observes the allocation transaction.
    let observed = passive
        .recv_timeout(Duration::from_secs(5))
        .expect("allocation should emit");
    assert_eq!(observed, Some(allocated));

    // A third subscription sees the same id without re-allocating.
    let third = postbox.current_account_id(true);
    assert_eq!(third.recv().unwrap(), Some(allocated));
    let records = postbox.all_account_records().wait().unwrap();
    assert_eq!(records.len(), 1);
}

#[test]
fn account_records_view_tracks_mutations() {
    let postbox = Postbox::in_memory();
    let stream = postbox.account_records();
    assert!(stream.recv().unwrap().records.is_empty());

    let id = postbox
        .transaction(|m| m.create_record(json!({ "name": "primary" })))
        .wait()
        .unwrap();
    let snapshot = stream.recv().unwrap();
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].id, id);
    assert_eq!(snapshot.records[0].attributes["name"], "primary");

    postbox
        .transaction(move |m| m.update_record(id, None))
        .wait()
        .unwrap();
    assert!(stream.recv().unwrap().records.is_empty());
}

#[test]
fn records_and_session_tags_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("postbox");

    let (temporary_id, old_session_id) = {
        let postbox = Postbox::open(&path).unwrap();
        let temporary_id = postbox.allocated_temporary_account_id().wait().unwrap();
        postbox
            .transaction(|m| m.create_record(json!({ "kind": "permanent" })))
            .wait()
            .unwrap();
        (temporary_id, postbox.temporary_session_id())
    };

    let postbox = Postbox::open(&path).unwrap();
    assert_ne!(postbox.temporary_session_id(), old_session_id);

    let records = postbox.all_account_records().wait().unwrap();
    assert_eq!(records.len(), 2);
    let temporary = records.iter().find(|r| r.id == temporary_id).unwrap();
    assert_eq!(temporary.temporary_session_id, Some(old_session_id));
}

#[test]
fn snapshots_arrive_in_transaction_order_without_coalescing() {
    let postbox = Postbox::in_memory();
    let namespace = 3;
    let stream = postbox.item_collection_infos_view(vec![namespace]);
    stream.recv().unwrap();

    for round in 0..5i64 {
        postbox
            .transaction(move |m| {
                m.replace_item_collection_infos(
                    namespace,
                    vec![(collection(namespace, round), info("round"))],
                );
            })
            .wait()
            .unwrap();
    }

    for round in 0..5i64 {
        let snapshot = stream.recv().unwrap();
        let entries = &snapshot.entries[&namespace];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, collection(namespace, round));
    }
}

#[test]
fn dropping_one_subscriber_leaves_others_live() {
    let postbox = Postbox::in_memory();
    let namespace = 0;
    let first = postbox.item_collection_infos_view(vec![namespace]);
    let second = postbox.item_collection_infos_view(vec![namespace]);
    let third = postbox.item_collection_infos_view(vec![namespace]);
    first.recv().unwrap();
    second.recv().unwrap();
    third.recv().unwrap();

    drop(second);

    postbox
        .transaction(move |m| {
            m.replace_item_collection_infos(
                namespace,
                vec![(collection(namespace, 1), info("x"))],
            );
        })
        .wait()
        .unwrap();

    assert_eq!(first.recv().unwrap().entries[&namespace].len(), 1);
    assert_eq!(third.recv().unwrap().entries[&namespace].len(), 1);
}
