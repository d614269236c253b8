//! Every request settles exactly once, whatever the driver sends back

use std::{collections::HashSet, sync::Arc};

use cirrus_connector::{ConnectorConfig, KvConnector};
use cirrus_core::{CompletionToken, Message, OperationTag};
use cirrus_testkit::*;
use cirrus_transport::MemoryChannel;

fn scripted(driver: &Arc<ScriptedDriver>, client_id: &str) -> (MemoryChannel, KvConnector) {
    init_tracing();
    let channel = MemoryChannel::new().unwrap();
    driver.listen(&channel, "scripted");
    let kv = KvConnector::open(
        ConnectorConfig::new(client_id, "orders").with_driver_role("scripted"),
        &channel,
    )
    .unwrap();
    kv.access().get_result_timeout(SETTLE_TIMEOUT).unwrap();
    (channel, kv)
}

#[test]
fn concurrent_requests_each_settle_once_with_their_own_reply() {
    let rig = KvRig::builder().driver_workers(4).connector_workers(4).build();
    let kv = rig.accessed("busy", "orders");
    let settled = CallCounter::new();

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let kv = &kv;
            let settled = &settled;
            scope.spawn(move || {
                for i in 0..25 {
                    let key = format!("t{thread}-k{i}");
                    let result = kv.set(&key, key.clone().into_bytes());
                    result.completion().observe(settled.observer());
                    assert_eq!(assert_settles!(result), Ok(()));
                }
            });
        }
    });

    assert_eventually!(settled.count() == 200, "settled {} of 200", settled.count());
    let stats = kv.stats();
    assert_eq!(stats.requests_issued, 201);
    assert_eq!(stats.replies_delivered, 201);
    assert_eq!(stats.replies_dropped, 0);
    assert_eq!(rig.backend().peek("orders", "t7-k24"), Some(b"t7-k24".to_vec()));
    assert_eq!(rig.driver().operations().pending_count(), 0);
}

#[test]
fn concurrent_reads_each_receive_their_own_value() {
    let rig = KvRig::builder().driver_workers(4).connector_workers(4).build();
    for thread in 0..8 {
        for i in 0..25 {
            let key = format!("t{thread}-k{i}");
            rig.backend().seed("orders", &key, format!("value of {key}").as_bytes());
        }
    }
    let kv = rig.accessed("reader", "orders");

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let kv = &kv;
            scope.spawn(move || {
                // Issue every read before waiting on any of them.
                let pending: Vec<_> = (0..25)
                    .map(|i| {
                        let key = format!("t{thread}-k{i}");
                        let result = kv.get(&key);
                        (key, result)
                    })
                    .collect();
                for (key, result) in pending {
                    let value = assert_settles!(result).unwrap();
                    assert_eq!(value, Some(format!("value of {key}").into_bytes()), "{key}");
                }
            });
        }
    });

    let stats = kv.stats();
    assert_eq!(stats.replies_delivered, 201);
    assert_eq!(stats.replies_dropped, 0);
    assert_eq!(kv.session().pending(), 0);
}

#[test]
fn concurrent_requests_carry_distinct_tokens() {
    let driver = ScriptedDriver::agreeable();
    let (_channel, kv) = scripted(&driver, "tokens");

    let results: Vec<_> = (0..50)
        .map(|i| kv.set(&format!("k{i}"), Vec::new()))
        .collect();
    for result in &results {
        assert_eq!(assert_settles!(result), Ok(()));
    }

    let tokens = driver.tokens();
    assert_eq!(tokens.len(), 51);
    let distinct: HashSet<_> = tokens.iter().map(CompletionToken::request_id).collect();
    assert_eq!(distinct.len(), 51);
    assert!(tokens.iter().all(|token| token.client_id() == "tokens"));
}

#[test]
fn duplicate_replies_are_dropped() {
    let driver = ScriptedDriver::new(|message| {
        let token = message.token.clone().unwrap();
        vec![Message::ok(token.clone()), Message::ok(token)]
    });
    let (_channel, kv) = scripted(&driver, "duplicates");
    let settled = CallCounter::new();

    let result = kv.set("k", b"v".to_vec());
    result.completion().observe(settled.observer());
    assert_eq!(assert_settles!(result), Ok(()));

    // One duplicate for the access, one for the set.
    assert_eventually!(
        kv.stats().replies_dropped == 2,
        "dropped {}",
        kv.stats().replies_dropped
    );
    assert_eq!(settled.count(), 1);
}

#[test]
fn replies_for_unknown_tokens_leave_pending_requests_alone() {
    let driver = ScriptedDriver::new(|message| {
        let token = message.token.clone().unwrap();
        vec![
            Message::ok(CompletionToken::new(token.client_id())),
            Message::ok(token),
        ]
    });
    let (_channel, kv) = scripted(&driver, "strays");

    assert_eq!(assert_settles!(kv.set("k", Vec::new())), Ok(()));
    assert_eventually!(kv.stats().replies_dropped == 2, "stray replies not dropped");
    assert_eq!(kv.session().pending(), 0);
}

#[test]
fn non_reply_messages_do_not_settle_requests() {
    let driver = ScriptedDriver::new(|message| {
        let token = message.token.clone().unwrap();
        vec![
            Message::new(OperationTag::GetRequest, token.clone(), Vec::new()),
            Message::ok(token),
        ]
    });
    let (_channel, kv) = scripted(&driver, "confused");

    assert_eq!(assert_settles!(kv.set("k", Vec::new())), Ok(()));
    assert_eventually!(kv.stats().replies_dropped == 2, "requests were not dropped");
}
