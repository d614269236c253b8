//! Key-value requests end to end over the memory channel

use assert_matches::assert_matches;
use cirrus_core::{CompletionError, Message, OperationTag, Outcome, ReplyErrorKind, SessionPhase};
use cirrus_testkit::*;

#[test]
fn get_of_missing_key_is_none_not_an_error() {
    let rig = KvRig::new();
    let kv = rig.accessed("reader", "orders");

    assert_eq!(assert_settles!(kv.get("absent")), Ok(None));
}

#[test]
fn set_then_get_returns_stored_value() {
    let rig = KvRig::new();
    let kv = rig.accessed("writer", "orders");

    assert_eq!(assert_settles!(kv.set("k1", b"v1".to_vec())), Ok(()));
    assert_eq!(assert_settles!(kv.get("k1")), Ok(Some(b"v1".to_vec())));
    assert_eq!(rig.backend().peek("orders", "k1"), Some(b"v1".to_vec()));
}

#[test]
fn list_returns_sorted_keys_of_the_accessed_bucket() {
    let rig = KvRig::new();
    rig.backend().seed("orders", "b", b"2");
    rig.backend().seed("orders", "a", b"1");
    rig.backend().seed("invoices", "z", b"9");
    let kv = rig.accessed("lister", "orders");

    assert_eq!(
        assert_settles!(kv.list()),
        Ok(vec!["a".to_string(), "b".to_string()])
    );
}

#[test]
fn delete_of_missing_key_is_rejected() {
    let rig = KvRig::new();
    let kv = rig.accessed("deleter", "orders");

    assert_matches!(
        assert_settles!(kv.delete("absent")),
        Err(CompletionError::Rejected(_))
    );

    kv.set("present", b"x".to_vec()).get_result().unwrap();
    assert_eq!(assert_settles!(kv.delete("present")), Ok(()));
    assert_eq!(rig.backend().peek("orders", "present"), None);
}

#[test]
fn queue_operations_are_unsupported_by_a_kv_driver() {
    let rig = KvRig::new();
    let kv = rig.accessed("publisher", "orders");

    let result = kv.session().request(
        |token| Ok(Message::new(OperationTag::PublishRequest, token, Vec::new())),
        |reply| -> Outcome<Message> { Ok(reply) },
    );
    assert_remote_error!(assert_settles!(result), ReplyErrorKind::Unsupported);
}

#[test]
fn requests_before_access_are_refused_locally() {
    let rig = KvRig::new();
    let kv = rig.connector("eager", "orders");

    assert_matches!(
        kv.get("k1").get_result(),
        Err(CompletionError::InvalidState(_))
    );
    assert_eq!(kv.stats().requests_issued, 0);
    assert_eq!(rig.driver().buckets().client_count(), 0);
}

#[test]
fn second_access_is_refused() {
    let rig = KvRig::new();
    let kv = rig.accessed("twice", "orders");

    assert_matches!(
        kv.access().get_result(),
        Err(CompletionError::InvalidState(_))
    );
    assert_eq!(kv.phase(), SessionPhase::Accessed);
    assert_eq!(rig.driver().buckets().refcount("orders"), 1);
}

#[test]
fn close_detaches_and_later_requests_are_refused() {
    let rig = KvRig::new();
    let kv = rig.accessed("closer", "orders");
    assert_eq!(rig.driver().buckets().refcount("orders"), 1);

    assert_eq!(assert_settles!(kv.close()), Ok(()));
    assert_eq!(kv.phase(), SessionPhase::Terminated);
    assert_eq!(rig.driver().buckets().refcount("orders"), 0);
    assert_eq!(rig.backend().destroyed("orders"), 1);

    assert_matches!(
        kv.set("late", b"x".to_vec()).get_result(),
        Err(CompletionError::InvalidState(_))
    );
    assert_matches!(kv.close().get_result(), Err(CompletionError::InvalidState(_)));
    assert_eq!(rig.backend().peek("orders", "late"), None);
}

#[test]
fn results_can_be_awaited_from_async_code() {
    let rig = KvRig::new();
    let kv = rig.accessed("async", "orders");
    rig.backend().seed("orders", "k", b"v");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let value = runtime.block_on(kv.get("k").into_completion().into_future());
    assert_eq!(value, Ok(Some(b"v".to_vec())));
}
