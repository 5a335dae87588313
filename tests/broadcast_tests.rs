use muster::{
    Bus, BusChannel, ConversationEvent, Frame, InmemoryBus, MemoryPresence, Node, ReplyError,
    RequestError, RequestOptions,
};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

fn setup(host: &str) -> (Arc<InmemoryBus>, Node) {
    let bus = Arc::new(InmemoryBus::default());
    let presence = Arc::new(MemoryPresence::new([host]));
    let node = Node::new(Arc::clone(&bus) as Arc<dyn Bus>, presence, host);
    (bus, node)
}

fn expect_hosts(hosts: &[&str]) -> RequestOptions {
    RequestOptions {
        expect: Some(hosts.iter().map(|x| x.to_string()).collect()),
        ..Default::default()
    }
}

#[test(tokio::test)]
async fn should_deliver_ack_data_host_end_then_end_for_a_standard_roundtrip() {
    let (_bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let mut conversation = node.request::<String, String>(
        "test",
        "test-request".to_string(),
        expect_hosts(&["alpha"]),
    );

    let request = listener.next().await.unwrap();
    assert_eq!(request.origin, "alpha");
    assert_eq!(request.body, "test-request");
    request.reply("test-response".to_string()).await.unwrap();
    request.end().await.unwrap();

    match conversation.next().await.unwrap() {
        ConversationEvent::Ack { host } => assert_eq!(host, "alpha"),
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::Data { host, body } => {
            assert_eq!(host, "alpha");
            assert_eq!(body, "test-response");
        }
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::HostEnd { host, responses } => {
            assert_eq!(host, "alpha");
            assert_eq!(responses, vec!["test-response"]);
        }
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::End {
            responses,
            expecting,
        } => {
            assert_eq!(responses.len(), 1);
            assert_eq!(responses["alpha"], vec!["test-response"]);
            assert!(expecting.is_empty());
        }
        x => panic!("Unexpected event: {x:?}"),
    }

    // Nothing may follow the terminal event
    assert!(conversation.next().await.is_none());
}

#[test(tokio::test)]
async fn should_reject_a_reply_after_end_and_leak_no_frame_to_the_requester() {
    let (_bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let mut conversation =
        node.request::<String, String>("test", "go".to_string(), expect_hosts(&["alpha"]));

    let request = listener.next().await.unwrap();
    request.reply("first".to_string()).await.unwrap();
    request.end().await.unwrap();
    match request.reply("second".to_string()).await {
        Err(ReplyError::AfterEnd) => {}
        x => panic!("Unexpected result: {x:?}"),
    }

    let mut data_bodies = Vec::new();
    while let Some(event) = conversation.next().await {
        match event {
            ConversationEvent::Data { body, .. } => data_bodies.push(body),
            ConversationEvent::End { responses, .. } => {
                assert_eq!(responses["alpha"], vec!["first"]);
            }
            _ => {}
        }
    }
    assert_eq!(data_bodies, vec!["first"]);
}

#[test(tokio::test)]
async fn should_keep_concurrent_conversations_apart() {
    let (_bus, node) = setup("alpha");

    let mut listeners = Vec::new();
    let mut conversations = Vec::new();
    for i in 0..4u32 {
        listeners.push(node.listen::<u32, u32>(&format!("test{i}")).await.unwrap());
    }
    for i in 0..4u32 {
        conversations.push(node.request::<u32, u32>(
            &format!("test{i}"),
            i,
            expect_hosts(&["alpha"]),
        ));
    }

    for (i, listener) in listeners.iter_mut().enumerate() {
        let request = listener.next().await.unwrap();
        assert_eq!(request.body, i as u32);
        request.reply(request.body).await.unwrap();
        request.end().await.unwrap();
    }

    for (i, conversation) in conversations.into_iter().enumerate() {
        let (responses, expecting) = conversation.wait().await.unwrap();
        assert_eq!(responses["alpha"], vec![i as u32]);
        assert!(expecting.is_empty());
    }
}

#[test(tokio::test)]
async fn should_error_on_connect_timeout_when_nobody_responds() {
    let (_bus, node) = setup("alpha");

    let options = RequestOptions {
        expect: Some(vec!["alpha".to_string()]),
        connect_timeout: Duration::from_millis(10),
        ..Default::default()
    };
    let mut conversation = node.request::<String, String>("test", "go".to_string(), options);

    match conversation.next().await.unwrap() {
        ConversationEvent::Error { error, expecting } => {
            assert!(matches!(error, RequestError::ConnectTimeout(_)));
            assert_eq!(
                error.to_string(),
                "Did not receive a message within the connect timeout interval of 10ms"
            );
            assert_eq!(expecting, vec!["alpha".to_string()]);
        }
        x => panic!("Unexpected event: {x:?}"),
    }
    assert!(conversation.next().await.is_none());
}

#[test(tokio::test)]
async fn should_carry_unresponsive_expected_hosts_into_the_idle_timeout_end() {
    let (_bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let options = RequestOptions {
        expect: Some(vec!["host1".to_string()]),
        idle_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let mut conversation = node.request::<String, String>("test", "go".to_string(), options);

    // This node acks and completes without any data; host1 never shows up
    let request = listener.next().await.unwrap();
    request.end().await.unwrap();

    match conversation.next().await.unwrap() {
        ConversationEvent::Ack { host } => assert_eq!(host, "alpha"),
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::HostEnd { host, responses } => {
            assert_eq!(host, "alpha");
            assert!(responses.is_empty());
        }
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::End {
            responses,
            expecting,
        } => {
            assert_eq!(expecting, vec!["host1".to_string()]);
            assert_eq!(responses["alpha"], Vec::<String>::new());
            assert!(!responses.contains_key("host1"));
        }
        x => panic!("Unexpected event: {x:?}"),
    }
}

#[test(tokio::test)]
async fn should_await_an_unexpected_acker_until_the_idle_timeout() {
    let (bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let options = RequestOptions {
        expect: Some(vec!["alpha".to_string()]),
        idle_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let mut conversation = node.request::<String, String>("test", "go".to_string(), options);

    // While servicing the request, fake an ack from a host that will never
    // complete, then finish our own response stream
    let request = listener.next().await.unwrap();
    let synthetic = bus
        .open(&muster::common::reply_channel("test", conversation.id()))
        .await
        .unwrap();
    synthetic
        .publish(
            Frame::<String>::Ack {
                host: "host1".to_string(),
            }
            .to_vec()
            .unwrap(),
        )
        .await
        .unwrap();
    request.end().await.unwrap();

    match conversation.next().await.unwrap() {
        ConversationEvent::Ack { host } => assert_eq!(host, "alpha"),
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::Ack { host } => assert_eq!(host, "host1"),
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::HostEnd { host, responses } => {
            assert_eq!(host, "alpha");
            assert!(responses.is_empty());
        }
        x => panic!("Unexpected event: {x:?}"),
    }
    match conversation.next().await.unwrap() {
        ConversationEvent::End {
            responses,
            expecting,
        } => {
            assert_eq!(expecting, vec!["host1".to_string()]);
            assert_eq!(responses["alpha"], Vec::<String>::new());
            assert_eq!(responses["host1"], Vec::<String>::new());
        }
        x => panic!("Unexpected event: {x:?}"),
    }
}

#[test(tokio::test)]
async fn should_emit_host_end_with_no_responses_for_a_host_that_only_ended() {
    let (bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let mut conversation = node.request::<String, String>(
        "test",
        "go".to_string(),
        expect_hosts(&["alpha", "ghost"]),
    );

    // ghost completes without ever acking or sending data
    let request = listener.next().await.unwrap();
    let synthetic = bus
        .open(&muster::common::reply_channel("test", conversation.id()))
        .await
        .unwrap();
    synthetic
        .publish(
            Frame::<String>::End {
                host: "ghost".to_string(),
            }
            .to_vec()
            .unwrap(),
        )
        .await
        .unwrap();
    request.end().await.unwrap();

    let mut host_ends = Vec::new();
    let mut terminal = None;
    while let Some(event) = conversation.next().await {
        match event {
            ConversationEvent::HostEnd { host, responses } => host_ends.push((host, responses)),
            ConversationEvent::End {
                responses,
                expecting,
            } => terminal = Some((responses, expecting)),
            _ => {}
        }
    }

    assert_eq!(
        host_ends,
        vec![
            ("ghost".to_string(), Vec::new()),
            ("alpha".to_string(), Vec::new()),
        ]
    );
    let (responses, expecting) = terminal.unwrap();
    assert!(expecting.is_empty());
    assert_eq!(responses.len(), 1);
    assert_eq!(responses["alpha"], Vec::<String>::new());
    assert!(!responses.contains_key("ghost"));
}

#[test(tokio::test)]
async fn should_use_the_presence_snapshot_for_the_default_expect_set() {
    let bus = Arc::new(InmemoryBus::default());
    let presence = Arc::new(MemoryPresence::new(["alpha"]));
    let node = Node::new(
        Arc::clone(&bus) as Arc<dyn Bus>,
        Arc::clone(&presence) as Arc<dyn muster::Presence>,
        "alpha",
    );

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    let mut conversation =
        node.request::<String, String>("test", "go".to_string(), RequestOptions::default());

    // Presence changes after the snapshot never join the conversation
    presence.add("latecomer");

    let request = listener.next().await.unwrap();
    request.end().await.unwrap();

    loop {
        match conversation.next().await.unwrap() {
            ConversationEvent::End {
                responses,
                expecting,
            } => {
                assert!(expecting.is_empty());
                assert_eq!(responses["alpha"], Vec::<String>::new());
                break;
            }
            ConversationEvent::Error { error, .. } => panic!("Unexpected error: {error}"),
            _ => {}
        }
    }
}

#[test(tokio::test)]
async fn should_stop_yielding_requests_after_close() {
    let (_bus, node) = setup("alpha");

    let mut listener = node.listen::<String, String>("test").await.unwrap();
    listener.close().await.unwrap();
    assert!(listener.next().await.is_none());

    // With the listener gone, a broadcast runs into the connect timeout
    let options = RequestOptions {
        expect: Some(vec!["alpha".to_string()]),
        connect_timeout: Duration::from_millis(10),
        ..Default::default()
    };
    let conversation = node.request::<String, String>("test", "go".to_string(), options);
    match conversation.wait().await {
        Err(RequestError::ConnectTimeout(_)) => {}
        x => panic!("Unexpected result: {x:?}"),
    }
}
