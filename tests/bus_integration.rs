//! Live bus tests: a real broker on ephemeral localhost ports
//!
//! Usage:
//!   cargo test --test bus_integration -- --nocapture

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, UdpSocket};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use groundbus::codec::{default_registry, LineFormat, MessageId, Priority};
use groundbus::protocol::Encoder;
use groundbus::{
    Broker, BrokerHandle, BusConfig, ClientConfig, Communicator, Message, PortConfig,
    Receiver, Sender,
};
use serde_json::json;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn broker_config(ports: PortConfig) -> BusConfig {
    let mut config = BusConfig {
        ports,
        ..BusConfig::default()
    };
    config.broker.bind_ip = LOCALHOST;
    config.broker.beacon_enabled = false;
    config.broker.heartbeat_interval_ms = 100;
    config.broker.monitor_interval_ms = 50;
    config
}

fn start_broker() -> BrokerHandle {
    let ports = PortConfig {
        source: 0,
        sink: 0,
        discovery: free_udp_port(),
    };
    Broker::bind(&broker_config(ports)).unwrap().spawn().unwrap()
}

/// Rebind on the same ports, retrying while the old sockets wind down
fn restart_broker(ports: PortConfig) -> BrokerHandle {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match Broker::bind(&broker_config(ports)) {
            Ok(broker) => return broker.spawn().unwrap(),
            Err(e) if Instant::now() < deadline => {
                eprintln!("rebind failed, retrying: {}", e);
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => panic!("cannot restart broker: {}", e),
        }
    }
}

fn free_udp_port() -> u16 {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn communicator(ports: PortConfig) -> Communicator {
    Communicator::with_config(
        ports,
        ClientConfig {
            broker: Some(LOCALHOST),
            reconnect_grace_ms: 1000,
            reconnect_interval_ms: 100,
            ..ClientConfig::default()
        },
    )
}

/// Collect `count` messages, then make sure nothing else shows up
fn collect(receiver: &Receiver, count: usize) -> Vec<Message> {
    let mut received = Vec::new();
    while received.len() < count {
        match receiver.recv_message(Some(Duration::from_secs(2))) {
            Some(msg) => received.push(msg),
            None => panic!("timed out after {} of {} messages", received.len(), count),
        }
    }
    assert!(
        receiver.recv_message(Some(Duration::from_millis(200))).is_none(),
        "unexpected extra message"
    );
    received
}

fn channels(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.channel.as_str()).collect()
}

#[test]
fn test_prefix_subscription() {
    let broker = start_broker();
    let comm = communicator(broker.ports());

    let everything = Receiver::new(&comm, &[""]).unwrap();
    let foo = Receiver::new(&comm, &["foo"]).unwrap();
    let mut sender = Sender::new(&comm, "unused").unwrap();

    for channel in ["foo", "foobar", "ba/foo", "fo"] {
        assert!(sender.send_on(channel, json!(channel)).unwrap());
    }

    assert_eq!(
        channels(&collect(&everything, 4)),
        vec!["foo", "foobar", "ba/foo", "fo"]
    );
    assert_eq!(channels(&collect(&foo, 2)), vec!["foo", "foobar"]);
}

#[test]
fn test_multiple_prefixes_deliver_once() {
    let broker = start_broker();
    let comm = communicator(broker.ports());

    let receiver = Receiver::new(&comm, &["DAQ", "DAQ/fast", "CAN"]).unwrap();
    let mut sender = Sender::new(&comm, "DAQ/fast").unwrap();

    sender.send(json!(1)).unwrap();
    sender.send_on("CAN/Parsley", json!(2)).unwrap();
    sender.send_on("GUI", json!(3)).unwrap();

    let received = collect(&receiver, 2);
    assert_eq!(channels(&received), vec!["DAQ/fast", "CAN/Parsley"]);
}

#[test]
fn test_disjoint_receivers_with_concurrent_senders() {
    const PER_SENDER: i64 = 50;
    let broker = start_broker();
    let comm = communicator(broker.ports());

    let alpha = Receiver::new(&comm, &["alpha"]).unwrap();
    let beta = Receiver::new(&comm, &["beta"]).unwrap();

    let senders: Vec<_> = ["alpha", "beta"]
        .into_iter()
        .map(|channel| {
            let comm = comm.clone();
            thread::spawn(move || {
                let mut sender = Sender::new(&comm, channel).unwrap();
                for seq in 0..PER_SENDER {
                    assert!(sender.send(json!({ "seq": seq })).unwrap());
                }
                sender.flush(Duration::from_secs(1));
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    for (receiver, channel) in [(&alpha, "alpha"), (&beta, "beta")] {
        let received = collect(receiver, PER_SENDER as usize);
        assert!(received.iter().all(|m| m.channel == channel));
        // one sender, one receiver: send order is kept
        let seqs: Vec<i64> = received
            .iter()
            .map(|m| m.payload["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, (0..PER_SENDER).collect::<Vec<_>>());
    }
}

#[test]
fn test_late_receiver_gets_no_replay() {
    let broker = start_broker();
    let comm = communicator(broker.ports());
    let mut sender = Sender::new(&comm, "late").unwrap();

    sender.send(json!("early")).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while broker.stats().snapshot().messages_in < 1 {
        assert!(Instant::now() < deadline, "broker never saw the message");
        thread::sleep(Duration::from_millis(5));
    }

    let receiver = Receiver::new(&comm, &["late"]).unwrap();
    sender.send(json!("after")).unwrap();

    let received = collect(&receiver, 1);
    assert_eq!(received[0].payload, json!("after"));
}

#[test]
fn test_message_fields_survive_the_bus() {
    let broker = start_broker();
    let comm = communicator(broker.ports());
    let receiver = Receiver::new(&comm, &["DAQ"]).unwrap();
    let mut sender = Sender::new(&comm, "DAQ").unwrap();

    let payload = json!({
        "data": {"PT1": [1.5, 2.5], "TC3": null},
        "valid": true,
        "note": "ox fill",
    });
    let sent = Message::with_timestamp("DAQ", 1_700_000_000.25, payload);
    assert!(sender.send_message(&sent).unwrap());

    assert_eq!(collect(&receiver, 1), vec![sent]);
}

#[test]
fn test_decoded_frames_on_the_bus() {
    let broker = start_broker();
    let comm = communicator(broker.ports());
    let registry = default_registry().unwrap();

    let receiver = Receiver::new(&comm, &["CAN/"]).unwrap();
    let mut gateway = Sender::new(&comm, "CAN/Parsley").unwrap();

    let id = MessageId {
        priority: Priority::High,
        message_type: 0x2A,
        board_type: 45,
        board_instance: 67,
    };
    let frame = registry
        .decode(id.to_raw(), &[0, 0, 5, 2, 0xFF, 0xFA, 0x00])
        .unwrap();
    gateway.send(frame.to_payload()).unwrap();

    let payload = receiver.recv(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(payload["msg_type"], "SENSOR_TEMP");
    assert_eq!(payload["msg_prio"], "HIGH");
    assert_eq!(payload["board_inst_id"], 67);
    assert_eq!(payload["data"]["temperature"], -1.5);
}

#[test]
fn test_usb_debug_lines_through_the_gateway() {
    let broker = start_broker();
    let comm = communicator(broker.ports());
    let registry = default_registry().unwrap();

    let receiver = Receiver::new(&comm, &["CAN/Parsley"]).unwrap();
    let mut gateway = Sender::new(&comm, "CAN/Parsley").unwrap();

    let id = MessageId {
        priority: Priority::Medium,
        message_type: 0x2A,
        board_type: 0x07,
        board_instance: 2,
    }
    .to_raw();
    let capture = format!(
        "board 2 booting\n${:x}:00,00,09,01,00,04,00\n$zz:01\n${:x}:00,00,0A,01,00,08,00\n",
        id, id
    );

    let mut published = 0;
    for line in capture.lines() {
        let Ok(Some(raw)) = LineFormat::Usb.parse(line) else {
            continue;
        };
        let frame = registry.decode(raw.id, &raw.payload).unwrap();
        assert!(gateway.send(frame.to_payload()).unwrap());
        published += 1;
    }
    assert_eq!(published, 2);

    let received = collect(&receiver, 2);
    assert_eq!(received[0].payload["data"]["time"], 9);
    assert_eq!(received[0].payload["data"]["temperature"], 1.0);
    assert_eq!(received[1].payload["data"]["temperature"], 2.0);
    assert_eq!(received[1].payload["board_type_id"], "SENSOR");
}

#[test]
fn test_broker_restart_is_survived() {
    let broker = start_broker();
    let ports = broker.ports();
    let comm = communicator(ports);

    let receiver = Receiver::new(&comm, &["hb"]).unwrap();
    let mut sender = Sender::new(&comm, "hb").unwrap();
    sender.send(json!("before")).unwrap();
    assert_eq!(collect(&receiver, 1)[0].payload, json!("before"));

    broker.shutdown();

    // outage: polling never fails, it just has nothing
    let outage = Instant::now();
    while outage.elapsed() < Duration::from_millis(500) {
        assert!(receiver.recv_message(Some(Duration::ZERO)).is_none());
        let _ = sender.send(json!("lost")).unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    let _broker = restart_broker(ports);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seq = 0;
    let resumed = loop {
        assert!(Instant::now() < deadline, "receiver never came back");
        sender.send(json!({ "seq": seq })).unwrap();
        seq += 1;
        if let Some(msg) = receiver.recv_message(Some(Duration::from_millis(50))) {
            break msg;
        }
    };

    assert!(resumed.payload.get("seq").is_some());
    assert!(receiver.is_connected());
    assert!(sender.is_connected());
    assert!(sender.dropped() > 0);
}

#[test]
fn test_silence_triggers_reconnect() {
    // a fake broker: confirms each subscription, then never speaks again
    let mute = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let sink = mute.local_addr().unwrap().port();
    let (accepted_tx, accepted) = mpsc::channel();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in mute.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf);
            let mut encoder = Encoder::new(16);
            let _ = stream.write_all(encoder.encode_heartbeat().unwrap());
            held.push(stream);
            if accepted_tx.send(()).is_err() {
                break;
            }
        }
    });

    let comm = Communicator::with_config(
        PortConfig {
            source: 0,
            sink,
            discovery: free_udp_port(),
        },
        ClientConfig {
            broker: Some(LOCALHOST),
            reconnect_grace_ms: 300,
            reconnect_interval_ms: 50,
            ..ClientConfig::default()
        },
    );
    let receiver = Receiver::new(&comm, &[""]).unwrap();
    accepted.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(receiver.is_connected());

    // silence past the grace period is not an error, just nothing
    assert!(receiver.recv_message(Some(Duration::from_millis(600))).is_none());

    // and the receiver has subscribed again on a fresh connection
    accepted
        .recv_timeout(Duration::from_secs(3))
        .expect("no reconnect after silence");
    receiver.close();
}

#[test]
fn test_close_interrupts_blocking_recv() {
    let broker = start_broker();
    let comm = communicator(broker.ports());
    let receiver = Arc::new(Receiver::new(&comm, &["quiet"]).unwrap());

    let (tx, rx) = mpsc::channel();
    {
        let receiver = Arc::clone(&receiver);
        thread::spawn(move || {
            let _ = tx.send(receiver.recv_message(None));
        });
    }

    thread::sleep(Duration::from_millis(200));
    receiver.close();

    let result = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("recv_message still blocked after close");
    assert!(result.is_none());
    assert!(receiver.recv_message(Some(Duration::from_secs(1))).is_none());
}

#[test]
fn test_discovery_through_the_beacon() {
    let discovery = free_udp_port();
    let mut config = broker_config(PortConfig {
        source: 0,
        sink: 0,
        discovery,
    });
    config.broker.beacon_enabled = true;
    config.broker.beacon_target = LOCALHOST;
    config.broker.beacon_interval_ms = 50;
    let broker = Broker::bind(&config).unwrap().spawn().unwrap();

    let comm = Communicator::with_config(
        broker.ports(),
        ClientConfig {
            broker: None,
            discovery_timeout_ms: 2000,
            ..ClientConfig::default()
        },
    );
    assert_eq!(comm.resolve().unwrap(), LOCALHOST);

    let receiver = Receiver::new(&comm, &["found"]).unwrap();
    let mut sender = Sender::new(&comm, "found").unwrap();
    sender.send(json!("it")).unwrap();
    assert_eq!(receiver.recv(Some(Duration::from_secs(2))), Some(json!("it")));
}
