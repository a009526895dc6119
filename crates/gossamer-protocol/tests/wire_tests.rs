use gossamer_protocol::*;

fn sample_task() -> Task {
    Task::new(
        Address::new("tcp://127.0.0.1:6000"),
        Some(Address::new("tcp://127.0.0.1:6001")),
        vec!["sum".into()],
        serde_json::json!({"random": 17}),
    )
}

#[test]
fn test_task_roundtrip_through_envelope() {
    let task = sample_task();
    let env = Envelope::with_payload(
        &task.sender,
        MessageTag::Json.as_str(),
        &TaskMessage { task: task.clone() },
    )
    .unwrap();

    let frame = encode_frame(&env, WireFormat::Envelope).unwrap();
    let decoded = decode_frame(&frame).unwrap();
    let back = decoded.decode_payload::<TaskMessage>().unwrap().task;

    assert_eq!(back, task, "decoded task must match in every field");
    assert_eq!(decoded.sender, Some(task.sender.clone()));
}

#[test]
fn test_completed_task_roundtrip_keeps_results() {
    let mut task = sample_task();
    task.status = TaskStatus::Complete;
    task.completed_by = Some(Address::new("tcp://127.0.0.1:6001"));
    task.results = Some("sum=17".into());

    let env = Envelope::with_payload(&task.sender, "JSON", &TaskMessage { task: task.clone() }).unwrap();
    let back = decode_frame(&encode_frame(&env, WireFormat::Envelope).unwrap())
        .unwrap()
        .decode_payload::<TaskMessage>()
        .unwrap()
        .task;
    assert_eq!(back, task);
}

#[test]
fn test_decode_autodetects_legacy_frames() {
    let env = decode_frame("GROUP=['tcp://127.0.0.1:6000', 'tcp://127.0.0.1:6001']").unwrap();
    assert_eq!(env.message_tag(), Some(MessageTag::Group));
    assert!(env.sender.is_none(), "legacy frames carry no sender");
    let group: GroupAnnouncement = env.decode_payload().unwrap();
    assert_eq!(group.peers.len(), 2);
}

#[test]
fn test_legacy_and_envelope_frames_agree() {
    let peers = vec![
        Address::new("tcp://127.0.0.1:6000"),
        Address::new("tcp://127.0.0.1:6001"),
    ];
    let env = Envelope::with_payload(&peers[0], "GROUP", &GroupAnnouncement { peers: peers.clone() }).unwrap();

    let legacy = encode_frame(&env, WireFormat::Legacy).unwrap();
    let modern = encode_frame(&env, WireFormat::Envelope).unwrap();

    let from_legacy: GroupAnnouncement = decode_frame(&legacy).unwrap().decode_payload().unwrap();
    let from_modern: GroupAnnouncement = decode_frame(&modern).unwrap().decode_payload().unwrap();
    assert_eq!(from_legacy, from_modern);
}

#[test]
fn test_garbage_frame_rejected() {
    assert!(decode_frame("tcp://127.0.0.1:6000 gave 12").is_err());
    assert!(decode_frame("").is_err());
}

#[test]
fn test_window_health_arithmetic() {
    let mut joins = StatusWindow::filled(DEFAULT_WINDOW_CAPACITY, true);
    assert_eq!(joins.ratio(false), 0.0);
    for _ in 0..50 {
        joins.push(false);
    }
    assert!((joins.ratio(false) - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_default_damage_is_tenth_of_window() {
    assert_eq!(default_new_peer_damage(100), 10);
    assert_eq!(default_new_peer_damage(5), 1);
}
