use super::*;

#[test]
fn test_envelope_wrap_open_round_trip() {
    let msg = AgentMessage::new("tenant-1", "uuid-1", AgentAction::Status)
        .with_payload(&AgentStatus::WaitingForConf)
        .unwrap();

    let envelope = Envelope::wrap(MessageKind::Agent, &msg).unwrap();
    assert_eq!(envelope.kind, MessageKind::Agent);

    let back: AgentMessage = envelope.open().unwrap();
    assert_eq!(back, msg);
}

#[test]
fn test_envelope_open_wrong_shape_errors() {
    let envelope = Envelope {
        kind: MessageKind::Source,
        payload: b"[1, 2, 3]".to_vec(),
    };

    let err = envelope.open::<SourceMessage>().unwrap_err();
    assert!(err.to_string().contains("source"));
}

#[test]
fn test_agent_action_round_trip() {
    for action in [
        AgentAction::Status,
        AgentAction::Configure,
        AgentAction::AvailableAction,
        AgentAction::Meta,
        AgentAction::Schema,
    ] {
        assert_eq!(AgentAction::parse(action.as_str()), Some(action));
    }
    assert_eq!(AgentAction::parse("reboot"), None);
}

#[test]
fn test_source_action_round_trip() {
    for action in [
        SourceAction::Start,
        SourceAction::Stop,
        SourceAction::Restart,
        SourceAction::AvailableAction,
    ] {
        assert_eq!(SourceAction::parse(action.as_str()), Some(action));
    }
    // open-ended actions are not part of the sealed set
    assert_eq!(SourceAction::parse("resync_table"), None);
}

#[test]
fn test_sink_action_round_trip() {
    for action in [SinkAction::Start, SinkAction::Stop, SinkAction::Flush] {
        assert_eq!(SinkAction::parse(action.as_str()), Some(action));
    }
    assert_eq!(SinkAction::parse("compact"), None);
}

#[test]
fn test_statuses_serialize_snake_case() {
    assert_eq!(
        serde_json::to_string(&AgentStatus::WaitingForConf).unwrap(),
        "\"waiting_for_conf\""
    );
    assert_eq!(
        serde_json::to_string(&SourceStatus::WaitingForMeta).unwrap(),
        "\"waiting_for_meta\""
    );
    assert_eq!(
        serde_json::to_string(&SinkStatus::OnError).unwrap(),
        "\"on_error\""
    );
}

#[test]
fn test_source_message_defaults() {
    // token and payload are optional on the wire
    let msg: SourceMessage =
        serde_json::from_str(r#"{"name": "s1", "action": "start"}"#).unwrap();
    assert_eq!(msg.name, "s1");
    assert_eq!(msg.action, "start");
    assert!(msg.token.is_empty());
    assert!(msg.payload.is_null());
}

#[test]
fn test_envelope_kind_on_wire() {
    let envelope = Envelope {
        kind: MessageKind::Sink,
        payload: Vec::new(),
    };
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["type"], "sink");
}
