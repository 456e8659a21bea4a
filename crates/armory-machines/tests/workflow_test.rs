//! End-to-end tests: board frames in, relay commands and announcements out.
//!
//! A real HardwareManager with mock transports feeds the monitor, which
//! reports to the orchestrator and its machines. Relay commands travel the
//! paced queue back to the mocks.

use std::sync::Arc;
use std::time::Duration;

use armory_core::config::RelayLayout;
use armory_core::{ConnectionStatus, Endpoint, TransportKind};
use armory_hardware::HardwareManager;
use armory_hardware::mock::{MockTransport, MockTransportHandle};
use armory_machines::mock::RecordingAnnouncer;
use armory_machines::{
    AlarmState, ApplyAmmoSettings, ApplyAmmoState, Effects, MonitorCore, MonitorHandle, MonitorSettings,
    OrchestratorHandle, SystemState, forward_transport_events,
};
use armory_protocol::{RelayCommand, encode_active_report};
use bytes::Bytes;

struct System {
    cabinet: MockTransportHandle,
    control: MockTransportHandle,
    announcer: Arc<RecordingAnnouncer>,
    orchestrator: OrchestratorHandle,
    relays: RelayLayout,
    _monitor: MonitorHandle,
}

async fn system() -> System {
    let builder = HardwareManager::builder().queue_interval(Duration::from_millis(10));
    let (cabinet, cabinet_handle) =
        MockTransport::new("cabinet", TransportKind::Tcp, builder.event_sender(TransportKind::Tcp));
    let (control, control_handle) = MockTransport::new(
        "control",
        TransportKind::Serial,
        builder.event_sender(TransportKind::Serial),
    );
    let manager = Arc::new(builder.register(cabinet).unwrap().register(control).unwrap().build());
    manager.initialize().await;

    let relays = RelayLayout::default();
    let announcer = Arc::new(RecordingAnnouncer::default());
    let effects = Effects::new(manager.clone(), announcer.clone(), relays);
    let (orchestrator, _) = OrchestratorHandle::spawn(effects, ApplyAmmoSettings::default());

    let snapshot = manager.connection_status();
    let connected = |endpoint: Endpoint| snapshot.get(endpoint.id()).is_some_and(|s| s.is_connected());
    let core = MonitorCore::new(
        MonitorSettings::default(),
        connected(Endpoint::Cabinet),
        connected(Endpoint::Control),
        tokio::time::Instant::now(),
    );
    let (monitor, _) = MonitorHandle::spawn(core, orchestrator.inbox());
    monitor.start().await.unwrap();

    for kind in TransportKind::ALL {
        let events = manager.subscribe(kind).unwrap();
        tokio::spawn(forward_transport_events(events, monitor.clone()));
    }

    System {
        cabinet: cabinet_handle,
        control: control_handle,
        announcer,
        orchestrator,
        relays,
        _monitor: monitor,
    }
}

fn frame(input: u8) -> Bytes {
    Bytes::copy_from_slice(&encode_active_report(0x01, 0x00, input, 0x00, 0x00))
}

/// Let every actor and the paced queue run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn test_full_apply_cycle() {
    let sys = system().await;
    let door_closed = 0b0000_0010;

    sys.cabinet.inject(frame(door_closed)).await;
    settle().await;
    assert_eq!(sys.orchestrator.status().await.unwrap().system, SystemState::Idle);

    sys.cabinet.inject(frame(door_closed | 0b0000_0001)).await;
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Normal);
    assert_eq!(status.apply_ammo, ApplyAmmoState::Applying);
    assert_eq!(
        sys.control.sent(),
        vec![RelayCommand::close(sys.relays.apply_light.channel).encode()]
    );

    // Authorization button on the control panel.
    sys.control.inject(frame(0b0001_0000)).await;
    settle().await;
    assert_eq!(
        sys.cabinet.sent(),
        vec![RelayCommand::close(sys.relays.door_lock.channel).encode()]
    );

    sys.cabinet.inject(frame(0x00)).await;
    settle().await;
    assert_eq!(
        sys.orchestrator.status().await.unwrap().apply_ammo,
        ApplyAmmoState::DoorOpen
    );

    sys.cabinet.inject(frame(door_closed)).await;
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Idle);
    assert_eq!(status.apply_ammo, ApplyAmmoState::Idle);

    let cabinet_texts = sys.announcer.texts_for(Endpoint::Cabinet);
    assert_eq!(
        cabinet_texts,
        vec![
            "已申请，请等待授权",
            "授权通过，已开锁请打开柜门",
            "已开门，请取弹，取弹后请关闭柜门",
            "供弹完毕",
            "本次申请已结束",
        ]
    );
    assert!(
        sys.cabinet
            .sent()
            .contains(&RelayCommand::open(sys.relays.door_lock.channel).encode())
    );
}

#[tokio::test(start_paused = true)]
async fn test_key_alarm_preempts_workflow() {
    let sys = system().await;
    // Key switch closed means the key is in its resting position.
    let key_home = 0b0000_1000;

    sys.cabinet.inject(frame(key_home)).await;
    sys.cabinet.inject(frame(key_home | 0b0000_0001)).await;
    settle().await;
    assert_eq!(sys.orchestrator.status().await.unwrap().system, SystemState::Normal);

    sys.cabinet.inject(frame(0b0000_0001)).await;
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Alarm);
    assert_eq!(status.alarm, AlarmState::KeyAlarm);
    assert_eq!(status.apply_ammo, ApplyAmmoState::Idle);

    // Cancel button before the key is back: ignored.
    sys.control.inject(frame(0b0000_0100)).await;
    settle().await;
    assert_eq!(sys.orchestrator.status().await.unwrap().alarm, AlarmState::KeyAlarm);

    sys.cabinet.inject(frame(key_home | 0b0000_0001)).await;
    settle().await;
    sys.control.inject(frame(0b0000_0100)).await;
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Idle);
    assert_eq!(status.alarm, AlarmState::Idle);

    let control_texts = sys.announcer.texts_for(Endpoint::Control);
    assert_eq!(
        control_texts[control_texts.len() - 3..],
        ["钥匙开门请核实", "钥匙已复位，请取消报警", "取消报警"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_raises_monitor_alarm() {
    let sys = system().await;

    sys.control.set_status(ConnectionStatus::Error);
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Alarm);
    assert_eq!(status.alarm, AlarmState::MonitorAlarm);
    assert_eq!(sys.announcer.texts_for(Endpoint::Control), vec!["设备连接异常"]);
    assert!(sys.announcer.texts_for(Endpoint::Cabinet).is_empty());

    sys.control.set_status(ConnectionStatus::Connected);
    settle().await;
    let status = sys.orchestrator.status().await.unwrap();
    assert_eq!(status.system, SystemState::Idle);
    assert_eq!(status.alarm, AlarmState::Idle);
    // Recovery is silent.
    assert_eq!(sys.announcer.texts_for(Endpoint::Control).len(), 1);
    assert_eq!(
        sys.control.sent().last(),
        Some(&RelayCommand::open(sys.relays.control_alarm.channel).encode())
    );
}
