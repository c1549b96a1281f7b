//! Single-step driver operations against a scripted module.

mod common;

use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;

use common::{
    Step, ack_bytes, init_tracing, record_events, spawn_module, start_sensor, system_parameters,
    test_config, upload_bytes,
};
use optiscan_core::ConfirmationCode;
use optiscan_hardware::mock::MockTransport;
use optiscan_protocol::{Command, LedColor, LedMode, Opcode, parse_one};
use optiscan_sensor::{EventKind, Sensor, SensorError, TemplateState};

#[tokio::test(start_paused = true)]
async fn test_template_count() {
    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::ack_with(Opcode::TemplateNum, 0x00, &[0x00, 0x11])],
    );

    assert_eq!(sensor.template_count().await.unwrap(), 17);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_wrong_password_is_rejected() {
    let config = optiscan_sensor::SensorConfig {
        password: 0x0102_0304,
        ..test_config()
    };
    let (sensor, module) = start_sensor(config, vec![Step::ack(Opcode::VfyPwd, 0x13)]);
    let events = record_events(&sensor);

    let result = sensor.verify_password().await;
    assert!(matches!(
        result,
        Err(SensorError::Rejected {
            command: Opcode::VfyPwd,
            code: ConfirmationCode::WrongPassword
        })
    ));

    let seen = module.finish().await;
    assert_eq!(seen[0].params(), &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(events.lock().unwrap().as_slice(), &[EventKind::PasswordRejected]);
}

#[tokio::test(start_paused = true)]
async fn test_read_system_parameters() {
    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::ack_with(Opcode::ReadSysPara, 0x00, &system_parameters(300))],
    );

    let parameters = sensor.read_system_parameters().await.unwrap();
    assert_eq!(parameters.library_capacity, 300);
    assert_eq!(parameters.system_id, 0x0009);
    assert_eq!(sensor.library_capacity().await.unwrap(), 300);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_library_and_capture() {
    let (sensor, module) = start_sensor(
        test_config(),
        vec![
            Step::ack(Opcode::Empty, 0x00),
            Step::ack(Opcode::GenImg, 0x02),
        ],
    );

    sensor.clear_library().await.unwrap();
    assert!(matches!(
        sensor.capture_image().await,
        Err(SensorError::Rejected {
            code: ConfirmationCode::NoFinger,
            ..
        })
    ));
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_execute_returns_event_for_any_command() {
    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::ack(Opcode::AuraLedConfig, 0x00)],
    );

    let event = sensor
        .execute(Command::AuraLedConfig {
            mode: LedMode::Breathing,
            speed: 0x80,
            color: LedColor::Blue,
            cycles: 0,
        })
        .await
        .unwrap();
    assert_eq!(event.kind, EventKind::CommandOk);
    assert_eq!(event.command, Opcode::AuraLedConfig.as_u8());
    assert!(event.packet.is_some());

    let seen = module.finish().await;
    assert_eq!(seen[0].params(), &[0x01, 0x80, 0x02, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn test_upload_template_with_end_packet() {
    let template: Vec<u8> = (0..300u16).map(|i| (i % 200) as u8).collect();
    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::raw(
            Opcode::UpChar,
            vec![upload_bytes(&template, 128, true)],
        )],
    );
    let events = record_events(&sensor);

    let uploaded = sensor.upload_template(1).await.unwrap();
    assert_eq!(&uploaded[..], &template[..]);
    assert_eq!(sensor.template().state().await.unwrap(), TemplateState::Complete);

    module.finish().await;
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[EventKind::TemplateUploaded(Bytes::from(template))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_upload_template_ends_on_marker() {
    let mut template = vec![0x11; 90];
    template.extend_from_slice(b"FOOF");
    let mut stream = BytesMut::from(&upload_bytes(&template, 64, false)[..]);
    // Trailing bytes after the marker are not part of the template.
    stream.extend_from_slice(&upload_bytes(b"junk", 64, false)[ack_bytes(0, &[]).len()..]);

    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::raw(Opcode::UpChar, vec![stream.freeze()])],
    );

    let uploaded = sensor.upload_template(2).await.unwrap();
    assert_eq!(uploaded.len(), 94);
    assert!(uploaded.ends_with(b"FOOF"));
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_upload_resets_template() {
    let (sensor, module) = start_sensor(test_config(), vec![Step::ack(Opcode::UpChar, 0x0D)]);

    let result = sensor.upload_template(1).await;
    assert!(matches!(
        result,
        Err(SensorError::Rejected {
            command: Opcode::UpChar,
            code: ConfirmationCode::TemplateUploadFailed
        })
    ));
    assert_eq!(sensor.template().state().await.unwrap(), TemplateState::Idle);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_recovery() {
    let (sensor, module) = start_sensor(
        test_config(),
        vec![
            Step::silent(Opcode::TemplateNum),
            Step::ack_with(Opcode::TemplateNum, 0x00, &[0x00, 0x02]),
        ],
    );

    assert!(matches!(
        sensor.template_count().await,
        Err(SensorError::Timeout { duration_ms: 500 })
    ));
    assert_eq!(sensor.template_count().await.unwrap(), 2);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_is_not_matched_to_next_command() {
    init_tracing();
    let (transport, mut handle) = MockTransport::new();
    let sensor = Sensor::start(Arc::new(transport), test_config()).unwrap();

    let module = tokio::spawn(async move {
        let written = handle.next_written().await.unwrap();
        assert_eq!(parse_one(&written).unwrap().0.code(), Some(Opcode::GenImg.as_u8()));

        // Answer just after the host gave up on the capture.
        tokio::time::sleep(Duration::from_millis(520)).await;
        handle.inject(ack_bytes(0x00, &[]));

        let written = handle.next_written().await.unwrap();
        assert_eq!(parse_one(&written).unwrap().0.code(), Some(Opcode::Img2Tz.as_u8()));
        handle.inject(ack_bytes(0x06, &[]));
        handle
    });

    assert!(matches!(
        sensor.execute(Command::GenImg).await,
        Err(SensorError::Timeout { .. })
    ));

    let event = sensor.execute(Command::Img2Tz { buffer: 1 }).await.unwrap();
    assert_eq!(event.kind, EventKind::ImageFailed);
    assert_eq!(event.status, ConfirmationCode::ImageTooMessy);

    let _handle = module.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_noise_before_acknowledgment_is_skipped() {
    let mut noisy = BytesMut::from(&[0x00, 0x13, 0xEF, 0x37][..]);
    noisy.extend_from_slice(&ack_bytes(0x00, &[0x00, 0x04]));

    let (sensor, module) = start_sensor(
        test_config(),
        vec![Step::raw(Opcode::TemplateNum, vec![noisy.freeze()])],
    );

    assert_eq!(sensor.template_count().await.unwrap(), 4);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_receiver() {
    init_tracing();
    let (transport, handle) = MockTransport::new();
    let sensor = Sensor::start(Arc::new(transport), test_config()).unwrap();

    handle.disconnect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!sensor.is_running());
    assert!(matches!(
        sensor.template_count().await,
        Err(SensorError::Shutdown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_surfaces_transport_error() {
    init_tracing();
    let (transport, handle) = MockTransport::new();
    let sensor = Sensor::start(Arc::new(transport), test_config()).unwrap();
    handle.fail_next_write();

    assert!(matches!(
        sensor.template_count().await,
        Err(SensorError::Transport(_))
    ));

    let module = spawn_module(
        handle,
        vec![Step::ack_with(Opcode::TemplateNum, 0x00, &[0x00, 0x01])],
    );
    assert_eq!(sensor.template_count().await.unwrap(), 1);
    module.finish().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown() {
    let (sensor, module) = start_sensor(test_config(), Vec::new());
    assert!(sensor.is_running());

    sensor.shutdown().await.unwrap();
    module.finish().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let (transport, _handle) = MockTransport::new();
    let config = optiscan_sensor::SensorConfig {
        read_timeout_ms: 0,
        ..test_config()
    };

    let result = Sensor::start(Arc::new(transport), config);
    assert!(matches!(result, Err(SensorError::Config(_))));
}
