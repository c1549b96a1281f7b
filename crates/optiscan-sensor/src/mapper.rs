//! Confirmation code to event mapping.
//!
//! [`StatusMapper::map`] is total: every code, known or not, produces
//! exactly one event. Success codes are interpreted per command; failure
//! codes map the same way whatever the command was, so `0x08`/`0x09`
//! always read as a failed match.
//!
//! Payload offsets (after the confirmation code, big-endian):
//!
//! | Command       | Bytes  | Field                 |
//! |---------------|--------|-----------------------|
//! | `Search`      | 0..2   | page id               |
//! | `Search`      | 2..4   | score                 |
//! | `Match`       | 0..2   | score                 |
//! | `TemplateNum` | 0..2   | stored template count |
//! | `ReadSysPara` | 0..16  | system parameters     |

use tracing::{debug, warn};

use optiscan_core::{ConfirmationCode, SystemParameters};
use optiscan_protocol::{Opcode, Packet};

use crate::event::{Event, EventKind, MatchInfo};
use crate::reader::MultiPacketResponse;

/// Turns acknowledgments into [`Event`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMapper {
    template_id_base: u16,
}

impl StatusMapper {
    /// `template_id_base` is added to library page ids in match events.
    pub fn new(template_id_base: u16) -> Self {
        Self { template_id_base }
    }

    pub fn template_id_base(&self) -> u16 {
        self.template_id_base
    }

    /// Map the acknowledgment `ack` to the command `command`.
    ///
    /// A packet without a confirmation code (not an acknowledgment) maps to
    /// [`EventKind::Error`] with `PacketReceiveError` as the status.
    pub fn map(&self, command: u8, ack: &Packet, response: Option<MultiPacketResponse>) -> Event {
        let status = match ack.code() {
            Some(code) => ConfirmationCode::from(code),
            None => {
                warn!(packet_type = %ack.packet_type(), command, "Mapping a packet without a confirmation code");
                ConfirmationCode::PacketReceiveError
            }
        };

        let kind = if status.is_ok() && ack.code().is_some() {
            self.success_kind(command, ack.params(), response.as_ref())
        } else {
            failure_kind(status)
        };

        debug!(command, %status, event = kind.name(), "Mapped response");

        Event {
            status,
            command,
            packet: Some(ack.clone()),
            response,
            kind,
        }
    }

    fn success_kind(
        &self,
        command: u8,
        params: &[u8],
        response: Option<&MultiPacketResponse>,
    ) -> EventKind {
        let Ok(opcode) = Opcode::try_from(command) else {
            return EventKind::CommandOk;
        };

        match opcode {
            Opcode::GenImg => EventKind::ImageCaptured,
            Opcode::Img2Tz => EventKind::FeatureExtracted,
            Opcode::RegModel => EventKind::ModelCreated,
            Opcode::Store => EventKind::TemplateStored,
            Opcode::DeletChar => EventKind::TemplateDeleted,
            Opcode::Empty => EventKind::LibraryCleared,
            Opcode::LoadChar => EventKind::TemplateLoaded,
            Opcode::VfyPwd => EventKind::PasswordVerified,
            Opcode::Search => match (be_u16(params, 0), be_u16(params, 2)) {
                (Some(page_id), Some(score)) => EventKind::MatchFound(MatchInfo {
                    page_id: Some(page_id),
                    template_id: Some(page_id.wrapping_add(self.template_id_base)),
                    score,
                }),
                _ => short_payload(opcode, params.len()),
            },
            Opcode::Match => match be_u16(params, 0) {
                Some(score) => EventKind::MatchFound(MatchInfo {
                    page_id: None,
                    template_id: None,
                    score,
                }),
                None => short_payload(opcode, params.len()),
            },
            Opcode::TemplateNum => match be_u16(params, 0) {
                Some(count) => EventKind::TemplateCount(count),
                None => short_payload(opcode, params.len()),
            },
            Opcode::ReadSysPara => match SystemParameters::from_payload(params) {
                Ok(parameters) => EventKind::SystemParameters(parameters),
                Err(_) => short_payload(opcode, params.len()),
            },
            Opcode::UpChar => match response.and_then(MultiPacketResponse::template) {
                Some(template) => EventKind::TemplateUploaded(template.clone()),
                None => {
                    warn!("Template upload acknowledged but no template was assembled");
                    EventKind::Error
                }
            },
            _ => EventKind::CommandOk,
        }
    }
}

fn failure_kind(status: ConfirmationCode) -> EventKind {
    match status {
        ConfirmationCode::NoFinger => EventKind::NoFinger,
        ConfirmationCode::NoMatch | ConfirmationCode::NotFound => EventKind::MatchFailed,
        ConfirmationCode::CombineFailed => EventKind::EnrollMismatch,
        ConfirmationCode::AlreadyExists => EventKind::DuplicateFinger,
        ConfirmationCode::ImageCaptureFailed
        | ConfirmationCode::ImageTooMessy
        | ConfirmationCode::FeatureFailed
        | ConfirmationCode::InvalidImage => EventKind::ImageFailed,
        ConfirmationCode::WrongPassword => EventKind::PasswordRejected,
        ConfirmationCode::BadLocation => EventKind::BadLocation,
        ConfirmationCode::FlashError => EventKind::FlashError,
        _ => EventKind::Error,
    }
}

fn short_payload(opcode: Opcode, len: usize) -> EventKind {
    warn!(%opcode, len, "Acknowledgment payload too short");
    EventKind::Error
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let pair = bytes.get(at..at + 2)?;
    Some(u16::from_be_bytes([pair[0], pair[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use optiscan_core::constants::DEFAULT_ADDRESS;
    use rstest::rstest;

    fn ack(code: u8, params: &[u8]) -> Packet {
        Packet::acknowledge(DEFAULT_ADDRESS, code, params)
    }

    #[rstest]
    #[case(Opcode::GenImg, EventKind::ImageCaptured)]
    #[case(Opcode::Img2Tz, EventKind::FeatureExtracted)]
    #[case(Opcode::RegModel, EventKind::ModelCreated)]
    #[case(Opcode::Store, EventKind::TemplateStored)]
    #[case(Opcode::DeletChar, EventKind::TemplateDeleted)]
    #[case(Opcode::Empty, EventKind::LibraryCleared)]
    #[case(Opcode::LoadChar, EventKind::TemplateLoaded)]
    #[case(Opcode::VfyPwd, EventKind::PasswordVerified)]
    #[case(Opcode::SoftReset, EventKind::CommandOk)]
    #[case(Opcode::AuraLedConfig, EventKind::CommandOk)]
    fn test_success_per_command(#[case] opcode: Opcode, #[case] expected: EventKind) {
        let event = StatusMapper::default().map(opcode.as_u8(), &ack(0x00, &[]), None);
        assert_eq!(event.kind, expected);
        assert_eq!(event.status, ConfirmationCode::Ok);
        assert_eq!(event.command, opcode.as_u8());
    }

    #[test]
    fn test_search_payload() {
        let mapper = StatusMapper::new(100);
        let event = mapper.map(Opcode::Search.as_u8(), &ack(0x00, &[0x00, 0x07, 0x00, 0x5A]), None);

        assert_eq!(
            event.kind,
            EventKind::MatchFound(MatchInfo {
                page_id: Some(7),
                template_id: Some(107),
                score: 90,
            })
        );
    }

    #[test]
    fn test_match_payload() {
        let event = StatusMapper::default().map(Opcode::Match.as_u8(), &ack(0x00, &[0x01, 0x2C]), None);
        assert!(matches!(
            event.kind,
            EventKind::MatchFound(MatchInfo { page_id: None, score: 300, .. })
        ));
    }

    #[test]
    fn test_short_search_payload_is_error() {
        let event = StatusMapper::default().map(Opcode::Search.as_u8(), &ack(0x00, &[0x00, 0x07]), None);
        assert_eq!(event.kind, EventKind::Error);
    }

    #[test]
    fn test_template_count() {
        let event = StatusMapper::default().map(Opcode::TemplateNum.as_u8(), &ack(0x00, &[0x00, 0x2A]), None);
        assert_eq!(event.kind, EventKind::TemplateCount(42));
    }

    #[test]
    fn test_system_parameters() {
        let payload = [
            0x00, 0x04, 0x00, 0x09, 0x00, 0xC8, 0x00, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x02,
            0x00, 0x06,
        ];
        let event = StatusMapper::default().map(Opcode::ReadSysPara.as_u8(), &ack(0x00, &payload), None);

        let EventKind::SystemParameters(parameters) = event.kind else {
            panic!("expected system parameters, got {:?}", event.kind);
        };
        assert_eq!(parameters.library_capacity, 200);
        assert_eq!(parameters.baud_rate(), 57_600);
    }

    #[test]
    fn test_upload_without_template_is_error() {
        let event = StatusMapper::default().map(Opcode::UpChar.as_u8(), &ack(0x00, &[]), None);
        assert_eq!(event.kind, EventKind::Error);
    }

    #[test]
    fn test_upload_with_template() {
        let ack = ack(0x00, &[]);
        let response = MultiPacketResponse::new(vec![ack.clone()], Some(Bytes::from_static(b"tmplFOOF")), 0);
        let event = StatusMapper::default().map(Opcode::UpChar.as_u8(), &ack, Some(response));

        assert_eq!(event.kind, EventKind::TemplateUploaded(Bytes::from_static(b"tmplFOOF")));
        assert!(event.response.is_some());
    }

    #[rstest]
    fn test_not_found_is_match_failure_for_every_command(
        #[values(0x08, 0x09)] code: u8,
        #[values(
            Opcode::GenImg,
            Opcode::Img2Tz,
            Opcode::Match,
            Opcode::Search,
            Opcode::Store,
            Opcode::LoadChar,
            Opcode::DeletChar,
            Opcode::TemplateNum,
            Opcode::ReadSysPara
        )]
        opcode: Opcode,
    ) {
        let event = StatusMapper::default().map(opcode.as_u8(), &ack(code, &[]), None);
        assert_eq!(event.kind, EventKind::MatchFailed);
    }

    #[test]
    fn test_not_found_for_unknown_command() {
        let event = StatusMapper::default().map(0xEE, &ack(0x09, &[]), None);
        assert_eq!(event.kind, EventKind::MatchFailed);
    }

    #[rstest]
    #[case(0x02, EventKind::NoFinger)]
    #[case(0x03, EventKind::ImageFailed)]
    #[case(0x06, EventKind::ImageFailed)]
    #[case(0x07, EventKind::ImageFailed)]
    #[case(0x15, EventKind::ImageFailed)]
    #[case(0x0A, EventKind::EnrollMismatch)]
    #[case(0x0B, EventKind::BadLocation)]
    #[case(0x13, EventKind::PasswordRejected)]
    #[case(0x18, EventKind::FlashError)]
    #[case(0x27, EventKind::DuplicateFinger)]
    #[case(0x01, EventKind::Error)]
    #[case(0x1F, EventKind::Error)]
    #[case(0x77, EventKind::Error)]
    fn test_failure_codes(#[case] code: u8, #[case] expected: EventKind) {
        let event = StatusMapper::default().map(Opcode::GenImg.as_u8(), &ack(code, &[]), None);
        assert_eq!(event.kind, expected);
        assert_eq!(event.status.as_u8(), code);
    }

    #[test]
    fn test_every_code_maps() {
        let mapper = StatusMapper::default();
        for code in 0..=u8::MAX {
            let event = mapper.map(Opcode::Search.as_u8(), &ack(code, &[0, 1, 0, 2]), None);
            assert_eq!(event.status.as_u8(), code);
            assert_eq!(event.kind.is_success(), code == 0x00);
        }
    }

    #[test]
    fn test_data_packet_maps_to_error() {
        let data = Packet::data(DEFAULT_ADDRESS, &[0x00, 0x01], false).unwrap();
        let event = StatusMapper::default().map(Opcode::GenImg.as_u8(), &data, None);
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.status, ConfirmationCode::PacketReceiveError);
    }
}
