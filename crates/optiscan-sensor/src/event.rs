//! Application events derived from module responses.

use bytes::Bytes;

use optiscan_core::{ConfirmationCode, SystemParameters};
use optiscan_protocol::Packet;

use crate::reader::MultiPacketResponse;

/// Result of a successful `Search` or `Match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchInfo {
    /// Library page that matched. `None` for a one-to-one `Match`.
    pub page_id: Option<u16>,

    /// `page_id` shifted by the configured template id base.
    pub template_id: Option<u16>,

    pub score: u16,
}

/// Outcome of a completed enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentResult {
    pub template_id: u16,

    /// The finger already matched a stored template.
    pub duplicate: bool,

    /// Attempts taken from the procedure budget, including the one that succeeded.
    pub attempts: u8,
}

/// What happened, with the payload that belongs to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CommandOk,
    ImageCaptured,
    FeatureExtracted,
    MatchFound(MatchInfo),
    ModelCreated,
    TemplateStored,
    TemplateDeleted,
    LibraryCleared,
    TemplateLoaded,
    TemplateUploaded(Bytes),
    TemplateCount(u16),
    SystemParameters(SystemParameters),
    PasswordVerified,
    EnrollComplete(EnrollmentResult),

    NoFinger,
    MatchFailed,
    /// The two captures of an enrollment did not combine.
    EnrollMismatch,
    DuplicateFinger,
    ImageFailed,
    PasswordRejected,
    BadLocation,
    FlashError,
    /// Any other failure, including codes this driver does not know.
    Error,

    EnrollFailed,
    VerifyFailed,
    SearchFailed,
    DeleteFailed,
}

impl EventKind {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::CommandOk
                | Self::ImageCaptured
                | Self::FeatureExtracted
                | Self::MatchFound(_)
                | Self::ModelCreated
                | Self::TemplateStored
                | Self::TemplateDeleted
                | Self::LibraryCleared
                | Self::TemplateLoaded
                | Self::TemplateUploaded(_)
                | Self::TemplateCount(_)
                | Self::SystemParameters(_)
                | Self::PasswordVerified
                | Self::EnrollComplete(_)
        )
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommandOk => "command_ok",
            Self::ImageCaptured => "image_captured",
            Self::FeatureExtracted => "feature_extracted",
            Self::MatchFound(_) => "match_found",
            Self::ModelCreated => "model_created",
            Self::TemplateStored => "template_stored",
            Self::TemplateDeleted => "template_deleted",
            Self::LibraryCleared => "library_cleared",
            Self::TemplateLoaded => "template_loaded",
            Self::TemplateUploaded(_) => "template_uploaded",
            Self::TemplateCount(_) => "template_count",
            Self::SystemParameters(_) => "system_parameters",
            Self::PasswordVerified => "password_verified",
            Self::EnrollComplete(_) => "enroll_complete",
            Self::NoFinger => "no_finger",
            Self::MatchFailed => "match_failed",
            Self::EnrollMismatch => "enroll_mismatch",
            Self::DuplicateFinger => "duplicate_finger",
            Self::ImageFailed => "image_failed",
            Self::PasswordRejected => "password_rejected",
            Self::BadLocation => "bad_location",
            Self::FlashError => "flash_error",
            Self::Error => "error",
            Self::EnrollFailed => "enroll_failed",
            Self::VerifyFailed => "verify_failed",
            Self::SearchFailed => "search_failed",
            Self::DeleteFailed => "delete_failed",
        }
    }
}

/// One application event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Confirmation code that produced the event.
    pub status: ConfirmationCode,

    /// Opcode of the command being answered.
    pub command: u8,

    /// The acknowledgment packet, when there was one.
    pub packet: Option<Packet>,

    /// Every packet of the exchange plus any assembled template.
    pub response: Option<MultiPacketResponse>,

    pub kind: EventKind,
}

impl Event {
    /// Event raised by the driver itself rather than by a module response.
    pub fn synthetic(command: u8, status: ConfirmationCode, kind: EventKind) -> Self {
        Self {
            status,
            command,
            packet: None,
            response: None,
            kind,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}
