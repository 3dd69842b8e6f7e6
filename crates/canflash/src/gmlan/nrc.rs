//! GMLAN Negative Response Codes (NRC)

use std::fmt;

/// GMLAN / KWP2000 Negative Response Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    // General NRCs
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupportedInvalidFormat,

    // Condition NRCs
    BusyRepeatRequest,
    ConditionsNotCorrectOrRequestSequenceError,
    RoutineNotCompleteOrServiceInProgress,

    // Request NRCs
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,

    // Download NRCs
    DownloadNotAccepted,
    ImproperDownloadType,
    CantDownloadToSpecifiedAddress,
    CantDownloadNumberOfBytesRequested,

    // Transfer NRCs
    TransferSuspended,
    TransferAborted,
    IllegalAddressInBlockTransfer,
    IllegalByteCountInBlockTransfer,
    IllegalBlockTransferType,
    BlockTransferDataChecksumError,

    // Response Pending
    ResponsePending,

    IncorrectByteCountDuringBlockTransfer,
    ServiceNotSupportedInActiveSession,
    SchedulerFull,
    VoltageOutOfRange,
    GeneralProgrammingFailure,
    DeviceTypeError,
    ReadyForDownload,
    DeviceControlLimitsExceeded,

    /// Unknown/reserved NRC
    Unknown(u8),
}

impl NegativeResponseCode {
    /// "Not ready yet" codes: the same request may succeed if repeated
    ///
    /// Every other code is a rejection and repeating the request is pointless.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::BusyRepeatRequest
                | Self::RoutineNotCompleteOrServiceInProgress
                | Self::ResponsePending
        )
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupportedInvalidFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrectOrRequestSequenceError,
            0x23 => Self::RoutineNotCompleteOrServiceInProgress,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x40 => Self::DownloadNotAccepted,
            0x41 => Self::ImproperDownloadType,
            0x42 => Self::CantDownloadToSpecifiedAddress,
            0x43 => Self::CantDownloadNumberOfBytesRequested,
            0x71 => Self::TransferSuspended,
            0x72 => Self::TransferAborted,
            0x74 => Self::IllegalAddressInBlockTransfer,
            0x75 => Self::IllegalByteCountInBlockTransfer,
            0x76 => Self::IllegalBlockTransferType,
            0x77 => Self::BlockTransferDataChecksumError,
            0x78 => Self::ResponsePending,
            0x79 => Self::IncorrectByteCountDuringBlockTransfer,
            0x80 => Self::ServiceNotSupportedInActiveSession,
            0x81 => Self::SchedulerFull,
            0x83 => Self::VoltageOutOfRange,
            0x85 => Self::GeneralProgrammingFailure,
            0x89 => Self::DeviceTypeError,
            0x99 => Self::ReadyForDownload,
            0xE3 => Self::DeviceControlLimitsExceeded,
            other => Self::Unknown(other),
        }
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        match nrc {
            NegativeResponseCode::GeneralReject => 0x10,
            NegativeResponseCode::ServiceNotSupported => 0x11,
            NegativeResponseCode::SubFunctionNotSupportedInvalidFormat => 0x12,
            NegativeResponseCode::BusyRepeatRequest => 0x21,
            NegativeResponseCode::ConditionsNotCorrectOrRequestSequenceError => 0x22,
            NegativeResponseCode::RoutineNotCompleteOrServiceInProgress => 0x23,
            NegativeResponseCode::RequestOutOfRange => 0x31,
            NegativeResponseCode::SecurityAccessDenied => 0x33,
            NegativeResponseCode::InvalidKey => 0x35,
            NegativeResponseCode::ExceededNumberOfAttempts => 0x36,
            NegativeResponseCode::RequiredTimeDelayNotExpired => 0x37,
            NegativeResponseCode::DownloadNotAccepted => 0x40,
            NegativeResponseCode::ImproperDownloadType => 0x41,
            NegativeResponseCode::CantDownloadToSpecifiedAddress => 0x42,
            NegativeResponseCode::CantDownloadNumberOfBytesRequested => 0x43,
            NegativeResponseCode::TransferSuspended => 0x71,
            NegativeResponseCode::TransferAborted => 0x72,
            NegativeResponseCode::IllegalAddressInBlockTransfer => 0x74,
            NegativeResponseCode::IllegalByteCountInBlockTransfer => 0x75,
            NegativeResponseCode::IllegalBlockTransferType => 0x76,
            NegativeResponseCode::BlockTransferDataChecksumError => 0x77,
            NegativeResponseCode::ResponsePending => 0x78,
            NegativeResponseCode::IncorrectByteCountDuringBlockTransfer => 0x79,
            NegativeResponseCode::ServiceNotSupportedInActiveSession => 0x80,
            NegativeResponseCode::SchedulerFull => 0x81,
            NegativeResponseCode::VoltageOutOfRange => 0x83,
            NegativeResponseCode::GeneralProgrammingFailure => 0x85,
            NegativeResponseCode::DeviceTypeError => 0x89,
            NegativeResponseCode::ReadyForDownload => 0x99,
            NegativeResponseCode::DeviceControlLimitsExceeded => 0xE3,
            NegativeResponseCode::Unknown(v) => v,
        }
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: u8 = (*self).into();
        fmt::UpperHex::fmt(&value, f)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::GeneralReject => "General reject",
            Self::ServiceNotSupported => "Service not supported",
            Self::SubFunctionNotSupportedInvalidFormat => {
                "Sub-function not supported or invalid format"
            }
            Self::BusyRepeatRequest => "Busy, repeat request",
            Self::ConditionsNotCorrectOrRequestSequenceError => {
                "Conditions not correct or request sequence error"
            }
            Self::RoutineNotCompleteOrServiceInProgress => {
                "Routine not complete or service in progress"
            }
            Self::RequestOutOfRange => "Request out of range",
            Self::SecurityAccessDenied => "Security access denied",
            Self::InvalidKey => "Invalid key",
            Self::ExceededNumberOfAttempts => "Exceeded number of attempts",
            Self::RequiredTimeDelayNotExpired => "Required time delay not expired",
            Self::DownloadNotAccepted => "Download not accepted",
            Self::ImproperDownloadType => "Improper download type",
            Self::CantDownloadToSpecifiedAddress => "Can't download to specified address",
            Self::CantDownloadNumberOfBytesRequested => {
                "Can't download number of bytes requested"
            }
            Self::TransferSuspended => "Transfer suspended",
            Self::TransferAborted => "Transfer aborted",
            Self::IllegalAddressInBlockTransfer => "Illegal address in block transfer",
            Self::IllegalByteCountInBlockTransfer => "Illegal byte count in block transfer",
            Self::IllegalBlockTransferType => "Illegal block transfer type",
            Self::BlockTransferDataChecksumError => "Block transfer data checksum error",
            Self::ResponsePending => "Request correctly received, response pending",
            Self::IncorrectByteCountDuringBlockTransfer => {
                "Incorrect byte count during block transfer"
            }
            Self::ServiceNotSupportedInActiveSession => {
                "Service not supported in active diagnostic session"
            }
            Self::SchedulerFull => "Scheduler full",
            Self::VoltageOutOfRange => "Voltage out of range",
            Self::GeneralProgrammingFailure => "General programming failure",
            Self::DeviceTypeError => "Device type error",
            Self::ReadyForDownload => "Ready for download",
            Self::DeviceControlLimitsExceeded => "Device control limits exceeded",
            Self::Unknown(v) => return write!(f, "Unknown(0x{:02X})", v),
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x21, NegativeResponseCode::BusyRepeatRequest, true)]
    #[case(0x78, NegativeResponseCode::ResponsePending, true)]
    #[case(0x22, NegativeResponseCode::ConditionsNotCorrectOrRequestSequenceError, false)]
    #[case(0x31, NegativeResponseCode::RequestOutOfRange, false)]
    #[case(0x85, NegativeResponseCode::GeneralProgrammingFailure, false)]
    #[case(0x5A, NegativeResponseCode::Unknown(0x5A), false)]
    fn test_decode(#[case] byte: u8, #[case] nrc: NegativeResponseCode, #[case] retryable: bool) {
        let decoded = NegativeResponseCode::from(byte);
        assert_eq!(decoded, nrc);
        assert_eq!(decoded.is_retryable(), retryable);
        assert_eq!(u8::from(decoded), byte);
    }

    #[test]
    fn test_display_and_hex() {
        let nrc = NegativeResponseCode::from(0x31);
        assert_eq!(nrc.to_string(), "Request out of range");
        assert_eq!(format!("0x{:02X}", nrc), "0x31");
        assert_eq!(NegativeResponseCode::Unknown(0x5A).to_string(), "Unknown(0x5A)");
    }
}
