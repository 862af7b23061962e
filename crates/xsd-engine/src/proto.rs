//! Wire-level types: opcodes and the error-string taxonomy.

use thiserror::Error;

/// XenStore wire opcodes, numbered per the protocol's on-wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Control = 0,
    Directory = 1,
    Read = 2,
    GetPerms = 3,
    Watch = 4,
    Unwatch = 5,
    TransactionStart = 6,
    TransactionEnd = 7,
    Introduce = 8,
    Release = 9,
    GetDomainPath = 10,
    Write = 11,
    Mkdir = 12,
    Rm = 13,
    SetPerms = 14,
    WatchEvent = 15,
    Error = 16,
    IsDomainIntroduced = 17,
    Resume = 18,
    SetTarget = 19,
    ResetWatches = 20,
    DirectoryPart = 21,
}

impl TryFrom<u32> for Opcode {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Control,
            1 => Self::Directory,
            2 => Self::Read,
            3 => Self::GetPerms,
            4 => Self::Watch,
            5 => Self::Unwatch,
            6 => Self::TransactionStart,
            7 => Self::TransactionEnd,
            8 => Self::Introduce,
            9 => Self::Release,
            10 => Self::GetDomainPath,
            11 => Self::Write,
            12 => Self::Mkdir,
            13 => Self::Rm,
            14 => Self::SetPerms,
            15 => Self::WatchEvent,
            16 => Self::Error,
            17 => Self::IsDomainIntroduced,
            18 => Self::Resume,
            19 => Self::SetTarget,
            20 => Self::ResetWatches,
            21 => Self::DirectoryPart,
            _ => return Err(()),
        })
    }
}

impl From<Opcode> for u32 {
    fn from(op: Opcode) -> Self {
        op as u32
    }
}

/// Wire error taxonomy. Each variant's `wire_str` is the null-terminated
/// XSD error string carried as an `ERROR` reply's payload.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XsdError {
    #[error("EINVAL")]
    Einval,
    #[error("ENOENT")]
    Enoent,
    #[error("ENOMEM")]
    Enomem,
    #[error("EBUSY")]
    Ebusy,
    #[error("ENOSYS")]
    Enosys,
    #[error("E2BIG")]
    E2big,
}

impl XsdError {
    /// Null-terminated XSD wire string, e.g. `b"ENOENT\0"`.
    pub fn wire_bytes(self) -> &'static [u8] {
        match self {
            Self::Einval => b"EINVAL\0",
            Self::Enoent => b"ENOENT\0",
            Self::Enomem => b"ENOMEM\0",
            Self::Ebusy => b"EBUSY\0",
            Self::Enosys => b"ENOSYS\0",
            Self::E2big => b"E2BIG\0",
        }
    }
}

impl From<xsd_ring::FrameError> for XsdError {
    fn from(err: xsd_ring::FrameError) -> Self {
        match err {
            xsd_ring::FrameError::TooBig { .. } => Self::E2big,
            // A stalled payload read means the peer never finished writing
            // the frame; there's no complete request to answer, so this
            // variant is never turned into a reply (see worker.rs).
            xsd_ring::FrameError::Stalled { .. } => Self::Einval,
        }
    }
}

impl From<xsd_store::StoreError> for XsdError {
    fn from(err: xsd_store::StoreError) -> Self {
        match err {
            // Path-too-long and allocation failure are both ENOMEM per the
            // wire error taxonomy; E2BIG is reserved for payloads that
            // overflow the ring's frame capacity (xsd_ring::FrameError).
            xsd_store::StoreError::PathTooLong | xsd_store::StoreError::AllocFailed => Self::Enomem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_through_its_wire_value() {
        for raw in 0..=21u32 {
            let op = Opcode::try_from(raw).unwrap();
            assert_eq!(u32::from(op), raw);
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(Opcode::try_from(999).is_err());
    }

    #[test]
    fn wire_bytes_are_null_terminated() {
        assert_eq!(XsdError::Enoent.wire_bytes(), b"ENOENT\0");
    }

    #[test]
    fn path_too_long_maps_to_enomem_not_e2big() {
        assert_eq!(XsdError::from(xsd_store::StoreError::PathTooLong), XsdError::Enomem);
    }

    #[test]
    fn oversized_frame_maps_to_e2big() {
        let header = xsd_ring::Header { ty: 0, req_id: 0, tx_id: 0, len: 9000 };
        let err = xsd_ring::FrameError::TooBig { header, len: 9000 };
        assert_eq!(XsdError::from(err), XsdError::E2big);
    }
}
