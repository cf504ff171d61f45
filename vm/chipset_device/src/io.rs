// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Port IO and PCI config space access results.

/// An error related to the suitability of the IO request for the device. A
/// device should handle device-specific errors internally, and should return
/// `IoResult::Ok` in these conditions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The requested device register is not present.
    InvalidRegister,
    /// The access length is invalid for the specified address.
    InvalidAccessSize,
    /// The caller attempted to perform an unaligned access to the device
    /// registers.
    UnalignedAccess,
}

/// The result returned by a device IO (port IO or PCI config space)
/// operation.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum IoResult {
    /// The IO operation succeeded.
    Ok,
    /// The IO operation failed due to an access error.
    ///
    /// The caller should log the failure, then ignore writes, and fill the
    /// buffer with an appropriate bus-specific error value on reads. e.g. For
    /// port IO this value is typically `!0`, while for PCI config space the
    /// value is typically `0`.
    Err(IoError),
}

impl IoResult {
    /// Asserts if `self` is not `IoResult::Ok`.
    #[track_caller]
    pub fn unwrap(self) {
        match self {
            IoResult::Ok => {}
            IoResult::Err(_) => panic!("unexpected IO result {:?}", self),
        }
    }

    /// Converts `self` to a `Result<(), IoError>`.
    pub fn into_result(self) -> Result<(), IoError> {
        match self {
            IoResult::Ok => Ok(()),
            IoResult::Err(e) => Err(e),
        }
    }
}
