//! The shared PSU alert line.

use crate::error::{PsuError, PsuResult};
use crate::transport::{BusRequest, BusTransport, DeviceKind};
use psu_pmbus::CompletionCode;
use std::fmt;
use std::sync::Arc;

/// Register of the alert-line device that reports the line level.
pub const ALERT_LINE_STATUS: u8 = 0x00;

/// Reader for the wired-OR alert line all PSUs pull on a fault.
#[derive(Clone)]
pub struct AlertLine {
    transport: Arc<dyn BusTransport>,
}

impl AlertLine {
    /// Create a reader on `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self { transport }
    }

    /// True while any PSU asserts the alert line.
    ///
    /// # Errors
    ///
    /// Returns [`PsuError::AlertLine`] when the read fails or returns no data.
    pub fn is_asserted(&self) -> PsuResult<bool> {
        let request = BusRequest {
            command: ALERT_LINE_STATUS,
            payload: Vec::new(),
            response_length: 1,
        };
        let response = self
            .transport
            .send_receive(DeviceKind::PsuAlertLine, 0, &request);
        let code = response.code();
        if !code.is_success() {
            return Err(PsuError::AlertLine(code));
        }
        response
            .data
            .first()
            .map(|level| *level != 0)
            .ok_or(PsuError::AlertLine(CompletionCode::UnspecifiedError))
    }
}

impl fmt::Debug for AlertLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertLine").finish_non_exhaustive()
    }
}
