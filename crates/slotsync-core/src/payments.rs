//! Reactions to payment collaborator signals
//!
//! ```text
//! succeeded ──► payment paid,     pending   ──► confirmed
//! failed    ──► payment failed,   pending   ──► cancelled
//! refunded  ──► payment refunded, pending/confirmed ──► cancelled
//! ```
//!
//! Statuses outside those arrows keep their appointment status; only the
//! payment status moves.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::types::{Appointment, AppointmentId, AppointmentStatus, PaymentStatus};

/// Outcome reported by the payment collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSignal {
    Succeeded,
    Failed,
    Refunded,
}

impl std::fmt::Display for PaymentSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentSignal::Succeeded => write!(f, "succeeded"),
            PaymentSignal::Failed => write!(f, "failed"),
            PaymentSignal::Refunded => write!(f, "refunded"),
        }
    }
}

/// A signal keyed by the appointment it pays for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub appointment_id: AppointmentId,
    pub signal: PaymentSignal,
}

/// Apply `signal` to `appointment`. Returns whether anything changed.
pub fn apply_payment_signal(appointment: &mut Appointment, signal: PaymentSignal) -> EngineResult<bool> {
    let before = (appointment.status, appointment.payment_status);

    let (payment, next) = match signal {
        PaymentSignal::Succeeded => (PaymentStatus::Paid, Some(AppointmentStatus::Confirmed)),
        PaymentSignal::Failed => (PaymentStatus::Failed, Some(AppointmentStatus::Cancelled)),
        PaymentSignal::Refunded => (PaymentStatus::Refunded, Some(AppointmentStatus::Cancelled)),
    };

    let applies = match signal {
        PaymentSignal::Succeeded | PaymentSignal::Failed => {
            appointment.status == AppointmentStatus::Pending
        }
        PaymentSignal::Refunded => matches!(
            appointment.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        ),
    };

    appointment.payment_status = payment;
    if let Some(next) = next.filter(|_| applies) {
        appointment.transition_to(next)?;
    } else if signal == PaymentSignal::Succeeded && appointment.status == AppointmentStatus::Cancelled {
        warn!(appointment = %appointment.id, "Payment succeeded for a cancelled appointment");
    }

    let changed = before != (appointment.status, appointment.payment_status);
    debug!(
        appointment = %appointment.id,
        %signal,
        status = %appointment.status,
        changed,
        "Applied payment signal"
    );
    Ok(changed)
}
