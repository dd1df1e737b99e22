//! Transaction outcome recovery
//!
//! Entered before every sale/refund/reversal. When the previous attempt
//! ended ambiguously (dead socket, busy terminal) the terminal must be
//! interrogated before any new money movement: starting a fresh
//! transaction over an unresolved one risks charging the cardholder twice.

use crate::constants::{RECOVERY_BACKOFF_MS, RECOVERY_MAX_ATTEMPTS};
use crate::device::{device_error_response, STATUS_TERMINAL_CONNECTION_ERROR};
use crate::protocol::Response;
use crate::terminal::{DeviceResult, TagId, TerminalSession, TerminalStatus};
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Identity of a completed transaction as the terminal reports it
///
/// Saved right after every completed attempt; matching it against the
/// terminal's last-transaction record is what distinguishes "already
/// settled" from "never happened".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIdentity {
    pub number: String,
    pub date: String,
    pub time: String,
}

impl TransactionIdentity {
    /// Read the identity from the session's current tag view
    pub fn read(session: &mut dyn TerminalSession) -> DeviceResult<Self> {
        Ok(Self {
            number: session.read_tag(TagId::TransactionNumber)?,
            date: session.read_transaction_date()?,
            time: session.read_transaction_time()?,
        })
    }
}

/// Decision produced by the pre-transaction check
pub enum Preflight {
    /// Safe to start a fresh transaction
    Proceed,
    /// Not safe; the response explains why
    Refuse(Response),
    /// The terminal is still mid-transaction; drive it to completion
    ContinueInFlight,
}

/// Check whether a new transaction may start
///
/// Retries the status read a bounded number of times with backoff; every
/// other state is acted on immediately.
pub fn preflight(
    session: &mut dyn TerminalSession,
    saved: &Mutex<Option<TransactionIdentity>>,
    retry: bool,
) -> Preflight {
    for attempt in 0..RECOVERY_MAX_ATTEMPTS {
        let Some(status) = session.read_terminal_status() else {
            warn!(
                "terminal status unreadable (attempt {}/{})",
                attempt + 1,
                RECOVERY_MAX_ATTEMPTS
            );
            thread::sleep(Duration::from_millis(RECOVERY_BACKOFF_MS));
            continue;
        };

        return match status {
            TerminalStatus::ReadyForNew if !retry => Preflight::Proceed,
            TerminalStatus::ReadyForNew => resolve_retry(session, saved),
            TerminalStatus::InProgress => {
                info!("terminal still mid-transaction, continuing it");
                Preflight::ContinueInFlight
            }
            blocked => Preflight::Refuse(Response::error_with_status(
                blocked_prompt(blocked),
                blocked.as_str(),
            )),
        };
    }

    Preflight::Refuse(Response::error_with_status(
        "Unable to read terminal status.",
        STATUS_TERMINAL_CONNECTION_ERROR,
    ))
}

/// A retry reached a ready terminal: decide whether the original attempt
/// actually settled
fn resolve_retry(
    session: &mut dyn TerminalSession,
    saved: &Mutex<Option<TransactionIdentity>>,
) -> Preflight {
    let status = session.last_transaction_data();
    if !status.is_ok() {
        return Preflight::Refuse(Response::error_with_status(
            "Unable to verify previous transaction outcome.",
            status.as_str(),
        ));
    }

    let current = match TransactionIdentity::read(session) {
        Ok(identity) => identity,
        Err(e) => return Preflight::Refuse(device_error_response(&e)),
    };

    let matches_saved = saved
        .lock()
        .as_ref()
        .map(|known| *known == current)
        .unwrap_or(false);

    if matches_saved {
        // The terminal's last transaction is the one we already recorded:
        // the prior attempt settled. Resubmitting would double-charge.
        info!(
            "retry matches settled transaction {} - refusing resubmission",
            current.number
        );
        Preflight::Refuse(Response::error_with_status(
            "Previous transaction already completed - not resubmitting.",
            "TK_TRANSACTION_ALREADY_COMPLETED",
        ))
    } else {
        Preflight::Refuse(Response::error_with_status(
            "Previous transaction outcome unknown.",
            "TK_UNRESOLVED_TRANSACTION",
        ))
    }
}

fn blocked_prompt(status: TerminalStatus) -> &'static str {
    match status {
        TerminalStatus::ReconciliationNeeded => {
            "Terminal requires reconciliation before a new transaction."
        }
        TerminalStatus::BatchCompleted => {
            "Terminal batch must be read before a new transaction."
        }
        TerminalStatus::Busy => "Terminal is busy.",
        TerminalStatus::AppError => "Terminal application error.",
        TerminalStatus::Unknown => "Terminal state is unknown.",
        // Handled before this point; named for completeness
        TerminalStatus::ReadyForNew | TerminalStatus::InProgress => "Terminal not ready.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::sim::{SimTransaction, SimulatedTerminal};

    fn saved(identity: Option<TransactionIdentity>) -> Mutex<Option<TransactionIdentity>> {
        Mutex::new(identity)
    }

    #[test]
    fn test_ready_and_not_retry_proceeds() {
        let mut sim = SimulatedTerminal::new();
        let preflight = preflight(&mut sim, &saved(None), false);
        assert!(matches!(preflight, Preflight::Proceed));
    }

    #[test]
    fn test_blocked_state_refuses_with_status_name() {
        let mut sim = SimulatedTerminal::new()
            .with_statuses(vec![TerminalStatus::ReconciliationNeeded]);
        let probe = sim.probe();

        let preflight = preflight(&mut sim, &saved(None), false);
        let Preflight::Refuse(response) = preflight else {
            panic!("expected refusal");
        };
        assert_eq!(
            response.status.as_deref(),
            Some("STATUS_RECONCILIATION_NEEDED")
        );
        // set-transaction-type was never touched
        assert_eq!(probe.set_types(), 0);
    }

    #[test]
    fn test_retry_with_matching_identity_refuses_resubmission() {
        let mut sim = SimulatedTerminal::new()
            .with_last_transaction(SimTransaction::default().with_number("000123"));
        let probe = sim.probe();

        let known = TransactionIdentity {
            number: "000123".to_string(),
            date: "2026-08-29".to_string(),
            time: "12:00:00".to_string(),
        };

        let preflight = preflight(&mut sim, &saved(Some(known)), true);
        let Preflight::Refuse(response) = preflight else {
            panic!("expected refusal");
        };
        assert_eq!(
            response.status.as_deref(),
            Some("TK_TRANSACTION_ALREADY_COMPLETED")
        );
        assert_eq!(probe.starts(), 0, "must not resubmit a settled transaction");
    }

    #[test]
    fn test_retry_with_unknown_identity_reports_no_new_information() {
        let mut sim = SimulatedTerminal::new()
            .with_last_transaction(SimTransaction::default().with_number("000999"));

        let known = TransactionIdentity {
            number: "000123".to_string(),
            date: "2026-08-29".to_string(),
            time: "12:00:00".to_string(),
        };

        let preflight = preflight(&mut sim, &saved(Some(known)), true);
        let Preflight::Refuse(response) = preflight else {
            panic!("expected refusal");
        };
        assert_eq!(
            response.status.as_deref(),
            Some("TK_UNRESOLVED_TRANSACTION")
        );
    }

    #[test]
    fn test_in_progress_requests_continuation() {
        let mut sim =
            SimulatedTerminal::new().with_statuses(vec![TerminalStatus::InProgress]);
        let preflight = preflight(&mut sim, &saved(None), true);
        assert!(matches!(preflight, Preflight::ContinueInFlight));
    }
}
