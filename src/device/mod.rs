//! Device session adapter
//!
//! Owns the single physical terminal session and translates each EPOS
//! operation into the SDK's call sequence. Every terminal-touching
//! operation runs under one mutex: the session has no internal locking and
//! a sale racing a batch read would corrupt it.
//!
//! While a transaction call blocks, the SDK raises callbacks that are
//! answered through the reply slot - see `callbacks`.

pub mod callbacks;
pub mod printout;
pub mod recovery;

use crate::codec;
use crate::config::CallbackPolicy;
use crate::mailbox::{ClientReply, ReplySlot};
use crate::protocol::{Request, RequestKind, Response};
use crate::terminal::{
    DeviceError, TerminalSession, TransactionResult, TransactionType,
};
use bytes::Bytes;
use callbacks::CallbackBridge;
use parking_lot::Mutex;
use recovery::{Preflight, TransactionIdentity};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Status reported when the terminal link itself is unusable
pub const STATUS_TERMINAL_CONNECTION_ERROR: &str = "TK_TERMINAL_CONNECTION_ERROR";

/// Adapter around the one terminal session
pub struct DeviceAdapter {
    session: Mutex<Box<dyn TerminalSession>>,
    reply_slot: Arc<ReplySlot>,
    /// Writer channel of the currently bound EPOS connection
    client: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    /// Last notice sent, for duplicate suppression
    last_notice: Arc<Mutex<Option<(String, Option<String>)>>>,
    /// Identity of the last completed attempt, for outcome recovery
    last_transaction: Mutex<Option<TransactionIdentity>>,
    policy: CallbackPolicy,
}

impl DeviceAdapter {
    pub fn new(session: Box<dyn TerminalSession>, policy: CallbackPolicy) -> Self {
        Self {
            session: Mutex::new(session),
            reply_slot: Arc::new(ReplySlot::new()),
            client: Arc::new(Mutex::new(None)),
            last_notice: Arc::new(Mutex::new(None)),
            last_transaction: Mutex::new(None),
            policy,
        }
    }

    /// Attach the writer channel of a fresh EPOS connection
    pub fn bind_client(&self, tx: mpsc::Sender<Bytes>) {
        *self.client.lock() = Some(tx);
        *self.last_notice.lock() = None;
        self.reply_slot.reopen();
    }

    /// The EPOS connection died; wake any blocked callback so the device
    /// session can unwind
    ///
    /// Guarded by channel identity: a stale connection's teardown must not
    /// tear down the binding of the connection that superseded it.
    pub fn client_gone(&self, tx: &mpsc::Sender<Bytes>) {
        let mut client = self.client.lock();
        let is_current = client
            .as_ref()
            .map(|current| current.same_channel(tx))
            .unwrap_or(false);
        if is_current {
            *client = None;
            self.reply_slot.close();
        }
    }

    /// Detach whichever connection is currently bound, waking any blocked
    /// callback; used when a fresh connection takes over from a wedged one
    pub fn supersede_client(&self) {
        *self.client.lock() = None;
        self.reply_slot.close();
    }

    /// Deliver the answer to the currently outstanding prompt
    pub fn deposit_reply(&self, request: Request) {
        self.reply_slot.deposit(ClientReply {
            value: request.value,
        });
    }

    /// Run one EPOS operation to completion (blocking)
    pub fn handle(&self, request: &Request) -> Response {
        let mut session = self.session.lock();
        let session = &mut **session;

        if session.link_status().is_none() {
            return Response::error_with_status(
                "Terminal connection not available.",
                STATUS_TERMINAL_CONNECTION_ERROR,
            );
        }

        debug!("handling {:?} request", request.kind);

        match request.kind {
            RequestKind::Sale => self.transaction(session, TransactionType::Sale, request),
            RequestKind::Refund => self.transaction(session, TransactionType::Refund, request),
            RequestKind::Reversal => self.transaction(session, TransactionType::Reversal, request),
            RequestKind::Status => terminal_state(session),
            RequestKind::Batch => printout::read_batch(session),
            RequestKind::Reconcile => self.reconcile(session),
            RequestKind::Continue => self.continue_transaction(session),
            RequestKind::Last => last_transaction(session),
            RequestKind::Test => self.test_connection(session),
            RequestKind::Update => self.update(session),
            // Routed by the dispatcher, never dispatched as operations
            RequestKind::Response | RequestKind::CloseConnection => {
                Response::error("Unknown action requested.")
            }
        }
    }

    fn bridge(&self) -> CallbackBridge {
        CallbackBridge::new(
            self.reply_slot.clone(),
            self.client.clone(),
            self.last_notice.clone(),
            self.policy.clone(),
        )
    }

    // =========================================================================
    // Money-moving operations
    // =========================================================================

    fn transaction(
        &self,
        session: &mut dyn TerminalSession,
        ty: TransactionType,
        request: &Request,
    ) -> Response {
        let mut bridge = self.bridge();

        match recovery::preflight(session, &self.last_transaction, request.retry) {
            Preflight::Proceed => {}
            Preflight::Refuse(response) => return response,
            Preflight::ContinueInFlight => {
                // Let the pending transaction finish; its outcome tells the
                // till whether the original submission went through.
                let status = session.continue_transaction(&mut bridge);
                if !status.is_ok() {
                    return Response::error_with_status(
                        "Unexpected error when continuing transaction.",
                        status.as_str(),
                    );
                }
                return self.harvest(session, "RECOVERY");
            }
        }

        let status = session.set_transaction_type(ty);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when setting transaction type.",
                status.as_str(),
            );
        }

        if ty == TransactionType::Reversal {
            let Some(reference) = request.reference_transaction_id.as_deref() else {
                return Response::error("Reversal requires a reference transaction id.");
            };
            let status = session.set_reversal_reference(reference);
            if !status.is_ok() {
                return Response::error_with_status(
                    "Unexpected error when setting transaction id.",
                    status.as_str(),
                );
            }
        }

        let Some(amount) = request.amount.as_deref() else {
            return Response::error("Transaction requires an amount.");
        };
        let status = session.set_transaction_amount(amount);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when setting transaction amount.",
                status.as_str(),
            );
        }

        let status = session.start_transaction(&mut bridge);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when starting transaction.",
                status.as_str(),
            );
        }

        // Socket death mid-transaction: the outcome stays ambiguous until the
        // next attempt's recovery check, but tell the terminal to stand down.
        if bridge.was_abandoned() || self.client.lock().is_none() {
            warn!("EPOS connection lost mid-transaction, cancelling on terminal");
            let _ = session.cancel_transaction();
        }

        self.harvest(session, op_code(ty))
    }

    /// Read the result of a completed transaction call and build the reply
    fn harvest(&self, session: &mut dyn TerminalSession, op: &'static str) -> Response {
        let Some(result) = session.read_transaction_result() else {
            // Result unavailable is a protocol-level failure, not an outcome
            return Response::error(
                "Unexpected error when reading transaction result.",
            )
            .with_status(format!("TK_{}_RESULT_ERROR", op));
        };

        // Remember the identity for recovery, whatever the outcome was
        self.save_identity(session);

        match result {
            TransactionResult::Accepted => match printout::transaction_value(session) {
                Ok(value) => Response::success()
                    .with_status(result.as_str())
                    .with_value(value),
                Err(e) => device_error_response(&e),
            },
            negative => {
                Response::error_with_status(outcome_prompt(negative), negative.as_str())
            }
        }
    }

    fn save_identity(&self, session: &mut dyn TerminalSession) {
        match TransactionIdentity::read(session) {
            Ok(identity) => *self.last_transaction.lock() = Some(identity),
            Err(e) => warn!("could not record transaction identity: {}", e),
        }
    }

    // =========================================================================
    // Maintenance operations
    // =========================================================================

    fn reconcile(&self, session: &mut dyn TerminalSession) -> Response {
        let mut bridge = self.bridge();

        if self.policy.reset_report_on_reconcile {
            let status = session.set_reset_report(true);
            if !status.is_ok() {
                return Response::error_with_status(
                    "Reconciliation error when resetting report.",
                    status.as_str(),
                );
            }
        }

        let status = session.set_transaction_type(TransactionType::Reconcile);
        if !status.is_ok() {
            return Response::error_with_status(
                "Reconciliation error when setting transaction type.",
                status.as_str(),
            );
        }

        let status = session.start_transaction(&mut bridge);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when starting transaction.",
                status.as_str(),
            );
        }

        match session.read_transaction_result() {
            None => Response::error_with_status(
                "Unexpected error when reading reconciliation result.",
                "TK_RECONCILE_RESULT_ERROR",
            ),
            Some(TransactionResult::Accepted) => Response::success(),
            Some(TransactionResult::NoConnection) => Response::error_with_status(
                "Reconciliation failed - no connection.",
                TransactionResult::NoConnection.as_str(),
            ),
            Some(other) => {
                Response::error_with_status("Reconciliation failed.", other.as_str())
            }
        }
    }

    fn continue_transaction(&self, session: &mut dyn TerminalSession) -> Response {
        let mut bridge = self.bridge();
        let status = session.continue_transaction(&mut bridge);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when continuing transaction.",
                status.as_str(),
            );
        }
        self.harvest(session, "CONTINUE")
    }

    fn test_connection(&self, session: &mut dyn TerminalSession) -> Response {
        let mut bridge = self.bridge();

        let status = session.set_transaction_type(TransactionType::TestConnection);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when setting transaction type.",
                status.as_str(),
            );
        }

        let status = session.start_transaction(&mut bridge);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when testing connection to authorisation host.",
                status.as_str(),
            );
        }

        match session.read_transaction_result() {
            None => Response::error_with_status(
                "Unexpected error when reading connection test result.",
                "TK_TEST_CONNECTION_RESULT_ERROR",
            ),
            Some(result) => Response::success().with_status(result.as_str()),
        }
    }

    fn update(&self, session: &mut dyn TerminalSession) -> Response {
        let mut bridge = self.bridge();

        let status = session.set_transaction_type(TransactionType::Tms);
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when updating terminal from TMS.",
                status.as_str(),
            );
        }

        // Fire and forget; the terminal reports progress via notices
        let _ = session.start_transaction(&mut bridge);
        Response::success()
    }
}

// =============================================================================
// Stateless operations
// =============================================================================

fn terminal_state(session: &mut dyn TerminalSession) -> Response {
    match session.read_terminal_status() {
        None => Response::error_with_status(
            "Unexpected error when getting terminal status.",
            STATUS_TERMINAL_CONNECTION_ERROR,
        ),
        Some(status) => Response::success().with_status(status.as_str()),
    }
}

fn last_transaction(session: &mut dyn TerminalSession) -> Response {
    let status = session.last_transaction_data();
    if !status.is_ok() {
        return Response::error_with_status(
            "Unexpected error when getting last transaction.",
            status.as_str(),
        );
    }

    match printout::entry_value(session, true) {
        Ok(value) => Response::success().with_value(value),
        Err(e) => device_error_response(&e),
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Operation code used in protocol-level failure statuses
fn op_code(ty: TransactionType) -> &'static str {
    match ty {
        TransactionType::Sale => "SALE",
        TransactionType::Refund => "REFUND",
        TransactionType::Reversal => "REVERSAL",
        TransactionType::Reconcile => "RECONCILE",
        TransactionType::TestConnection => "TEST_CONNECTION",
        TransactionType::Tms => "TMS",
    }
}

fn outcome_prompt(result: TransactionResult) -> &'static str {
    match result {
        TransactionResult::Accepted => "Transaction accepted.",
        TransactionResult::Refused => "Transaction refused.",
        TransactionResult::NoConnection => "No connection to authorisation host.",
        TransactionResult::InterruptedByUser => "Transaction interrupted by user.",
    }
}

/// Map an SDK fault onto the error response the EPOS understands
pub(crate) fn device_error_response(error: &DeviceError) -> Response {
    match error {
        DeviceError::MissingTag(tag) => Response::error_with_status(
            "Unexpected error when accessing tags.",
            tag.as_str(),
        ),
        DeviceError::TagEncoding(tag) => Response::error_with_status(
            "Unexpected error when decoding tags.",
            tag.as_str(),
        ),
        DeviceError::Printout(reason) => Response::error_with_status(
            "Unexpected error when getting printout.",
            reason.clone(),
        ),
        DeviceError::Sdk { status, stage } => Response::error_with_status(
            format!("Unexpected error during {}.", stage),
            status.as_str(),
        ),
    }
}

/// Encode a final reply for the writer channel
pub fn encode_reply(response: &Response) -> Bytes {
    codec::encode_final(response)
}
