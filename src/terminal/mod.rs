//! Payment terminal SDK surface
//!
//! The physical terminal is driven through a vendor session API that is
//! synchronous from the terminal's point of view: a transaction call blocks
//! the calling thread and invokes callbacks mid-transaction to request
//! cardholder or cashier input. This module models that surface as the
//! `TerminalSession` / `TerminalCallbacks` trait pair; the gateway never
//! depends on a concrete driver.
//!
//! `sim` provides the in-tree scripted implementation used by the
//! `simulated` driver and the tests.

pub mod sim;

use std::fmt;
use std::time::Duration;

// =============================================================================
// SDK enumerations
// =============================================================================

/// Status code returned by every SDK setup/command call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    /// No more data for the requested item (end of batch, no last transaction)
    NoTerminalData,
    Busy,
    CommunicationError,
    BadDataFormat,
    LibraryError,
}

impl DeviceStatus {
    /// SDK status name, used verbatim as `Response.status`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ECR_OK",
            Self::NoTerminalData => "ECR_NO_TERMINAL_DATA",
            Self::Busy => "ECR_BUSY",
            Self::CommunicationError => "ECR_COMMUNICATION_ERROR",
            Self::BadDataFormat => "ECR_BAD_DATA_FORMAT",
            Self::LibraryError => "ECR_LIB_ERROR",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Terminal-reported lifecycle state, read before and between transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    ReadyForNew,
    ReconciliationNeeded,
    BatchCompleted,
    Busy,
    AppError,
    Unknown,
    /// A previous transaction is still in flight on the terminal
    InProgress,
}

impl TerminalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadyForNew => "STATUS_READY_FOR_NEW_TRAN",
            Self::ReconciliationNeeded => "STATUS_RECONCILIATION_NEEDED",
            Self::BatchCompleted => "STATUS_BATCH_COMPLETED",
            Self::Busy => "STATUS_BUSY",
            Self::AppError => "STATUS_APP_ERROR",
            Self::Unknown => "STATUS_UNKNOWN",
            Self::InProgress => "STATUS_TRANS_IN_PROGRESS",
        }
    }
}

/// Terminal-reported outcome of a completed transaction
///
/// Everything except `Accepted` is a normal business outcome, not a
/// software fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResult {
    Accepted,
    Refused,
    NoConnection,
    InterruptedByUser,
}

impl TransactionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "RESULT_TRANS_ACCEPTED",
            Self::Refused => "RESULT_TRANS_REFUSED",
            Self::NoConnection => "RESULT_NO_CONNECTION",
            Self::InterruptedByUser => "RESULT_TRANS_INTERRUPTED_BY_USER",
        }
    }
}

/// Transaction type selected before start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Sale,
    Refund,
    Reversal,
    Reconcile,
    TestConnection,
    /// Update from the terminal management system
    Tms,
}

/// Typed, identified field within the terminal's result data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagId {
    AppPreferredName,
    TransactionNumber,
    MaskedPan,
    TransactionType,
    OriginalTransactionType,
    AuthorizationType,
}

impl TagId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppPreferredName => "TAG_APP_PREFERRED_NAME",
            Self::TransactionNumber => "TAG_TRANSACTION_NUMBER",
            Self::MaskedPan => "TAG_MASKED_PAN",
            Self::TransactionType => "TAG_TRANSACTION_TYPE",
            Self::OriginalTransactionType => "TAG_ORIGINAL_TRANSACTION_TYPE",
            Self::AuthorizationType => "TAG_AUTHORIZATION_TYPE",
        }
    }
}

// =============================================================================
// SDK errors
// =============================================================================

/// Fault reported by the SDK surface, distinct from business outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The requested tag is absent from the result data
    MissingTag(TagId),
    /// The tag bytes did not decode with the terminal's text encoding
    TagEncoding(TagId),
    /// Printout preparation failed
    Printout(String),
    /// A setup/command call returned a non-OK status
    Sdk {
        status: DeviceStatus,
        stage: &'static str,
    },
}

impl std::error::Error for DeviceError {}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTag(tag) => write!(f, "tag {} not present", tag.as_str()),
            Self::TagEncoding(tag) => write!(f, "tag {} failed to decode", tag.as_str()),
            Self::Printout(reason) => write!(f, "printout failed: {}", reason),
            Self::Sdk { status, stage } => {
                write!(f, "{} during {}", status.as_str(), stage)
            }
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

// =============================================================================
// Session trait
// =============================================================================

/// One physical terminal session
///
/// At most one transaction-shaped operation may be in flight at a time;
/// the SDK exposes no internal locking, so the caller serializes access.
/// `start_transaction` and `continue_transaction` block for the entire
/// cardholder/host interaction and may invoke the supplied callbacks.
pub trait TerminalSession: Send {
    /// Establish the link to the physical terminal
    fn open_link(&mut self, ip: &str, port: u16, timeout: Duration) -> DeviceStatus;

    /// One-shot setup: cash register id, request handling mode
    fn configure(&mut self, cash_register_id: &str) -> DeviceStatus;

    /// Quick liveness probe; `None` means the terminal is unreachable
    fn link_status(&mut self) -> Option<DeviceStatus>;

    /// Current terminal state; `None` on a dead link
    fn read_terminal_status(&mut self) -> Option<TerminalStatus>;

    fn set_transaction_type(&mut self, ty: TransactionType) -> DeviceStatus;
    fn set_transaction_amount(&mut self, amount: &str) -> DeviceStatus;
    /// Terminal-assigned number of the transaction to reverse
    fn set_reversal_reference(&mut self, transaction_id: &str) -> DeviceStatus;
    /// Reset the pending reconciliation report flag
    fn set_reset_report(&mut self, reset: bool) -> DeviceStatus;

    /// Run the prepared transaction to completion (blocking)
    fn start_transaction(&mut self, callbacks: &mut dyn TerminalCallbacks) -> DeviceStatus;
    /// Let an in-flight transaction finish naturally (blocking)
    fn continue_transaction(&mut self, callbacks: &mut dyn TerminalCallbacks) -> DeviceStatus;
    /// Best-effort abort of whatever is in flight
    fn cancel_transaction(&mut self) -> DeviceStatus;

    /// Outcome of the last started/continued transaction, if any
    fn read_transaction_result(&mut self) -> Option<TransactionResult>;

    fn read_tag(&mut self, tag: TagId) -> DeviceResult<String>;
    fn read_currency_label(&mut self) -> DeviceResult<String>;
    fn read_transaction_amount(&mut self) -> DeviceResult<String>;
    fn read_transaction_date(&mut self) -> DeviceResult<String>;
    fn read_transaction_time(&mut self) -> DeviceResult<String>;

    /// Load the terminal's last completed transaction into the tag view
    fn last_transaction_data(&mut self) -> DeviceStatus;

    /// Select a batch entry by 1-based index
    fn set_batch_index(&mut self, index: u32) -> DeviceStatus;
    /// Load the selected batch entry; `NoTerminalData` past the end
    fn fetch_batch_entry(&mut self) -> DeviceStatus;
    fn batch_summary(&mut self) -> DeviceStatus;

    /// Receipt lines for the merchant copy
    fn merchant_printout(&mut self) -> DeviceResult<Vec<String>>;
    /// Receipt lines for the customer copy
    fn customer_printout(&mut self) -> DeviceResult<Vec<String>>;
}

// =============================================================================
// Callback trait
// =============================================================================

/// Capability set invoked by the session mid-transaction
///
/// Prompt methods that return `Option` use `None` for "no answer possible"
/// (client gone); the session treats that as a decline/abort.
pub trait TerminalCallbacks: Send {
    /// Diagnostic line from the SDK's device/comm/business logs
    fn handle_log(&mut self, line: &str);

    /// Fire-and-forget terminal state notice
    fn handle_status_change(&mut self, status: TerminalStatus);

    /// Cardholder signature confirmation; the merchant receipt is fetched
    /// from the session for display at the till
    fn ask_for_signature(&mut self, session: &mut dyn PrintoutSource, prompt: &str) -> bool;

    /// Print-another-copy confirmation
    fn ask_for_copy(&mut self, prompt: &str) -> bool;

    /// Pick a currency; returns the selected option index
    fn ask_for_currency(&mut self, options: &[String]) -> Option<usize>;

    /// Generic selection screen; returns the selected option index
    fn ask_for_selection(&mut self, options: &[String], prompt: &str) -> Option<usize>;

    /// Present-card screen; returning true continues the transaction
    fn wait_for_card(&mut self, prompt: &str) -> bool;

    /// Remove-card screen, informational only
    fn wait_for_card_removal(&mut self, prompt: &str);

    /// PIN-entry screen; returning true continues the transaction
    fn wait_for_pin(&mut self, prompt: &str) -> bool;

    /// Message screen acknowledged with OK
    fn show_ok_screen(&mut self, prompt: &str);

    /// Yes/No confirmation screen
    fn show_yes_no_screen(&mut self, prompt: &str) -> bool;

    /// Transient message screen, no acknowledgement
    fn show_prompt_screen(&mut self, prompt: &str);

    /// Cashback amount entry; `None` declines cashback
    fn get_cashback_amount(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
    ) -> Option<String>;

    /// Voice-authorization code entry
    fn get_authorization_code(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
    ) -> Option<String>;

    /// Free-text entry validated character-by-character by the SDK;
    /// the implementation re-prompts until every character is allowed
    fn get_user_data(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
        is_char_allowed: &dyn Fn(char) -> bool,
    ) -> Option<String>;

    /// Free-form amount entry
    fn get_amount(&mut self, prompt: &str, min_length: usize, max_length: usize)
        -> Option<String>;
}

/// Receipt access handed to callbacks that display printouts while the
/// session itself is mid-transaction
pub trait PrintoutSource {
    fn merchant_printout(&mut self) -> DeviceResult<Vec<String>>;
}
