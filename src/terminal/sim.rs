//! Scripted in-process terminal
//!
//! Implements the full `TerminalSession` surface without hardware: terminal
//! states are served from a queue, transactions run a prompt script against
//! the supplied callbacks and settle with a canned outcome. Used by the
//! `simulated` driver for development and by the integration tests.

use super::{
    DeviceError, DeviceResult, DeviceStatus, PrintoutSource, TagId, TerminalCallbacks,
    TerminalSession, TerminalStatus, TransactionResult, TransactionType,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Script steps
// =============================================================================

/// One callback invocation performed during a simulated transaction
#[derive(Debug, Clone)]
pub enum SimPrompt {
    StatusChange(TerminalStatus),
    PromptScreen(String),
    WaitForCard(String),
    WaitForPin(String),
    WaitForCardRemoval(String),
    AskForSignature(String),
    AskForCopy(String),
    AskForCurrency(Vec<String>),
    AskForSelection {
        options: Vec<String>,
        prompt: String,
    },
    ShowOk(String),
    ShowYesNo(String),
    GetCashback {
        prompt: String,
        min: usize,
        max: usize,
    },
    GetAuthorizationCode {
        prompt: String,
        min: usize,
        max: usize,
    },
    GetUserData {
        prompt: String,
        min: usize,
        max: usize,
        allowed: fn(char) -> bool,
    },
    GetAmount {
        prompt: String,
        min: usize,
        max: usize,
    },
}

// =============================================================================
// Canned transaction data
// =============================================================================

/// Tag view for one simulated transaction
#[derive(Debug, Clone)]
pub struct SimTransaction {
    pub tags: HashMap<TagId, String>,
    pub amount: String,
    pub date: String,
    pub time: String,
    pub currency: String,
}

impl Default for SimTransaction {
    fn default() -> Self {
        let mut tags = HashMap::new();
        tags.insert(TagId::AppPreferredName, "VISA DEBIT".to_string());
        tags.insert(TagId::TransactionNumber, "000123".to_string());
        tags.insert(TagId::MaskedPan, "479275******1234".to_string());
        tags.insert(TagId::TransactionType, "1".to_string());
        tags.insert(TagId::AuthorizationType, "0".to_string());
        Self {
            tags,
            amount: "10.00".to_string(),
            date: "2026-08-29".to_string(),
            time: "12:00:00".to_string(),
            currency: "GBP".to_string(),
        }
    }
}

impl SimTransaction {
    pub fn with_number(mut self, number: &str) -> Self {
        self.tags
            .insert(TagId::TransactionNumber, number.to_string());
        self
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Shared counters and captured answers for assertions against a session
/// that is boxed away behind the adapter
#[derive(Default)]
pub struct SimProbe {
    pub start_calls: AtomicU32,
    pub continue_calls: AtomicU32,
    pub cancel_calls: AtomicU32,
    pub set_type_calls: AtomicU32,
    pub batch_summary_calls: AtomicU32,
    /// Answers the callbacks returned to the session, in order
    pub answers: Mutex<Vec<String>>,
}

impl SimProbe {
    pub fn starts(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn set_types(&self) -> u32 {
        self.set_type_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn summaries(&self) -> u32 {
        self.batch_summary_calls.load(Ordering::SeqCst)
    }

    fn record(&self, answer: impl Into<String>) {
        self.answers.lock().push(answer.into());
    }
}

// =============================================================================
// Simulated terminal
// =============================================================================

/// Scripted terminal session
pub struct SimulatedTerminal {
    link_up: bool,
    statuses: VecDeque<TerminalStatus>,
    script: Vec<SimPrompt>,
    outcome: TransactionResult,
    profile: SimTransaction,
    last_transaction: Option<SimTransaction>,
    batch_rounds: VecDeque<Vec<SimTransaction>>,
    current_round: Vec<SimTransaction>,
    batch_index: u32,

    set_type_status: DeviceStatus,
    set_amount_status: DeviceStatus,
    start_status: DeviceStatus,
    printout_fails: bool,
    undecodable_tags: Vec<TagId>,

    tx_type: Option<TransactionType>,
    amount: Option<String>,
    reversal_reference: Option<String>,
    result: Option<TransactionResult>,
    view: Option<SimTransaction>,

    probe: Arc<SimProbe>,
}

impl Default for SimulatedTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTerminal {
    pub fn new() -> Self {
        Self {
            link_up: true,
            statuses: VecDeque::from([TerminalStatus::ReadyForNew]),
            script: Vec::new(),
            outcome: TransactionResult::Accepted,
            profile: SimTransaction::default(),
            last_transaction: None,
            batch_rounds: VecDeque::new(),
            current_round: Vec::new(),
            batch_index: 0,
            set_type_status: DeviceStatus::Ok,
            set_amount_status: DeviceStatus::Ok,
            start_status: DeviceStatus::Ok,
            printout_fails: false,
            undecodable_tags: Vec::new(),
            tx_type: None,
            amount: None,
            reversal_reference: None,
            result: None,
            view: None,
            probe: Arc::new(SimProbe::default()),
        }
    }

    /// Terminal states served in order; the last one repeats
    pub fn with_statuses(mut self, statuses: Vec<TerminalStatus>) -> Self {
        self.statuses = statuses.into();
        self
    }

    pub fn with_script(mut self, script: Vec<SimPrompt>) -> Self {
        self.script = script;
        self
    }

    pub fn with_outcome(mut self, outcome: TransactionResult) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_profile(mut self, profile: SimTransaction) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_last_transaction(mut self, last: SimTransaction) -> Self {
        self.last_transaction = Some(last);
        self
    }

    /// One inner Vec per BATCH_COMPLETED round
    pub fn with_batch_rounds(mut self, rounds: Vec<Vec<SimTransaction>>) -> Self {
        self.batch_rounds = rounds.into();
        self
    }

    pub fn with_set_type_status(mut self, status: DeviceStatus) -> Self {
        self.set_type_status = status;
        self
    }

    pub fn with_start_status(mut self, status: DeviceStatus) -> Self {
        self.start_status = status;
        self
    }

    pub fn with_failing_printout(mut self) -> Self {
        self.printout_fails = true;
        self
    }

    pub fn with_undecodable_tag(mut self, tag: TagId) -> Self {
        self.undecodable_tags.push(tag);
        self
    }

    pub fn link_down(mut self) -> Self {
        self.link_up = false;
        self
    }

    pub fn probe(&self) -> Arc<SimProbe> {
        self.probe.clone()
    }

    fn run_script(&mut self, callbacks: &mut dyn TerminalCallbacks) {
        let script = std::mem::take(&mut self.script);
        for step in &script {
            self.run_step(step, callbacks);
        }
        self.script = script;
    }

    fn run_step(&mut self, step: &SimPrompt, cb: &mut dyn TerminalCallbacks) {
        match step {
            SimPrompt::StatusChange(status) => cb.handle_status_change(*status),
            SimPrompt::PromptScreen(prompt) => cb.show_prompt_screen(prompt),
            SimPrompt::WaitForCard(prompt) => {
                let cont = cb.wait_for_card(prompt);
                self.probe.record(cont.to_string());
            }
            SimPrompt::WaitForPin(prompt) => {
                let cont = cb.wait_for_pin(prompt);
                self.probe.record(cont.to_string());
            }
            SimPrompt::WaitForCardRemoval(prompt) => cb.wait_for_card_removal(prompt),
            SimPrompt::AskForSignature(prompt) => {
                let ok = cb.ask_for_signature(self, prompt);
                self.probe.record(ok.to_string());
            }
            SimPrompt::AskForCopy(prompt) => {
                let ok = cb.ask_for_copy(prompt);
                self.probe.record(ok.to_string());
            }
            SimPrompt::AskForCurrency(options) => {
                let idx = cb.ask_for_currency(options);
                self.probe
                    .record(idx.map(|i| i.to_string()).unwrap_or_else(|| "-".into()));
            }
            SimPrompt::AskForSelection { options, prompt } => {
                let idx = cb.ask_for_selection(options, prompt);
                self.probe
                    .record(idx.map(|i| i.to_string()).unwrap_or_else(|| "-".into()));
            }
            SimPrompt::ShowOk(prompt) => cb.show_ok_screen(prompt),
            SimPrompt::ShowYesNo(prompt) => {
                let yes = cb.show_yes_no_screen(prompt);
                self.probe.record(yes.to_string());
            }
            SimPrompt::GetCashback { prompt, min, max } => {
                let v = cb.get_cashback_amount(prompt, *min, *max);
                self.probe.record(v.unwrap_or_else(|| "-".into()));
            }
            SimPrompt::GetAuthorizationCode { prompt, min, max } => {
                let v = cb.get_authorization_code(prompt, *min, *max);
                self.probe.record(v.unwrap_or_else(|| "-".into()));
            }
            SimPrompt::GetUserData {
                prompt,
                min,
                max,
                allowed,
            } => {
                let v = cb.get_user_data(prompt, *min, *max, allowed);
                self.probe.record(v.unwrap_or_else(|| "-".into()));
            }
            SimPrompt::GetAmount { prompt, min, max } => {
                let v = cb.get_amount(prompt, *min, *max);
                self.probe.record(v.unwrap_or_else(|| "-".into()));
            }
        }
    }

    fn receipt(&self, copy: &str) -> DeviceResult<Vec<String>> {
        if self.printout_fails {
            return Err(DeviceError::Printout("PRINTOUT_DATA_ERROR".into()));
        }
        let view = self.view.as_ref().unwrap_or(&self.profile);
        let pan = view
            .tags
            .get(&TagId::MaskedPan)
            .cloned()
            .unwrap_or_default();
        Ok(vec![
            "CARD PAYMENT".to_string(),
            format!("{} COPY", copy),
            format!("PAN {}", pan),
            format!("AMOUNT {} {}", view.amount, view.currency),
            format!("{} {}", view.date, view.time),
        ])
    }

    fn view_tag(&self, tag: TagId) -> DeviceResult<String> {
        if self.undecodable_tags.contains(&tag) {
            return Err(DeviceError::TagEncoding(tag));
        }
        let view = self.view.as_ref().unwrap_or(&self.profile);
        view.tags
            .get(&tag)
            .cloned()
            .ok_or(DeviceError::MissingTag(tag))
    }
}

impl PrintoutSource for SimulatedTerminal {
    fn merchant_printout(&mut self) -> DeviceResult<Vec<String>> {
        self.receipt("MERCHANT")
    }
}

impl TerminalSession for SimulatedTerminal {
    fn open_link(&mut self, ip: &str, port: u16, _timeout: Duration) -> DeviceStatus {
        debug!("simulated terminal link to {}:{}", ip, port);
        if self.link_up {
            DeviceStatus::Ok
        } else {
            DeviceStatus::CommunicationError
        }
    }

    fn configure(&mut self, _cash_register_id: &str) -> DeviceStatus {
        DeviceStatus::Ok
    }

    fn link_status(&mut self) -> Option<DeviceStatus> {
        self.link_up.then_some(DeviceStatus::Ok)
    }

    fn read_terminal_status(&mut self) -> Option<TerminalStatus> {
        if !self.link_up {
            return None;
        }
        if self.statuses.len() > 1 {
            self.statuses.pop_front()
        } else {
            self.statuses.front().copied()
        }
    }

    fn set_transaction_type(&mut self, ty: TransactionType) -> DeviceStatus {
        self.probe.set_type_calls.fetch_add(1, Ordering::SeqCst);
        if self.set_type_status.is_ok() {
            self.tx_type = Some(ty);
        }
        self.set_type_status
    }

    fn set_transaction_amount(&mut self, amount: &str) -> DeviceStatus {
        if self.set_amount_status.is_ok() {
            self.amount = Some(amount.to_string());
        }
        self.set_amount_status
    }

    fn set_reversal_reference(&mut self, transaction_id: &str) -> DeviceStatus {
        self.reversal_reference = Some(transaction_id.to_string());
        DeviceStatus::Ok
    }

    fn set_reset_report(&mut self, _reset: bool) -> DeviceStatus {
        DeviceStatus::Ok
    }

    fn start_transaction(&mut self, callbacks: &mut dyn TerminalCallbacks) -> DeviceStatus {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.start_status.is_ok() {
            return self.start_status;
        }
        self.run_script(callbacks);
        let mut view = self.profile.clone();
        if let Some(amount) = &self.amount {
            view.amount = amount.clone();
        }
        self.view = Some(view);
        self.result = Some(self.outcome);
        DeviceStatus::Ok
    }

    fn continue_transaction(&mut self, callbacks: &mut dyn TerminalCallbacks) -> DeviceStatus {
        self.probe.continue_calls.fetch_add(1, Ordering::SeqCst);
        self.run_script(callbacks);
        self.view = Some(self.profile.clone());
        self.result = Some(self.outcome);
        DeviceStatus::Ok
    }

    fn cancel_transaction(&mut self) -> DeviceStatus {
        self.probe.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.result = None;
        DeviceStatus::Ok
    }

    fn read_transaction_result(&mut self) -> Option<TransactionResult> {
        self.result
    }

    fn read_tag(&mut self, tag: TagId) -> DeviceResult<String> {
        self.view_tag(tag)
    }

    fn read_currency_label(&mut self) -> DeviceResult<String> {
        Ok(self
            .view
            .as_ref()
            .unwrap_or(&self.profile)
            .currency
            .clone())
    }

    fn read_transaction_amount(&mut self) -> DeviceResult<String> {
        Ok(self.view.as_ref().unwrap_or(&self.profile).amount.clone())
    }

    fn read_transaction_date(&mut self) -> DeviceResult<String> {
        Ok(self.view.as_ref().unwrap_or(&self.profile).date.clone())
    }

    fn read_transaction_time(&mut self) -> DeviceResult<String> {
        Ok(self.view.as_ref().unwrap_or(&self.profile).time.clone())
    }

    fn last_transaction_data(&mut self) -> DeviceStatus {
        match &self.last_transaction {
            Some(last) => {
                self.view = Some(last.clone());
                DeviceStatus::Ok
            }
            None => DeviceStatus::NoTerminalData,
        }
    }

    fn set_batch_index(&mut self, index: u32) -> DeviceStatus {
        self.batch_index = index;
        DeviceStatus::Ok
    }

    fn fetch_batch_entry(&mut self) -> DeviceStatus {
        if self.current_round.is_empty() {
            match self.batch_rounds.pop_front() {
                Some(round) => self.current_round = round,
                None => return DeviceStatus::NoTerminalData,
            }
        }
        let idx = self.batch_index as usize;
        if idx == 0 || idx > self.current_round.len() {
            // Round exhausted; the next fetch starts the next round
            self.current_round = Vec::new();
            return DeviceStatus::NoTerminalData;
        }
        self.view = Some(self.current_round[idx - 1].clone());
        DeviceStatus::Ok
    }

    fn batch_summary(&mut self) -> DeviceStatus {
        self.probe.batch_summary_calls.fetch_add(1, Ordering::SeqCst);
        DeviceStatus::Ok
    }

    fn merchant_printout(&mut self) -> DeviceResult<Vec<String>> {
        self.receipt("MERCHANT")
    }

    fn customer_printout(&mut self) -> DeviceResult<Vec<String>> {
        self.receipt("CUSTOMER")
    }
}
