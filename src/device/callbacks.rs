//! Callback-to-wire bridge
//!
//! The session invokes callbacks on the blocking device thread while a
//! transaction is in flight. Each interactive prompt is encoded as an
//! interim frame, pushed through the bound connection's writer channel and
//! answered via the reply slot; fire-and-forget notices skip the slot.
//!
//! When the slot has been closed (client gone) every prompt resolves to
//! its declining default so the session can unwind.

use crate::codec;
use crate::config::CallbackPolicy;
use crate::mailbox::{ClientReply, ReplySlot};
use crate::protocol::Response;
use crate::terminal::{PrintoutSource, TerminalCallbacks, TerminalStatus};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::cell::Cell;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One outbound callback channel, built per operation
pub struct CallbackBridge {
    reply_slot: Arc<ReplySlot>,
    client: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    /// (kind, prompt-or-status) of the last message sent
    last_notice: Arc<Mutex<Option<(String, Option<String>)>>>,
    policy: CallbackPolicy,
    /// Slot generation at operation start; a close during the operation
    /// invalidates every later prompt, not just the one it interrupted
    epoch: u64,
    /// Set once a prompt came back unanswered; the whole operation then
    /// unwinds on declining defaults without touching the wire again
    abandoned: Cell<bool>,
}

impl CallbackBridge {
    pub fn new(
        reply_slot: Arc<ReplySlot>,
        client: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
        last_notice: Arc<Mutex<Option<(String, Option<String>)>>>,
        policy: CallbackPolicy,
    ) -> Self {
        let epoch = reply_slot.generation();
        Self {
            reply_slot,
            client,
            last_notice,
            policy,
            epoch,
            abandoned: Cell::new(false),
        }
    }

    /// Whether the client vanished while this operation was in flight
    pub fn was_abandoned(&self) -> bool {
        self.abandoned.get()
    }

    fn send(&self, response: &Response) {
        let tx = self.client.lock().clone();
        match tx {
            Some(tx) => {
                if tx.blocking_send(codec::encode_prompt(response)).is_err() {
                    debug!("writer channel closed, dropping {} frame", response.kind);
                }
            }
            None => debug!("no client bound, dropping {} frame", response.kind),
        }
    }

    fn message_key(response: &Response) -> (String, Option<String>) {
        (
            response.kind.clone(),
            response.prompt.clone().or_else(|| response.status.clone()),
        )
    }

    /// Fire-and-forget notice; consecutive duplicates are suppressed
    fn notice(&self, response: Response) {
        if self.abandoned.get() {
            return;
        }
        let key = Self::message_key(&response);
        {
            let mut last = self.last_notice.lock();
            if self.policy.suppress_duplicate_notices && last.as_ref() == Some(&key) {
                debug!("suppressing duplicate {} notice", key.0);
                return;
            }
            *last = Some(key);
        }
        self.send(&response);
    }

    /// Send a prompt and block until the client answers or disconnects
    fn ask(&self, response: Response) -> Option<ClientReply> {
        if self.abandoned.get() {
            return None;
        }
        *self.last_notice.lock() = Some(Self::message_key(&response));
        self.send(&response);
        match self.reply_slot.await_reply_since(self.epoch) {
            Some(reply) => {
                self.reply_slot.clear();
                Some(reply)
            }
            None => {
                // A reply that may be sitting in the slot belongs to a
                // newer connection; leave it alone
                self.abandoned.set(true);
                None
            }
        }
    }

    fn ask_string(&self, response: Response) -> Option<String> {
        self.ask(response).and_then(|reply| reply.value)
    }

    fn ask_bool(&self, response: Response) -> bool {
        self.ask_string(response).as_deref() == Some("true")
    }

    /// Prompt for an option index, re-prompting until the answer parses
    /// and falls within the option list
    fn ask_index(&self, template: Response, option_count: usize) -> Option<usize> {
        loop {
            let value = self.ask_string(template.clone())?;
            match value.parse::<usize>() {
                Ok(idx) if idx < option_count => return Some(idx),
                _ => warn!("unusable selection answer {:?}, re-prompting", value),
            }
        }
    }
}

impl TerminalCallbacks for CallbackBridge {
    fn handle_log(&mut self, line: &str) {
        debug!("terminal: {}", line);
    }

    fn handle_status_change(&mut self, status: TerminalStatus) {
        // the status name travels in `prompt`, like every notice text
        self.notice(Response::new("handleStatusChange").with_prompt(status.as_str()));
    }

    fn ask_for_signature(&mut self, session: &mut dyn PrintoutSource, prompt: &str) -> bool {
        // The till shows the merchant copy alongside the confirmation
        let merchant = match session.merchant_printout() {
            Ok(lines) => super::printout::clip_lines(lines),
            Err(e) => {
                warn!("merchant printout unavailable for signature check: {}", e);
                Vec::new()
            }
        };
        self.ask_bool(
            Response::new("askForSignature")
                .with_prompt(prompt)
                .with_value(json!({ "merchant": merchant })),
        )
    }

    fn ask_for_copy(&mut self, prompt: &str) -> bool {
        self.ask_bool(Response::new("askForCopy").with_prompt(prompt))
    }

    fn ask_for_currency(&mut self, options: &[String]) -> Option<usize> {
        let mut resp = Response::new("askForCurrency").with_prompt("Select currency.");
        resp.values = Some(options.to_vec());
        self.ask_index(resp, options.len())
    }

    fn ask_for_selection(&mut self, options: &[String], prompt: &str) -> Option<usize> {
        let mut resp = Response::new("askForSelection").with_prompt(prompt);
        resp.values = Some(options.to_vec());
        self.ask_index(resp, options.len())
    }

    fn wait_for_card(&mut self, prompt: &str) -> bool {
        let resp = Response::new("waitForCard").with_prompt(prompt);
        if self.policy.card_prompts_block {
            self.ask_bool(resp)
        } else {
            // The terminal's own display drives card presentation; the till
            // only mirrors the message
            self.notice(resp);
            true
        }
    }

    fn wait_for_card_removal(&mut self, prompt: &str) {
        self.notice(Response::new("waitForCardRemoval").with_prompt(prompt));
    }

    fn wait_for_pin(&mut self, prompt: &str) -> bool {
        let resp = Response::new("waitForPin").with_prompt(prompt);
        if self.policy.card_prompts_block {
            self.ask_bool(resp)
        } else {
            self.notice(resp);
            true
        }
    }

    fn show_ok_screen(&mut self, prompt: &str) {
        // Acknowledgement only; the answer's content does not matter
        let _ = self.ask(Response::new("showOkScreen").with_prompt(prompt));
    }

    fn show_yes_no_screen(&mut self, prompt: &str) -> bool {
        self.ask_bool(Response::new("showYesNoScreen").with_prompt(prompt))
    }

    fn show_prompt_screen(&mut self, prompt: &str) {
        self.notice(Response::new("showPromptScreen").with_prompt(prompt));
    }

    fn get_cashback_amount(
        &mut self,
        _prompt: &str,
        _min_length: usize,
        _max_length: usize,
    ) -> Option<String> {
        // Cashback is not offered at this till
        None
    }

    fn get_authorization_code(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
    ) -> Option<String> {
        let mut resp = Response::new("getAuthorizationCode").with_prompt(prompt);
        resp.min_length = Some(min_length);
        resp.max_length = Some(max_length);
        self.ask_string(resp)
    }

    fn get_user_data(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
        is_char_allowed: &dyn Fn(char) -> bool,
    ) -> Option<String> {
        let mut current = prompt.to_string();
        loop {
            let mut resp = Response::new("getUserData").with_prompt(current.clone());
            resp.min_length = Some(min_length);
            resp.max_length = Some(max_length);

            let value = self.ask_string(resp)?;
            let length_ok = value.len() >= min_length && value.len() <= max_length;
            if length_ok && value.chars().all(|c| is_char_allowed(c)) {
                return Some(value);
            }
            current = format!("Incorrect data typed - please try again.\n{}", prompt);
        }
    }

    fn get_amount(
        &mut self,
        prompt: &str,
        min_length: usize,
        max_length: usize,
    ) -> Option<String> {
        let mut resp = Response::new("getAmount").with_prompt(prompt);
        resp.min_length = Some(min_length);
        resp.max_length = Some(max_length);
        self.ask_string(resp)
    }
}
