//! Result payload assembly
//!
//! Builds the JSON `value` payloads returned for accepted transactions,
//! last-transaction queries and batch reads from the session's tag view
//! and receipt printouts.

use crate::constants::PRINTOUT_LINE_LENGTH;
use crate::device::{device_error_response, STATUS_TERMINAL_CONNECTION_ERROR};
use crate::protocol::Response;
use crate::terminal::{DeviceResult, DeviceStatus, TagId, TerminalSession, TerminalStatus};
use serde_json::{json, Value};
use tracing::debug;

/// Reversal value of the transaction-type tag
const TYPE_REVERSAL: &str = "5";

/// Clip receipt lines to the till printer's width
pub fn clip_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| line.chars().take(PRINTOUT_LINE_LENGTH).collect())
        .collect()
}

/// Payload for a freshly accepted transaction: both receipt copies plus
/// the card and reference details the till archives
pub fn transaction_value(session: &mut dyn TerminalSession) -> DeviceResult<Value> {
    let merchant = clip_lines(session.merchant_printout()?);
    let customer = clip_lines(session.customer_printout()?);
    Ok(json!({
        "merchant": merchant,
        "customer": customer,
        "cardType": session.read_tag(TagId::AppPreferredName)?,
        "transactionNumber": session.read_tag(TagId::TransactionNumber)?,
        "pan": session.read_tag(TagId::MaskedPan)?,
        "currencyCode": session.read_currency_label()?,
    }))
}

/// Details of the entry currently loaded in the tag view
///
/// `include_original` additionally resolves the original transaction type
/// when the entry is a reversal.
pub fn entry_value(session: &mut dyn TerminalSession, include_original: bool) -> DeviceResult<Value> {
    let ty = session.read_tag(TagId::TransactionType)?;

    let mut entry = json!({
        "transactionNumber": session.read_tag(TagId::TransactionNumber)?,
        "cardType": session.read_tag(TagId::AppPreferredName)?,
        "pan": session.read_tag(TagId::MaskedPan)?,
        "amount": session.read_transaction_amount()?,
        "currencyCode": session.read_currency_label()?,
        "date": session.read_transaction_date()?,
        "time": session.read_transaction_time()?,
        "type": ty,
        "authorisationType": session.read_tag(TagId::AuthorizationType)?,
    });

    if include_original && ty == TYPE_REVERSAL {
        let original = session.read_tag(TagId::OriginalTransactionType)?;
        entry["originalType"] = Value::String(original);
    }

    Ok(entry)
}

/// Drain every pending batch from the terminal
///
/// The terminal reports `BATCH_COMPLETED` for as long as unread batches
/// remain; each round walks the entries by index until the terminal runs
/// out, and every non-empty round is closed with a summary and reported
/// as its own array.
pub fn read_batch(session: &mut dyn TerminalSession) -> Response {
    let mut reports: Vec<Value> = Vec::new();

    loop {
        match session.read_terminal_status() {
            None => {
                return Response::error_with_status(
                    "Unexpected error when getting terminal status.",
                    STATUS_TERMINAL_CONNECTION_ERROR,
                )
            }
            Some(TerminalStatus::BatchCompleted) => {}
            Some(_) => break,
        }

        let entries = match read_round(session) {
            Ok(entries) => entries,
            Err(response) => return response,
        };

        // A completed status with no entries would loop forever, and an
        // empty round needs no summary
        if entries.is_empty() {
            debug!("batch round produced no entries, stopping");
            break;
        }

        let status = session.batch_summary();
        if !status.is_ok() {
            return Response::error_with_status(
                "Unexpected error when closing batch.",
                status.as_str(),
            );
        }

        reports.push(Value::Array(entries));
    }

    Response::success().with_value(json!({ "reports": reports }))
}

/// Read one batch round entry by entry, 1-based, until the terminal has
/// no more data
fn read_round(session: &mut dyn TerminalSession) -> Result<Vec<Value>, Response> {
    let mut entries = Vec::new();
    for index in 1u32.. {
        let status = session.set_batch_index(index);
        if !status.is_ok() {
            return Err(Response::error_with_status(
                "Unexpected error when selecting batch entry.",
                status.as_str(),
            ));
        }

        match session.fetch_batch_entry() {
            DeviceStatus::Ok => {}
            DeviceStatus::NoTerminalData => break,
            status => {
                return Err(Response::error_with_status(
                    "Unexpected error when reading batch entry.",
                    status.as_str(),
                ))
            }
        }

        entries.push(entry_value(session, false).map_err(|e| device_error_response(&e))?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::sim::{SimTransaction, SimulatedTerminal};

    #[test]
    fn test_transaction_value_carries_receipts_and_card_details() {
        let mut sim = SimulatedTerminal::new();
        // load the tag view
        let mut bridge = NoopCallbacks;
        sim.start_transaction(&mut bridge);

        let value = transaction_value(&mut sim).unwrap();
        assert_eq!(value["pan"], "479275******1234");
        assert_eq!(value["cardType"], "VISA DEBIT");
        assert_eq!(value["transactionNumber"], "000123");
        assert!(value["merchant"].as_array().unwrap().len() > 1);
        assert!(value["customer"].as_array().unwrap().len() > 1);
    }

    #[test]
    fn test_entry_value_includes_original_type_for_reversals() {
        let mut profile = SimTransaction::default();
        profile.tags.insert(TagId::TransactionType, "5".to_string());
        profile
            .tags
            .insert(TagId::OriginalTransactionType, "1".to_string());
        let mut sim = SimulatedTerminal::new().with_profile(profile);

        let entry = entry_value(&mut sim, true).unwrap();
        assert_eq!(entry["type"], "5");
        assert_eq!(entry["originalType"], "1");

        let without = entry_value(&mut sim, false).unwrap();
        assert!(without.get("originalType").is_none());
    }

    #[test]
    fn test_batch_drains_every_round() {
        let rounds = vec![
            vec![
                SimTransaction::default().with_number("000001"),
                SimTransaction::default().with_number("000002"),
            ],
            vec![SimTransaction::default().with_number("000003")],
        ];
        let mut sim = SimulatedTerminal::new()
            .with_statuses(vec![
                TerminalStatus::BatchCompleted,
                TerminalStatus::BatchCompleted,
                TerminalStatus::ReadyForNew,
            ])
            .with_batch_rounds(rounds);
        let probe = sim.probe();

        let response = read_batch(&mut sim);
        assert!(response.is_success());
        let reports = response.value.unwrap()["reports"].as_array().unwrap().clone();
        // One array per round, entries nested inside
        assert_eq!(reports.len(), 2);
        let first = reports[0].as_array().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["transactionNumber"], "000001");
        assert_eq!(first[1]["transactionNumber"], "000002");
        let second = reports[1].as_array().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["transactionNumber"], "000003");
        // Each non-empty round is closed with a summary
        assert_eq!(probe.summaries(), 2);
    }

    #[test]
    fn test_batch_with_nothing_pending_is_empty_success() {
        let mut sim = SimulatedTerminal::new();
        let probe = sim.probe();
        let response = read_batch(&mut sim);
        assert!(response.is_success());
        assert_eq!(
            response.value.unwrap()["reports"].as_array().unwrap().len(),
            0
        );
        // No round was read, so no summary is requested
        assert_eq!(probe.summaries(), 0);
    }

    #[test]
    fn test_empty_batch_round_stops_without_summary() {
        // The terminal keeps reporting a completed batch but yields no
        // entries; the read must stop instead of closing a hollow round
        let mut sim = SimulatedTerminal::new()
            .with_statuses(vec![TerminalStatus::BatchCompleted])
            .with_batch_rounds(vec![]);
        let probe = sim.probe();

        let response = read_batch(&mut sim);
        assert!(response.is_success());
        assert_eq!(
            response.value.unwrap()["reports"].as_array().unwrap().len(),
            0
        );
        assert_eq!(probe.summaries(), 0);
    }

    #[test]
    fn test_receipt_lines_clip_at_printer_width() {
        let long = "X".repeat(PRINTOUT_LINE_LENGTH + 15);
        let clipped = clip_lines(vec![long, "short".to_string()]);
        assert_eq!(clipped[0].chars().count(), PRINTOUT_LINE_LENGTH);
        assert_eq!(clipped[1], "short");
    }

    #[test]
    fn test_failing_printout_propagates() {
        let mut sim = SimulatedTerminal::new().with_failing_printout();
        assert!(transaction_value(&mut sim).is_err());
    }

    /// Callbacks that answer nothing, for driving the simulator directly
    struct NoopCallbacks;

    impl crate::terminal::TerminalCallbacks for NoopCallbacks {
        fn handle_log(&mut self, _line: &str) {}
        fn handle_status_change(&mut self, _status: TerminalStatus) {}
        fn ask_for_signature(
            &mut self,
            _session: &mut dyn crate::terminal::PrintoutSource,
            _prompt: &str,
        ) -> bool {
            true
        }
        fn ask_for_copy(&mut self, _prompt: &str) -> bool {
            false
        }
        fn ask_for_currency(&mut self, _options: &[String]) -> Option<usize> {
            None
        }
        fn ask_for_selection(&mut self, _options: &[String], _prompt: &str) -> Option<usize> {
            None
        }
        fn wait_for_card(&mut self, _prompt: &str) -> bool {
            true
        }
        fn wait_for_card_removal(&mut self, _prompt: &str) {}
        fn wait_for_pin(&mut self, _prompt: &str) -> bool {
            true
        }
        fn show_ok_screen(&mut self, _prompt: &str) {}
        fn show_yes_no_screen(&mut self, _prompt: &str) -> bool {
            false
        }
        fn show_prompt_screen(&mut self, _prompt: &str) {}
        fn get_cashback_amount(&mut self, _p: &str, _min: usize, _max: usize) -> Option<String> {
            None
        }
        fn get_authorization_code(
            &mut self,
            _p: &str,
            _min: usize,
            _max: usize,
        ) -> Option<String> {
            None
        }
        fn get_user_data(
            &mut self,
            _p: &str,
            _min: usize,
            _max: usize,
            _allowed: &dyn Fn(char) -> bool,
        ) -> Option<String> {
            None
        }
        fn get_amount(&mut self, _p: &str, _min: usize, _max: usize) -> Option<String> {
            None
        }
    }
}
