use std::fs::File;
use std::io::Read;
use std::path::Path;
use bitcoin::{Amount, Denomination};
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::types::{FundingLine, FundingObligation};

/// Upper bound on accounts generated by one plan.
pub const MAX_ACCOUNTS: u64 = 1_000_000;

/// Reads `amount,accountCount` rows. Blank lines and `#` comments are skipped, and any row
/// that is not exactly two parseable fields, or that asks for a zero amount, is dropped
/// without failing the parse.
pub fn parse_funding_plan<R: Read>(input: R) -> Result<Vec<FundingLine>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 2 {
            log::debug!("Skipping funding row with {} fields: {:?}", record.len(), record);
            continue;
        }
        let amount = Amount::from_str_in(&record[0], Denomination::Bitcoin);
        let account_count = record[1].parse::<u32>();
        match (amount, account_count) {
            (Ok(amount), Ok(_)) if amount == Amount::ZERO => {
                log::debug!("Skipping zero-amount funding row: {:?}", record)
            }
            (Ok(amount), Ok(account_count)) => lines.push(FundingLine { amount, account_count }),
            _ => log::debug!("Skipping unparseable funding row: {:?}", record),
        }
    }
    Ok(lines)
}

/// Opens and parses the funding file. An unreadable or empty plan is a `Plan` error, as is
/// one whose account count or total amount is out of range.
pub fn load_funding_plan(path: &Path) -> Result<Vec<FundingLine>, AppError> {
    let plan_error = |reason: String| AppError::Plan { path: path.to_path_buf(), reason };

    let file = File::open(path).map_err(|e| plan_error(e.to_string()))?;
    let lines = parse_funding_plan(file).map_err(|e| plan_error(e.to_string()))?;
    if lines.is_empty() {
        return Err(plan_error("no funding lines found".to_string()));
    }
    let (accounts, total) = plan_totals(&lines).map_err(plan_error)?;
    log::debug!("Plan asks for {} accounts totalling {}", accounts, total);
    log::info!("Loaded {} funding lines from {:?}", lines.len(), path);
    Ok(lines)
}

fn plan_totals(lines: &[FundingLine]) -> Result<(u64, Amount), String> {
    let mut accounts: u64 = 0;
    let mut total = Amount::ZERO;
    for line in lines {
        accounts += u64::from(line.account_count);
        if accounts > MAX_ACCOUNTS {
            return Err(format!("more than {} accounts requested", MAX_ACCOUNTS));
        }
        total = line
            .amount
            .checked_mul(u64::from(line.account_count))
            .and_then(|line_total| total.checked_add(line_total))
            .ok_or_else(|| "plan total amount overflows".to_string())?;
    }
    Ok((accounts, total))
}

/// Microsecond timestamp, so runs started within the same second still get distinct names.
pub fn run_identifier(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y%m%d%H%M%S%6f").to_string()
}

pub fn obligation_name(prefix: &str, run_id: &str, line_index: usize, account_index: u32) -> String {
    format!("{prefix}-{run_id}-{line_index}-{account_index}")
}

/// One obligation per account, in plan order.
pub fn expand_obligations(lines: &[FundingLine], prefix: &str, run_id: &str) -> Vec<FundingObligation> {
    lines
        .iter()
        .enumerate()
        .flat_map(|(line_index, line)| {
            (0..line.account_count).map(move |account_index| {
                FundingObligation::new(
                    obligation_name(prefix, run_id, line_index, account_index),
                    line.amount,
                )
            })
        })
        .collect()
}

pub fn total_amount(obligations: &[FundingObligation]) -> Result<Amount, AppError> {
    obligations
        .iter()
        .try_fold(Amount::ZERO, |total, o| total.checked_add(o.amount))
        .ok_or_else(|| AppError::InputValidation("obligation total overflows".to_string()))
}
