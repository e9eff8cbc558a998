use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AuditOutcome, ProgressEvent, ProgressSink};
use crate::delete::DeletionResult;
use crate::review::ReviewResult;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_audit(outcome: &AuditOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_review(result: &ReviewResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_delete(result: &DeletionResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
