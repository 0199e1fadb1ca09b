use crate::domain::ledger::LedgerEntry;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow<'a> {
    id: u64,
    kind: &'static str,
    status: String,
    source: Option<u64>,
    destination: Option<u64>,
    order: Option<u64>,
    dispute: Option<u64>,
    amount: String,
    currency: &'a str,
    external_id: Option<&'a str>,
    timestamp: String,
}

impl<'a> From<&'a LedgerEntry> for LedgerRow<'a> {
    fn from(entry: &'a LedgerEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind.as_str(),
            status: entry.status.to_string(),
            source: entry.source,
            destination: entry.destination,
            order: entry.order_id,
            dispute: entry.dispute_id,
            amount: format!("{:.2}", entry.amount.value()),
            currency: &entry.currency,
            external_id: entry.external_id.as_deref(),
            timestamp: entry.timestamp.to_rfc3339(),
        }
    }
}

/// Writes ledger entries as CSV, in the order given. Missing references are empty cells.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_entries(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        for entry in entries {
            self.writer.serialize(LedgerRow::from(entry))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
