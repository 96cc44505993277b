use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Operations a journal row can request.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    AddItem,
    Create,
    Submit,
    UpdateItems,
    Preauthorize,
    Confirm,
    Refund,
    Void,
    Cancel,
    Downloads,
}

/// One row of a commerce journal.
///
/// `order` and `payment` are aliases chosen by the journal author; the
/// runner maps them to generated ids.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct JournalEntry {
    pub op: JournalOp,
    pub tenant: String,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub payment: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub coupon: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// Reads journal entries from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing empty columns may be omitted.
pub struct JournalReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> JournalReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes entries, one `Result` per row.
    pub fn entries(self) -> impl Iterator<Item = Result<JournalEntry>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CommerceError::from))
    }
}
