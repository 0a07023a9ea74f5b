
/// Read access shared by raw CSV rows and export-normalized rows.
pub trait LedgerRow {
    /// 1-based position of the row in its source file.
    fn row_number(&self) -> usize;

    /// Untrimmed cell value, `None` when the column is absent.
    fn field(&self, name: &str) -> Option<&str>;

    /// Trimmed cell value; absent columns read as `""`.
    fn value(&self, name: &str) -> &str {
        self.field(name).map_or("", str::trim)
    }
}

/// One CSV data row. Field order follows the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    row_number: usize,
    fields: Vec<(String, String)>,
}

impl EventRow {
    #[must_use]
    pub fn new(row_number: usize, fields: Vec<(String, String)>) -> Self {
        Self { row_number, fields }
    }

    pub fn from_pairs<I, K, V>(row_number: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            row_number,
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns a copy with `name` set to `value`. The original row is left
    /// untouched; corrections are always new rows.
    #[must_use]
    pub fn with_field(&self, name: &str, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        let value = value.into();
        match copy.fields.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => copy.fields.push((name.to_string(), value)),
        }
        copy
    }

    /// Same cells at a new position, used when planning appended rows.
    #[must_use]
    pub fn renumbered(&self, row_number: usize) -> Self {
        Self {
            row_number,
            fields: self.fields.clone(),
        }
    }
}

impl LedgerRow for EventRow {
    fn row_number(&self) -> usize {
        self.row_number
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A CSV file as header plus rows in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventTable {
    pub header: Vec<String>,
    pub rows: Vec<EventRow>,
}

impl EventTable {
    #[must_use]
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Builds a table from raw records. Short records are padded with empty
    /// cells and cells beyond the header are dropped.
    #[must_use]
    pub fn from_records(header: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let mut cells = record.into_iter();
                let fields = header
                    .iter()
                    .map(|name| (name.clone(), cells.next().unwrap_or_default()))
                    .collect();
                EventRow::new(index + 1, fields)
            })
            .collect();

        Self { header, rows }
    }

    /// Appends a row numbered after the current last row.
    pub fn push<I, K, V>(&mut self, pairs: I) -> &EventRow
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let row_number = self.rows.last().map_or(0, LedgerRow::row_number) + 1;
        self.rows.push(EventRow::from_pairs(row_number, pairs));
        &self.rows[self.rows.len() - 1]
    }

    /// Cells of `row` in header order; missing columns become `""`.
    #[must_use]
    pub fn record_for(&self, row: &EventRow) -> Vec<String> {
        self.header
            .iter()
            .map(|name| row.field(name).unwrap_or_default().to_string())
            .collect()
    }

    /// Same header, different rows.
    #[must_use]
    pub fn with_rows(&self, rows: Vec<EventRow>) -> Self {
        Self {
            header: self.header.clone(),
            rows,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
