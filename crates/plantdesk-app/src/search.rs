// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{ColumnSpec, Record};

/// Records whose searchable columns contain `keyword`, case-insensitively,
/// in their original order. An empty keyword keeps every record.
pub fn filter_records<'a>(
    records: &'a [Record],
    columns: &[ColumnSpec],
    keyword: &str,
) -> Vec<&'a Record> {
    let needle = keyword.to_lowercase();
    records
        .iter()
        .filter(|record| record_matches(record, columns, &needle))
        .collect()
}

/// `needle` must already be lowercased.
pub fn record_matches(record: &Record, columns: &[ColumnSpec], needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    columns
        .iter()
        .filter(|column| column.searchable)
        .filter_map(|column| record.value(&column.key))
        .any(|value| value.to_lowercase().contains(needle))
}
