//! Result normalization.
//! Maps a raw engine result into the wire response shape, applying the
//! display-row cap. Pure functions only; serialization shaping for
//! `expand_data` lives here too so handlers stay thin.

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::engine::{ColumnMeta, EngineResult, Row};

/// Wire response shape for one result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub query_id: Uuid,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub row_count_total: usize,
    pub row_count_displayed: usize,
    pub is_limited: bool,
}

/// Cap displayed rows at `max_display_rows`, preserving column order and
/// declared types verbatim.
pub fn normalize(raw: &EngineResult, max_display_rows: usize, query_id: Uuid) -> ResultSet {
    let row_count_total = raw.rows.len();
    let row_count_displayed = row_count_total.min(max_display_rows);
    ResultSet {
        query_id,
        columns: raw.columns.clone(),
        rows: raw.rows[..row_count_displayed].to_vec(),
        row_count_total,
        row_count_displayed,
        is_limited: row_count_total > max_display_rows,
    }
}

impl ResultSet {
    /// JSON payload for the wire. `expand_data: false` ships metadata and
    /// counts without the row data itself.
    pub fn to_payload(&self, expand_data: bool) -> serde_json::Value {
        let mut v = json!({
            "query_id": self.query_id,
            "columns": self.columns,
            "row_count_total": self.row_count_total,
            "row_count_displayed": self.row_count_displayed,
            "is_limited": self.is_limited,
        });
        if expand_data {
            if let Some(obj) = v.as_object_mut() {
                obj.insert("rows".into(), json!(self.rows));
            }
        }
        v
    }
}
