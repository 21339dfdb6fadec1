//! Preview and page views of a tab

use serde_json::{json, Value};

use crate::sessions::{Tab, TabStatus};

/// Status, metadata, and the first `sample` rows
pub fn preview(session_id: &str, tab: &Tab, sample: usize) -> Value {
    let shown = tab.rows.len().min(sample);
    json!({
        "sessionId": session_id,
        "tabId": tab.id,
        "title": tab.title,
        "query": tab.query,
        "status": tab.status,
        "error": tab.error,
        "columns": tab.columns,
        "rowCount": tab.rows.len(),
        "totalRowsInFirstBatch": tab.total_rows_in_first_batch,
        "supportsPagination": tab.supports_pagination,
        "previewRows": &tab.rows[..shown],
        "hint": hint(tab, shown),
    })
}

/// Rows `[offset, offset + limit)` and whether more follow
pub fn page(session_id: &str, tab: &Tab, offset: usize, limit: usize) -> Value {
    let total = tab.rows.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);
    let has_more = end < total;
    let next_offset = has_more.then_some(end);

    json!({
        "sessionId": session_id,
        "tabId": tab.id,
        "status": tab.status,
        "error": tab.error,
        "columns": tab.columns,
        "offset": start,
        "limit": limit,
        "rows": &tab.rows[start..end],
        "rowCount": total,
        "hasMore": has_more,
        "nextOffset": next_offset,
    })
}

/// Everything, for `waitForResult`
pub fn inline_result(session_id: &str, tab: &Tab) -> Value {
    json!({
        "sessionId": session_id,
        "tabId": tab.id,
        "status": tab.status,
        "error": tab.error,
        "columns": tab.columns,
        "rows": tab.rows,
        "rowCount": tab.rows.len(),
        "supportsPagination": tab.supports_pagination,
    })
}

/// One-line guidance for whoever reads a preview
pub fn hint(tab: &Tab, shown: usize) -> String {
    let total = tab.rows.len();
    match tab.status {
        TabStatus::Created => "Query has not started yet.".to_string(),
        TabStatus::Loading => format!(
            "Query is still running ({} rows so far). Call get_tab_info again for more.",
            total
        ),
        TabStatus::Error => format!(
            "Query failed: {}",
            tab.error.as_deref().unwrap_or("unknown error")
        ),
        TabStatus::Success if shown < total => format!(
            "Showing {} of {} rows. Use mode='page' with offset/limit to read the rest.",
            shown, total
        ),
        TabStatus::Success => format!("Query finished with {} rows.", total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sql_connectors::{Column, QueryPage};

    fn tab_with_rows(n: usize) -> Tab {
        let mut tab = Tab::new("t1", "SELECT n FROM numbers");
        tab.reset_for_run("SELECT n FROM numbers", None);
        tab.apply_page(QueryPage::with_columns(
            vec![Column::new("n", "integer")],
            (0..n).map(|i| vec![json!(i)]).collect(),
        ));
        tab.finish(TabStatus::Success, None);
        tab
    }

    #[test]
    fn test_page_window() {
        let tab = tab_with_rows(20);
        let view = page("s", &tab, 5, 5);
        assert_eq!(view["hasMore"], true);
        assert_eq!(view["nextOffset"], 10);
        let rows = view["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][0], 5);
    }

    #[test]
    fn test_page_past_end() {
        let tab = tab_with_rows(20);
        let view = page("s", &tab, 15, 10);
        assert_eq!(view["rows"].as_array().unwrap().len(), 5);
        assert_eq!(view["hasMore"], false);

        let view = page("s", &tab, 50, 10);
        assert!(view["rows"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_preview_sample_and_hint() {
        let tab = tab_with_rows(25);
        let view = preview("s", &tab, 10);
        assert_eq!(view["previewRows"].as_array().unwrap().len(), 10);
        assert_eq!(view["rowCount"], 25);
        assert!(view["hint"].as_str().unwrap().contains("Showing 10 of 25"));

        let small = tab_with_rows(3);
        assert!(hint(&small, 3).contains("3 rows"));
    }
}
