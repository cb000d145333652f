//! Call record persistence port
//!
//! The engine only ever calls `save`. `query` is here so that the outer
//! layers (history screens, exports) can page through what was written.

use crate::domain::{CallRecord, ModemResult};

pub trait CallRecordRepository: Send + Sync {
    fn save(&self, record: &CallRecord) -> ModemResult<()>;

    fn query(&self, filter: &RecordFilter, page: PageRequest) -> ModemResult<Page<CallRecord>>;
}

/// Filters combine with AND. `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub com_port: Option<String>,
    /// Case-insensitive substring match on the SIM phone number
    pub sim_phone: Option<String>,
    pub target_number: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &CallRecord) -> bool {
        if let Some(port) = &self.com_port {
            if &record.com_port != port {
                return false;
            }
        }
        if let Some(needle) = &self.sim_phone {
            let needle = needle.to_lowercase();
            let hit = record
                .sim_phone
                .as_deref()
                .is_some_and(|phone| phone.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        if let Some(target) = &self.target_number {
            if record.target_number.as_deref() != Some(target.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 20 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
}

impl Page<CallRecord> {
    /// Filter, order newest first and slice out the requested page.
    pub fn select(records: Vec<CallRecord>, filter: &RecordFilter, request: PageRequest) -> Self {
        let mut matching: Vec<CallRecord> =
            records.into_iter().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let size = request.size.max(1);
        let page = request.page.max(1);
        let total_elements = matching.len();
        let total_pages = total_elements.div_ceil(size);
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(size))
            .take(size)
            .collect();

        Self {
            items,
            page,
            size,
            total_elements,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(port: &str, sim: Option<&str>, minutes_ago: i64) -> CallRecord {
        let t = Utc::now() - Duration::minutes(minutes_ago);
        CallRecord {
            id: format!("{port}-{minutes_ago}"),
            order_id: "order".into(),
            device_id: "dev".into(),
            device_name: "node".into(),
            device_location: "here".into(),
            com_port: port.into(),
            sim_phone: sim.map(String::from),
            from_number: None,
            target_number: Some("0987654321".into()),
            call_state: "COMPLETED".into(),
            start_time: t,
            connect_time: None,
            end_time: t,
            duration_seconds: 0,
            recording_file_name: None,
            recording_file_path: None,
            created_at: t,
        }
    }

    #[test]
    fn filter_by_port_and_sim_substring() {
        let filter = RecordFilter {
            com_port: Some("COM5".into()),
            sim_phone: Some("0912".into()),
            ..Default::default()
        };
        assert!(filter.matches(&record("COM5", Some("0912345678"), 0)));
        assert!(!filter.matches(&record("COM6", Some("0912345678"), 0)));
        assert!(!filter.matches(&record("COM5", None, 0)));
    }

    #[test]
    fn page_orders_newest_first_and_counts_pages() {
        let records = (0..5).map(|i| record("COM5", None, i)).collect();
        let page = Page::select(records, &RecordFilter::default(), PageRequest { page: 2, size: 2 });
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "COM5-2");
    }

    #[test]
    fn page_past_end_is_empty() {
        let records = vec![record("COM5", None, 0)];
        let page = Page::select(records, &RecordFilter::default(), PageRequest { page: 4, size: 10 });
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn huge_page_number_is_empty_not_overflow() {
        let records = vec![record("COM5", None, 0)];
        let request = PageRequest {
            page: usize::MAX,
            size: 50,
        };
        let page = Page::select(records, &RecordFilter::default(), request);
        assert!(page.items.is_empty());
        assert_eq!(page.page, usize::MAX);
    }
}
