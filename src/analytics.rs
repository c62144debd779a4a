//! Usage analytics over suggestion audit records.
//!
//! Summarises how the assistant has been used: totals, how many suggestions
//! cleared the success bar (confidence above 0.5), average confidence as a
//! percentage, average processing time, daily usage and the most common
//! ticket prefixes. Used by `tsg analytics` and `GET /api/analytics`.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::SuggestionResult;

/// Suggestions above this confidence count as successful.
pub const SUCCESS_THRESHOLD: f64 = 0.5;
const TOP_TICKET_TYPES: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Analytics {
    pub total_suggestions: u64,
    pub successful_suggestions: u64,
    /// Mean confidence as a percentage, 0 to 100.
    pub avg_confidence: f64,
    /// Mean processing time in seconds.
    pub avg_processing_time: f64,
    /// Merge requests are not created by this service; always zero.
    pub total_merge_requests: u64,
    pub successful_merge_requests: u64,
    /// `YYYY-MM-DD` → suggestions created that day (UTC).
    pub usage_by_day: BTreeMap<String, u64>,
    pub top_ticket_types: Vec<TicketTypeCount>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketTypeCount {
    pub ticket_type: String,
    pub count: u64,
}

pub fn compute_analytics(suggestions: &[SuggestionResult]) -> Analytics {
    let total = suggestions.len() as u64;
    let successful = suggestions
        .iter()
        .filter(|s| s.confidence_score > SUCCESS_THRESHOLD)
        .count() as u64;

    let (avg_confidence, avg_processing_time) = if total > 0 {
        let conf: f64 = suggestions.iter().map(|s| s.confidence_score).sum();
        let time: f64 = suggestions.iter().map(|s| s.processing_time_secs).sum();
        (
            round2(conf / total as f64 * 100.0),
            round2(time / total as f64),
        )
    } else {
        (0.0, 0.0)
    };

    let mut usage_by_day = BTreeMap::new();
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    for s in suggestions {
        *usage_by_day
            .entry(s.created_at.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
        *by_type.entry(ticket_type(&s.ticket_id)).or_insert(0) += 1;
    }

    let mut top_ticket_types: Vec<TicketTypeCount> = by_type
        .into_iter()
        .map(|(ticket_type, count)| TicketTypeCount { ticket_type, count })
        .collect();
    // BTreeMap order gives name ascending; stable sort keeps it for ties.
    top_ticket_types.sort_by(|a, b| b.count.cmp(&a.count));
    top_ticket_types.truncate(TOP_TICKET_TYPES);

    Analytics {
        total_suggestions: total,
        successful_suggestions: successful,
        avg_confidence,
        avg_processing_time,
        total_merge_requests: 0,
        successful_merge_requests: 0,
        usage_by_day,
        top_ticket_types,
    }
}

/// Project key of a ticket: `OPS-123` → `OPS`.
fn ticket_type(ticket_id: &str) -> String {
    let key = ticket_id.split('-').next().unwrap_or("").trim();
    if key.is_empty() {
        "UNKNOWN".to_string()
    } else {
        key.to_ascii_uppercase()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn suggestion(ticket: &str, confidence: f64, secs: f64, day: u32) -> SuggestionResult {
        SuggestionResult {
            id: format!("{}-{}", ticket, day),
            ticket_id: ticket.to_string(),
            summary: String::new(),
            description: String::new(),
            matches: vec![],
            prompt: String::new(),
            suggested_code: String::new(),
            file_path: String::new(),
            explanation: String::new(),
            confidence_score: confidence,
            model_used: "codellama".to_string(),
            processing_time_secs: secs,
            degraded_reason: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty() {
        let a = compute_analytics(&[]);
        assert_eq!(a.total_suggestions, 0);
        assert_eq!(a.avg_confidence, 0.0);
        assert!(a.usage_by_day.is_empty());
        assert!(a.top_ticket_types.is_empty());
    }

    #[test]
    fn test_counts_and_averages() {
        let items = vec![
            suggestion("OPS-1", 0.7, 2.0, 1),
            suggestion("OPS-2", 0.5, 1.0, 1),
            suggestion("NET-9", 0.3, 3.0, 2),
            suggestion("ops-4", 0.9, 2.0, 2),
        ];
        let a = compute_analytics(&items);
        assert_eq!(a.total_suggestions, 4);
        // 0.5 is not above the threshold
        assert_eq!(a.successful_suggestions, 2);
        assert_eq!(a.avg_confidence, 60.0);
        assert_eq!(a.avg_processing_time, 2.0);
        assert_eq!(a.total_merge_requests, 0);
        assert_eq!(a.usage_by_day.get("2026-03-01"), Some(&2));
        assert_eq!(a.usage_by_day.get("2026-03-02"), Some(&2));
        assert_eq!(
            a.top_ticket_types,
            vec![
                TicketTypeCount {
                    ticket_type: "OPS".to_string(),
                    count: 3
                },
                TicketTypeCount {
                    ticket_type: "NET".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_ticket_type_fallback() {
        assert_eq!(ticket_type("-12"), "UNKNOWN");
        assert_eq!(ticket_type("INFRA"), "INFRA");
    }
}
