use crate::types::{DeliveryRecord, DeliveryStats, DeliveryStatus, RecordPage, Subscription};

/// One page of `records`, newest first, optionally filtered by status.
///
/// Pages are 1-based; `page` and `page_size` are clamped to at least 1.
pub fn paginate(
    mut records: Vec<DeliveryRecord>,
    page: usize,
    page_size: usize,
    status: Option<DeliveryStatus>,
) -> RecordPage {
    let page = page.max(1);
    let page_size = page_size.max(1);

    if let Some(status) = status {
        records.retain(|r| r.status() == status);
    }
    records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));

    let total = records.len();
    let total_pages = total.div_ceil(page_size);
    let records = records
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    RecordPage {
        records,
        total,
        page,
        total_pages,
    }
}

/// Statistics for a subscription. Counts come from the subscription's
/// counters; the response-time average comes from recorded successes.
pub fn compute_stats(subscription: &Subscription, records: &[DeliveryRecord]) -> DeliveryStats {
    let success_count = subscription.success_count;
    let failure_count = subscription.failure_count;
    let total_deliveries = success_count + failure_count;
    let success_rate = if total_deliveries > 0 {
        success_count as f64 / total_deliveries as f64 * 100.0
    } else {
        0.0
    };

    let timings: Vec<u64> = records
        .iter()
        .filter(|r| r.status() == DeliveryStatus::Success)
        .filter_map(|r| r.delivery.response_time_ms)
        .collect();
    let average_response_time_ms = if timings.is_empty() {
        0.0
    } else {
        timings.iter().sum::<u64>() as f64 / timings.len() as f64
    };

    DeliveryStats {
        total_deliveries,
        success_count,
        failure_count,
        success_rate,
        average_response_time_ms,
        last_delivery: subscription.last_triggered,
    }
}
