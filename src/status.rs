//! Status Mapper (spec §4.3): broker order status -> internal trade status.

use crate::models::TradeStatus;

/// Total mapping: every documented broker status maps to a defined
/// `TradeStatus`; anything unrecognized maps to `Failed` (spec §4.3).
pub fn map_broker_status(broker_status: &str) -> TradeStatus {
    match broker_status.to_lowercase().as_str() {
        "new" => TradeStatus::New,
        "accepted" | "pending_new" => TradeStatus::Accepted,
        "partially_filled" => TradeStatus::PartiallyFilled,
        "filled" => TradeStatus::Filled,
        "canceled" | "pending_cancel" | "expired" | "stopped" => TradeStatus::Canceled,
        "rejected" => TradeStatus::Rejected,
        "suspended" | "calculated" => TradeStatus::Failed,
        _ => TradeStatus::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_total_and_terminal_set_is_correct() {
        let documented = [
            "new",
            "accepted",
            "pending_new",
            "partially_filled",
            "filled",
            "canceled",
            "pending_cancel",
            "expired",
            "stopped",
            "rejected",
            "suspended",
            "calculated",
        ];
        for status in documented {
            let mapped = map_broker_status(status);
            let should_be_terminal = matches!(
                status,
                "filled" | "canceled" | "pending_cancel" | "expired" | "stopped" | "rejected"
                    | "suspended" | "calculated"
            );
            assert_eq!(mapped.is_terminal(), should_be_terminal, "status={status}");
        }
    }

    #[test]
    fn unknown_status_maps_to_failed() {
        assert_eq!(map_broker_status("something_weird"), TradeStatus::Failed);
        assert!(map_broker_status("something_weird").is_terminal());
    }
}
