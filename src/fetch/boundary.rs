//! Time-window helpers for backward pagination.
//!
//! All comparisons use `cTime` in epoch milliseconds. Orders without a
//! creation time are never filtered out.

use crate::models::Order;

/// Earliest and latest `cTime` on a page.
pub fn ctime_range(orders: &[Order]) -> Option<(i64, i64)> {
    let mut times = orders.iter().filter_map(|o| o.c_time);
    let first = times.next()?;
    Some(times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
}

/// `true` if the order's `cTime` lies inside `[start, end]`.
pub fn within_window(order: &Order, start: Option<i64>, end: Option<i64>) -> bool {
    let Some(ctime) = order.c_time else {
        return true;
    };
    start.is_none_or(|s| ctime >= s) && end.is_none_or(|e| ctime <= e)
}

/// Drops orders created outside `[start, end]`.
pub fn filter_window(orders: Vec<Order>, start: Option<i64>, end: Option<i64>) -> Vec<Order> {
    if start.is_none() && end.is_none() {
        return orders;
    }
    orders
        .into_iter()
        .filter(|o| within_window(o, start, end))
        .collect()
}

/// Smallest numeric `orderId` on a page, used as the `idLessThan` cursor.
pub fn min_order_id(orders: &[Order]) -> Option<u64> {
    orders.iter().filter_map(Order::numeric_id).min()
}

/// Newest first by `cTime`; orders without one go last.
pub fn sort_by_ctime_desc(orders: &mut [Order]) {
    orders.sort_by_key(|o| std::cmp::Reverse(o.c_time.unwrap_or(0)));
}
