//! Outbound adjustments applied to every inventory push.

/// Local qty less the safety buffer, floored at 0.
pub fn outbound_qty(qty: i64, stock_buffer: i64) -> i64 {
    qty.saturating_sub(stock_buffer).max(0)
}

/// Local price with the marketplace margin, rounded to 2 decimals.
pub fn outbound_price(price: f64, price_margin: f64) -> f64 {
    (price * (1.0 + price_margin) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_floors_at_zero() {
        assert_eq!(outbound_qty(10, 2), 8);
        assert_eq!(outbound_qty(1, 2), 0);
        assert_eq!(outbound_qty(5, 0), 5);
    }

    #[test]
    fn margin_rounds_to_cents() {
        assert!((outbound_price(99.90, 0.0) - 99.90).abs() < 1e-9);
        assert!((outbound_price(100.0, 0.15) - 115.0).abs() < 1e-9);
        assert!((outbound_price(19.99, 0.125) - 22.49).abs() < 1e-9);
    }
}
