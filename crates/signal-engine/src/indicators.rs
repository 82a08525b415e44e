use watch_core::Bar;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(sum / period as f64);
    }
    result
}

/// Split bar-to-bar close deltas into gains and loss magnitudes.
///
/// The first close has no predecessor and contributes nothing, so both vectors
/// have `closes.len() - 1` entries.
pub fn gains_and_losses(closes: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut gains = Vec::with_capacity(closes.len().saturating_sub(1));
    let mut losses = Vec::with_capacity(closes.len().saturating_sub(1));

    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    (gains, losses)
}

/// Relative Strength Index at the latest bar, using simple rolling means of
/// gains and losses over the most recent `period` deltas.
///
/// Returns `None` when fewer than `period` deltas exist. A zero average loss
/// yields 100 even when the average gain is also zero (flat series).
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    let (gains, losses) = gains_and_losses(closes);
    let avg_gain = *sma(&gains, period).last()?;
    let avg_loss = *sma(&losses, period).last()?;

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    if avg_gain == 0.0 {
        return Some(0.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// The most recent `window` bars, or all of them if there are fewer.
pub fn tail(bars: &[Bar], window: usize) -> &[Bar] {
    &bars[bars.len().saturating_sub(window)..]
}

/// Highest high in the slice.
pub fn highest_high(bars: &[Bar]) -> Option<f64> {
    bars.iter().map(|b| b.high).reduce(f64::max)
}

/// Fractional decline of the latest close from the highest high of the last
/// `window` bars. Zero when the high is not positive or there are no bars.
pub fn drawdown(bars: &[Bar], window: usize) -> f64 {
    let Some(latest) = bars.last() else {
        return 0.0;
    };
    match highest_high(tail(bars, window)) {
        Some(high) if high > 0.0 => (high - latest.close) / high,
        _ => 0.0,
    }
}

/// Mean volume of the last `window` bars, skipping zero-volume bars.
///
/// Zero volume means the bar has no volume data, not that nothing traded.
/// Returns `None` when every bar in the window is zero.
pub fn mean_nonzero_volume(bars: &[Bar], window: usize) -> Option<f64> {
    let volumes: Vec<f64> = tail(bars, window)
        .iter()
        .map(|b| b.volume)
        .filter(|v| *v != 0.0)
        .collect();

    if volumes.is_empty() {
        return None;
    }
    Some(volumes.iter().sum::<f64>() / volumes.len() as f64)
}
