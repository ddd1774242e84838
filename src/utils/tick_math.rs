use crate::utils::error::LiquidityError;

pub const TICK_ARRAY_SIZE: i32 = 88;
pub const MIN_TICK_INDEX: i32 = -443636;
pub const MAX_TICK_INDEX: i32 = 443636;
pub const MIN_TICK_SPAN: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRange {
    pub tick_lower: i32,
    pub tick_upper: i32,
}

/// Rounds a tick down to the nearest multiple of `tick_spacing`.
pub fn align_tick(tick: i32, tick_spacing: u16) -> i32 {
    let spacing = tick_spacing as i32;
    tick.div_euclid(spacing) * spacing
}

/// Start tick of the 88-tick array segment that holds `tick`.
pub fn tick_array_start_index(tick: i32, tick_spacing: u16) -> i32 {
    let ticks_in_array = tick_spacing as i32 * TICK_ARRAY_SIZE;
    tick.div_euclid(ticks_in_array) * ticks_in_array
}

// The width is scaled off the tick value itself rather than off a
// price-derived tick count. Both bounds are floored.
pub fn calculate_tick_range(
    current_tick: i32,
    tick_spacing: u16,
    lower_pct: f64,
    upper_pct: f64,
) -> TickRange {
    let magnitude = current_tick.unsigned_abs() as f64;
    let lower_ticks = (magnitude * lower_pct / 100.0).floor() as i32;
    let upper_ticks = (magnitude * upper_pct / 100.0).floor() as i32;

    TickRange {
        tick_lower: align_tick(current_tick.saturating_sub(lower_ticks), tick_spacing),
        tick_upper: align_tick(current_tick.saturating_add(upper_ticks), tick_spacing),
    }
}

pub fn calculate_symmetric_tick_range(
    current_tick: i32,
    tick_spacing: u16,
    range_pct: f64,
) -> TickRange {
    calculate_tick_range(current_tick, tick_spacing, range_pct, range_pct)
}

pub fn validate_tick_range(range: &TickRange, tick_spacing: u16) -> Result<(), LiquidityError> {
    if tick_spacing == 0 {
        return Err(LiquidityError::InvalidTickRange(
            "tick spacing cannot be zero".to_string(),
        ));
    }

    let spacing = tick_spacing as i32;

    for tick in [range.tick_lower, range.tick_upper] {
        if tick.rem_euclid(spacing) != 0 {
            return Err(LiquidityError::InvalidTickRange(format!(
                "tick {} is not a multiple of tick spacing {}",
                tick, tick_spacing
            )));
        }
        if !(MIN_TICK_INDEX..=MAX_TICK_INDEX).contains(&tick) {
            return Err(LiquidityError::InvalidTickRange(format!(
                "tick {} outside [{}, {}]",
                tick, MIN_TICK_INDEX, MAX_TICK_INDEX
            )));
        }
    }

    if range.tick_lower >= range.tick_upper {
        return Err(LiquidityError::InvalidTickRange(format!(
            "lower tick {} must be below upper tick {}",
            range.tick_lower, range.tick_upper
        )));
    }

    let min_span = spacing.max(MIN_TICK_SPAN);
    if range.tick_upper - range.tick_lower < min_span {
        return Err(LiquidityError::InvalidTickRange(format!(
            "span {} is below the minimum of {} ticks",
            range.tick_upper - range.tick_lower,
            min_span
        )));
    }

    Ok(())
}
