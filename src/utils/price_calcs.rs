use uint::construct_uint;

use super::error::PriceCalcError;

construct_uint! {
    pub struct U256(4);
}

pub const Q64: U256 = U256([0, 1, 0, 0]);
pub const BPS_DENOMINATOR: u64 = 10_000;

// WORKS WITHIN A REASONABLE LIMIT. TESTED AGAINST LIVE STUFF.
pub fn tick_to_sqrt_price_u256(tick: i32) -> U256 {
    let sqrt_price = (1.0001_f64.powf(tick as f64 / 2.0)) * (Q64.as_u128() as f64);
    U256::from(sqrt_price as u128)
}

pub fn sqrt_price_to_price(sqrt_price: u128, decimals_a: u8, decimals_b: u8) -> f64 {
    let ratio = sqrt_price as f64 / Q64.as_u128() as f64;
    ratio * ratio * 10_f64.powi(decimals_a as i32 - decimals_b as i32)
}

fn checked(value: Option<U256>, what: &str) -> Result<U256, PriceCalcError> {
    value.ok_or_else(|| PriceCalcError(format!("overflow or division by zero in {}", what)))
}

fn ceil_div(numerator: U256, denominator: U256, what: &str) -> Result<U256, PriceCalcError> {
    if denominator.is_zero() {
        return Err(PriceCalcError(format!("division by zero in {}", what)));
    }
    let (quotient, remainder) = numerator.div_mod(denominator);
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        checked(quotient.checked_add(U256::one()), what)
    }
}

// L = amount_a * sqrt_lower * sqrt_upper / Q64 / (sqrt_upper - sqrt_lower)
pub fn calculate_liquidity_a(
    amount: U256,
    lower_sqrt_price: U256,
    upper_sqrt_price: U256,
) -> Result<U256, PriceCalcError> {
    let diff = checked(upper_sqrt_price.checked_sub(lower_sqrt_price), "liquidity_a")?;
    checked(
        amount
            .checked_mul(lower_sqrt_price)
            .and_then(|v| v.checked_mul(upper_sqrt_price))
            .and_then(|v| v.checked_div(Q64))
            .and_then(|v| v.checked_div(diff)),
        "liquidity_a",
    )
}

// L = amount_b * Q64 / (sqrt_upper - sqrt_lower)
pub fn calculate_liquidity_b(
    amount: U256,
    lower_sqrt_price: U256,
    upper_sqrt_price: U256,
) -> Result<U256, PriceCalcError> {
    let diff = checked(upper_sqrt_price.checked_sub(lower_sqrt_price), "liquidity_b")?;
    checked(
        amount.checked_mul(Q64).and_then(|v| v.checked_div(diff)),
        "liquidity_b",
    )
}

// Rounded up: the result is used as a deposit cap.
pub fn calculate_token_a_from_liquidity(
    liquidity: U256,
    lower_sqrt_price: U256,
    upper_sqrt_price: U256,
) -> Result<U256, PriceCalcError> {
    let diff = checked(upper_sqrt_price.checked_sub(lower_sqrt_price), "token_a")?;
    let numerator = checked(
        liquidity.checked_mul(diff).and_then(|v| v.checked_mul(Q64)),
        "token_a",
    )?;
    let denominator = checked(lower_sqrt_price.checked_mul(upper_sqrt_price), "token_a")?;
    ceil_div(numerator, denominator, "token_a")
}

pub fn calculate_token_b_from_liquidity(
    liquidity: U256,
    lower_sqrt_price: U256,
    upper_sqrt_price: U256,
) -> Result<U256, PriceCalcError> {
    let diff = checked(upper_sqrt_price.checked_sub(lower_sqrt_price), "token_b")?;
    let numerator = checked(liquidity.checked_mul(diff), "token_b")?;
    ceil_div(numerator, Q64, "token_b")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositAmounts {
    pub liquidity: u128,
    pub token_a: u64,
    pub token_b: u64,
}

/// Exact deposit for a single-sided input amount. `input_is_a` selects which
/// side of the pool the amount is denominated in.
pub fn calculate_deposit(
    input_amount: u64,
    input_is_a: bool,
    current_sqrt_price: U256,
    lower_sqrt_price: U256,
    upper_sqrt_price: U256,
) -> Result<DepositAmounts, PriceCalcError> {
    if current_sqrt_price.is_zero() {
        return Err(PriceCalcError("pool sqrt price is zero".to_string()));
    }
    if lower_sqrt_price >= upper_sqrt_price {
        return Err(PriceCalcError("empty sqrt price range".to_string()));
    }

    let amount = U256::from(input_amount);

    let (liquidity, token_a, token_b) = if current_sqrt_price <= lower_sqrt_price {
        // Range above the price: only token A is deposited.
        if !input_is_a {
            return Err(PriceCalcError(
                "range is above the current price, token B cannot be deposited".to_string(),
            ));
        }
        let liquidity = calculate_liquidity_a(amount, lower_sqrt_price, upper_sqrt_price)?;
        (liquidity, amount, U256::zero())
    } else if current_sqrt_price >= upper_sqrt_price {
        if input_is_a {
            return Err(PriceCalcError(
                "range is below the current price, token A cannot be deposited".to_string(),
            ));
        }
        let liquidity = calculate_liquidity_b(amount, lower_sqrt_price, upper_sqrt_price)?;
        (liquidity, U256::zero(), amount)
    } else if input_is_a {
        let liquidity = calculate_liquidity_a(amount, current_sqrt_price, upper_sqrt_price)?;
        let token_b =
            calculate_token_b_from_liquidity(liquidity, lower_sqrt_price, current_sqrt_price)?;
        (liquidity, amount, token_b)
    } else {
        let liquidity = calculate_liquidity_b(amount, lower_sqrt_price, current_sqrt_price)?;
        let token_a =
            calculate_token_a_from_liquidity(liquidity, current_sqrt_price, upper_sqrt_price)?;
        (liquidity, token_a, amount)
    };

    if liquidity.is_zero() {
        return Err(PriceCalcError("deposit yields zero liquidity".to_string()));
    }

    Ok(DepositAmounts {
        liquidity: to_u128(liquidity)?,
        token_a: to_u64(token_a)?,
        token_b: to_u64(token_b)?,
    })
}

/// `amount * (10000 + bps) / 10000`, rounded up.
pub fn apply_slippage_ceiling(amount: u64, slippage_bps: u16) -> Result<u64, PriceCalcError> {
    let scaled = U256::from(amount) * U256::from(BPS_DENOMINATOR + slippage_bps as u64);
    to_u64(ceil_div(scaled, U256::from(BPS_DENOMINATOR), "slippage")?)
}

fn to_u128(value: U256) -> Result<u128, PriceCalcError> {
    if value > U256::from(u128::MAX) {
        return Err(PriceCalcError("value exceeds u128".to_string()));
    }
    Ok(value.as_u128())
}

fn to_u64(value: U256) -> Result<u64, PriceCalcError> {
    if value > U256::from(u64::MAX) {
        return Err(PriceCalcError("value exceeds u64".to_string()));
    }
    Ok(value.as_u64())
}

pub fn to_ui_amount(base_units: u64, decimals: u8) -> f64 {
    base_units as f64 / 10_f64.powi(decimals as i32)
}

/// Whole-unit amount to base units, rounded to the nearest unit.
pub fn to_base_units(amount: f64, decimals: u8) -> u64 {
    (amount * 10_f64.powi(decimals as i32)).round().max(0.0) as u64
}

/// `amount * bps / 10000`, rounded down.
pub fn share_of(amount: u64, bps: u64) -> u64 {
    (amount as u128 * bps as u128 / BPS_DENOMINATOR as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculate_relative_error(expected: U256, actual: U256) -> f64 {
        let diff = if expected > actual {
            expected - actual
        } else {
            actual - expected
        };
        (diff.as_u128() as f64) / (expected.as_u128() as f64)
    }

    #[test]
    fn test_tick_to_sqrt_price() {
        let acceptable_error = 1e-4;

        // SOL/USDC.
        let result = tick_to_sqrt_price_u256(-19998);
        let expected = U256::from(6787344857950480093_u128);
        assert!(calculate_relative_error(expected, result) <= acceptable_error);

        // POPCAT/SOL.
        let result = tick_to_sqrt_price_u256(53249);
        let expected = U256::from(264342069548887880143_u128);
        assert!(calculate_relative_error(expected, result) <= acceptable_error);
    }

    #[test]
    fn test_liquidity_from_live_positions() {
        // Out of range, all token A.
        let liquidity = calculate_liquidity_a(
            U256::from(10828707975_u128),
            tick_to_sqrt_price_u256(-17204),
            tick_to_sqrt_price_u256(-16446),
        )
        .unwrap();
        assert!(calculate_relative_error(U256::from(123197299862_u128), liquidity) <= 1e-5);

        // Out of range, all token B.
        let liquidity = calculate_liquidity_b(
            U256::from(101503310_u128),
            tick_to_sqrt_price_u256(-20640),
            tick_to_sqrt_price_u256(-20536),
        )
        .unwrap();
        assert!(calculate_relative_error(U256::from(54643495974_u128), liquidity) <= 1e-5);
    }

    #[test]
    fn test_in_range_deposit_from_token_a() {
        let deposit = calculate_deposit(
            4751690281711,
            true,
            tick_to_sqrt_price_u256(-19981),
            tick_to_sqrt_price_u256(-20164),
            tick_to_sqrt_price_u256(-16096),
        )
        .unwrap();

        // Live position: L = 9913435703877, b = 33366735075.
        assert!(
            calculate_relative_error(
                U256::from(9913435703877_u128),
                U256::from(deposit.liquidity)
            ) <= 1e-2
        );
        assert!(
            calculate_relative_error(U256::from(33366735075_u128), U256::from(deposit.token_b))
                <= 1e-2
        );
        assert_eq!(deposit.token_a, 4751690281711);
    }

    #[test]
    fn test_deposit_from_token_b_is_consistent_with_token_a() {
        let current = tick_to_sqrt_price_u256(-19981);
        let lower = tick_to_sqrt_price_u256(-20164);
        let upper = tick_to_sqrt_price_u256(-16096);

        let from_b = calculate_deposit(33366735075, false, current, lower, upper).unwrap();
        let from_a = calculate_deposit(from_b.token_a, true, current, lower, upper).unwrap();

        assert!(
            calculate_relative_error(U256::from(from_b.liquidity), U256::from(from_a.liquidity))
                <= 1e-6
        );
    }

    #[test]
    fn test_wrong_side_deposit_is_a_math_error() {
        // Range sits entirely below the price: only token B can go in.
        let result = calculate_deposit(
            1_000_000,
            true,
            tick_to_sqrt_price_u256(-19985),
            tick_to_sqrt_price_u256(-20640),
            tick_to_sqrt_price_u256(-20536),
        );
        assert!(result.is_err());

        let result = calculate_deposit(
            1_000_000,
            true,
            U256::zero(),
            tick_to_sqrt_price_u256(-20640),
            tick_to_sqrt_price_u256(-20536),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_slippage_ceiling() {
        assert_eq!(apply_slippage_ceiling(1_000_000, 100).unwrap(), 1_010_000);
        assert_eq!(apply_slippage_ceiling(1, 1).unwrap(), 2);
        assert_eq!(apply_slippage_ceiling(0, 500).unwrap(), 0);
        assert!(apply_slippage_ceiling(u64::MAX, 100).is_err());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(to_base_units(73.41, 6), 73_410_000);
        assert_eq!(to_ui_amount(73_410_000, 6), 73.41);
        assert_eq!(to_base_units(-1.0, 6), 0);
        assert_eq!(share_of(101, 5_000), 50);
        assert_eq!(share_of(u64::MAX, 10_000), u64::MAX);
    }
}
