use ethers::types::{U256, U512};
use std::convert::TryFrom;

use super::{QuoteSource, SwapQuote, SwapRequest};

/// Fee kept by the pair, in thousandths (Uniswap V2: 0.3 %).
const FEE_NUMERATOR: u64 = 997;
const FEE_DENOMINATOR: u64 = 1000;

/// Estimated gas of a single-hop router swap.
pub const MOCK_SWAP_GAS: u64 = 150_000;

/// Constant-product output for `amount_in` against the given reserves.
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let in_with_fee = U512::from(amount_in) * U512::from(FEE_NUMERATOR);
    let numerator = in_with_fee * U512::from(reserve_out);
    let denominator = U512::from(reserve_in) * U512::from(FEE_DENOMINATOR) + in_with_fee;
    U256::try_from(numerator / denominator).unwrap_or(U256::MAX)
}

/// Local quote generator used on the platform's own network and whenever the
/// aggregator cannot answer.
///
/// `reserves` are `(reserve_in, reserve_out)` of a pair holding both tokens;
/// without them 1:1 pricing minus the pair fee is assumed.
pub fn mock_quote(request: &SwapRequest, amount_in: U256, reserves: Option<(U256, U256)>) -> SwapQuote {
    let amount_out = match reserves {
        Some((reserve_in, reserve_out)) => get_amount_out(amount_in, reserve_in, reserve_out),
        None => amount_in.saturating_mul(U256::from(FEE_NUMERATOR)) / U256::from(FEE_DENOMINATOR),
    };

    SwapQuote {
        from_token: request.from_token,
        to_token: request.to_token,
        amount_in: amount_in.to_string(),
        amount_out: amount_out.to_string(),
        estimated_gas: MOCK_SWAP_GAS,
        source: QuoteSource::Mock,
    }
}
