//! Bonding curve pricing for group tokens.
//!
//! These functions give the optimistic estimate shown before a trade is
//! confirmed. The indexed price always comes from the `newPrice` field of the
//! emitted event; the only part the indexer shares with this module is the
//! treasury fee.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::math::solve_quadratic;

/// Errors from a curve transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurveError {
    /// Trade amount was zero
    ZeroAmount,
    /// A sale was requested against a curve with no supply
    EmptySupply,
    /// Intermediate value exceeded 128 bits
    Overflow,
}

impl core::fmt::Display for CurveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CurveError::ZeroAmount => write!(f, "trade amount must be positive"),
            CurveError::EmptySupply => write!(f, "cannot sell against an empty supply"),
            CurveError::Overflow => write!(f, "curve arithmetic overflow"),
        }
    }
}

impl std::error::Error for CurveError {}

/// Tunable curve parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveParams {
    /// Steepness `k` of the linear price approximation
    pub sensitivity: Amount,
    /// Treasury fee charged on purchases, in basis points
    pub fee_bps: u32,
    /// Price never drops below this value
    pub price_floor: Amount,
    /// Price of a token whose supply is still zero
    pub initial_price: Amount,
}

impl Default for CurveParams {
    fn default() -> Self {
        Self {
            sensitivity: Amount::from_u128_with_scale(5, 2),
            fee_bps: 200,
            price_floor: Amount::from_u128_with_scale(1, 3),
            initial_price: Amount::from_u128_with_scale(1, 2),
        }
    }
}

/// Economic state the curve operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveState {
    pub price: Amount,
    pub supply: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseQuote {
    pub eth_in: Amount,
    pub fee: Amount,
    pub tokens_out: Amount,
    pub average_price: Amount,
    pub new_price: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleQuote {
    /// Tokens actually sold, clipped to the available supply
    pub tokens_in: Amount,
    pub eth_out: Amount,
    pub average_price: Amount,
    pub new_price: Amount,
    /// True when the requested amount exceeded the supply
    pub clipped: bool,
}

impl CurveParams {
    /// Treasury fee for an ETH amount entering the curve.
    pub fn fee_for(&self, eth_in: Amount) -> Option<Amount> {
        eth_in.checked_mul_bps(self.fee_bps)
    }

    /// Applies the configured floor to any price.
    pub fn floor_price(&self, price: Amount) -> Amount {
        Amount::max(&price, &self.price_floor)
    }

    /// Spot price implied by reserve and supply (`reserve * SCALE / supply`),
    /// falling back to the initial price for an empty supply.
    pub fn spot_price(&self, reserve: Amount, supply: Amount) -> Amount {
        if supply.is_zero() {
            return self.floor_price(self.initial_price);
        }
        match reserve.checked_div(supply) {
            Some(price) => self.floor_price(price),
            None => self.floor_price(self.initial_price),
        }
    }

    /// Tokens minted for `eth_in` and the resulting price.
    ///
    /// After the fee, the net ETH buys `t` tokens at an average price of
    /// `p * (1 + k * t / S)`, i.e. `t` is the positive root of
    /// `(p k / S) t^2 + p t - net = 0`.
    pub fn apply_purchase(&self, state: CurveState, eth_in: Amount) -> Result<PurchaseQuote, CurveError> {
        if eth_in.is_zero() {
            return Err(CurveError::ZeroAmount);
        }

        let price = self.floor_price(state.price);
        let fee = self.fee_for(eth_in).ok_or(CurveError::Overflow)?;
        let net = eth_in.saturating_sub(fee);

        let tokens_out = if state.supply.is_zero() {
            net.checked_div(price).ok_or(CurveError::Overflow)?
        } else {
            let a = price
                .checked_mul(self.sensitivity)
                .and_then(|pk| pk.checked_div(state.supply))
                .ok_or(CurveError::Overflow)?;
            solve_quadratic(a, price, net).ok_or(CurveError::Overflow)?
        };

        let average_price = if tokens_out.is_zero() {
            price
        } else {
            net.checked_div(tokens_out).ok_or(CurveError::Overflow)?
        };

        let new_supply = state.supply.checked_add(tokens_out).ok_or(CurveError::Overflow)?;
        let increase = if new_supply.is_zero() {
            Amount::ZERO
        } else {
            self.sensitivity
                .checked_mul(tokens_out)
                .and_then(|kt| kt.checked_div(new_supply))
                .ok_or(CurveError::Overflow)?
        };
        let new_price = Amount::ONE
            .checked_add(increase)
            .and_then(|factor| price.checked_mul(factor))
            .ok_or(CurveError::Overflow)?;

        Ok(PurchaseQuote {
            eth_in,
            fee,
            tokens_out,
            average_price,
            new_price: self.floor_price(new_price),
        })
    }

    /// ETH returned for selling `tokens_in` and the resulting price.
    ///
    /// Price falls linearly to `p * (1 - k * t / S)`, never below the floor;
    /// the sale executes at the midpoint of the old and new price.
    pub fn apply_sale(&self, state: CurveState, tokens_in: Amount) -> Result<SaleQuote, CurveError> {
        if tokens_in.is_zero() {
            return Err(CurveError::ZeroAmount);
        }
        if state.supply.is_zero() {
            return Err(CurveError::EmptySupply);
        }

        let clipped = state.supply.is_less_than(&tokens_in);
        let sold = Amount::min(&tokens_in, &state.supply);
        let price = self.floor_price(state.price);

        let drop = self
            .sensitivity
            .checked_mul(sold)
            .and_then(|kt| kt.checked_div(state.supply))
            .ok_or(CurveError::Overflow)?;
        let factor = Amount::ONE.saturating_sub(drop);
        let new_price = self.floor_price(price.checked_mul(factor).ok_or(CurveError::Overflow)?);

        let average_price = price
            .checked_add(new_price)
            .and_then(|sum| sum.checked_div(Amount::TWO))
            .ok_or(CurveError::Overflow)?;
        let eth_out = sold.checked_mul(average_price).ok_or(CurveError::Overflow)?;

        Ok(SaleQuote {
            tokens_in: sold,
            eth_out,
            average_price,
            new_price,
            clipped,
        })
    }
}
