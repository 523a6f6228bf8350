use alloy_primitives::{ruint::UintTryTo, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[inline]
fn try_convert_to_u128(value: U256) -> Option<u128> {
    value.uint_try_to().ok()
}

#[inline]
fn convert_from_u128(value: u128) -> U256 {
    U256::from_limbs([value as u64, (value >> 64) as u64, 0, 0])
}

/// Integer square root for U256 using the Babylonian method.
/// It returns the floor of the square root.
fn sqrt_u256(n: U256) -> U256 {
    if n.is_zero() {
        return U256::ZERO;
    }

    // x_{k+1} = ((N / x_k) + x_k) / 2, monotonically decreasing from the
    // first step, so stop as soon as it no longer shrinks.
    let two = convert_from_u128(2);
    let mut current = n;
    let mut next = (n >> 1) + U256::ONE;

    while next < current {
        current = next;
        next = (n / next + next) / two;
    }
    current
}

/// Fixed-point decimal with 18 fractional digits.
///
/// The raw representation matches on-chain wei, so a `uint256` token or ETH
/// amount converts without rescaling.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const EPSILON: Amount = Amount(1);
    pub const MAX: Amount = Amount(u128::MAX);
    pub const ONE: Amount = Amount(Self::SCALE);
    pub const TWO: Amount = Amount(2 * Self::SCALE);
    pub const FOUR: Amount = Amount(4 * Self::SCALE);
    pub const SCALE: u128 = 1_000_000_000__000_000_000;
    pub const DECIMALS: usize = 18;

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let result = self.to_u256().checked_mul(rhs.to_u256())? / Self::u256_scale();
        Some(Self(try_convert_to_u128(result)?))
    }

    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let result = self.to_u256().checked_mul(Self::u256_scale())? / rhs.to_u256();
        Some(Self(try_convert_to_u128(result)?))
    }

    pub fn checked_sq(self) -> Option<Self> {
        self.checked_mul(self)
    }

    /// Square root computed over `raw * SCALE`, so all 18 fractional digits
    /// are kept.
    pub fn checked_sqrt(self) -> Option<Self> {
        let widened = self.to_u256().checked_mul(Self::u256_scale())?;
        Some(Self(try_convert_to_u128(sqrt_u256(widened))?))
    }

    /// `self * bps / 10_000`, rounded down.
    pub fn checked_mul_bps(self, bps: u32) -> Option<Self> {
        let result = self.to_u256().checked_mul(U256::from(bps))? / U256::from(10_000u32);
        Some(Self(try_convert_to_u128(result)?))
    }

    #[inline]
    pub fn is_less_than(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    #[inline]
    pub fn min(&self, other: &Self) -> Self {
        if self.is_less_than(other) {
            *self
        } else {
            *other
        }
    }

    #[inline]
    pub fn max(&self, other: &Self) -> Self {
        if self.is_less_than(other) {
            *other
        } else {
            *self
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Builds `value / 10^scale`. Panics when the scale exceeds 18 digits or the
    /// result does not fit, so keep it to constants and tests.
    pub fn from_u128_with_scale(value: u128, scale: u8) -> Self {
        assert!(scale as usize <= Self::DECIMALS, "scale exceeds 18 decimals");
        let factor = 10u128.pow((Self::DECIMALS - scale as usize) as u32);
        Self(value.checked_mul(factor).expect("amount overflow"))
    }

    #[inline]
    pub fn from_u128_raw(value: u128) -> Self {
        Self(value)
    }

    #[inline]
    pub fn to_u128_raw(&self) -> u128 {
        self.0
    }

    /// Converts an 18-decimal on-chain integer (wei), `None` if it exceeds u128.
    #[inline]
    pub fn from_wei(value: U256) -> Option<Self> {
        Some(Self(try_convert_to_u128(value)?))
    }

    #[inline]
    pub fn to_wei(&self) -> U256 {
        self.to_u256()
    }

    #[inline]
    pub fn to_u256(&self) -> U256 {
        convert_from_u128(self.0)
    }

    #[inline]
    pub fn u256_scale() -> U256 {
        convert_from_u128(Self::SCALE)
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let integral = self.0 / Self::SCALE;
        let fraction = self.0 % Self::SCALE;

        let max_scale_len = Amount::DECIMALS;
        let frac_str = format!("{:0>max_scale_len$}", fraction, max_scale_len = max_scale_len);

        let final_frac_str = match f.precision() {
            Some(p) => {
                let len = p.min(max_scale_len);
                &frac_str[0..len]
            }
            None => {
                let trimmed = frac_str.trim_end_matches('0');
                if trimmed.is_empty() {
                    "0"
                } else {
                    trimmed
                }
            }
        };

        write!(f, "{}.{}", integral, final_frac_str)
    }
}

/// Errors from parsing a decimal string into an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountParseError {
    Empty,
    InvalidDigit(String),
    TooManyDecimals(usize),
    Overflow,
}

impl core::fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AmountParseError::Empty => write!(f, "empty amount"),
            AmountParseError::InvalidDigit(s) => write!(f, "invalid amount '{}'", s),
            AmountParseError::TooManyDecimals(n) => {
                write!(f, "{} fractional digits exceeds {}", n, Amount::DECIMALS)
            }
            AmountParseError::Overflow => write!(f, "amount overflows 128 bits"),
        }
    }
}

impl std::error::Error for AmountParseError {}

impl core::str::FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !is_digits(int_part) || !is_digits(frac_part) {
            return Err(AmountParseError::InvalidDigit(s.to_string()));
        }
        if frac_part.len() > Self::DECIMALS {
            return Err(AmountParseError::TooManyDecimals(frac_part.len()));
        }

        let integral: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| AmountParseError::Overflow)?
        };
        let fraction: u128 = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac_part, width = Self::DECIMALS);
            padded.parse().map_err(|_| AmountParseError::Overflow)?
        };

        integral
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(fraction))
            .map(Self)
            .ok_or(AmountParseError::Overflow)
    }
}

// Serialized as a decimal string so JSON readers never round through f64.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
