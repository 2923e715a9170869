//! Miscellaneous helper utilities.

use crate::errors::{AppError, Result};
use alloy_primitives::{Address, U256};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::Signed;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize `tracing` subscriber with env-based filter.
///
/// If `RUST_LOG` is not set, defaults to `info` level.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Seconds since the unix epoch, as used by on-chain deadlines.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Convert a human-readable decimal amount ("1.5") into integer base units.
///
/// Digits beyond `decimals` are truncated. Negative amounts are rejected.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    let value = BigDecimal::from_str(amount.trim())
        .map_err(|e| AppError::UnitParse(format!("{amount}: {e}")))?;
    let scale = BigDecimal::new(BigInt::from(1), -(decimals as i64));
    let (base_units, _) = (value * scale).with_scale(0).into_bigint_and_exponent();
    if base_units.is_negative() {
        return Err(AppError::UnitParse(format!("{amount}: negative amount")));
    }
    U256::from_str_radix(&base_units.to_string(), 10)
        .map_err(|e| AppError::UnitParse(format!("{amount}: {e}")))
}

/// Convert integer base units into a decimal amount of whole tokens.
pub fn format_units(amount: U256, decimals: u8) -> Result<BigDecimal> {
    let digits = BigInt::from_str(&amount.to_string())
        .map_err(|e| AppError::UnitParse(format!("{amount}: {e}")))?;
    Ok(BigDecimal::new(digits, decimals as i64))
}

// ---------- ethers <-> alloy boundary ----------

pub fn to_ethers_u256(value: U256) -> ethers::types::U256 {
    ethers::types::U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub fn from_ethers_u256(value: ethers::types::U256) -> U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U256::from_be_bytes(buf)
}

pub fn to_ethers_address(address: Address) -> ethers::types::Address {
    ethers::types::Address::from_slice(address.as_slice())
}

pub fn from_ethers_address(address: ethers::types::Address) -> Address {
    Address::from_slice(address.as_bytes())
}
