use crate::ledger::{
    Block,
    Transaction,
};
use alloy::primitives::{
    U256,
    utils::format_ether,
};

pub const NATIVE_SYMBOL: &str = "MON";

/// Fee of `tx` as mined in `block`, in wei.
///
/// `gas × (base + priority)` when both are known, else `gas × gas_price`.
/// There is no cap at the transaction's max fee per gas.
pub fn compute_fee(tx: &Transaction, block: &Block) -> Option<U256> {
    let gas = tx.gas.filter(|g| *g != 0)?;
    let gas = U256::from(gas);
    if let (Some(base), Some(priority)) =
        (block.base_fee_per_gas, tx.max_priority_fee_per_gas)
    {
        let price = U256::from(base).saturating_add(U256::from(priority));
        return Some(gas.saturating_mul(price));
    }
    let price = tx.gas_price.filter(|p| *p != 0)?;
    Some(gas.saturating_mul(U256::from(price)))
}

/// e.g. `0.001 MON`; an absent fee shows as `0.000 MON`.
pub fn format_display_amount(fee: Option<U256>) -> String {
    format!("{:.3} {NATIVE_SYMBOL}", fee_as_number(fee))
}

/// The fee in whole units, rounded to three decimals.
pub fn fee_as_number(fee: Option<U256>) -> f64 {
    let Some(fee) = fee else {
        return 0.0;
    };
    let value = format_ether(fee).parse::<f64>().unwrap_or(0.0);
    if !value.is_finite() {
        return 0.0;
    }
    (value * 1000.0).round() / 1000.0
}
