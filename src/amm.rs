//! Constant-product AMM pool for LVE Node
//!
//! A single two-asset pool (LVE against the UZS counter asset) with the
//! x·y=k rule, a 0.3% swap fee retained by the pool, and LP shares tracked
//! per provider. All arithmetic is integer u128; nothing here touches a
//! float, so two nodes replaying the same blocks end in identical state.
//!
//! The LVE side of every operation settles against the chain balance in the
//! block pipeline; the UZS side settles in the pool-local balance ledger
//! kept alongside the reserves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Amount, coins};

/// Swap fee: 3 / 1000 = 0.3%.
pub const FEE_NUMERATOR: u128 = 3;
pub const FEE_DENOMINATOR: u128 = 1000;
/// UZS issued to the faucet at genesis so liquidity can be bootstrapped.
pub const GENESIS_UZS_ALLOCATION: Amount = coins(1_000_000);
/// Allowed deviation from the pool ratio when adding liquidity: 1%.
const RATIO_TOLERANCE_PERCENT: u128 = 1;

/// The two assets the pool trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolToken {
    Lve,
    Uzs,
}

impl std::str::FromStr for PoolToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LVE" => Ok(PoolToken::Lve),
            "UZS" => Ok(PoolToken::Uzs),
            other => Err(format!("unknown pool token: {other}")),
        }
    }
}

impl std::fmt::Display for PoolToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolToken::Lve => f.write_str("LVE"),
            PoolToken::Uzs => f.write_str("UZS"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool has no liquidity yet")]
    Uninitialized,
    #[error("amounts must be positive")]
    ZeroAmount,
    #[error("deposit ratio deviates more than {RATIO_TOLERANCE_PERCENT}% from the pool ratio")]
    RatioMismatch,
    #[error("slippage exceeded: would receive {would_receive}, minimum {minimum}")]
    SlippageExceeded { would_receive: Amount, minimum: Amount },
    #[error("{address} holds {available} LP, {needed} required")]
    InsufficientLp { address: String, needed: Amount, available: Amount },
    #[error("{address} holds {available} UZS, {needed} required")]
    InsufficientUzs { address: String, needed: Amount, available: Amount },
    #[error("swap would drain the pool")]
    InsufficientLiquidity,
}

/// A swap preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub amount_out: Amount,
    pub fee: Amount,
    /// Relative spot-price move caused by the swap, in percent. Advisory
    /// only; never feeds back into consensus state.
    pub price_impact_percent: f64,
}

/// Pool reserves and LP shares, plus the UZS balance ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmmState {
    pub reserve_lve: Amount,
    pub reserve_uzs: Amount,
    pub total_lp: Amount,
    pub lp_balances: HashMap<String, Amount>,
    pub uzs_balances: HashMap<String, Amount>,
}

impl AmmState {
    /// Genesis pool state: empty reserves, the configured UZS allocations.
    pub fn genesis(uzs_allocations: &[(String, Amount)]) -> Self {
        let mut uzs_balances = HashMap::new();
        for (address, amount) in uzs_allocations {
            *uzs_balances.entry(address.clone()).or_insert(0) += amount;
        }
        Self {
            reserve_lve: 0,
            reserve_uzs: 0,
            total_lp: 0,
            lp_balances: HashMap::new(),
            uzs_balances,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.reserve_lve > 0 && self.reserve_uzs > 0
    }

    pub fn uzs_balance_of(&self, address: &str) -> Amount {
        self.uzs_balances.get(address).copied().unwrap_or(0)
    }

    pub fn lp_balance_of(&self, address: &str) -> Amount {
        self.lp_balances.get(address).copied().unwrap_or(0)
    }

    fn reserves(&self, token_in: PoolToken) -> (u128, u128) {
        match token_in {
            PoolToken::Lve => (self.reserve_lve as u128, self.reserve_uzs as u128),
            PoolToken::Uzs => (self.reserve_uzs as u128, self.reserve_lve as u128),
        }
    }

    fn debit_uzs(&mut self, address: &str, amount: Amount) -> Result<(), PoolError> {
        let available = self.uzs_balance_of(address);
        if available < amount {
            return Err(PoolError::InsufficientUzs {
                address: address.to_string(),
                needed: amount,
                available,
            });
        }
        self.uzs_balances.insert(address.to_string(), available - amount);
        Ok(())
    }

    pub(crate) fn credit_uzs(&mut self, address: &str, amount: Amount) {
        *self.uzs_balances.entry(address.to_string()).or_insert(0) += amount;
    }

    /// Deposit both assets and mint LP shares.
    ///
    /// The first deposit sets the price and mints `sqrt(dLve · dUzs)`.
    /// Later deposits must match the pool ratio within the tolerance and
    /// mint pro-rata to the smaller side.
    pub fn add_liquidity(
        &mut self,
        provider: &str,
        d_lve: Amount,
        d_uzs: Amount,
    ) -> Result<Amount, PoolError> {
        if d_lve == 0 || d_uzs == 0 {
            return Err(PoolError::ZeroAmount);
        }
        self.debit_uzs(provider, d_uzs)?;
        let minted = if self.total_lp == 0 {
            isqrt(d_lve as u128 * d_uzs as u128) as Amount
        } else {
            let (r_lve, r_uzs) = (self.reserve_lve as u128, self.reserve_uzs as u128);
            // |dLve·rUzs − dUzs·rLve| bounded relative to dLve·rUzs
            let lhs = d_lve as u128 * r_uzs;
            let rhs = d_uzs as u128 * r_lve;
            if lhs.abs_diff(rhs) * 100 > lhs * RATIO_TOLERANCE_PERCENT {
                // Undo the UZS debit before surfacing the error
                self.credit_uzs(provider, d_uzs);
                return Err(PoolError::RatioMismatch);
            }
            let by_lve = d_lve as u128 * self.total_lp as u128 / r_lve;
            let by_uzs = d_uzs as u128 * self.total_lp as u128 / r_uzs;
            by_lve.min(by_uzs) as Amount
        };
        self.reserve_lve += d_lve;
        self.reserve_uzs += d_uzs;
        self.total_lp += minted;
        *self.lp_balances.entry(provider.to_string()).or_insert(0) += minted;
        Ok(minted)
    }

    /// Burn LP shares and withdraw both assets pro-rata. Returns the LVE
    /// amount the caller must credit on the chain balance; the UZS side is
    /// settled here.
    pub fn remove_liquidity(&mut self, provider: &str, lp: Amount) -> Result<(Amount, Amount), PoolError> {
        if lp == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let held = self.lp_balance_of(provider);
        if held < lp {
            return Err(PoolError::InsufficientLp {
                address: provider.to_string(),
                needed: lp,
                available: held,
            });
        }
        let d_lve = (lp as u128 * self.reserve_lve as u128 / self.total_lp as u128) as Amount;
        let d_uzs = (lp as u128 * self.reserve_uzs as u128 / self.total_lp as u128) as Amount;
        self.reserve_lve -= d_lve;
        self.reserve_uzs -= d_uzs;
        self.total_lp -= lp;
        self.lp_balances.insert(provider.to_string(), held - lp);
        self.credit_uzs(provider, d_uzs);
        Ok((d_lve, d_uzs))
    }

    /// Preview a swap without touching state.
    pub fn quote(&self, token_in: PoolToken, amount_in: Amount) -> Result<Quote, PoolError> {
        if !self.is_initialized() {
            return Err(PoolError::Uninitialized);
        }
        if amount_in == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let (reserve_in, reserve_out) = self.reserves(token_in);
        let in_with_fee = amount_in as u128 * (FEE_DENOMINATOR - FEE_NUMERATOR);
        let amount_out = in_with_fee * reserve_out / (reserve_in * FEE_DENOMINATOR + in_with_fee);
        if amount_out == 0 || amount_out >= reserve_out {
            return Err(PoolError::InsufficientLiquidity);
        }
        let fee = (amount_in as u128 * FEE_NUMERATOR / FEE_DENOMINATOR) as Amount;
        let price_before = reserve_out as f64 / reserve_in as f64;
        let price_after = (reserve_out - amount_out) as f64 / (reserve_in + amount_in as u128) as f64;
        let price_impact_percent = ((price_before - price_after).abs() / price_before) * 100.0;
        Ok(Quote {
            amount_out: amount_out as Amount,
            fee,
            price_impact_percent,
        })
    }

    /// Execute a swap. The taker pays `amount_in` of `token_in` and receives
    /// the quoted output of the other asset, or the whole call fails with
    /// `SlippageExceeded` and no state changes.
    ///
    /// The LVE leg settles on the chain balance in the block pipeline; the
    /// UZS leg settles here.
    pub fn swap(
        &mut self,
        payer: &str,
        token_in: PoolToken,
        amount_in: Amount,
        min_amount_out: Amount,
    ) -> Result<Amount, PoolError> {
        let quote = self.quote(token_in, amount_in)?;
        if quote.amount_out < min_amount_out {
            return Err(PoolError::SlippageExceeded {
                would_receive: quote.amount_out,
                minimum: min_amount_out,
            });
        }
        let k_before = self.reserve_lve as u128 * self.reserve_uzs as u128;
        match token_in {
            PoolToken::Lve => {
                self.reserve_lve += amount_in;
                self.reserve_uzs -= quote.amount_out;
                self.credit_uzs(payer, quote.amount_out);
            }
            PoolToken::Uzs => {
                self.debit_uzs(payer, amount_in)?;
                self.reserve_uzs += amount_in;
                self.reserve_lve -= quote.amount_out;
                // LVE output credited on the chain balance by the caller
            }
        }
        let k_after = self.reserve_lve as u128 * self.reserve_uzs as u128;
        debug_assert!(k_after >= k_before, "fee must keep k non-decreasing");
        Ok(quote.amount_out)
    }
}

/// Integer square root (Newton's method) over u128.
fn isqrt(value: u128) -> u128 {
    if value < 2 {
        return value;
    }
    let mut x = value;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{self, Network};

    fn funded_pool() -> (AmmState, String) {
        let faucet = crypto::faucet_address(Network::Testnet);
        let mut state = AmmState::genesis(&[(faucet.clone(), GENESIS_UZS_ALLOCATION)]);
        state.add_liquidity(&faucet, coins(1000), coins(1000)).unwrap();
        (state, faucet)
    }

    #[test]
    fn first_deposit_mints_sqrt() {
        let (state, faucet) = funded_pool();
        assert_eq!(state.total_lp, isqrt(coins(1000) as u128 * coins(1000) as u128) as Amount);
        assert_eq!(state.lp_balance_of(&faucet), state.total_lp);
        assert_eq!(state.uzs_balance_of(&faucet), GENESIS_UZS_ALLOCATION - coins(1000));
    }

    #[test]
    fn later_deposit_enforces_ratio() {
        let (mut state, faucet) = funded_pool();
        assert_eq!(
            state.add_liquidity(&faucet, coins(100), coins(300)),
            Err(PoolError::RatioMismatch)
        );
        // A failed add must not leak the UZS debit
        assert_eq!(state.uzs_balance_of(&faucet), GENESIS_UZS_ALLOCATION - coins(1000));
        let lp_before = state.total_lp;
        let minted = state.add_liquidity(&faucet, coins(100), coins(100)).unwrap();
        assert_eq!(minted, lp_before / 10);
    }

    #[test]
    fn swap_bounds_match_constant_product() {
        let (mut state, faucet) = funded_pool();
        // 100 LVE in against (1000, 1000): out ≈ 90.66, so min-out 95 fails
        let err = state
            .swap(&faucet, PoolToken::Lve, coins(100), coins(95))
            .unwrap_err();
        assert!(matches!(err, PoolError::SlippageExceeded { .. }));
        assert_eq!(state.reserve_lve, coins(1000));

        let k_before = state.reserve_lve as u128 * state.reserve_uzs as u128;
        let out = state
            .swap(&faucet, PoolToken::Lve, coins(100), coins(90))
            .unwrap();
        assert!(out > coins(90) && out < coins(91), "got {out}");
        let k_after = state.reserve_lve as u128 * state.reserve_uzs as u128;
        assert!(k_after > k_before, "fee must grow k");
    }

    #[test]
    fn uzs_swap_debits_pool_ledger() {
        let (mut state, faucet) = funded_pool();
        let uzs_before = state.uzs_balance_of(&faucet);
        let out = state.swap(&faucet, PoolToken::Uzs, coins(50), 0).unwrap();
        assert!(out > 0);
        assert_eq!(state.uzs_balance_of(&faucet), uzs_before - coins(50));
        // Swapping UZS without holding any fails
        let err = state.swap("tLVE_nobody", PoolToken::Uzs, coins(1), 0).unwrap_err();
        assert!(matches!(err, PoolError::InsufficientUzs { .. }));
    }

    #[test]
    fn remove_liquidity_is_pro_rata() {
        let (mut state, faucet) = funded_pool();
        let lp = state.lp_balance_of(&faucet);
        let (d_lve, d_uzs) = state.remove_liquidity(&faucet, lp / 2).unwrap();
        assert_eq!(d_lve, coins(500));
        assert_eq!(d_uzs, coins(500));
        assert_eq!(state.reserve_lve, coins(500));
        assert!(state
            .remove_liquidity(&faucet, lp)
            .is_err_and(|e| matches!(e, PoolError::InsufficientLp { .. })));
    }

    #[test]
    fn quote_reports_fee_and_impact() {
        let (state, _) = funded_pool();
        let quote = state.quote(PoolToken::Lve, coins(100)).unwrap();
        assert_eq!(quote.fee, coins(100) * 3 / 1000);
        assert!(quote.price_impact_percent > 0.0);
        assert!(AmmState::genesis(&[])
            .quote(PoolToken::Lve, coins(1))
            .is_err_and(|e| e == PoolError::Uninitialized));
    }
}
