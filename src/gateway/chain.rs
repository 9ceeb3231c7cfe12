use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{ExecError, Side, TokenId};

/// Order the core asks the capability to sign: a taker buy of one outcome
/// token at a limit price for a share quantity. Decimal amounts here; the
/// capability converts to integer base units when it builds the EIP-712
/// payload.
#[derive(Clone, Debug)]
pub struct OrderRequest {
    pub token_id: TokenId,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub maker: Address,
    pub nonce: u64,
    /// Gas limit the submission may spend; raised between retries when the
    /// chain reports the allowance was exceeded.
    pub gas_limit: u64,
}

/// Bytes of a signed order, opaque to the core.
#[derive(Clone, Debug)]
pub struct SignedOrder(pub Vec<u8>);

/// Fee view of the chain at submission time. Gwei prices; `cost_matic`
/// converts to MATIC for the oracle's USDC conversion.
#[derive(Clone, Copy, Debug)]
pub struct GasEstimate {
    pub base_fee_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
    pub gas_limit: u64,
}

impl GasEstimate {
    pub fn price_gwei(&self) -> Decimal {
        self.base_fee_gwei + self.priority_fee_gwei
    }

    /// MATIC burned by one transaction at this estimate. 1 gwei = 1e-9 MATIC.
    pub fn cost_matic(&self) -> Decimal {
        self.price_gwei() * Decimal::from(self.gas_limit) * dec!(0.000000001)
    }
}

/// Transaction receipt, reduced to what the executor needs.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: U256,
    pub effective_gas_price_wei: U256,
}

impl TxReceipt {
    /// Realized gas cost in MATIC.
    pub fn cost_matic(&self) -> Decimal {
        let wei = self.gas_used.saturating_mul(self.effective_gas_price_wei);
        // Wei fits Decimal's 96-bit mantissa for any sane gas cost; saturate
        // rather than wrap if a malicious receipt overflows it.
        let wei = Decimal::from(wei.min(U256::from(u128::MAX)).to::<u128>());
        wei * dec!(0.000000000000000001)
    }
}

/// Signing + submission capability the live executor invokes. Implementations
/// wrap a concrete chain client and wallet; the core never assumes one.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn sign_order(&self, order: &OrderRequest) -> Result<SignedOrder, ExecError>;

    async fn submit_order(&self, signed: &SignedOrder) -> Result<B256, ExecError>;

    /// USDC balance of the wallet.
    async fn get_balance(&self, wallet: Address) -> Result<Decimal, ExecError>;

    /// Chain's pending-nonce view — the nonce manager's source of truth.
    async fn get_pending_nonce(&self, wallet: Address) -> Result<u64, ExecError>;

    async fn get_gas_estimate(&self) -> Result<GasEstimate, ExecError>;

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<TxReceipt, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_estimate_cost() {
        let est = GasEstimate {
            base_fee_gwei: dec!(30),
            priority_fee_gwei: dec!(2),
            gas_limit: 150_000,
        };
        // 32 gwei * 150k gas = 4.8e6 gwei = 0.0048 MATIC
        assert_eq!(est.cost_matic(), dec!(0.0048));
    }

    #[test]
    fn test_receipt_cost_matic() {
        let receipt = TxReceipt {
            tx_hash: B256::ZERO,
            success: true,
            gas_used: U256::from(100_000u64),
            effective_gas_price_wei: U256::from(32_000_000_000u64), // 32 gwei
        };
        assert_eq!(receipt.cost_matic(), dec!(0.0032));
    }
}
