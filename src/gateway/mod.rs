pub mod chain;
pub mod oracle;

pub use chain::{ChainClient, GasEstimate, OrderRequest, SignedOrder, TxReceipt};
pub use oracle::{CachedOracle, PriceOracle, StaticOracle};
