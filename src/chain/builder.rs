//! Unsigned `transferFrom` transaction assembly.

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::{Function, JsonAbi};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::gas::{GasLimitSource, GasPriceOracle, select_gas_limit};
use crate::chain::{NodeClient, TransferError};
use crate::config::ChainConfig;

const TRANSFER_FROM: &str = "transferFrom";

/// One token's transfer, derived from a finished session at transfer time.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Current holder of the token, as typed by the user.
    pub sender: String,
    pub contract: String,
    pub recipient: Address,
    /// Decimal or `0x`-prefixed hex.
    pub token_id: String,
    pub abi: Arc<JsonAbi>,
}

impl TransferRequest {
    pub fn contract_address(&self) -> Result<Address, TransferError> {
        parse_address("contract", &self.contract)
    }

    /// Calldata for `transferFrom(sender, recipient, tokenId)`.
    pub fn encode(&self) -> Result<Bytes, TransferError> {
        let function = find_transfer_from(&self.abi)?;
        let sender = parse_address("sender", &self.sender)?;
        let token_id = parse_token_id(&self.token_id)?;

        let input = function
            .abi_encode_input(&[
                DynSolValue::Address(sender),
                DynSolValue::Address(self.recipient),
                DynSolValue::Uint(token_id, 256),
            ])
            .map_err(|e| TransferError::Encoding(e.to_string()))?;
        Ok(input.into())
    }
}

/// The `transferFrom(address,address,uint256)` overload of `abi`.
fn find_transfer_from(abi: &JsonAbi) -> Result<&Function, TransferError> {
    abi.function(TRANSFER_FROM)
        .and_then(|overloads| {
            overloads.iter().find(|f| {
                let types: Vec<&str> = f.inputs.iter().map(|p| p.ty.as_str()).collect();
                types == ["address", "address", "uint256"]
            })
        })
        .ok_or_else(|| {
            TransferError::Encoding(
                "contract ABI has no transferFrom(address,address,uint256)".to_string(),
            )
        })
}

fn parse_address(what: &str, raw: &str) -> Result<Address, TransferError> {
    Address::from_str(raw.trim())
        .map_err(|_| TransferError::Encoding(format!("invalid {what} address {:?}", raw.trim())))
}

/// Token ids are decimal, or hex with a `0x` prefix.
pub fn parse_token_id(raw: &str) -> Result<U256, TransferError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransferError::Encoding("empty token id".to_string()));
    }
    U256::from_str(trimmed)
        .map_err(|_| TransferError::Encoding(format!("invalid token id {trimmed:?}")))
}

/// Gas parameters chosen for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    /// Wei per gas unit, from the oracle.
    pub price: u128,
    pub limit: u64,
    pub source: GasLimitSource,
}

/// A fully priced transaction that only lacks its nonce.
#[derive(Debug, Clone)]
pub struct PreparedTransfer {
    pub tx: TransactionRequest,
    pub gas: GasQuote,
}

impl PreparedTransfer {
    pub fn with_nonce(&self, nonce: u64) -> TransactionRequest {
        self.tx.clone().with_nonce(nonce)
    }
}

/// Encodes the call and prices it. Never touches the nonce.
#[derive(Clone)]
pub struct TransferBuilder {
    node: Arc<dyn NodeClient>,
    oracle: Arc<dyn GasPriceOracle>,
    from: Address,
    chain: ChainConfig,
}

impl TransferBuilder {
    pub fn new(
        node: Arc<dyn NodeClient>,
        oracle: Arc<dyn GasPriceOracle>,
        from: Address,
        chain: ChainConfig,
    ) -> Self {
        Self {
            node,
            oracle,
            from,
            chain,
        }
    }

    #[tracing::instrument(skip_all, fields(token_id = %request.token_id))]
    pub async fn prepare(&self, request: &TransferRequest) -> Result<PreparedTransfer, TransferError> {
        let input = request.encode()?;
        let to = request.contract_address()?;
        let price = self.oracle.gas_price().await?;

        let tx = TransactionRequest::default()
            .with_from(self.from)
            .with_to(to)
            .with_input(input)
            .with_value(U256::ZERO)
            .with_chain_id(self.chain.chain_id)
            .with_gas_price(price);
        let limit = select_gas_limit(self.node.as_ref(), &tx, &self.chain).await?;

        tracing::debug!(
            gas_price = price,
            gas_limit = limit.value,
            source = %limit.source,
            "transfer prepared"
        );
        Ok(PreparedTransfer {
            tx: tx.with_gas_limit(limit.value),
            gas: GasQuote {
                price,
                limit: limit.value,
                source: limit.source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GasLimitMode;
    use crate::test_utils::{ERC721_TRANSFER_FROM_ABI, FakeNode, FakeOracle, IERC721};
    use alloy::primitives::address;
    use alloy::sol_types::SolCall;

    const SIGNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const RECIPIENT: Address = address!("00000000000000000000000000000000000000aa");

    fn abi() -> Arc<JsonAbi> {
        Arc::new(serde_json::from_str(ERC721_TRANSFER_FROM_ABI).unwrap())
    }

    fn request(token_id: &str) -> TransferRequest {
        TransferRequest {
            sender: "0x0000000000000000000000000000000000000005".to_string(),
            contract: "0x00000000000000000000000000000000000000c0".to_string(),
            recipient: RECIPIENT,
            token_id: token_id.to_string(),
            abi: abi(),
        }
    }

    #[test]
    fn test_encode_matches_erc721_selector_and_args() {
        let data = request("7").encode().unwrap();

        let call = IERC721::transferFromCall::abi_decode(&data).unwrap();
        assert_eq!(call.from, address!("0000000000000000000000000000000000000005"));
        assert_eq!(call.to, RECIPIENT);
        assert_eq!(call.tokenId, U256::from(7));
    }

    #[test]
    fn test_encode_accepts_hex_token_id() {
        let data = request("0xff").encode().unwrap();
        let call = IERC721::transferFromCall::abi_decode(&data).unwrap();
        assert_eq!(call.tokenId, U256::from(255));
    }

    #[test]
    fn test_encode_rejects_bad_inputs() {
        assert!(matches!(
            request("seven").encode(),
            Err(TransferError::Encoding(_))
        ));
        assert!(matches!(request("  ").encode(), Err(TransferError::Encoding(_))));

        let mut bad_sender = request("1");
        bad_sender.sender = "0xSENDER".to_string();
        assert!(matches!(bad_sender.encode(), Err(TransferError::Encoding(_))));
    }

    #[test]
    fn test_encode_requires_three_argument_overload() {
        let abi = r#"[{"type":"function","name":"transferFrom","stateMutability":"nonpayable",
            "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
            "outputs":[{"name":"","type":"bool"}]}]"#;
        let mut req = request("1");
        req.abi = Arc::new(serde_json::from_str(abi).unwrap());

        let err = req.encode().unwrap_err();
        assert!(err.to_string().contains("transferFrom(address,address,uint256)"));
    }

    #[tokio::test]
    async fn test_prepare_builds_legacy_priced_request() {
        let node = Arc::new(FakeNode::new(0).with_estimate(Ok(50_000)));
        let oracle = Arc::new(FakeOracle::new(12_000_000_000));
        let builder = TransferBuilder::new(node.clone(), oracle, SIGNER, ChainConfig::default());

        let prepared = builder.prepare(&request("7")).await.unwrap();

        assert_eq!(prepared.gas.price, 12_000_000_000);
        assert_eq!(prepared.gas.limit, 60_000);
        assert_eq!(prepared.gas.source, GasLimitSource::Estimated);
        assert_eq!(prepared.tx.gas_price, Some(12_000_000_000));
        assert_eq!(prepared.tx.gas, Some(60_000));
        assert_eq!(prepared.tx.from, Some(SIGNER));
        assert_eq!(prepared.tx.chain_id, Some(1));
        assert!(prepared.tx.nonce.is_none());
        assert_eq!(prepared.with_nonce(9).nonce, Some(9));
    }

    #[tokio::test]
    async fn test_prepare_oracle_failure_skips_estimation() {
        let node = Arc::new(FakeNode::new(0));
        let oracle = Arc::new(FakeOracle::new(1).failing_on(&[1]));
        let builder = TransferBuilder::new(node.clone(), oracle, SIGNER, ChainConfig::default());

        let err = builder.prepare(&request("7")).await.unwrap_err();

        assert!(matches!(err, TransferError::Estimation(_)));
        assert_eq!(node.estimate_calls(), 0);
    }

    #[tokio::test]
    async fn test_prepare_fixed_ceiling() {
        let node = Arc::new(FakeNode::new(0));
        let oracle = Arc::new(FakeOracle::new(1_000_000_000));
        let chain = ChainConfig {
            gas_limit_mode: GasLimitMode::Fixed,
            gas_limit_ceiling: 120_000,
            ..ChainConfig::default()
        };
        let builder = TransferBuilder::new(node, oracle, SIGNER, chain);

        let prepared = builder.prepare(&request("1")).await.unwrap();
        assert_eq!(prepared.gas.limit, 120_000);
        assert_eq!(prepared.gas.source, GasLimitSource::Ceiling);
    }
}
