use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;
use log::{debug, warn};

use crate::error::RpcError;

/// A single contract read to be batched in a multicall.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Call {
    /// Target contract address
    pub target: Address,
    /// Encoded function call data
    pub call_data: Bytes,
}

/// Multicall3 batch executor.
///
/// Batches many `eth_call`s into one `aggregate3` round trip. Every call is
/// sent with `allowFailure = true`, so a single reverting token contract
/// never poisons the batch: its slot comes back as `None` and the remaining
/// results stay aligned with the request order.
#[derive(Clone)]
pub struct Multicall {
    provider: Arc<Provider<Http>>,
    multicall_address: Address,
    batch_size: usize,
    timeout: Duration,
}

impl Multicall {
    pub fn new(provider: Arc<Provider<Http>>, multicall_address: Address, batch_size: usize) -> Self {
        // RPC providers start rejecting batches past a few hundred calls.
        let batch_size = batch_size.clamp(10, 200);
        Self {
            provider,
            multicall_address,
            batch_size,
            timeout: Duration::from_secs(8),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs a batch of calls. The returned vector is index-aligned with the
    /// input; a failed call (revert, empty return) yields `None` in its slot.
    pub async fn run(&self, calls: Vec<Call>) -> Result<Vec<Option<Bytes>>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Coalesce identical calls to reduce load
        let mut unique_calls = indexmap::IndexMap::new();
        let mut original_indices = vec![0; calls.len()];
        for (i, call) in calls.iter().enumerate() {
            let (index, _) = unique_calls.insert_full((call.target, call.call_data.clone()), ());
            original_indices[i] = index;
        }

        let unique_call_vec: Vec<_> = unique_calls
            .into_keys()
            .map(|(target, call_data)| Call { target, call_data })
            .collect();
        if unique_call_vec.len() < calls.len() {
            debug!(
                "Multicall coalesced {} calls into {}",
                calls.len(),
                unique_call_vec.len()
            );
        }

        let mut all_results_unique: Vec<Option<Bytes>> = Vec::with_capacity(unique_call_vec.len());
        for call_chunk in unique_call_vec.chunks(self.batch_size) {
            let chunk_results = self.execute_aggregate3(call_chunk).await?;
            all_results_unique.extend(chunk_results);
        }

        // Fan the coalesced results back out in the original order
        Ok(original_indices
            .into_iter()
            .map(|index| all_results_unique[index].clone())
            .collect())
    }

    /// Executes one `aggregate3` chunk as a single `eth_call`.
    async fn execute_aggregate3(&self, calls: &[Call]) -> Result<Vec<Option<Bytes>>, RpcError> {
        // aggregate3(Call3[] calldata calls) returns (Result[] memory)
        // Call3: (address target, bool allowFailure, bytes callData)
        // Result: (bool success, bytes returnData)
        let call_tokens: Vec<Token> = calls
            .iter()
            .map(|call| {
                Token::Tuple(vec![
                    Token::Address(call.target),
                    Token::Bool(true),
                    Token::Bytes(call.call_data.to_vec()),
                ])
            })
            .collect();

        #[allow(deprecated)]
        let function = Function {
            name: "aggregate3".to_string(),
            inputs: vec![Param {
                name: "calls".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::Address,
                    ParamType::Bool,
                    ParamType::Bytes,
                ]))),
                internal_type: None,
            }],
            outputs: vec![Param {
                name: "returnData".to_string(),
                kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::Bool,
                    ParamType::Bytes,
                ]))),
                internal_type: None,
            }],
            constant: None,
            state_mutability: StateMutability::Payable,
        };

        let calldata = function
            .encode_input(&[Token::Array(call_tokens)])
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        let tx_request = ethers::types::TransactionRequest::new()
            .to(self.multicall_address)
            .data(calldata);
        let typed_tx: ethers::types::transaction::eip2718::TypedTransaction = tx_request.into();

        let response = match tokio::time::timeout(self.timeout, self.provider.call(&typed_tx, None)).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!("multicall aggregate3 failed: {}", e);
                return Err(RpcError::Transport(e.to_string()));
            }
            Err(_) => return Err(RpcError::Timeout(self.timeout)),
        };

        let decoded = ethers::abi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ])))],
            &response,
        )
        .map_err(|e| RpcError::Decode(e.to_string()))?;

        let results_array = decoded
            .into_iter()
            .next()
            .and_then(|t| t.into_array())
            .ok_or_else(|| RpcError::Decode("invalid multicall response format".to_string()))?;

        let mut return_data = Vec::with_capacity(calls.len());
        for result_token in results_array {
            match result_token {
                Token::Tuple(mut tuple) if tuple.len() >= 2 => {
                    let success = matches!(tuple.first(), Some(Token::Bool(true)));
                    match tuple.remove(1) {
                        Token::Bytes(data) if success && !data.is_empty() => {
                            return_data.push(Some(Bytes::from(data)));
                        }
                        _ => return_data.push(None),
                    }
                }
                _ => return_data.push(None),
            }
        }

        if return_data.len() != calls.len() {
            return Err(RpcError::Decode(format!(
                "multicall returned {} results for {} calls",
                return_data.len(),
                calls.len()
            )));
        }

        Ok(return_data)
    }
}
