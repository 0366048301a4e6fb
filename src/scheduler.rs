use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

/// Fan-out strategy across the chain set, chosen by the caller from its
/// knowledge of the client (constrained mobile clients get the sequential
/// profile, capable clients the bounded-parallel one). Injected rather than
/// sniffed from the environment so runs are deterministic and testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyProfile {
    /// One chain at a time with a fixed delay between chains.
    Sequential { inter_chain_delay: Duration },
    /// Fixed-size batches, each batch awaited before the next starts.
    BoundedParallel { batch_size: usize },
}

impl ConcurrencyProfile {
    /// Default profile for constrained clients.
    pub fn constrained() -> Self {
        Self::Sequential {
            inter_chain_delay: Duration::from_millis(250),
        }
    }

    /// Default profile for capable clients.
    pub fn capable() -> Self {
        Self::BoundedParallel { batch_size: 3 }
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, Self::Sequential { .. })
    }
}

/// The settled outcome of one chain's fetch. `result` is `None` when the
/// fetch errored or timed out; the chain's identity is kept either way so
/// consumers can render per-chain partial state.
#[derive(Debug, Clone)]
pub struct ChainOutcome<T> {
    pub chain_id: u64,
    pub result: Option<T>,
}

/// Runs `fetch` across every chain under the given profile.
///
/// Every per-chain future is time-boxed; a chain that errors or times out
/// contributes an empty outcome and never prevents the other chains from
/// completing. The returned vector holds one settled outcome per input
/// chain, in input order, and the call returns only once all attempts have
/// settled. Timed-out futures are dropped, not cancelled mid-transport;
/// a late response is simply discarded.
pub async fn run_across_chains<T, E, F, Fut>(
    profile: ConcurrencyProfile,
    per_chain_timeout: Duration,
    chains: &[u64],
    fetch: F,
) -> Vec<ChainOutcome<T>>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match profile {
        ConcurrencyProfile::Sequential { inter_chain_delay } => {
            let mut outcomes = Vec::with_capacity(chains.len());
            for (i, &chain_id) in chains.iter().enumerate() {
                outcomes.push(attempt(chain_id, per_chain_timeout, fetch(chain_id)).await);
                if i + 1 < chains.len() {
                    // small jitter keeps constrained clients from hitting
                    // every provider on an exact cadence
                    let jitter = rand::thread_rng().gen_range(0..25);
                    tokio::time::sleep(inter_chain_delay + Duration::from_millis(jitter)).await;
                }
            }
            outcomes
        }
        ConcurrencyProfile::BoundedParallel { batch_size } => {
            let batch_size = batch_size.max(1);
            let mut outcomes = Vec::with_capacity(chains.len());
            for batch in chains.chunks(batch_size) {
                let settled = futures::future::join_all(
                    batch
                        .iter()
                        .map(|&chain_id| attempt(chain_id, per_chain_timeout, fetch(chain_id))),
                )
                .await;
                outcomes.extend(settled);
            }
            outcomes
        }
    }
}

async fn attempt<T, E, Fut>(chain_id: u64, timeout: Duration, fut: Fut) -> ChainOutcome<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => ChainOutcome {
            chain_id,
            result: Some(value),
        },
        Ok(Err(e)) => {
            warn!("chain {} fetch failed: {}", chain_id, e);
            ChainOutcome {
                chain_id,
                result: None,
            }
        }
        Err(_) => {
            warn!("chain {} fetch timed out after {:?}", chain_id, timeout);
            ChainOutcome {
                chain_id,
                result: None,
            }
        }
    }
}
