// Contracts Module - Public ABIs Only

pub mod erc20;
pub mod i_uniswap_v3_factory;
pub mod i_uniswap_v3_pool;

// Public exports
pub use erc20::Erc20;
pub use i_uniswap_v3_factory::IUniswapV3Factory;
pub use i_uniswap_v3_pool::IUniswapV3Pool;
