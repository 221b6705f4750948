// Contracts Module - ABIs of the Factory/Pair/Router/ERC20 deployment

pub mod erc20;
pub mod i_uniswap_v2_factory;
pub mod i_uniswap_v2_pair;
pub mod i_uniswap_v2_router;

pub use erc20::Erc20;
pub use i_uniswap_v2_factory::IUniswapV2Factory;
pub use i_uniswap_v2_pair::IUniswapV2Pair;
pub use i_uniswap_v2_router::IUniswapV2Router;
