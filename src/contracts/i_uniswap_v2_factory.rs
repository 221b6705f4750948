use ethers::prelude::*;

abigen!(
    IUniswapV2Factory,
    r#"[
        function getPair(address tokenA, address tokenB) external view returns (address pair)
        function allPairs(uint256 index) external view returns (address pair)
        function allPairsLength() external view returns (uint256 length)
        function feeTo() external view returns (address)
    ]"#
);
