use ethers::prelude::*;

abigen!(
    IUniswapV2Router,
    r#"[
        function factory() external view returns (address)
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts)
    ]"#
);
