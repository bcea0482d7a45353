//! Uniswap V3 contract bindings and deployment constants (Ethereum mainnet).

use alloy_primitives::aliases::U24;
use alloy_primitives::{address, b256, keccak256, Address, B256};
use alloy_sol_types::{sol, SolValue};

pub const QUOTER_V2: Address = address!("0209c4Dc18B2A1439fD2427E34E7cF3c6B91cFB9");
pub const FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

pub const POOL_INIT_CODE_HASH: B256 =
    b256!("e34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54");

sol! {
    struct QuoteExactInputSingleParams {
        address tokenIn;
        address tokenOut;
        uint256 amountIn;
        uint24 fee;
        uint160 sqrtPriceLimitX96;
    }

    interface IQuoterV2 {
        function quoteExactInputSingle(QuoteExactInputSingleParams memory params)
            external
            returns (
                uint256 amountOut,
                uint160 sqrtPriceX96After,
                uint32 initializedTicksCrossed,
                uint256 gasEstimate
            );
    }

    interface IUniswapV3Pool {
        function slot0()
            external
            view
            returns (
                uint160 sqrtPriceX96,
                int24 tick,
                uint16 observationIndex,
                uint16 observationCardinality,
                uint16 observationCardinalityNext,
                uint8 feeProtocol,
                bool unlocked
            );
    }

    interface IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

/// CREATE2 address of the mainnet pool for a pair and fee tier, in either
/// token order.
pub fn compute_pool_address(token_a: Address, token_b: Address, fee: u32) -> Address {
    pool_address(FACTORY, token_a, token_b, fee)
}

/// [`compute_pool_address`] against an arbitrary factory deployment.
pub fn pool_address(factory: Address, token_a: Address, token_b: Address, fee: u32) -> Address {
    let (token0, token1) = if token_a < token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };

    let salt = keccak256((token0, token1, U24::saturating_from(fee)).abi_encode());
    factory.create2(salt, POOL_INIT_CODE_HASH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolCall;

    #[test]
    fn test_usdc_weth_pool_address() {
        let expected = address!("88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640");
        assert_eq!(compute_pool_address(USDC, WETH, 500), expected);
        assert_eq!(compute_pool_address(WETH, USDC, 500), expected);
        assert_ne!(compute_pool_address(USDC, WETH, 3000), expected);
    }

    #[test]
    fn test_pool_salt_encoding() {
        let encoded = (USDC, WETH, U24::from(3000u32)).abi_encode();
        assert_eq!(encoded.len(), 96);
        assert_eq!(&encoded[12..32], USDC.as_slice());
        assert_eq!(&encoded[44..64], WETH.as_slice());
        assert_eq!(&encoded[93..96], &[0x00, 0x0b, 0xb8]);

        assert_eq!(
            compute_pool_address(WETH, USDC, 3000),
            address!("8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8")
        );
    }

    #[test]
    fn test_slot0_selector() {
        assert_eq!(IUniswapV3Pool::slot0Call::SELECTOR, [0x38, 0x50, 0xc7, 0xbd]);
    }
}
