//! DexBridge contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge contract.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// DexBridge lock/burn and release interface
    #[sol(rpc)]
    contract DexBridge {
        /// Release tokens on this chain for a transfer initiated elsewhere.
        /// Only callable by an authorized relayer, once per txId.
        function releaseTokens(bytes32 txId) external;

        /// Stored bridge transaction. Used to recover the target of a burn.
        function getTransaction(bytes32 txId) external view returns (
            bytes32 id,
            address user,
            address token,
            uint256 amount,
            uint256 fee,
            uint256 sourceChain,
            uint256 targetChain,
            address targetAddress,
            uint256 timestamp,
            uint8 status
        );

        /// Whether `relayer` may call releaseTokens
        function relayers(address relayer) external view returns (bool);

        event TokenLocked(
            bytes32 indexed txId,
            address indexed user,
            address indexed token,
            uint256 amount,
            uint256 targetChain,
            address targetAddress
        );

        event TokenBurned(
            bytes32 indexed txId,
            address indexed user,
            address indexed token,
            uint256 amount
        );
    }
}
