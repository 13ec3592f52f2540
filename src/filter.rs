//! DEX Method and Router Registry
//!
//! Static, versioned lookup tables used to classify pending transactions:
//! 4-byte function selectors mapped to Uniswap V2 style router methods, and the
//! set of router contracts whose calls are worth decoding.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::{address, Address};

use crate::types::SwapDirection;

/// Uniswap V2 Router02
pub const UNISWAP_V2_ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
/// Uniswap V3 SwapRouter
pub const UNISWAP_V3_ROUTER: Address = address!("E592427A0AEce92De3Edee1F18E0157C05861564");
/// SushiSwap Router02
pub const SUSHISWAP_ROUTER: Address = address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F");

/// Router methods the registry knows about.
///
/// Only the three `swapExact*` variants are decode targets; the remaining
/// entries are recognized so logs can tell a known router call apart from an
/// unknown selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexMethodId {
    /// swapExactETHForTokens - 0x7ff36ab5
    SwapExactEthForTokens,
    /// swapExactTokensForETH - 0x18cbafe5
    SwapExactTokensForEth,
    /// swapExactTokensForTokens - 0x38ed1739
    SwapExactTokensForTokens,
    /// swapTokensForExactTokens - 0x8803dbee
    SwapTokensForExactTokens,
    /// addLiquidityETH - 0xf305d719
    AddLiquidityEth,
    /// addLiquidity - 0xe8e33700
    AddLiquidity,
}

impl DexMethodId {
    pub const ALL: [DexMethodId; 6] = [
        DexMethodId::SwapExactEthForTokens,
        DexMethodId::SwapExactTokensForEth,
        DexMethodId::SwapExactTokensForTokens,
        DexMethodId::SwapTokensForExactTokens,
        DexMethodId::AddLiquidityEth,
        DexMethodId::AddLiquidity,
    ];

    /// Returns the 4-byte method selector
    pub fn selector(&self) -> [u8; 4] {
        match self {
            DexMethodId::SwapExactEthForTokens => [0x7f, 0xf3, 0x6a, 0xb5],
            DexMethodId::SwapExactTokensForEth => [0x18, 0xcb, 0xaf, 0xe5],
            DexMethodId::SwapExactTokensForTokens => [0x38, 0xed, 0x17, 0x39],
            DexMethodId::SwapTokensForExactTokens => [0x88, 0x03, 0xdb, 0xee],
            DexMethodId::AddLiquidityEth => [0xf3, 0x05, 0xd7, 0x19],
            DexMethodId::AddLiquidity => [0xe8, 0xe3, 0x37, 0x00],
        }
    }

    /// Returns the human-readable method name
    pub fn name(&self) -> &'static str {
        match self {
            DexMethodId::SwapExactEthForTokens => "swapExactETHForTokens",
            DexMethodId::SwapExactTokensForEth => "swapExactTokensForETH",
            DexMethodId::SwapExactTokensForTokens => "swapExactTokensForTokens",
            DexMethodId::SwapTokensForExactTokens => "swapTokensForExactTokens",
            DexMethodId::AddLiquidityEth => "addLiquidityETH",
            DexMethodId::AddLiquidity => "addLiquidity",
        }
    }

    /// Returns the hex-encoded selector with 0x prefix
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector()))
    }

    /// Swap direction for decode targets, `None` for everything else.
    pub fn direction(&self) -> Option<SwapDirection> {
        match self {
            DexMethodId::SwapExactEthForTokens => Some(SwapDirection::Buy),
            DexMethodId::SwapExactTokensForEth => Some(SwapDirection::Sell),
            DexMethodId::SwapExactTokensForTokens => Some(SwapDirection::Swap),
            _ => None,
        }
    }

    /// Whether this method is one the pipeline decodes and scores.
    pub fn is_swap_target(&self) -> bool {
        self.direction().is_some()
    }
}

static DEX_METHODS: LazyLock<HashMap<[u8; 4], DexMethodId>> =
    LazyLock::new(|| DexMethodId::ALL.iter().map(|m| (m.selector(), *m)).collect());

/// Look up any known router method by selector.
pub fn get_dex_method(method_id: &[u8; 4]) -> Option<DexMethodId> {
    DEX_METHODS.get(method_id).copied()
}

/// Look up a selector among the swap methods the pipeline decodes.
pub fn get_swap_method(method_id: &[u8; 4]) -> Option<DexMethodId> {
    get_dex_method(method_id).filter(DexMethodId::is_swap_target)
}

/// Check if a selector is a decodable swap method
pub fn is_swap_method(method_id: &[u8; 4]) -> bool {
    get_swap_method(method_id).is_some()
}

/// Get the human-readable method name for a given selector
pub fn get_method_name(method_id: &[u8; 4]) -> Option<&'static str> {
    get_dex_method(method_id).map(|m| m.name())
}

/// Extract the method selector from transaction input data.
///
/// Returns `None` when the input is shorter than 4 bytes.
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    input.get(..4).map(|head| {
        let mut method_id = [0u8; 4];
        method_id.copy_from_slice(head);
        method_id
    })
}

/// Set of DEX router contracts the decoder accepts calls to.
#[derive(Debug, Clone)]
pub struct RouterRegistry {
    routers: HashMap<Address, String>,
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::with_routers([
            (UNISWAP_V2_ROUTER, "Uniswap V2"),
            (UNISWAP_V3_ROUTER, "Uniswap V3"),
            (SUSHISWAP_ROUTER, "SushiSwap"),
        ])
    }
}

impl RouterRegistry {
    pub fn with_routers<I, S>(routers: I) -> Self
    where
        I: IntoIterator<Item = (Address, S)>,
        S: Into<String>,
    {
        Self {
            routers: routers.into_iter().map(|(a, name)| (a, name.into())).collect(),
        }
    }

    pub fn contains(&self, router: &Address) -> bool {
        self.routers.contains_key(router)
    }

    pub fn name_of(&self, router: &Address) -> Option<&str> {
        self.routers.get(router).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}
