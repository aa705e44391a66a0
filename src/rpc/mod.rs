//! Method classification for the injected provider surface.
//!
//! Every method name a page can send is sorted into exactly one category,
//! checked in precedence order. Classification is total: names that appear
//! in no table fall through to `Standard` and are rejected further down
//! the pipeline as unrecognized, so a new or misspelled method can never
//! panic the classifier.

/// Category a provider method resolves to. Precedence is the declaration
/// order: provider-direct beats wallet-specific beats deprecated beats
/// unsupported, and everything else is standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodCategory {
    /// Read-only node RPC; the page context proxies it straight to the
    /// JSON-RPC provider without touching the approval pipeline.
    ProviderDirect,
    /// Custom methods only this wallet exposes.
    WalletSpecific,
    /// Once supported, now rejected with an error naming the method.
    Deprecated,
    /// Never supported, rejected with an error naming the method.
    Unsupported,
    /// Default: proceeds into the approval pipeline.
    Standard,
}

/// Read-only node methods the page proxies directly to its provider.
pub const PROVIDER_DIRECT_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByNumber",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "net_version",
];

/// Non-standard methods this wallet exposes.
pub const WALLET_SPECIFIC_METHODS: &[&str] = &["wallet_openSidebar"];

/// Methods the wallet used to support and now refuses.
pub const DEPRECATED_METHODS: &[&str] = &[
    "eth_sign",
    "eth_signTypedData",
    "eth_signTypedData_v1",
    "eth_signTypedData_v3",
    "eth_decrypt",
    "eth_getEncryptionPublicKey",
];

/// Methods the wallet has never supported.
pub const UNSUPPORTED_METHODS: &[&str] = &[
    "eth_subscribe",
    "eth_unsubscribe",
    "wallet_addEthereumChain",
    "wallet_watchAsset",
    "wallet_registerOnboarding",
    "wallet_scanQRCode",
];

/// Standard methods the approval pipeline actually implements. A method
/// classified `Standard` but absent from this table is unrecognized.
pub const SUPPORTED_STANDARD_METHODS: &[&str] = &[
    "eth_accounts",
    "eth_chainId",
    "eth_requestAccounts",
    "eth_sendTransaction",
    "eth_signTypedData_v4",
    "personal_sign",
    "wallet_getCapabilities",
    "wallet_getPermissions",
    "wallet_requestPermissions",
    "wallet_revokePermissions",
    "wallet_switchEthereumChain",
];

/// Classify a method name. First matching table wins.
pub fn classify(method: &str) -> MethodCategory {
    if PROVIDER_DIRECT_METHODS.contains(&method) {
        MethodCategory::ProviderDirect
    } else if WALLET_SPECIFIC_METHODS.contains(&method) {
        MethodCategory::WalletSpecific
    } else if DEPRECATED_METHODS.contains(&method) {
        MethodCategory::Deprecated
    } else if UNSUPPORTED_METHODS.contains(&method) {
        MethodCategory::Unsupported
    } else {
        MethodCategory::Standard
    }
}

/// Whether a standard-classified method is one the pipeline implements.
pub fn is_supported_standard(method: &str) -> bool {
    SUPPORTED_STANDARD_METHODS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_provider_direct() {
        for method in PROVIDER_DIRECT_METHODS {
            assert_eq!(classify(method), MethodCategory::ProviderDirect);
        }
    }

    #[test]
    fn test_classify_wallet_specific() {
        assert_eq!(
            classify("wallet_openSidebar"),
            MethodCategory::WalletSpecific
        );
    }

    #[test]
    fn test_classify_deprecated() {
        for method in DEPRECATED_METHODS {
            assert_eq!(classify(method), MethodCategory::Deprecated);
        }
    }

    #[test]
    fn test_classify_unsupported() {
        for method in UNSUPPORTED_METHODS {
            assert_eq!(classify(method), MethodCategory::Unsupported);
        }
    }

    #[test]
    fn test_classify_standard_surface() {
        for method in SUPPORTED_STANDARD_METHODS {
            assert_eq!(classify(method), MethodCategory::Standard);
            assert!(is_supported_standard(method));
        }
    }

    #[test]
    fn test_classify_is_total() {
        assert_eq!(classify(""), MethodCategory::Standard);
        assert_eq!(classify("eth_madeUpMethod"), MethodCategory::Standard);
        assert_eq!(classify("ETH_CALL"), MethodCategory::Standard);
        assert!(!is_supported_standard("eth_madeUpMethod"));
    }

    #[test]
    fn test_versioned_typed_data_split() {
        // v4 stays live while the older revisions are refused.
        assert_eq!(classify("eth_signTypedData_v4"), MethodCategory::Standard);
        assert_eq!(classify("eth_signTypedData_v3"), MethodCategory::Deprecated);
        assert_eq!(classify("eth_signTypedData"), MethodCategory::Deprecated);
    }

    #[test]
    fn test_tables_are_disjoint() {
        // Precedence only matters if a name appears twice; keep the tables
        // disjoint so classification order never silently changes meaning.
        let tables = [
            PROVIDER_DIRECT_METHODS,
            WALLET_SPECIFIC_METHODS,
            DEPRECATED_METHODS,
            UNSUPPORTED_METHODS,
            SUPPORTED_STANDARD_METHODS,
        ];
        let mut seen = std::collections::HashSet::new();
        for table in tables {
            for method in table {
                assert!(seen.insert(*method), "{method} appears in two tables");
            }
        }
    }
}
