use super::types::{
    KucoinAccount, KucoinApiKeyInfo, KucoinCrossMarginAccount, KucoinFuturesOverview,
    KucoinIsolatedMargin, KucoinMarginAsset,
};
use crate::api::client::{amount_from_json, parse_amount, AccountIdentity, AssetView};

pub fn map_api_key_info(info: KucoinApiKeyInfo) -> AccountIdentity {
    AccountIdentity {
        external_id: info.uid,
        permissions: info
            .permission
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

pub fn map_trade_account(account: &KucoinAccount) -> Result<AssetView, String> {
    Ok(AssetView::new(
        account.currency.to_uppercase(),
        parse_amount(&account.available)?,
        parse_amount(&account.holds)?,
    ))
}

/// Whatever part of equity is not available is treated as frozen (margin in use, unrealised PnL)
pub fn map_futures_overview(overview: &KucoinFuturesOverview) -> Result<AssetView, String> {
    let equity = amount_from_json(&overview.account_equity)?;
    let available = amount_from_json(&overview.available_balance)?;

    Ok(AssetView::new(
        futures_currency(&overview.currency),
        available,
        equity - available,
    ))
}

/// Futures report bitcoin as XBT; everything else already matches spot
fn futures_currency(currency: &str) -> String {
    match currency.to_uppercase().as_str() {
        "XBT" => "BTC".to_string(),
        other => other.to_string(),
    }
}

fn map_margin_asset(asset: &KucoinMarginAsset) -> Result<AssetView, String> {
    Ok(AssetView::new(
        asset.currency.to_uppercase(),
        parse_amount(&asset.available_balance)?,
        parse_amount(&asset.hold_balance)?,
    )
    .with_borrowed(parse_amount(&asset.liability)?))
}

/// Cross and isolated margin flattened into one list
pub fn map_margin_accounts(
    cross: &KucoinCrossMarginAccount,
    isolated: &KucoinIsolatedMargin,
) -> Result<Vec<AssetView>, String> {
    let isolated_assets = isolated
        .assets
        .iter()
        .flat_map(|pair| [&pair.base_asset, &pair.quote_asset]);

    cross
        .accounts
        .iter()
        .chain(isolated_assets)
        .map(map_margin_asset)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::kucoin::types::KucoinIsolatedPair;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn margin(currency: &str, available: &str, liability: &str) -> KucoinMarginAsset {
        KucoinMarginAsset {
            currency: currency.into(),
            available_balance: available.into(),
            hold_balance: "0".into(),
            liability: liability.into(),
        }
    }

    #[test]
    fn test_permissions_split() {
        let identity = map_api_key_info(KucoinApiKeyInfo {
            uid: "165111215".into(),
            permission: "General, Spot,Futures".into(),
            is_master: Some(true),
        });

        assert_eq!(identity.external_id, "165111215");
        assert_eq!(identity.permissions, vec!["General", "Spot", "Futures"]);
    }

    #[test]
    fn test_futures_frozen_is_equity_minus_available() {
        let view = map_futures_overview(&KucoinFuturesOverview {
            currency: "USDT".into(),
            account_equity: json!(120.75),
            available_balance: json!(100.5),
        })
        .unwrap();

        assert_eq!(view.available, dec!(100.5));
        assert_eq!(view.frozen, dec!(20.25));
        assert_eq!(view.net(), dec!(120.75));
    }

    #[test]
    fn test_futures_xbt_is_reported_as_btc() {
        let view = map_futures_overview(&KucoinFuturesOverview {
            currency: "XBT".into(),
            account_equity: json!("0.5"),
            available_balance: json!("0.4"),
        })
        .unwrap();

        assert_eq!(view.currency, "BTC");
        assert_eq!(view.net(), dec!(0.5));
    }

    #[test]
    fn test_cross_and_isolated_are_merged() {
        let cross = KucoinCrossMarginAccount {
            accounts: vec![margin("USDT", "50", "10")],
        };
        let isolated = KucoinIsolatedMargin {
            assets: vec![KucoinIsolatedPair {
                symbol: "BTC-USDT".into(),
                base_asset: margin("BTC", "0.1", "0"),
                quote_asset: margin("USDT", "20", "5"),
            }],
        };

        let views = map_margin_accounts(&cross, &isolated).unwrap();

        assert_eq!(views.len(), 3);
        let usdt_net: rust_decimal::Decimal = views
            .iter()
            .filter(|v| v.currency == "USDT")
            .map(AssetView::net)
            .sum();
        assert_eq!(usdt_net, dec!(55));
    }
}
