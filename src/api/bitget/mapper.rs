use super::types::{BitgetAccountInfo, BitgetFuturesAccount, BitgetMarginAsset, BitgetSpotAsset};
use crate::api::client::{parse_amount, AccountIdentity, AssetView};

pub fn map_account_info(info: BitgetAccountInfo) -> AccountIdentity {
    AccountIdentity {
        external_id: info.user_id,
        permissions: info.authorities,
    }
}

/// Frozen and locked both count as unavailable
pub fn map_spot_asset(asset: &BitgetSpotAsset) -> Result<AssetView, String> {
    let available = parse_amount(&asset.available)?;
    let frozen = parse_amount(&asset.frozen)? + parse_amount(&asset.locked)?;

    Ok(AssetView::new(asset.coin.to_uppercase(), available, frozen))
}

/// Equity includes position margin and unrealised PnL, so everything in it
/// that is not available counts as frozen. Without equity, locked is used.
pub fn map_futures_account(account: &BitgetFuturesAccount) -> Result<AssetView, String> {
    let available = parse_amount(&account.available)?;
    let frozen = match account.account_equity.as_deref().map(str::trim) {
        Some(equity) if !equity.is_empty() => parse_amount(equity)? - available,
        _ => parse_amount(&account.locked)?,
    };

    Ok(AssetView::new(account.margin_coin.to_uppercase(), available, frozen))
}

/// Interest accrues on the borrow, so both are liabilities
pub fn map_margin_asset(asset: &BitgetMarginAsset) -> Result<AssetView, String> {
    let borrowed = parse_amount(&asset.borrow)? + parse_amount(&asset.interest)?;

    Ok(AssetView::new(
        asset.coin.to_uppercase(),
        parse_amount(&asset.available)?,
        parse_amount(&asset.frozen)?,
    )
    .with_borrowed(borrowed))
}
