use log::info;
use sha2::{Digest, Sha256};

use crate::api::credentials::Credential;
use crate::api::error::ApiError;
use crate::context::AppContext;
use crate::db::NewLinkedAccount;
use crate::models::{Exchange, LinkedAccount, RegisterAccountInput};

/// Stable account id derived from the exchange's own user id
pub fn derive_account_id(exchange: Exchange, external_id: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", exchange, external_id).as_bytes());
    hex::encode(digest)
}

/// Link an exchange account to a user.
///
/// The account is bound to the least-used egress IP and its key is checked
/// against the exchange through that IP before anything is stored. Signing
/// and auth failures are returned as-is.
pub async fn register_account(
    ctx: &AppContext,
    user_id: &str,
    input: RegisterAccountInput,
) -> Result<LinkedAccount, ApiError> {
    let exchange: Exchange = input.exchange.parse()?;

    let proxy_ip = ctx.allocator.allocate_ip(ctx.store.as_ref()).await?;

    let credential = Credential::new(
        exchange,
        input.api_key,
        input.api_secret,
        input.passphrase.filter(|p| !p.is_empty()),
    );

    let client = ctx.factory.create(&credential, Some(proxy_ip.as_str()))?;
    let identity = client.validate_credentials().await?;

    let account_id = derive_account_id(exchange, &identity.external_id);
    let account = ctx.store.register_account(
        NewLinkedAccount {
            account_id,
            user_id: user_id.to_string(),
            exchange,
            label: input.label,
            proxy_ip: Some(proxy_ip),
            permissions: identity.permissions,
        },
        &credential,
    )?;

    info!(
        "Linked {} account {} ({}) for user {} via {}",
        account.exchange,
        account.account_id,
        account.kind.as_str(),
        user_id,
        account.proxy_ip.as_deref().unwrap_or("-")
    );

    Ok(account)
}

/// Remove an account with its credentials and history; false when unknown
pub fn delete_account(ctx: &AppContext, account_id: &str) -> Result<bool, ApiError> {
    let Some(account) = ctx.store.get_account(account_id)? else {
        return Ok(false);
    };

    let deleted = ctx.store.delete_account(account_id)?;
    if deleted {
        info!(
            "Deleted {} account {} of user {}",
            account.exchange, account_id, account.user_id
        );
    }
    Ok(deleted)
}
