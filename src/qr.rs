//! VietQR image URL construction. Rendering is delegated to the public
//! img.vietqr.io service; nothing here touches the network.

use reqwest::Url;

use crate::config::BankAccountConfig;
use crate::error::{PosError, Result};
use crate::models::Money;

const VIETQR_IMAGE_BASE: &str = "https://img.vietqr.io/image/";

/// Build the QR image URL asking the customer's banking app to transfer
/// `amount` to the store account with `reference` as the transfer note.
pub fn build_qr_url(bank: &BankAccountConfig, amount: Money, reference: &str) -> Result<String> {
    if bank.bank_id.trim().is_empty() || bank.account_no.trim().is_empty() {
        return Err(PosError::Config("bank account is not configured".into()));
    }
    if amount <= 0 {
        return Err(PosError::validation("Transfer amount must be positive"));
    }

    let template = if bank.template.trim().is_empty() {
        "compact2"
    } else {
        bank.template.trim()
    };
    let mut url = Url::parse(&format!(
        "{VIETQR_IMAGE_BASE}{}-{}-{template}.png",
        bank.bank_id.trim(),
        bank.account_no.trim()
    ))
    .map_err(|e| PosError::Config(format!("invalid bank account for QR: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("amount", &amount.to_string());
        query.append_pair("addInfo", reference);
        if !bank.account_name.trim().is_empty() {
            query.append_pair("accountName", bank.account_name.trim());
        }
    }
    Ok(url.to_string())
}
