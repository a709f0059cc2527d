//! Farcaster mini-app manifest: the custody-signed account association plus
//! the frame metadata served from `/.well-known/farcaster.json`.

use alloy_signer::SignerSync;
use alloy_signer_local::{
    MnemonicBuilder,
    PrivateKeySigner,
    coins_bip39::English,
};
use anyhow::{
    Context,
    Result,
    anyhow,
};
use base64::{
    Engine,
    engine::general_purpose::{
        STANDARD,
        URL_SAFE_NO_PAD,
    },
};
use serde::Serialize;

use crate::env_file::DeployEnv;

const SPLASH_BACKGROUND: &str = "#f7f7f7";
pub const DEFAULT_BUTTON_TEXT: &str = "Launch Mini App";

/// Account at `m/44'/60'/0'/0/0` of the operator's seed phrase.
pub struct Custody {
    signer: PrivateKeySigner,
    address: String,
}

impl Custody {
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let signer = MnemonicBuilder::<English>::default()
            .phrase(phrase.trim())
            .index(0)
            .and_then(|builder| builder.build())
            .map_err(|_| anyhow!("Invalid seed phrase"))?;
        let address = signer.address().to_string();
        Ok(Self { signer, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// EIP-191 personal-sign, returned as a `0x`-prefixed 65-byte hex string.
    pub fn sign(&self, message: &str) -> Result<String> {
        let signature = self
            .signer
            .sign_message_sync(message.as_bytes())
            .context("signing manifest payload")?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

#[derive(Serialize)]
struct Header<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    key: &'a str,
    fid: u64,
}

#[derive(Serialize)]
struct Payload<'a> {
    domain: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountAssociation {
    pub header: String,
    pub payload: String,
    pub signature: String,
}

pub fn sign_association(custody: &Custody, fid: u64, domain: &str) -> Result<AccountAssociation> {
    let header = serde_json::to_string(&Header {
        kind: "custody",
        key: custody.address(),
        fid,
    })?;
    let payload = serde_json::to_string(&Payload { domain })?;
    let header = STANDARD.encode(header);
    let payload = URL_SAFE_NO_PAD.encode(payload);
    let signature = custody.sign(&format!("{header}.{payload}"))?;
    Ok(AccountAssociation {
        header,
        payload,
        signature: URL_SAFE_NO_PAD.encode(signature),
    })
}

/// Operator-provided app details from the `NEXT_PUBLIC_MINI_APP_*` variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppDetails {
    pub name: Option<String>,
    pub button_title: String,
    pub description: Option<String>,
    pub primary_category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl AppDetails {
    pub fn from_env(env: &DeployEnv) -> Self {
        let owned = |key: &str| env.get(key).map(str::to_owned);
        Self {
            name: owned("NEXT_PUBLIC_MINI_APP_NAME"),
            button_title: owned("NEXT_PUBLIC_MINI_APP_BUTTON_TEXT")
                .unwrap_or_else(|| DEFAULT_BUTTON_TEXT.to_owned()),
            description: owned("NEXT_PUBLIC_MINI_APP_DESCRIPTION"),
            primary_category: owned("NEXT_PUBLIC_MINI_APP_PRIMARY_CATEGORY"),
            tags: env.get("NEXT_PUBLIC_MINI_APP_TAGS").map(|tags| {
                tags.split(',')
                    .map(|t| t.trim().to_owned())
                    .filter(|t| !t.is_empty())
                    .collect()
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub icon_url: String,
    pub home_url: String,
    pub image_url: String,
    pub button_title: String,
    pub splash_image_url: String,
    pub splash_background_color: String,
    pub webhook_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl FrameMetadata {
    pub fn new(domain: &str, details: &AppDetails, webhook_url: String) -> Self {
        let base = format!("https://{domain}");
        Self {
            version: "1".to_owned(),
            name: details.name.clone(),
            icon_url: format!("{base}/icon.png"),
            home_url: base.clone(),
            image_url: format!("{base}/api/opengraph-image"),
            button_title: details.button_title.clone(),
            splash_image_url: format!("{base}/splash.png"),
            splash_background_color: SPLASH_BACKGROUND.to_owned(),
            webhook_url,
            description: details.description.clone(),
            primary_category: details.primary_category.clone(),
            tags: details.tags.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniAppMetadata {
    pub account_association: AccountAssociation,
    pub frame: FrameMetadata,
}

/// Neynar's hosted event endpoint when both Neynar credentials are
/// configured, otherwise the app's own webhook route.
pub fn webhook_url(env: &DeployEnv, domain: &str) -> String {
    match (env.get("NEYNAR_API_KEY"), env.get("NEYNAR_CLIENT_ID")) {
        (Some(_), Some(client_id)) => {
            format!("https://api.neynar.com/f/app/{client_id}/event")
        }
        _ => format!("https://{domain}/api/webhook"),
    }
}

pub fn build_metadata(
    custody: &Custody,
    fid: u64,
    domain: &str,
    env: &DeployEnv,
) -> Result<MiniAppMetadata> {
    Ok(MiniAppMetadata {
        account_association: sign_association(custody, fid, domain)?,
        frame: FrameMetadata::new(domain, &AppDetails::from_env(env), webhook_url(env, domain)),
    })
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const MNEMONIC: &str = "test test test test test test test test test test test junk";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn from_mnemonic__known_phrase__derives_first_account() {
        let custody = Custody::from_mnemonic(MNEMONIC).unwrap();

        assert_eq!(custody.address(), ADDRESS);
    }

    #[test]
    fn from_mnemonic__garbage__is_invalid_seed_phrase() {
        let err = Custody::from_mnemonic("not a real seed phrase").err().unwrap();

        assert_eq!(err.to_string(), "Invalid seed phrase");
    }

    #[test]
    fn sign_association__encodes_header_payload_and_signature() {
        // given
        let custody = Custody::from_mnemonic(MNEMONIC).unwrap();

        // when
        let association = sign_association(&custody, 977233, "gifter.vercel.app").unwrap();

        // then
        let header: Value =
            serde_json::from_slice(&STANDARD.decode(&association.header).unwrap()).unwrap();
        assert_eq!(header["type"], "custody");
        assert_eq!(header["key"], ADDRESS);
        assert_eq!(header["fid"], 977233);
        let payload = URL_SAFE_NO_PAD.decode(&association.payload).unwrap();
        assert_eq!(payload, br#"{"domain":"gifter.vercel.app"}"#);
        let signature =
            String::from_utf8(URL_SAFE_NO_PAD.decode(&association.signature).unwrap()).unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 65 * 2);
    }

    #[test]
    fn sign__same_message__is_deterministic() {
        let custody = Custody::from_mnemonic(MNEMONIC).unwrap();

        assert_eq!(custody.sign("a.b").unwrap(), custody.sign("a.b").unwrap());
        assert_ne!(custody.sign("a.b").unwrap(), custody.sign("a.c").unwrap());
    }

    #[test]
    fn webhook_url__neynar_configured__uses_neynar_event_endpoint() {
        let env = DeployEnv::from_pairs([("NEYNAR_API_KEY", "k"), ("NEYNAR_CLIENT_ID", "cid")]);

        assert_eq!(
            webhook_url(&env, "gifter.vercel.app"),
            "https://api.neynar.com/f/app/cid/event"
        );
    }

    #[test]
    fn webhook_url__client_id_only__uses_app_route() {
        let env = DeployEnv::from_pairs([("NEYNAR_CLIENT_ID", "cid")]);

        assert_eq!(
            webhook_url(&env, "gifter.vercel.app"),
            "https://gifter.vercel.app/api/webhook"
        );
    }

    #[test]
    fn build_metadata__serializes_camel_case_and_omits_unset_fields() {
        // given
        let custody = Custody::from_mnemonic(MNEMONIC).unwrap();
        let env = DeployEnv::from_pairs([
            ("NEXT_PUBLIC_MINI_APP_NAME", "Gifter"),
            ("NEXT_PUBLIC_MINI_APP_TAGS", "gift, cards,,"),
        ]);

        // when
        let metadata = build_metadata(&custody, 7, "gifter.vercel.app", &env).unwrap();
        let json = serde_json::to_value(&metadata).unwrap();

        // then
        let frame = &json["frame"];
        assert_eq!(frame["version"], "1");
        assert_eq!(frame["name"], "Gifter");
        assert_eq!(frame["buttonTitle"], DEFAULT_BUTTON_TEXT);
        assert_eq!(frame["homeUrl"], "https://gifter.vercel.app");
        assert_eq!(frame["imageUrl"], "https://gifter.vercel.app/api/opengraph-image");
        assert_eq!(frame["splashBackgroundColor"], "#f7f7f7");
        assert_eq!(frame["tags"], serde_json::json!(["gift", "cards"]));
        assert!(frame.get("description").is_none());
        assert!(json["accountAssociation"]["header"].is_string());
    }
}
