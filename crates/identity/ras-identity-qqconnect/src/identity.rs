//! Mapping of QQ Connect data to a [`NormalizedIdentity`].

use crate::types::{ProviderProfile, ProviderToken, ProviderUserId};
use ras_identity_core::{IdentityResult, NormalizedIdentity, claim_types};

/// Provider-namespaced claim types.
pub mod qq_claim_types {
    pub const OPENID: &str = "urn:qqconnect:openid";
    pub const NICKNAME: &str = "urn:qqconnect:nickname";
    pub const GENDER: &str = "urn:qqconnect:gender";
    pub const ACCESS_TOKEN: &str = "urn:qqconnect:access_token";
    pub const EXPIRES_IN: &str = "urn:qqconnect:expires_in";
    pub const FIGURE_URL_PREFIX: &str = "urn:qqconnect:";
}

/// Builds the claim set for a completed login.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAssembler {
    save_tokens: bool,
}

impl IdentityAssembler {
    pub fn new(save_tokens: bool) -> Self {
        Self { save_tokens }
    }

    pub fn assemble(
        &self,
        scheme: &str,
        token: &ProviderToken,
        openid: &ProviderUserId,
        profile: &ProviderProfile,
    ) -> IdentityResult<NormalizedIdentity> {
        let mut identity = NormalizedIdentity::new(scheme, openid.as_str())?;

        if let Some(nickname) = profile.nickname.as_deref() {
            identity.add_claim(claim_types::NAME, nickname)?;
        }
        identity.add_claim(qq_claim_types::OPENID, openid.as_str())?;
        if let Some(nickname) = profile.nickname.as_deref() {
            identity.add_claim(qq_claim_types::NICKNAME, nickname)?;
        }
        if let Some(gender) = profile.gender.as_deref() {
            identity.add_claim(qq_claim_types::GENDER, gender)?;
        }
        for (field, url) in profile.figure_urls() {
            identity.add_claim(format!("{}{}", qq_claim_types::FIGURE_URL_PREFIX, field), url)?;
        }

        if self.save_tokens {
            identity.add_claim(qq_claim_types::ACCESS_TOKEN, token.access_token.as_str())?;
            if let Some(expires_in) = token.expires_in {
                identity.add_claim(qq_claim_types::EXPIRES_IN, expires_in.to_string())?;
            }
        }

        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn token() -> ProviderToken {
        ProviderToken {
            access_token: "T1".to_string(),
            expires_in: Some(7776000),
            refresh_token: None,
            raw: BTreeMap::new(),
        }
    }

    fn profile() -> ProviderProfile {
        ProviderProfile {
            nickname: Some("Alice".to_string()),
            gender: Some("女".to_string()),
            figureurl_qq_1: Some("http://q.qlogo.cn/40".to_string()),
            ..ProviderProfile::default()
        }
    }

    #[test]
    fn test_claim_mapping() {
        let openid = ProviderUserId::new("U1").unwrap();
        let identity = IdentityAssembler::default()
            .assemble("QQConnect", &token(), &openid, &profile())
            .unwrap();

        assert_eq!(identity.scheme(), "QQConnect");
        assert_eq!(identity.subject(), "U1");
        assert_eq!(identity.name(), Some("Alice"));
        assert_eq!(identity.find_first(qq_claim_types::OPENID), Some("U1"));
        assert_eq!(identity.find_first(qq_claim_types::GENDER), Some("女"));
        assert_eq!(
            identity.find_first("urn:qqconnect:figureurl_qq_1"),
            Some("http://q.qlogo.cn/40")
        );
        assert!(identity.find_first(qq_claim_types::ACCESS_TOKEN).is_none());
    }

    #[test]
    fn test_claim_order() {
        let openid = ProviderUserId::new("U1").unwrap();
        let identity = IdentityAssembler::default()
            .assemble("QQConnect", &token(), &openid, &profile())
            .unwrap();

        let types: Vec<_> = identity
            .claims()
            .iter()
            .map(|c| c.claim_type.as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "sub",
                "name",
                "urn:qqconnect:openid",
                "urn:qqconnect:nickname",
                "urn:qqconnect:gender",
                "urn:qqconnect:figureurl_qq_1",
            ]
        );
    }

    #[test]
    fn test_empty_profile_yields_subject_only() {
        let openid = ProviderUserId::new("U1").unwrap();
        let identity = IdentityAssembler::default()
            .assemble("QQConnect", &token(), &openid, &ProviderProfile::default())
            .unwrap();

        assert_eq!(identity.claims().len(), 2);
        assert!(identity.name().is_none());
    }

    #[test]
    fn test_tokens_saved_on_request() {
        let openid = ProviderUserId::new("U1").unwrap();
        let identity = IdentityAssembler::new(true)
            .assemble("QQConnect", &token(), &openid, &profile())
            .unwrap();

        assert_eq!(identity.find_first(qq_claim_types::ACCESS_TOKEN), Some("T1"));
        assert_eq!(identity.find_first(qq_claim_types::EXPIRES_IN), Some("7776000"));
    }
}
