//! DTOs for the N26 authentication endpoints

use n26_clock::DurationSecs;
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    AccessToken, MfaToken, MfaTokenRef, PasswordRef, RefreshToken, RefreshTokenRef, UsernameRef,
};

/// A form-encoded request to `/oauth/token`
#[derive(Debug)]
pub(super) enum TokenRequest<'a> {
    /// Starts a login, which the server answers with an MFA token
    Password {
        username: &'a UsernameRef,
        password: &'a PasswordRef,
    },
    /// Completes a login once the out-of-band challenge is approved
    MfaOob { mfa_token: &'a MfaTokenRef },
    /// Renews an access token
    RefreshToken { refresh_token: &'a RefreshTokenRef },
}

impl TokenRequest<'_> {
    pub(super) fn grant_type(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::MfaOob { .. } => "mfa_oob",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl Serialize for TokenRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        match self {
            Self::Password { username, password } => {
                let mut ser = serializer.serialize_struct("TokenRequest", 3)?;
                ser.serialize_field("grant_type", self.grant_type())?;
                ser.serialize_field("username", username)?;
                ser.serialize_field("password", password)?;
                ser.end()
            }
            Self::MfaOob { mfa_token } => {
                let mut ser = serializer.serialize_struct("TokenRequest", 2)?;
                ser.serialize_field("grant_type", self.grant_type())?;
                ser.serialize_field("mfaToken", mfa_token)?;
                ser.end()
            }
            Self::RefreshToken { refresh_token } => {
                let mut ser = serializer.serialize_struct("TokenRequest", 2)?;
                ser.serialize_field("grant_type", self.grant_type())?;
                ser.serialize_field("refresh_token", refresh_token)?;
                ser.end()
            }
        }
    }
}

/// The JSON body of `/api/mfa/challenge`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MfaChallengeRequest<'a> {
    pub challenge_type: &'static str,
    pub mfa_token: &'a MfaTokenRef,
}

/// The body of a `403 Forbidden` answer to a password login
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MfaRequired {
    pub mfa_token: MfaToken,
}

/// Tokens issued by a confirmed login or a refresh
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub expires_in: DurationSecs,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub host_url: Option<String>,
}
