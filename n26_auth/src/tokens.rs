use n26_clock::{Clock, DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken};

/// An access token and refresh token pair as issued by the authority,
/// along with the times at which each stops being usable
///
/// The default value is the empty token, which stores use to represent
/// "nothing cached".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// The bearer credential for API calls
    pub access_token: AccessToken,
    /// The credential used to renew the access token
    pub refresh_token: RefreshToken,
    /// The access token must not be used at or after this time
    pub expires_at: UnixTime,
    /// The refresh token must not be used at or after this time
    pub refresh_expires_at: UnixTime,
}

impl Default for OAuthToken {
    fn default() -> Self {
        Self {
            access_token: AccessToken::from_static(""),
            refresh_token: RefreshToken::from_static(""),
            expires_at: UnixTime::default(),
            refresh_expires_at: UnixTime::default(),
        }
    }
}

/// A cached token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// Nothing has been cached yet
    Missing,
    /// The access token can be used as is
    Valid,
    /// The access token has expired, but the refresh token can renew it
    Refreshable,
    /// Both tokens have expired and a full login is required
    Expired,
}

impl OAuthToken {
    /// Whether this is the empty token
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the access token is no longer usable as of `time`
    #[inline]
    pub fn is_expired(&self, time: UnixTime) -> bool {
        time >= self.expires_at
    }

    /// Whether the refresh token is still usable as of `time`
    #[inline]
    pub fn is_refreshable(&self, time: UnixTime) -> bool {
        time < self.refresh_expires_at
    }

    /// Gets the token's lifetime status as of the provided time
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if self.is_empty() {
            TokenStatus::Missing
        } else if !self.is_expired(time) {
            TokenStatus::Valid
        } else if self.is_refreshable(time) {
            TokenStatus::Refreshable
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }
}

/// Configuration for the lifetime assigned to newly issued tokens
///
/// The authority reports how long an access token lives, but says nothing
/// about its refresh token. The refresh lifetime is therefore a local
/// estimate. If it is longer than what the authority enforces, refreshes
/// will be rejected and fall back to a full login; if it is shorter, full
/// logins happen while the refresh token would still have worked.
#[derive(Clone, Copy, Debug)]
pub struct TokenLifetimeConfig {
    refresh_ttl: DurationSecs,
}

impl Default for TokenLifetimeConfig {
    /// Assumes refresh tokens live for one hour
    fn default() -> Self {
        Self {
            refresh_ttl: DurationSecs(3600),
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration with the given refresh token lifetime
    pub fn new(refresh_ttl: DurationSecs) -> Self {
        Self { refresh_ttl }
    }

    /// The assumed refresh token lifetime
    #[inline]
    pub fn refresh_ttl(&self) -> DurationSecs {
        self.refresh_ttl
    }

    /// Constructs a token issued at `issued` with an access token lifetime of `expires_in`
    pub fn create_token(
        &self,
        access_token: AccessToken,
        refresh_token: RefreshToken,
        expires_in: DurationSecs,
        issued: UnixTime,
    ) -> OAuthToken {
        OAuthToken {
            access_token,
            refresh_token,
            expires_at: issued + expires_in,
            refresh_expires_at: issued + self.refresh_ttl,
        }
    }
}
