// Connection string normalization
//
// The sslmode policy here is a deployment convenience for local development
// against a loopback server. It is not a security boundary: anyone who can
// edit the connection string can set `sslmode` explicitly and it is honored.


use std::fmt;

use ::url::Url;
use tracing::debug;

/// Scheme spellings accepted for a Postgres connection string.
pub const POSTGRES_SCHEMES: &[&str] = &[
    "postgres",
    "postgresql",
    "postgresql+psycopg2",
    "postgresql+psycopg",
    "postgres+asyncpg",
    "postgresql+asyncpg",
];

const CANONICAL_SCHEME: &str = "postgres";

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub url: String,
    /// False when the input was passed through untouched
    pub recognized: bool,
    /// The effective `sslmode`, whether supplied or defaulted
    pub sslmode: Option<String>,
}

impl fmt::Display for NormalizedUrl {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl NormalizedUrl {
    fn unchanged(raw: &str) -> Self {
        Self {
            url: raw.to_string(),
            recognized: false,
            sslmode: None,
        }
    }
}

/// Rewrite any accepted scheme spelling to `postgres://` and fill in `sslmode`.
///
/// Loopback hosts (and socket connections without a host) default to
/// `sslmode=prefer`, every other host to `sslmode=require`. An explicit
/// `sslmode` is left alone. Strings that cannot be parsed come back unchanged
/// so the connection attempt reports the real error.
#[inline]
pub fn normalize_database_url(raw: &str) -> NormalizedUrl {
    let trimmed = raw.trim();

    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return NormalizedUrl::unchanged(raw);
    };

    let scheme = scheme.to_ascii_lowercase();
    if !POSTGRES_SCHEMES.contains(&scheme.as_str()) {
        return NormalizedUrl::unchanged(raw);
    }

    let Ok(mut url) = Url::parse(&format!("{}://{}", CANONICAL_SCHEME, rest)) else {
        debug!("Connection string could not be parsed, passing it through");
        return NormalizedUrl::unchanged(raw);
    };

    let existing = url
        .query_pairs()
        .find(|(key, _)| key == "sslmode")
        .map(|(_, value)| value.into_owned());

    let sslmode = match existing {
        Some(mode) => mode,
        None => {
            let mode = if is_loopback(url.host_str()) {
                "prefer"
            } else {
                "require"
            };
            url.query_pairs_mut().append_pair("sslmode", mode);
            mode.to_string()
        }
    };

    NormalizedUrl {
        url: url.to_string(),
        recognized: true,
        sslmode: Some(sslmode),
    }
}

fn is_loopback(host: Option<&str>) -> bool {
    match host {
        None | Some("") => true,
        Some(host) => LOOPBACK_HOSTS
            .iter()
            .any(|loopback| host.eq_ignore_ascii_case(loopback)),
    }
}
