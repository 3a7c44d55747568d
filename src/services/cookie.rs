use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::CookieConfig;

/// The short-lived cookie bound to a DBSC session.
///
/// `attributes()` and `build()` read the same fields, so the string returned in
/// the registration body always describes the cookie that is actually set.
/// Max-Age is left out of the string: it is the refresh trigger, not a match criterion.
#[derive(Debug, Clone)]
pub struct BoundCookie {
    name: String,
    domain: Option<String>,
    path: String,
    same_site: SameSite,
    secure: bool,
    http_only: bool,
    max_age_secs: i64,
}

impl BoundCookie {
    pub fn from_config(config: &CookieConfig) -> Self {
        let same_site = match config.same_site.to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        };
        Self {
            name: config.name.clone(),
            domain: config.domain.clone().filter(|d| !d.trim().is_empty()),
            path: config.path.clone(),
            same_site,
            secure: config.secure,
            http_only: config.http_only,
            max_age_secs: config.max_age_secs as i64,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute string for `credentials[].attributes`
    pub fn attributes(&self) -> String {
        let mut parts = Vec::new();
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={}", domain));
        }
        parts.push(format!("Path={}", self.path));
        parts.push(format!("SameSite={}", self.same_site));
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        parts.join("; ")
    }

    pub fn build(&self, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .same_site(self.same_site)
            .secure(self.secure)
            .http_only(self.http_only)
            .max_age(time::Duration::seconds(self.max_age_secs));
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Cookie to hand to `CookieJar::remove`
    pub fn removal(&self) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), "")).path(self.path.clone());
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}
