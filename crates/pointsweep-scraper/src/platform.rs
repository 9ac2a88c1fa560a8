//! Keyword-based platform hints for campaign titles, URLs and markup.

use pointsweep_core::Platform;

const IOS_TOKENS: &[&str] = &["ios", "iphone", "ipad", "app store", "appstore"];
const ANDROID_TOKENS: &[&str] = &[
    "android",
    "アンドロイド",
    "google play",
    "googleplay",
    "プレイストア",
];

/// Platform named by `texts`, or `None` when no platform keyword appears.
///
/// A campaign mentioning both iOS and Android tokens is a cross-platform
/// listing and maps to [`Platform::Web`].
#[must_use]
pub fn detect_platform(texts: &[&str]) -> Option<Platform> {
    let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    let mentions = |tokens: &[&str]| {
        lowered
            .iter()
            .any(|text| tokens.iter().any(|token| contains_token(text, token)))
    };

    match (mentions(IOS_TOKENS), mentions(ANDROID_TOKENS)) {
        (true, true) => Some(Platform::Web),
        (true, false) => Some(Platform::Ios),
        (false, true) => Some(Platform::Android),
        (false, false) => None,
    }
}

/// Platform hint for a stub: detected keywords first, then the category
/// convention. App categories without a keyword are `Unknown`; everything
/// else falls back to the site default.
#[must_use]
pub fn platform_hint(texts: &[&str], site_default: Platform, apps_category: bool) -> Platform {
    detect_platform(texts).unwrap_or(if apps_category {
        Platform::Unknown
    } else {
        site_default
    })
}

/// Substring match where ASCII tokens must not be glued to other ASCII
/// letters or digits ("ios" must not match "studios").
fn contains_token(haystack: &str, token: &str) -> bool {
    if !token.is_ascii() {
        return haystack.contains(token);
    }
    haystack.match_indices(token).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}
