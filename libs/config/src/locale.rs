//! Locale qualification for the report-URL key family

use crate::keys::{DEFAULT_LANGUAGE, REPORT_URL, SUPPORTED_LANGUAGES};

/// True for keys that are stored per language (`reportUrl` only).
///
/// Already-qualified keys such as `reportUrl-de` are not re-qualified.
pub fn is_localized_key(key: &str) -> bool {
    key == REPORT_URL
}

/// Map a locale string (`de`, `de_DE`, `fr-CA`, `pt_BR.UTF-8`) to a supported
/// language code, falling back to `en`.
pub fn language_from_locale(locale: &str) -> &'static str {
    let lang = locale
        .split(|c| c == '_' || c == '-' || c == '.' || c == '@')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|supported| *supported == lang)
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// Language for this process: the configured override, else `LC_ALL`, else
/// `LANG`, else `en`.
pub fn detect_language(configured: Option<&str>) -> &'static str {
    if let Some(locale) = configured.filter(|l| !l.trim().is_empty()) {
        return language_from_locale(locale);
    }

    ["LC_ALL", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
        .map(|value| language_from_locale(&value))
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// `reportUrl` + `de` -> `reportUrl-de`
pub fn qualify(key: &str, language: &str) -> String {
    format!("{}-{}", key, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_locale_variants() {
        assert_eq!(language_from_locale("de"), "de");
        assert_eq!(language_from_locale("de_DE.UTF-8"), "de");
        assert_eq!(language_from_locale("fr-CA"), "fr");
        assert_eq!(language_from_locale("PT_br"), "pt");
        assert_eq!(language_from_locale("ja_JP"), "en");
        assert_eq!(language_from_locale(""), "en");
    }

    #[test]
    fn test_configured_locale_wins() {
        assert_eq!(detect_language(Some("fi_FI")), "fi");
        assert_eq!(detect_language(Some("xx")), "en");
    }

    #[test]
    fn test_qualify_report_url_only() {
        assert!(is_localized_key("reportUrl"));
        assert!(!is_localized_key("reportUrl-de"));
        assert!(!is_localized_key("artistUrl"));
        assert_eq!(qualify("reportUrl", "da"), "reportUrl-da");
    }
}
