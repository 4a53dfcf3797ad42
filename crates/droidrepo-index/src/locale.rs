use std::collections::BTreeMap;

/// Picks the best entry of a localized map for the given locale preference list.
///
/// Preference order: an exact tag match, then any entry with the same language, then `en-US`,
/// then `en`, then the first entry.
pub fn best_locale<'a, V>(map: &'a BTreeMap<String, V>, locales: &[String]) -> Option<&'a V> {
    if map.is_empty() {
        return None;
    }

    for locale in locales {
        if let Some(value) = map.get(locale) {
            return Some(value);
        }
    }

    for locale in locales {
        let language = language_of(locale);
        if let Some((_, value)) = map.iter().find(|(tag, _)| language_of(tag) == language) {
            return Some(value);
        }
    }

    map.get("en-US")
        .or_else(|| map.get("en"))
        .or_else(|| map.values().next())
}

/// Like [`best_locale`] for maps that may be absent.
pub fn best_locale_opt<'a, V>(
    map: Option<&'a BTreeMap<String, V>>,
    locales: &[String],
) -> Option<&'a V> {
    map.and_then(|m| best_locale(m, locales))
}

fn language_of(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn locales(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_exact_match_wins() {
        let m = map(&[("de", "Hallo"), ("de-AT", "Servus"), ("en-US", "Hello")]);
        assert_eq!(best_locale(&m, &locales(&["de-AT"])).unwrap(), "Servus");
    }

    #[test]
    fn test_exact_match_of_later_preference_beats_language_match() {
        let m = map(&[("de-DE", "Hallo"), ("fr", "Bonjour")]);
        assert_eq!(
            best_locale(&m, &locales(&["de-AT", "fr"])).unwrap(),
            "Bonjour"
        );
    }

    #[test]
    fn test_language_fallback() {
        let m = map(&[("de-DE", "Hallo"), ("en-US", "Hello")]);
        assert_eq!(best_locale(&m, &locales(&["de_AT"])).unwrap(), "Hallo");
    }

    #[test]
    fn test_english_then_first() {
        let m = map(&[("en", "Hello"), ("fr", "Bonjour")]);
        assert_eq!(best_locale(&m, &locales(&["ja"])).unwrap(), "Hello");

        let m = map(&[("fr", "Bonjour"), ("it", "Ciao")]);
        assert_eq!(best_locale(&m, &[]).unwrap(), "Bonjour");

        assert!(best_locale(&BTreeMap::<String, String>::new(), &[]).is_none());
        assert!(best_locale_opt::<String>(None, &[]).is_none());
    }
}
