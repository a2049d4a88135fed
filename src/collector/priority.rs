//! Priority scoring for collected scripts.
//!
//! Additive score: kind base, size bracket, URL keyword hits, vendor-path
//! penalties. Ties are broken by insertion order (callers sort stably).

use super::ScriptKind;

/// URL substrings that usually mark the interesting code.
const HOT_KEYWORDS: &[&str] = &[
    "core", "main", "index", "app", "bundle", "crypto", "encrypt", "decrypt", "sign",
    "signature", "api", "auth", "token", "security", "captcha", "fingerprint",
];

/// URL substrings that usually mark third-party filler.
const COLD_KEYWORDS: &[&str] = &[
    "vendor", "node_modules", "polyfill", "jquery", "lodash", "analytics", "gtag",
    "tracking", "advert", "pixel",
];

pub fn score(url: &str, kind: ScriptKind, size: usize, extra_priorities: &[String]) -> i64 {
    let mut score: i64 = match kind {
        ScriptKind::External => 20,
        ScriptKind::ServiceWorker => 30,
        ScriptKind::WebWorker => 25,
        ScriptKind::Inline => 10,
    };

    score += match size {
        0..=1_023 => -5,
        1_024..=10_239 => 0,
        10_240..=512_000 => 10,
        512_001..=1_048_576 => 5,
        _ => -10,
    };

    let lower = url.to_lowercase();
    for keyword in HOT_KEYWORDS {
        if lower.contains(keyword) {
            score += 15;
        }
    }
    for keyword in extra_priorities {
        if lower.contains(&keyword.to_lowercase()) {
            score += 20;
        }
    }
    for keyword in COLD_KEYWORDS {
        if lower.contains(keyword) {
            score -= 25;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_beats_vendor() {
        let hot = score("https://a.test/js/crypto-sign.js", ScriptKind::External, 50_000, &[]);
        let cold = score(
            "https://a.test/vendor/jquery.min.js",
            ScriptKind::External,
            50_000,
            &[],
        );
        assert!(hot > cold);
    }

    #[test]
    fn test_extra_priorities() {
        let base = score("https://a.test/js/widget.js", ScriptKind::External, 50_000, &[]);
        let boosted = score(
            "https://a.test/js/widget.js",
            ScriptKind::External,
            50_000,
            &["widget".to_string()],
        );
        assert_eq!(boosted - base, 20);
    }

    #[test]
    fn test_size_brackets() {
        let tiny = score("https://a.test/x.js", ScriptKind::External, 100, &[]);
        let mid = score("https://a.test/x.js", ScriptKind::External, 100_000, &[]);
        let huge = score("https://a.test/x.js", ScriptKind::External, 4_000_000, &[]);
        assert!(mid > tiny);
        assert!(mid > huge);
    }

    #[test]
    fn test_service_worker_base() {
        let sw = score("https://a.test/sw.js", ScriptKind::ServiceWorker, 5_000, &[]);
        let inline = score("https://a.test/sw.js", ScriptKind::Inline, 5_000, &[]);
        assert!(sw > inline);
    }
}
