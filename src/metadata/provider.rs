//! Provider detection from filename evidence.
//!
//! Detection is a ranked evidence-combination over filename tokens, returning
//! a confidence tier rather than a boolean. Ambiguous results must be routed
//! to explicit user confirmation; callers never treat a tie as a guess.

use std::path::Path;

use serde::Serialize;

use crate::metadata::asset::Provider;

/// Minimum score before a provider is considered a viable match.
const VIABLE_SCORE: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectionConfidence {
    Confident,
    Ambiguous,
    NoEvidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMatch {
    pub provider: Provider,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderEvidence {
    pub best: Option<Provider>,
    pub candidates: Vec<ProviderMatch>,
    pub confidence: DetectionConfidence,
}

/// Score every known provider against the file name and rank the evidence.
pub fn detect_provider(path: &Path) -> ProviderEvidence {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let tokens = split_tokens(&filename);

    let mut matches = vec![
        score_sentinel(&tokens, &filename),
        score_planetscope(&tokens, &filename),
        score_vantor(&tokens, &filename),
        score_triplesat(&tokens, &filename),
        score_landsat(&tokens, &filename),
        score_meteocloud(&tokens, &filename),
    ];
    matches.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.provider.label().cmp(b.provider.label()))
    });

    let viable: Vec<ProviderMatch> = matches
        .into_iter()
        .filter(|candidate| candidate.score >= VIABLE_SCORE)
        .collect();

    if viable.is_empty() {
        return ProviderEvidence {
            best: None,
            candidates: Vec::new(),
            confidence: DetectionConfidence::NoEvidence,
        };
    }

    let top_score = viable[0].score;
    let tied = viable
        .iter()
        .filter(|candidate| candidate.score == top_score)
        .count();
    if tied > 1 {
        return ProviderEvidence {
            best: None,
            candidates: viable,
            confidence: DetectionConfidence::Ambiguous,
        };
    }

    ProviderEvidence {
        best: Some(viable[0].provider),
        candidates: viable,
        confidence: DetectionConfidence::Confident,
    }
}

fn split_tokens(value: &str) -> Vec<&str> {
    value
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn has_any(tokens: &[&str], wanted: &[&str]) -> bool {
    tokens.iter().any(|token| wanted.contains(token))
}

fn score_sentinel(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("sentinel") {
        score += 5;
    }
    if has_any(tokens, &["s2a", "s2b", "s2c", "s2l"]) {
        score += 3;
    }
    if has_any(tokens, &["s2msi", "msil1c", "msil2a"]) {
        score += 4;
    }
    if normalized.contains(".safe") || has_any(tokens, &["safe"]) {
        score += 1;
    }
    if has_any(tokens, &["granule"]) {
        score += 1;
    }
    ProviderMatch {
        provider: Provider::Sentinel2,
        score,
    }
}

fn score_planetscope(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("planetscope") {
        score += 5;
    }
    if has_any(tokens, &["planet"]) {
        score += 2;
    }
    if tokens.iter().any(|token| token.starts_with("psscene")) {
        score += 4;
    }
    if has_any(tokens, &["ps2", "ps2a", "ps2b", "ps3", "ps4", "psb"]) {
        score += 2;
    }
    if has_any(tokens, &["udm", "udm2", "analytic", "ortho"]) {
        score += 1;
    }
    ProviderMatch {
        provider: Provider::PlanetScope,
        score,
    }
}

fn score_vantor(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("vantor") {
        score += 5;
    }
    if normalized.contains("worldview") {
        score += 3;
    }
    if has_any(
        tokens,
        &["wv01", "wv02", "wv03", "wv04", "wv1", "wv2", "wv3", "wv4"],
    ) {
        score += 2;
    }
    if has_any(tokens, &["ge01", "geoeye"]) {
        score += 1;
    }
    ProviderMatch {
        provider: Provider::Vantor,
        score,
    }
}

fn score_triplesat(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("triplesat") {
        score += 5;
    }
    if normalized.contains("21at") {
        score += 3;
    }
    if has_any(tokens, &["tsat"]) {
        score += 2;
    }
    ProviderMatch {
        provider: Provider::TripleSat,
        score,
    }
}

fn score_landsat(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("landsat") {
        score += 5;
    }
    if has_any(tokens, &["lc08", "lc09", "le07", "lt05", "lt04"]) {
        score += 3;
    }
    if has_any(tokens, &["lm01", "lm02", "lm03", "lm04", "lm05"]) {
        score += 2;
    }
    if has_any(tokens, &["l1tp", "l1gt", "l1gs"]) {
        score += 2;
    }
    if has_any(tokens, &["oli", "tirs", "etm", "tm"]) {
        score += 1;
    }
    ProviderMatch {
        provider: Provider::Landsat,
        score,
    }
}

fn score_meteocloud(tokens: &[&str], normalized: &str) -> ProviderMatch {
    let mut score = 0;
    if normalized.contains("meteocloud") {
        score += 5;
    }
    if normalized.contains("meteorological") {
        score += 3;
    }
    if has_any(tokens, &["cloud", "weather"]) {
        score += 2;
    }
    ProviderMatch {
        provider: Provider::MeteoCloud,
        score,
    }
}

/// Sensor name inferred from the file name for a detected provider.
pub fn infer_sensor(path: &Path, provider: Provider) -> Option<String> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match provider {
        Provider::Sentinel2 => {
            if filename.contains("msil2a") {
                Some("MSI-L2A".into())
            } else if filename.contains("msil1c") {
                Some("MSI-L1C".into())
            } else {
                Some("MSI".into())
            }
        }
        Provider::PlanetScope => {
            if filename.contains("psscene") || filename.contains("analyticms") {
                Some("PSScene-4Band".into())
            } else {
                Some("PlanetScope".into())
            }
        }
        Provider::Landsat => Some("OLI/TIRS".into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sentinel_detection() {
        let evidence = detect_provider(&PathBuf::from(
            "S2A_MSIL2A_20240612T101031_N0510_R022_T33UUP_20240612T135416.tif",
        ));
        assert_eq!(evidence.best, Some(Provider::Sentinel2));
        assert_eq!(evidence.confidence, DetectionConfidence::Confident);
    }

    #[test]
    fn test_planetscope_detection() {
        let evidence =
            detect_provider(&PathBuf::from("20240301_101530_88_2486_3B_AnalyticMS_psscene.tif"));
        assert_eq!(evidence.best, Some(Provider::PlanetScope));
    }

    #[test]
    fn test_no_evidence() {
        let evidence = detect_provider(&PathBuf::from("holiday_photo.png"));
        assert_eq!(evidence.best, None);
        assert_eq!(evidence.confidence, DetectionConfidence::NoEvidence);
    }

    #[test]
    fn test_ambiguity_is_reported_not_guessed() {
        // Both Sentinel-2 and Landsat tokens at equal strength.
        let evidence = detect_provider(&PathBuf::from("sentinel_landsat_merge.tif"));
        assert_eq!(evidence.best, None);
        assert_eq!(evidence.confidence, DetectionConfidence::Ambiguous);
        assert!(evidence.candidates.len() >= 2);
    }

    #[test]
    fn test_sensor_inference() {
        let path = PathBuf::from("S2B_MSIL1C_20240101T000000.tif");
        assert_eq!(
            infer_sensor(&path, Provider::Sentinel2).as_deref(),
            Some("MSI-L1C")
        );
        assert_eq!(infer_sensor(&path, Provider::Unknown), None);
    }
}
