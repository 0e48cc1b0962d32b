//! Quality negotiation.
//!
//! Resolves the tier a job will actually encode at. The rule is the
//! smaller of what the caller asked for and what the source can supply:
//! a 720p source asked for 1080p gets 720p. Upscaling never happens.

use crate::probe::MediaProbe;
use mediakiln_common::QualityTier;
use tracing::debug;

/// Resolve the target tier for a request.
///
/// Without probe data there is nothing to cap against, so the requested
/// tier stands. That is a documented best-effort fallback, not an error:
/// the encoder will still scale to the tier's resolution.
pub fn resolve_quality(requested: QualityTier, probe: Option<&MediaProbe>) -> QualityTier {
    match probe.and_then(|p| p.height) {
        Some(height) => {
            let capability = QualityTier::for_source_height(height);
            let resolved = requested.min(capability);
            if resolved < requested {
                debug!(
                    %requested,
                    %resolved,
                    source_height = height,
                    "capped requested tier to source capability"
                );
            }
            resolved
        }
        None => requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with_height(height: u32) -> MediaProbe {
        MediaProbe {
            height: Some(height),
            width: Some(height * 16 / 9),
            ..Default::default()
        }
    }

    #[test]
    fn test_caps_to_source_capability() {
        let probe = probe_with_height(720);
        assert_eq!(
            resolve_quality(QualityTier::Q1080, Some(&probe)),
            QualityTier::Q720
        );
        assert_eq!(
            resolve_quality(QualityTier::Q2160, Some(&probe)),
            QualityTier::Q720
        );
    }

    #[test]
    fn test_downscale_request_honored() {
        let probe = probe_with_height(2160);
        assert_eq!(
            resolve_quality(QualityTier::Q480, Some(&probe)),
            QualityTier::Q480
        );
    }

    #[test]
    fn test_exact_match() {
        let probe = probe_with_height(1080);
        assert_eq!(
            resolve_quality(QualityTier::Q1080, Some(&probe)),
            QualityTier::Q1080
        );
    }

    #[test]
    fn test_missing_probe_falls_back_to_requested() {
        assert_eq!(resolve_quality(QualityTier::Q1080, None), QualityTier::Q1080);

        // A probe without a video stream behaves the same.
        let probe = MediaProbe::default();
        assert_eq!(
            resolve_quality(QualityTier::Q720, Some(&probe)),
            QualityTier::Q720
        );
    }

    #[test]
    fn test_never_upscales() {
        // For every (requested, source-height) pair the resolved tier is
        // bounded by both the request and the source capability.
        let heights = [144u32, 240, 360, 480, 720, 1080, 1440, 2160, 4320];
        for requested in QualityTier::ALL {
            for height in heights {
                let probe = probe_with_height(height);
                let resolved = resolve_quality(requested, Some(&probe));
                assert!(resolved <= requested);
                assert!(resolved <= QualityTier::for_source_height(height));
            }
        }
    }
}
