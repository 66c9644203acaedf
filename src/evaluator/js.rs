//! JavaScript evaluated in the page to probe above-the-fold rendering
//!
//! The probe receives the candidate selectors and group conditions as a
//! JSON payload and answers three questions against the live viewport:
//! which selectors match an element starting above the fold, which media
//! conditions currently apply, and which supports conditions hold. An
//! unparsable selector simply never matches; an unparsable condition is
//! kept so uncertainty errs toward keeping CSS.

/// Called as `(script)(payload)` with a payload of `selectors`,
/// `mediaConditions` and `supportsConditions` arrays.
pub const CRITICAL_PROBE_SCRIPT: &str = r#"(payload) => {
    const viewportHeight = window.innerHeight;

    const startsAboveFold = (element) => {
        const rect = element.getBoundingClientRect();
        return rect.top < viewportHeight;
    };

    const criticalSelectors = [];
    for (const selector of payload.selectors) {
        let matches;
        try {
            matches = document.querySelectorAll(selector);
        } catch (error) {
            continue;
        }
        for (const element of matches) {
            if (startsAboveFold(element)) {
                criticalSelectors.push(selector);
                break;
            }
        }
    }

    const activeMedia = [];
    for (const condition of payload.mediaConditions) {
        try {
            if (window.matchMedia(condition).matches) {
                activeMedia.push(condition);
            }
        } catch (error) {
            activeMedia.push(condition);
        }
    }

    const activeSupports = [];
    for (const condition of payload.supportsConditions) {
        try {
            if (CSS.supports(condition)) {
                activeSupports.push(condition);
            }
        } catch (error) {
            activeSupports.push(condition);
        }
    }

    return { criticalSelectors, activeMedia, activeSupports };
}"#;
