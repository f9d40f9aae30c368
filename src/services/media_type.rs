//! Accepted upload type policy.
//!
//! A hint is either a MIME type (`image/png`, `text/plain; charset=utf-8`)
//! or a bare extension (`png`, `.PDF`). MIME hints may map to several
//! candidate extensions; the upload passes if any candidate is accepted.

/// Extensions an upload may be stored as.
pub const ACCEPTED_TYPES: [&str; 8] = ["jpg", "jpeg", "png", "gif", "pdf", "txt", "doc", "docx"];

/// Infer candidate extensions from a content-type or extension hint.
///
/// Returns an empty list when nothing can be inferred.
pub fn candidates(hint: &str) -> Vec<String> {
    let essence = hint
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.is_empty() {
        return Vec::new();
    }

    if essence.contains('/') {
        return mime_guess::get_mime_extensions_str(&essence)
            .map(|exts| exts.iter().map(|ext| ext.to_string()).collect())
            .unwrap_or_default();
    }

    let ext = essence.trim_start_matches('.');
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Vec::new();
    }
    vec![ext.to_string()]
}

/// First candidate that is a member of [`ACCEPTED_TYPES`].
pub fn first_accepted(candidates: &[String]) -> Option<&'static str> {
    candidates.iter().find_map(|candidate| {
        ACCEPTED_TYPES
            .iter()
            .find(|accepted| **accepted == candidate.as_str())
            .copied()
    })
}

/// MIME type served back for a stored extension.
pub fn content_type_for(media_type: &str) -> String {
    mime_guess::from_ext(media_type)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_mime_maps_to_pdf() {
        let found = candidates("application/pdf");
        assert_eq!(first_accepted(&found), Some("pdf"));
    }

    #[test]
    fn jpeg_mime_yields_an_accepted_candidate() {
        let found = candidates("image/jpeg");
        assert!(found.len() > 1);
        let chosen = first_accepted(&found).unwrap();
        assert!(chosen == "jpg" || chosen == "jpeg");
    }

    #[test]
    fn mime_parameters_are_ignored() {
        let found = candidates("Text/Plain; charset=utf-8");
        assert_eq!(first_accepted(&found), Some("txt"));
    }

    #[test]
    fn bare_extension_hint_is_its_own_candidate() {
        assert_eq!(candidates(".PNG"), vec!["png".to_string()]);
        assert_eq!(first_accepted(&candidates("docx")), Some("docx"));
    }

    #[test]
    fn unknown_or_blank_hint_has_no_candidates() {
        assert!(candidates("").is_empty());
        assert!(candidates("   ").is_empty());
        assert!(candidates("application/x-definitely-not-registered").is_empty());
        assert!(candidates("../etc").is_empty());
    }

    #[test]
    fn unaccepted_candidates_are_rejected() {
        assert_eq!(first_accepted(&candidates("video/mp4")), None);
        assert_eq!(first_accepted(&candidates("exe")), None);
    }

    #[test]
    fn first_accepted_skips_leading_unaccepted() {
        let list = vec!["bin".to_string(), "gif".to_string(), "png".to_string()];
        assert_eq!(first_accepted(&list), Some("gif"));
    }

    #[test]
    fn stored_types_map_back_to_mime() {
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("pdf"), "application/pdf");
    }
}
