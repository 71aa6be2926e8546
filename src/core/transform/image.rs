use crate::core::types::{ImageMode, RawItem};

/// Derive the image reference attached to a processed item. Rendering is
/// someone else's job; connectors treat the returned string as opaque.
///
/// `card://` references are deterministic so reruns of the same item
/// produce the same artifact name downstream.
pub fn image_ref_for(item: &RawItem, topic: &str, mode: ImageMode) -> Option<String> {
    match mode {
        ImageMode::SourceImage => match &item.image_url {
            Some(url) if url.starts_with("http") => Some(url.clone()),
            _ => Some(card_ref(item, topic)),
        },
        ImageMode::Card => Some(card_ref(item, topic)),
    }
}

fn card_ref(item: &RawItem, topic: &str) -> String {
    let headline: String = item.title.chars().take(120).collect();
    format!(
        "card://{}?headline={}",
        slug(topic),
        urlencoding::encode(&headline)
    )
}

fn slug(s: &str) -> String {
    let slug: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "news".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(image_url: Option<&str>) -> RawItem {
        RawItem {
            source_id: "feed:x".into(),
            url: "https://example.com/a".into(),
            title: "A headline".into(),
            fetched_at: 0,
            raw_text: String::new(),
            image_url: image_url.map(String::from),
        }
    }

    #[test]
    fn source_image_passes_through_when_present() {
        let reference = image_ref_for(
            &item(Some("https://example.com/lead.jpg")),
            "rust",
            ImageMode::SourceImage,
        );
        assert_eq!(reference.as_deref(), Some("https://example.com/lead.jpg"));
    }

    #[test]
    fn missing_image_falls_back_to_a_card() {
        let reference = image_ref_for(&item(None), "rust news", ImageMode::SourceImage).unwrap();
        assert!(reference.starts_with("card://rust-news?"));
    }

    #[test]
    fn card_refs_are_deterministic() {
        let a = image_ref_for(&item(None), "rust", ImageMode::Card);
        let b = image_ref_for(&item(None), "rust", ImageMode::Card);
        assert_eq!(a, b);
    }
}
