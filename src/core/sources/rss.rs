use quick_xml::Reader;
use quick_xml::events::Event;

use crate::core::error::SourceError;

/// One entry pulled out of an RSS `<item>` or Atom `<entry>`.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
}

/// Tolerant RSS/Atom parser. Namespaces are matched by local name so
/// `media:content`, `content:encoded` and friends resolve the same way
/// regardless of prefix.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    #[derive(PartialEq)]
    enum Field {
        Title,
        Link,
        Description,
    }

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                match name.as_slice() {
                    b"item" | b"entry" => current = Some(FeedEntry::default()),
                    b"title" if current.is_some() => field = Some(Field::Title),
                    b"link" if current.is_some() => field = Some(Field::Link),
                    b"description" | b"summary" if current.is_some() => {
                        field = Some(Field::Description)
                    }
                    _ => field = None,
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if let Some(entry) = current.as_mut() {
                    match name.as_slice() {
                        // Atom puts the link in an href attribute.
                        b"link" => {
                            if let Some(href) = attr(&e, b"href") {
                                entry.link = href;
                            }
                        }
                        b"enclosure" | b"content" | b"thumbnail" => {
                            if entry.image_url.is_none()
                                && let Some(url) = attr(&e, b"url")
                                && looks_like_image(&url, attr(&e, b"type").as_deref())
                            {
                                entry.image_url = Some(url);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field.as_ref()) {
                    let text = t.unescape().unwrap_or_default().to_string();
                    match f {
                        Field::Title => append(&mut entry.title, &text),
                        Field::Link => append(&mut entry.link, &text),
                        Field::Description => append(&mut entry.description, &text),
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field.as_ref()) {
                    let text = String::from_utf8_lossy(&t).to_string();
                    match f {
                        Field::Title => append(&mut entry.title, &text),
                        Field::Link => append(&mut entry.link, &text),
                        Field::Description => append(&mut entry.description, &text),
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                match name.as_slice() {
                    b"item" | b"entry" => {
                        if let Some(entry) = current.take()
                            && !entry.title.is_empty()
                        {
                            entries.push(entry);
                        }
                    }
                    _ => field = None,
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Unavailable(format!("feed parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn append(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text.trim());
}

fn attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

fn looks_like_image(url: &str, mime: Option<&str>) -> bool {
    if let Some(mime) = mime {
        return mime.starts_with("image/");
    }
    let lower = url.to_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .iter()
        .any(|ext| lower.contains(ext))
}
