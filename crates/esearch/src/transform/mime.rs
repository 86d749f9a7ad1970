//! Turning a decrypted body into renderable HTML

use mail_parser::{MessageParser, MimeHeaders};

use super::html::plain_to_html;

/// Renderable HTML for a decrypted body.
///
/// MIME containers (PGP/MIME, or inline-PGP payloads that decrypt to a MIME
/// entity) are parsed: the HTML part wins, the text part is the fallback.
/// A `text/plain` body is escaped; anything else is already HTML.
pub fn renderable_html(decrypted: &str, mime_type: &str) -> String {
    if is_mime_container(decrypted, mime_type) {
        if let Some(html) = html_from_mime(decrypted) {
            return html;
        }
    }
    if mime_type.eq_ignore_ascii_case("text/plain") {
        plain_to_html(decrypted)
    } else {
        decrypted.to_string()
    }
}

fn is_mime_container(decrypted: &str, mime_type: &str) -> bool {
    if mime_type.to_ascii_lowercase().starts_with("multipart/") {
        return true;
    }
    decrypted
        .trim_start()
        .get(..13)
        .is_some_and(|head| head.eq_ignore_ascii_case("content-type:"))
}

fn html_from_mime(raw: &str) -> Option<String> {
    let message = MessageParser::default().parse(raw.as_bytes())?;

    let has_html_part = message.parts.iter().any(|part| {
        part.attachment_name().is_none()
            && part.content_type().is_some_and(|ct| {
                ct.ctype().eq_ignore_ascii_case("text")
                    && ct.subtype().is_some_and(|sub| sub.eq_ignore_ascii_case("html"))
            })
    });

    if has_html_part {
        if let Some(html) = message.body_html(0) {
            return Some(html.into_owned());
        }
    }
    message.body_text(0).map(|text| plain_to_html(&text))
}
