use std::borrow::Cow;

pub mod building;
pub mod checking;
pub mod compiling;
pub mod reporting;
pub mod running;

/// Characters of program output kept in debug logs.
pub const LOG_PREVIEW_CHARS: usize = 256;

/// Cuts `text` to `max` characters for logging, noting how much was dropped.
pub fn shorten(text: &str, max: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!(
            "{}... ({} more bytes)",
            &text[..cut],
            text.len() - cut
        )),
    }
}
