//! Text watermark and scaling filters.
//!
//! The watermark is a semi-transparent `drawtext` in the bottom-right corner,
//! sized relative to the frame height so it reads the same at every output
//! resolution.

/// Distance from the right and bottom edges, in pixels.
pub const WATERMARK_MARGIN: u32 = 20;

/// Output height used when the requested resolution code is unknown.
pub const DEFAULT_TARGET_HEIGHT: u32 = 720;

/// Target frame height for a task resolution code.
///
/// `None` keeps the source height. Codes grow monotonically: 5 is 4K and 6
/// is 8K.
pub fn target_height(resolution: Option<i64>) -> Option<u32> {
    match resolution {
        None | Some(0) => None,
        Some(1) => Some(480),
        Some(2) => Some(720),
        Some(3) => Some(1080),
        Some(4) => Some(1440),
        Some(5) => Some(2160),
        Some(6) => Some(4320),
        Some(_) => Some(DEFAULT_TARGET_HEIGHT),
    }
}

/// Scale filter keeping the aspect ratio with an even width.
pub fn scale_filter(height: u32) -> String {
    format!("scale=-2:{}", height)
}

/// Escape text for use inside a quoted drawtext `text='...'` option.
fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '\'' | ':' | '%' | ',' | ';' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' | '\r' => escaped.push(' '),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `drawtext` filter for `text`, or `None` when there is nothing to draw.
pub fn drawtext_filter(text: Option<&str>) -> Option<String> {
    let text = text.map(str::trim).filter(|t| !t.is_empty())?;
    Some(format!(
        "drawtext=text='{}':x=w-tw-{m}:y=h-th-{m}:fontsize=h*0.03:fontcolor=white@0.3:shadowx=2:shadowy=2:shadowcolor=black@0.3",
        escape_drawtext(text),
        m = WATERMARK_MARGIN,
    ))
}

/// Join filter fragments into one `-vf` chain, skipping absent ones.
pub fn filter_chain<I>(filters: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let parts: Vec<String> = filters.into_iter().flatten().collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_map() {
        assert_eq!(target_height(None), None);
        assert_eq!(target_height(Some(0)), None);
        assert_eq!(target_height(Some(1)), Some(480));
        assert_eq!(target_height(Some(3)), Some(1080));
        assert_eq!(target_height(Some(4)), Some(1440));
        assert_eq!(target_height(Some(5)), Some(2160));
        assert_eq!(target_height(Some(6)), Some(4320));
        assert_eq!(target_height(Some(42)), Some(DEFAULT_TARGET_HEIGHT));
    }

    #[test]
    fn test_drawtext() {
        let filter = drawtext_filter(Some("fswap.ai")).unwrap();
        assert!(filter.starts_with("drawtext=text='fswap.ai'"));
        assert!(filter.contains("x=w-tw-20:y=h-th-20"));
        assert!(filter.contains("fontcolor=white@0.3"));

        assert!(drawtext_filter(Some("  ")).is_none());
        assert!(drawtext_filter(None).is_none());
    }

    #[test]
    fn test_drawtext_escaping() {
        let filter = drawtext_filter(Some("it's 100%: ok")).unwrap();
        assert!(filter.contains(r"text='it\'s 100\%\: ok'"));
    }

    #[test]
    fn test_filter_chain() {
        assert_eq!(
            filter_chain([Some(scale_filter(720)), None, Some("null".to_string())]).as_deref(),
            Some("scale=-2:720,null")
        );
        assert!(filter_chain([None, None]).is_none());
    }
}
