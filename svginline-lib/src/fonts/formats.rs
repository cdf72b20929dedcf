use log::warn;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Font file extensions and the content type their data URIs are tagged with.
pub const FONT_FORMATS: &[(&str, &str)] = &[
    ("woff2", "font/woff2"),
    ("woff", "font/woff"),
    ("otf", "application/x-font-opentype"),
    ("ttf", "application/x-font-ttf"),
    ("eot", "application/vnd.ms-fontobject"),
    ("sfnt", "application/font-sfnt"),
    ("svg", "image/svg+xml"),
];

/// Content type for a font URL, from the extension of its last path segment. Query and fragment
/// are ignored. Unknown extensions fall back to [`DEFAULT_MIME_TYPE`] with a warning.
pub fn font_mime_type_from_url(font_url: &str) -> &'static str {
    let path = font_url
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(font_url);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let known = file_name.rsplit_once('.').and_then(|(_, extension)| {
        FONT_FORMATS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(extension))
            .map(|(_, mime)| *mime)
    });
    match known {
        Some(mime) => mime,
        None => {
            warn!(
                "Unknown font format for {}. Fonts may not be working correctly.",
                font_url
            );
            DEFAULT_MIME_TYPE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map_to_their_type() {
        for (extension, mime) in FONT_FORMATS {
            let url = format!("https://fonts.example.com/a/Roboto-Regular.{}", extension);
            assert_eq!(font_mime_type_from_url(&url), *mime);
        }
        assert_eq!(
            font_mime_type_from_url("https://x/f.WOFF2?v=3#iefix"),
            "font/woff2"
        );
    }

    #[test]
    fn unknown_extensions_are_generic_binary() {
        assert_eq!(font_mime_type_from_url("https://x/font.bin"), DEFAULT_MIME_TYPE);
        assert_eq!(font_mime_type_from_url("https://x/woff2/font"), DEFAULT_MIME_TYPE);
        // `.woff` must not be read out of `.woff2.gz`.
        assert_eq!(font_mime_type_from_url("https://x/font.woff2.gz"), DEFAULT_MIME_TYPE);
    }
}
