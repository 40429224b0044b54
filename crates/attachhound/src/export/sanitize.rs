//! Filename sanitization for exported attachments.

/// Longest filename most filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Extensions longer than this are treated as part of the base name when truncating.
const MAX_EXTENSION_BYTES: usize = 50;

const FALLBACK_NAME: &str = "attachment";

/// Makes a server-supplied filename safe to use as a single path component.
///
/// Alphanumerics (any script), `.`, `-`, `_` and space survive; everything
/// else, including both path separators, becomes `_`. The result never
/// contains a separator and is never `.`, `..` or empty.
pub fn sanitize_filename(filename: &str) -> String {
    let replaced: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Remove leading/trailing dots and spaces
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else if trimmed.len() > MAX_FILENAME_BYTES {
        truncate(trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Cuts a name down to [`MAX_FILENAME_BYTES`] on a char boundary, keeping a
/// short extension intact.
fn truncate(name: &str) -> String {
    let (base, ext) = split_extension(name);
    fit_name(base, "", ext)
}

/// Splits `name` into base and extension (with its dot). Dotfiles and
/// extensions over [`MAX_EXTENSION_BYTES`] have no extension.
pub(crate) fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && name.len() - pos <= MAX_EXTENSION_BYTES => {
            (&name[..pos], &name[pos..])
        }
        _ => (name, ""),
    }
}

/// Joins `base`, `suffix` and `ext`, shortening `base` on a char boundary so
/// the result fits in [`MAX_FILENAME_BYTES`].
pub(crate) fn fit_name(base: &str, suffix: &str, ext: &str) -> String {
    let budget = MAX_FILENAME_BYTES.saturating_sub(suffix.len() + ext.len());

    let mut end = 0;
    for (idx, c) in base.char_indices() {
        if idx + c.len_utf8() > budget {
            break;
        }
        end = idx + c.len_utf8();
    }

    let cut = if end < base.len() {
        base[..end].trim_end_matches(|c| c == '.' || c == ' ')
    } else {
        base
    };
    format!("{}{}{}", cut, suffix, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_safe_names() {
        assert_eq!(sanitize_filename("invoice 2024-03_final.pdf"), "invoice 2024-03_final.pdf");
        assert_eq!(sanitize_filename("Rechnung_März.pdf"), "Rechnung_März.pdf");
    }

    #[test]
    fn test_replaces_separators_and_specials() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("rm -rf $(x);.sh"), "rm -rf __x__.sh");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_path_traversal_is_neutralized() {
        let name = sanitize_filename("../../etc/passwd");
        assert_eq!(name, "_.._etc_passwd");
        assert!(!name.contains('/'));
        assert_eq!(sanitize_filename(".."), "attachment");
        assert_eq!(sanitize_filename(" . "), "attachment");
    }

    #[test]
    fn test_trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  .hidden.txt. "), "hidden.txt");
    }

    #[test]
    fn test_empty_becomes_fallback() {
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn test_long_names_keep_extension() {
        let long = format!("{}.pdf", "a".repeat(400));
        let name = sanitize_filename(&long);
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = format!("{}.txt", "ä".repeat(200));
        let name = sanitize_filename(&long);
        assert!(name.len() <= MAX_FILENAME_BYTES);
        assert!(name.ends_with(".txt"));
        assert!(name.starts_with('ä'));
    }

    #[test]
    fn test_fit_name_makes_room_for_suffix() {
        let base = "a".repeat(251);
        let name = fit_name(&base, "_2", ".pdf");
        assert_eq!(name.len(), MAX_FILENAME_BYTES);
        assert!(name.ends_with("a_2.pdf"));

        assert_eq!(fit_name("report", "_3", ".pdf"), "report_3.pdf");
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(split_extension("notes"), ("notes", ""));
        let long_ext = format!("a.{}", "x".repeat(60));
        assert_eq!(split_extension(&long_ext), (long_ext.as_str(), ""));
    }
}
