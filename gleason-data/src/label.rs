use crate::common::*;

/// The number of severity classes.
pub const NUM_CLASSES: usize = 4;

/// Map a patch file name to its integer class label.
///
/// The two leading underscore-delimited tokens, lower-cased and joined
/// with an underscore, form the class key: `gleason_5 -> 3`,
/// `gleason_4 -> 2`, `gleason_3 -> 1`. Every other key, including
/// malformed file names, falls into the background class 0. The
/// silent fallback is kept for parity with prior pipeline runs; a
/// malformed name is indistinguishable from a true background patch.
pub fn resolve_label(file_name: &str) -> i64 {
    let mut tokens = file_name.split('_');
    let key = match (tokens.next(), tokens.next()) {
        (Some(first), Some(second)) => {
            format!("{}_{}", first.to_lowercase(), second.to_lowercase())
        }
        _ => return 0,
    };

    match key.as_str() {
        "gleason_5" => 3,
        "gleason_4" => 2,
        "gleason_3" => 1,
        _ => 0,
    }
}

/// Resolve the label of a file path's final component.
pub fn resolve_path_label(path: &Path) -> i64 {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(resolve_label)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_classes_test() {
        assert_eq!(resolve_label("Gleason_5_patch_001.png"), 3);
        assert_eq!(resolve_label("gleason_4_patch_002.png"), 2);
        assert_eq!(resolve_label("GLEASON_3_patch_003.png"), 1);
    }

    #[test]
    fn background_fallback_test() {
        assert_eq!(resolve_label("Benign_0_patch_004.png"), 0);
        assert_eq!(resolve_label("gleason_2_patch_005.png"), 0);
        assert_eq!(resolve_label("stroma.png"), 0);
        assert_eq!(resolve_label(""), 0);
        // the second token carries the extension when only two tokens
        // exist, so the key never matches
        assert_eq!(resolve_label("Gleason_5.png"), 0);
    }

    #[test]
    fn path_label_test() {
        assert_eq!(
            resolve_path_label(Path::new("/data/train/Gleason_4_x0_y0.png")),
            2
        );
    }
}
