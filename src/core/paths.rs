//! Output-directory layout and shared path utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// File name of the screenshot captured on failure.
pub const SCREENSHOT_FILE: &str = "screenshot.png";

/// Directory (under a test's output directory) holding sub-test outputs.
pub const SUBTESTS_DIR: &str = "subtests";

/// Replace anything that is not safe in a file name with `_`.
///
/// Dots are kept so variant names such as `inputs.PhysicalKeyboard.us`
/// stay readable.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Output directory of one test variant.
pub fn test_out_dir(root: &Path, test_name: &str) -> PathBuf {
    root.join("tests").join(sanitize_name(test_name))
}

/// Output directory of a named sub-test below a test's output directory.
pub fn subtest_out_dir(test_out: &Path, sub_name: &str) -> PathBuf {
    test_out.join(SUBTESTS_DIR).join(sanitize_name(sub_name))
}

/// `ui_tree_<name>.txt`; a bare `ui_tree.txt` for an empty name.
pub fn ui_tree_file(name: &str) -> String {
    if name.is_empty() {
        "ui_tree.txt".to_string()
    } else {
        format!("ui_tree_{}.txt", sanitize_name(name))
    }
}

/// `<TestName>.webm`.
pub fn recording_file(test_name: &str) -> String {
    format!("{}.webm", sanitize_name(test_name))
}

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_dots_and_replaces_separators() {
        assert_eq!(
            sanitize_name("inputs.PhysicalKeyboard.us"),
            "inputs.PhysicalKeyboard.us"
        );
        assert_eq!(sanitize_name("a/b c"), "a_b_c");
        assert_eq!(sanitize_name(".."), "_");
        assert_eq!(sanitize_name(""), "_");
    }

    #[test]
    fn diagnostic_file_names() {
        assert_eq!(ui_tree_file("validate hello"), "ui_tree_validate_hello.txt");
        assert_eq!(ui_tree_file(""), "ui_tree.txt");
        assert_eq!(recording_file("inputs.Emoji"), "inputs.Emoji.webm");
    }

    #[test]
    fn subtest_dirs_nest_under_test_dir() {
        let root = Path::new("/out");
        let test = test_out_dir(root, "inputs.VKTyping.en");
        assert_eq!(test, Path::new("/out/tests/inputs.VKTyping.en"));
        assert_eq!(
            subtest_out_dir(&test, "text area"),
            Path::new("/out/tests/inputs.VKTyping.en/subtests/text_area")
        );
    }

    #[test]
    fn normalizes_nonexistent_path_syntactically() {
        #[cfg(unix)]
        let root = Path::new("/");
        #[cfg(windows)]
        let root = Path::new("C:");

        let input = root.join("nonexistent").join("foo").join("..").join("bar");
        let expected = root.join("nonexistent").join("bar");
        assert!(std::fs::canonicalize(&input).is_err());
        assert_eq!(resolve_absolute_path(&input), expected);
    }

    #[test]
    fn handles_parent_at_root() {
        #[cfg(unix)]
        {
            let resolved = normalize_syntactic(Path::new("/../foo"));
            assert_eq!(resolved, Path::new("/foo"));
        }
    }
}
