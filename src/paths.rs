//! Path canonicalization and containment primitives.
//!
//! Every filesystem access triggered by a caller-supplied name goes through
//! these two functions before any read or write happens. The authoritative
//! defense is canonicalize-then-contain with real filesystem resolution:
//! symlinks are resolved to their targets, so a link inside a root that
//! points outside it fails the containment check even though the unresolved
//! string looks harmless.
//!
//! [`canonicalize`] also works for paths that do not exist yet (publish
//! targets): the deepest existing ancestor is resolved through the
//! filesystem, and the remaining non-existing components are appended to it.
//! A `..` that would climb out of that verified ancestor is rejected rather
//! than resolved lexically.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Resolve a path to an absolute real path, following symlinks.
///
/// With `must_exist`, this is plain [`std::fs::canonicalize`]. Without it,
/// the deepest existing ancestor is canonicalized and the non-existing
/// suffix is re-appended component by component. `..` components in the
/// non-existing suffix pop previously appended suffix components only; one
/// that would escape the canonicalized ancestor is an error, because there
/// is no directory on disk to verify it against.
pub fn canonicalize(path: &Path, must_exist: bool) -> io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(real) => Ok(real),
        Err(e) if !must_exist && e.kind() == io::ErrorKind::NotFound => {
            canonicalize_missing(path)
        }
        Err(e) => Err(e),
    }
}

/// Canonicalize a path whose tail does not exist on disk.
fn canonicalize_missing(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // Peel trailing components until an existing ancestor canonicalizes.
    let mut head = absolute;
    let mut tail: Vec<OsString> = Vec::new();
    let base = loop {
        match std::fs::canonicalize(&head) {
            Ok(real) => break real,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // file_name() is None when the path ends in `..` (or at the
                // root). A `..` through a non-existent directory cannot be
                // verified against anything real, so it is rejected.
                let Some(name) = head.file_name().map(|n| n.to_os_string()) else {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!(
                            "cannot resolve {}: no existing ancestor to verify against",
                            head.display()
                        ),
                    ));
                };
                tail.push(name);
                if !head.pop() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "path has no existing ancestor",
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    };

    let mut result = base;
    for name in tail.iter().rev() {
        result.push(name);
    }
    Ok(result)
}

/// Check whether `child` is `parent` or a descendant of it, comparing
/// canonical (symlink-resolved) forms.
///
/// Never fails: any resolution error — missing parent, unresolvable child,
/// traversal through a non-existent directory — yields `false`.
pub fn is_within(child: &Path, parent: &Path, child_must_exist: bool) -> bool {
    let Ok(parent_real) = canonicalize(parent, true) else {
        return false;
    };
    let Ok(child_real) = canonicalize(child, child_must_exist) else {
        return false;
    };
    child_real.starts_with(&parent_real)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn canonicalize_existing_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let real = canonicalize(&file, true).unwrap();
        assert!(real.is_absolute());
        assert!(real.ends_with("a.txt"));
    }

    #[test]
    fn canonicalize_missing_strict_errors() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.txt");
        assert!(canonicalize(&missing, true).is_err());
    }

    #[test]
    fn canonicalize_missing_lenient_resolves_ancestor() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("sub").join("new.png");

        let real = canonicalize(&missing, false).unwrap();
        let root_real = fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(real, root_real.join("sub").join("new.png"));
    }

    #[test]
    fn canonicalize_resolves_dotdot_through_existing_dirs() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let path = sub.join("..").join("new.png");
        let real = canonicalize(&path, false).unwrap();
        let root_real = fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(real, root_real.join("new.png"));
    }

    #[test]
    fn canonicalize_rejects_dotdot_through_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let sneaky = tmp.path().join("missing").join("..").join("x.png");
        // `missing/..` cannot be verified against a real directory.
        assert!(canonicalize(&sneaky, false).is_err());
    }

    #[test]
    fn is_within_direct_child() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("sub").join("file");
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(&file, "x").unwrap();

        assert!(is_within(&file, tmp.path(), true));
    }

    #[test]
    fn is_within_self() {
        let tmp = TempDir::new().unwrap();
        assert!(is_within(tmp.path(), tmp.path(), true));
    }

    #[test]
    fn is_within_rejects_dotdot_escape() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside.txt");
        fs::create_dir(&root).unwrap();
        fs::write(&outside, "secret").unwrap();

        let escape = root.join("..").join("outside.txt");
        assert!(!is_within(&escape, &root, true));
    }

    #[test]
    fn is_within_rejects_sibling() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();

        assert!(!is_within(&b, &a, true));
    }

    #[test]
    fn is_within_missing_parent_is_false() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("does-not-exist");
        assert!(!is_within(tmp.path(), &parent, true));
    }

    #[test]
    fn is_within_missing_child_lenient() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("hero.png");
        assert!(is_within(&target, tmp.path(), false));
        // Strict mode still requires the child to exist.
        assert!(!is_within(&target, tmp.path(), true));
    }

    #[cfg(unix)]
    #[test]
    fn is_within_rejects_symlink_escape() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside.txt");
        fs::create_dir(&root).unwrap();
        fs::write(&outside, "secret").unwrap();

        let link = root.join("innocent.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        // The link lives inside root, but its real target does not.
        assert!(!is_within(&link, &root, true));
    }

    #[cfg(unix)]
    #[test]
    fn is_within_accepts_internal_symlink() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        let real = root.join("real.txt");
        fs::write(&real, "x").unwrap();

        let link = root.join("alias.txt");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert!(is_within(&link, &root, true));
    }
}
