//! File name and layout checks run after an upload has been unpacked.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use upload_sandbox::{SandboxedTree, TreeEntry, Warning};

use crate::errors::AppResult;

/// Directory name reserved for ancillary files
pub const ANCILLARY_DIR: &str = "anc";

static WINDOWS_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:\\").expect("valid drive prefix regex"));
static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_+\-.=,]").expect("valid character class regex"));

const ACCEPTED_CHARACTERS: &str =
    "We only accept file names containing the characters: a-z A-Z 0-9 _ + - . , =";

/// Run every check over the tree and return the warnings it produced.
///
/// Running it again on a tree it already checked records nothing new,
/// except for files whose rename target was taken.
pub fn check_tree(tree: &SandboxedTree) -> AppResult<Vec<Warning>> {
    let mut warnings = Vec::new();
    for entry in tree.snapshot_files()? {
        check_file(tree, &entry, &mut warnings)?;
    }
    hoist_top_level_directory(tree, &mut warnings)?;
    Ok(warnings)
}

fn check_file(tree: &SandboxedTree, entry: &TreeEntry, warnings: &mut Vec<Warning>) -> AppResult<()> {
    let public = entry.public_path();

    if entry.size == 0 {
        warnings.push(Warning::warning(format!("{public} is empty (size is zero)")).at(&public));
        tree.quarantine(&entry.path)?;
        warnings.push(Warning::warning(format!("*** File {public} has been removed ***")).at(&public));
        return Ok(());
    }

    let Some(name) = entry.path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };
    let parent_public = entry
        .relative
        .parent()
        .map(upload_sandbox::public_path)
        .filter(|p| !p.is_empty());
    let display = |basename: &str| match &parent_public {
        Some(dir) => format!("{dir}/{basename}"),
        None => basename.to_string(),
    };

    let mut new_name = name.clone();

    if WINDOWS_PREFIX.is_match(&new_name) {
        let last = new_name.rsplit('\\').next().unwrap_or_default().to_string();
        warnings.push(
            Warning::warning(format!("Renaming {} to {}.", display(&new_name), display(&last))).at(&public),
        );
        new_name = last;
    }

    if ILLEGAL_CHARS.is_match(&new_name) {
        let cleaned = ILLEGAL_CHARS.replace_all(&new_name, "_").into_owned();
        warnings.push(Warning::warning(ACCEPTED_CHARACTERS).at(&public));
        warnings.push(
            Warning::warning(format!(
                "Attempting to rename {} to {}.",
                display(&new_name),
                display(&cleaned)
            ))
            .at(&public),
        );
        new_name = cleaned;
    }

    if let Some(rest) = new_name.strip_prefix('-') {
        let cleaned = format!("_{rest}");
        warnings.push(
            Warning::warning(format!(
                "We do not accept files starting with a hyphen. Attempting to rename \"{}\" to \"{}\".",
                display(&new_name),
                display(&cleaned)
            ))
            .at(&public),
        );
        new_name = cleaned;
    }

    let mut current = entry.path.clone();
    if new_name != name && !new_name.is_empty() {
        let target = entry.path.with_file_name(&new_name);
        if fs::symlink_metadata(&target).is_ok() {
            warnings.push(
                Warning::warning(format!(
                    "Unable to rename {public}: {} already exists.",
                    display(&new_name)
                ))
                .at(&public),
            );
        } else {
            fs::rename(&entry.path, &target)?;
            debug!(from = %public, to = %display(&new_name), "Renamed file");
            current = target;
        }
    }

    let final_name = current
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if final_name.starts_with('.') {
        let final_public = tree.public_path_of(&current);
        tree.quarantine(&current)?;
        warnings.push(Warning::warning(format!("Removed hidden file {final_public}.")).at(&final_public));
    }

    Ok(())
}

/// While the source root holds nothing but a single directory (other than
/// the ancillary directory), move its contents up a level.
fn hoist_top_level_directory(tree: &SandboxedTree, warnings: &mut Vec<Warning>) -> AppResult<()> {
    let root = tree.source_root();
    loop {
        let entries: Vec<_> = fs::read_dir(root)?.collect::<Result<_, _>>()?;
        let [only] = entries.as_slice() else {
            return Ok(());
        };
        let name = only.file_name().to_string_lossy().into_owned();
        if !only.file_type()?.is_dir() || name == ANCILLARY_DIR {
            return Ok(());
        }

        let staging = staging_path(root, &name);
        fs::rename(only.path(), &staging)?;
        for child in fs::read_dir(&staging)? {
            let child = child?;
            fs::rename(child.path(), root.join(child.file_name()))?;
        }
        fs::remove_dir(&staging)?;

        warnings.push(Warning::warning(format!("Removing top level directory {name}")).at(&name));
    }
}

fn staging_path(root: &Path, name: &str) -> std::path::PathBuf {
    let mut attempt = 0u32;
    loop {
        let candidate = root.join(format!(".{name}.hoist{attempt}"));
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> (TempDir, SandboxedTree) {
        let temp = TempDir::new().unwrap();
        let tree = SandboxedTree::open(temp.path().join("source"), temp.path().join("removed")).unwrap();
        (temp, tree)
    }

    fn write(tree: &SandboxedTree, relative: &str, content: &[u8]) {
        let path = tree.source_root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn messages(warnings: &[Warning]) -> Vec<&str> {
        warnings.iter().map(|w| w.message.as_str()).collect()
    }

    #[test]
    fn test_clean_tree_records_nothing() {
        let (_temp, tree) = tree();
        write(&tree, "main.tex", b"x");
        write(&tree, "figs/plot-1.eps", b"x");
        assert!(check_tree(&tree).unwrap().is_empty());
    }

    #[test]
    fn test_empty_file_is_removed() {
        let (_temp, tree) = tree();
        write(&tree, "main.tex", b"x");
        write(&tree, "figs/blank.eps", b"");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(
            messages(&warnings),
            vec![
                "figs/blank.eps is empty (size is zero)",
                "*** File figs/blank.eps has been removed ***",
            ]
        );
        assert!(!tree.source_root().join("figs/blank.eps").exists());
        assert!(tree.removed_root().join("blank.eps").exists());
    }

    #[test]
    fn test_windows_path_is_renamed() {
        let (_temp, tree) = tree();
        write(&tree, "other.tex", b"x");
        write(&tree, "C:\\Users\\me\\paper.tex", b"x");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(
            messages(&warnings),
            vec!["Renaming C:\\Users\\me\\paper.tex to paper.tex."]
        );
        assert!(tree.source_root().join("paper.tex").is_file());
    }

    #[test]
    fn test_illegal_characters_and_hyphen() {
        let (_temp, tree) = tree();
        write(&tree, "main.tex", b"x");
        write(&tree, "sub/my figure.eps", b"x");
        write(&tree, "-flag.tex", b"x");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(
            messages(&warnings),
            vec![
                "We do not accept files starting with a hyphen. Attempting to rename \"-flag.tex\" to \"_flag.tex\".",
                ACCEPTED_CHARACTERS,
                "Attempting to rename sub/my figure.eps to sub/my_figure.eps.",
            ]
        );
        assert!(tree.source_root().join("_flag.tex").is_file());
        assert!(tree.source_root().join("sub/my_figure.eps").is_file());

        assert!(check_tree(&tree).unwrap().is_empty());
    }

    #[test]
    fn test_rename_blocked_by_existing_file() {
        let (_temp, tree) = tree();
        write(&tree, "a b.tex", b"first");
        write(&tree, "a_b.tex", b"second");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(
            messages(&warnings),
            vec![
                ACCEPTED_CHARACTERS,
                "Attempting to rename a b.tex to a_b.tex.",
                "Unable to rename a b.tex: a_b.tex already exists.",
            ]
        );
        assert_eq!(fs::read(tree.source_root().join("a_b.tex")).unwrap(), b"second");
        assert!(tree.source_root().join("a b.tex").is_file());
    }

    #[test]
    fn test_hidden_files_are_removed() {
        let (_temp, tree) = tree();
        write(&tree, "main.tex", b"x");
        write(&tree, "figs/.DS_Store", b"junk");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(messages(&warnings), vec!["Removed hidden file figs/.DS_Store."]);
        assert!(!tree.source_root().join("figs/.DS_Store").exists());
        assert!(tree.removed_root().join(".DS_Store").exists());
    }

    #[test]
    fn test_top_level_directories_are_hoisted() {
        let (_temp, tree) = tree();
        write(&tree, "paper/inner/main.tex", b"x");
        write(&tree, "paper/inner/figs/a.eps", b"x");

        let warnings = check_tree(&tree).unwrap();
        assert_eq!(
            messages(&warnings),
            vec![
                "Removing top level directory paper",
                "Removing top level directory inner",
            ]
        );
        assert!(tree.source_root().join("main.tex").is_file());
        assert!(tree.source_root().join("figs/a.eps").is_file());
        assert!(!tree.source_root().join("paper").exists());
    }

    #[test]
    fn test_same_named_child_is_hoisted() {
        let (_temp, tree) = tree();
        write(&tree, "paper/paper/main.tex", b"x");
        write(&tree, "paper/readme.txt", b"x");

        check_tree(&tree).unwrap();
        assert!(tree.source_root().join("paper/main.tex").is_file());
        assert!(tree.source_root().join("readme.txt").is_file());
    }

    #[test]
    fn test_ancillary_directory_is_not_hoisted() {
        let (_temp, tree) = tree();
        write(&tree, "anc/data.csv", b"x");

        assert!(check_tree(&tree).unwrap().is_empty());
        assert!(tree.source_root().join("anc/data.csv").is_file());
    }
}
