//! Per-snapshot relocation of result files. Results directories are
//! append-only history: at snapshot time the current files move into a
//! subdirectory derived from a template, and later moves must leave prior
//! snapshot subdirectories untouched.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::error::{DwsError, ErrorContext, Result};

/// Expand a results directory template. `{TAG}` collapses together with
/// its neighboring separator when no tag was given.
pub fn expand_dir_template(
    template: &str,
    username: &str,
    hostname: &str,
    timestamp: NaiveDateTime,
    snapshot_no: u32,
    tag: Option<&str>,
) -> String {
    let mut out = template.to_string();
    out = match tag {
        Some(t) => out.replace("{TAG}-", &format!("{}-", t)),
        None => out.replace("{TAG}-", ""),
    };
    out = match tag {
        Some(t) => out.replace("-{TAG}", &format!("-{}", t)),
        None => out.replace("-{TAG}", ""),
    };
    out = out.replace("{TAG}", tag.unwrap_or(""));
    out = out.replace("{ISO_TIMESTAMP}", &timestamp.format("%Y-%m-%dT%H:%M:%S").to_string());
    out = out.replace("{YEAR}", &timestamp.format("%Y").to_string());
    out = out.replace("{MONTH}", &timestamp.format("%m").to_string());
    out = out.replace("{SHORT_MONTH}", &timestamp.format("%b").to_string());
    out = out.replace("{DAY}", &timestamp.format("%d").to_string());
    out = out.replace("{DAY_OF_WEEK}", &timestamp.format("%A").to_string());
    out = out.replace("{HOUR}", &timestamp.format("%H").to_string());
    out = out.replace("{MIN}", &timestamp.format("%M").to_string());
    out = out.replace("{SEC}", &timestamp.format("%S").to_string());
    out = out.replace("{USERNAME}", username);
    out = out.replace("{HOSTNAME}", hostname);
    out = out.replace("{SNAPSHOT_NO}", &format!("{:03}", snapshot_no));
    out
}

// Sentinels used while building the template pattern, so token snippets
// survive the literal-escaping pass.
const TOKEN_SNIPPETS: [(&str, &str); 15] = [
    ("{TAG}-", "(\\w+\\-)?"),
    ("-{TAG}", "(\\-\\w+)?"),
    ("{TAG}", "\\w*"),
    ("{ISO_TIMESTAMP}", "\\d\\d\\d\\d\\-\\d\\d\\-\\d\\dT\\d\\d:\\d\\d:\\d\\d"),
    ("{YEAR}", "\\d\\d\\d\\d"),
    ("{MONTH}", "\\d\\d"),
    ("{SHORT_MONTH}", "\\w\\w\\w"),
    ("{DAY_OF_WEEK}", "\\w+"),
    ("{DAY}", "\\d\\d"),
    ("{HOUR}", "\\d\\d"),
    ("{MIN}", "\\d\\d"),
    ("{SEC}", "\\d\\d"),
    ("{USERNAME}", "\\w+"),
    ("{HOSTNAME}", "\\w+"),
    ("{SNAPSHOT_NO}", "\\d\\d+"),
];

/// Build the anchored regex that matches any directory a template could
/// have expanded to. Used to exclude prior snapshot directories from a
/// results move.
pub fn make_re_pattern_for_dir_template(template: &str) -> Result<Regex> {
    // Private-use sentinels stand in for tokens while literals get escaped.
    const SENTINELS: [char; 15] = [
        '\u{E000}', '\u{E001}', '\u{E002}', '\u{E003}', '\u{E004}', '\u{E005}', '\u{E006}',
        '\u{E007}', '\u{E008}', '\u{E009}', '\u{E00A}', '\u{E00B}', '\u{E00C}', '\u{E00D}',
        '\u{E00E}',
    ];
    let mut working = template.to_string();
    let mut sentinels = Vec::new();
    for (i, (token, snippet)) in TOKEN_SNIPPETS.iter().enumerate() {
        let sentinel = SENTINELS[i];
        if working.contains(token) {
            working = working.replace(token, &sentinel.to_string());
        }
        sentinels.push((sentinel, *snippet));
    }

    let mut pattern = String::from("^");
    for c in working.chars() {
        if let Some((_, snippet)) = sentinels.iter().find(|(s, _)| *s == c) {
            pattern.push_str(snippet);
        } else if c.is_ascii_alphanumeric() || c == '_' {
            pattern.push(c);
        } else {
            pattern.push('\\');
            pattern.push(c);
        }
    }
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| {
        DwsError::config(format!("Results dir template '{}' produced an invalid pattern: {}", template, e))
    })
}

/// Move every current file under `base_dir` into `rel_dest_root`,
/// preserving relative paths. Skips the named exclusions, anything already
/// inside a directory matching `exclude_dirs_re` (a prior snapshot), and
/// `.git`. Returns the (source, destination) relative-path mapping in the
/// order the files were moved.
pub fn move_current_files_local_fs<F>(
    resource_name: &str,
    base_dir: &Path,
    rel_dest_root: &str,
    exclude_files: &HashSet<String>,
    exclude_dirs_re: &Regex,
    mut move_fn: F,
    verbose: bool,
) -> Result<Vec<(String, String)>>
where
    F: FnMut(&Path, &Path) -> Result<()>,
{
    let dest_root = base_dir.join(rel_dest_root);
    let mut moved = Vec::new();
    walk_and_move(
        base_dir,
        base_dir,
        &dest_root,
        rel_dest_root,
        exclude_files,
        exclude_dirs_re,
        &mut move_fn,
        &mut moved,
        verbose,
    )?;
    if verbose {
        eprintln!("Moved {} file(s) for resource {}", moved.len(), resource_name);
    }
    Ok(moved)
}

fn walk_and_move<F>(
    base_dir: &Path,
    dir: &Path,
    dest_root: &Path,
    rel_dest_root: &str,
    exclude_files: &HashSet<String>,
    exclude_dirs_re: &Regex,
    move_fn: &mut F,
    moved: &mut Vec<(String, String)>,
    verbose: bool,
) -> Result<()>
where
    F: FnMut(&Path, &Path) -> Result<()>,
{
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let entries = fs::read_dir(dir)
        .with_io_context(|| format!("reading results directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_io_context(|| "reading results directory entry".to_string())?;
        let ftype = entry
            .file_type()
            .with_io_context(|| format!("getting file type of {}", entry.path().display()))?;
        if ftype.is_dir() {
            dirs.push(entry.path());
        } else if ftype.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    dirs.sort();

    for file in files {
        let rel = relative_str(base_dir, &file)?;
        if exclude_files.contains(&rel) {
            continue;
        }
        let dest_rel = format!("{}/{}", rel_dest_root, rel);
        let dest_abs = base_dir.join(&dest_rel);
        if let Some(parent) = dest_abs.parent() {
            fs::create_dir_all(parent)
                .with_io_context(|| format!("creating results directory {}", parent.display()))?;
        }
        if verbose {
            eprintln!("moving {} -> {}", rel, dest_rel);
        }
        move_fn(&file, &dest_abs)?;
        moved.push((rel, dest_rel));
    }

    for subdir in dirs {
        let rel = relative_str(base_dir, &subdir)?;
        if subdir == dest_root
            || rel == rel_dest_root
            || subdir.file_name().map(|n| n == ".git").unwrap_or(false)
            || exclude_dirs_re.is_match(&rel)
        {
            continue;
        }
        walk_and_move(
            base_dir,
            &subdir,
            dest_root,
            rel_dest_root,
            exclude_files,
            exclude_dirs_re,
            move_fn,
            moved,
            verbose,
        )?;
    }
    Ok(())
}

fn relative_str(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| DwsError::internal(format!("{} is outside {}", path.display(), base.display())))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 9, 30).unwrap().and_hms_opt(18, 19, 54).unwrap()
    }

    fn assert_pattern(template: &str, expected: &str) {
        let re = make_re_pattern_for_dir_template(template).unwrap();
        assert_eq!(re.as_str(), expected, "pattern for template '{}'", template);
    }

    #[test]
    fn test_pattern_iso_username_number() {
        assert_pattern(
            "{ISO_TIMESTAMP}/{USERNAME}-{SNAPSHOT_NO}",
            r"^\d\d\d\d\-\d\d\-\d\dT\d\d:\d\d:\d\d\/\w+\-\d\d+$",
        );
    }

    #[test]
    fn test_pattern_trailing_optional_tag() {
        assert_pattern(
            "{YEAR}-{MONTH}/{DAY}-{MIN}:{SEC}-{TAG}",
            r"^\d\d\d\d\-\d\d\/\d\d\-\d\d\:\d\d(\-\w+)?$",
        );
    }

    #[test]
    fn test_pattern_embedded_optional_tag() {
        assert_pattern(
            "saved-results/{ISO_TIMESTAMP}-{TAG}-{SNAPSHOT_NO}",
            r"^saved\-results\/\d\d\d\d\-\d\d\-\d\dT\d\d:\d\d:\d\d\-(\w+\-)?\d\d+$",
        );
    }

    fn assert_expansion(template: &str, tag: Option<&str>, expected: &str) {
        let expanded = expand_dir_template(template, "jfischer", "localhost", ts(), 22, tag);
        assert_eq!(expanded, expected, "expansion of template '{}'", template);
        let re = make_re_pattern_for_dir_template(template).unwrap();
        assert!(re.is_match(&expanded), "pattern {} should match '{}'", re.as_str(), expanded);
    }

    #[test]
    fn test_expand_with_tag() {
        assert_expansion(
            "{ISO_TIMESTAMP}/{USERNAME}-{SNAPSHOT_NO}-{TAG}",
            Some("V1"),
            "2018-09-30T18:19:54/jfischer-022-V1",
        );
    }

    #[test]
    fn test_expand_without_tag_collapses_separator() {
        assert_expansion(
            "results/{YEAR}-{MONTH}/{DAY}.{DAY_OF_WEEK}-{TAG}-{HOSTNAME}",
            None,
            "results/2018-09/30.Sunday-localhost",
        );
    }

    #[test]
    fn test_expand_short_month() {
        assert_expansion(
            "{YEAR}-{MONTH}/{SHORT_MONTH}-{DAY}-{HOUR}:{MIN}-{TAG}",
            Some("V1"),
            "2018-09/Sep-30-18:19-V1",
        );
    }

    fn makefile(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel.as_bytes()).unwrap();
    }

    fn plain_move(src: &Path, dest: &Path) -> Result<()> {
        fs::rename(src, dest).with_io_context(|| "moving test file".to_string())
    }

    #[test]
    fn test_move_excludes_and_second_batch() {
        let tmp = tempdir().unwrap();
        let base = tmp.path();
        makefile(base, "results.csv");
        makefile(base, "test.log");
        makefile(base, "subdir/output.csv");

        let exclude_re = Regex::new(r"^.+\-.+\/.+\/.+\-\d\d\:\d\d$").unwrap();
        let excludes: HashSet<String> = ["results.csv".to_string()].into_iter().collect();

        let mapping = move_current_files_local_fs(
            "test",
            base,
            "2018-09/19/jfischer-11:45",
            &excludes,
            &exclude_re,
            plain_move,
            false,
        )
        .unwrap();
        assert_eq!(
            mapping,
            vec![
                ("test.log".to_string(), "2018-09/19/jfischer-11:45/test.log".to_string()),
                (
                    "subdir/output.csv".to_string(),
                    "2018-09/19/jfischer-11:45/subdir/output.csv".to_string()
                ),
            ]
        );
        assert!(base.join("2018-09/19/jfischer-11:45/test.log").exists());
        assert!(base.join("2018-09/19/jfischer-11:45/subdir/output.csv").exists());
        assert!(base.join("results.csv").exists());

        // Second batch: earlier snapshot directories are left alone.
        makefile(base, "test.log");
        makefile(base, "test2.log");
        makefile(base, "subdir/output.csv");
        let mapping = move_current_files_local_fs(
            "test",
            base,
            "2018-09/19/jfischer-11:50",
            &excludes,
            &exclude_re,
            plain_move,
            false,
        )
        .unwrap();
        assert_eq!(
            mapping,
            vec![
                ("test.log".to_string(), "2018-09/19/jfischer-11:50/test.log".to_string()),
                ("test2.log".to_string(), "2018-09/19/jfischer-11:50/test2.log".to_string()),
                (
                    "subdir/output.csv".to_string(),
                    "2018-09/19/jfischer-11:50/subdir/output.csv".to_string()
                ),
            ]
        );
        assert!(base.join("2018-09/19/jfischer-11:45/test.log").exists());
        assert!(base.join("2018-09/19/jfischer-11:50/test2.log").exists());
        assert!(base.join("results.csv").exists());
    }
}
