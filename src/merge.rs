use similar::TextDiff;

pub const CONFLICT_START: &str = "<<<<<<< LOCAL";
pub const CONFLICT_MID: &str = "=======";
pub const CONFLICT_END: &str = ">>>>>>> REMOTE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Same,
    Add,
    Replace,
    Update,
}

pub struct MergeOutcome {
    pub bytes: Vec<u8>,
    pub classification: Classification,
    pub conflict_count: usize,
}

/// Classifies a (local, remote) pair per spec.md §4.7, then merges.
pub fn merge(local: Option<&[u8]>, remote: &[u8]) -> MergeOutcome {
    match local {
        None => MergeOutcome {
            bytes: remote.to_vec(),
            classification: Classification::Add,
            conflict_count: 0,
        },
        Some(local) if local.is_empty() => MergeOutcome {
            bytes: remote.to_vec(),
            classification: Classification::Replace,
            conflict_count: 0,
        },
        Some(local) if normalize_trailing_newline(local) == normalize_trailing_newline(remote) => {
            MergeOutcome {
                bytes: local.to_vec(),
                classification: Classification::Same,
                conflict_count: 0,
            }
        }
        Some(local) => {
            let (bytes, conflicts) = two_way_merge(local, remote);
            MergeOutcome {
                bytes,
                classification: Classification::Update,
                conflict_count: conflicts,
            }
        }
    }
}

fn normalize_trailing_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

/// Pure function from (local bytes, remote bytes) to (merged bytes, conflict
/// count); isolated so it stays amenable to property tests (spec.md §9).
pub fn two_way_merge(local: &[u8], remote: &[u8]) -> (Vec<u8>, usize) {
    let local_str = String::from_utf8_lossy(local);
    let remote_str = String::from_utf8_lossy(remote);
    let local_ends_nl = local_str.ends_with('\n');
    let remote_ends_nl = remote_str.ends_with('\n');
    let output_ends_nl = local_ends_nl || remote_ends_nl;

    let local_lines: Vec<&str> = split_lines(&local_str);
    let remote_lines: Vec<&str> = split_lines(&remote_str);

    let diff = TextDiff::from_slices(&local_lines, &remote_lines);
    let mut out: Vec<String> = Vec::new();
    let mut conflicts = 0usize;

    for op in diff.ops() {
        let a_range = op.old_range();
        let c_range = op.new_range();
        match op.tag() {
            similar::DiffTag::Equal => {
                out.extend(local_lines[a_range].iter().map(|s| s.to_string()));
            }
            similar::DiffTag::Insert => {
                out.extend(remote_lines[c_range].iter().map(|s| s.to_string()));
            }
            similar::DiffTag::Delete => {
                conflicts += 1;
                out.push(CONFLICT_START.to_string());
                out.extend(local_lines[a_range].iter().map(|s| s.to_string()));
                out.push(CONFLICT_MID.to_string());
                out.push(CONFLICT_END.to_string());
            }
            similar::DiffTag::Replace => {
                conflicts += 1;
                out.push(CONFLICT_START.to_string());
                out.extend(local_lines[a_range].iter().map(|s| s.to_string()));
                out.push(CONFLICT_MID.to_string());
                out.extend(remote_lines[c_range].iter().map(|s| s.to_string()));
                out.push(CONFLICT_END.to_string());
            }
        }
    }

    let mut rendered = out.join("\n");
    if output_ends_nl {
        rendered.push('\n');
    }
    (rendered.into_bytes(), conflicts)
}

fn split_lines(s: &str) -> Vec<&str> {
    let body = s.strip_suffix('\n').unwrap_or(s);
    if body.is_empty() {
        Vec::new()
    } else {
        body.split('\n').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_after_trailing_newline_normalization_yields_no_write() {
        let outcome = merge(Some(b"x\ny\n"), b"x\ny");
        assert_eq!(outcome.classification, Classification::Same);
        assert_eq!(outcome.conflict_count, 0);
    }

    #[test]
    fn absent_local_adds_remote_verbatim() {
        let outcome = merge(None, b"a\nb\n");
        assert_eq!(outcome.classification, Classification::Add);
        assert_eq!(outcome.bytes, b"a\nb\n");
    }

    #[test]
    fn empty_local_is_replaced_verbatim() {
        let outcome = merge(Some(b""), b"a\nb\n");
        assert_eq!(outcome.classification, Classification::Replace);
        assert_eq!(outcome.bytes, b"a\nb\n");
    }

    #[test]
    fn scenario_four_merge_conflict_exact_bytes() {
        let outcome = merge(Some(b"x\ny\nz\n"), b"x\nY\nz\n");
        assert_eq!(outcome.classification, Classification::Update);
        assert_eq!(outcome.conflict_count, 1);
        let expected = "x\n<<<<<<< LOCAL\ny\n=======\nY\n>>>>>>> REMOTE\nz\n";
        assert_eq!(String::from_utf8(outcome.bytes).unwrap(), expected);
    }

    #[test]
    fn scenario_five_insert_only_remote_is_silent() {
        let outcome = merge(Some(b"a\nb\n"), b"a\nb\nc\n");
        assert_eq!(outcome.classification, Classification::Update);
        assert_eq!(outcome.conflict_count, 0);
        assert_eq!(outcome.bytes, b"a\nb\nc\n");
    }

    #[test]
    fn identical_inputs_merge_to_identical_output_with_no_markers() {
        let text = b"line one\nline two\n";
        let outcome = merge(Some(text), text);
        assert_eq!(outcome.bytes, text);
        assert_eq!(outcome.conflict_count, 0);
    }

    #[test]
    fn conflict_markers_appear_as_whole_lines_and_paired() {
        let outcome = merge(Some(b"y\n"), b"Y\n");
        let text = String::from_utf8(outcome.bytes).unwrap();
        let starts = text.lines().filter(|l| *l == CONFLICT_START).count();
        let ends = text.lines().filter(|l| *l == CONFLICT_END).count();
        assert_eq!(starts, ends);
        assert!(starts > 0);
    }
}
