//! The managed block in the user's shell profile.
//! Everything between the two markers belongs to us and is rewritten whole.

pub const BEGIN_MARKER: &str = "# >>> presto-tools >>>";
pub const END_MARKER: &str = "# <<< presto-tools <<<";

pub fn render_block() -> String {
    format!(
        r#"{BEGIN_MARKER}
# Managed by presto-tools-install. Changes inside this block are overwritten.
case ":$PATH:" in
    *":$HOME/.cargo/bin:"*) ;;
    *) export PATH="$HOME/.cargo/bin:$PATH" ;;
esac
alias presto_drives='sudo presto-drive-status'
alias presto_docker='presto-docker-monitor'
alias presto_usb='sudo presto-usb-install'
alias presto_refresh='presto-compose-refresh --interactive'
alias presto_update='presto-tools-install --update'
if [[ $- == *i* ]] && command -v presto-welcome >/dev/null 2>&1; then
    presto-welcome
fi
{END_MARKER}
"#
    )
}

/// Byte range of the block, including the end marker's newline.
/// A missing end marker means the block runs to the end of the file.
fn block_range(content: &str) -> Option<(usize, usize)> {
    let start = line_start_of(content, BEGIN_MARKER)?;
    let end = match content[start..].find(END_MARKER) {
        Some(rel) => {
            let marker_end = start + rel + END_MARKER.len();
            match content[marker_end..].find('\n') {
                Some(nl) => marker_end + nl + 1,
                None => content.len(),
            }
        }
        None => content.len(),
    };
    Some((start, end))
}

/// Start of the first line that is exactly `marker` (surrounding blanks ignored).
fn line_start_of(content: &str, marker: &str) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim() == marker {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

pub fn has_block(content: &str) -> bool {
    block_range(content).is_some()
}

/// Replaces an existing block in place, or appends one after a blank line.
pub fn upsert_block(content: &str, block: &str) -> String {
    if let Some((start, end)) = block_range(content) {
        let mut out = String::with_capacity(content.len() + block.len());
        out.push_str(&content[..start]);
        out.push_str(block);
        out.push_str(&content[end..]);
        return out;
    }

    let mut out = content.to_string();
    if !out.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str(block);
    out
}

/// Removes the block and the blank line `upsert_block` put in front of it.
pub fn remove_block(content: &str) -> String {
    let Some((start, end)) = block_range(content) else {
        return content.to_string();
    };
    let mut head = content[..start].to_string();
    if head.ends_with("\n\n") {
        head.pop();
    }
    head.push_str(&content[end..]);
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASHRC: &str = "# ~/.bashrc\nexport EDITOR=vim\n";

    #[test]
    fn insert_appends_after_blank_line() {
        let out = upsert_block(BASHRC, &render_block());
        assert!(out.starts_with(BASHRC));
        assert!(out.contains(&format!("vim\n\n{BEGIN_MARKER}\n")));
        assert!(out.ends_with(&format!("{END_MARKER}\n")));
        assert!(has_block(&out));
    }

    #[test]
    fn insert_is_idempotent() {
        let once = upsert_block(BASHRC, &render_block());
        let twice = upsert_block(&once, &render_block());
        assert_eq!(once, twice);
        assert_eq!(twice.matches(BEGIN_MARKER).count(), 1);
    }

    #[test]
    fn replace_keeps_surrounding_lines() {
        let content = format!("a\n{BEGIN_MARKER}\nold stuff\n{END_MARKER}\nb\n");
        let out = upsert_block(&content, "NEW\n");
        assert_eq!(out, "a\nNEW\nb\n");
    }

    #[test]
    fn remove_restores_original() {
        let added = upsert_block(BASHRC, &render_block());
        assert_eq!(remove_block(&added), BASHRC);
        assert_eq!(remove_block(BASHRC), BASHRC);
        assert_eq!(remove_block(&upsert_block("", &render_block())), "");
    }

    #[test]
    fn missing_end_marker_runs_to_eof() {
        let content = format!("a\n{BEGIN_MARKER}\nhalf written");
        assert_eq!(remove_block(&content), "a\n");
    }

    #[test]
    fn marker_must_be_whole_line() {
        let content = format!("echo '{BEGIN_MARKER}'\n");
        assert!(!has_block(&content));
    }
}
