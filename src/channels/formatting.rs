use crate::utils::byte_offset;

pub use crate::utils::truncate_tail;

/// Split text into chunks of at most `max_len` characters.
///
/// Each cut prefers the last newline in the chunk, then the last space, then
/// a hard cut. A newline or space only counts when it lies past the first
/// third of the limit, so chunks never collapse to a few characters. A
/// newline cut is dropped from both sides; exactly one leading '\n' is
/// stripped from the remainder. A space stays at the end of its chunk.
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let limit = byte_offset(remaining, max_len);
        let floor = byte_offset(remaining, max_len / 3);
        let region = &remaining[floor..limit];

        let split_at = region
            .rfind('\n')
            .map(|p| floor + p)
            .or_else(|| region.rfind(' ').map(|p| floor + p + 1))
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }

    chunks
}

/// Wrap text in a fenced code block, breaking any fence inside it.
pub(crate) fn code_block(text: &str) -> String {
    let body = text.replace("```", "`\u{200b}``");
    let body = body.trim_end_matches('\n');
    format!("```\n{}\n```", body)
}

pub(crate) fn build_help_text(prefix: &str) -> String {
    let p = prefix;
    format!(
        "**Commands**\n\
         `{p}help` — Show this message\n\
         `{p}sessions` — List saved sessions\n\
         `{p}resume <n>` — Resume a saved session\n\
         `{p}new` — Start a fresh agent session\n\
         `{p}reset` — Rebuild the conversation from scratch\n\
         `{p}abort` — Stop the running turn\n\
         `{p}model [name]` — Show or switch the model\n\
         `{p}thinking [level]` — Show or set the thinking level\n\
         \n\
         **Permissions**\n\
         `{p}permissions` — Show rules and default mode\n\
         `{p}permissions allow|ask|deny <rule>` — Add a rule, e.g. `bash(npm run *)`\n\
         `{p}permissions remove <rule>` — Remove a rule\n\
         `{p}permissions mode <default|acceptEdits|dontAsk|bypassPermissions>`\n\
         `{p}permissions reset` — Restore defaults\n\
         `{p}approve <id>` / `{p}deny <id>` — Answer a pending approval\n\
         \n\
         **Terminal**\n\
         `{p}tmux list` — List tmux sessions\n\
         `{p}tmux select <name>` — Bind a session\n\
         `{p}tmux new <name> [command]` — Create a session\n\
         `{p}tmux kill <name>` — Kill a session\n\
         `{p}tmux capture` — Show the pane\n\
         `{p}tmux on|off` — Toggle direct terminal mode\n\
         `{p}tmux ctrlc` / `{p}tmux enter` — Send a key\n\
         `{p}tmux resize <cols> <rows>` — Resize the window\n\
         \n\
         Name a topic `tmux` or `tmux:<session>` to type straight into a terminal."
    )
}
