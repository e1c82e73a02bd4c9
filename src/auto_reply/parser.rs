use regex::Regex;
use std::sync::LazyLock;

use super::traits::{CommandParser, ParsedCommand};

static MENTION_DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[0-9]+").ok());

/// Parser for `<prefix><name> arg arg ...` messages.
pub struct PrefixCommandParser {
    prefix: String,
}

impl PrefixCommandParser {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }
}

impl CommandParser for PrefixCommandParser {
    fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let rest = text.trim_start().strip_prefix(self.prefix.as_str())?;
        let mut tokens = rest.split_whitespace();
        // "! summon" is not a command: the name must touch the prefix.
        if rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = tokens.next()?.to_string();
        Some(ParsedCommand {
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn name(&self) -> &str {
        "prefix"
    }
}

/// User id in a mention such as `<@123>` or `<@!123>`: the first run of digits.
pub fn mention_user_id(raw: &str) -> Option<u64> {
    let re = MENTION_DIGITS.as_ref()?;
    re.find(raw)?.as_str().parse().ok()
}
